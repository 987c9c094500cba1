//! Table of margin models keyed by security type.

use super::leveraged::LeveragedMarginModel;
use super::option::OptionMarginModel;
use super::MarginModel;
use crate::config::OptionMarginConfig;
use crate::error::{MarginError, Result};
use crate::securities::{Security, SecurityType};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Maps every [`SecurityType`] to the model its margin is computed with.
///
/// New instrument kinds are supported by registering a model rather than by
/// extending an existing one.
#[derive(Debug, Clone, Default)]
pub struct MarginModelRegistry {
    models: HashMap<SecurityType, Arc<dyn MarginModel>>,
}

impl MarginModelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options on the option model, equities and futures on the leveraged model.
    pub fn with_defaults(option_config: OptionMarginConfig) -> Self {
        let mut registry = Self::new();
        let leveraged: Arc<dyn MarginModel> = Arc::new(LeveragedMarginModel::default());
        registry.register(SecurityType::Equity, leveraged.clone());
        registry.register(SecurityType::Future, leveraged);
        registry.register(
            SecurityType::Option,
            Arc::new(OptionMarginModel::new(option_config)),
        );
        registry
    }

    /// Register `model` for `security_type`, returning the model it replaces.
    pub fn register(
        &mut self,
        security_type: SecurityType,
        model: Arc<dyn MarginModel>,
    ) -> Option<Arc<dyn MarginModel>> {
        debug!(%security_type, model = model.name(), "Registering margin model");
        self.models.insert(security_type, model)
    }

    pub fn model_for(&self, security_type: SecurityType) -> Result<&dyn MarginModel> {
        self.models
            .get(&security_type)
            .map(|model| model.as_ref())
            .ok_or(MarginError::UnregisteredModel(security_type))
    }

    pub fn get_leverage(&self, security: &Security) -> Result<Decimal> {
        Ok(self.model_for(security.security_type())?.get_leverage(security))
    }

    pub fn set_leverage(&self, security: &mut Security, leverage: Decimal) -> Result<()> {
        self.model_for(security.security_type())?
            .set_leverage(security, leverage)
    }
}
