//! Margin requirements, buying power and target order sizing.
//!
//! Provides:
//! - Per-instrument margin models behind one [`MarginModel`] capability
//! - A registry mapping security types to models
//! - Leverage storage and validation
//! - Portfolio-wide buying power aggregation
//! - Order sizing for a target buying-power utilization

mod buying_power;
mod leverage;
mod leveraged;
mod option;
mod registry;
mod solver;

pub use buying_power::{BuyingPower, BuyingPowerAggregator};
pub use leverage::{LeverageController, LeveragePolicy};
pub use leveraged::LeveragedMarginModel;
pub use option::OptionMarginModel;
pub use registry::MarginModelRegistry;
pub use solver::{BuyingPowerResult, Convergence, OrderQuantitySolver};

use crate::error::Result;
use crate::securities::{PositionSnapshot, Security};
use rust_decimal::Decimal;
use std::fmt;

/// Capability shared by every margin model.
///
/// Implementations are pure functions of the snapshot they are given.
pub trait MarginModel: Send + Sync + fmt::Debug {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    fn leverage_controller(&self) -> &LeverageController;

    fn get_leverage(&self, security: &Security) -> Decimal {
        self.leverage_controller().get_leverage(security)
    }

    fn set_leverage(&self, security: &mut Security, leverage: Decimal) -> Result<()> {
        self.leverage_controller().set_leverage(security, leverage)
    }

    /// Collateral required to keep holding the snapshot's position, in quote currency.
    fn maintenance_margin(&self, snapshot: &PositionSnapshot) -> Result<Decimal>;

    /// Collateral required to open the snapshot's position, in quote currency.
    fn initial_margin(&self, snapshot: &PositionSnapshot) -> Result<Decimal> {
        Ok(self
            .initial_margin_requirement(snapshot, snapshot.quantity)?
            .abs())
    }

    /// Signed margin (negative for short) of holding `quantity` units given the snapshot.
    fn initial_margin_requirement(&self, snapshot: &PositionSnapshot, quantity: Decimal) -> Result<Decimal>;
}
