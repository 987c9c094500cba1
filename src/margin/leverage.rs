//! Per-security leverage storage and validation.

use crate::error::{MarginError, Result};
use crate::securities::Security;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Whether a margin model lets users change leverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeveragePolicy {
    /// Collateralization is fixed by the instrument; leverage never changes.
    Fixed(Decimal),
    /// Leverage may be set to any positive value up to `max`.
    Adjustable { max: Option<Decimal> },
}

/// Reads and writes leverage on a security according to a [`LeveragePolicy`].
#[derive(Debug, Clone)]
pub struct LeverageController {
    policy: LeveragePolicy,
}

impl LeverageController {
    pub fn new(policy: LeveragePolicy) -> Self {
        Self { policy }
    }

    /// Leverage pinned to 1 (full collateralization).
    pub fn unleveraged() -> Self {
        Self::new(LeveragePolicy::Fixed(Decimal::ONE))
    }

    pub fn adjustable(max: Option<Decimal>) -> Self {
        Self::new(LeveragePolicy::Adjustable { max })
    }

    pub fn get_leverage(&self, security: &Security) -> Decimal {
        match self.policy {
            LeveragePolicy::Fixed(leverage) => leverage,
            LeveragePolicy::Adjustable { .. } => security.leverage(),
        }
    }

    /// Change leverage on `security`.
    ///
    /// Leaves the security untouched and returns [`MarginError::Configuration`]
    /// when the policy is fixed or the value is out of range.
    pub fn set_leverage(&self, security: &mut Security, leverage: Decimal) -> Result<()> {
        match self.policy {
            LeveragePolicy::Fixed(fixed) => {
                warn!(
                    symbol = %security.symbol(),
                    requested = %leverage,
                    fixed = %fixed,
                    "Rejected leverage change on fixed-leverage instrument"
                );
                Err(MarginError::Configuration(format!(
                    "{} is a {} with fixed leverage {}; leverage cannot be set to {}",
                    security.symbol(),
                    security.security_type(),
                    fixed,
                    leverage
                )))
            }
            LeveragePolicy::Adjustable { max } => {
                if leverage <= Decimal::ZERO {
                    return Err(MarginError::Configuration(format!(
                        "leverage must be positive, got {leverage}"
                    )));
                }
                if let Some(max) = max {
                    if leverage > max {
                        return Err(MarginError::Configuration(format!(
                            "leverage {leverage} exceeds maximum {max} for {}",
                            security.symbol()
                        )));
                    }
                }

                security.apply_leverage(leverage);
                debug!(symbol = %security.symbol(), %leverage, "Leverage updated");
                Ok(())
            }
        }
    }
}
