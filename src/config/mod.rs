//! Configuration management for the buying power engine.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Account-level settings
    #[serde(default)]
    pub account: AccountConfig,
    /// Option margin formula parameters
    #[serde(default)]
    pub option_margin: OptionMarginConfig,
    /// Order quantity solver parameters
    #[serde(default)]
    pub solver: SolverConfig,
    /// Fee assumptions used when sizing orders
    #[serde(default)]
    pub fees: FeeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Currency buying power is reported in
    #[serde(default = "default_account_currency")]
    pub account_currency: String,
    /// Fraction of portfolio value that must stay free (0.0-1.0)
    #[serde(default)]
    pub required_free_buying_power_percent: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionMarginConfig {
    /// Share of the underlying value charged on a naked short
    #[serde(default = "default_naked_underlying_rate")]
    pub naked_underlying_rate: Decimal,
    /// Minimum share of the underlying value charged on a naked short, however far OTM
    #[serde(default = "default_naked_otm_floor_rate")]
    pub naked_otm_floor_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Margin evaluations and fee passes allowed per solve before the result is flagged approximate
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Absolute distance (account currency) at which the target counts as met
    #[serde(default = "default_margin_tolerance")]
    pub margin_tolerance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Flat fee per order in the order's quote currency
    #[serde(default)]
    pub flat_fee: Decimal,
    /// Fee as a share of order notional (0.0004 = 4 bp)
    #[serde(default)]
    pub notional_rate: Decimal,
}

// Default value functions
fn default_account_currency() -> String {
    "USD".to_string()
}

fn default_naked_underlying_rate() -> Decimal {
    Decimal::new(2, 1) // 0.20
}

fn default_naked_otm_floor_rate() -> Decimal {
    Decimal::new(1, 1) // 0.10
}

fn default_max_iterations() -> u32 {
    100
}

fn default_margin_tolerance() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("OBP"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.account.account_currency.is_empty(),
            "account_currency must not be empty"
        );

        anyhow::ensure!(
            self.account.required_free_buying_power_percent >= Decimal::ZERO
                && self.account.required_free_buying_power_percent < Decimal::ONE,
            "required_free_buying_power_percent must be in [0, 1)"
        );

        anyhow::ensure!(
            self.option_margin.naked_underlying_rate >= Decimal::ZERO
                && self.option_margin.naked_otm_floor_rate >= Decimal::ZERO,
            "naked option rates must not be negative"
        );

        anyhow::ensure!(self.solver.max_iterations >= 1, "max_iterations must be >= 1");

        anyhow::ensure!(
            self.solver.margin_tolerance >= Decimal::ZERO,
            "margin_tolerance must not be negative"
        );

        anyhow::ensure!(
            self.fees.flat_fee >= Decimal::ZERO && self.fees.notional_rate >= Decimal::ZERO,
            "fees must not be negative"
        );

        Ok(())
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            account_currency: default_account_currency(),
            required_free_buying_power_percent: Decimal::ZERO,
        }
    }
}

impl Default for OptionMarginConfig {
    fn default() -> Self {
        Self {
            naked_underlying_rate: default_naked_underlying_rate(),
            naked_otm_floor_rate: default_naked_otm_floor_rate(),
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            margin_tolerance: default_margin_tolerance(),
        }
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            flat_fee: Decimal::ZERO,
            notional_rate: Decimal::ZERO,
        }
    }
}
