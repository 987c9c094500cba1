//! # Option Buying Power
//!
//! Margin requirements, buying power and target order sizing for portfolios
//! holding options alongside equities and futures.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `error`: Error type shared by every computation
//! - `securities`: Securities, holdings and point-in-time position snapshots
//! - `portfolio`: Cash book, currency conversion and portfolio snapshots
//! - `margin`: Margin models, buying power aggregation and the order solver
//! - `fees`: Fee models consulted while sizing orders
//! - `scenario`: JSON scenario files for the command-line front end
//! - `utils`: Shared decimal arithmetic

pub mod config;
pub mod error;
pub mod fees;
pub mod margin;
pub mod portfolio;
pub mod scenario;
pub mod securities;
pub mod utils;

pub use config::Config;
pub use error::{MarginError, Result};
pub use margin::{
    BuyingPower, BuyingPowerAggregator, BuyingPowerResult, Convergence, MarginModel, MarginModelRegistry,
    OrderQuantitySolver,
};
pub use portfolio::{CashBook, CurrencyConverter, Portfolio, PortfolioSnapshot};
pub use securities::{PositionSnapshot, Security, SecurityType};
