//! JSON scenario files evaluated by the command-line front end.
//!
//! A scenario describes cash balances and securities with their prices and
//! holdings:
//!
//! ```json
//! {
//!   "account_currency": "USD",
//!   "cash": [{ "currency": "USD", "amount": "1014678.5" }],
//!   "securities": [{
//!     "symbol": "SPY 211119C00410000",
//!     "type": "option",
//!     "price": "4.78",
//!     "underlying": { "symbol": "SPY", "price": "395.51" },
//!     "terms": { "strike": "410", "right": "call", "expiry": "2021-11-19" },
//!     "quantity": "-31",
//!     "average_price": "4.74"
//!   }]
//! }
//! ```

use crate::margin::MarginModelRegistry;
use crate::portfolio::Portfolio;
use crate::securities::{DerivativeTerms, Security, SecurityType, SymbolProperties};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Largest magnitude (1e12) accepted for any price, quantity, amount or rate.
///
/// Products of several such values stay far inside the decimal range.
const MAX_MAGNITUDE: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

fn ensure_in_range(value: Decimal, field: &str, owner: &str) -> Result<()> {
    anyhow::ensure!(
        value.abs() <= MAX_MAGNITUDE,
        "{field} of {owner} is {value}, beyond the supported magnitude of {MAX_MAGNITUDE}"
    );
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Overrides the configured account currency
    #[serde(default)]
    pub account_currency: Option<String>,
    #[serde(default)]
    pub cash: Vec<CashEntry>,
    #[serde(default)]
    pub securities: Vec<SecurityEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CashEntry {
    pub currency: String,
    pub amount: Decimal,
    /// Units of account currency per unit; implied 1 for the account currency
    #[serde(default)]
    pub conversion_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnderlyingEntry {
    pub symbol: String,
    #[serde(default)]
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityEntry {
    pub symbol: String,
    #[serde(rename = "type")]
    pub security_type: SecurityType,
    #[serde(default = "default_quote_currency")]
    pub quote_currency: String,
    pub price: Decimal,
    #[serde(default)]
    pub underlying: Option<UnderlyingEntry>,
    #[serde(default)]
    pub terms: Option<DerivativeTerms>,
    /// Contract multiplier; 100 for options and 1 otherwise when omitted
    #[serde(default)]
    pub multiplier: Option<Decimal>,
    #[serde(default)]
    pub lot_size: Option<Decimal>,
    #[serde(default)]
    pub quantity: Decimal,
    #[serde(default)]
    pub average_price: Option<Decimal>,
    #[serde(default)]
    pub leverage: Option<Decimal>,
}

fn default_quote_currency() -> String {
    "USD".to_string()
}

impl Scenario {
    /// Read and parse a scenario file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))
    }

    /// Build the portfolio described by the scenario.
    ///
    /// Leverage overrides go through `registry`, so instruments with fixed
    /// leverage reject them.
    pub fn build_portfolio(&self, default_currency: &str, registry: &MarginModelRegistry) -> Result<Portfolio> {
        let account_currency = self.account_currency.as_deref().unwrap_or(default_currency);
        let mut portfolio = Portfolio::new(account_currency);

        for cash in &self.cash {
            ensure_in_range(cash.amount, "Cash amount", &cash.currency)?;
            if let Some(rate) = cash.conversion_rate {
                ensure_in_range(rate, "Conversion rate", &cash.currency)?;
            }
            portfolio
                .cash_book_mut()
                .set_cash(&cash.currency, cash.amount, cash.conversion_rate);
        }

        for entry in &self.securities {
            let mut security = entry.to_security()?;
            if let Some(leverage) = entry.leverage {
                registry
                    .set_leverage(&mut security, leverage)
                    .with_context(|| format!("Invalid leverage for {}", entry.symbol))?;
            }
            debug!(symbol = %entry.symbol, security_type = %entry.security_type, "Loaded security");
            portfolio.add_security(security);
        }

        Ok(portfolio)
    }
}

impl SecurityEntry {
    fn to_security(&self) -> Result<Security> {
        self.check_ranges()?;

        let mut properties = match self.security_type {
            SecurityType::Option => SymbolProperties::for_option(&self.quote_currency),
            SecurityType::Equity | SecurityType::Future => SymbolProperties::for_equity(&self.quote_currency),
        };
        if let Some(multiplier) = self.multiplier {
            properties = properties.with_multiplier(multiplier);
        }
        if let Some(lot_size) = self.lot_size {
            properties = properties.with_lot_size(lot_size);
        }

        let underlying_symbol = self.underlying.as_ref().map(|u| u.symbol.as_str());
        let mut security = match self.security_type {
            SecurityType::Equity => Security::equity(&self.symbol, &self.quote_currency).with_properties(properties),
            SecurityType::Option => {
                let terms = self
                    .terms
                    .with_context(|| format!("Option {} has no terms", self.symbol))?;
                let underlying = underlying_symbol
                    .with_context(|| format!("Option {} has no underlying", self.symbol))?;
                Security::option(&self.symbol, underlying, terms, properties)
            }
            SecurityType::Future => {
                let underlying = underlying_symbol.unwrap_or(&self.symbol);
                Security::future(&self.symbol, underlying, properties)
            }
        };

        security.set_market_price(self.price);
        if let Some(price) = self.underlying.as_ref().and_then(|u| u.price) {
            security.set_underlying_price(price);
        }
        security.set_holdings(self.average_price.unwrap_or(self.price), self.quantity);

        Ok(security)
    }

    fn check_ranges(&self) -> Result<()> {
        let optional = [
            ("Underlying price", self.underlying.as_ref().and_then(|u| u.price)),
            ("Multiplier", self.multiplier),
            ("Lot size", self.lot_size),
            ("Average price", self.average_price),
            ("Leverage", self.leverage),
        ];
        ensure_in_range(self.price, "Price", &self.symbol)?;
        ensure_in_range(self.quantity, "Quantity", &self.symbol)?;
        for (field, value) in optional {
            if let Some(value) = value {
                ensure_in_range(value, field, &self.symbol)?;
            }
        }
        if let Some(terms) = &self.terms {
            ensure_in_range(terms.strike, "Strike", &self.symbol)?;
        }
        Ok(())
    }
}
