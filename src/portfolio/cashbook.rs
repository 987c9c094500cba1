//! Multi-currency cash balances and conversion into the account currency.

use crate::error::{MarginError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Converts amounts in any currency into the account currency.
#[cfg_attr(test, mockall::automock)]
pub trait CurrencyConverter {
    /// Currency all aggregate figures are reported in.
    fn account_currency(&self) -> String;

    /// Value of `amount` units of `currency` in the account currency.
    ///
    /// Fails with [`MarginError::CurrencyMissing`] when no rate is known.
    fn value_in_account_currency(&self, currency: &str, amount: Decimal) -> Result<Decimal>;
}

/// A balance held in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cash {
    pub currency: String,
    pub amount: Decimal,
    /// Units of account currency per unit of this currency, if known
    pub conversion_rate: Option<Decimal>,
}

/// An account-currency amount together with any balances that were left out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Valuation {
    pub value: Decimal,
    pub diagnostics: Vec<MarginError>,
}

/// All cash balances of a portfolio keyed by currency code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashBook {
    account_currency: String,
    balances: BTreeMap<String, Cash>,
}

impl CashBook {
    /// Create an empty book reporting in `account_currency`.
    pub fn new(account_currency: &str) -> Self {
        let mut balances = BTreeMap::new();
        balances.insert(
            account_currency.to_string(),
            Cash {
                currency: account_currency.to_string(),
                amount: Decimal::ZERO,
                conversion_rate: Some(Decimal::ONE),
            },
        );
        Self {
            account_currency: account_currency.to_string(),
            balances,
        }
    }

    /// Change the reporting currency. Existing balances of the new currency get a rate of 1.
    pub fn set_account_currency(&mut self, currency: &str) {
        self.account_currency = currency.to_string();
        self.balances
            .entry(currency.to_string())
            .or_insert_with(|| Cash {
                currency: currency.to_string(),
                amount: Decimal::ZERO,
                conversion_rate: None,
            })
            .conversion_rate = Some(Decimal::ONE);
    }

    /// Set the balance of the account currency.
    pub fn set_account_cash(&mut self, amount: Decimal) {
        let currency = self.account_currency.clone();
        self.set_cash(&currency, amount, Some(Decimal::ONE));
    }

    /// Set the balance and conversion rate of a currency.
    pub fn set_cash(&mut self, currency: &str, amount: Decimal, conversion_rate: Option<Decimal>) {
        let conversion_rate = if currency == self.account_currency {
            Some(Decimal::ONE)
        } else {
            conversion_rate
        };
        self.balances.insert(
            currency.to_string(),
            Cash {
                currency: currency.to_string(),
                amount,
                conversion_rate,
            },
        );
    }

    /// Record a conversion rate without changing the balance.
    pub fn set_conversion_rate(&mut self, currency: &str, rate: Decimal) {
        if currency == self.account_currency {
            return;
        }
        self.balances
            .entry(currency.to_string())
            .or_insert_with(|| Cash {
                currency: currency.to_string(),
                amount: Decimal::ZERO,
                conversion_rate: None,
            })
            .conversion_rate = Some(rate);
    }

    pub fn balances(&self) -> impl Iterator<Item = &Cash> {
        self.balances.values()
    }

    pub fn conversion_rate(&self, currency: &str) -> Option<Decimal> {
        if currency == self.account_currency {
            return Some(Decimal::ONE);
        }
        self.balances.get(currency).and_then(|c| c.conversion_rate)
    }

    /// Sum of every balance in account currency.
    ///
    /// Balances without a rate are excluded and reported as diagnostics.
    pub fn total_value_in_account_currency(&self) -> Result<Valuation> {
        sum_in_account_currency(self.balances(), self)
    }
}

/// Convert and sum `balances`, leaving out those `converter` cannot value.
///
/// A total outside the decimal range is an error rather than a diagnostic.
pub fn sum_in_account_currency<'a>(
    balances: impl IntoIterator<Item = &'a Cash>,
    converter: &dyn CurrencyConverter,
) -> Result<Valuation> {
    let mut value = Decimal::ZERO;
    let mut diagnostics = Vec::new();

    for cash in balances {
        match converter.value_in_account_currency(&cash.currency, cash.amount) {
            Ok(converted) => {
                value = value
                    .checked_add(converted)
                    .ok_or_else(|| MarginError::overflow("cash balance total"))?;
            }
            Err(err @ MarginError::CurrencyMissing { .. }) => {
                warn!(
                    currency = %cash.currency,
                    amount = %cash.amount,
                    error = %err,
                    "Excluding balance from valuation"
                );
                diagnostics.push(err);
            }
            Err(err) => return Err(err),
        }
    }

    Ok(Valuation { value, diagnostics })
}

impl CurrencyConverter for CashBook {
    fn account_currency(&self) -> String {
        self.account_currency.clone()
    }

    fn value_in_account_currency(&self, currency: &str, amount: Decimal) -> Result<Decimal> {
        if amount == Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        let rate = self
            .conversion_rate(currency)
            .ok_or_else(|| MarginError::CurrencyMissing {
                currency: currency.to_string(),
            })?;
        amount
            .checked_mul(rate)
            .ok_or_else(|| MarginError::overflow(currency))
    }
}
