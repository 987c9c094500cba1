//! Portfolio state: cash book plus the securities it holds.
//!
//! [`Portfolio`] is the live, mutable view. [`PortfolioSnapshot`] is the
//! frozen copy every buying-power computation runs against.

mod cashbook;

pub use cashbook::{sum_in_account_currency, Cash, CashBook, CurrencyConverter, Valuation};

#[cfg(test)]
pub use cashbook::MockCurrencyConverter;

use crate::error::{MarginError, Result};
use crate::securities::{PositionSnapshot, Security};
use rust_decimal::Decimal;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Cash and securities of one trading account.
#[derive(Debug, Clone)]
pub struct Portfolio {
    cash_book: CashBook,
    securities: BTreeMap<String, Security>,
}

impl Portfolio {
    pub fn new(account_currency: &str) -> Self {
        Self {
            cash_book: CashBook::new(account_currency),
            securities: BTreeMap::new(),
        }
    }

    pub fn cash_book_mut(&mut self) -> &mut CashBook {
        &mut self.cash_book
    }

    /// Set the account-currency cash balance.
    pub fn set_cash(&mut self, amount: Decimal) {
        self.cash_book.set_account_cash(amount);
    }

    /// Register a security, replacing any previous one with the same symbol.
    pub fn add_security(&mut self, security: Security) -> &mut Security {
        match self.securities.entry(security.symbol().to_string()) {
            Entry::Occupied(mut entry) => {
                entry.insert(security);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(security),
        }
    }

    pub fn security(&self, symbol: &str) -> Result<&Security> {
        self.securities
            .get(symbol)
            .ok_or_else(|| MarginError::UnknownSecurity(symbol.to_string()))
    }

    pub fn security_mut(&mut self, symbol: &str) -> Result<&mut Security> {
        self.securities
            .get_mut(symbol)
            .ok_or_else(|| MarginError::UnknownSecurity(symbol.to_string()))
    }

    /// Capture cash and every position in one step.
    pub fn snapshot(&self) -> PortfolioSnapshot {
        PortfolioSnapshot {
            cash_book: self.cash_book.clone(),
            positions: self
                .securities
                .iter()
                .map(|(symbol, security)| (symbol.clone(), security.snapshot()))
                .collect(),
        }
    }
}

/// Frozen view of a portfolio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortfolioSnapshot {
    pub cash_book: CashBook,
    pub positions: BTreeMap<String, PositionSnapshot>,
}

impl PortfolioSnapshot {
    pub fn account_currency(&self) -> String {
        self.cash_book.account_currency()
    }

    pub fn position(&self, symbol: &str) -> Result<&PositionSnapshot> {
        self.positions
            .get(symbol)
            .ok_or_else(|| MarginError::UnknownSecurity(symbol.to_string()))
    }

    /// Positions with a non-zero quantity.
    pub fn open_positions(&self) -> impl Iterator<Item = &PositionSnapshot> {
        self.positions
            .values()
            .filter(|p| p.quantity != Decimal::ZERO)
    }
}
