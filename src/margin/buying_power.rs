//! Portfolio-wide buying power.
//!
//! Buying power is the portfolio value left once every position's
//! maintenance margin and the required free reserve are set aside, all in
//! account currency.

use super::registry::MarginModelRegistry;
use crate::error::{MarginError, Result};
use crate::portfolio::{sum_in_account_currency, CurrencyConverter, PortfolioSnapshot, Valuation};
use crate::securities::OrderDirection;
use crate::utils::decimal::{checked_product, checked_sum};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

/// Buying power available for one security and direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuyingPower {
    pub value: Decimal,
    pub currency: String,
    /// Balances and positions that could not be valued
    pub diagnostics: Vec<MarginError>,
}

/// Sums margin and cash across a portfolio snapshot.
pub struct BuyingPowerAggregator<'a> {
    registry: &'a MarginModelRegistry,
    required_free_buying_power_percent: Decimal,
    converter: Option<&'a dyn CurrencyConverter>,
}

impl<'a> BuyingPowerAggregator<'a> {
    pub fn new(registry: &'a MarginModelRegistry, required_free_buying_power_percent: Decimal) -> Self {
        Self {
            registry,
            required_free_buying_power_percent,
            converter: None,
        }
    }

    /// Convert through `converter` instead of the snapshot's cash book.
    pub fn with_converter(mut self, converter: &'a dyn CurrencyConverter) -> Self {
        self.converter = Some(converter);
        self
    }

    pub(crate) fn converter<'b>(&'b self, portfolio: &'b PortfolioSnapshot) -> &'b dyn CurrencyConverter {
        match self.converter {
            Some(converter) => converter,
            None => &portfolio.cash_book,
        }
    }

    pub(crate) fn required_free_buying_power_percent(&self) -> Decimal {
        self.required_free_buying_power_percent
    }

    /// Cash in every currency plus the value of every position.
    pub fn total_portfolio_value(&self, portfolio: &PortfolioSnapshot) -> Result<Valuation> {
        let converter = self.converter(portfolio);
        let mut valuation = sum_in_account_currency(portfolio.cash_book.balances(), converter)?;

        for position in portfolio.open_positions() {
            match converter.value_in_account_currency(&position.quote_currency, position.holdings_value()?) {
                Ok(value) => valuation.value = checked_sum("portfolio value", &[valuation.value, value])?,
                Err(err @ MarginError::CurrencyMissing { .. }) => {
                    warn!(symbol = %position.symbol, error = %err, "Excluding position from portfolio value");
                    push_unique(&mut valuation.diagnostics, err);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(valuation)
    }

    /// Maintenance margin of every open position.
    ///
    /// Positions whose quote currency cannot be converted are excluded with a
    /// diagnostic; margin model failures are returned.
    pub fn total_margin_used(&self, portfolio: &PortfolioSnapshot) -> Result<Valuation> {
        let converter = self.converter(portfolio);
        let mut valuation = Valuation {
            value: Decimal::ZERO,
            diagnostics: Vec::new(),
        };

        for position in portfolio.open_positions() {
            let margin = self
                .registry
                .model_for(position.security_type)?
                .maintenance_margin(position)?;

            match converter.value_in_account_currency(&position.quote_currency, margin) {
                Ok(value) => valuation.value = checked_sum("margin used", &[valuation.value, value])?,
                Err(err @ MarginError::CurrencyMissing { .. }) => {
                    warn!(symbol = %position.symbol, error = %err, "Excluding position from margin used");
                    push_unique(&mut valuation.diagnostics, err);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(valuation)
    }

    /// Buying power for trading `symbol` in `direction`.
    ///
    /// An order against the held side (selling a long, buying a short) is
    /// credited with the margin the position releases plus the margin of
    /// reopening the same size on the other side.
    pub fn buying_power(
        &self,
        portfolio: &PortfolioSnapshot,
        symbol: &str,
        direction: OrderDirection,
    ) -> Result<BuyingPower> {
        let converter = self.converter(portfolio);
        let position = portfolio.position(symbol)?;

        let portfolio_value = self.total_portfolio_value(portfolio)?;
        let margin_used = self.total_margin_used(portfolio)?;
        let mut remaining = checked_sum("buying power", &[portfolio_value.value, -margin_used.value])?;

        let reversing = matches!(
            (direction, position.is_long(), position.is_short()),
            (OrderDirection::Sell, true, _) | (OrderDirection::Buy, _, true)
        );
        if reversing {
            let model = self.registry.model_for(position.security_type)?;
            let released = checked_sum(
                &position.symbol,
                &[
                    model.maintenance_margin(position)?,
                    model
                        .initial_margin_requirement(position, position.absolute_quantity())?
                        .abs(),
                ],
            )?;
            let credit = converter.value_in_account_currency(&position.quote_currency, released)?;
            remaining = checked_sum("buying power", &[remaining, credit])?;
        }

        let reserve = checked_product(
            "free buying power reserve",
            &[portfolio_value.value, self.required_free_buying_power_percent],
        )?;
        let value = checked_sum("buying power", &[remaining, -reserve])?.max(Decimal::ZERO);

        let mut diagnostics = portfolio_value.diagnostics;
        for err in margin_used.diagnostics {
            push_unique(&mut diagnostics, err);
        }

        debug!(
            symbol = %symbol,
            direction = ?direction,
            portfolio_value = %portfolio_value.value,
            margin_used = %margin_used.value,
            reversing,
            buying_power = %value,
            "Buying power"
        );

        Ok(BuyingPower {
            value,
            currency: converter.account_currency(),
            diagnostics,
        })
    }
}

fn push_unique(diagnostics: &mut Vec<MarginError>, err: MarginError) {
    if !diagnostics.contains(&err) {
        diagnostics.push(err);
    }
}
