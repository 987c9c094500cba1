//! Fee models consulted when sizing orders.
//!
//! Fees are quoted in the order's quote currency; the solver converts them to
//! the account currency before netting them against portfolio value.

use crate::config::FeeConfig;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An order the solver is considering, priced at the current market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedOrder {
    pub symbol: String,
    /// Signed quantity (positive = buy)
    pub quantity: Decimal,
    pub price: Decimal,
    pub multiplier: Decimal,
    pub quote_currency: String,
}

impl ProposedOrder {
    /// |quantity| * price * multiplier
    pub fn notional(&self) -> Decimal {
        self.quantity.abs() * self.price * self.multiplier
    }
}

/// A fee amount and the currency it is charged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFee {
    pub amount: Decimal,
    pub currency: String,
}

/// Estimates the fee an order would incur.
#[cfg_attr(test, mockall::automock)]
pub trait FeeModel: Send + Sync {
    fn estimate_fee(&self, order: &ProposedOrder) -> Result<OrderFee>;
}

/// Charges the same amount for every order.
#[derive(Debug, Clone)]
pub struct ConstantFeeModel {
    fee: Decimal,
}

impl ConstantFeeModel {
    pub fn new(fee: Decimal) -> Self {
        Self { fee }
    }

    pub fn zero() -> Self {
        Self::new(Decimal::ZERO)
    }
}

impl FeeModel for ConstantFeeModel {
    fn estimate_fee(&self, order: &ProposedOrder) -> Result<OrderFee> {
        Ok(OrderFee {
            amount: self.fee,
            currency: order.quote_currency.clone(),
        })
    }
}

/// Charges a share of order notional plus an optional flat component.
#[derive(Debug, Clone)]
pub struct NotionalFeeModel {
    rate: Decimal,
    flat: Decimal,
}

impl NotionalFeeModel {
    pub fn new(rate: Decimal, flat: Decimal) -> Self {
        Self { rate, flat }
    }
}

impl FeeModel for NotionalFeeModel {
    fn estimate_fee(&self, order: &ProposedOrder) -> Result<OrderFee> {
        let amount = if order.quantity == Decimal::ZERO {
            Decimal::ZERO
        } else {
            order.notional() * self.rate + self.flat
        };
        Ok(OrderFee {
            amount,
            currency: order.quote_currency.clone(),
        })
    }
}

/// Build the fee model described by configuration.
pub fn from_config(config: &FeeConfig) -> Box<dyn FeeModel> {
    if config.notional_rate > Decimal::ZERO {
        Box::new(NotionalFeeModel::new(config.notional_rate, config.flat_fee))
    } else {
        Box::new(ConstantFeeModel::new(config.flat_fee))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(quantity: Decimal) -> ProposedOrder {
        ProposedOrder {
            symbol: "SPY".to_string(),
            quantity,
            price: dec!(4.78),
            multiplier: dec!(100),
            quote_currency: "USD".to_string(),
        }
    }

    #[test]
    fn test_constant_fee() {
        let fee = ConstantFeeModel::new(dec!(1.5)).estimate_fee(&order(dec!(-10))).unwrap();
        assert_eq!(fee.amount, dec!(1.5));
        assert_eq!(fee.currency, "USD");
    }

    #[test]
    fn test_notional_fee() {
        // 10 * 4.78 * 100 = 4780 notional; 4780 * 0.0004 = 1.912
        let model = NotionalFeeModel::new(dec!(0.0004), Decimal::ZERO);
        let fee = model.estimate_fee(&order(dec!(-10))).unwrap();
        assert_eq!(fee.amount, dec!(1.912));
    }

    #[test]
    fn test_notional_fee_empty_order_is_free() {
        let model = NotionalFeeModel::new(dec!(0.0004), dec!(1));
        assert_eq!(model.estimate_fee(&order(Decimal::ZERO)).unwrap().amount, Decimal::ZERO);
    }

    #[test]
    fn test_from_config_picks_notional_when_rate_set() {
        let config = FeeConfig {
            flat_fee: dec!(1),
            notional_rate: dec!(0.001),
        };
        let fee = from_config(&config).estimate_fee(&order(dec!(1))).unwrap();
        // 478 * 0.001 + 1
        assert_eq!(fee.amount, dec!(1.478));

        let flat_only = from_config(&FeeConfig::default());
        assert_eq!(flat_only.estimate_fee(&order(dec!(1))).unwrap().amount, Decimal::ZERO);
    }
}
