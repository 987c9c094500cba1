//! Leverage-based margin model for equities and futures.
//!
//! The margin requirement is the position value divided by the security's
//! leverage, for both initial and maintenance purposes.

use super::leverage::LeverageController;
use super::MarginModel;
use crate::error::{MarginError, Result};
use crate::securities::PositionSnapshot;
use crate::utils::decimal::checked_product;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct LeveragedMarginModel {
    leverage: LeverageController,
}

impl LeveragedMarginModel {
    pub fn new(max_leverage: Option<Decimal>) -> Self {
        Self {
            leverage: LeverageController::adjustable(max_leverage),
        }
    }

    fn requirement_rate(snapshot: &PositionSnapshot) -> Result<Decimal> {
        if snapshot.leverage <= Decimal::ZERO {
            return Err(MarginError::Configuration(format!(
                "{} has non-positive leverage {}",
                snapshot.symbol, snapshot.leverage
            )));
        }
        Decimal::ONE
            .checked_div(snapshot.leverage)
            .ok_or_else(|| MarginError::overflow(&snapshot.symbol))
    }
}

impl Default for LeveragedMarginModel {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MarginModel for LeveragedMarginModel {
    fn name(&self) -> &'static str {
        "leveraged"
    }

    fn leverage_controller(&self) -> &LeverageController {
        &self.leverage
    }

    fn maintenance_margin(&self, snapshot: &PositionSnapshot) -> Result<Decimal> {
        if snapshot.quantity == Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        let rate = Self::requirement_rate(snapshot)?;
        checked_product(&snapshot.symbol, &[snapshot.absolute_holdings_cost()?, rate])
    }

    fn initial_margin_requirement(&self, snapshot: &PositionSnapshot, quantity: Decimal) -> Result<Decimal> {
        if quantity == Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        let rate = Self::requirement_rate(snapshot)?;
        checked_product(&snapshot.symbol, &[quantity, snapshot.price, snapshot.multiplier, rate])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::securities::Security;
    use rust_decimal_macros::dec;

    fn spy(quantity: Decimal, leverage: Decimal) -> PositionSnapshot {
        let mut equity = Security::equity("SPY", "USD");
        equity.set_market_price(dec!(400));
        equity.set_holdings(dec!(390), quantity);
        let mut snapshot = equity.snapshot();
        snapshot.leverage = leverage;
        snapshot
    }

    #[test]
    fn test_margin_scales_with_leverage() {
        let model = LeveragedMarginModel::default();
        assert_eq!(model.maintenance_margin(&spy(dec!(10), dec!(1))).unwrap(), dec!(4000));
        assert_eq!(model.maintenance_margin(&spy(dec!(10), dec!(2))).unwrap(), dec!(2000));
        assert_eq!(model.maintenance_margin(&spy(dec!(-10), dec!(4))).unwrap(), dec!(1000));
    }

    #[test]
    fn test_requirement_is_signed_and_linear() {
        let model = LeveragedMarginModel::default();
        let snapshot = spy(Decimal::ZERO, dec!(2));
        assert_eq!(model.initial_margin_requirement(&snapshot, dec!(5)).unwrap(), dec!(1000));
        assert_eq!(model.initial_margin_requirement(&snapshot, dec!(-5)).unwrap(), dec!(-1000));
    }

    #[test]
    fn test_leverage_can_be_changed_through_model() {
        let model = LeveragedMarginModel::new(Some(dec!(4)));
        let mut equity = Security::equity("SPY", "USD");

        model.set_leverage(&mut equity, dec!(4)).unwrap();
        assert_eq!(model.get_leverage(&equity), dec!(4));
        assert!(model.set_leverage(&mut equity, dec!(5)).is_err());
    }

    #[test]
    fn test_overflowing_requirement_is_an_error() {
        let model = LeveragedMarginModel::default();
        let snapshot = spy(dec!(10), dec!(1));
        let err = model.initial_margin_requirement(&snapshot, Decimal::MAX).unwrap_err();
        assert!(matches!(err, MarginError::Configuration(_)));
    }

    #[test]
    fn test_non_positive_leverage_in_snapshot_is_rejected() {
        let model = LeveragedMarginModel::default();
        let err = model.maintenance_margin(&spy(dec!(1), Decimal::ZERO)).unwrap_err();
        assert!(matches!(err, MarginError::Configuration(_)));
    }
}
