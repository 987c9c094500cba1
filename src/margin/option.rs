//! Margin model for listed options.
//!
//! Long options are charged their full premium. Short (naked) options are
//! charged the premium plus a share of the underlying value, reduced by the
//! out-of-the-money amount but never below a floor share of the underlying:
//!
//! ```text
//! naked  = max(rate * underlying - otm, floor_rate * underlying)
//! margin = |quantity| * multiplier * (price + naked)
//! ```

use super::leverage::LeverageController;
use super::MarginModel;
use crate::config::OptionMarginConfig;
use crate::error::{MarginError, Result};
use crate::securities::PositionSnapshot;
use crate::utils::decimal::{checked_product, checked_sum};
use rust_decimal::Decimal;
use tracing::debug;

/// Option margin model. Options carry no leverage.
#[derive(Debug, Clone)]
pub struct OptionMarginModel {
    config: OptionMarginConfig,
    leverage: LeverageController,
}

impl OptionMarginModel {
    pub fn new(config: OptionMarginConfig) -> Self {
        Self {
            config,
            leverage: LeverageController::unleveraged(),
        }
    }

    /// Premium for `quantity` contracts at the current market price.
    fn premium_margin(&self, snapshot: &PositionSnapshot, quantity: Decimal) -> Result<Decimal> {
        checked_product(&snapshot.symbol, &[quantity.abs(), snapshot.multiplier, snapshot.price])
    }

    /// Naked add-on for the quantity held in `snapshot`.
    fn naked_margin(&self, snapshot: &PositionSnapshot) -> Result<Decimal> {
        let requirement = self.naked_requirement(snapshot)?;
        checked_product(
            &snapshot.symbol,
            &[snapshot.absolute_quantity(), snapshot.multiplier, requirement],
        )
    }

    /// Naked-short charge per unit of underlying exposure.
    fn naked_requirement(&self, snapshot: &PositionSnapshot) -> Result<Decimal> {
        let underlying_price = snapshot
            .underlying_price
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| MarginError::insufficient(&snapshot.symbol, "underlying price"))?;
        let terms = snapshot
            .terms
            .as_ref()
            .ok_or_else(|| MarginError::insufficient(&snapshot.symbol, "option terms"))?;

        let otm = terms.out_of_the_money_amount(underlying_price);
        let base = checked_product(&snapshot.symbol, &[self.config.naked_underlying_rate, underlying_price])?;
        let floor = checked_product(&snapshot.symbol, &[self.config.naked_otm_floor_rate, underlying_price])?;
        let requirement = checked_sum(&snapshot.symbol, &[base, -otm])?
            .max(floor)
            .max(Decimal::ZERO);

        debug!(
            symbol = %snapshot.symbol,
            underlying_price = %underlying_price,
            strike = %terms.strike,
            in_the_money = terms.is_in_the_money(underlying_price),
            otm = %otm,
            requirement = %requirement,
            "Naked option requirement"
        );

        Ok(requirement)
    }
}

impl Default for OptionMarginModel {
    fn default() -> Self {
        Self::new(OptionMarginConfig::default())
    }
}

impl MarginModel for OptionMarginModel {
    fn name(&self) -> &'static str {
        "option"
    }

    fn leverage_controller(&self) -> &LeverageController {
        &self.leverage
    }

    fn maintenance_margin(&self, snapshot: &PositionSnapshot) -> Result<Decimal> {
        if snapshot.quantity == Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }

        let premium = self.premium_margin(snapshot, snapshot.quantity)?;
        if snapshot.is_long() {
            return Ok(premium);
        }

        checked_sum(&snapshot.symbol, &[premium, self.naked_margin(snapshot)?])
    }

    /// Signed margin for holding `quantity` contracts.
    ///
    /// The naked add-on for a short result scales with the quantity held in
    /// the snapshot, not with `quantity`. Going short from a flat position is
    /// therefore charged premium only, while the same short taken from an
    /// existing position carries the full naked charge.
    fn initial_margin_requirement(&self, snapshot: &PositionSnapshot, quantity: Decimal) -> Result<Decimal> {
        if quantity == Decimal::ZERO || snapshot.price == Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }

        let premium = self.premium_margin(snapshot, quantity)?;
        if quantity > Decimal::ZERO {
            return Ok(premium);
        }

        let naked = if snapshot.quantity == Decimal::ZERO {
            Decimal::ZERO
        } else {
            self.naked_margin(snapshot)?
        };

        Ok(-checked_sum(&snapshot.symbol, &[premium, naked])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::securities::{DerivativeTerms, OptionRight, SecurityType};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn snapshot(
        right: OptionRight,
        strike: Decimal,
        price: Decimal,
        underlying_price: Decimal,
        quantity: Decimal,
    ) -> PositionSnapshot {
        PositionSnapshot {
            symbol: "SPY".to_string(),
            security_type: SecurityType::Option,
            quote_currency: "USD".to_string(),
            price,
            underlying_price: Some(underlying_price),
            quantity,
            average_price: price,
            multiplier: dec!(100),
            lot_size: Decimal::ONE,
            leverage: Decimal::ONE,
            terms: Some(DerivativeTerms::new(
                strike,
                right,
                NaiveDate::from_ymd_opt(2016, 2, 19).unwrap(),
            )),
        }
    }

    fn within_cent(actual: Decimal, expected: Decimal) -> bool {
        (actual - expected).abs() <= dec!(0.01)
    }

    #[test]
    fn test_long_calls_and_puts_charge_full_premium() {
        let model = OptionMarginModel::default();

        let put = snapshot(OptionRight::Put, dec!(192), dec!(1.2345), dec!(200), dec!(2));
        let call = snapshot(OptionRight::Call, dec!(192), dec!(1.2345), dec!(200), dec!(2));

        assert_eq!(model.maintenance_margin(&put).unwrap(), put.absolute_holdings_cost().unwrap());
        assert_eq!(model.maintenance_margin(&call).unwrap(), dec!(246.9));
        assert_eq!(model.maintenance_margin(&put).unwrap(), dec!(246.9));
    }

    #[test]
    fn test_short_call_itm() {
        let model = OptionMarginModel::default();
        // 2 * 100 * (14 + 0.2 * 196) = 10640
        let call = snapshot(OptionRight::Call, dec!(192), dec!(14), dec!(196), dec!(-2));
        assert_eq!(model.maintenance_margin(&call).unwrap(), dec!(10640));
    }

    #[test]
    fn test_short_call_otm() {
        let model = OptionMarginModel::default();
        // 2 * 100 * (14 + 0.2 * 180 - (192 - 180)) = 7600
        let call = snapshot(OptionRight::Call, dec!(192), dec!(14), dec!(180), dec!(-2));
        assert!(within_cent(model.maintenance_margin(&call).unwrap(), dec!(7600)));
    }

    #[test]
    fn test_short_put_itm() {
        let model = OptionMarginModel::default();
        // 2 * 100 * (14 + 0.2 * 182) = 10080
        let put = snapshot(OptionRight::Put, dec!(192), dec!(14), dec!(182), dec!(-2));
        assert_eq!(model.maintenance_margin(&put).unwrap(), dec!(10080));
    }

    #[test]
    fn test_short_put_otm() {
        let model = OptionMarginModel::default();
        // 2 * 100 * (14 + 0.2 * 196 - (196 - 192)) = 9840
        let put = snapshot(OptionRight::Put, dec!(192), dec!(14), dec!(196), dec!(-2));
        assert!(within_cent(model.maintenance_margin(&put).unwrap(), dec!(9840)));
    }

    #[test]
    fn test_short_put_far_itm() {
        let model = OptionMarginModel::default();
        // 2 * 100 * (0.18 + 0.2 * 200) = 8036
        let put = snapshot(OptionRight::Put, dec!(207), dec!(0.18), dec!(200), dec!(-2));
        assert!(within_cent(model.maintenance_margin(&put).unwrap(), dec!(8036)));
    }

    #[test]
    fn test_deep_otm_short_is_floored() {
        let model = OptionMarginModel::default();
        // 0.2 * 100 - 60 < 0.1 * 100, so the floor applies: 1 * 100 * (0.05 + 10) = 1005
        let call = snapshot(OptionRight::Call, dec!(160), dec!(0.05), dec!(100), dec!(-1));
        assert_eq!(model.maintenance_margin(&call).unwrap(), dec!(1005));
    }

    #[test]
    fn test_zero_floor_never_goes_negative() {
        let model = OptionMarginModel::new(OptionMarginConfig {
            naked_otm_floor_rate: Decimal::ZERO,
            ..OptionMarginConfig::default()
        });
        let call = snapshot(OptionRight::Call, dec!(160), dec!(0.05), dec!(100), dec!(-1));
        // Naked part clamps to zero, leaving the premium
        assert_eq!(model.maintenance_margin(&call).unwrap(), dec!(5));
    }

    #[test]
    fn test_short_margin_at_least_premium() {
        let model = OptionMarginModel::default();
        for underlying in [dec!(50), dec!(150), dec!(191.99), dec!(192), dec!(192.01), dec!(400)] {
            for right in [OptionRight::Call, OptionRight::Put] {
                let short = snapshot(right, dec!(192), dec!(3.5), underlying, dec!(-3));
                let margin = model.maintenance_margin(&short).unwrap();
                assert!(margin >= short.absolute_holdings_cost().unwrap());
            }
        }
    }

    #[test]
    fn test_continuous_within_otm_region() {
        let model = OptionMarginModel::default();
        let near = snapshot(OptionRight::Call, dec!(192), dec!(14), dec!(185), dec!(-1));
        let nearer = snapshot(OptionRight::Call, dec!(192), dec!(14), dec!(185.01), dec!(-1));
        let delta = model.maintenance_margin(&nearer).unwrap() - model.maintenance_margin(&near).unwrap();
        // d/du of 100 * (0.2u - (K - u)) = 120 per point
        assert_eq!(delta, dec!(1.2));
    }

    #[test]
    fn test_flat_position_has_no_margin() {
        let model = OptionMarginModel::default();
        let flat = snapshot(OptionRight::Call, dec!(192), dec!(14), dec!(196), Decimal::ZERO);
        assert_eq!(model.maintenance_margin(&flat).unwrap(), Decimal::ZERO);
        assert_eq!(model.initial_margin(&flat).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_missing_underlying_is_insufficient_data() {
        let model = OptionMarginModel::default();
        let mut short = snapshot(OptionRight::Call, dec!(192), dec!(14), dec!(196), dec!(-2));
        short.underlying_price = None;

        let err = model.maintenance_margin(&short).unwrap_err();
        assert_eq!(err, MarginError::insufficient("SPY", "underlying price"));

        // Long positions never need the underlying
        short.quantity = dec!(2);
        assert_eq!(model.maintenance_margin(&short).unwrap(), dec!(2800));
    }

    #[test]
    fn test_initial_margin_matches_maintenance() {
        let model = OptionMarginModel::default();
        let short = snapshot(OptionRight::Put, dec!(192), dec!(14), dec!(182), dec!(-2));
        assert_eq!(
            model.initial_margin(&short).unwrap(),
            model.maintenance_margin(&short).unwrap()
        );
    }

    #[test]
    fn test_requirement_scales_naked_part_with_held_quantity() {
        let model = OptionMarginModel::default();

        // Flat: a hypothetical short is charged premium only
        let flat = snapshot(OptionRight::Call, dec!(192), dec!(4.78), dec!(180), Decimal::ZERO);
        assert_eq!(
            model.initial_margin_requirement(&flat, dec!(-31)).unwrap(),
            dec!(-14818)
        );

        // Already short 31: the naked part for 31 contracts is added to any short quantity.
        // naked = max(36 - 12, 18) = 24 -> 31 * 100 * 24 = 74400
        let short = snapshot(OptionRight::Call, dec!(192), dec!(4.78), dec!(180), dec!(-31));
        assert_eq!(
            model.initial_margin_requirement(&short, dec!(-1)).unwrap(),
            dec!(-74878)
        );
        assert_eq!(model.initial_margin_requirement(&short, Decimal::ZERO).unwrap(), Decimal::ZERO);
        assert_eq!(model.initial_margin_requirement(&short, dec!(1)).unwrap(), dec!(478));
    }

    #[test]
    fn test_premium_follows_market_price_not_fill_price() {
        let model = OptionMarginModel::default();
        let mut put = snapshot(OptionRight::Put, dec!(207), dec!(4.68), dec!(192), dec!(-2));
        // ITM put, no OTM reduction: 2 * 100 * (4.68 + 0.2 * 192) = 8616
        assert_eq!(model.maintenance_margin(&put).unwrap(), dec!(8616));

        // 2 * 100 * (0.18 + 0.2 * 200) = 8036; the fill price would give 8936
        put.price = dec!(0.18);
        put.underlying_price = Some(dec!(200));
        let margin = model.maintenance_margin(&put).unwrap();
        assert_eq!(put.average_price, dec!(4.68));
        assert_eq!(margin, dec!(8036));
        assert_ne!(margin, dec!(8936));
    }

    #[test]
    fn test_overflowing_margin_is_an_error() {
        let model = OptionMarginModel::default();

        let long = snapshot(OptionRight::Call, dec!(192), Decimal::MAX, dec!(200), dec!(2));
        let err = model.maintenance_margin(&long).unwrap_err();
        assert!(matches!(err, MarginError::Configuration(_)));

        let short = snapshot(OptionRight::Call, dec!(192), dec!(1), Decimal::MAX, dec!(-2));
        assert!(model.maintenance_margin(&short).is_err());
        assert!(model.initial_margin_requirement(&short, dec!(-1)).is_err());
    }

    #[test]
    fn test_repeated_evaluation_is_identical() {
        let model = OptionMarginModel::default();
        let short = snapshot(OptionRight::Call, dec!(192), dec!(14), dec!(180), dec!(-2));
        let first = model.maintenance_margin(&short).unwrap();
        let second = model.maintenance_margin(&short).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.serialize(), second.serialize());
    }
}
