//! Order sizing for a target buying-power utilization.
//!
//! Given a signed target fraction of portfolio value, the solver finds the
//! order quantity whose resulting margin lands on or just inside the target,
//! net of the order's own fees. Quantities are searched by bisection over the
//! lot grid, bounded by an evaluation budget; when it runs out the largest
//! candidate found that still fits is returned flagged approximate.

use super::buying_power::BuyingPowerAggregator;
use super::registry::MarginModelRegistry;
use super::MarginModel;
use crate::config::SolverConfig;
use crate::error::{MarginError, Result};
use crate::fees::{FeeModel, ProposedOrder};
use crate::portfolio::{CurrencyConverter, PortfolioSnapshot};
use crate::securities::{OrderDirection, PositionSnapshot};
use crate::utils::decimal::{checked_product, checked_sum, round_to_lot, LotRounding};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Convergence {
    /// The quantity meets the target within tolerance
    Exact,
    /// The budget ran out; the quantity fits the reported amount but may not be the largest
    Approximate,
}

/// Outcome of a target sizing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuyingPowerResult {
    /// Signed order quantity (positive = buy)
    pub quantity: Decimal,
    /// Signed target margin the quantity was solved against
    pub amount: Decimal,
    pub currency: String,
    pub convergence: Convergence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub diagnostics: Vec<MarginError>,
}

impl BuyingPowerResult {
    pub fn is_exact(&self) -> bool {
        self.convergence == Convergence::Exact
    }

    fn exact(quantity: Decimal, amount: Decimal, currency: &str) -> Self {
        Self {
            quantity,
            amount,
            currency: currency.to_string(),
            convergence: Convergence::Exact,
            reason: None,
            diagnostics: Vec::new(),
        }
    }

    fn no_order(amount: Decimal, currency: &str, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::exact(Decimal::ZERO, amount, currency)
        }
    }

    fn approximate(quantity: Decimal, amount: Decimal, currency: &str, iterations: u32) -> Self {
        Self {
            convergence: Convergence::Approximate,
            reason: Some(format!(
                "Target margin {amount} not reached after {iterations} iterations"
            )),
            diagnostics: vec![MarginError::NumericNonConvergence { iterations }],
            ..Self::exact(quantity, amount, currency)
        }
    }

    fn with_diagnostics(mut self, diagnostics: Vec<MarginError>) -> Self {
        for err in diagnostics {
            if !self.diagnostics.contains(&err) {
                self.diagnostics.push(err);
            }
        }
        self
    }
}

/// Searches for the order quantity that reaches a target margin.
pub struct OrderQuantitySolver<'a> {
    aggregator: BuyingPowerAggregator<'a>,
    registry: &'a MarginModelRegistry,
    fee_model: &'a dyn FeeModel,
    config: SolverConfig,
}

/// One security's margin as a function of the quantity held after the order.
struct MarginCurve<'s> {
    model: &'s dyn MarginModel,
    position: &'s PositionSnapshot,
    rate: Decimal,
}

impl MarginCurve<'_> {
    /// Signed account-currency margin of holding `quantity`.
    fn at(&self, quantity: Decimal) -> Result<Decimal> {
        let margin = self.model.initial_margin_requirement(self.position, quantity)?;
        checked_product(&self.position.symbol, &[margin, self.rate])
    }

    /// Whether holding `quantity` stays within `target` in absolute terms.
    fn fits(&self, quantity: Decimal, target: Decimal) -> Result<bool> {
        Ok(self.at(quantity)?.abs() <= target.abs())
    }
}

/// Outcome of one lot search against a fixed target.
enum LotSearch {
    /// Largest fitting order on the lot grid
    Found(Decimal),
    /// Budget ran out; the order fits but may not be the largest
    Capped(Decimal),
    /// Not even the smallest-exposure candidate fits
    NoFit,
}

impl<'a> OrderQuantitySolver<'a> {
    pub fn new(
        registry: &'a MarginModelRegistry,
        fee_model: &'a dyn FeeModel,
        config: SolverConfig,
        required_free_buying_power_percent: Decimal,
    ) -> Self {
        Self {
            aggregator: BuyingPowerAggregator::new(registry, required_free_buying_power_percent),
            registry,
            fee_model,
            config,
        }
    }

    /// Convert through `converter` instead of the snapshot's cash book.
    pub fn with_converter(mut self, converter: &'a dyn CurrencyConverter) -> Self {
        self.aggregator = self.aggregator.with_converter(converter);
        self
    }

    /// Signed order quantity that brings `symbol` to `target_fraction` of
    /// portfolio value in margin terms.
    ///
    /// A negative fraction targets a short position. Orders whose margin
    /// change is below `minimum_order_margin_fraction` of portfolio value are
    /// not placed. The returned quantity never carries margin beyond the
    /// amount it reports, approximate or not.
    pub fn maximum_order_quantity_for_target_buying_power(
        &self,
        portfolio: &PortfolioSnapshot,
        symbol: &str,
        target_fraction: Decimal,
        minimum_order_margin_fraction: Decimal,
    ) -> Result<BuyingPowerResult> {
        let converter = self.aggregator.converter(portfolio);
        let currency = converter.account_currency();
        let position = portfolio.position(symbol)?;
        let held = position.quantity;

        let valuation = self.aggregator.total_portfolio_value(portfolio)?;
        let diagnostics = valuation.diagnostics;
        let portfolio_value = valuation.value;
        let free_reserve = checked_product(
            "free buying power reserve",
            &[portfolio_value, self.aggregator.required_free_buying_power_percent()],
        )?;
        let target_for = |fee: Decimal| -> Result<Decimal> {
            let base = checked_sum("target margin", &[portfolio_value, -fee, -free_reserve])?;
            checked_product("target margin", &[target_fraction, base])
        };
        let mut target = target_for(Decimal::ZERO)?;

        if target == Decimal::ZERO {
            let closing = -held;
            info!(symbol = %symbol, quantity = %closing, "Zero target, closing position");
            return Ok(BuyingPowerResult::exact(closing, Decimal::ZERO, &currency).with_diagnostics(diagnostics));
        }

        if position.price == Decimal::ZERO {
            return Ok(
                BuyingPowerResult::no_order(target, &currency, format!("The price of {symbol} is zero"))
                    .with_diagnostics(diagnostics),
            );
        }

        if portfolio_value <= Decimal::ZERO {
            return Ok(BuyingPowerResult::no_order(target, &currency, "The portfolio has no value")
                .with_diagnostics(diagnostics));
        }

        let curve = MarginCurve {
            model: self.registry.model_for(position.security_type)?,
            position,
            rate: converter.value_in_account_currency(&position.quote_currency, Decimal::ONE)?,
        };

        let current_margin = curve.at(held)?;
        let unit_margin = curve.at(Decimal::ONE)?.abs();
        if unit_margin == Decimal::ZERO {
            return Ok(BuyingPowerResult::no_order(
                target,
                &currency,
                format!("The margin of one unit of {symbol} is zero"),
            )
            .with_diagnostics(diagnostics));
        }

        let margin_change = checked_sum("margin change", &[target, -current_margin])?;
        if margin_change.abs() <= self.config.margin_tolerance {
            debug!(symbol = %symbol, target = %target, current = %current_margin, "Target already met");
            return Ok(BuyingPowerResult::no_order(target, &currency, "The target is already met")
                .with_diagnostics(diagnostics));
        }

        if minimum_order_margin_fraction > Decimal::ZERO
            && margin_change.abs() < checked_product("minimum order margin", &[minimum_order_margin_fraction, portfolio_value])?
        {
            return Ok(BuyingPowerResult::no_order(
                target,
                &currency,
                format!(
                    "Margin change {} is below the minimum of {} of portfolio value",
                    margin_change.abs(),
                    minimum_order_margin_fraction
                ),
            )
            .with_diagnostics(diagnostics));
        }

        let direction = OrderDirection::from_quantity(margin_change);
        let buying_power = self.aggregator.buying_power(portfolio, symbol, direction)?;
        if buying_power.value == Decimal::ZERO {
            return Ok(BuyingPowerResult::no_order(
                target,
                &currency,
                format!("No buying power left to {direction:?} {symbol}"),
            )
            .with_diagnostics(diagnostics));
        }

        let lot_size = if position.lot_size > Decimal::ZERO {
            position.lot_size
        } else {
            Decimal::ONE
        };

        let mut iterations = 0u32;

        loop {
            let quantity = match self.search_lots(&curve, held, target, unit_margin, lot_size, &mut iterations)? {
                LotSearch::Found(quantity) => quantity,
                LotSearch::Capped(quantity) => {
                    warn!(symbol = %symbol, iterations, quantity = %quantity, "Order search did not converge");
                    return Ok(BuyingPowerResult::approximate(quantity, target, &currency, iterations)
                        .with_diagnostics(diagnostics));
                }
                LotSearch::NoFit => {
                    return Ok(BuyingPowerResult::no_order(
                        target,
                        &currency,
                        format!("No quantity of {symbol} fits the target margin"),
                    )
                    .with_diagnostics(diagnostics));
                }
            };

            if quantity == Decimal::ZERO {
                return Ok(BuyingPowerResult::no_order(
                    target,
                    &currency,
                    format!("The order quantity for {symbol} rounds to zero"),
                )
                .with_diagnostics(diagnostics));
            }

            let fee = self.fee_model.estimate_fee(&ProposedOrder {
                symbol: symbol.to_string(),
                quantity,
                price: position.price,
                multiplier: position.multiplier,
                quote_currency: position.quote_currency.clone(),
            })?;
            let fee = converter.value_in_account_currency(&fee.currency, fee.amount)?;
            let net_target = target_for(fee)?;
            iterations += 1;

            debug!(
                symbol = %symbol,
                quantity = %quantity,
                fee = %fee,
                target = %net_target,
                "Order candidate"
            );

            if curve.fits(checked_sum(symbol, &[quantity, held])?, net_target)? {
                info!(symbol = %symbol, quantity = %quantity, target = %net_target, "Order sized");
                return Ok(BuyingPowerResult::exact(quantity, net_target, &currency).with_diagnostics(diagnostics));
            }

            // Each new candidate fits the previous target, so the fee loop
            // cannot revisit a quantity. Only the budget ends it.
            if iterations >= self.config.max_iterations {
                warn!(symbol = %symbol, iterations, quantity = %quantity, "Fees not netted within budget");
                let mut result = BuyingPowerResult::approximate(quantity, target, &currency, iterations);
                result.reason = Some(format!(
                    "Fees of {fee} not fully netted after {iterations} iterations; sized against {target}"
                ));
                return Ok(result.with_diagnostics(diagnostics));
            }

            target = net_target;
        }
    }

    /// Largest order on the lot grid whose resulting margin fits `target`.
    ///
    /// Starts from the linear estimate rounded toward less exposure, then
    /// bisects over the lots between it and the flat position. Every margin
    /// evaluation counts against the budget; the two bracket evaluations are
    /// always made so a fitting answer exists whenever one is possible.
    fn search_lots(
        &self,
        curve: &MarginCurve<'_>,
        held: Decimal,
        target: Decimal,
        unit_margin: Decimal,
        lot_size: Decimal,
        iterations: &mut u32,
    ) -> Result<LotSearch> {
        let symbol = &curve.position.symbol;
        let (rounding, step) = if target < Decimal::ZERO {
            (LotRounding::TowardPositive, lot_size)
        } else {
            (LotRounding::TowardNegative, -lot_size)
        };

        let per_unit = target
            .checked_div(unit_margin)
            .ok_or_else(|| MarginError::overflow(symbol))?;
        let start = round_to_lot(checked_sum(symbol, &[-held, per_unit])?, lot_size, rounding)?;
        let start_holding = checked_sum(symbol, &[start, held])?;

        // Lots between the estimate and a flat position
        let distance = if target < Decimal::ZERO {
            -start_holding
        } else {
            start_holding
        };
        let max_lots = distance
            .max(Decimal::ZERO)
            .checked_div(lot_size)
            .ok_or_else(|| MarginError::overflow(symbol))?
            .ceil();

        let candidate = |lots: Decimal| -> Result<Decimal> {
            checked_sum(symbol, &[start, checked_product(symbol, &[lots, step])?])
        };
        let fits = |lots: Decimal, iterations: &mut u32| -> Result<bool> {
            *iterations += 1;
            curve.fits(checked_sum(symbol, &[candidate(lots)?, held])?, target)
        };

        if fits(Decimal::ZERO, &mut *iterations)? {
            return Ok(LotSearch::Found(start));
        }
        if !fits(max_lots, &mut *iterations)? {
            return Ok(LotSearch::NoFit);
        }

        // Invariant: `low` lots back does not fit, `high` lots back does
        let mut low = Decimal::ZERO;
        let mut high = max_lots;
        while high - low > Decimal::ONE {
            if *iterations >= self.config.max_iterations {
                return Ok(LotSearch::Capped(candidate(high)?));
            }
            let middle = ((low + high) / Decimal::TWO).floor();
            if fits(middle, &mut *iterations)? {
                high = middle;
            } else {
                low = middle;
            }
        }

        Ok(LotSearch::Found(candidate(high)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptionMarginConfig;
    use crate::fees::{ConstantFeeModel, MockFeeModel, OrderFee};
    use crate::portfolio::Portfolio;
    use crate::securities::{DerivativeTerms, OptionRight, Security, SecurityType, SymbolProperties};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    const CALL: &str = "SPY 211119C00410000";

    fn call_portfolio(held: Decimal) -> Portfolio {
        call_portfolio_with_cash(dec!(1014678.500), held)
    }

    fn call_portfolio_with_cash(cash: Decimal, held: Decimal) -> Portfolio {
        let mut portfolio = Portfolio::new("USD");
        portfolio.set_cash(cash);
        let call = portfolio.add_security(Security::option(
            CALL,
            "SPY",
            DerivativeTerms::new(
                dec!(410),
                OptionRight::Call,
                NaiveDate::from_ymd_opt(2021, 11, 19).unwrap(),
            ),
            SymbolProperties::for_option("USD"),
        ));
        call.set_market_price(dec!(4.78));
        call.set_underlying_price(dec!(395.51));
        call.set_holdings(dec!(4.74), held);
        portfolio
    }

    fn spy_portfolio() -> Portfolio {
        let mut portfolio = Portfolio::new("USD");
        portfolio.set_cash(dec!(100000));
        portfolio
            .add_security(Security::equity("SPY", "USD"))
            .set_market_price(dec!(400));
        portfolio
    }

    fn solve(
        registry: &MarginModelRegistry,
        fee_model: &dyn FeeModel,
        config: SolverConfig,
        portfolio: &Portfolio,
        symbol: &str,
        target: Decimal,
    ) -> BuyingPowerResult {
        OrderQuantitySolver::new(registry, fee_model, config, Decimal::ZERO)
            .maximum_order_quantity_for_target_buying_power(&portfolio.snapshot(), symbol, target, Decimal::ZERO)
            .unwrap()
    }

    #[test]
    fn test_short_target_depends_on_starting_position() {
        let registry = MarginModelRegistry::with_defaults(OptionMarginConfig::default());
        let fees = ConstantFeeModel::zero();
        let target = dec!(-0.0149624947680201388093639063);

        for (held, expected) in [(dec!(-31), dec!(31)), (dec!(0), dec!(-31)), (dec!(31), dec!(-31))] {
            let result = solve(&registry, &fees, SolverConfig::default(), &call_portfolio(held), CALL, target);
            assert_eq!(result.quantity, expected, "starting from {held}");
            assert!(result.is_exact());
        }
    }

    #[test]
    fn test_target_equal_to_current_exposure_places_no_order() {
        let registry = MarginModelRegistry::with_defaults(OptionMarginConfig::default());
        let fees = ConstantFeeModel::zero();
        let portfolio = call_portfolio(dec!(-31));

        // value 1014678.5 - 14818, margin of -31 contracts 215115.2
        let target = dec!(-215115.2) / dec!(999860.5);
        let result = solve(&registry, &fees, SolverConfig::default(), &portfolio, CALL, target);

        assert_eq!(result.quantity, Decimal::ZERO);
        assert!(result.is_exact());
        assert!(result.reason.is_some());
    }

    #[test]
    fn test_zero_target_closes_position() {
        let registry = MarginModelRegistry::with_defaults(OptionMarginConfig::default());
        let fees = ConstantFeeModel::zero();
        let result = solve(
            &registry,
            &fees,
            SolverConfig::default(),
            &call_portfolio(dec!(-31)),
            CALL,
            Decimal::ZERO,
        );
        assert_eq!(result.quantity, dec!(31));
        assert!(result.is_exact());
    }

    #[test]
    fn test_zero_price_places_no_order() {
        let registry = MarginModelRegistry::with_defaults(OptionMarginConfig::default());
        let fees = ConstantFeeModel::zero();
        let mut portfolio = spy_portfolio();
        portfolio.security_mut("SPY").unwrap().set_market_price(Decimal::ZERO);

        let result = solve(&registry, &fees, SolverConfig::default(), &portfolio, "SPY", dec!(0.5));
        assert_eq!(result.quantity, Decimal::ZERO);
        assert!(result.reason.unwrap().contains("zero"));
    }

    #[test]
    fn test_fees_reduce_order_size() {
        let registry = MarginModelRegistry::with_defaults(OptionMarginConfig::default());
        let portfolio = spy_portfolio();

        let free = solve(&registry, &ConstantFeeModel::zero(), SolverConfig::default(), &portfolio, "SPY", dec!(0.5));
        assert_eq!(free.quantity, dec!(125));
        assert_eq!(free.amount, dec!(50000));

        let charged = solve(&registry, &ConstantFeeModel::new(dec!(10)), SolverConfig::default(), &portfolio, "SPY", dec!(0.5));
        assert_eq!(charged.quantity, dec!(124));
        assert_eq!(charged.amount, dec!(49995));
        assert!(charged.is_exact());
    }

    #[test]
    fn test_leverage_scales_order_size() {
        let registry = MarginModelRegistry::with_defaults(OptionMarginConfig::default());
        let mut portfolio = spy_portfolio();
        registry
            .set_leverage(portfolio.security_mut("SPY").unwrap(), dec!(2))
            .unwrap();

        let result = solve(&registry, &ConstantFeeModel::zero(), SolverConfig::default(), &portfolio, "SPY", dec!(0.5));
        assert_eq!(result.quantity, dec!(250));
    }

    #[test]
    fn test_short_equity_target() {
        let registry = MarginModelRegistry::with_defaults(OptionMarginConfig::default());
        let result = solve(
            &registry,
            &ConstantFeeModel::zero(),
            SolverConfig::default(),
            &spy_portfolio(),
            "SPY",
            dec!(-0.25),
        );
        assert_eq!(result.quantity, dec!(-62));
    }

    #[test]
    fn test_foreign_currency_fee_is_converted() {
        let registry = MarginModelRegistry::with_defaults(OptionMarginConfig::default());
        let mut portfolio = spy_portfolio();
        portfolio.cash_book_mut().set_conversion_rate("EUR", dec!(1.1));

        let mut fees = MockFeeModel::new();
        fees.expect_estimate_fee().returning(|_| {
            Ok(OrderFee {
                amount: dec!(10),
                currency: "EUR".to_string(),
            })
        });

        let result = solve(&registry, &fees, SolverConfig::default(), &portfolio, "SPY", dec!(0.5));
        assert_eq!(result.quantity, dec!(124));
        assert_eq!(result.amount, dec!(49994.5));
    }

    #[test]
    fn test_large_short_from_existing_short_stays_inside_target() {
        let registry = MarginModelRegistry::with_defaults(OptionMarginConfig::default());
        let portfolio = call_portfolio_with_cash(dec!(1000000), dec!(-10));

        // value 995220, target -497610; naked add-on for 10 held is 64612,
        // so |h| * 478 + 64612 <= 497610 allows h = -905
        let result = solve(&registry, &ConstantFeeModel::zero(), SolverConfig::default(), &portfolio, CALL, dec!(-0.5));

        assert_eq!(result.quantity, dec!(-895));
        assert_eq!(result.amount, dec!(-497610));
        assert!(result.is_exact());
    }

    #[test]
    fn test_iteration_cap_returns_fitting_approximate_result() {
        let registry = MarginModelRegistry::with_defaults(OptionMarginConfig::default());
        let config = SolverConfig {
            max_iterations: 3,
            ..SolverConfig::default()
        };
        let portfolio = call_portfolio_with_cash(dec!(1000000), dec!(-10));
        let result = solve(&registry, &ConstantFeeModel::zero(), config, &portfolio, CALL, dec!(-0.5));

        assert_eq!(result.convergence, Convergence::Approximate);
        assert_eq!(result.quantity, dec!(-511));
        assert_eq!(result.amount, dec!(-497610));
        assert!(result
            .diagnostics
            .contains(&MarginError::NumericNonConvergence { iterations: 3 }));

        // 521 * 478 + 64612 = 313650 stays inside the reported amount
        let model = registry.model_for(SecurityType::Option).unwrap();
        let snapshot = portfolio.snapshot();
        let margin = model
            .initial_margin_requirement(snapshot.position(CALL).unwrap(), result.quantity - dec!(10))
            .unwrap();
        assert_eq!(margin, dec!(-313650));
        assert!(margin.abs() <= result.amount.abs());
    }

    #[test]
    fn test_orders_respect_lot_size() {
        let registry = MarginModelRegistry::with_defaults(OptionMarginConfig::default());
        let mut portfolio = Portfolio::new("USD");
        portfolio.set_cash(dec!(100000));
        let spy = portfolio.add_security(
            Security::equity("SPY", "USD").with_properties(SymbolProperties::for_equity("USD").with_lot_size(dec!(10))),
        );
        spy.set_market_price(dec!(400));
        spy.set_holdings(dec!(400), dec!(-3));

        // value 98800, target 49400 -> 123.5 shares of headroom, rounded to whole lots
        let long = solve(&registry, &ConstantFeeModel::zero(), SolverConfig::default(), &portfolio, "SPY", dec!(0.5));
        assert_eq!(long.quantity, dec!(120));
        assert!(long.is_exact());

        let short = solve(&registry, &ConstantFeeModel::zero(), SolverConfig::default(), &portfolio, "SPY", dec!(-0.5));
        assert_eq!(short.quantity, dec!(-120));
        assert!(short.is_exact());
    }

    #[test]
    fn test_growing_fees_end_approximate_within_previous_target() {
        let registry = MarginModelRegistry::with_defaults(OptionMarginConfig::default());
        let config = SolverConfig {
            max_iterations: 4,
            ..SolverConfig::default()
        };

        // Each estimate costs 1000 more than the last, so netting never settles
        let mut fees = MockFeeModel::new();
        let mut calls = 0u32;
        fees.expect_estimate_fee().returning(move |_| {
            calls += 1;
            Ok(OrderFee {
                amount: dec!(1000) * Decimal::from(calls),
                currency: "USD".to_string(),
            })
        });

        let result = solve(&registry, &fees, config, &spy_portfolio(), "SPY", dec!(0.5));

        // 125 fails 49500 after the first fee, 123 fails 49000 after the second
        assert_eq!(result.convergence, Convergence::Approximate);
        assert_eq!(result.quantity, dec!(123));
        assert_eq!(result.amount, dec!(49500));
        assert!(result.quantity * dec!(400) <= result.amount);
        assert!(result.reason.unwrap().contains("not fully netted"));
        assert!(result
            .diagnostics
            .contains(&MarginError::NumericNonConvergence { iterations: 4 }));
    }

    #[test]
    fn test_small_change_below_minimum_is_skipped() {
        let registry = MarginModelRegistry::with_defaults(OptionMarginConfig::default());
        let result = OrderQuantitySolver::new(&registry, &ConstantFeeModel::zero(), SolverConfig::default(), Decimal::ZERO)
            .maximum_order_quantity_for_target_buying_power(&spy_portfolio().snapshot(), "SPY", dec!(0.001), dec!(0.01))
            .unwrap();

        assert_eq!(result.quantity, Decimal::ZERO);
        assert!(result.reason.unwrap().contains("minimum"));
    }
}
