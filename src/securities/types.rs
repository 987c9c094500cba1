//! Security, holdings and snapshot type definitions.

use crate::error::Result;
use crate::utils::decimal::checked_product;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of instrument. Selects the margin model a security is evaluated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityType {
    Equity,
    Option,
    Future,
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityType::Equity => write!(f, "Equity"),
            SecurityType::Option => write!(f, "Option"),
            SecurityType::Future => write!(f, "Future"),
        }
    }
}

/// Option right (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    Call,
    Put,
}

/// Direction of a proposed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Buy,
    Sell,
    Hold,
}

impl OrderDirection {
    /// Direction implied by a signed quantity.
    pub fn from_quantity(quantity: Decimal) -> Self {
        if quantity > Decimal::ZERO {
            OrderDirection::Buy
        } else if quantity < Decimal::ZERO {
            OrderDirection::Sell
        } else {
            OrderDirection::Hold
        }
    }
}

/// Contract terms for options and futures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivativeTerms {
    pub strike: Decimal,
    pub right: OptionRight,
    pub expiry: NaiveDate,
}

impl DerivativeTerms {
    pub fn new(strike: Decimal, right: OptionRight, expiry: NaiveDate) -> Self {
        Self {
            strike,
            right,
            expiry,
        }
    }

    /// Amount by which the underlying sits on the unfavourable side of the strike.
    ///
    /// Zero when the option is at or in the money.
    pub fn out_of_the_money_amount(&self, underlying_price: Decimal) -> Decimal {
        match self.right {
            OptionRight::Call => (self.strike - underlying_price).max(Decimal::ZERO),
            OptionRight::Put => (underlying_price - self.strike).max(Decimal::ZERO),
        }
    }

    /// Whether the underlying price favours the holder.
    pub fn is_in_the_money(&self, underlying_price: Decimal) -> bool {
        match self.right {
            OptionRight::Call => underlying_price > self.strike,
            OptionRight::Put => underlying_price < self.strike,
        }
    }
}

/// Static trading properties of a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolProperties {
    /// Currency prices are quoted in
    pub quote_currency: String,
    /// Units of the underlying per contract
    pub contract_multiplier: Decimal,
    /// Minimum price increment
    pub minimum_price_variation: Decimal,
    /// Minimum tradable quantity increment
    pub lot_size: Decimal,
}

impl SymbolProperties {
    /// Cash-equity style properties: multiplier 1, one-cent tick, lot of 1.
    pub fn for_equity(quote_currency: &str) -> Self {
        Self {
            quote_currency: quote_currency.to_string(),
            contract_multiplier: Decimal::ONE,
            minimum_price_variation: dec!(0.01),
            lot_size: Decimal::ONE,
        }
    }

    /// Standard listed equity option: 100 shares per contract.
    pub fn for_option(quote_currency: &str) -> Self {
        Self {
            quote_currency: quote_currency.to_string(),
            contract_multiplier: dec!(100),
            minimum_price_variation: dec!(0.01),
            lot_size: Decimal::ONE,
        }
    }

    pub fn with_multiplier(mut self, multiplier: Decimal) -> Self {
        self.contract_multiplier = multiplier;
        self
    }

    pub fn with_lot_size(mut self, lot_size: Decimal) -> Self {
        self.lot_size = lot_size;
        self
    }
}

/// Quantity held and the price it was acquired at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holdings {
    /// Signed quantity (positive = long, negative = short)
    pub quantity: Decimal,
    pub average_price: Decimal,
}

/// Reference to the underlying of a derivative and its last traded price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderlyingRef {
    pub symbol: String,
    pub price: Option<Decimal>,
}

/// A tradable instrument with live market and position state.
///
/// Prices and holdings are mutated by market-data and fill handlers; the
/// margin engine only ever reads a [`PositionSnapshot`] taken from it.
#[derive(Debug, Clone, Serialize)]
pub struct Security {
    symbol: String,
    security_type: SecurityType,
    properties: SymbolProperties,
    price: Decimal,
    terms: Option<DerivativeTerms>,
    underlying: Option<UnderlyingRef>,
    holdings: Holdings,
    leverage: Decimal,
}

impl Security {
    /// Create an unleveraged equity.
    pub fn equity(symbol: &str, quote_currency: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            security_type: SecurityType::Equity,
            properties: SymbolProperties::for_equity(quote_currency),
            price: Decimal::ZERO,
            terms: None,
            underlying: None,
            holdings: Holdings::default(),
            leverage: Decimal::ONE,
        }
    }

    /// Create an option contract on `underlying_symbol`.
    pub fn option(
        symbol: &str,
        underlying_symbol: &str,
        terms: DerivativeTerms,
        properties: SymbolProperties,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            security_type: SecurityType::Option,
            properties,
            price: Decimal::ZERO,
            terms: Some(terms),
            underlying: Some(UnderlyingRef {
                symbol: underlying_symbol.to_string(),
                price: None,
            }),
            holdings: Holdings::default(),
            leverage: Decimal::ONE,
        }
    }

    /// Create a futures contract.
    pub fn future(symbol: &str, underlying_symbol: &str, properties: SymbolProperties) -> Self {
        Self {
            symbol: symbol.to_string(),
            security_type: SecurityType::Future,
            properties,
            price: Decimal::ZERO,
            terms: None,
            underlying: Some(UnderlyingRef {
                symbol: underlying_symbol.to_string(),
                price: None,
            }),
            holdings: Holdings::default(),
            leverage: Decimal::ONE,
        }
    }

    /// Replace the symbol properties, e.g. for odd lot sizes.
    pub fn with_properties(mut self, properties: SymbolProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn security_type(&self) -> SecurityType {
        self.security_type
    }

    pub fn leverage(&self) -> Decimal {
        self.leverage
    }

    /// Update the last traded price.
    pub fn set_market_price(&mut self, price: Decimal) {
        self.price = price;
    }

    /// Update the last traded price of the underlying, if this is a derivative.
    pub fn set_underlying_price(&mut self, price: Decimal) {
        if let Some(underlying) = self.underlying.as_mut() {
            underlying.price = Some(price);
        }
    }

    /// Replace the position held in this security.
    pub fn set_holdings(&mut self, average_price: Decimal, quantity: Decimal) {
        self.holdings = Holdings {
            quantity,
            average_price,
        };
    }

    /// Leverage is only written through a `LeverageController`, which owns validation.
    pub(crate) fn apply_leverage(&mut self, leverage: Decimal) {
        self.leverage = leverage;
    }

    /// Copy all state the margin engine needs in one step.
    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            symbol: self.symbol.clone(),
            security_type: self.security_type,
            quote_currency: self.properties.quote_currency.clone(),
            price: self.price,
            underlying_price: self.underlying.as_ref().and_then(|u| u.price),
            quantity: self.holdings.quantity,
            average_price: self.holdings.average_price,
            multiplier: self.properties.contract_multiplier,
            lot_size: self.properties.lot_size,
            leverage: self.leverage,
            terms: self.terms,
        }
    }
}

/// Immutable point-in-time view of a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub security_type: SecurityType,
    pub quote_currency: String,
    pub price: Decimal,
    pub underlying_price: Option<Decimal>,
    /// Signed quantity currently held
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub multiplier: Decimal,
    pub lot_size: Decimal,
    pub leverage: Decimal,
    pub terms: Option<DerivativeTerms>,
}

impl PositionSnapshot {
    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }

    pub fn absolute_quantity(&self) -> Decimal {
        self.quantity.abs()
    }

    /// |quantity| * price * multiplier in quote currency.
    pub fn absolute_holdings_cost(&self) -> Result<Decimal> {
        checked_product(&self.symbol, &[self.quantity.abs(), self.price, self.multiplier])
    }

    /// Signed market value in quote currency.
    pub fn holdings_value(&self) -> Result<Decimal> {
        checked_product(&self.symbol, &[self.quantity, self.price, self.multiplier])
    }
}
