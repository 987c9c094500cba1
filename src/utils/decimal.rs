//! Decimal arithmetic utilities for margin and quantity calculations.

use crate::error::{MarginError, Result};
use rust_decimal::Decimal;

/// Direction used when snapping a quantity onto the lot grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LotRounding {
    /// Round up (towards +infinity)
    TowardPositive,
    /// Round down (towards -infinity)
    TowardNegative,
}

/// Snap `value` to a multiple of `lot_size`.
pub fn round_to_lot(value: Decimal, lot_size: Decimal, rounding: LotRounding) -> Result<Decimal> {
    if lot_size <= Decimal::ZERO {
        return Ok(value);
    }
    let lots = value
        .checked_div(lot_size)
        .ok_or_else(|| MarginError::overflow("lot count"))?;
    let lots = match rounding {
        LotRounding::TowardPositive => lots.ceil(),
        LotRounding::TowardNegative => lots.floor(),
    };
    // ceil of a small negative yields -0; normalize so it compares and prints as 0
    Ok(checked_product("lot count", &[lots, lot_size])?.normalize())
}

/// Product of `factors`, or a configuration error naming `context` on overflow.
pub fn checked_product(context: &str, factors: &[Decimal]) -> Result<Decimal> {
    factors
        .iter()
        .try_fold(Decimal::ONE, |acc, factor| acc.checked_mul(*factor))
        .ok_or_else(|| MarginError::overflow(context))
}

/// Sum of `terms`, or a configuration error naming `context` on overflow.
pub fn checked_sum(context: &str, terms: &[Decimal]) -> Result<Decimal> {
    terms
        .iter()
        .try_fold(Decimal::ZERO, |acc, term| acc.checked_add(*term))
        .ok_or_else(|| MarginError::overflow(context))
}
