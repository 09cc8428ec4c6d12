//! Unit Conversion Utilities
//!
//! Tokens move on-chain as integer base units; the ledger works in decimals.

use rust_decimal::Decimal;

/// Largest scale `rust_decimal` can represent
pub const MAX_DECIMALS: u32 = 28;

/// Convert on-chain base units to a decimal amount
///
/// Returns `None` if the value does not fit a `Decimal` at that precision.
pub fn base_units_to_decimal(raw: u128, decimals: u32) -> Option<Decimal> {
    if decimals > MAX_DECIMALS {
        return None;
    }
    let raw = i128::try_from(raw).ok()?;
    Decimal::try_from_i128_with_scale(raw, decimals)
        .ok()
        .map(|d| d.normalize())
}

/// Format an amount with its token symbol, e.g. "120.5 USDT"
pub fn format_amount(amount: Decimal, symbol: &str) -> String {
    format!("{} {}", amount.normalize(), symbol)
}
