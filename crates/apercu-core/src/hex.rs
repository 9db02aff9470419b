//! Hex quantity arithmetic for block ranges.
//!
//! Quantities are opaque strings everywhere else; only replay-range
//! computation parses them.

use alloy_primitives::U256;

use crate::error::RpcError;
use crate::types::Hex;

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_quantity(value: &str) -> Result<U256, RpcError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| RpcError::malformed(format_args!("quantity '{value}': missing 0x prefix")))?;
    if digits.is_empty() {
        return Err(RpcError::malformed(format_args!("quantity '{value}': no digits")));
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| RpcError::malformed(format_args!("quantity '{value}': {e}")))
}

/// Encode as a canonical quantity: lowercase, no leading zeros, `0x0` for zero.
pub fn to_quantity(value: U256) -> Hex {
    if value.is_zero() {
        return "0x0".to_string();
    }
    format!("0x{value:x}")
}

/// Inclusive `(fromBlock, toBlock)` covering the last `replay_blocks` blocks
/// up to and including `latest`, clamped at block zero.
///
/// `toBlock` is `latest` exactly as the node returned it.
pub fn replay_range(latest: &str, replay_blocks: u64) -> Result<(Hex, Hex), RpcError> {
    let head = parse_quantity(latest)?;
    let span = U256::from(replay_blocks.saturating_sub(1));
    let from = head.saturating_sub(span);
    Ok((to_quantity(from), latest.to_string()))
}
