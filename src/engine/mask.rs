//! Token-set bitmask primitives.
//!
//! Bit `i` of a mask stands for the collateral token registered in slot `i`.

use super::{CreditError, Result, MAX_TOKENS};

#[inline]
pub fn enable(mask: u64, bits: u64) -> u64 {
    mask | bits
}

#[inline]
pub fn disable(mask: u64, bits: u64) -> u64 {
    mask & !bits
}

/// Enables `to_enable`, then disables `to_disable`. A bit present in both ends up disabled.
#[inline]
pub fn enable_disable(mask: u64, to_enable: u64, to_disable: u64) -> u64 {
    (mask | to_enable) & !to_disable
}

#[inline]
pub fn calc_enabled_tokens(mask: u64) -> u32 {
    mask.count_ones()
}

/// Lowest set bit as a mask, or 0 for an empty mask.
#[inline]
pub fn lsb_mask(mask: u64) -> u64 {
    mask & mask.wrapping_neg()
}

/// Bit position of a single-bit mask.
pub fn calc_index(mask: u64) -> Result<u8> {
    if mask == 0 || mask & (mask - 1) != 0 {
        return Err(CreditError::IncorrectParameter);
    }

    let (mut lo, mut hi) = (0u32, MAX_TOKENS as u32);
    loop {
        let mid = (lo + hi) >> 1;
        let candidate = 1u64 << mid;
        if candidate == mask {
            return Ok(mid as u8);
        }
        if candidate > mask {
            hi = mid;
        } else {
            lo = mid;
        }
    }
}

/// Single-bit mask for a token slot.
pub fn mask_of(index: usize) -> Result<u64> {
    if index >= MAX_TOKENS {
        return Err(CreditError::TooManyTokens);
    }
    Ok(1u64 << index)
}

/// Iterates the set bits of `mask` as single-bit masks, lowest first.
pub fn iter_bits(mask: u64) -> impl Iterator<Item = u64> {
    let mut rest = mask;
    core::iter::from_fn(move || {
        if rest == 0 {
            return None;
        }
        let bit = lsb_mask(rest);
        rest &= rest - 1;
        Some(bit)
    })
}
