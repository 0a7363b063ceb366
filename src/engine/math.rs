// ============================================================================
// Fixed-point helpers and BPF-safe 128-bit storage
// ============================================================================
//
// Rust 1.77/1.78 raised u128 alignment to 16 bytes on x86_64 while SBF keeps 8.
// Persistent records therefore store 128-bit values as [u64; 2] so the same
// layout is produced on-chain and in host tests.

use bytemuck::{Pod, Zeroable};

use super::{CreditError, Result};

/// RAY fixed-point unit (1e27), used by both interest indices.
pub const RAY: u128 = 1_000_000_000_000_000_000_000_000_000;

/// 100% in basis points.
pub const PERCENTAGE_FACTOR: u128 = 10_000;

/// Extra precision applied when re-deriving a debt index.
pub const INDEX_PRECISION: u128 = 1_000_000_000;

pub const SECONDS_PER_YEAR: u128 = 365 * 24 * 60 * 60;

/// `RAY / PERCENTAGE_FACTOR`: one basis point of annual rate expressed in RAY.
pub const RAY_DIVIDED_BY_PERCENTAGE: u128 = RAY / PERCENTAGE_FACTOR;

/// BPF-safe unsigned 128-bit integer.
/// Layout: [lo, hi] in little-endian order.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct U128([u64; 2]);

impl U128 {
    pub const ZERO: Self = Self([0, 0]);
    pub const MAX: Self = Self([u64::MAX, u64::MAX]);

    #[inline]
    pub const fn new(val: u128) -> Self {
        Self([val as u64, (val >> 64) as u64])
    }

    #[inline]
    pub const fn get(self) -> u128 {
        ((self.0[1] as u128) << 64) | (self.0[0] as u128)
    }

    #[inline]
    pub fn set(&mut self, val: u128) {
        self.0[0] = val as u64;
        self.0[1] = (val >> 64) as u64;
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0[0] == 0 && self.0[1] == 0
    }
}

impl Default for U128 {
    fn default() -> Self {
        Self::ZERO
    }
}

impl core::fmt::Debug for U128 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "U128({})", self.get())
    }
}

impl core::fmt::Display for U128 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl From<u128> for U128 {
    fn from(val: u128) -> Self {
        Self::new(val)
    }
}

impl From<u64> for U128 {
    fn from(val: u64) -> Self {
        Self::new(val as u128)
    }
}

impl From<U128> for u128 {
    fn from(val: U128) -> Self {
        val.get()
    }
}

impl PartialOrd for U128 {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U128 {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.get().cmp(&other.get())
    }
}

// ============================================================================
// Checked arithmetic
// ============================================================================

#[inline]
pub fn add(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b).ok_or(CreditError::Overflow)
}

#[inline]
pub fn sub(a: u128, b: u128) -> Result<u128> {
    a.checked_sub(b).ok_or(CreditError::Overflow)
}

#[inline]
pub fn mul(a: u128, b: u128) -> Result<u128> {
    a.checked_mul(b).ok_or(CreditError::Overflow)
}

/// Full 256-bit product of two u128 values as `(hi, lo)`.
pub fn mul_wide(a: u128, b: u128) -> (u128, u128) {
    const MASK: u128 = u64::MAX as u128;
    let (a1, a0) = (a >> 64, a & MASK);
    let (b1, b0) = (b >> 64, b & MASK);

    let p00 = a0 * b0;
    let p01 = a0 * b1;
    let p10 = a1 * b0;
    let p11 = a1 * b1;

    // each term < 2^64, so the sum cannot overflow
    let mid = (p00 >> 64) + (p01 & MASK) + (p10 & MASK);
    let lo = (p00 & MASK) | (mid << 64);
    let hi = p11 + (p01 >> 64) + (p10 >> 64) + (mid >> 64);
    (hi, lo)
}

/// Divides the 256-bit value `hi:lo` by `d`, rounding down.
/// Fails when the quotient does not fit in u128.
pub fn div_wide(hi: u128, lo: u128, d: u128) -> Result<u128> {
    if d == 0 {
        return Err(CreditError::DivisionByZero);
    }
    if hi == 0 {
        return Ok(lo / d);
    }
    if hi >= d {
        return Err(CreditError::Overflow);
    }

    // Restoring long division; invariant: rem < d before every step.
    let mut rem = hi;
    let mut q: u128 = 0;
    for i in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((lo >> i) & 1);
        q <<= 1;
        if carry == 1 || rem >= d {
            rem = rem.wrapping_sub(d);
            q |= 1;
        }
    }
    Ok(q)
}

/// `a * b / d` rounded down, with a 256-bit intermediate product.
#[inline]
pub fn mul_div(a: u128, b: u128, d: u128) -> Result<u128> {
    let (hi, lo) = mul_wide(a, b);
    div_wide(hi, lo, d)
}

/// `a * bps / 100%` rounded down.
#[inline]
pub fn percent_mul(a: u128, bps: u16) -> Result<u128> {
    mul_div(a, bps as u128, PERCENTAGE_FACTOR)
}
