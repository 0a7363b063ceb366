//! Collateral valuation.
//!
//! Quoted tokens are valued first, each capped by its quota in USD. The rest
//! of the enabled set follows in hint order, then by ascending bit. The walk
//! stops as soon as the weighted value reaches the target, which lets a
//! health check avoid pricing tokens it does not need.

use bytemuck::{Pod, Zeroable};

use super::mask;
use super::math::{self, mul_div, percent_mul, PERCENTAGE_FACTOR, RAY};
use super::{BalanceSource, CollateralDebtData, CollateralTokens, CreditError, PriceOracle, QuotedToken, Result, TokenId};

/// Liquidation threshold with an optional linear ramp.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct LiquidationThreshold {
    pub ramp_start: u64,
    pub lt_initial: u16,
    pub lt_final: u16,
    pub ramp_duration: u32,
}

impl LiquidationThreshold {
    pub fn fixed(lt: u16) -> Self {
        Self { ramp_start: 0, lt_initial: lt, lt_final: lt, ramp_duration: 0 }
    }

    /// Effective threshold at `now`.
    pub fn current(&self, now: u64) -> u16 {
        ramped_liquidation_threshold(self.lt_initial, self.lt_final, self.ramp_start, self.ramp_duration, now)
    }
}

pub fn ramped_liquidation_threshold(lt_initial: u16, lt_final: u16, ramp_start: u64, ramp_duration: u32, now: u64) -> u16 {
    let ramp_end = ramp_start.saturating_add(ramp_duration as u64);
    if now <= ramp_start {
        lt_initial
    } else if now < ramp_end {
        let elapsed = (now - ramp_start) as u128;
        let left = (ramp_end - now) as u128;
        let span = (ramp_end - ramp_start) as u128;
        ((lt_initial as u128 * left + lt_final as u128 * elapsed) / span) as u16
    } else {
        lt_final
    }
}

/// `twv * 100% / debt` in basis points; `u128::MAX` without debt.
pub fn calc_health_factor(twv_usd: u128, total_debt_usd: u128) -> Result<u128> {
    if total_debt_usd == 0 {
        return Ok(u128::MAX);
    }
    mul_div(twv_usd, PERCENTAGE_FACTOR, total_debt_usd)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollateralOutcome {
    pub total_value_usd: u128,
    pub twv_usd: u128,
    /// Enabled non-quoted tokens found holding at most one unit
    pub tokens_to_disable: u64,
}

/// Values one token held by `credit_account`.
///
/// Returns `(value_usd, weighted_value_usd, non_zero)`. One unit is kept back
/// as dust, so balances of 0 or 1 count as empty.
pub fn calc_one_token_collateral<O: PriceOracle, B: BalanceSource>(
    credit_account: &TokenId,
    token: &TokenId,
    liquidation_threshold: u16,
    cap_usd: u128,
    oracle: &O,
    balances: &B,
) -> Result<(u128, u128, bool)> {
    let balance = balances.balance_of(token, credit_account)?;
    if balance <= 1 {
        return Ok((0, 0, false));
    }
    let value_usd = oracle.convert_to_usd(balance - 1, token)?;
    let weighted = percent_mul(value_usd.min(cap_usd), liquidation_threshold)?;
    Ok((value_usd, weighted, true))
}

/// Values quoted tokens until the weighted total reaches `target_usd`.
pub fn calc_quoted_tokens_collateral<O: PriceOracle, B: BalanceSource>(
    quoted_tokens: &[QuotedToken],
    credit_account: &TokenId,
    underlying: &TokenId,
    target_usd: u128,
    oracle: &O,
    balances: &B,
) -> Result<(u128, u128)> {
    if quoted_tokens.is_empty() || target_usd == 0 {
        return Ok((0, 0));
    }

    let underlying_price_ray = oracle.convert_to_usd(RAY, underlying)?;
    let (mut total_value_usd, mut twv_usd) = (0u128, 0u128);
    for q in quoted_tokens {
        if twv_usd >= target_usd {
            break;
        }
        let quota_usd = mul_div(q.quota, underlying_price_ray, RAY)?;
        let (value, weighted, _) =
            calc_one_token_collateral(credit_account, &q.token, q.liquidation_threshold, quota_usd, oracle, balances)?;
        total_value_usd = math::add(total_value_usd, value)?;
        twv_usd = math::add(twv_usd, weighted)?;
    }
    Ok((total_value_usd, twv_usd))
}

/// Values the tokens in `tokens_to_check`, hinted ones first.
///
/// Hints must be single-bit masks. Hints outside the set, or already visited,
/// are skipped.
pub fn calc_non_quoted_tokens_collateral<T: CollateralTokens, O: PriceOracle, B: BalanceSource>(
    mut tokens_to_check: u64,
    hints: &[u64],
    credit_account: &TokenId,
    target_usd: u128,
    tokens: &T,
    oracle: &O,
    balances: &B,
) -> Result<CollateralOutcome> {
    let mut out = CollateralOutcome::default();
    let mut next_hint = 0;

    while tokens_to_check != 0 {
        if out.twv_usd >= target_usd {
            break;
        }

        let token_mask = if next_hint < hints.len() {
            let hint = hints[next_hint];
            next_hint += 1;
            if hint == 0 || hint & (hint - 1) != 0 {
                return Err(CreditError::InvalidCollateralHint);
            }
            if tokens_to_check & hint == 0 {
                continue;
            }
            hint
        } else {
            mask::lsb_mask(tokens_to_check)
        };

        let (token, lt) = tokens.token_and_threshold_by_mask(token_mask, true)?;
        let (value, weighted, non_zero) = calc_one_token_collateral(credit_account, &token, lt, u128::MAX, oracle, balances)?;
        if non_zero {
            out.total_value_usd = math::add(out.total_value_usd, value)?;
            out.twv_usd = math::add(out.twv_usd, weighted)?;
        } else {
            out.tokens_to_disable = mask::enable(out.tokens_to_disable, token_mask);
        }
        tokens_to_check = mask::disable(tokens_to_check, token_mask);
    }
    Ok(out)
}

/// Values an account's collateral against `target_usd` (`u128::MAX` for a
/// full valuation).
///
/// When quoted tokens alone reach the target, the non-quoted walk is skipped
/// and nothing is marked for disabling.
#[allow(clippy::too_many_arguments)]
pub fn calc_collateral<T: CollateralTokens, O: PriceOracle, B: BalanceSource>(
    data: &CollateralDebtData,
    credit_account: &TokenId,
    underlying: &TokenId,
    target_usd: u128,
    hints: &[u64],
    tokens: &T,
    oracle: &O,
    balances: &B,
) -> Result<CollateralOutcome> {
    let (total_value_usd, twv_usd) =
        calc_quoted_tokens_collateral(&data.quoted_tokens, credit_account, underlying, target_usd, oracle, balances)?;
    if twv_usd >= target_usd {
        return Ok(CollateralOutcome { total_value_usd, twv_usd, tokens_to_disable: 0 });
    }

    let tokens_to_check = mask::disable(data.enabled_tokens_mask, data.quoted_tokens_mask);
    let rest = calc_non_quoted_tokens_collateral(
        tokens_to_check,
        hints,
        credit_account,
        target_usd - twv_usd,
        tokens,
        oracle,
        balances,
    )?;

    Ok(CollateralOutcome {
        total_value_usd: math::add(total_value_usd, rest.total_value_usd)?,
        twv_usd: math::add(twv_usd, rest.twv_usd)?,
        tokens_to_disable: rest.tokens_to_disable,
    })
}
