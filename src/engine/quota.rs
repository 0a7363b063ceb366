//! Per-token quota accounting.
//!
//! A quota reserves borrowing capacity against one collateral token. It pays
//! interest through an additive index that grows linearly at the token's
//! annual rate: `index += RAY/100% * rate * dt / year`. All quoted tokens
//! share one `last_rate_update` timestamp, so a rate change must re-baseline
//! every token at once.

use bytemuck::{Pod, Zeroable};

use super::math::{self, mul_div, percent_mul, PERCENTAGE_FACTOR, RAY, RAY_DIVIDED_BY_PERCENTAGE, SECONDS_PER_YEAR};
use super::{CreditError, Result, U128};

/// Index value written when a token becomes quoted. Zero means "not quoted".
pub const INITIAL_QUOTA_INDEX: u128 = 1;

/// Quota parameters of one token.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct TokenQuotaParams {
    /// Additive index at `last_rate_update`, RAY-scaled
    pub cumulative_index_lu: U128,
    /// Sum of all account quotas
    pub total_quoted: U128,
    /// Cap on `total_quoted`
    pub limit: U128,
    /// Annual rate in basis points
    pub rate: u16,
    /// One-time fee on quota increases, basis points
    pub quota_increase_fee: u16,
    pub _padding: [u8; 4],
}

impl TokenQuotaParams {
    #[inline]
    pub fn is_initialized(&self) -> bool {
        !self.cumulative_index_lu.is_zero()
    }

    /// Annual revenue this token contributes to the pool.
    pub fn quota_revenue(&self) -> Result<u128> {
        percent_mul(self.total_quoted.get(), self.rate)
    }
}

/// One account's quota on one token.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct AccountQuota {
    pub quota: U128,
    pub cumulative_index_lu: U128,
}

/// Result of a quota change, applied by the caller to account and pool state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuotaUpdate {
    /// Interest accrued on the old quota since its last update
    pub interest_change: u128,
    /// One-time increase fee
    pub fees: u128,
    /// Signed change of the pool's annual quota revenue
    pub revenue_change: i128,
    /// Change actually applied after clamping
    pub applied_change: i128,
    /// Quota went from zero to non-zero
    pub enable_token: bool,
    /// Quota went from non-zero to zero
    pub disable_token: bool,
}

/// Marks a token as quoted. Fails if it already is.
pub fn add_quota_token(params: &mut TokenQuotaParams) -> Result<()> {
    if params.is_initialized() {
        return Err(CreditError::TokenAlreadyQuoted);
    }
    params.cumulative_index_lu = U128::new(INITIAL_QUOTA_INDEX);
    Ok(())
}

pub fn cumulative_index_since(index_lu: u128, rate: u16, last_update: u64, now: u64) -> Result<u128> {
    let dt = now.saturating_sub(last_update) as u128;
    let growth = mul_div(RAY_DIVIDED_BY_PERCENTAGE * rate as u128, dt, SECONDS_PER_YEAR)?;
    math::add(index_lu, growth)
}

pub fn calc_accrued_quota_interest(quota: u128, index_now: u128, index_lu: u128) -> Result<u128> {
    mul_div(quota, index_now.saturating_sub(index_lu), RAY)
}

/// Revenue delta for moving a token's total quota from `old_total` to
/// `new_total`. Deltas telescope, so their running sum always equals
/// `total_quoted * rate / 100%` for the current total.
pub fn calc_quota_revenue_change(rate: u16, old_total: u128, new_total: u128) -> Result<i128> {
    let before = i128::try_from(percent_mul(old_total, rate)?).map_err(|_| CreditError::Overflow)?;
    let after = i128::try_from(percent_mul(new_total, rate)?).map_err(|_| CreditError::Overflow)?;
    Ok(after - before)
}

/// Clamps a positive quota request to the capacity left under `limit`.
pub fn calc_actual_quota_change(total_quoted: u128, limit: u128, requested: i128) -> i128 {
    if requested <= 0 || total_quoted >= limit {
        return 0;
    }
    let room = limit - total_quoted;
    let requested = requested as u128;
    // room < requested <= i128::MAX here
    if room < requested {
        room as i128
    } else {
        requested as i128
    }
}

fn index_now(params: &TokenQuotaParams, last_rate_update: u64, now: u64) -> Result<u128> {
    if !params.is_initialized() {
        return Err(CreditError::TokenNotQuoted);
    }
    cumulative_index_since(params.cumulative_index_lu.get(), params.rate, last_rate_update, now)
}

/// Changes an account's quota by `requested_change`.
///
/// Increases are clamped to the remaining capacity (to zero while the rate is
/// zero) and pay `quota_increase_fee` on the applied amount. `i128::MIN`
/// removes the whole quota. The resulting quota must lie in
/// `[min_quota, max_quota]`; nothing is written when it does not.
pub fn update_quota(
    params: &mut TokenQuotaParams,
    account: &mut AccountQuota,
    requested_change: i128,
    min_quota: u128,
    max_quota: u128,
    last_rate_update: u64,
    now: u64,
) -> Result<QuotaUpdate> {
    let index = index_now(params, last_rate_update, now)?;
    let quoted = account.quota.get();
    let total_quoted = params.total_quoted.get();

    let interest_change = calc_accrued_quota_interest(quoted, index, account.cumulative_index_lu.get())?;

    let mut update = QuotaUpdate { interest_change, ..QuotaUpdate::default() };
    let (new_quoted, new_total) = if requested_change > 0 {
        let applied = if params.rate == 0 {
            0
        } else {
            calc_actual_quota_change(total_quoted, params.limit.get(), requested_change)
        };
        update.applied_change = applied;
        update.fees = percent_mul(applied as u128, params.quota_increase_fee)?;
        let new_quoted = math::add(quoted, applied as u128)?;
        update.enable_token = quoted == 0 && new_quoted != 0;
        (new_quoted, math::add(total_quoted, applied as u128)?)
    } else {
        let decrease = if requested_change == i128::MIN { quoted } else { requested_change.unsigned_abs() };
        let new_quoted = quoted.checked_sub(decrease).ok_or(CreditError::QuotaOutOfBounds)?;
        update.applied_change = -i128::try_from(decrease).map_err(|_| CreditError::Overflow)?;
        update.disable_token = quoted != 0 && new_quoted == 0;
        (new_quoted, total_quoted.saturating_sub(decrease))
    };

    if new_quoted < min_quota || new_quoted > max_quota {
        return Err(CreditError::QuotaOutOfBounds);
    }

    update.revenue_change = calc_quota_revenue_change(params.rate, total_quoted, new_total)?;

    params.total_quoted = U128::new(new_total);
    account.quota = U128::new(new_quoted);
    account.cumulative_index_lu = U128::new(index);
    Ok(update)
}

/// Zeroes an account's quota without accruing interest; the index is
/// re-baselined whenever the quota next becomes non-zero. Returns the
/// revenue change.
pub fn remove_quota(params: &mut TokenQuotaParams, account: &mut AccountQuota, set_limit_to_zero: bool) -> Result<i128> {
    let quota = account.quota.get();
    let mut revenue_change = 0;
    if quota != 0 {
        let total_quoted = params.total_quoted.get();
        let new_total = total_quoted.saturating_sub(quota);
        revenue_change = calc_quota_revenue_change(params.rate, total_quoted, new_total)?;
        params.total_quoted = U128::new(new_total);
        account.quota = U128::ZERO;
    }
    if set_limit_to_zero {
        params.limit = U128::ZERO;
    }
    Ok(revenue_change)
}

/// Re-baselines an account quota at the current index and returns the
/// interest accrued since the previous baseline.
pub fn accrue_quota_interest(params: &TokenQuotaParams, account: &mut AccountQuota, last_rate_update: u64, now: u64) -> Result<u128> {
    let index = index_now(params, last_rate_update, now)?;
    let interest = calc_accrued_quota_interest(account.quota.get(), index, account.cumulative_index_lu.get())?;
    account.cumulative_index_lu = U128::new(index);
    Ok(interest)
}

/// `(quota, interest accrued since the quota's last update)`.
pub fn get_quota_and_outstanding_interest(
    params: &TokenQuotaParams,
    account: &AccountQuota,
    last_rate_update: u64,
    now: u64,
) -> Result<(u128, u128)> {
    let quota = account.quota.get();
    if quota == 0 {
        return Ok((0, 0));
    }
    let index = index_now(params, last_rate_update, now)?;
    let interest = calc_accrued_quota_interest(quota, index, account.cumulative_index_lu.get())?;
    Ok((quota, interest))
}

/// Accrues the token's index at its old rate up to `now`, then switches to
/// `new_rate`. Returns the token's new annual revenue.
pub fn update_rate(params: &mut TokenQuotaParams, new_rate: u16, last_rate_update: u64, now: u64) -> Result<u128> {
    let index = index_now(params, last_rate_update, now)?;
    params.cumulative_index_lu = U128::new(index);
    params.rate = new_rate;
    params.quota_revenue()
}

pub fn set_token_limit(params: &mut TokenQuotaParams, limit: u128) -> Result<()> {
    if !params.is_initialized() {
        return Err(CreditError::TokenNotQuoted);
    }
    params.limit = U128::new(limit);
    Ok(())
}

pub fn set_quota_increase_fee(params: &mut TokenQuotaParams, fee: u16) -> Result<()> {
    if !params.is_initialized() {
        return Err(CreditError::TokenNotQuoted);
    }
    if fee as u128 > PERCENTAGE_FACTOR {
        return Err(CreditError::IncorrectParameter);
    }
    params.quota_increase_fee = fee;
    Ok(())
}
