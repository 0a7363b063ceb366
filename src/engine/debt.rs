//! Debt index algebra and repayment waterfall.
//!
//! Base interest compounds through a per-account index snapshot: an account
//! with principal `P` opened at index `I0` owes `P * Inow / I0` at index `Inow`.

use super::math::{self, mul_div, percent_mul, INDEX_PRECISION, PERCENTAGE_FACTOR};
use super::{CollateralDebtData, CreditError, Result};

/// Base interest owed on `debt` between two index values.
pub fn calc_accrued_interest(debt: u128, index_last_update: u128, index_now: u128) -> Result<u128> {
    if debt == 0 {
        return Ok(0);
    }
    if index_last_update == 0 {
        return Err(CreditError::DivisionByZero);
    }
    let grown = mul_div(debt, index_now, index_last_update)?;
    Ok(grown.saturating_sub(debt))
}

/// Adds `amount` to the principal and re-derives the account index so that
/// interest accrued so far is preserved exactly.
///
/// Returns `(new_debt, new_index)`.
pub fn calc_increase(amount: u128, debt: u128, index_now: u128, index_last_update: u128) -> Result<(u128, u128)> {
    if debt == 0 {
        return Ok((amount, index_now));
    }
    if index_last_update == 0 {
        return Err(CreditError::DivisionByZero);
    }
    let new_debt = math::add(debt, amount)?;

    let scaled_now = math::mul(index_now, INDEX_PRECISION)?;
    let denominator = math::add(
        mul_div(scaled_now, debt, index_last_update)?,
        math::mul(INDEX_PRECISION, amount)?,
    )?;
    let new_index = mul_div(scaled_now, new_debt, denominator)?;
    Ok((new_debt, new_index))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecreaseOutcome {
    pub new_debt: u128,
    pub new_index: u128,
    /// Protocol share of the repayment
    pub profit: u128,
    pub new_cumulative_quota_interest: u128,
    pub new_quota_fees: u128,
}

/// Applies a repayment of `amount` in strict order: quota fees, quota
/// interest, base interest, principal.
///
/// Interest buckets are owed together with the protocol's `fee_interest`
/// share. A partial payment of an interest bucket is split pro-rata, with
/// `fee_interest / (100% + fee_interest)` going to profit. Any amount left
/// past the principal is ignored; callers cap repayments at the total debt.
pub fn calc_decrease(
    amount: u128,
    debt: u128,
    index_now: u128,
    index_last_update: u128,
    cumulative_quota_interest: u128,
    quota_fees: u128,
    fee_interest: u16,
) -> Result<DecreaseOutcome> {
    let mut remaining = amount;

    // 1. quota fees go to the protocol in full
    let (new_quota_fees, mut profit) = if remaining > quota_fees {
        remaining -= quota_fees;
        (0, quota_fees)
    } else {
        let paid = remaining;
        remaining = 0;
        (quota_fees - paid, paid)
    };

    // 2. quota interest
    let new_cumulative_quota_interest = if cumulative_quota_interest != 0 && remaining != 0 {
        let quota_profit = percent_mul(cumulative_quota_interest, fee_interest)?;
        let owed = math::add(cumulative_quota_interest, quota_profit)?;
        if remaining >= owed {
            remaining -= owed;
            profit = math::add(profit, quota_profit)?;
            0
        } else {
            let to_pool = to_pool_share(remaining, fee_interest)?;
            profit = math::add(profit, remaining - to_pool)?;
            remaining = 0;
            cumulative_quota_interest.saturating_sub(to_pool)
        }
    } else {
        cumulative_quota_interest
    };

    // 3. base interest
    let new_index = if remaining != 0 {
        let interest = calc_accrued_interest(debt, index_last_update, index_now)?;
        let interest_profit = percent_mul(interest, fee_interest)?;
        let owed = math::add(interest, interest_profit)?;
        if remaining >= owed {
            remaining -= owed;
            profit = math::add(profit, interest_profit)?;
            index_now
        } else {
            let to_pool = to_pool_share(remaining, fee_interest)?;
            profit = math::add(profit, remaining - to_pool)?;
            remaining = 0;
            reindex_after_interest_payment(to_pool, debt, index_now, index_last_update)?
        }
    } else {
        index_last_update
    };

    // 4. principal
    let new_debt = debt.saturating_sub(remaining);

    Ok(DecreaseOutcome {
        new_debt,
        new_index,
        profit,
        new_cumulative_quota_interest,
        new_quota_fees,
    })
}

/// Part of a partial interest payment that goes to the pool.
fn to_pool_share(paid: u128, fee_interest: u16) -> Result<u128> {
    mul_div(paid, PERCENTAGE_FACTOR, PERCENTAGE_FACTOR + fee_interest as u128)
}

/// New index after `paid` of base interest is repaid while `debt` stays put:
/// `I0' = Inow * I0 / (Inow - paid * I0 / debt)`.
fn reindex_after_interest_payment(paid: u128, debt: u128, index_now: u128, index_last_update: u128) -> Result<u128> {
    if debt == 0 {
        return Err(CreditError::DivisionByZero);
    }
    let scaled_now = math::mul(INDEX_PRECISION, index_now)?;
    let scaled_paid = mul_div(math::mul(INDEX_PRECISION, paid)?, index_last_update, debt)?;
    let denominator = math::sub(scaled_now, scaled_paid)?;
    mul_div(scaled_now, index_last_update, denominator)
}

/// How the proceeds of a close or liquidation are split.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClosePayments {
    /// Sent to the pool, transfer fee included
    pub amount_to_pool: u128,
    /// Returned to the borrower
    pub remaining_funds: u128,
    pub profit: u128,
    pub loss: u128,
}

/// Voluntary close: the pool receives the full debt, the protocol keeps the fees.
pub fn calc_close_payments(data: &CollateralDebtData, amount_with_fee: impl Fn(u128) -> u128) -> Result<ClosePayments> {
    let total_debt = data.calc_total_debt()?;
    Ok(ClosePayments {
        amount_to_pool: amount_with_fee(total_debt),
        remaining_funds: 0,
        profit: data.accrued_fees,
        loss: 0,
    })
}

/// Liquidation: the liquidator buys the assets at `liquidation_discount` of
/// their value. The pool receives the total debt plus `fee_liquidation` of the
/// undiscounted value, capped at the discounted value; the surplus less one
/// unit of dust goes back to the borrower.
pub fn calc_liquidation_payments(
    data: &CollateralDebtData,
    fee_liquidation: u16,
    liquidation_discount: u16,
    amount_with_fee: impl Fn(u128) -> u128,
) -> Result<ClosePayments> {
    let total_value = data.total_value;
    let debt_with_interest = data.debt_with_interest()?;
    let total_funds = percent_mul(total_value, liquidation_discount)?;

    let mut amount_to_pool = math::add(data.calc_total_debt()?, percent_mul(total_value, fee_liquidation)?)?;
    let mut remaining_funds = 0;
    if total_funds > amount_to_pool {
        remaining_funds = total_funds - amount_to_pool - 1;
    } else {
        amount_to_pool = total_funds;
    }

    let (profit, loss) = if total_funds >= debt_with_interest {
        (amount_to_pool - debt_with_interest, 0)
    } else {
        (0, debt_with_interest - amount_to_pool)
    };

    Ok(ClosePayments {
        amount_to_pool: amount_with_fee(amount_to_pool),
        remaining_funds,
        profit,
        loss,
    })
}
