use super::{math, Result, TokenId};

/// How much of the snapshot a caller needs filled in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollateralCalcTask {
    /// Principal and both indices only
    GenericParams,
    /// Adds accrued interest, quota interest and fees
    DebtOnly,
    /// Full valuation of every enabled token
    DebtCollateral,
    /// Valuation stops once the weighted value covers the debt times the
    /// requested health factor
    FullCollateralCheckLazy,
}

/// A currently quoted token taking part in a valuation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotedToken {
    pub token: TokenId,
    pub mask: u64,
    pub quota: u128,
    pub liquidation_threshold: u16,
}

/// Transient debt and collateral figures for one account.
///
/// Built from persistent state at the start of an operation and threaded
/// through the engine; never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollateralDebtData {
    pub debt: u128,
    pub cumulative_index_now: u128,
    pub cumulative_index_last_update: u128,
    /// Stored quota interest plus interest accrued since each quota's last update
    pub cumulative_quota_interest: u128,
    /// Base interest plus quota interest
    pub accrued_interest: u128,
    /// Quota fees plus the protocol share of accrued interest
    pub accrued_fees: u128,
    pub total_debt_usd: u128,
    /// Total value converted back to the underlying token
    pub total_value: u128,
    pub total_value_usd: u128,
    pub twv_usd: u128,
    pub enabled_tokens_mask: u64,
    pub quoted_tokens_mask: u64,
    pub quoted_tokens: Vec<QuotedToken>,
}

impl CollateralDebtData {
    /// Principal plus all interest and fees.
    pub fn calc_total_debt(&self) -> Result<u128> {
        math::add(math::add(self.debt, self.accrued_interest)?, self.accrued_fees)
    }

    /// Principal plus interest, fees excluded.
    pub fn debt_with_interest(&self) -> Result<u128> {
        math::add(self.debt, self.accrued_interest)
    }
}
