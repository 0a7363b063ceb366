//! Credit manager: applies engine results to persistent manager and account state.
//!
//! Every operation reads the records, builds a [`CollateralDebtData`] snapshot,
//! runs it through the engine, then writes the new figures back. Nothing here
//! does arithmetic of its own beyond bookkeeping.

use bytemuck::Zeroable;

use crate::engine::collateral::{self, LiquidationThreshold};
use crate::engine::debt::{self, ClosePayments};
use crate::engine::math::{self, mul_div, percent_mul};
use crate::engine::quota::{self, QuotaUpdate};
use crate::engine::{
    mask, safe_approve, safe_transfer, BalanceSource, CollateralCalcTask, CollateralDebtData, CollateralTokens,
    CreditError, PriceOracle, QuotedToken, Result, TokenId, TokenTransfer, MAX_TOKENS, PERCENTAGE_FACTOR, RAY,
    SECONDS_PER_YEAR, U128, UNDERLYING_TOKEN_MASK,
};
use crate::state::{
    CollateralToken, CreditAccountRecord, ManagerParams, ManagerState, PoolState, ACCOUNT_OPEN_FLAG, TOKEN_QUOTED_FLAG,
    TOKEN_REGISTERED_FLAG,
};

/// 100% as a health factor.
const HF_ONE: u16 = PERCENTAGE_FACTOR as u16;

// ============================================================================
// Token registry
// ============================================================================

/// Registry view that evaluates liquidation-threshold ramps at a fixed time.
pub struct TokenRegistry<'a> {
    state: &'a ManagerState,
    now: u64,
}

impl<'a> TokenRegistry<'a> {
    pub fn new(state: &'a ManagerState, now: u64) -> Self {
        Self { state, now }
    }
}

impl CollateralTokens for TokenRegistry<'_> {
    fn token_and_threshold_by_mask(&self, token_mask: u64, compute_ramped_lt: bool) -> Result<(TokenId, u16)> {
        let token = self.state.token_by_mask(token_mask)?;
        let lt = if compute_ramped_lt { token.lt.current(self.now) } else { 0 };
        Ok((token.mint, lt))
    }
}

impl ManagerState {
    /// Sets parameters, registers the underlying in slot 0 and starts the
    /// base index at `RAY`.
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        &mut self,
        params: ManagerParams,
        underlying: TokenId,
        underlying_oracle: TokenId,
        underlying_decimals: u8,
        lt_underlying: u16,
        base_interest_rate: u128,
        now: u64,
    ) -> Result<()> {
        validate_params(&params, lt_underlying)?;

        self.params = params;
        self.pool = PoolState {
            base_interest_index_lu: U128::new(RAY),
            base_interest_rate: U128::new(base_interest_rate),
            last_base_interest_update: now,
            last_quota_rate_update: now,
            ..PoolState::default()
        };
        self.header.underlying = underlying;
        self.tokens[0] = CollateralToken {
            mint: underlying,
            oracle: underlying_oracle,
            lt: LiquidationThreshold::fixed(lt_underlying),
            decimals: underlying_decimals,
            flags: TOKEN_REGISTERED_FLAG,
            ..CollateralToken::default()
        };
        self.token_count = 1;
        self.quoted_tokens_mask = 0;
        Ok(())
    }

    pub fn add_collateral_token(&mut self, mint: TokenId, oracle: TokenId, decimals: u8, lt: u16, quoted: bool) -> Result<u64> {
        if self.find_token(&mint).is_some() {
            return Err(CreditError::IncorrectParameter);
        }
        self.check_collateral_lt(lt)?;

        let idx = self.token_count as usize;
        let token_mask = mask::mask_of(idx)?;

        let mut token = CollateralToken {
            mint,
            oracle,
            lt: LiquidationThreshold::fixed(lt),
            decimals,
            flags: TOKEN_REGISTERED_FLAG,
            ..CollateralToken::default()
        };
        if quoted {
            quota::add_quota_token(&mut token.quota)?;
            token.flags |= TOKEN_QUOTED_FLAG;
            self.quoted_tokens_mask = mask::enable(self.quoted_tokens_mask, token_mask);
        }

        self.tokens[idx] = token;
        self.token_count += 1;
        Ok(token_mask)
    }

    /// Starts a linear move of a collateral token's LT from its current value
    /// to `lt_final`. A zero duration sets `lt_final` at once.
    pub fn ramp_liquidation_threshold(
        &mut self,
        token_mask: u64,
        lt_final: u16,
        ramp_start: u64,
        ramp_duration: u32,
        now: u64,
    ) -> Result<()> {
        if token_mask == UNDERLYING_TOKEN_MASK {
            return Err(CreditError::IncorrectLiquidationThreshold);
        }
        self.check_collateral_lt(lt_final)?;

        let token = self.token_by_mask_mut(token_mask)?;
        token.lt = if ramp_duration == 0 {
            LiquidationThreshold::fixed(lt_final)
        } else {
            LiquidationThreshold {
                ramp_start: ramp_start.max(now),
                lt_initial: token.lt.current(now),
                lt_final,
                ramp_duration,
            }
        };
        Ok(())
    }

    pub fn find_token(&self, mint: &TokenId) -> Option<usize> {
        self.tokens[..self.registered_tokens()].iter().position(|t| &t.mint == mint)
    }

    pub fn token_mask(&self, mint: &TokenId) -> Result<u64> {
        let idx = self.find_token(mint).ok_or(CreditError::UnregisteredToken)?;
        mask::mask_of(idx)
    }

    pub fn token_by_mask(&self, token_mask: u64) -> Result<&CollateralToken> {
        let idx = self.slot_of(token_mask)?;
        Ok(&self.tokens[idx])
    }

    fn token_by_mask_mut(&mut self, token_mask: u64) -> Result<&mut CollateralToken> {
        let idx = self.slot_of(token_mask)?;
        Ok(&mut self.tokens[idx])
    }

    fn slot_of(&self, token_mask: u64) -> Result<usize> {
        let idx = mask::calc_index(token_mask).map_err(|_| CreditError::UnregisteredToken)? as usize;
        if idx >= self.registered_tokens() {
            return Err(CreditError::UnregisteredToken);
        }
        Ok(idx)
    }

    pub fn registered_tokens(&self) -> usize {
        (self.token_count as usize).min(MAX_TOKENS)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.params.expiration_date != 0 && now >= self.params.expiration_date
    }

    fn check_collateral_lt(&self, lt: u16) -> Result<()> {
        let lt_underlying = self.tokens[0].lt.current(0);
        if lt > lt_underlying {
            return Err(CreditError::IncorrectLiquidationThreshold);
        }
        Ok(())
    }

    fn check_debt_limits(&self, new_debt: u128) -> Result<()> {
        if new_debt != 0 && (new_debt < self.params.min_debt.get() || new_debt > self.params.max_debt.get()) {
            return Err(CreditError::BorrowAmountOutOfLimits);
        }
        Ok(())
    }

    fn save_enabled_tokens_mask(&self, account: &mut CreditAccountRecord, enabled_tokens_mask: u64) -> Result<()> {
        if mask::calc_enabled_tokens(enabled_tokens_mask) > self.params.max_enabled_tokens as u32 {
            return Err(CreditError::TooManyEnabledTokens);
        }
        account.enabled_tokens_mask = enabled_tokens_mask;
        Ok(())
    }

    // ========================================================================
    // Quota keeper
    // ========================================================================

    /// Sets a token's quota limit and increase fee, quoting it on first use.
    pub fn set_quota_params(&mut self, token_mask: u64, limit: u128, quota_increase_fee: u16) -> Result<()> {
        if token_mask == UNDERLYING_TOKEN_MASK || quota_increase_fee > HF_ONE {
            return Err(CreditError::IncorrectParameter);
        }
        let token = self.token_by_mask_mut(token_mask)?;
        if !token.quota.is_initialized() {
            quota::add_quota_token(&mut token.quota)?;
            token.flags |= TOKEN_QUOTED_FLAG;
        }
        quota::set_token_limit(&mut token.quota, limit)?;
        quota::set_quota_increase_fee(&mut token.quota, quota_increase_fee)?;
        self.quoted_tokens_mask = mask::enable(self.quoted_tokens_mask, token_mask);
        Ok(())
    }

    /// Accrues every quoted token at its old rate, applies `rates` given as
    /// `(token_mask, rate_bps)` pairs and re-baselines the shared timestamp.
    /// Returns the pool's new annual quota revenue.
    pub fn update_quota_rates(&mut self, rates: &[(u64, u16)], now: u64) -> Result<u128> {
        for (token_mask, _) in rates {
            if token_mask & self.quoted_tokens_mask == 0 || mask::calc_enabled_tokens(*token_mask) != 1 {
                return Err(CreditError::TokenNotQuoted);
            }
        }

        let last = self.pool.last_quota_rate_update;
        let mut revenue: u128 = 0;
        for bit in mask::iter_bits(self.quoted_tokens_mask) {
            let idx = self.slot_of(bit)?;
            let params = &mut self.tokens[idx].quota;
            let new_rate = rates.iter().find(|(m, _)| *m == bit).map(|(_, r)| *r).unwrap_or(params.rate);
            revenue = math::add(revenue, quota::update_rate(params, new_rate, last, now)?)?;
        }

        self.pool.quota_revenue = U128::new(revenue);
        self.pool.last_quota_rate_update = now;
        Ok(revenue)
    }

    // ========================================================================
    // Pool
    // ========================================================================

    pub fn set_base_interest_rate(&mut self, rate: u128, now: u64) -> Result<()> {
        self.pool.set_base_interest_rate(rate, now)
    }

    // ========================================================================
    // Credit accounts
    // ========================================================================

    pub fn open_credit_account(
        &self,
        account: &mut CreditAccountRecord,
        borrower: TokenId,
        authority: TokenId,
        authority_bump: u8,
        now: u64,
    ) -> Result<()> {
        if account.is_open() {
            return Err(CreditError::AccountAlreadyOpen);
        }
        if self.is_expired(now) {
            return Err(CreditError::ManagerExpired);
        }
        *account = CreditAccountRecord {
            magic: account.magic,
            manager: account.manager,
            flags: ACCOUNT_OPEN_FLAG,
            borrower,
            authority,
            authority_bump,
            last_debt_update: now,
            ..CreditAccountRecord::zeroed()
        };
        Ok(())
    }

    /// Builds the debt and collateral snapshot for `account`.
    ///
    /// `min_health_factor` only matters for the lazy task, where valuation
    /// stops once the weighted value covers `total_debt_usd * min_hf`.
    #[allow(clippy::too_many_arguments)]
    pub fn calc_debt_and_collateral<O: PriceOracle, B: BalanceSource>(
        &self,
        account: &CreditAccountRecord,
        task: CollateralCalcTask,
        hints: &[u64],
        min_health_factor: u16,
        now: u64,
        oracle: &O,
        balances: &B,
    ) -> Result<CollateralDebtData> {
        let mut data = CollateralDebtData {
            debt: account.debt.get(),
            cumulative_index_now: self.pool.base_interest_index(now)?,
            cumulative_index_last_update: account.cumulative_index_last_update.get(),
            ..CollateralDebtData::default()
        };
        if task == CollateralCalcTask::GenericParams {
            return Ok(data);
        }

        data.enabled_tokens_mask = account.enabled_tokens_mask;
        data.quoted_tokens_mask = self.quoted_tokens_mask;
        let (quoted_tokens, outstanding) = self.quoted_tokens_data(account, now)?;
        data.quoted_tokens = quoted_tokens;
        data.cumulative_quota_interest = math::add(account.cumulative_quota_interest.get(), outstanding)?;

        let base_interest =
            debt::calc_accrued_interest(data.debt, data.cumulative_index_last_update, data.cumulative_index_now)?;
        data.accrued_interest = math::add(base_interest, data.cumulative_quota_interest)?;
        data.accrued_fees = math::add(
            account.quota_fees.get(),
            percent_mul(data.accrued_interest, self.params.fee_interest)?,
        )?;
        if task == CollateralCalcTask::DebtOnly {
            return Ok(data);
        }

        let lazy = task == CollateralCalcTask::FullCollateralCheckLazy;
        let underlying = self.header.underlying;
        let total_debt = data.calc_total_debt()?;
        if total_debt != 0 {
            data.total_debt_usd = oracle.convert_to_usd(total_debt, &underlying)?;
        } else if lazy {
            return Ok(data);
        }

        let target_usd = if lazy {
            mul_div(data.total_debt_usd, min_health_factor as u128, PERCENTAGE_FACTOR)?
        } else {
            u128::MAX
        };
        let registry = TokenRegistry::new(self, now);
        let out = collateral::calc_collateral(
            &data,
            &account.authority,
            &underlying,
            target_usd,
            hints,
            &registry,
            oracle,
            balances,
        )?;
        data.total_value_usd = out.total_value_usd;
        data.twv_usd = out.twv_usd;
        data.enabled_tokens_mask = mask::disable(data.enabled_tokens_mask, out.tokens_to_disable);
        if lazy {
            return Ok(data);
        }

        data.total_value = oracle.convert_from_usd(data.total_value_usd, &underlying)?;
        Ok(data)
    }

    /// Quoted tokens enabled on `account` and the quota interest they accrued
    /// since their last update.
    fn quoted_tokens_data(&self, account: &CreditAccountRecord, now: u64) -> Result<(Vec<QuotedToken>, u128)> {
        let limit = self.params.max_enabled_tokens as usize;
        let mut quoted = Vec::with_capacity(limit);
        let mut outstanding: u128 = 0;

        for bit in mask::iter_bits(account.enabled_tokens_mask & self.quoted_tokens_mask) {
            if quoted.len() >= limit {
                return Err(CreditError::TooManyEnabledTokens);
            }
            let idx = self.slot_of(bit)?;
            let token = &self.tokens[idx];
            let (amount, interest) = quota::get_quota_and_outstanding_interest(
                &token.quota,
                &account.quotas[idx],
                self.pool.last_quota_rate_update,
                now,
            )?;
            outstanding = math::add(outstanding, interest)?;
            quoted.push(QuotedToken {
                token: token.mint,
                mask: bit,
                quota: amount,
                liquidation_threshold: token.lt.current(now),
            });
        }
        Ok((quoted, outstanding))
    }

    /// Requires weighted collateral of at least `total_debt * min_health_factor`,
    /// drops zero-balance tokens from the enabled set and enforces the
    /// enabled-token cap.
    #[allow(clippy::too_many_arguments)]
    pub fn full_collateral_check<O: PriceOracle, B: BalanceSource>(
        &self,
        account: &mut CreditAccountRecord,
        hints: &[u64],
        min_health_factor: u16,
        now: u64,
        oracle: &O,
        balances: &B,
    ) -> Result<CollateralDebtData> {
        if min_health_factor < HF_ONE {
            return Err(CreditError::CustomHealthFactorTooLow);
        }
        let data = self.calc_debt_and_collateral(
            account,
            CollateralCalcTask::FullCollateralCheckLazy,
            hints,
            min_health_factor,
            now,
            oracle,
            balances,
        )?;
        let required = mul_div(data.total_debt_usd, min_health_factor as u128, PERCENTAGE_FACTOR)?;
        if data.twv_usd < required {
            return Err(CreditError::NotEnoughCollateral);
        }
        self.save_enabled_tokens_mask(account, data.enabled_tokens_mask)?;
        Ok(data)
    }

    pub fn calc_health_factor<O: PriceOracle, B: BalanceSource>(
        &self,
        account: &CreditAccountRecord,
        now: u64,
        oracle: &O,
        balances: &B,
    ) -> Result<u128> {
        let data = self.calc_debt_and_collateral(account, CollateralCalcTask::DebtCollateral, &[], HF_ONE, now, oracle, balances)?;
        collateral::calc_health_factor(data.twv_usd, data.total_debt_usd)
    }

    /// Health factor below 100%, or an expired manager with debt outstanding.
    pub fn is_liquidatable<O: PriceOracle, B: BalanceSource>(
        &self,
        account: &CreditAccountRecord,
        now: u64,
        oracle: &O,
        balances: &B,
    ) -> Result<bool> {
        let data = self.calc_debt_and_collateral(account, CollateralCalcTask::DebtCollateral, &[], HF_ONE, now, oracle, balances)?;
        Ok(data.twv_usd < data.total_debt_usd || (self.is_expired(now) && data.debt != 0))
    }

    /// Moves `amount` of `mint` from `payer` to the account. Quoted tokens are
    /// enabled only through their quota.
    pub fn add_collateral<L: TokenTransfer>(
        &self,
        account: &mut CreditAccountRecord,
        mint: &TokenId,
        amount: u128,
        payer: &TokenId,
        ledger: &mut L,
    ) -> Result<u64> {
        ensure_open(account)?;
        let token_mask = self.token_mask(mint)?;
        safe_transfer(ledger, mint, payer, &account.authority, amount)?;

        let to_enable = mask::disable(token_mask, self.quoted_tokens_mask);
        self.save_enabled_tokens_mask(account, mask::enable(account.enabled_tokens_mask, to_enable))?;
        Ok(token_mask)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn withdraw_collateral<O: PriceOracle, L: TokenTransfer>(
        &self,
        account: &mut CreditAccountRecord,
        mint: &TokenId,
        amount: u128,
        to: &TokenId,
        now: u64,
        oracle: &O,
        ledger: &mut L,
    ) -> Result<()> {
        ensure_open(account)?;
        self.token_mask(mint)?;
        safe_transfer(ledger, mint, &account.authority, to, amount)?;
        self.full_collateral_check(account, &[], HF_ONE, now, oracle, &*ledger)?;
        Ok(())
    }

    /// Borrows `amount` of the underlying from the pool into the account.
    pub fn increase_debt<O: PriceOracle, L: TokenTransfer>(
        &mut self,
        account: &mut CreditAccountRecord,
        amount: u128,
        now: u64,
        oracle: &O,
        ledger: &mut L,
    ) -> Result<u128> {
        ensure_open(account)?;
        if self.is_expired(now) {
            return Err(CreditError::ManagerExpired);
        }

        let index_now = self.pool.base_interest_index(now)?;
        let (new_debt, new_index) =
            debt::calc_increase(amount, account.debt.get(), index_now, account.cumulative_index_last_update.get())?;
        self.check_debt_limits(new_debt)?;

        let underlying = self.header.underlying;
        safe_transfer(ledger, &underlying, &self.header.pool_authority, &account.authority, amount)?;
        self.pool.lend(amount)?;

        account.debt = U128::new(new_debt);
        account.cumulative_index_last_update = U128::new(new_index);
        account.last_debt_update = now;
        account.enabled_tokens_mask = mask::enable(account.enabled_tokens_mask, UNDERLYING_TOKEN_MASK);

        self.full_collateral_check(account, &[], HF_ONE, now, oracle, &*ledger)?;
        Ok(new_debt)
    }

    /// Repays up to `amount` of the underlying from the account to the pool.
    /// Repayments are capped at the total debt. Returns the amount sent.
    pub fn decrease_debt<O: PriceOracle, L: TokenTransfer>(
        &mut self,
        account: &mut CreditAccountRecord,
        amount: u128,
        now: u64,
        oracle: &O,
        ledger: &mut L,
    ) -> Result<u128> {
        ensure_open(account)?;
        let data = self.calc_debt_and_collateral(account, CollateralCalcTask::DebtOnly, &[], HF_ONE, now, oracle, &*ledger)?;
        let underlying = self.header.underlying;

        let max_repayment = ledger.amount_with_fee(&underlying, data.calc_total_debt()?);
        let amount = amount.min(max_repayment);

        let outcome = if amount == max_repayment {
            debt::DecreaseOutcome {
                new_debt: 0,
                new_index: data.cumulative_index_now,
                profit: data.accrued_fees,
                new_cumulative_quota_interest: 0,
                new_quota_fees: 0,
            }
        } else {
            debt::calc_decrease(
                ledger.amount_minus_fee(&underlying, amount),
                data.debt,
                data.cumulative_index_now,
                data.cumulative_index_last_update,
                data.cumulative_quota_interest,
                account.quota_fees.get(),
                self.params.fee_interest,
            )?
        };

        if outcome.new_debt == 0 && account.enabled_tokens_mask & self.quoted_tokens_mask != 0 {
            return Err(CreditError::DebtToZeroWithActiveQuotas);
        }
        self.check_debt_limits(outcome.new_debt)?;

        safe_transfer(ledger, &underlying, &account.authority, &self.header.pool_authority, amount)?;
        self.pool.repay(data.debt - outcome.new_debt, outcome.profit, 0)?;

        // quota interest up to now is folded into the stored figure
        let last = self.pool.last_quota_rate_update;
        for q in &data.quoted_tokens {
            let idx = self.slot_of(q.mask)?;
            quota::accrue_quota_interest(&self.tokens[idx].quota, &mut account.quotas[idx], last, now)?;
        }

        account.debt = U128::new(outcome.new_debt);
        account.cumulative_index_last_update = U128::new(outcome.new_index);
        account.cumulative_quota_interest = U128::new(outcome.new_cumulative_quota_interest);
        account.quota_fees = U128::new(outcome.new_quota_fees);
        account.last_debt_update = now;

        if ledger.balance_of(&underlying, &account.authority)? <= 1 {
            account.enabled_tokens_mask = mask::disable(account.enabled_tokens_mask, UNDERLYING_TOKEN_MASK);
        }
        if outcome.new_debt != 0 {
            self.full_collateral_check(account, &[], HF_ONE, now, oracle, &*ledger)?;
        }
        Ok(amount)
    }

    /// Changes the account's quota on `mint` by `change` (`i128::MIN` removes it).
    /// Increases are bounded by `debt * max_quota_multiplier`.
    #[allow(clippy::too_many_arguments)]
    pub fn update_quota<O: PriceOracle, B: BalanceSource>(
        &mut self,
        account: &mut CreditAccountRecord,
        mint: &TokenId,
        change: i128,
        min_quota: u128,
        now: u64,
        oracle: &O,
        balances: &B,
    ) -> Result<QuotaUpdate> {
        ensure_open(account)?;
        let token_mask = self.token_mask(mint)?;
        if token_mask & self.quoted_tokens_mask == 0 {
            return Err(CreditError::TokenNotQuoted);
        }
        let idx = self.slot_of(token_mask)?;

        let max_quota = if change > 0 {
            account.debt.get().saturating_mul(self.params.max_quota_multiplier as u128)
        } else {
            u128::MAX
        };
        let update = quota::update_quota(
            &mut self.tokens[idx].quota,
            &mut account.quotas[idx],
            change,
            min_quota,
            max_quota,
            self.pool.last_quota_rate_update,
            now,
        )?;

        account.cumulative_quota_interest =
            U128::new(math::add(account.cumulative_quota_interest.get(), update.interest_change)?);
        account.quota_fees = U128::new(math::add(account.quota_fees.get(), update.fees)?);
        self.pool.apply_quota_revenue_change(update.revenue_change)?;

        if update.enable_token {
            self.save_enabled_tokens_mask(account, mask::enable(account.enabled_tokens_mask, token_mask))?;
        } else if update.disable_token {
            account.enabled_tokens_mask = mask::disable(account.enabled_tokens_mask, token_mask);
        }

        self.full_collateral_check(account, &[], HF_ONE, now, oracle, balances)?;
        Ok(update)
    }

    /// Lets `spender` move the account's `mint` balance.
    pub fn approve_token<L: TokenTransfer>(
        &self,
        account: &CreditAccountRecord,
        mint: &TokenId,
        spender: &TokenId,
        amount: u128,
        ledger: &mut L,
    ) -> Result<()> {
        ensure_open(account)?;
        self.token_mask(mint)?;
        safe_approve(ledger, mint, &account.authority, spender, amount)
    }

    /// Liquidates an unhealthy or expired account. The liquidator covers any
    /// underlying shortfall and receives every remaining asset.
    pub fn liquidate_credit_account<O: PriceOracle, L: TokenTransfer>(
        &mut self,
        account: &mut CreditAccountRecord,
        liquidator: &TokenId,
        now: u64,
        oracle: &O,
        ledger: &mut L,
    ) -> Result<ClosePayments> {
        ensure_open(account)?;
        let data = self.calc_debt_and_collateral(account, CollateralCalcTask::DebtCollateral, &[], HF_ONE, now, oracle, &*ledger)?;

        let expired = self.is_expired(now) && data.debt != 0;
        if !expired && data.twv_usd >= data.total_debt_usd {
            return Err(CreditError::NotLiquidatable);
        }

        let (fee, discount) = if expired {
            (self.params.fee_liquidation_expired, self.params.liquidation_discount_expired)
        } else {
            (self.params.fee_liquidation, self.params.liquidation_discount)
        };
        let underlying = self.header.underlying;
        let payments =
            debt::calc_liquidation_payments(&data, fee, discount, |a| ledger.amount_with_fee(&underlying, a))?;

        self.settle(account, &data, &payments, liquidator, liquidator, payments.loss > 0, ledger)?;
        Ok(payments)
    }

    /// Repays everything and returns the account's assets to the borrower.
    pub fn close_credit_account<O: PriceOracle, L: TokenTransfer>(
        &mut self,
        account: &mut CreditAccountRecord,
        now: u64,
        oracle: &O,
        ledger: &mut L,
    ) -> Result<ClosePayments> {
        ensure_open(account)?;
        let data = self.calc_debt_and_collateral(account, CollateralCalcTask::DebtOnly, &[], HF_ONE, now, oracle, &*ledger)?;
        let underlying = self.header.underlying;
        let payments = debt::calc_close_payments(&data, |a| ledger.amount_with_fee(&underlying, a))?;

        let borrower = account.borrower;
        self.settle(account, &data, &payments, &borrower, &borrower, false, ledger)?;
        Ok(payments)
    }

    /// Pays the pool and the borrower out of the account's underlying
    /// (topped up by `payer` when short), removes quotas, hands the remaining
    /// assets to `to` and closes the account.
    #[allow(clippy::too_many_arguments)]
    fn settle<L: TokenTransfer>(
        &mut self,
        account: &mut CreditAccountRecord,
        data: &CollateralDebtData,
        payments: &ClosePayments,
        payer: &TokenId,
        to: &TokenId,
        set_limits_to_zero: bool,
        ledger: &mut L,
    ) -> Result<()> {
        let underlying = self.header.underlying;
        let pool_authority = self.header.pool_authority;
        let authority = account.authority;
        let borrower = account.borrower;

        let needed = math::add(math::add(payments.amount_to_pool, payments.remaining_funds)?, 1)?;
        let balance = ledger.balance_of(&underlying, &authority)?;
        if balance < needed {
            safe_transfer(ledger, &underlying, payer, &authority, needed - balance)?;
        }
        safe_transfer(ledger, &underlying, &authority, &pool_authority, payments.amount_to_pool)?;
        safe_transfer(ledger, &underlying, &authority, &borrower, payments.remaining_funds)?;

        self.pool.repay(data.debt, payments.profit, payments.loss)?;

        for q in &data.quoted_tokens {
            let idx = self.slot_of(q.mask)?;
            let change = quota::remove_quota(&mut self.tokens[idx].quota, &mut account.quotas[idx], set_limits_to_zero)?;
            self.pool.apply_quota_revenue_change(change)?;
        }

        for bit in mask::iter_bits(mask::enable(account.enabled_tokens_mask, UNDERLYING_TOKEN_MASK)) {
            let token = self.token_by_mask(bit)?.mint;
            let held = ledger.balance_of(&token, &authority)?;
            if held > 1 {
                safe_transfer(ledger, &token, &authority, to, held - 1)?;
            }
        }

        *account = CreditAccountRecord {
            magic: account.magic,
            manager: account.manager,
            borrower,
            authority,
            authority_bump: account.authority_bump,
            last_debt_update: account.last_debt_update,
            ..CreditAccountRecord::zeroed()
        };
        Ok(())
    }
}

fn ensure_open(account: &CreditAccountRecord) -> Result<()> {
    if !account.is_open() {
        return Err(CreditError::AccountNotOpen);
    }
    Ok(())
}

fn validate_params(params: &ManagerParams, lt_underlying: u16) -> Result<()> {
    let pf = HF_ONE;
    if params.fee_interest > pf
        || params.liquidation_discount > pf
        || params.liquidation_discount_expired > pf
        || params.fee_liquidation > params.liquidation_discount
        || params.fee_liquidation_expired > params.liquidation_discount_expired
        || params.max_enabled_tokens == 0
        || params.min_debt.get() > params.max_debt.get()
    {
        return Err(CreditError::IncorrectParameter);
    }
    if lt_underlying > params.liquidation_discount - params.fee_liquidation {
        return Err(CreditError::IncorrectLiquidationThreshold);
    }
    Ok(())
}

// ============================================================================
// Pool accounting
// ============================================================================

impl PoolState {
    /// Base index grows linearly from the last rate change.
    pub fn base_interest_index(&self, now: u64) -> Result<u128> {
        let dt = now.saturating_sub(self.last_base_interest_update) as u128;
        let growth = mul_div(self.base_interest_rate.get(), dt, SECONDS_PER_YEAR)?;
        mul_div(self.base_interest_index_lu.get(), math::add(RAY, growth)?, RAY)
    }

    /// Compounds the index up to `now`, then switches rate.
    pub fn set_base_interest_rate(&mut self, rate: u128, now: u64) -> Result<()> {
        self.base_interest_index_lu = U128::new(self.base_interest_index(now)?);
        self.base_interest_rate = U128::new(rate);
        self.last_base_interest_update = now;
        Ok(())
    }

    pub fn lend(&mut self, amount: u128) -> Result<()> {
        self.total_borrowed = U128::new(math::add(self.total_borrowed.get(), amount)?);
        Ok(())
    }

    pub fn repay(&mut self, repaid_debt: u128, profit: u128, loss: u128) -> Result<()> {
        self.total_borrowed = U128::new(self.total_borrowed.get().saturating_sub(repaid_debt));
        self.treasury_profit = U128::new(math::add(self.treasury_profit.get(), profit)?);
        self.total_losses = U128::new(math::add(self.total_losses.get(), loss)?);
        Ok(())
    }

    pub fn apply_quota_revenue_change(&mut self, change: i128) -> Result<()> {
        let revenue = self.quota_revenue.get().checked_add_signed(change).ok_or(CreditError::Overflow)?;
        self.quota_revenue = U128::new(revenue);
        Ok(())
    }
}
