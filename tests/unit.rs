//! Unit tests for the credit manager
//!
//! These tests drive the engine and the manager operations against an
//! in-memory price table and token ledger, without any Solana accounts.

use std::cell::Cell;
use std::collections::HashMap;

use bytemuck::Zeroable;
use credit_manager_prog::constants::ACCOUNT_MAGIC;
use credit_manager_prog::engine::collateral::{self, calc_collateral, calc_one_token_collateral};
use credit_manager_prog::engine::debt::{calc_decrease, calc_increase};
use credit_manager_prog::engine::math::mul_div;
use credit_manager_prog::engine::{
    mask, safe_approve, safe_transfer, BalanceSource, CollateralCalcTask, CollateralDebtData, CollateralTokens,
    CreditError, PriceOracle, QuotedToken, Result, TokenId, TokenTransfer, RAY, SECONDS_PER_YEAR, U128,
};
use credit_manager_prog::manager::TokenRegistry;
use credit_manager_prog::state::{CreditAccountRecord, ManagerParams, ManagerState};

// --- Harness ---

const UNIT: u128 = 1_000_000;
const USD: u128 = 100_000_000;
const YEAR: u64 = SECONDS_PER_YEAR as u64;
const T0: u64 = 1_700_000_000;

const UNDERLYING: TokenId = [1; 32];
const WETH: TokenId = [2; 32];
const QUOTED: TokenId = [3; 32];
const POOL: TokenId = [9; 32];
const ACCOUNT: TokenId = [10; 32];
const BORROWER: TokenId = [11; 32];
const LIQUIDATOR: TokenId = [12; 32];

const WETH_MASK: u64 = 0b10;
const QUOTED_MASK: u64 = 0b100;

/// Prices in USD (8 decimals) per whole token; every token has 6 decimals.
struct MockOracle {
    prices: HashMap<TokenId, u128>,
    calls: Cell<u32>,
}

impl MockOracle {
    fn new(prices: &[(TokenId, u128)]) -> Self {
        Self { prices: prices.iter().copied().collect(), calls: Cell::new(0) }
    }

    fn set_price(&mut self, token: TokenId, price: u128) {
        self.prices.insert(token, price);
    }

    fn price(&self, token: &TokenId) -> Result<u128> {
        self.calls.set(self.calls.get() + 1);
        self.prices.get(token).copied().ok_or(CreditError::PriceUnavailable)
    }
}

impl PriceOracle for MockOracle {
    fn convert_to_usd(&self, amount: u128, token: &TokenId) -> Result<u128> {
        let price = self.price(token)?;
        mul_div(amount, price, UNIT)
    }

    fn convert_from_usd(&self, amount_usd: u128, token: &TokenId) -> Result<u128> {
        let price = self.price(token)?;
        mul_div(amount_usd, UNIT, price)
    }
}

#[derive(Default)]
struct MockLedger {
    balances: HashMap<(TokenId, TokenId), u128>,
    allowances: HashMap<(TokenId, TokenId, TokenId), u128>,
    fail_transfers: bool,
    /// Rejects moving an allowance between two non-zero values
    strict_approve: bool,
    fail_approve: bool,
}

impl MockLedger {
    fn mint(&mut self, token: TokenId, holder: TokenId, amount: u128) {
        *self.balances.entry((token, holder)).or_default() += amount;
    }

    fn balance(&self, token: TokenId, holder: TokenId) -> u128 {
        self.balances.get(&(token, holder)).copied().unwrap_or(0)
    }

    fn allowance(&self, token: TokenId, owner: TokenId, spender: TokenId) -> u128 {
        self.allowances.get(&(token, owner, spender)).copied().unwrap_or(0)
    }
}

impl BalanceSource for MockLedger {
    fn balance_of(&self, token: &TokenId, holder: &TokenId) -> Result<u128> {
        Ok(self.balance(*token, *holder))
    }
}

impl TokenTransfer for MockLedger {
    fn transfer(&mut self, token: &TokenId, from: &TokenId, to: &TokenId, amount: u128) -> bool {
        let held = self.balance(*token, *from);
        if self.fail_transfers || held < amount {
            return false;
        }
        self.balances.insert((*token, *from), held - amount);
        self.mint(*token, *to, amount);
        true
    }

    fn approve(&mut self, token: &TokenId, owner: &TokenId, spender: &TokenId, amount: u128) -> bool {
        if self.fail_approve {
            return false;
        }
        let current = self.allowance(*token, *owner, *spender);
        if self.strict_approve && current != 0 && amount != 0 {
            return false;
        }
        self.allowances.insert((*token, *owner, *spender), amount);
        true
    }
}

/// Registry stand-in: slot `i` holds `tokens[i]`.
struct MockTokens(Vec<(TokenId, u16)>);

impl CollateralTokens for MockTokens {
    fn token_and_threshold_by_mask(&self, token_mask: u64, compute_ramped_lt: bool) -> Result<(TokenId, u16)> {
        let idx = mask::calc_index(token_mask)? as usize;
        let (token, lt) = self.0.get(idx).copied().ok_or(CreditError::UnregisteredToken)?;
        Ok((token, if compute_ramped_lt { lt } else { 0 }))
    }
}

fn default_params() -> ManagerParams {
    ManagerParams {
        min_debt: U128::new(100 * UNIT),
        max_debt: U128::new(1_000_000 * UNIT),
        expiration_date: 0,
        max_staleness_slots: 100,
        fee_interest: 1_000,
        fee_liquidation: 150,
        liquidation_discount: 9_600,
        fee_liquidation_expired: 100,
        liquidation_discount_expired: 9_800,
        conf_filter_bps: 500,
        max_quota_multiplier: 2,
        max_enabled_tokens: 4,
        ..ManagerParams::default()
    }
}

struct Fixture {
    state: Box<ManagerState>,
    account: CreditAccountRecord,
    oracle: MockOracle,
    ledger: MockLedger,
}

impl Fixture {
    fn setup() -> Self {
        Self::with_params(default_params())
    }

    /// Underlying at 90% LT, WETH at 80%, a quoted token at 80% with a 10%
    /// quota rate and a 1% increase fee. Base rate is 5%.
    fn with_params(params: ManagerParams) -> Self {
        let mut state = Box::new(ManagerState::zeroed());
        state.header.pool_authority = POOL;
        state.init(params, UNDERLYING, [0; 32], 6, 9_000, RAY / 20, T0).unwrap();
        assert_eq!(state.add_collateral_token(WETH, [0; 32], 6, 8_000, false).unwrap(), WETH_MASK);
        assert_eq!(state.add_collateral_token(QUOTED, [0; 32], 6, 8_000, true).unwrap(), QUOTED_MASK);
        state.set_quota_params(QUOTED_MASK, 1_000_000 * UNIT, 100).unwrap();
        state.update_quota_rates(&[(QUOTED_MASK, 1_000)], T0).unwrap();

        let mut account = CreditAccountRecord::zeroed();
        account.magic = ACCOUNT_MAGIC;
        state.open_credit_account(&mut account, BORROWER, ACCOUNT, 255, T0).unwrap();

        let oracle = MockOracle::new(&[(UNDERLYING, USD), (WETH, 2_000 * USD), (QUOTED, USD)]);

        let mut ledger = MockLedger::default();
        ledger.mint(UNDERLYING, POOL, 10_000_000 * UNIT);
        ledger.mint(UNDERLYING, BORROWER, 100_000 * UNIT);
        ledger.mint(WETH, BORROWER, 10 * UNIT);
        ledger.mint(QUOTED, BORROWER, 100_000 * UNIT);
        ledger.mint(UNDERLYING, LIQUIDATOR, 100_000 * UNIT);

        Self { state, account, oracle, ledger }
    }

    fn deposit(&mut self, mint: TokenId, amount: u128) {
        self.state.add_collateral(&mut self.account, &mint, amount, &BORROWER, &mut self.ledger).unwrap();
    }

    fn borrow(&mut self, amount: u128, now: u64) -> Result<u128> {
        self.state.increase_debt(&mut self.account, amount, now, &self.oracle, &mut self.ledger)
    }

    fn repay(&mut self, amount: u128, now: u64) -> Result<u128> {
        self.state.decrease_debt(&mut self.account, amount, now, &self.oracle, &mut self.ledger)
    }

    fn change_quota(&mut self, change: i128, now: u64) -> Result<()> {
        self.state
            .update_quota(&mut self.account, &QUOTED, change, 0, now, &self.oracle, &self.ledger)
            .map(|_| ())
    }

    fn debt_only(&self, now: u64) -> CollateralDebtData {
        self.state
            .calc_debt_and_collateral(&self.account, CollateralCalcTask::DebtOnly, &[], 10_000, now, &self.oracle, &self.ledger)
            .unwrap()
    }

    fn liquidatable(&self, now: u64) -> bool {
        self.state.is_liquidatable(&self.account, now, &self.oracle, &self.ledger).unwrap()
    }
}

// --- Engine: debt ---

#[test]
fn test_increase_then_decrease_restores_position() {
    let index = RAY * 13 / 10;
    let (debt, new_index) = calc_increase(250 * UNIT, 1_000 * UNIT, index, index).unwrap();
    assert_eq!(debt, 1_250 * UNIT);
    assert_eq!(new_index, index);

    let out = calc_decrease(250 * UNIT, debt, index, new_index, 0, 0, 1_000).unwrap();
    assert_eq!(out.new_debt, 1_000 * UNIT);
    assert_eq!(out.new_index, index);
    assert_eq!(out.profit, 0);
}

#[test]
fn test_repayment_waterfall_order() {
    // fees 50, quota interest 100 (+10 protocol share), then 20 of principal
    let out = calc_decrease(180, 1_000, RAY, RAY, 100, 50, 1_000).unwrap();
    assert_eq!(out.new_quota_fees, 0);
    assert_eq!(out.new_cumulative_quota_interest, 0);
    assert_eq!(out.new_index, RAY);
    assert_eq!(out.profit, 60);
    assert_eq!(out.new_debt, 980);
}

#[test]
fn test_partial_quota_interest_payment_splits_profit() {
    // 55 against 100 of quota interest: 50 to the pool, 5 to the protocol
    let out = calc_decrease(55, 1_000, RAY, RAY, 100, 0, 1_000).unwrap();
    assert_eq!(out.new_cumulative_quota_interest, 50);
    assert_eq!(out.profit, 5);
    assert_eq!(out.new_debt, 1_000);
    assert_eq!(out.new_index, RAY);
}

// --- Engine: collateral ---

fn collateral_setup() -> (MockTokens, MockOracle, MockLedger) {
    let a = [21u8; 32];
    let b = [22u8; 32];
    let c = [23u8; 32];
    let tokens = MockTokens(vec![(a, 9_000), (b, 8_000), (c, 8_000)]);
    let oracle = MockOracle::new(&[(a, USD), (b, USD), (c, USD), (UNDERLYING, USD), (QUOTED, USD)]);
    let mut ledger = MockLedger::default();
    for t in [a, b, c] {
        ledger.mint(t, ACCOUNT, 1_000 * UNIT);
    }
    (tokens, oracle, ledger)
}

fn enabled(mask: u64) -> CollateralDebtData {
    CollateralDebtData { enabled_tokens_mask: mask, ..CollateralDebtData::default() }
}

#[test]
fn test_zero_target_prices_nothing() {
    let (tokens, oracle, ledger) = collateral_setup();
    let out = calc_collateral(&enabled(0b111), &ACCOUNT, &UNDERLYING, 0, &[], &tokens, &oracle, &ledger).unwrap();
    assert_eq!(out, collateral::CollateralOutcome::default());
    assert_eq!(oracle.calls.get(), 0);
}

#[test]
fn test_full_valuation_sums_every_token() {
    let (tokens, oracle, ledger) = collateral_setup();
    let out = calc_collateral(&enabled(0b111), &ACCOUNT, &UNDERLYING, u128::MAX, &[], &tokens, &oracle, &ledger).unwrap();

    let (mut value, mut twv) = (0, 0);
    for (token, lt) in &tokens.0 {
        let (v, w, _) = calc_one_token_collateral(&ACCOUNT, token, *lt, u128::MAX, &oracle, &ledger).unwrap();
        value += v;
        twv += w;
    }
    assert_eq!(out.total_value_usd, value);
    assert_eq!(out.twv_usd, twv);
    assert_eq!(out.tokens_to_disable, 0);
}

#[test]
fn test_hints_change_valuation_order() {
    let (tokens, oracle, ledger) = collateral_setup();
    let target = 850 * USD;

    // slot 0 alone covers the target at 90%
    calc_collateral(&enabled(0b111), &ACCOUNT, &UNDERLYING, target, &[], &tokens, &oracle, &ledger).unwrap();
    assert_eq!(oracle.calls.get(), 1);

    // slot 2 first is not enough at 80%, slot 0 follows
    oracle.calls.set(0);
    let out = calc_collateral(&enabled(0b111), &ACCOUNT, &UNDERLYING, target, &[0b100], &tokens, &oracle, &ledger).unwrap();
    assert_eq!(oracle.calls.get(), 2);
    assert!(out.twv_usd >= target);
}

#[test]
fn test_invalid_hint_is_rejected() {
    let (tokens, oracle, ledger) = collateral_setup();
    let res = calc_collateral(&enabled(0b111), &ACCOUNT, &UNDERLYING, u128::MAX, &[0b011], &tokens, &oracle, &ledger);
    assert_eq!(res, Err(CreditError::InvalidCollateralHint));
}

#[test]
fn test_empty_balances_are_marked_for_disabling() {
    let (tokens, oracle, mut ledger) = collateral_setup();
    ledger.balances.insert((tokens.0[1].0, ACCOUNT), 1);
    let out = calc_collateral(&enabled(0b111), &ACCOUNT, &UNDERLYING, u128::MAX, &[], &tokens, &oracle, &ledger).unwrap();
    assert_eq!(out.tokens_to_disable, 0b010);
    // dust balances are never priced
    assert_eq!(oracle.calls.get(), 2);
}

#[test]
fn test_quoted_value_is_capped_by_quota() {
    let (tokens, oracle, mut ledger) = collateral_setup();
    ledger.mint(QUOTED, ACCOUNT, 1_000 * UNIT);
    let data = CollateralDebtData {
        enabled_tokens_mask: 0b1000,
        quoted_tokens_mask: 0b1000,
        quoted_tokens: vec![QuotedToken { token: QUOTED, mask: 0b1000, quota: 100 * UNIT, liquidation_threshold: 8_000 }],
        ..CollateralDebtData::default()
    };
    let out = calc_collateral(&data, &ACCOUNT, &UNDERLYING, u128::MAX, &[], &tokens, &oracle, &ledger).unwrap();
    assert_eq!(out.twv_usd, 80 * USD);
    assert_eq!(out.total_value_usd, (1_000 * UNIT - 1) * 100);
}

#[test]
fn test_quoted_tokens_alone_reach_target() {
    let (tokens, oracle, mut ledger) = collateral_setup();
    ledger.mint(QUOTED, ACCOUNT, 1_000 * UNIT);
    ledger.balances.insert((tokens.0[1].0, ACCOUNT), 1);
    let data = CollateralDebtData {
        enabled_tokens_mask: 0b1010,
        quoted_tokens_mask: 0b1000,
        quoted_tokens: vec![QuotedToken { token: QUOTED, mask: 0b1000, quota: 100 * UNIT, liquidation_threshold: 8_000 }],
        ..CollateralDebtData::default()
    };
    let out = calc_collateral(&data, &ACCOUNT, &UNDERLYING, 50 * USD, &[], &tokens, &oracle, &ledger).unwrap();
    assert_eq!(out.twv_usd, 80 * USD);
    // the dust-holding non-quoted token is neither visited nor pruned
    assert_eq!(out.tokens_to_disable, 0);
    // underlying price for the quota cap, then the quoted balance
    assert_eq!(oracle.calls.get(), 2);
}

// --- Engine: transfers ---

#[test]
fn test_safe_transfer_reports_failure() {
    let mut ledger = MockLedger::default();
    ledger.mint(UNDERLYING, BORROWER, 10);
    assert_eq!(safe_transfer(&mut ledger, &UNDERLYING, &BORROWER, &POOL, 11), Err(CreditError::TransferFailed));
    safe_transfer(&mut ledger, &UNDERLYING, &BORROWER, &POOL, 0).unwrap();
    safe_transfer(&mut ledger, &UNDERLYING, &BORROWER, &POOL, 10).unwrap();
    assert_eq!(ledger.balance(UNDERLYING, POOL), 10);
}

#[test]
fn test_safe_approve_resets_before_retrying() {
    let mut ledger = MockLedger { strict_approve: true, ..MockLedger::default() };
    safe_approve(&mut ledger, &WETH, &ACCOUNT, &LIQUIDATOR, 100).unwrap();
    safe_approve(&mut ledger, &WETH, &ACCOUNT, &LIQUIDATOR, 200).unwrap();
    assert_eq!(ledger.allowance(WETH, ACCOUNT, LIQUIDATOR), 200);

    ledger.fail_approve = true;
    assert_eq!(safe_approve(&mut ledger, &WETH, &ACCOUNT, &LIQUIDATOR, 300), Err(CreditError::AllowanceFailed));
}

// --- Manager: registry ---

#[test]
fn test_registry_rejects_duplicates_and_high_thresholds() {
    let mut f = Fixture::setup();
    assert_eq!(
        f.state.add_collateral_token(WETH, [0; 32], 6, 8_000, false),
        Err(CreditError::IncorrectParameter)
    );
    assert_eq!(
        f.state.add_collateral_token([4; 32], [0; 32], 6, 9_500, false),
        Err(CreditError::IncorrectLiquidationThreshold)
    );
    assert_eq!(f.state.token_mask(&[5; 32]), Err(CreditError::UnregisteredToken));
    assert_eq!(f.state.token_mask(&QUOTED).unwrap(), QUOTED_MASK);
}

#[test]
fn test_threshold_ramp() {
    let mut f = Fixture::setup();
    f.state.ramp_liquidation_threshold(WETH_MASK, 6_000, T0, 100, T0).unwrap();

    let at = |now| TokenRegistry::new(&f.state, now).token_and_threshold_by_mask(WETH_MASK, true).unwrap().1;
    assert_eq!(at(T0), 8_000);
    assert_eq!(at(T0 + 50), 7_000);
    assert_eq!(at(T0 + 500), 6_000);
    assert_eq!(
        TokenRegistry::new(&f.state, T0).token_and_threshold_by_mask(WETH_MASK, false).unwrap(),
        (WETH, 0)
    );

    let mut f = Fixture::setup();
    assert_eq!(
        f.state.ramp_liquidation_threshold(1, 8_000, T0, 100, T0),
        Err(CreditError::IncorrectLiquidationThreshold)
    );
    assert_eq!(
        f.state.ramp_liquidation_threshold(WETH_MASK, 9_500, T0, 100, T0),
        Err(CreditError::IncorrectLiquidationThreshold)
    );
}

#[test]
fn test_set_quota_params_quotes_token_on_first_use() {
    let mut f = Fixture::setup();
    assert!(!f.state.tokens[1].is_quoted());
    f.state.set_quota_params(WETH_MASK, 500 * UNIT, 0).unwrap();
    assert!(f.state.tokens[1].is_quoted());
    assert_eq!(f.state.quoted_tokens_mask, WETH_MASK | QUOTED_MASK);
    assert_eq!(f.state.set_quota_params(1, 500 * UNIT, 0), Err(CreditError::IncorrectParameter));
    assert_eq!(f.state.set_quota_params(QUOTED_MASK, 0, 10_001), Err(CreditError::IncorrectParameter));
}

// --- Manager: debt lifecycle ---

#[test]
fn test_borrow_accrue_and_repay_in_full() {
    let mut f = Fixture::setup();
    f.deposit(UNDERLYING, 1_000 * UNIT);
    assert_eq!(f.borrow(1_000 * UNIT, T0).unwrap(), 1_000 * UNIT);
    assert_eq!(f.state.pool.total_borrowed.get(), 1_000 * UNIT);
    assert_eq!(f.account.enabled_tokens_mask, 1);

    // 5% over a year, 10% of it to the protocol
    let data = f.debt_only(T0 + YEAR);
    assert_eq!(data.accrued_interest, 50 * UNIT);
    assert_eq!(data.accrued_fees, 5 * UNIT);
    assert_eq!(data.calc_total_debt().unwrap(), 1_055 * UNIT);

    assert_eq!(f.repay(u128::MAX, T0 + YEAR).unwrap(), 1_055 * UNIT);
    assert_eq!(f.account.debt.get(), 0);
    assert_eq!(f.state.pool.total_borrowed.get(), 0);
    assert_eq!(f.state.pool.treasury_profit.get(), 5 * UNIT);
    assert_eq!(f.ledger.balance(UNDERLYING, POOL), 10_000_000 * UNIT + 55 * UNIT);
    assert_eq!(f.ledger.balance(UNDERLYING, ACCOUNT), 945 * UNIT);
}

#[test]
fn test_partial_repayment_pays_interest_first() {
    let mut f = Fixture::setup();
    f.deposit(UNDERLYING, 1_000 * UNIT);
    f.borrow(1_000 * UNIT, T0).unwrap();

    f.repay(30 * UNIT, T0 + YEAR).unwrap();
    assert_eq!(f.account.debt.get(), 1_000 * UNIT);
    // 30 paid against 55 owed: 1/11 of it is protocol profit
    assert_eq!(f.state.pool.treasury_profit.get(), 2_727_273);

    let left = f.debt_only(T0 + YEAR).accrued_interest;
    assert!(left.abs_diff(50 * UNIT - 27_272_727) <= 2, "interest left {}", left);
}

#[test]
fn test_debt_limits_and_collateral_requirements() {
    let mut f = Fixture::setup();
    f.deposit(UNDERLYING, 1_000 * UNIT);
    assert_eq!(f.borrow(50 * UNIT, T0), Err(CreditError::BorrowAmountOutOfLimits));

    f.borrow(1_000 * UNIT, T0).unwrap();
    assert_eq!(f.repay(950 * UNIT, T0), Err(CreditError::BorrowAmountOutOfLimits));

    // 90% of 12_000 does not cover 11_000
    assert_eq!(f.borrow(10_000 * UNIT, T0), Err(CreditError::NotEnoughCollateral));
}

#[test]
fn test_custom_health_factor_below_one_is_rejected() {
    let mut f = Fixture::setup();
    let res = f.state.full_collateral_check(&mut f.account, &[], 9_999, T0, &f.oracle, &f.ledger);
    assert_eq!(res.map(|_| ()), Err(CreditError::CustomHealthFactorTooLow));
}

#[test]
fn test_quoted_deposit_is_not_enabled_without_quota() {
    let mut f = Fixture::setup();
    f.deposit(QUOTED, 10 * UNIT);
    assert_eq!(f.account.enabled_tokens_mask, 0);
    f.deposit(WETH, UNIT);
    assert_eq!(f.account.enabled_tokens_mask, WETH_MASK);
}

#[test]
fn test_enabled_token_cap() {
    let mut f = Fixture::with_params(ManagerParams { max_enabled_tokens: 1, ..default_params() });
    f.deposit(UNDERLYING, 10 * UNIT);
    let res = f.state.add_collateral(&mut f.account, &WETH, UNIT, &BORROWER, &mut f.ledger);
    assert_eq!(res, Err(CreditError::TooManyEnabledTokens));
}

#[test]
fn test_failed_transfer_aborts_deposit() {
    let mut f = Fixture::setup();
    f.ledger.fail_transfers = true;
    let res = f.state.add_collateral(&mut f.account, &UNDERLYING, UNIT, &BORROWER, &mut f.ledger);
    assert_eq!(res, Err(CreditError::TransferFailed));
    assert_eq!(f.account.enabled_tokens_mask, 0);
}

#[test]
fn test_withdrawal_is_collateral_checked() {
    let mut f = Fixture::setup();
    f.deposit(WETH, UNIT);
    f.borrow(1_500 * UNIT, T0).unwrap();

    // WETH alone still covers the debt
    f.state
        .withdraw_collateral(&mut f.account, &UNDERLYING, 1_500 * UNIT, &BORROWER, T0, &f.oracle, &mut f.ledger)
        .unwrap();
    assert_eq!(f.account.enabled_tokens_mask, WETH_MASK);

    let res = f
        .state
        .withdraw_collateral(&mut f.account, &WETH, UNIT / 2, &BORROWER, T0, &f.oracle, &mut f.ledger);
    assert_eq!(res, Err(CreditError::NotEnoughCollateral));
}

#[test]
fn test_approve_on_behalf_of_account() {
    let mut f = Fixture::setup();
    f.state.approve_token(&f.account, &WETH, &LIQUIDATOR, 77, &mut f.ledger).unwrap();
    assert_eq!(f.ledger.allowance(WETH, ACCOUNT, LIQUIDATOR), 77);
    assert_eq!(
        f.state.approve_token(&f.account, &[5; 32], &LIQUIDATOR, 1, &mut f.ledger),
        Err(CreditError::UnregisteredToken)
    );
}

// --- Manager: quotas ---

#[test]
fn test_quota_interest_and_removal() {
    let mut f = Fixture::setup();
    f.deposit(UNDERLYING, 1_000 * UNIT);
    f.borrow(1_000 * UNIT, T0).unwrap();

    f.change_quota(500 * UNIT as i128, T0).unwrap();
    assert_eq!(f.account.enabled_tokens_mask, 1 | QUOTED_MASK);
    assert_eq!(f.account.quota_fees.get(), 5 * UNIT);
    assert_eq!(f.state.pool.quota_revenue.get(), 50 * UNIT);

    // base 50 + quota 50, fees 5 + 10%
    let data = f.debt_only(T0 + YEAR);
    assert_eq!(data.cumulative_quota_interest, 50 * UNIT);
    assert_eq!(data.accrued_interest, 100 * UNIT);
    assert_eq!(data.accrued_fees, 15 * UNIT);

    assert_eq!(f.repay(u128::MAX, T0 + YEAR), Err(CreditError::DebtToZeroWithActiveQuotas));

    f.change_quota(i128::MIN, T0 + YEAR).unwrap();
    assert_eq!(f.account.enabled_tokens_mask, 1);
    assert_eq!(f.account.cumulative_quota_interest.get(), 50 * UNIT);
    assert_eq!(f.state.pool.quota_revenue.get(), 0);

    assert_eq!(f.repay(u128::MAX, T0 + YEAR).unwrap(), 1_115 * UNIT);
    assert_eq!(f.state.pool.treasury_profit.get(), 15 * UNIT);
}

#[test]
fn test_small_quota_steps_do_not_strand_revenue() {
    let mut f = Fixture::setup();
    f.deposit(UNDERLYING, 1_000 * UNIT);
    f.borrow(1_000 * UNIT, T0).unwrap();

    // each step alone is worth less than one unit of revenue at 10%
    for _ in 0..10 {
        f.change_quota(9, T0).unwrap();
    }
    assert_eq!(f.account.quotas[2].quota.get(), 90);
    assert_eq!(f.state.pool.quota_revenue.get(), f.state.tokens[2].quota.quota_revenue().unwrap());
    assert_eq!(f.state.pool.quota_revenue.get(), 9);

    f.change_quota(-45, T0).unwrap();
    assert_eq!(f.state.pool.quota_revenue.get(), 4);

    f.state.close_credit_account(&mut f.account, T0, &f.oracle, &mut f.ledger).unwrap();
    assert_eq!(f.state.tokens[2].quota.total_quoted.get(), 0);
    assert_eq!(f.state.pool.quota_revenue.get(), 0);
}

#[test]
fn test_quota_is_clamped_to_limit() {
    let mut f = Fixture::setup();
    f.state.set_quota_params(QUOTED_MASK, 100 * UNIT, 0).unwrap();
    f.deposit(UNDERLYING, 1_000 * UNIT);
    f.borrow(1_000 * UNIT, T0).unwrap();

    f.change_quota(500 * UNIT as i128, T0).unwrap();
    assert_eq!(f.account.quotas[2].quota.get(), 100 * UNIT);
    assert_eq!(f.state.tokens[2].quota.total_quoted.get(), 100 * UNIT);
}

#[test]
fn test_quota_bounded_by_debt_multiplier() {
    let mut f = Fixture::setup();
    f.deposit(UNDERLYING, 1_000 * UNIT);
    f.borrow(1_000 * UNIT, T0).unwrap();
    assert_eq!(f.change_quota(2_001 * UNIT as i128, T0), Err(CreditError::QuotaOutOfBounds));
    assert_eq!(
        f.state.update_quota(&mut f.account, &WETH, 1, 0, T0, &f.oracle, &f.ledger),
        Err(CreditError::TokenNotQuoted)
    );
}

#[test]
fn test_rate_update_rebaselines_index() {
    let mut f = Fixture::setup();
    f.deposit(UNDERLYING, 1_000 * UNIT);
    f.borrow(1_000 * UNIT, T0).unwrap();
    f.change_quota(500 * UNIT as i128, T0).unwrap();

    let revenue = f.state.update_quota_rates(&[(QUOTED_MASK, 2_000)], T0 + YEAR).unwrap();
    assert_eq!(revenue, 100 * UNIT);
    assert_eq!(f.state.tokens[2].quota.cumulative_index_lu.get(), 1 + RAY / 10);

    // 10% for the first year, 20% for the second
    assert_eq!(f.debt_only(T0 + 2 * YEAR).cumulative_quota_interest, 150 * UNIT);

    assert_eq!(f.state.update_quota_rates(&[(WETH_MASK, 100)], T0 + YEAR), Err(CreditError::TokenNotQuoted));
}

// --- Manager: close and liquidation ---

/// WETH-backed account with the underlying withdrawn: 1500 debt against
/// 1 WETH weighted at 80%.
fn weth_position() -> Fixture {
    let mut f = Fixture::setup();
    f.deposit(WETH, UNIT);
    f.borrow(1_500 * UNIT, T0).unwrap();
    f.state
        .withdraw_collateral(&mut f.account, &UNDERLYING, 1_500 * UNIT, &BORROWER, T0, &f.oracle, &mut f.ledger)
        .unwrap();
    f
}

#[test]
fn test_healthy_account_cannot_be_liquidated() {
    let mut f = weth_position();
    assert!(!f.liquidatable(T0));
    let res = f.state.liquidate_credit_account(&mut f.account, &LIQUIDATOR, T0, &f.oracle, &mut f.ledger);
    assert_eq!(res, Err(CreditError::NotLiquidatable));
}

#[test]
fn test_liquidation_with_surplus() {
    let mut f = weth_position();
    f.oracle.set_price(WETH, 1_800 * USD);
    assert!(f.liquidatable(T0));

    let borrower_before = f.ledger.balance(UNDERLYING, BORROWER);
    let liquidator_before = f.ledger.balance(UNDERLYING, LIQUIDATOR);
    let p = f.state.liquidate_credit_account(&mut f.account, &LIQUIDATOR, T0, &f.oracle, &mut f.ledger).unwrap();

    // 96% of (1 WETH - 1 unit) at 1800
    let total_funds = 1_727_998_272;
    assert_eq!(p.amount_to_pool + p.remaining_funds + 1, total_funds);
    assert_eq!(p.loss, 0);
    assert_eq!(p.profit, p.amount_to_pool - 1_500 * UNIT);

    assert_eq!(f.ledger.balance(UNDERLYING, LIQUIDATOR), liquidator_before - total_funds);
    assert_eq!(f.ledger.balance(WETH, LIQUIDATOR), UNIT - 1);
    assert_eq!(f.ledger.balance(UNDERLYING, BORROWER), borrower_before + p.remaining_funds);
    assert_eq!(f.ledger.balance(UNDERLYING, POOL), 10_000_000 * UNIT - 1_500 * UNIT + p.amount_to_pool);
    assert_eq!(f.state.pool.total_borrowed.get(), 0);
    assert_eq!(f.state.pool.treasury_profit.get(), p.profit);
    assert!(!f.account.is_open());
    assert_eq!(f.account.debt.get(), 0);
    assert_eq!(f.account.borrower, BORROWER);
}

#[test]
fn test_liquidation_with_loss() {
    let mut f = weth_position();
    f.oracle.set_price(WETH, 1_000 * USD);

    let p = f.state.liquidate_credit_account(&mut f.account, &LIQUIDATOR, T0, &f.oracle, &mut f.ledger).unwrap();
    assert_eq!(p.amount_to_pool, 959_999_040);
    assert_eq!(p.remaining_funds, 0);
    assert_eq!(p.profit, 0);
    assert_eq!(p.loss, 1_500 * UNIT - 959_999_040);
    assert_eq!(f.state.pool.total_losses.get(), p.loss);
}

#[test]
fn test_liquidation_with_loss_zeroes_quota_limits() {
    let mut f = Fixture::setup();
    f.deposit(WETH, UNIT);
    f.borrow(1_500 * UNIT, T0).unwrap();
    f.change_quota(100 * UNIT as i128, T0).unwrap();
    f.state
        .withdraw_collateral(&mut f.account, &UNDERLYING, 1_500 * UNIT, &BORROWER, T0, &f.oracle, &mut f.ledger)
        .unwrap();
    f.oracle.set_price(WETH, 1_000 * USD);

    let p = f.state.liquidate_credit_account(&mut f.account, &LIQUIDATOR, T0, &f.oracle, &mut f.ledger).unwrap();
    assert!(p.loss > 0);
    assert_eq!(f.state.tokens[2].quota.limit.get(), 0);
    assert_eq!(f.state.tokens[2].quota.total_quoted.get(), 0);
    assert_eq!(f.account.quotas[2].quota.get(), 0);
    assert_eq!(f.state.pool.quota_revenue.get(), 0);
}

#[test]
fn test_expired_manager() {
    let mut f = Fixture::with_params(ManagerParams { expiration_date: T0 + 100, ..default_params() });
    f.deposit(UNDERLYING, 1_000 * UNIT);
    f.borrow(1_000 * UNIT, T0).unwrap();

    let now = T0 + 200;
    assert_eq!(f.borrow(100 * UNIT, now), Err(CreditError::ManagerExpired));
    let mut fresh = CreditAccountRecord::zeroed();
    assert_eq!(
        f.state.open_credit_account(&mut fresh, BORROWER, [13; 32], 1, now),
        Err(CreditError::ManagerExpired)
    );

    // healthy, but past expiration
    assert!(f.state.calc_health_factor(&f.account, now, &f.oracle, &f.ledger).unwrap() > 10_000);
    assert!(f.liquidatable(now));

    let before = f.ledger.balance(UNDERLYING, LIQUIDATOR);
    let p = f.state.liquidate_credit_account(&mut f.account, &LIQUIDATOR, now, &f.oracle, &mut f.ledger).unwrap();
    assert_eq!(p.loss, 0);
    assert!(p.remaining_funds > 0);
    // 98% of 2000 - 1 unit of dust leaves the rest to the liquidator
    assert_eq!(p.amount_to_pool + p.remaining_funds + 1, 1_959_999_999);
    let gained = f.ledger.balance(UNDERLYING, LIQUIDATOR) - before;
    assert_eq!(gained, 2_000 * UNIT - p.amount_to_pool - p.remaining_funds - 1);
}

#[test]
fn test_close_returns_assets_to_borrower() {
    let mut f = Fixture::setup();
    f.deposit(UNDERLYING, 1_000 * UNIT);
    f.deposit(WETH, UNIT);
    f.borrow(1_000 * UNIT, T0).unwrap();
    let underlying_before = f.ledger.balance(UNDERLYING, BORROWER);

    let p = f.state.close_credit_account(&mut f.account, T0 + YEAR, &f.oracle, &mut f.ledger).unwrap();
    assert_eq!(p.amount_to_pool, 1_055 * UNIT);
    assert_eq!(p.profit, 5 * UNIT);
    assert_eq!(f.ledger.balance(UNDERLYING, BORROWER), underlying_before + 945 * UNIT - 1);
    assert_eq!(f.ledger.balance(WETH, BORROWER), 10 * UNIT - 1);
    assert!(!f.account.is_open());

    assert_eq!(f.borrow(100 * UNIT, T0 + YEAR), Err(CreditError::AccountNotOpen));
    f.state.open_credit_account(&mut f.account, BORROWER, ACCOUNT, 255, T0 + YEAR).unwrap();
    assert_eq!(
        f.state.open_credit_account(&mut f.account, BORROWER, ACCOUNT, 255, T0 + YEAR),
        Err(CreditError::AccountAlreadyOpen)
    );
}

#[test]
fn test_base_rate_change_compounds_index() {
    let mut f = Fixture::setup();
    f.state.set_base_interest_rate(RAY / 10, T0 + YEAR).unwrap();
    assert_eq!(f.state.pool.base_interest_index_lu.get(), RAY * 105 / 100);
    assert_eq!(f.state.pool.base_interest_index(T0 + 2 * YEAR).unwrap(), RAY * 105 / 100 * 110 / 100);
}
