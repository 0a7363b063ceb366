//! Collateral and debt accounting engine for leveraged credit accounts.
//!
//! Everything in here is pure integer arithmetic over explicit inputs. Prices,
//! token metadata and balances come in through the [`PriceOracle`],
//! [`CollateralTokens`] and [`BalanceSource`] traits so the same code runs
//! on-chain and against in-memory mocks.

pub mod collateral;
pub mod debt;
pub mod mask;
pub mod math;
pub mod quota;
pub mod snapshot;

pub use math::{U128, INDEX_PRECISION, PERCENTAGE_FACTOR, RAY, SECONDS_PER_YEAR};
pub use snapshot::{CollateralCalcTask, CollateralDebtData, QuotedToken};

// ============================================================================
// Constants
// ============================================================================

/// Token slots addressable by a `u64` mask.
pub const MAX_TOKENS: usize = 64;

/// The underlying (debt) token always occupies slot 0.
pub const UNDERLYING_TOKEN_MASK: u64 = 1;

/// Token identity (mint address bytes).
pub type TokenId = [u8; 32];

// ============================================================================
// Error Types
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CreditError {
    /// Token is not registered, or a mask resolves to no token
    #[error("token is not registered")]
    UnregisteredToken,

    /// All mask slots are taken
    #[error("token mask capacity exceeded")]
    TooManyTokens,

    /// More tokens enabled or quoted than the account allows
    #[error("too many enabled tokens")]
    TooManyEnabledTokens,

    /// Quota operation on a token without quota parameters
    #[error("token is not quoted")]
    TokenNotQuoted,

    /// Quota index was already initialized
    #[error("token is already quoted")]
    TokenAlreadyQuoted,

    /// Malformed mask or parameter
    #[error("incorrect parameter")]
    IncorrectParameter,

    /// Collateral hint is not a single-bit mask
    #[error("invalid collateral hint")]
    InvalidCollateralHint,

    /// Index or divisor is zero
    #[error("division by zero")]
    DivisionByZero,

    /// Arithmetic overflow
    #[error("arithmetic overflow")]
    Overflow,

    /// Balance could not be read for a token
    #[error("balance unavailable")]
    BalanceUnavailable,

    /// Price could not be read for a token
    #[error("price unavailable")]
    PriceUnavailable,

    /// Token transfer reported failure
    #[error("token transfer failed")]
    TransferFailed,

    /// Allowance could not be set, even after a reset to zero
    #[error("allowance could not be set")]
    AllowanceFailed,

    /// Resulting quota is outside the permitted range
    #[error("quota is out of bounds")]
    QuotaOutOfBounds,

    /// Weighted collateral is below the required level
    #[error("not enough collateral")]
    NotEnoughCollateral,

    /// Account is healthy and not expired
    #[error("account is not liquidatable")]
    NotLiquidatable,

    /// New debt is outside `[min_debt, max_debt]`
    #[error("borrow amount out of limits")]
    BorrowAmountOutOfLimits,

    /// Full repayment attempted while quotas are still active
    #[error("debt cannot reach zero with active quotas")]
    DebtToZeroWithActiveQuotas,

    /// Liquidation threshold above 100% or above the underlying threshold
    #[error("incorrect liquidation threshold")]
    IncorrectLiquidationThreshold,

    /// Requested health factor is below 100%
    #[error("health factor below 100%")]
    CustomHealthFactorTooLow,

    /// Account is not open
    #[error("credit account is not open")]
    AccountNotOpen,

    /// Account is already open
    #[error("credit account is already open")]
    AccountAlreadyOpen,

    /// Past the manager's expiration date
    #[error("credit manager has expired")]
    ManagerExpired,
}

pub type Result<T> = core::result::Result<T, CreditError>;

// ============================================================================
// External collaborators
// ============================================================================

/// Converts token amounts to and from USD (8 decimals).
pub trait PriceOracle {
    fn convert_to_usd(&self, amount: u128, token: &TokenId) -> Result<u128>;
    fn convert_from_usd(&self, amount_usd: u128, token: &TokenId) -> Result<u128>;
}

/// Resolves a single-bit mask to a token and its liquidation threshold.
///
/// When `compute_ramped_lt` is false only the identity is needed and the
/// returned threshold is 0.
pub trait CollateralTokens {
    fn token_and_threshold_by_mask(&self, mask: u64, compute_ramped_lt: bool) -> Result<(TokenId, u16)>;
}

/// Reads token balances held by an account.
pub trait BalanceSource {
    fn balance_of(&self, token: &TokenId, holder: &TokenId) -> Result<u128>;
}

/// Moves tokens. `transfer` and `approve` report success as a flag; callers
/// turn `false` into an error.
pub trait TokenTransfer: BalanceSource {
    fn transfer(&mut self, token: &TokenId, from: &TokenId, to: &TokenId, amount: u128) -> bool;

    fn approve(&mut self, token: &TokenId, owner: &TokenId, spender: &TokenId, amount: u128) -> bool;

    /// Amount to send so that the recipient receives `amount`.
    fn amount_with_fee(&self, _token: &TokenId, amount: u128) -> u128 {
        amount
    }

    /// Amount the recipient receives when `amount` is sent.
    fn amount_minus_fee(&self, _token: &TokenId, amount: u128) -> u128 {
        amount
    }
}

/// Transfers and raises [`CreditError::TransferFailed`] on a `false` result.
pub fn safe_transfer<L: TokenTransfer>(ledger: &mut L, token: &TokenId, from: &TokenId, to: &TokenId, amount: u128) -> Result<()> {
    if amount == 0 {
        return Ok(());
    }
    if !ledger.transfer(token, from, to, amount) {
        return Err(CreditError::TransferFailed);
    }
    Ok(())
}

/// Sets an allowance, retrying after a reset to zero for tokens that refuse
/// to move between two non-zero allowances.
pub fn safe_approve<L: TokenTransfer>(ledger: &mut L, token: &TokenId, owner: &TokenId, spender: &TokenId, amount: u128) -> Result<()> {
    if ledger.approve(token, owner, spender, amount) {
        return Ok(());
    }
    if ledger.approve(token, owner, spender, 0) && ledger.approve(token, owner, spender, amount) {
        return Ok(());
    }
    Err(CreditError::AllowanceFailed)
}
