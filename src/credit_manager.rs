//! Credit Manager: single-file Solana program around the credit accounting engine.

#![deny(unsafe_code)]

pub mod engine;
pub mod manager;

// 1. mod constants
pub mod constants {
    use core::mem::size_of;
    use crate::state::{CreditAccountRecord, ManagerState};

    pub const MAGIC: u64 = 0x4352_4544_4954_4d47; // "CREDITMG"
    pub const ACCOUNT_MAGIC: u64 = 0x4352_4544_4954_4143; // "CREDITAC"
    pub const VERSION: u32 = 1;

    pub const MANAGER_LEN: usize = size_of::<ManagerState>();
    pub const ACCOUNT_LEN: usize = size_of::<CreditAccountRecord>();

    pub const POOL_SEED: &[u8] = b"pool";
    pub const CREDIT_SEED: &[u8] = b"credit";

    /// Pyth prices are read at 1e6; USD values carry 8 decimals.
    pub const PRICE_E6_TO_USD: u128 = 100;

    /// Byte length of one `(mask, rate)` entry in `UpdateQuotaRates`.
    pub const RATE_ENTRY_LEN: usize = 10;
}

// 2. mod zc (zero-copy views)
pub mod zc {
    use solana_program::program_error::ProgramError;
    use crate::constants::{ACCOUNT_LEN, MANAGER_LEN};
    use crate::state::{CreditAccountRecord, ManagerState};

    #[inline]
    pub fn manager_ref(data: &[u8]) -> Result<&ManagerState, ProgramError> {
        let bytes = data.get(..MANAGER_LEN).ok_or(ProgramError::InvalidAccountData)?;
        bytemuck::try_from_bytes(bytes).map_err(|_| ProgramError::InvalidAccountData)
    }

    #[inline]
    pub fn manager_mut(data: &mut [u8]) -> Result<&mut ManagerState, ProgramError> {
        let bytes = data.get_mut(..MANAGER_LEN).ok_or(ProgramError::InvalidAccountData)?;
        bytemuck::try_from_bytes_mut(bytes).map_err(|_| ProgramError::InvalidAccountData)
    }

    #[inline]
    pub fn credit_account_mut(data: &mut [u8]) -> Result<&mut CreditAccountRecord, ProgramError> {
        let bytes = data.get_mut(..ACCOUNT_LEN).ok_or(ProgramError::InvalidAccountData)?;
        bytemuck::try_from_bytes_mut(bytes).map_err(|_| ProgramError::InvalidAccountData)
    }
}

// 3. mod error
pub mod error {
    use num_derive::FromPrimitive;
    use solana_program::{
        decode_error::DecodeError,
        msg,
        program_error::{PrintProgramError, ProgramError},
    };
    use crate::engine::CreditError;

    #[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive, thiserror::Error)]
    pub enum CreditManagerError {
        #[error("manager account is not initialized")]
        NotInitialized,
        #[error("manager account is already initialized")]
        AlreadyInitialized,
        #[error("unsupported layout version")]
        InvalidVersion,
        #[error("manager account has the wrong size")]
        InvalidManagerLen,
        #[error("credit account has the wrong size")]
        InvalidAccountLen,
        #[error("credit account belongs to another manager")]
        WrongManager,
        #[error("oracle price is stale")]
        OracleStale,
        #[error("oracle confidence interval too wide")]
        OracleConfTooWide,
        #[error("oracle price is invalid")]
        OracleInvalid,
        #[error("invalid pool vault")]
        InvalidVault,
        #[error("invalid mint")]
        InvalidMint,
        #[error("expected signer")]
        ExpectedSigner,
        #[error("expected writable")]
        ExpectedWritable,
        #[error("unauthorized")]
        Unauthorized,
        // Engine errors mapped:
        #[error("token is not registered")]
        EngineUnregisteredToken,
        #[error("token mask capacity exceeded")]
        EngineTooManyTokens,
        #[error("too many enabled tokens")]
        EngineTooManyEnabledTokens,
        #[error("token is not quoted")]
        EngineTokenNotQuoted,
        #[error("token is already quoted")]
        EngineTokenAlreadyQuoted,
        #[error("incorrect parameter")]
        EngineIncorrectParameter,
        #[error("invalid collateral hint")]
        EngineInvalidCollateralHint,
        #[error("division by zero")]
        EngineDivisionByZero,
        #[error("arithmetic overflow")]
        EngineOverflow,
        #[error("balance unavailable")]
        EngineBalanceUnavailable,
        #[error("price unavailable")]
        EnginePriceUnavailable,
        #[error("token transfer failed")]
        EngineTransferFailed,
        #[error("allowance could not be set")]
        EngineAllowanceFailed,
        #[error("quota is out of bounds")]
        EngineQuotaOutOfBounds,
        #[error("not enough collateral")]
        EngineNotEnoughCollateral,
        #[error("account is not liquidatable")]
        EngineNotLiquidatable,
        #[error("borrow amount out of limits")]
        EngineBorrowAmountOutOfLimits,
        #[error("debt cannot reach zero with active quotas")]
        EngineDebtToZeroWithActiveQuotas,
        #[error("incorrect liquidation threshold")]
        EngineIncorrectLiquidationThreshold,
        #[error("health factor below 100%")]
        EngineCustomHealthFactorTooLow,
        #[error("credit account is not open")]
        EngineAccountNotOpen,
        #[error("credit account is already open")]
        EngineAccountAlreadyOpen,
        #[error("credit manager has expired")]
        EngineManagerExpired,
    }

    impl From<CreditManagerError> for ProgramError {
        fn from(e: CreditManagerError) -> Self {
            ProgramError::Custom(e as u32)
        }
    }

    impl From<CreditError> for CreditManagerError {
        fn from(e: CreditError) -> Self {
            match e {
                CreditError::UnregisteredToken => Self::EngineUnregisteredToken,
                CreditError::TooManyTokens => Self::EngineTooManyTokens,
                CreditError::TooManyEnabledTokens => Self::EngineTooManyEnabledTokens,
                CreditError::TokenNotQuoted => Self::EngineTokenNotQuoted,
                CreditError::TokenAlreadyQuoted => Self::EngineTokenAlreadyQuoted,
                CreditError::IncorrectParameter => Self::EngineIncorrectParameter,
                CreditError::InvalidCollateralHint => Self::EngineInvalidCollateralHint,
                CreditError::DivisionByZero => Self::EngineDivisionByZero,
                CreditError::Overflow => Self::EngineOverflow,
                CreditError::BalanceUnavailable => Self::EngineBalanceUnavailable,
                CreditError::PriceUnavailable => Self::EnginePriceUnavailable,
                CreditError::TransferFailed => Self::EngineTransferFailed,
                CreditError::AllowanceFailed => Self::EngineAllowanceFailed,
                CreditError::QuotaOutOfBounds => Self::EngineQuotaOutOfBounds,
                CreditError::NotEnoughCollateral => Self::EngineNotEnoughCollateral,
                CreditError::NotLiquidatable => Self::EngineNotLiquidatable,
                CreditError::BorrowAmountOutOfLimits => Self::EngineBorrowAmountOutOfLimits,
                CreditError::DebtToZeroWithActiveQuotas => Self::EngineDebtToZeroWithActiveQuotas,
                CreditError::IncorrectLiquidationThreshold => Self::EngineIncorrectLiquidationThreshold,
                CreditError::CustomHealthFactorTooLow => Self::EngineCustomHealthFactorTooLow,
                CreditError::AccountNotOpen => Self::EngineAccountNotOpen,
                CreditError::AccountAlreadyOpen => Self::EngineAccountAlreadyOpen,
                CreditError::ManagerExpired => Self::EngineManagerExpired,
            }
        }
    }

    pub fn map_credit_error(e: CreditError) -> ProgramError {
        CreditManagerError::from(e).into()
    }

    impl<T> DecodeError<T> for CreditManagerError {
        fn type_of() -> &'static str {
            "CreditManagerError"
        }
    }

    impl PrintProgramError for CreditManagerError {
        fn print<E>(&self)
        where
            E: 'static + std::error::Error + DecodeError<E> + PrintProgramError + num_traits::FromPrimitive,
        {
            msg!("Error: {}", self);
        }
    }
}

// 4. mod ix
pub mod ix {
    use arrayref::array_ref;
    use solana_program::{program_error::ProgramError, pubkey::Pubkey};
    use crate::constants::RATE_ENTRY_LEN;
    use crate::engine::U128;
    use crate::state::ManagerParams;

    #[derive(Debug)]
    pub enum Instruction {
        InitManager { params: ManagerParams, lt_underlying: u16, base_interest_rate: u128 },
        AddCollateralToken { liquidation_threshold: u16, quoted: bool },
        RampLiquidationThreshold { token_mask: u64, lt_final: u16, ramp_start: u64, ramp_duration: u32 },
        SetQuotaParams { token_mask: u64, limit: u128, quota_increase_fee: u16 },
        UpdateQuotaRates { rates: Vec<(u64, u16)> },
        SetBaseInterestRate { rate: u128 },
        OpenCreditAccount,
        AddCollateral { mint: Pubkey, amount: u64 },
        IncreaseDebt { amount: u64 },
        /// `u64::MAX` repays everything
        DecreaseDebt { amount: u64 },
        /// `i128::MIN` removes the whole quota
        UpdateQuota { mint: Pubkey, change: i128, min_quota: u128 },
        WithdrawCollateral { mint: Pubkey, amount: u64 },
        LiquidateCreditAccount,
        CloseCreditAccount,
        ApproveDelegate { mint: Pubkey, delegate: Pubkey, amount: u64 },
    }

    impl Instruction {
        pub fn decode(input: &[u8]) -> Result<Self, ProgramError> {
            let (&tag, mut rest) = input.split_first().ok_or(ProgramError::InvalidInstructionData)?;

            match tag {
                0 => {
                    let params = read_manager_params(&mut rest)?;
                    let lt_underlying = read_u16(&mut rest)?;
                    let base_interest_rate = read_u128(&mut rest)?;
                    Ok(Instruction::InitManager { params, lt_underlying, base_interest_rate })
                }
                1 => {
                    let liquidation_threshold = read_u16(&mut rest)?;
                    let quoted = read_u8(&mut rest)? != 0;
                    Ok(Instruction::AddCollateralToken { liquidation_threshold, quoted })
                }
                2 => {
                    let token_mask = read_u64(&mut rest)?;
                    let lt_final = read_u16(&mut rest)?;
                    let ramp_start = read_u64(&mut rest)?;
                    let ramp_duration = read_u32(&mut rest)?;
                    Ok(Instruction::RampLiquidationThreshold { token_mask, lt_final, ramp_start, ramp_duration })
                }
                3 => {
                    let token_mask = read_u64(&mut rest)?;
                    let limit = read_u128(&mut rest)?;
                    let quota_increase_fee = read_u16(&mut rest)?;
                    Ok(Instruction::SetQuotaParams { token_mask, limit, quota_increase_fee })
                }
                4 => {
                    let count = read_u8(&mut rest)? as usize;
                    if rest.len() < count * RATE_ENTRY_LEN {
                        return Err(ProgramError::InvalidInstructionData);
                    }
                    let mut rates = Vec::with_capacity(count);
                    for _ in 0..count {
                        let token_mask = read_u64(&mut rest)?;
                        let rate = read_u16(&mut rest)?;
                        rates.push((token_mask, rate));
                    }
                    Ok(Instruction::UpdateQuotaRates { rates })
                }
                5 => {
                    let rate = read_u128(&mut rest)?;
                    Ok(Instruction::SetBaseInterestRate { rate })
                }
                6 => Ok(Instruction::OpenCreditAccount),
                7 => {
                    let mint = read_pubkey(&mut rest)?;
                    let amount = read_u64(&mut rest)?;
                    Ok(Instruction::AddCollateral { mint, amount })
                }
                8 => {
                    let amount = read_u64(&mut rest)?;
                    Ok(Instruction::IncreaseDebt { amount })
                }
                9 => {
                    let amount = read_u64(&mut rest)?;
                    Ok(Instruction::DecreaseDebt { amount })
                }
                10 => {
                    let mint = read_pubkey(&mut rest)?;
                    let change = read_i128(&mut rest)?;
                    let min_quota = read_u128(&mut rest)?;
                    Ok(Instruction::UpdateQuota { mint, change, min_quota })
                }
                11 => {
                    let mint = read_pubkey(&mut rest)?;
                    let amount = read_u64(&mut rest)?;
                    Ok(Instruction::WithdrawCollateral { mint, amount })
                }
                12 => Ok(Instruction::LiquidateCreditAccount),
                13 => Ok(Instruction::CloseCreditAccount),
                14 => {
                    let mint = read_pubkey(&mut rest)?;
                    let delegate = read_pubkey(&mut rest)?;
                    let amount = read_u64(&mut rest)?;
                    Ok(Instruction::ApproveDelegate { mint, delegate, amount })
                }
                _ => Err(ProgramError::InvalidInstructionData),
            }
        }
    }

    fn take<'d>(input: &mut &'d [u8], n: usize) -> Result<&'d [u8], ProgramError> {
        if input.len() < n {
            return Err(ProgramError::InvalidInstructionData);
        }
        let (bytes, rest) = input.split_at(n);
        *input = rest;
        Ok(bytes)
    }

    fn read_u8(input: &mut &[u8]) -> Result<u8, ProgramError> {
        let (&val, rest) = input.split_first().ok_or(ProgramError::InvalidInstructionData)?;
        *input = rest;
        Ok(val)
    }

    fn read_u16(input: &mut &[u8]) -> Result<u16, ProgramError> {
        let bytes = take(input, 2)?;
        Ok(u16::from_le_bytes(*array_ref![bytes, 0, 2]))
    }

    fn read_u32(input: &mut &[u8]) -> Result<u32, ProgramError> {
        let bytes = take(input, 4)?;
        Ok(u32::from_le_bytes(*array_ref![bytes, 0, 4]))
    }

    fn read_u64(input: &mut &[u8]) -> Result<u64, ProgramError> {
        let bytes = take(input, 8)?;
        Ok(u64::from_le_bytes(*array_ref![bytes, 0, 8]))
    }

    fn read_i128(input: &mut &[u8]) -> Result<i128, ProgramError> {
        let bytes = take(input, 16)?;
        Ok(i128::from_le_bytes(*array_ref![bytes, 0, 16]))
    }

    fn read_u128(input: &mut &[u8]) -> Result<u128, ProgramError> {
        let bytes = take(input, 16)?;
        Ok(u128::from_le_bytes(*array_ref![bytes, 0, 16]))
    }

    fn read_pubkey(input: &mut &[u8]) -> Result<Pubkey, ProgramError> {
        let bytes = take(input, 32)?;
        Ok(Pubkey::new_from_array(*array_ref![bytes, 0, 32]))
    }

    fn read_manager_params(input: &mut &[u8]) -> Result<ManagerParams, ProgramError> {
        Ok(ManagerParams {
            min_debt: U128::new(read_u128(input)?),
            max_debt: U128::new(read_u128(input)?),
            expiration_date: read_u64(input)?,
            max_staleness_slots: read_u64(input)?,
            fee_interest: read_u16(input)?,
            fee_liquidation: read_u16(input)?,
            liquidation_discount: read_u16(input)?,
            fee_liquidation_expired: read_u16(input)?,
            liquidation_discount_expired: read_u16(input)?,
            conf_filter_bps: read_u16(input)?,
            max_quota_multiplier: read_u16(input)?,
            max_enabled_tokens: read_u8(input)?,
            _padding: 0,
        })
    }
}

// 5. mod accounts (validation)
pub mod accounts {
    use solana_program::{account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey};
    use crate::constants::{CREDIT_SEED, POOL_SEED};
    use crate::error::CreditManagerError;

    pub fn expect_len(accounts: &[AccountInfo], n: usize) -> Result<(), ProgramError> {
        if accounts.len() < n {
            return Err(ProgramError::NotEnoughAccountKeys);
        }
        Ok(())
    }

    pub fn expect_signer(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_signer {
            return Err(CreditManagerError::ExpectedSigner.into());
        }
        Ok(())
    }

    pub fn expect_writable(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_writable {
            return Err(CreditManagerError::ExpectedWritable.into());
        }
        Ok(())
    }

    pub fn expect_owner(ai: &AccountInfo, owner: &Pubkey) -> Result<(), ProgramError> {
        if ai.owner != owner {
            return Err(ProgramError::IllegalOwner);
        }
        Ok(())
    }

    pub fn expect_key(ai: &AccountInfo, expected: &Pubkey) -> Result<(), ProgramError> {
        if ai.key != expected {
            return Err(ProgramError::InvalidArgument);
        }
        Ok(())
    }

    /// Owner of the pool's token accounts.
    pub fn derive_pool_authority(program_id: &Pubkey, manager_key: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[POOL_SEED, manager_key.as_ref()], program_id)
    }

    /// Owner of a credit account's token accounts.
    pub fn derive_credit_authority(program_id: &Pubkey, account_key: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[CREDIT_SEED, account_key.as_ref()], program_id)
    }
}

// 6. mod state
pub mod state {
    use bytemuck::{Pod, Zeroable};
    use crate::engine::collateral::LiquidationThreshold;
    use crate::engine::quota::{AccountQuota, TokenQuotaParams};
    use crate::engine::{TokenId, MAX_TOKENS, U128};

    pub const TOKEN_REGISTERED_FLAG: u8 = 1;
    pub const TOKEN_QUOTED_FLAG: u8 = 1 << 1;
    pub const ACCOUNT_OPEN_FLAG: u64 = 1;

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Pod, Zeroable)]
    pub struct ManagerHeader {
        pub magic: u64,
        pub version: u32,
        pub pool_authority_bump: u8,
        pub _padding: [u8; 3],
        pub admin: [u8; 32],
        pub underlying: [u8; 32],
        pub pool_vault: [u8; 32],
        pub pool_authority: [u8; 32],
    }

    /// Manager configuration, written once by `InitManager`.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
    pub struct ManagerParams {
        pub min_debt: U128,
        pub max_debt: U128,
        /// Unix time after which accounts can be liquidated as expired; 0 disables expiry
        pub expiration_date: u64,
        pub max_staleness_slots: u64,
        pub fee_interest: u16,
        pub fee_liquidation: u16,
        pub liquidation_discount: u16,
        pub fee_liquidation_expired: u16,
        pub liquidation_discount_expired: u16,
        pub conf_filter_bps: u16,
        /// Quota cap as a multiple of the account's debt
        pub max_quota_multiplier: u16,
        pub max_enabled_tokens: u8,
        pub _padding: u8,
    }

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
    pub struct PoolState {
        pub base_interest_index_lu: U128,
        /// Annual rate, RAY-scaled
        pub base_interest_rate: U128,
        pub total_borrowed: U128,
        /// Annual quota revenue
        pub quota_revenue: U128,
        pub treasury_profit: U128,
        pub total_losses: U128,
        pub last_base_interest_update: u64,
        pub last_quota_rate_update: u64,
    }

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
    pub struct CollateralToken {
        pub mint: [u8; 32],
        pub oracle: [u8; 32],
        pub quota: TokenQuotaParams,
        pub lt: LiquidationThreshold,
        pub decimals: u8,
        pub flags: u8,
        pub _padding: [u8; 6],
    }

    impl CollateralToken {
        #[inline]
        pub fn is_quoted(&self) -> bool {
            self.flags & TOKEN_QUOTED_FLAG != 0
        }
    }

    /// Manager account contents. Slot 0 of `tokens` is the underlying.
    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct ManagerState {
        pub header: ManagerHeader,
        pub params: ManagerParams,
        pub pool: PoolState,
        pub token_count: u64,
        pub quoted_tokens_mask: u64,
        pub tokens: [CollateralToken; MAX_TOKENS],
    }

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct CreditAccountRecord {
        pub magic: u64,
        pub flags: u64,
        pub manager: [u8; 32],
        pub borrower: [u8; 32],
        /// PDA owning the account's token accounts
        pub authority: TokenId,
        pub debt: U128,
        pub cumulative_index_last_update: U128,
        /// Quota interest settled into the account but not yet repaid
        pub cumulative_quota_interest: U128,
        pub quota_fees: U128,
        pub enabled_tokens_mask: u64,
        pub last_debt_update: u64,
        pub authority_bump: u8,
        pub _padding: [u8; 7],
        pub quotas: [AccountQuota; MAX_TOKENS],
    }

    impl CreditAccountRecord {
        #[inline]
        pub fn is_open(&self) -> bool {
            self.flags & ACCOUNT_OPEN_FLAG != 0
        }
    }
}

// 7. mod oracle
pub mod oracle {
    use arrayref::array_ref;
    use solana_program::{account_info::AccountInfo, msg, program_error::ProgramError};
    use crate::constants::PRICE_E6_TO_USD;
    use crate::engine::math::mul_div;
    use crate::engine::{CreditError, PriceOracle, TokenId};
    use crate::error::CreditManagerError;
    use crate::state::ManagerState;

    pub fn read_pyth_price_e6(price_ai: &AccountInfo, now_slot: u64, max_staleness: u64, conf_bps: u16) -> Result<u64, ProgramError> {
        let data = price_ai.try_borrow_data()?;
        if data.len() < 208 {
            return Err(ProgramError::InvalidAccountData);
        }

        let expo = i32::from_le_bytes(*array_ref![data, 20, 4]);
        let price = i64::from_le_bytes(*array_ref![data, 176, 8]);
        let conf = u64::from_le_bytes(*array_ref![data, 184, 8]);
        let pub_slot = u64::from_le_bytes(*array_ref![data, 200, 8]);

        if price <= 0 {
            return Err(CreditManagerError::OracleInvalid.into());
        }

        let age = now_slot.saturating_sub(pub_slot);
        if age > max_staleness {
            return Err(CreditManagerError::OracleStale.into());
        }

        let price_u = price as u128;
        if (conf as u128) * 10_000 > price_u * (conf_bps as u128) {
            return Err(CreditManagerError::OracleConfTooWide.into());
        }

        let scale = expo + 6;
        let price_e6 = if scale >= 0 {
            10u128
                .checked_pow(scale as u32)
                .and_then(|mul| price_u.checked_mul(mul))
                .ok_or(CreditManagerError::EngineOverflow)?
        } else {
            10u128.checked_pow(scale.unsigned_abs()).map_or(0, |div| price_u / div)
        };

        if price_e6 == 0 {
            return Err(CreditManagerError::OracleInvalid.into());
        }
        u64::try_from(price_e6).map_err(|_| CreditManagerError::EngineOverflow.into())
    }

    #[derive(Clone, Copy, Debug)]
    pub struct PriceFeed {
        pub mint: TokenId,
        pub oracle: TokenId,
        pub decimals: u8,
    }

    pub fn price_feeds(state: &ManagerState) -> Vec<PriceFeed> {
        state.tokens[..state.registered_tokens()]
            .iter()
            .map(|t| PriceFeed { mint: t.mint, oracle: t.oracle, decimals: t.decimals })
            .collect()
    }

    /// Prices registered tokens from the Pyth accounts passed to the instruction.
    pub struct PythOracle<'a, 'b> {
        feeds: Vec<PriceFeed>,
        accounts: &'b [AccountInfo<'a>],
        now_slot: u64,
        max_staleness_slots: u64,
        conf_filter_bps: u16,
    }

    impl<'a, 'b> PythOracle<'a, 'b> {
        pub fn new(
            feeds: Vec<PriceFeed>,
            accounts: &'b [AccountInfo<'a>],
            now_slot: u64,
            max_staleness_slots: u64,
            conf_filter_bps: u16,
        ) -> Self {
            Self { feeds, accounts, now_slot, max_staleness_slots, conf_filter_bps }
        }

        /// `(USD price of one whole token, units per whole token)`
        fn price_of(&self, token: &TokenId) -> Result<(u128, u128), CreditError> {
            let feed = self.feeds.iter().find(|f| &f.mint == token).ok_or(CreditError::UnregisteredToken)?;
            let Some(price_ai) = self.accounts.iter().find(|ai| ai.key.to_bytes() == feed.oracle) else {
                msg!("missing oracle account for {:?}", feed.mint);
                return Err(CreditError::PriceUnavailable);
            };
            let price_e6 = read_pyth_price_e6(price_ai, self.now_slot, self.max_staleness_slots, self.conf_filter_bps)
                .map_err(|e| {
                    msg!("oracle {} rejected: {:?}", price_ai.key, e);
                    CreditError::PriceUnavailable
                })?;
            let unit = 10u128.checked_pow(feed.decimals as u32).ok_or(CreditError::Overflow)?;
            Ok((price_e6 as u128 * PRICE_E6_TO_USD, unit))
        }
    }

    impl PriceOracle for PythOracle<'_, '_> {
        fn convert_to_usd(&self, amount: u128, token: &TokenId) -> Result<u128, CreditError> {
            let (price, unit) = self.price_of(token)?;
            mul_div(amount, price, unit)
        }

        fn convert_from_usd(&self, amount_usd: u128, token: &TokenId) -> Result<u128, CreditError> {
            let (price, unit) = self.price_of(token)?;
            mul_div(amount_usd, unit, price)
        }
    }
}

// 8. mod transfer
pub mod transfer {
    use solana_program::{
        account_info::AccountInfo, msg, program_error::ProgramError, program_pack::Pack, pubkey::Pubkey,
    };
    use spl_token::state::Account as TokenAccount;
    use crate::engine::{BalanceSource, CreditError, TokenId, TokenTransfer};

    #[cfg(not(test))]
    use solana_program::program::{invoke, invoke_signed};
    #[cfg(test)]
    use solana_program::program_option::COption;

    /// SPL token ledger over the token accounts passed to the instruction.
    ///
    /// A holder is identified by the `owner` field of its token accounts.
    /// Holders listed in `signers` are program addresses and sign with their
    /// seeds. A holder pinned with `with_vault` only resolves to that one
    /// token account.
    pub struct SplTokenLedger<'a, 'b, 's> {
        _token_program: &'b AccountInfo<'a>,
        accounts: &'b [AccountInfo<'a>],
        signers: &'s [(TokenId, &'s [&'s [u8]])],
        vault: Option<(TokenId, TokenId)>,
    }

    fn token_state(ai: &AccountInfo) -> Option<TokenAccount> {
        if ai.owner != &spl_token::ID || ai.data_len() != TokenAccount::LEN {
            return None;
        }
        let data = ai.try_borrow_data().ok()?;
        TokenAccount::unpack(&data).ok()
    }

    impl<'a, 'b, 's> SplTokenLedger<'a, 'b, 's> {
        pub fn new(
            token_program: &'b AccountInfo<'a>,
            accounts: &'b [AccountInfo<'a>],
            signers: &'s [(TokenId, &'s [&'s [u8]])],
        ) -> Self {
            Self { _token_program: token_program, accounts, signers, vault: None }
        }

        /// Pins `holder`'s token account to `vault`.
        pub fn with_vault(mut self, holder: TokenId, vault: TokenId) -> Self {
            self.vault = Some((holder, vault));
            self
        }

        fn find_token_account(&self, mint: &TokenId, owner: &TokenId) -> Option<(&'b AccountInfo<'a>, TokenAccount)> {
            self.accounts.iter().find_map(|ai| {
                if let Some((holder, vault)) = &self.vault {
                    if holder == owner && ai.key.to_bytes() != *vault {
                        return None;
                    }
                }
                let state = token_state(ai)?;
                (state.mint.to_bytes() == *mint && state.owner.to_bytes() == *owner).then_some((ai, state))
            })
        }

        #[cfg_attr(test, allow(dead_code))]
        fn find_account(&self, key: &TokenId) -> Option<&'b AccountInfo<'a>> {
            self.accounts.iter().find(|ai| ai.key.to_bytes() == *key)
        }

        #[cfg_attr(test, allow(dead_code))]
        fn seeds_of(&self, holder: &TokenId) -> Option<&'s [&'s [u8]]> {
            self.signers.iter().find(|(key, _)| key == holder).map(|(_, seeds)| *seeds)
        }

        fn try_transfer(&self, mint: &TokenId, from: &TokenId, to: &TokenId, amount: u128) -> Result<(), ProgramError> {
            let amount = u64::try_from(amount).map_err(|_| ProgramError::InvalidArgument)?;
            let (source, _) = self.find_token_account(mint, from).ok_or(ProgramError::NotEnoughAccountKeys)?;
            let (dest, _) = self.find_token_account(mint, to).ok_or(ProgramError::NotEnoughAccountKeys)?;

            #[cfg(not(test))]
            {
                let authority = self.find_account(from).ok_or(ProgramError::NotEnoughAccountKeys)?;
                let ix = spl_token::instruction::transfer(
                    self._token_program.key,
                    source.key,
                    dest.key,
                    authority.key,
                    &[],
                    amount,
                )?;
                let infos = [source.clone(), dest.clone(), authority.clone(), self._token_program.clone()];
                match self.seeds_of(from) {
                    Some(seeds) => invoke_signed(&ix, &infos, &[seeds]),
                    None => invoke(&ix, &infos),
                }
            }
            #[cfg(test)]
            {
                let mut src_data = source.try_borrow_mut_data()?;
                let mut src_state = TokenAccount::unpack(&src_data)?;
                src_state.amount = src_state.amount.checked_sub(amount).ok_or(ProgramError::InsufficientFunds)?;
                TokenAccount::pack(src_state, &mut src_data)?;
                drop(src_data);

                let mut dst_data = dest.try_borrow_mut_data()?;
                let mut dst_state = TokenAccount::unpack(&dst_data)?;
                dst_state.amount = dst_state.amount.checked_add(amount).ok_or(ProgramError::InvalidAccountData)?;
                TokenAccount::pack(dst_state, &mut dst_data)?;
                Ok(())
            }
        }

        fn try_approve(&self, mint: &TokenId, owner: &TokenId, spender: &TokenId, amount: u128) -> Result<(), ProgramError> {
            let amount = u64::try_from(amount).map_err(|_| ProgramError::InvalidArgument)?;
            let (source, _) = self.find_token_account(mint, owner).ok_or(ProgramError::NotEnoughAccountKeys)?;
            let delegate = Pubkey::new_from_array(*spender);

            #[cfg(not(test))]
            {
                let authority = self.find_account(owner).ok_or(ProgramError::NotEnoughAccountKeys)?;
                let delegate_ai = self.find_account(spender).ok_or(ProgramError::NotEnoughAccountKeys)?;
                let ix = spl_token::instruction::approve(
                    self._token_program.key,
                    source.key,
                    &delegate,
                    authority.key,
                    &[],
                    amount,
                )?;
                let infos = [source.clone(), delegate_ai.clone(), authority.clone(), self._token_program.clone()];
                match self.seeds_of(owner) {
                    Some(seeds) => invoke_signed(&ix, &infos, &[seeds]),
                    None => invoke(&ix, &infos),
                }
            }
            #[cfg(test)]
            {
                let mut data = source.try_borrow_mut_data()?;
                let mut state = TokenAccount::unpack(&data)?;
                state.delegate = if amount == 0 { COption::None } else { COption::Some(delegate) };
                state.delegated_amount = amount;
                TokenAccount::pack(state, &mut data)?;
                Ok(())
            }
        }
    }

    impl BalanceSource for SplTokenLedger<'_, '_, '_> {
        fn balance_of(&self, token: &TokenId, holder: &TokenId) -> Result<u128, CreditError> {
            self.find_token_account(token, holder)
                .map(|(_, state)| state.amount as u128)
                .ok_or(CreditError::BalanceUnavailable)
        }
    }

    impl TokenTransfer for SplTokenLedger<'_, '_, '_> {
        fn transfer(&mut self, token: &TokenId, from: &TokenId, to: &TokenId, amount: u128) -> bool {
            match self.try_transfer(token, from, to, amount) {
                Ok(()) => true,
                Err(e) => {
                    msg!("transfer of {} failed: {:?}", amount, e);
                    false
                }
            }
        }

        fn approve(&mut self, token: &TokenId, owner: &TokenId, spender: &TokenId, amount: u128) -> bool {
            match self.try_approve(token, owner, spender, amount) {
                Ok(()) => true,
                Err(e) => {
                    msg!("approve of {} failed: {:?}", amount, e);
                    false
                }
            }
        }
    }
}

// 9. mod processor
pub mod processor {
    use solana_program::{
        account_info::AccountInfo,
        entrypoint::ProgramResult,
        msg,
        program_error::ProgramError,
        program_pack::Pack,
        pubkey::Pubkey,
        sysvar::{clock::Clock, Sysvar},
    };
    use crate::{
        accounts,
        constants::{ACCOUNT_LEN, ACCOUNT_MAGIC, CREDIT_SEED, MAGIC, MANAGER_LEN, POOL_SEED, VERSION},
        error::{map_credit_error, CreditManagerError},
        ix::Instruction,
        oracle::{self, PythOracle},
        state::{CreditAccountRecord, ManagerHeader, ManagerState},
        transfer::SplTokenLedger,
        zc,
    };

    /// Who must sign an operation on a credit account.
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Signer {
        Borrower,
        Anyone,
    }

    fn manager_guard(program_id: &Pubkey, manager: &AccountInfo, data: &[u8]) -> Result<(), ProgramError> {
        accounts::expect_owner(manager, program_id)?;
        if data.len() != MANAGER_LEN {
            return Err(CreditManagerError::InvalidManagerLen.into());
        }
        Ok(())
    }

    fn account_guard(program_id: &Pubkey, account: &AccountInfo, data: &[u8]) -> Result<(), ProgramError> {
        accounts::expect_owner(account, program_id)?;
        if data.len() != ACCOUNT_LEN {
            return Err(CreditManagerError::InvalidAccountLen.into());
        }
        Ok(())
    }

    fn require_initialized(state: &ManagerState) -> Result<(), ProgramError> {
        if state.header.magic != MAGIC {
            return Err(CreditManagerError::NotInitialized.into());
        }
        if state.header.version != VERSION {
            return Err(CreditManagerError::InvalidVersion.into());
        }
        Ok(())
    }

    fn require_admin(state: &ManagerState, admin: &AccountInfo) -> Result<(), ProgramError> {
        accounts::expect_signer(admin)?;
        if state.header.admin != admin.key.to_bytes() {
            return Err(CreditManagerError::Unauthorized.into());
        }
        Ok(())
    }

    fn load_manager_mut<'d>(program_id: &Pubkey, manager: &AccountInfo, data: &'d mut [u8]) -> Result<&'d mut ManagerState, ProgramError> {
        accounts::expect_writable(manager)?;
        manager_guard(program_id, manager, data)?;
        let state = zc::manager_mut(data)?;
        require_initialized(state)?;
        Ok(state)
    }

    fn read_mint_decimals(mint: &AccountInfo) -> Result<u8, ProgramError> {
        if mint.owner != &spl_token::ID || mint.data_len() != spl_token::state::Mint::LEN {
            return Err(CreditManagerError::InvalidMint.into());
        }
        let data = mint.try_borrow_data()?;
        let state = spl_token::state::Mint::unpack(&data).map_err(|_| CreditManagerError::InvalidMint)?;
        Ok(state.decimals)
    }

    fn verify_vault(vault: &AccountInfo, expected_owner: &Pubkey, expected_mint: &Pubkey) -> Result<(), ProgramError> {
        if vault.owner != &spl_token::ID || vault.data_len() != spl_token::state::Account::LEN {
            return Err(CreditManagerError::InvalidVault.into());
        }
        let data = vault.try_borrow_data()?;
        let tok = spl_token::state::Account::unpack(&data)?;
        if tok.mint != *expected_mint {
            return Err(CreditManagerError::InvalidMint.into());
        }
        if tok.owner != *expected_owner {
            return Err(CreditManagerError::InvalidVault.into());
        }
        Ok(())
    }

    fn unix_now(clock: &Clock) -> u64 {
        clock.unix_timestamp.max(0) as u64
    }

    /// Shared setup for instructions acting on a credit account.
    ///
    /// Accounts: `[signer, manager, credit_account, token_program, clock, ..]`.
    /// Everything after the clock is searched for token accounts, program
    /// address authorities and price accounts.
    fn with_credit_account<'a, 'b, F>(
        program_id: &Pubkey,
        accounts: &'b [AccountInfo<'a>],
        signer: Signer,
        op: F,
    ) -> ProgramResult
    where
        F: for<'s> FnOnce(
            &mut ManagerState,
            &mut CreditAccountRecord,
            &mut SplTokenLedger<'a, 'b, 's>,
            &PythOracle<'a, 'b>,
            &Pubkey,
            u64,
        ) -> ProgramResult,
    {
        accounts::expect_len(accounts, 5)?;
        let a_signer = &accounts[0];
        let a_manager = &accounts[1];
        let a_account = &accounts[2];
        let a_token = &accounts[3];
        let a_clock = &accounts[4];

        accounts::expect_signer(a_signer)?;
        accounts::expect_writable(a_account)?;
        accounts::expect_key(a_token, &spl_token::ID)?;
        let clock = Clock::from_account_info(a_clock)?;

        let mut manager_data = a_manager.try_borrow_mut_data()?;
        let state = load_manager_mut(program_id, a_manager, &mut manager_data)?;

        let mut account_data = a_account.try_borrow_mut_data()?;
        account_guard(program_id, a_account, &account_data)?;
        let record = zc::credit_account_mut(&mut account_data)?;
        if record.magic != ACCOUNT_MAGIC || record.manager != a_manager.key.to_bytes() {
            return Err(CreditManagerError::WrongManager.into());
        }
        if signer == Signer::Borrower && record.borrower != a_signer.key.to_bytes() {
            return Err(CreditManagerError::Unauthorized.into());
        }

        let pool_bump = [state.header.pool_authority_bump];
        let pool_seeds: [&[u8]; 3] = [POOL_SEED, a_manager.key.as_ref(), &pool_bump];
        let credit_bump = [record.authority_bump];
        let credit_seeds: [&[u8]; 3] = [CREDIT_SEED, a_account.key.as_ref(), &credit_bump];
        let signers = [
            (state.header.pool_authority, &pool_seeds[..]),
            (record.authority, &credit_seeds[..]),
        ];

        let mut ledger = SplTokenLedger::new(a_token, accounts, &signers)
            .with_vault(state.header.pool_authority, state.header.pool_vault);
        let oracle = PythOracle::new(
            oracle::price_feeds(state),
            accounts,
            clock.slot,
            state.params.max_staleness_slots,
            state.params.conf_filter_bps,
        );
        op(state, record, &mut ledger, &oracle, a_signer.key, unix_now(&clock))
    }

    pub fn process_instruction<'a, 'b>(
        program_id: &Pubkey,
        accounts: &'b [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        let instruction = Instruction::decode(instruction_data)?;

        match instruction {
            Instruction::InitManager { params, lt_underlying, base_interest_rate } => {
                msg!("Instruction: InitManager");
                accounts::expect_len(accounts, 6)?;
                let a_admin = &accounts[0];
                let a_manager = &accounts[1];
                let a_mint = &accounts[2];
                let a_vault = &accounts[3];
                let a_oracle = &accounts[4];
                let a_clock = &accounts[5];

                accounts::expect_signer(a_admin)?;
                accounts::expect_writable(a_manager)?;

                let mut data = a_manager.try_borrow_mut_data()?;
                manager_guard(program_id, a_manager, &data)?;
                if zc::manager_ref(&data)?.header.magic == MAGIC {
                    return Err(CreditManagerError::AlreadyInitialized.into());
                }

                let (pool_authority, bump) = accounts::derive_pool_authority(program_id, a_manager.key);
                verify_vault(a_vault, &pool_authority, a_mint.key)?;
                let decimals = read_mint_decimals(a_mint)?;
                let clock = Clock::from_account_info(a_clock)?;

                data.fill(0);
                let state = zc::manager_mut(&mut data)?;
                state.header = ManagerHeader {
                    magic: MAGIC,
                    version: VERSION,
                    pool_authority_bump: bump,
                    _padding: [0; 3],
                    admin: a_admin.key.to_bytes(),
                    underlying: a_mint.key.to_bytes(),
                    pool_vault: a_vault.key.to_bytes(),
                    pool_authority: pool_authority.to_bytes(),
                };
                state
                    .init(
                        params,
                        a_mint.key.to_bytes(),
                        a_oracle.key.to_bytes(),
                        decimals,
                        lt_underlying,
                        base_interest_rate,
                        unix_now(&clock),
                    )
                    .map_err(map_credit_error)?;
                msg!("manager initialized, underlying {}", a_mint.key);
            }
            Instruction::AddCollateralToken { liquidation_threshold, quoted } => {
                msg!("Instruction: AddCollateralToken");
                accounts::expect_len(accounts, 4)?;
                let a_admin = &accounts[0];
                let a_manager = &accounts[1];
                let a_mint = &accounts[2];
                let a_oracle = &accounts[3];

                let mut data = a_manager.try_borrow_mut_data()?;
                let state = load_manager_mut(program_id, a_manager, &mut data)?;
                require_admin(state, a_admin)?;
                let decimals = read_mint_decimals(a_mint)?;

                let mask = state
                    .add_collateral_token(a_mint.key.to_bytes(), a_oracle.key.to_bytes(), decimals, liquidation_threshold, quoted)
                    .map_err(map_credit_error)?;
                msg!("token {} registered, mask {:#x}, quoted {}", a_mint.key, mask, quoted);
            }
            Instruction::RampLiquidationThreshold { token_mask, lt_final, ramp_start, ramp_duration } => {
                msg!("Instruction: RampLiquidationThreshold");
                accounts::expect_len(accounts, 3)?;
                let a_admin = &accounts[0];
                let a_manager = &accounts[1];
                let clock = Clock::from_account_info(&accounts[2])?;

                let mut data = a_manager.try_borrow_mut_data()?;
                let state = load_manager_mut(program_id, a_manager, &mut data)?;
                require_admin(state, a_admin)?;

                state
                    .ramp_liquidation_threshold(token_mask, lt_final, ramp_start, ramp_duration, unix_now(&clock))
                    .map_err(map_credit_error)?;
                msg!("lt ramp for {:#x} to {} over {}s", token_mask, lt_final, ramp_duration);
            }
            Instruction::SetQuotaParams { token_mask, limit, quota_increase_fee } => {
                msg!("Instruction: SetQuotaParams");
                accounts::expect_len(accounts, 2)?;
                let a_admin = &accounts[0];
                let a_manager = &accounts[1];

                let mut data = a_manager.try_borrow_mut_data()?;
                let state = load_manager_mut(program_id, a_manager, &mut data)?;
                require_admin(state, a_admin)?;

                state.set_quota_params(token_mask, limit, quota_increase_fee).map_err(map_credit_error)?;
            }
            Instruction::UpdateQuotaRates { rates } => {
                msg!("Instruction: UpdateQuotaRates");
                accounts::expect_len(accounts, 3)?;
                let a_admin = &accounts[0];
                let a_manager = &accounts[1];
                let clock = Clock::from_account_info(&accounts[2])?;

                let mut data = a_manager.try_borrow_mut_data()?;
                let state = load_manager_mut(program_id, a_manager, &mut data)?;
                require_admin(state, a_admin)?;

                let revenue = state.update_quota_rates(&rates, unix_now(&clock)).map_err(map_credit_error)?;
                msg!("quota revenue {}", revenue);
            }
            Instruction::SetBaseInterestRate { rate } => {
                msg!("Instruction: SetBaseInterestRate");
                accounts::expect_len(accounts, 3)?;
                let a_admin = &accounts[0];
                let a_manager = &accounts[1];
                let clock = Clock::from_account_info(&accounts[2])?;

                let mut data = a_manager.try_borrow_mut_data()?;
                let state = load_manager_mut(program_id, a_manager, &mut data)?;
                require_admin(state, a_admin)?;

                state.set_base_interest_rate(rate, unix_now(&clock)).map_err(map_credit_error)?;
            }
            Instruction::OpenCreditAccount => {
                msg!("Instruction: OpenCreditAccount");
                accounts::expect_len(accounts, 4)?;
                let a_borrower = &accounts[0];
                let a_manager = &accounts[1];
                let a_account = &accounts[2];
                let clock = Clock::from_account_info(&accounts[3])?;

                accounts::expect_signer(a_borrower)?;
                accounts::expect_writable(a_account)?;

                let manager_data = a_manager.try_borrow_data()?;
                manager_guard(program_id, a_manager, &manager_data)?;
                let state = zc::manager_ref(&manager_data)?;
                require_initialized(state)?;

                let mut data = a_account.try_borrow_mut_data()?;
                account_guard(program_id, a_account, &data)?;
                let record = zc::credit_account_mut(&mut data)?;
                if record.magic == 0 {
                    record.magic = ACCOUNT_MAGIC;
                    record.manager = a_manager.key.to_bytes();
                }
                if record.magic != ACCOUNT_MAGIC || record.manager != a_manager.key.to_bytes() {
                    return Err(CreditManagerError::WrongManager.into());
                }

                let (authority, bump) = accounts::derive_credit_authority(program_id, a_account.key);
                state
                    .open_credit_account(record, a_borrower.key.to_bytes(), authority.to_bytes(), bump, unix_now(&clock))
                    .map_err(map_credit_error)?;
                msg!("credit account {} opened for {}", a_account.key, a_borrower.key);
            }
            Instruction::AddCollateral { mint, amount } => {
                msg!("Instruction: AddCollateral");
                with_credit_account(program_id, accounts, Signer::Anyone, |state, record, ledger, _oracle, payer, _now| {
                    let mask = state
                        .add_collateral(record, &mint.to_bytes(), amount as u128, &payer.to_bytes(), ledger)
                        .map_err(map_credit_error)?;
                    msg!("added {} of {:#x}, enabled {:#x}", amount, mask, record.enabled_tokens_mask);
                    Ok(())
                })?;
            }
            Instruction::IncreaseDebt { amount } => {
                msg!("Instruction: IncreaseDebt");
                with_credit_account(program_id, accounts, Signer::Borrower, |state, record, ledger, oracle, _borrower, now| {
                    let debt = state.increase_debt(record, amount as u128, now, oracle, ledger).map_err(map_credit_error)?;
                    msg!("borrowed {}, debt {}", amount, debt);
                    Ok(())
                })?;
            }
            Instruction::DecreaseDebt { amount } => {
                msg!("Instruction: DecreaseDebt");
                with_credit_account(program_id, accounts, Signer::Borrower, |state, record, ledger, oracle, _borrower, now| {
                    let repaid = state.decrease_debt(record, amount as u128, now, oracle, ledger).map_err(map_credit_error)?;
                    msg!("repaid {}, debt {}", repaid, record.debt);
                    Ok(())
                })?;
            }
            Instruction::UpdateQuota { mint, change, min_quota } => {
                msg!("Instruction: UpdateQuota");
                with_credit_account(program_id, accounts, Signer::Borrower, |state, record, ledger, oracle, _borrower, now| {
                    let update = state
                        .update_quota(record, &mint.to_bytes(), change, min_quota, now, oracle, &*ledger)
                        .map_err(map_credit_error)?;
                    msg!("quota change {}, fees {}", update.applied_change, update.fees);
                    Ok(())
                })?;
            }
            Instruction::WithdrawCollateral { mint, amount } => {
                msg!("Instruction: WithdrawCollateral");
                with_credit_account(program_id, accounts, Signer::Borrower, |state, record, ledger, oracle, borrower, now| {
                    state
                        .withdraw_collateral(record, &mint.to_bytes(), amount as u128, &borrower.to_bytes(), now, oracle, ledger)
                        .map_err(map_credit_error)?;
                    msg!("withdrew {} of {}", amount, mint);
                    Ok(())
                })?;
            }
            Instruction::LiquidateCreditAccount => {
                msg!("Instruction: LiquidateCreditAccount");
                with_credit_account(program_id, accounts, Signer::Anyone, |state, record, ledger, oracle, liquidator, now| {
                    let payments = state
                        .liquidate_credit_account(record, &liquidator.to_bytes(), now, oracle, ledger)
                        .map_err(map_credit_error)?;
                    msg!(
                        "liquidated: to_pool {} remaining {} profit {} loss {}",
                        payments.amount_to_pool,
                        payments.remaining_funds,
                        payments.profit,
                        payments.loss
                    );
                    Ok(())
                })?;
            }
            Instruction::CloseCreditAccount => {
                msg!("Instruction: CloseCreditAccount");
                with_credit_account(program_id, accounts, Signer::Borrower, |state, record, ledger, oracle, _borrower, now| {
                    let payments = state.close_credit_account(record, now, oracle, ledger).map_err(map_credit_error)?;
                    msg!("closed: to_pool {} profit {}", payments.amount_to_pool, payments.profit);
                    Ok(())
                })?;
            }
            Instruction::ApproveDelegate { mint, delegate, amount } => {
                msg!("Instruction: ApproveDelegate");
                with_credit_account(program_id, accounts, Signer::Borrower, |state, record, ledger, _oracle, _borrower, _now| {
                    state
                        .approve_token(record, &mint.to_bytes(), &delegate.to_bytes(), amount as u128, ledger)
                        .map_err(map_credit_error)?;
                    msg!("approved {} of {} to {}", amount, mint, delegate);
                    Ok(())
                })?;
            }
        }
        Ok(())
    }
}

// 10. mod entrypoint
#[cfg(not(feature = "no-entrypoint"))]
pub mod entrypoint {
    use solana_program::{
        account_info::AccountInfo, entrypoint, entrypoint::ProgramResult, program_error::PrintProgramError,
        pubkey::Pubkey,
    };
    use crate::{error::CreditManagerError, processor};

    entrypoint!(process_instruction);

    fn process_instruction<'a>(
        program_id: &Pubkey,
        accounts: &'a [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        if let Err(error) = processor::process_instruction(program_id, accounts, instruction_data) {
            error.print::<CreditManagerError>();
            return Err(error);
        }
        Ok(())
    }
}
