//! On-chain ledger abstraction: reads, previews, simulation, and submission.
//!
//! Everything the engine knows about the chain goes through [`LedgerClient`].
//! Production backends wrap a wallet provider plus RPC; tests and the
//! local-fork environment use [`MockLedger`].

use alloy_primitives::{Address, I256, U256};
use async_trait::async_trait;
use std::fmt;

use crate::domain::primitives::{ChainId, TxHash};
use crate::domain::window::WithdrawalWindow;

pub mod mock;

pub use mock::{MinterState, MockLedger, PoolState, SwapInstruction, ZapConfig};

/// Result of a mint preview against live minter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintPreview {
    /// Signed incentive ratio at 1e18 scale. Positive charges a fee,
    /// negative pays a rebate, exactly 1e18 means minting is disallowed.
    pub incentive_ratio: I256,
    /// Collateral the minter would actually take (capacity may clip it
    /// below the requested amount).
    pub accepted: U256,
    /// Pegged tokens minted for the accepted collateral.
    pub minted: U256,
}

/// A mined transaction receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub tx: TxHash,
    /// True when the transaction succeeded.
    pub status: bool,
    pub block_number: u64,
}

/// The call a step submits, in protocol vocabulary rather than raw calldata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxPayload {
    Approve {
        token: Address,
        spender: Address,
        amount: U256,
    },
    /// Aggregator swap; the payload is opaque router calldata.
    SwapRaw {
        to: Address,
        data: Vec<u8>,
        value: U256,
    },
    Mint {
        minter: Address,
        collateral_amount: U256,
        receiver: Address,
        min_out: U256,
    },
    /// One-call wrap-and-mint. `asset` is `None` when paying with the
    /// native asset (sent as call value).
    Zap {
        zap: Address,
        asset: Option<Address>,
        amount: U256,
        receiver: Address,
        min_out: U256,
    },
    Deposit {
        pool: Address,
        amount: U256,
        receiver: Address,
    },
    RequestWithdraw {
        pool: Address,
    },
    Withdraw {
        pool: Address,
        amount: U256,
        receiver: Address,
    },
    Redeem {
        minter: Address,
        amount: U256,
        receiver: Address,
        min_out: U256,
    },
}

impl TxPayload {
    /// Contract the call targets.
    pub fn target(&self) -> Address {
        match self {
            TxPayload::Approve { token, .. } => *token,
            TxPayload::SwapRaw { to, .. } => *to,
            TxPayload::Mint { minter, .. } => *minter,
            TxPayload::Zap { zap, .. } => *zap,
            TxPayload::Deposit { pool, .. } => *pool,
            TxPayload::RequestWithdraw { pool } => *pool,
            TxPayload::Withdraw { pool, .. } => *pool,
            TxPayload::Redeem { minter, .. } => *minter,
        }
    }

    /// Native value the call carries.
    pub fn value(&self) -> U256 {
        match self {
            TxPayload::SwapRaw { value, .. } => *value,
            TxPayload::Zap {
                asset: None,
                amount,
                ..
            } => *amount,
            _ => U256::ZERO,
        }
    }

    /// Stable one-line description used for logging and mock tx hashing.
    pub fn describe(&self) -> String {
        match self {
            TxPayload::Approve {
                token,
                spender,
                amount,
            } => format!("approve {token} spender={spender} amount={amount}"),
            TxPayload::SwapRaw { to, data, value } => {
                format!("swap to={to} data_len={} value={value}", data.len())
            }
            TxPayload::Mint {
                minter,
                collateral_amount,
                receiver,
                min_out,
            } => format!("mint {minter} in={collateral_amount} to={receiver} min={min_out}"),
            TxPayload::Zap {
                zap,
                asset,
                amount,
                receiver,
                min_out,
            } => {
                let asset = asset.map_or_else(|| "native".to_string(), |a| a.to_string());
                format!("zap {zap} asset={asset} in={amount} to={receiver} min={min_out}")
            }
            TxPayload::Deposit {
                pool,
                amount,
                receiver,
            } => format!("deposit {pool} amount={amount} to={receiver}"),
            TxPayload::RequestWithdraw { pool } => format!("request-withdraw {pool}"),
            TxPayload::Withdraw {
                pool,
                amount,
                receiver,
            } => format!("withdraw {pool} amount={amount} to={receiver}"),
            TxPayload::Redeem {
                minter,
                amount,
                receiver,
                min_out,
            } => format!("redeem {minter} in={amount} to={receiver} min={min_out}"),
        }
    }
}

/// A fully specified transaction to simulate or submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    /// Chain the call must execute on.
    pub chain: ChainId,
    pub payload: TxPayload,
}

/// Ledger access for the orchestration engine.
///
/// Reads must hit live state; the engine deliberately re-reads balances and
/// allowances instead of trusting anything cached. `simulate` runs the call
/// without spending gas and reports the revert it would hit, if any.
#[async_trait]
pub trait LedgerClient: Send + Sync + fmt::Debug {
    /// Chain the wallet is currently connected to.
    async fn connected_chain(&self) -> Result<ChainId, LedgerError>;

    /// Ask the wallet to switch chains. Completes only once the wallet
    /// reports the target chain as active.
    async fn switch_chain(&self, target: ChainId) -> Result<(), LedgerError>;

    async fn native_balance(&self, owner: Address) -> Result<U256, LedgerError>;

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256, LedgerError>;

    /// Batched balance read for one token across several owners, aligned
    /// with the input order.
    async fn erc20_balances(
        &self,
        token: Address,
        owners: &[Address],
    ) -> Result<Vec<U256>, LedgerError>;

    async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, LedgerError>;

    /// Live underlying-to-wrapped conversion through the wrapper contract.
    async fn convert_to_wrapped(
        &self,
        wrapper: Address,
        underlying_amount: U256,
    ) -> Result<U256, LedgerError>;

    /// Dry-run a mint of `collateral_amount` wrapped collateral.
    async fn preview_mint(
        &self,
        minter: Address,
        collateral_amount: U256,
    ) -> Result<MintPreview, LedgerError>;

    /// Wrapped collateral returned for redeeming `pegged_amount`.
    async fn preview_redeem(
        &self,
        minter: Address,
        pegged_amount: U256,
    ) -> Result<U256, LedgerError>;

    /// Wrapped collateral the minter can still accept before hitting its
    /// cap. `U256::MAX` means effectively unlimited.
    async fn mint_capacity(&self, minter: Address) -> Result<U256, LedgerError>;

    async fn pool_total_supply(&self, pool: Address) -> Result<U256, LedgerError>;

    async fn pool_min_total_supply(&self, pool: Address) -> Result<U256, LedgerError>;

    /// The owner's staked balance in a pool.
    async fn pool_balance(&self, pool: Address, owner: Address) -> Result<U256, LedgerError>;

    /// The owner's withdrawal window in a pool; all-zero when no request
    /// exists.
    async fn withdrawal_window(
        &self,
        pool: Address,
        owner: Address,
    ) -> Result<WithdrawalWindow, LedgerError>;

    /// Run the call against current state without submitting it.
    async fn simulate(&self, tx: &TxRequest) -> Result<(), LedgerError>;

    /// Submit the call through the wallet and return its hash once signed.
    async fn submit(&self, tx: &TxRequest) -> Result<TxHash, LedgerError>;

    /// Wait until the transaction is mined.
    async fn wait_for_receipt(&self, tx: TxHash) -> Result<Receipt, LedgerError>;
}

/// Error type for ledger operations.
#[derive(Debug, Clone)]
pub enum LedgerError {
    /// The wallet owner declined the signature or switch request.
    UserRejected,
    /// The wallet could not or would not switch chains.
    SwitchFailed,
    /// The call reverted; `data` is the raw revert payload.
    Revert { data: Vec<u8> },
    /// RPC or wallet transport failure.
    Transport(String),
    /// The backend cannot perform this operation.
    Unsupported(String),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::UserRejected => write!(f, "user rejected the request"),
            LedgerError::SwitchFailed => write!(f, "chain switch failed"),
            LedgerError::Revert { data } => {
                write!(f, "execution reverted (0x{})", hex::encode(data))
            }
            LedgerError::Transport(msg) => write!(f, "transport error: {}", msg),
            LedgerError::Unsupported(msg) => write!(f, "unsupported operation: {}", msg),
        }
    }
}

impl std::error::Error for LedgerError {}
