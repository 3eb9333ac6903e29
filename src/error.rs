//! Error taxonomy for quote, plan, and execution flows.
//!
//! Every failure surfaced to a caller is a [`FlowError`]. Errors carry enough
//! structure to pick a remediation (switch network, try again, dismiss) and
//! to distinguish recoverable interruptions from terminal failures. Revert
//! payloads from simulation and receipts are decoded against the protocol's
//! known custom errors before falling back to raw selectors.

use alloy_primitives::{keccak256, Address, U256};
use thiserror::Error;

use crate::chain::LedgerError;
use crate::domain::amount::AmountParseError;
use crate::domain::market::MarketId;
use crate::domain::primitives::ChainId;
use crate::registry::RegistryError;
use crate::router::RouterError;

/// Protocol custom errors the engine recognizes by selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownRevert {
    DepositBelowMinimum,
    MintPaused,
    CapacityExceeded,
    InsufficientOutput,
    WithdrawalExceedsAvailable,
    WindowNotOpen,
}

impl KnownRevert {
    pub const ALL: [KnownRevert; 6] = [
        KnownRevert::DepositBelowMinimum,
        KnownRevert::MintPaused,
        KnownRevert::CapacityExceeded,
        KnownRevert::InsufficientOutput,
        KnownRevert::WithdrawalExceedsAvailable,
        KnownRevert::WindowNotOpen,
    ];

    /// Solidity signature the selector is derived from.
    pub fn signature(&self) -> &'static str {
        match self {
            KnownRevert::DepositBelowMinimum => "DepositBelowMinimum()",
            KnownRevert::MintPaused => "MintPaused()",
            KnownRevert::CapacityExceeded => "CapacityExceeded()",
            KnownRevert::InsufficientOutput => "InsufficientOutput()",
            KnownRevert::WithdrawalExceedsAvailable => "WithdrawalExceedsAvailable()",
            KnownRevert::WindowNotOpen => "WindowNotOpen()",
        }
    }

    pub fn selector(&self) -> [u8; 4] {
        let hash = keccak256(self.signature().as_bytes());
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&hash[..4]);
        selector
    }

    /// ABI-encoded revert payload (selector only; none of these carry args).
    pub fn abi_encoded(&self) -> Vec<u8> {
        self.selector().to_vec()
    }

    /// Human-readable description.
    pub fn message(&self) -> &'static str {
        match self {
            KnownRevert::DepositBelowMinimum => "deposit is below the pool minimum",
            KnownRevert::MintPaused => "minting is paused for this market",
            KnownRevert::CapacityExceeded => "mint capacity exceeded",
            KnownRevert::InsufficientOutput => "output fell below the minimum bound",
            KnownRevert::WithdrawalExceedsAvailable => {
                "withdrawal exceeds what the pool can release"
            }
            KnownRevert::WindowNotOpen => "the withdrawal window is not open",
        }
    }
}

/// Decoded revert payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertReason {
    /// A protocol error the engine knows by selector.
    Known(KnownRevert),
    /// A standard `Error(string)` revert.
    Message(String),
    /// An unrecognized custom error selector.
    Selector([u8; 4]),
    /// No reason data at all.
    Unknown,
}

impl std::fmt::Display for RevertReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevertReason::Known(known) => write!(f, "{}", known.message()),
            RevertReason::Message(msg) => write!(f, "{msg}"),
            RevertReason::Selector(sel) => write!(f, "custom error 0x{}", hex::encode(sel)),
            RevertReason::Unknown => write!(f, "reverted without reason data"),
        }
    }
}

fn error_string_selector() -> [u8; 4] {
    let hash = keccak256(b"Error(string)");
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&hash[..4]);
    selector
}

fn word_to_usize(word: &[u8]) -> Option<usize> {
    if word.len() != 32 || word[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..32]);
    usize::try_from(u64::from_be_bytes(buf)).ok()
}

fn decode_abi_string(payload: &[u8]) -> Option<String> {
    let offset = word_to_usize(payload.get(..32)?)?;
    let len = word_to_usize(payload.get(offset..offset.checked_add(32)?)?)?;
    let start = offset.checked_add(32)?;
    let bytes = payload.get(start..start.checked_add(len)?)?;
    String::from_utf8(bytes.to_vec()).ok()
}

/// Decode raw revert data into the most specific reason available.
pub fn decode_revert(data: &[u8]) -> RevertReason {
    if data.len() < 4 {
        return RevertReason::Unknown;
    }
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&data[..4]);

    if selector == error_string_selector() {
        if let Some(message) = decode_abi_string(&data[4..]) {
            if !message.is_empty() {
                return RevertReason::Message(message);
            }
        }
        return RevertReason::Unknown;
    }
    for known in KnownRevert::ALL {
        if selector == known.selector() {
            return RevertReason::Known(known);
        }
    }
    RevertReason::Selector(selector)
}

/// ABI-encode a standard `Error(string)` revert payload.
pub fn encode_error_string(message: &str) -> Vec<u8> {
    let bytes = message.as_bytes();
    let padded_len = bytes.len().div_ceil(32) * 32;
    let mut data = Vec::with_capacity(4 + 64 + padded_len);
    data.extend_from_slice(&error_string_selector());
    let mut offset = [0u8; 32];
    offset[31] = 0x20;
    data.extend_from_slice(&offset);
    let mut len = [0u8; 32];
    len[24..32].copy_from_slice(&(bytes.len() as u64).to_be_bytes());
    data.extend_from_slice(&len);
    data.extend_from_slice(bytes);
    data.extend(std::iter::repeat(0u8).take(padded_len - bytes.len()));
    data
}

/// What a caller should offer the user after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// Prompt a wallet network switch, then retry.
    SwitchNetwork,
    /// Rebuild the plan from fresh chain state and run it again.
    TryAgain,
    /// Return to the input form; nothing to retry.
    Dismiss,
}

/// Any failure raised by the quote, plan, or execution flows.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountParseError),

    #[error("unknown market: {0}")]
    UnknownMarket(MarketId),

    #[error("insufficient {asset} balance: need {required}, have {available}")]
    InsufficientBalance {
        asset: String,
        required: U256,
        available: U256,
    },

    #[error("{asset} allowance for {spender} too low: need {required}, approved {current}")]
    InsufficientAllowance {
        asset: String,
        spender: Address,
        required: U256,
        current: U256,
    },

    #[error("connected to chain {connected} but this action requires chain {required}")]
    WrongNetwork {
        connected: ChainId,
        required: ChainId,
    },

    #[error("signature request rejected in wallet")]
    UserRejected,

    #[error("simulation reverted: {reason}")]
    SimulationReverted { reason: RevertReason },

    #[error("transaction reverted: {reason}")]
    TransactionReverted { reason: RevertReason },

    #[error("no quote available: {0}")]
    QuoteUnavailable(String),

    #[error("plan cannot be built: {0}")]
    PlanPrecondition(String),

    #[error("ledger unavailable: {0}")]
    Transport(String),
}

impl FlowError {
    /// Recoverable errors leave wallet and session state fully intact: the
    /// user can fix the condition and resubmit without any cleanup.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FlowError::InvalidAmount(_)
                | FlowError::InsufficientBalance { .. }
                | FlowError::InsufficientAllowance { .. }
                | FlowError::WrongNetwork { .. }
                | FlowError::UserRejected
                | FlowError::PlanPrecondition(_)
        )
    }

    /// Remediation to offer for this error.
    pub fn remediation(&self) -> Remediation {
        match self {
            FlowError::WrongNetwork { .. } => Remediation::SwitchNetwork,
            FlowError::SimulationReverted { .. }
            | FlowError::TransactionReverted { .. }
            | FlowError::QuoteUnavailable(_)
            | FlowError::Transport(_) => Remediation::TryAgain,
            FlowError::InvalidAmount(_)
            | FlowError::UnknownMarket(_)
            | FlowError::InsufficientBalance { .. }
            | FlowError::InsufficientAllowance { .. }
            | FlowError::UserRejected
            | FlowError::PlanPrecondition(_) => Remediation::Dismiss,
        }
    }
}

impl From<LedgerError> for FlowError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UserRejected => FlowError::UserRejected,
            LedgerError::Revert { data } => FlowError::SimulationReverted {
                reason: decode_revert(&data),
            },
            LedgerError::SwitchFailed => {
                FlowError::Transport("chain switch rejected or unavailable".to_string())
            }
            LedgerError::Transport(msg) => FlowError::Transport(msg),
            LedgerError::Unsupported(msg) => FlowError::Transport(msg),
        }
    }
}

impl From<RouterError> for FlowError {
    fn from(err: RouterError) -> Self {
        FlowError::QuoteUnavailable(err.to_string())
    }
}

impl From<RegistryError> for FlowError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownMarket(id) => FlowError::UnknownMarket(MarketId::new(id)),
            other => FlowError::PlanPrecondition(other.to_string()),
        }
    }
}
