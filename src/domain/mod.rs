//! Domain types for the deposit/withdraw orchestration engine.
//!
//! This module provides:
//! - Exact fixed-point amount parsing, formatting, and rescaling
//! - Domain primitives: ChainId, TokenSymbol, Timestamp, TxHash
//! - Market descriptors and per-account positions
//! - Withdrawal window interpretation
//! - Step plan and execution state vocabulary

pub mod amount;
pub mod market;
pub mod position;
pub mod primitives;
pub mod step;
pub mod window;

pub use amount::{
    format_amount, format_display, parse_amount, pow10, rescale, to_decimal, usd_value,
    AmountParseError, DisplayOptions, Precision,
};
pub use market::{DepositAsset, DepositRoute, Market, MarketId, PoolKind};
pub use position::{PoolPosition, Positions};
pub use primitives::{ChainId, Timestamp, TokenSymbol, TxHash};
pub use step::{
    AmountSource, Checkpoint, CheckpointId, ExecutionState, MinOutRule, PlanOutcome, PreviewVia,
    ReturnCause, Step, StepAction, StepId, StepPlan, StepStatus,
};
pub use window::{fee_label, format_remaining, WindowStatus, WithdrawalWindow};
