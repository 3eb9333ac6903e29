//! Step plans and execution state.
//!
//! A step plan is the ordered list of on-chain calls that realizes one user
//! action. Steps are identified by stable semantic ids so that a plan rebuilt
//! after an interruption lines up with the progress already made, regardless
//! of how many steps the rebuild elides.

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::market::MarketId;
use crate::domain::primitives::{ChainId, TxHash};
use crate::error::FlowError;

/// Stable semantic identifier for a step, e.g. "approve-pool" or "zap-mint".
/// Ids survive plan rebuilds; positions do not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        StepId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Balance snapshots the executor records immediately before a step runs.
/// Later steps size themselves off the delta from these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckpointId {
    /// Balance of the swap output token before the swap lands.
    SwapOutput,
    /// Pegged balance before the mint or zap lands.
    MintOutput,
    /// Pegged balance before the first pool withdrawal lands.
    WithdrawGains,
}

/// A checkpoint declaration: which token to snapshot under which id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub token: Address,
}

/// How the amount for a step is determined at execution time.
///
/// Delta-sized steps consume exactly what an earlier step produced, as
/// observed on-chain, rather than trusting a quoted estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountSource {
    /// Known at build time.
    Fixed(U256),
    /// Balance increase of the checkpoint token since its snapshot.
    DeltaSince(CheckpointId),
    /// A fixed wallet portion plus the gains delta, clipped to the live
    /// balance at execution time.
    FixedPlusGains {
        fixed: U256,
        checkpoint: CheckpointId,
    },
}

/// How a minimum-output bound is derived for a slippage-sensitive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinOutRule {
    /// No bound (the call embeds its own, e.g. aggregator swap payloads).
    None,
    /// Re-preview the output just before submission and allow `bps` of
    /// slippage below it.
    SlippageOnPreview { bps: u32, via: PreviewVia },
}

/// Which read models the output for a [`MinOutRule::SlippageOnPreview`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewVia {
    /// Direct mint of wrapped collateral.
    Mint { minter: Address },
    /// Zap input: convert through the wrapper, then preview the mint.
    WrapThenMint { wrapper: Address, minter: Address },
    /// Redeem pegged tokens for wrapped collateral.
    Redeem { minter: Address },
}

/// The on-chain call a step performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    Approve {
        token: Address,
        spender: Address,
        amount: AmountSource,
    },
    Swap {
        router: Address,
        data: Vec<u8>,
        value: U256,
    },
    Zap {
        zap: Address,
        /// `None` for the native asset (sent as call value).
        asset: Option<Address>,
        amount: AmountSource,
        min_out: MinOutRule,
    },
    Mint {
        minter: Address,
        collateral_token: Address,
        amount: AmountSource,
        min_out: MinOutRule,
    },
    Deposit {
        pool: Address,
        token: Address,
        amount: AmountSource,
    },
    RequestWithdraw {
        pool: Address,
    },
    Withdraw {
        pool: Address,
        amount: AmountSource,
    },
    Redeem {
        minter: Address,
        token: Address,
        amount: AmountSource,
        min_out: MinOutRule,
    },
}

impl StepAction {
    /// Short kind tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Approve { .. } => "approve",
            StepAction::Swap { .. } => "swap",
            StepAction::Zap { .. } => "zap",
            StepAction::Mint { .. } => "mint",
            StepAction::Deposit { .. } => "deposit",
            StepAction::RequestWithdraw { .. } => "request_withdraw",
            StepAction::Withdraw { .. } => "withdraw",
            StepAction::Redeem { .. } => "redeem",
        }
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub id: StepId,
    /// Human-readable description ("Approve wstETH", "Deposit fUSD").
    pub label: String,
    pub action: StepAction,
    /// Snapshots to record before this step executes.
    pub record_before: Vec<Checkpoint>,
    /// Set when a fresh read at build time showed the step's effect is
    /// already in place (an existing allowance). The executor re-verifies
    /// and marks such steps skipped instead of submitting them.
    pub satisfied_at_build: bool,
}

impl Step {
    pub fn new(id: impl Into<String>, label: impl Into<String>, action: StepAction) -> Self {
        Step {
            id: StepId::new(id),
            label: label.into(),
            action,
            record_before: Vec::new(),
            satisfied_at_build: false,
        }
    }

    pub fn recording(mut self, id: CheckpointId, token: Address) -> Self {
        self.record_before.push(Checkpoint { id, token });
        self
    }

    pub fn satisfied(mut self, satisfied: bool) -> Self {
        self.satisfied_at_build = satisfied;
        self
    }
}

/// An ordered, executable step list for one user action.
#[derive(Debug, Clone)]
pub struct StepPlan {
    pub plan_id: Uuid,
    pub market: MarketId,
    /// The wallet the plan acts for.
    pub actor: Address,
    /// Chain every step must execute on.
    pub chain: ChainId,
    pub steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
}

impl StepPlan {
    pub fn new(market: MarketId, actor: Address, chain: ChainId, steps: Vec<Step>) -> Self {
        StepPlan {
            plan_id: Uuid::new_v4(),
            market,
            actor,
            chain,
            steps,
            created_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Position of a step id within this plan, if present.
    pub fn index_of(&self, id: &StepId) -> Option<usize> {
        self.steps.iter().position(|s| &s.id == id)
    }

    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }
}

/// Per-step execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    InProgress,
    /// Verified already satisfied at execution time; nothing was submitted.
    Skipped,
    Completed,
    Failed,
}

/// Why an execution returned the session to the input form without an error
/// surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCause {
    /// The wallet owner declined the signature request.
    UserRejected,
    /// The caller cancelled before anything was submitted.
    Cancelled,
}

/// Terminal result of running a plan.
#[derive(Debug, Clone)]
pub enum PlanOutcome {
    /// Every step completed or was verified-skipped.
    Completed,
    /// Nothing further was submitted; no error surface is shown.
    ReturnedToInput { cause: ReturnCause },
    /// A step failed; the error and its remediation are surfaced.
    Failed { step: StepId, error: FlowError },
}

/// Live execution state for one plan, published after every transition.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub plan_id: Uuid,
    /// Id of the step currently in flight. Progress is always resolved by
    /// id, never by position.
    pub current: Option<StepId>,
    pub statuses: Vec<StepStatus>,
    pub tx_hashes: Vec<Option<TxHash>>,
    pub outcome: Option<PlanOutcome>,
}

impl ExecutionState {
    pub fn new(plan: &StepPlan) -> Self {
        ExecutionState {
            plan_id: plan.plan_id,
            current: None,
            statuses: vec![StepStatus::Pending; plan.len()],
            tx_hashes: vec![None; plan.len()],
            outcome: None,
        }
    }

    pub fn begin(&mut self, index: usize, id: &StepId) {
        self.current = Some(id.clone());
        self.statuses[index] = StepStatus::InProgress;
    }

    pub fn skip(&mut self, index: usize) {
        self.statuses[index] = StepStatus::Skipped;
    }

    /// Record the submitted hash before the receipt lands so observers can
    /// link out to the transaction while it confirms.
    pub fn submitted(&mut self, index: usize, tx: TxHash) {
        self.tx_hashes[index] = Some(tx);
    }

    pub fn complete(&mut self, index: usize) {
        self.statuses[index] = StepStatus::Completed;
    }

    pub fn fail(&mut self, index: usize, id: &StepId, error: FlowError) {
        self.statuses[index] = StepStatus::Failed;
        self.outcome = Some(PlanOutcome::Failed {
            step: id.clone(),
            error,
        });
    }

    /// Unwind an unsubmitted step and return control to the input form.
    pub fn return_to_input(&mut self, index: usize, cause: ReturnCause) {
        self.statuses[index] = StepStatus::Pending;
        self.current = None;
        self.outcome = Some(PlanOutcome::ReturnedToInput { cause });
    }

    pub fn finish(&mut self) {
        self.current = None;
        self.outcome = Some(PlanOutcome::Completed);
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    /// Steps that ran or were verified-skipped so far.
    pub fn settled_count(&self) -> usize {
        self.statuses
            .iter()
            .filter(|s| matches!(s, StepStatus::Completed | StepStatus::Skipped))
            .count()
    }
}
