//! Execution engine: drives a step plan against the ledger.
//!
//! Steps run strictly sequentially; step n+1 never starts before step n's
//! receipt is observed. Every gate re-reads live state, amounts declared as
//! balance deltas are resolved from the snapshots recorded around their
//! producing step, and minimum outputs come from a preview taken immediately
//! before submission. Progress is published over a watch channel after every
//! state transition.

use alloy_primitives::{Address, U256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::chain::{LedgerClient, LedgerError, TxPayload, TxRequest};
use crate::domain::primitives::ChainId;
use crate::domain::step::{
    AmountSource, CheckpointId, ExecutionState, MinOutRule, PreviewVia, ReturnCause, Step,
    StepAction, StepId, StepPlan,
};
use crate::engine::quote::apply_slippage;
use crate::error::{decode_revert, FlowError, RevertReason};

/// Cooperative cancellation flag. Honored only before a submission; once a
/// transaction is in flight its outcome is always awaited.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A recorded balance snapshot: the token it was taken on and the balance
/// at that moment.
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    token: Address,
    balance: U256,
}

/// How a single step concluded without failing the plan.
enum StepRun {
    Completed,
    /// Verified already satisfied; nothing was submitted.
    Skipped,
    Returned(ReturnCause),
}

pub struct Executor {
    ledger: Arc<dyn LedgerClient>,
    progress_tx: watch::Sender<Option<ExecutionState>>,
}

impl Executor {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        let (progress_tx, _) = watch::channel(None);
        Self {
            ledger,
            progress_tx,
        }
    }

    /// Subscribe to execution state updates. The receiver always holds the
    /// most recent state; `None` until a plan starts.
    pub fn progress(&self) -> watch::Receiver<Option<ExecutionState>> {
        self.progress_tx.subscribe()
    }

    /// Run a plan to a terminal state.
    ///
    /// The returned state carries the outcome: completed, returned to input
    /// (rejection or pre-submission cancel), or failed at a step.
    pub async fn execute(&self, plan: &StepPlan, cancel: &CancelHandle) -> ExecutionState {
        let mut state = ExecutionState::new(plan);
        let mut snapshots: HashMap<CheckpointId, Snapshot> = HashMap::new();
        self.publish(&state);
        info!(plan_id = %plan.plan_id, steps = plan.len(), "executing plan");

        for (index, step) in plan.steps.iter().enumerate() {
            state.begin(index, &step.id);
            self.publish(&state);

            match self
                .run_step(plan, step, index, &mut state, &mut snapshots, cancel)
                .await
            {
                Ok(StepRun::Completed) => {
                    state.complete(index);
                    self.publish(&state);
                }
                Ok(StepRun::Skipped) => {
                    debug!(step = %step.id, "step already satisfied, skipped");
                    state.skip(index);
                    self.publish(&state);
                }
                Ok(StepRun::Returned(cause)) => {
                    info!(step = %step.id, cause = ?cause, "returning to input");
                    state.return_to_input(index, cause);
                    self.publish(&state);
                    return state;
                }
                Err(error) => {
                    warn!(step = %step.id, %error, "step failed");
                    state.fail(index, &step.id, error);
                    self.publish(&state);
                    return state;
                }
            }
        }

        state.finish();
        self.publish(&state);
        info!(plan_id = %plan.plan_id, "plan completed");
        state
    }

    async fn run_step(
        &self,
        plan: &StepPlan,
        step: &Step,
        index: usize,
        state: &mut ExecutionState,
        snapshots: &mut HashMap<CheckpointId, Snapshot>,
        cancel: &CancelHandle,
    ) -> Result<StepRun, FlowError> {
        for checkpoint in &step.record_before {
            let balance = self
                .ledger
                .erc20_balance(checkpoint.token, plan.actor)
                .await?;
            debug!(step = %step.id, checkpoint = ?checkpoint.id, %balance, "snapshot recorded");
            snapshots.insert(
                checkpoint.id,
                Snapshot {
                    token: checkpoint.token,
                    balance,
                },
            );
        }

        let actor = plan.actor;
        let payload = match &step.action {
            StepAction::Approve {
                token,
                spender,
                amount,
            } => {
                let required = self.resolve_amount(actor, &step.id, *amount, snapshots).await?;
                // A prior partial run may have left the allowance in place;
                // re-reading it here is what makes retried plans idempotent.
                let current = self.ledger.erc20_allowance(*token, actor, *spender).await?;
                if current >= required {
                    return Ok(StepRun::Skipped);
                }
                TxPayload::Approve {
                    token: *token,
                    spender: *spender,
                    amount: required,
                }
            }
            StepAction::Swap {
                router,
                data,
                value,
            } => TxPayload::SwapRaw {
                to: *router,
                data: data.clone(),
                value: *value,
            },
            StepAction::Mint {
                minter,
                collateral_token: _,
                amount,
                min_out,
            } => {
                let amount = self
                    .resolve_moving_amount(actor, &step.id, *amount, snapshots)
                    .await?;
                let min_out = self.resolve_min_out(*min_out, amount).await?;
                TxPayload::Mint {
                    minter: *minter,
                    collateral_amount: amount,
                    receiver: actor,
                    min_out,
                }
            }
            StepAction::Zap {
                zap,
                asset,
                amount,
                min_out,
            } => {
                let amount = self
                    .resolve_moving_amount(actor, &step.id, *amount, snapshots)
                    .await?;
                let min_out = self.resolve_min_out(*min_out, amount).await?;
                TxPayload::Zap {
                    zap: *zap,
                    asset: *asset,
                    amount,
                    receiver: actor,
                    min_out,
                }
            }
            StepAction::Deposit {
                pool,
                token,
                amount,
            } => {
                let amount = self
                    .resolve_moving_amount(actor, &step.id, *amount, snapshots)
                    .await?;
                self.verify_balance(*token, actor, amount).await?;
                self.verify_allowance(*token, actor, *pool, amount).await?;
                TxPayload::Deposit {
                    pool: *pool,
                    amount,
                    receiver: actor,
                }
            }
            StepAction::RequestWithdraw { pool } => TxPayload::RequestWithdraw { pool: *pool },
            StepAction::Withdraw { pool, amount } => {
                let amount = self
                    .resolve_moving_amount(actor, &step.id, *amount, snapshots)
                    .await?;
                TxPayload::Withdraw {
                    pool: *pool,
                    amount,
                    receiver: actor,
                }
            }
            StepAction::Redeem {
                minter,
                token,
                amount,
                min_out,
            } => {
                let amount = self
                    .resolve_moving_amount(actor, &step.id, *amount, snapshots)
                    .await?;
                self.verify_balance(*token, actor, amount).await?;
                self.verify_allowance(*token, actor, *minter, amount).await?;
                let min_out = self.resolve_min_out(*min_out, amount).await?;
                TxPayload::Redeem {
                    minter: *minter,
                    amount,
                    receiver: actor,
                    min_out,
                }
            }
        };

        self.ensure_chain(plan.chain).await?;

        if cancel.is_cancelled() {
            return Ok(StepRun::Returned(ReturnCause::Cancelled));
        }

        let tx = TxRequest {
            from: actor,
            chain: plan.chain,
            payload,
        };

        if let Err(err) = self.ledger.simulate(&tx).await {
            return Err(match err {
                LedgerError::Revert { data } => FlowError::SimulationReverted {
                    reason: decode_revert(&data),
                },
                other => other.into(),
            });
        }

        let hash = match self.ledger.submit(&tx).await {
            Ok(hash) => hash,
            Err(LedgerError::UserRejected) => {
                return Ok(StepRun::Returned(ReturnCause::UserRejected));
            }
            Err(LedgerError::Revert { data }) => {
                return Err(FlowError::TransactionReverted {
                    reason: decode_revert(&data),
                });
            }
            Err(other) => return Err(other.into()),
        };
        state.submitted(index, hash);
        self.publish(state);
        info!(step = %step.id, tx = %hash, "submitted, awaiting receipt");

        let receipt = self.ledger.wait_for_receipt(hash).await?;
        if !receipt.status {
            return Err(FlowError::TransactionReverted {
                reason: RevertReason::Unknown,
            });
        }
        Ok(StepRun::Completed)
    }

    async fn resolve_amount(
        &self,
        actor: Address,
        step_id: &StepId,
        amount: AmountSource,
        snapshots: &HashMap<CheckpointId, Snapshot>,
    ) -> Result<U256, FlowError> {
        match amount {
            AmountSource::Fixed(value) => Ok(value),
            AmountSource::DeltaSince(id) => {
                let snapshot = self.snapshot(step_id, id, snapshots)?;
                let live = self.ledger.erc20_balance(snapshot.token, actor).await?;
                Ok(live.saturating_sub(snapshot.balance))
            }
            AmountSource::FixedPlusGains { fixed, checkpoint } => {
                let snapshot = self.snapshot(step_id, checkpoint, snapshots)?;
                let live = self.ledger.erc20_balance(snapshot.token, actor).await?;
                let gains = live.saturating_sub(snapshot.balance);
                // Pool withdrawals can deliver slightly less than requested,
                // so the total is clamped to what the wallet actually holds.
                Ok(fixed.saturating_add(gains).min(live))
            }
        }
    }

    /// Resolve an amount that will move tokens. A delta-fed amount resolving
    /// to zero means the producing step delivered nothing; submitting the
    /// call would be a guaranteed no-op or revert, so fail instead.
    async fn resolve_moving_amount(
        &self,
        actor: Address,
        step_id: &StepId,
        amount: AmountSource,
        snapshots: &HashMap<CheckpointId, Snapshot>,
    ) -> Result<U256, FlowError> {
        let resolved = self.resolve_amount(actor, step_id, amount, snapshots).await?;
        if resolved.is_zero() && !matches!(amount, AmountSource::Fixed(_)) {
            return Err(FlowError::PlanPrecondition(format!(
                "step {step_id} resolved to a zero amount from its balance delta"
            )));
        }
        Ok(resolved)
    }

    fn snapshot(
        &self,
        step_id: &StepId,
        id: CheckpointId,
        snapshots: &HashMap<CheckpointId, Snapshot>,
    ) -> Result<Snapshot, FlowError> {
        snapshots.get(&id).copied().ok_or_else(|| {
            FlowError::PlanPrecondition(format!(
                "step {step_id} needs a snapshot no earlier step recorded"
            ))
        })
    }

    /// Derive the minimum acceptable output from a dry run taken right
    /// before submission. The preview dry-runs the call itself, so a revert
    /// here is the revert the submission would hit and carries its decoded
    /// reason; a zero output means the quote the plan was built on is gone.
    async fn resolve_min_out(&self, rule: MinOutRule, amount: U256) -> Result<U256, FlowError> {
        let MinOutRule::SlippageOnPreview { bps, via } = rule else {
            return Ok(U256::ZERO);
        };
        let expected = match via {
            PreviewVia::Mint { minter } => self
                .ledger
                .preview_mint(minter, amount)
                .await
                .map(|p| p.minted),
            PreviewVia::WrapThenMint { wrapper, minter } => {
                match self.ledger.convert_to_wrapped(wrapper, amount).await {
                    Ok(wrapped) => self
                        .ledger
                        .preview_mint(minter, wrapped)
                        .await
                        .map(|p| p.minted),
                    Err(err) => Err(err),
                }
            }
            PreviewVia::Redeem { minter } => self.ledger.preview_redeem(minter, amount).await,
        };
        match expected {
            Ok(value) if !value.is_zero() => Ok(apply_slippage(value, bps)),
            Ok(_) => Err(FlowError::QuoteUnavailable(
                "preview returned zero output".to_string(),
            )),
            Err(LedgerError::Revert { data }) => Err(FlowError::SimulationReverted {
                reason: decode_revert(&data),
            }),
            Err(other) => Err(other.into()),
        }
    }

    /// Make sure the wallet is on the plan's chain, attempting one switch.
    async fn ensure_chain(&self, required: ChainId) -> Result<(), FlowError> {
        let connected = self.ledger.connected_chain().await?;
        if connected == required {
            return Ok(());
        }
        info!(%connected, %required, "switching wallet chain");
        match self.ledger.switch_chain(required).await {
            Ok(()) => {
                let now = self.ledger.connected_chain().await?;
                if now == required {
                    Ok(())
                } else {
                    Err(FlowError::WrongNetwork {
                        connected: now,
                        required,
                    })
                }
            }
            Err(LedgerError::UserRejected) | Err(LedgerError::SwitchFailed) => {
                Err(FlowError::WrongNetwork {
                    connected,
                    required,
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn verify_balance(
        &self,
        token: Address,
        owner: Address,
        required: U256,
    ) -> Result<(), FlowError> {
        let available = self.ledger.erc20_balance(token, owner).await?;
        if available < required {
            return Err(FlowError::InsufficientBalance {
                asset: token.to_string(),
                required,
                available,
            });
        }
        Ok(())
    }

    async fn verify_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
        required: U256,
    ) -> Result<(), FlowError> {
        let current = self.ledger.erc20_allowance(token, owner, spender).await?;
        if current < required {
            return Err(FlowError::InsufficientAllowance {
                asset: token.to_string(),
                spender,
                required,
                current,
            });
        }
        Ok(())
    }

    fn publish(&self, state: &ExecutionState) {
        // A watch channel retains the latest value even with no
        // subscribers, so publishing cannot fail.
        self.progress_tx.send_replace(Some(state.clone()));
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MinterState, MockLedger, PoolState};
    use crate::domain::amount::{parse_amount, Precision};
    use crate::domain::market::MarketId;
    use crate::domain::step::{PlanOutcome, StepStatus};
    use crate::error::{KnownRevert, Remediation};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn eth(amount: &str) -> U256 {
        parse_amount(amount, Precision::Ether).unwrap()
    }

    const CHAIN: ChainId = ChainId(1);
    const PEGGED: Address = Address::repeat_byte(0x11);
    const WRAPPED: Address = Address::repeat_byte(0x22);
    const MINTER: Address = Address::repeat_byte(0x44);
    const POOL: Address = Address::repeat_byte(0x66);

    fn plan(steps: Vec<Step>) -> StepPlan {
        StepPlan::new(MarketId::new("fusd-steth"), addr(0x01), CHAIN, steps)
    }

    fn approve_pool_step(amount: AmountSource) -> Step {
        Step::new(
            "approve-pool",
            "Approve fUSD",
            StepAction::Approve {
                token: PEGGED,
                spender: POOL,
                amount,
            },
        )
    }

    fn deposit_pool_step(amount: AmountSource) -> Step {
        Step::new(
            "deposit-pool",
            "Deposit into collateral pool",
            StepAction::Deposit {
                pool: POOL,
                token: PEGGED,
                amount,
            },
        )
    }

    fn mint_steps(amount: U256) -> Vec<Step> {
        vec![
            Step::new(
                "approve-minter",
                "Approve wstETH",
                StepAction::Approve {
                    token: WRAPPED,
                    spender: MINTER,
                    amount: AmountSource::Fixed(amount),
                },
            ),
            Step::new(
                "mint",
                "Mint fUSD",
                StepAction::Mint {
                    minter: MINTER,
                    collateral_token: WRAPPED,
                    amount: AmountSource::Fixed(amount),
                    min_out: MinOutRule::SlippageOnPreview {
                        bps: 50,
                        via: PreviewVia::Mint { minter: MINTER },
                    },
                },
            )
            .recording(CheckpointId::MintOutput, PEGGED),
            approve_pool_step(AmountSource::DeltaSince(CheckpointId::MintOutput)),
            deposit_pool_step(AmountSource::DeltaSince(CheckpointId::MintOutput)),
        ]
    }

    #[tokio::test]
    async fn test_mint_and_stake_runs_every_step() {
        let actor = addr(0x01);
        let ledger = Arc::new(
            MockLedger::new(CHAIN)
                .with_balance(WRAPPED, actor, eth("10"))
                .with_minter(MINTER, MinterState::new(PEGGED, WRAPPED))
                .with_pool(POOL, PoolState::new(PEGGED)),
        );
        let executor = Executor::new(ledger.clone());

        let plan = plan(mint_steps(eth("10")));
        let state = executor.execute(&plan, &CancelHandle::new()).await;

        assert!(matches!(state.outcome, Some(PlanOutcome::Completed)));
        assert!(state
            .statuses
            .iter()
            .all(|s| *s == StepStatus::Completed));
        assert_eq!(ledger.submitted_count(), 4);
        // The whole mint output ended up staked.
        assert_eq!(ledger.balance_of(PEGGED, actor), U256::ZERO);
        assert_eq!(ledger.pool_deposit_of(POOL, actor), eth("10"));
    }

    #[tokio::test]
    async fn test_prior_allowance_skips_the_approve() {
        let actor = addr(0x01);
        let ledger = Arc::new(
            MockLedger::new(CHAIN)
                .with_balance(PEGGED, actor, eth("100"))
                .with_allowance(PEGGED, actor, POOL, eth("100"))
                .with_pool(POOL, PoolState::new(PEGGED)),
        );
        let executor = Executor::new(ledger.clone());

        let plan = plan(vec![
            approve_pool_step(AmountSource::Fixed(eth("40"))),
            deposit_pool_step(AmountSource::Fixed(eth("40"))),
        ]);
        let state = executor.execute(&plan, &CancelHandle::new()).await;

        assert!(matches!(state.outcome, Some(PlanOutcome::Completed)));
        assert_eq!(state.statuses[0], StepStatus::Skipped);
        assert_eq!(state.statuses[1], StepStatus::Completed);
        // Only the deposit was submitted.
        assert_eq!(ledger.submitted_count(), 1);
    }

    #[tokio::test]
    async fn test_wrong_chain_switches_automatically() {
        let actor = addr(0x01);
        let ledger = Arc::new(
            MockLedger::new(CHAIN)
                .with_connected_chain(ChainId::new(10))
                .with_balance(PEGGED, actor, eth("100"))
                .with_pool(POOL, PoolState::new(PEGGED)),
        );
        let executor = Executor::new(ledger.clone());

        let plan = plan(vec![
            approve_pool_step(AmountSource::Fixed(eth("40"))),
            deposit_pool_step(AmountSource::Fixed(eth("40"))),
        ]);
        let state = executor.execute(&plan, &CancelHandle::new()).await;

        assert!(matches!(state.outcome, Some(PlanOutcome::Completed)));
        assert_eq!(ledger.connected_chain().await.unwrap(), CHAIN);
    }

    #[tokio::test]
    async fn test_refused_switch_surfaces_wrong_network() {
        let actor = addr(0x01);
        let ledger = Arc::new(
            MockLedger::new(CHAIN)
                .with_connected_chain(ChainId::new(10))
                .with_switch_allowed(false)
                .with_balance(PEGGED, actor, eth("100"))
                .with_pool(POOL, PoolState::new(PEGGED)),
        );
        let executor = Executor::new(ledger.clone());

        let plan = plan(vec![deposit_pool_step(AmountSource::Fixed(eth("40")))]);
        let state = executor.execute(&plan, &CancelHandle::new()).await;

        match state.outcome {
            Some(PlanOutcome::Failed { ref error, .. }) => {
                assert!(matches!(
                    error,
                    FlowError::WrongNetwork {
                        connected,
                        required,
                    } if *connected == ChainId::new(10) && *required == CHAIN
                ));
                assert_eq!(error.remediation(), Remediation::SwitchNetwork);
            }
            ref other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(ledger.submitted_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_signature_returns_to_input() {
        let actor = addr(0x01);
        let ledger = Arc::new(
            MockLedger::new(CHAIN)
                .with_balance(PEGGED, actor, eth("100"))
                .with_pool(POOL, PoolState::new(PEGGED)),
        );
        ledger.reject_next_submit();
        let executor = Executor::new(ledger.clone());

        let plan = plan(vec![
            approve_pool_step(AmountSource::Fixed(eth("40"))),
            deposit_pool_step(AmountSource::Fixed(eth("40"))),
        ]);
        let state = executor.execute(&plan, &CancelHandle::new()).await;

        assert!(matches!(
            state.outcome,
            Some(PlanOutcome::ReturnedToInput {
                cause: ReturnCause::UserRejected
            })
        ));
        // The rejected step is back to pending, nothing landed.
        assert_eq!(state.statuses[0], StepStatus::Pending);
        assert_eq!(ledger.submitted_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_submission() {
        let actor = addr(0x01);
        let ledger = Arc::new(
            MockLedger::new(CHAIN)
                .with_balance(PEGGED, actor, eth("100"))
                .with_pool(POOL, PoolState::new(PEGGED)),
        );
        let executor = Executor::new(ledger.clone());
        let cancel = CancelHandle::new();
        cancel.cancel();

        let plan = plan(vec![deposit_pool_step(AmountSource::Fixed(eth("40")))]);
        let state = executor.execute(&plan, &cancel).await;

        assert!(matches!(
            state.outcome,
            Some(PlanOutcome::ReturnedToInput {
                cause: ReturnCause::Cancelled
            })
        ));
        assert_eq!(ledger.submitted_count(), 0);
    }

    #[tokio::test]
    async fn test_simulation_revert_decodes_known_reason() {
        let actor = addr(0x01);
        let mut pool = PoolState::new(PEGGED);
        pool.min_deposit = eth("50");
        let ledger = Arc::new(
            MockLedger::new(CHAIN)
                .with_balance(PEGGED, actor, eth("100"))
                .with_allowance(PEGGED, actor, POOL, eth("100"))
                .with_pool(POOL, pool),
        );
        let executor = Executor::new(ledger.clone());

        let plan = plan(vec![deposit_pool_step(AmountSource::Fixed(eth("40")))]);
        let state = executor.execute(&plan, &CancelHandle::new()).await;

        match state.outcome {
            Some(PlanOutcome::Failed { ref step, ref error }) => {
                assert_eq!(step.as_str(), "deposit-pool");
                assert!(matches!(
                    error,
                    FlowError::SimulationReverted {
                        reason: RevertReason::Known(KnownRevert::DepositBelowMinimum)
                    }
                ));
            }
            ref other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(ledger.submitted_count(), 0);
    }

    #[tokio::test]
    async fn test_min_out_preview_revert_keeps_the_decoded_reason() {
        let actor = addr(0x01);
        let mut minter = MinterState::new(PEGGED, WRAPPED);
        minter.paused = true;
        let ledger = Arc::new(
            MockLedger::new(CHAIN)
                .with_balance(WRAPPED, actor, eth("10"))
                .with_minter(MINTER, minter)
                .with_pool(POOL, PoolState::new(PEGGED)),
        );
        let executor = Executor::new(ledger.clone());

        let plan = plan(mint_steps(eth("10")));
        let state = executor.execute(&plan, &CancelHandle::new()).await;

        match state.outcome {
            Some(PlanOutcome::Failed { ref step, ref error }) => {
                assert_eq!(step.as_str(), "mint");
                assert!(matches!(
                    error,
                    FlowError::SimulationReverted {
                        reason: RevertReason::Known(KnownRevert::MintPaused)
                    }
                ));
            }
            ref other => panic!("unexpected outcome: {other:?}"),
        }
        // Only the approval landed; the min-out preview refused the mint.
        assert_eq!(ledger.submitted_count(), 1);
    }

    #[tokio::test]
    async fn test_deposit_gate_fails_fast_without_allowance() {
        let actor = addr(0x01);
        let ledger = Arc::new(
            MockLedger::new(CHAIN)
                .with_balance(PEGGED, actor, eth("100"))
                .with_pool(POOL, PoolState::new(PEGGED)),
        );
        let executor = Executor::new(ledger.clone());

        // A plan missing its approve step; the gate catches it before any
        // simulation or submission.
        let plan = plan(vec![deposit_pool_step(AmountSource::Fixed(eth("40")))]);
        let state = executor.execute(&plan, &CancelHandle::new()).await;

        match state.outcome {
            Some(PlanOutcome::Failed { ref error, .. }) => {
                assert!(matches!(error, FlowError::InsufficientAllowance { .. }));
            }
            ref other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(ledger.submitted_count(), 0);
    }

    #[tokio::test]
    async fn test_submission_revert_is_terminal() {
        let actor = addr(0x01);
        let ledger = Arc::new(
            MockLedger::new(CHAIN)
                .with_balance(PEGGED, actor, eth("100"))
                .with_pool(POOL, PoolState::new(PEGGED)),
        );
        ledger.revert_next_submit(KnownRevert::WindowNotOpen.abi_encoded());
        let executor = Executor::new(ledger.clone());

        let plan = plan(vec![approve_pool_step(AmountSource::Fixed(eth("40")))]);
        let state = executor.execute(&plan, &CancelHandle::new()).await;

        match state.outcome {
            Some(PlanOutcome::Failed { ref error, .. }) => {
                assert!(matches!(
                    error,
                    FlowError::TransactionReverted {
                        reason: RevertReason::Known(KnownRevert::WindowNotOpen)
                    }
                ));
                assert_eq!(error.remediation(), Remediation::TryAgain);
            }
            ref other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_withdraw_gains_feed_the_redeem() {
        let actor = addr(0x01);
        let mut pool = PoolState::new(PEGGED);
        pool.total_supply = eth("1000");
        pool.min_total_supply = eth("950");
        pool.deposits.insert(actor, eth("100"));
        pool.payout_bps = 9_995;
        let ledger = Arc::new(
            MockLedger::new(CHAIN)
                .with_balance(PEGGED, actor, eth("10"))
                .with_balance(PEGGED, POOL, eth("1000"))
                .with_pool(POOL, pool)
                .with_minter(MINTER, MinterState::new(PEGGED, WRAPPED)),
        );
        let executor = Executor::new(ledger.clone());

        let plan = plan(vec![
            Step::new(
                "withdraw-collateral",
                "Withdraw from collateral pool",
                StepAction::Withdraw {
                    pool: POOL,
                    amount: AmountSource::Fixed(eth("40")),
                },
            )
            .recording(CheckpointId::WithdrawGains, PEGGED),
            Step::new(
                "approve-minter",
                "Approve fUSD",
                StepAction::Approve {
                    token: PEGGED,
                    spender: MINTER,
                    amount: AmountSource::FixedPlusGains {
                        fixed: eth("10"),
                        checkpoint: CheckpointId::WithdrawGains,
                    },
                },
            ),
            Step::new(
                "redeem",
                "Redeem fUSD",
                StepAction::Redeem {
                    minter: MINTER,
                    token: PEGGED,
                    amount: AmountSource::FixedPlusGains {
                        fixed: eth("10"),
                        checkpoint: CheckpointId::WithdrawGains,
                    },
                    min_out: MinOutRule::SlippageOnPreview {
                        bps: 50,
                        via: PreviewVia::Redeem { minter: MINTER },
                    },
                },
            ),
        ]);
        let state = executor.execute(&plan, &CancelHandle::new()).await;

        assert!(matches!(state.outcome, Some(PlanOutcome::Completed)));
        // The pool paid out 40 * 99.95% = 39.98; the redeem consumed the
        // wallet portion plus the observed gain, not the requested 40.
        assert_eq!(ledger.balance_of(PEGGED, actor), U256::ZERO);
        assert_eq!(ledger.balance_of(WRAPPED, actor), eth("49.98"));
    }

    #[tokio::test]
    async fn test_zero_delta_fails_instead_of_submitting() {
        let actor = addr(0x01);
        let ledger = Arc::new(
            MockLedger::new(CHAIN)
                .with_balance(PEGGED, actor, eth("100"))
                .with_allowance(PEGGED, actor, POOL, eth("100"))
                .with_pool(POOL, PoolState::new(PEGGED)),
        );
        let executor = Executor::new(ledger.clone());

        // The request moves no tokens, so the delta-fed deposit resolves to
        // zero and must fail fast.
        let plan = plan(vec![
            Step::new(
                "request-collateral",
                "Request withdrawal from collateral pool",
                StepAction::RequestWithdraw { pool: POOL },
            )
            .recording(CheckpointId::MintOutput, PEGGED),
            deposit_pool_step(AmountSource::DeltaSince(CheckpointId::MintOutput)),
        ]);
        let state = executor.execute(&plan, &CancelHandle::new()).await;

        match state.outcome {
            Some(PlanOutcome::Failed { ref step, ref error }) => {
                assert_eq!(step.as_str(), "deposit-pool");
                assert!(matches!(error, FlowError::PlanPrecondition(_)));
            }
            ref other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(ledger.submitted_count(), 1);
    }

    #[tokio::test]
    async fn test_progress_channel_holds_the_terminal_state() {
        let actor = addr(0x01);
        let ledger = Arc::new(
            MockLedger::new(CHAIN)
                .with_balance(PEGGED, actor, eth("100"))
                .with_allowance(PEGGED, actor, POOL, eth("100"))
                .with_pool(POOL, PoolState::new(PEGGED)),
        );
        let executor = Executor::new(ledger.clone());
        let progress = executor.progress();
        assert!(progress.borrow().is_none());

        let plan = plan(vec![deposit_pool_step(AmountSource::Fixed(eth("40")))]);
        let state = executor.execute(&plan, &CancelHandle::new()).await;
        assert!(matches!(state.outcome, Some(PlanOutcome::Completed)));

        let latest = progress.borrow();
        let latest = latest.as_ref().unwrap();
        assert!(latest.is_terminal());
        assert_eq!(latest.plan_id, plan.plan_id);
        assert_eq!(latest.statuses[0], StepStatus::Completed);
        assert!(latest.tx_hashes[0].is_some());
    }
}
