//! Session: the modal deposit/withdraw flow as one explicit state machine.
//!
//! A session owns at most one in-flight action. Quotes are read-only and
//! always allowed; mutating actions move the session to `Executing`, and a
//! new action can only start from a terminal phase. Retry is deliberately
//! absent as a separate operation: resubmitting rebuilds the plan from
//! fresh chain state, and steps whose effect already landed come back
//! flagged satisfied and are skipped.

use alloy_primitives::Address;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::info;

use crate::domain::step::{ExecutionState, PlanOutcome, StepPlan};
use crate::engine::executor::{CancelHandle, Executor};
use crate::engine::plan::{DepositInput, PlanBuilder, WithdrawInput};
use crate::engine::progress::{project, DisplayStep};
use crate::engine::quote::{Quote, QuoteEngine, QuoteRequest};
use crate::error::{FlowError, Remediation};

/// Where the session stands in its modal flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Collecting inputs; nothing mutates.
    Input,
    /// A plan is running and owns the session exclusively.
    Executing,
    Success,
    /// Failed with a remediation on offer.
    Errored,
}

impl SessionPhase {
    /// Whether a new mutating action may start from this phase.
    pub fn can_start(self) -> bool {
        !matches!(self, SessionPhase::Executing)
    }
}

/// Outcome of one submitted action.
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub plan: StepPlan,
    pub state: ExecutionState,
    /// Set when the plan failed; what to offer the user next.
    pub remediation: Option<Remediation>,
}

struct Inner {
    phase: SessionPhase,
    plan: Option<StepPlan>,
    cancel: CancelHandle,
    remediation: Option<Remediation>,
}

/// One user-facing deposit/withdraw session.
pub struct Session {
    quoter: Arc<QuoteEngine>,
    builder: Arc<PlanBuilder>,
    executor: Arc<Executor>,
    actor: Address,
    inner: Mutex<Inner>,
}

impl Session {
    pub fn new(
        quoter: Arc<QuoteEngine>,
        builder: Arc<PlanBuilder>,
        executor: Arc<Executor>,
        actor: Address,
    ) -> Self {
        Session {
            quoter,
            builder,
            executor,
            actor,
            inner: Mutex::new(Inner {
                phase: SessionPhase::Input,
                plan: None,
                cancel: CancelHandle::new(),
                remediation: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    /// Remediation from the last failed action, if the session is errored.
    pub fn remediation(&self) -> Option<Remediation> {
        self.lock().remediation
    }

    /// Resolve a quote. Read-only; allowed in any phase.
    pub async fn quote(&self, request: &QuoteRequest) -> Result<Quote, FlowError> {
        self.quoter.quote(request).await
    }

    /// Build and run a deposit confirmed against `quote`.
    pub async fn submit_deposit(
        &self,
        input: &DepositInput,
        quote: &Quote,
    ) -> Result<ActionReport, FlowError> {
        self.begin()?;
        let plan = match self.builder.build_deposit(input, quote, self.actor).await {
            Ok(plan) => plan,
            Err(err) => {
                self.back_to_input();
                return Err(err);
            }
        };
        Ok(self.run(plan).await)
    }

    /// Build and run a withdraw/redeem action.
    pub async fn submit_withdraw(&self, input: &WithdrawInput) -> Result<ActionReport, FlowError> {
        self.begin()?;
        let plan = match self.builder.build_withdraw(input, self.actor).await {
            Ok(plan) => plan,
            Err(err) => {
                self.back_to_input();
                return Err(err);
            }
        };
        Ok(self.run(plan).await)
    }

    /// Request cancellation of the in-flight action. Takes effect before
    /// the next submission; an in-flight transaction still completes.
    pub fn cancel(&self) {
        self.lock().cancel.cancel();
    }

    /// Dismiss a terminal phase back to input.
    pub fn dismiss(&self) {
        let mut inner = self.lock();
        if inner.phase.can_start() {
            inner.phase = SessionPhase::Input;
            inner.remediation = None;
        }
    }

    /// Live execution state updates for the current and future plans.
    pub fn progress(&self) -> watch::Receiver<Option<ExecutionState>> {
        self.executor.progress()
    }

    /// Display rows for the current plan, empty when no plan is active or
    /// the published state belongs to an earlier plan.
    pub fn display_steps(&self) -> Vec<DisplayStep> {
        let plan = self.lock().plan.clone();
        let Some(plan) = plan else {
            return Vec::new();
        };
        let progress = self.executor.progress();
        let state = progress.borrow();
        match state.as_ref() {
            Some(state) if state.plan_id == plan.plan_id => project(&plan, state),
            _ => Vec::new(),
        }
    }

    fn begin(&self) -> Result<(), FlowError> {
        let mut inner = self.lock();
        if !inner.phase.can_start() {
            return Err(FlowError::PlanPrecondition(
                "an action is already executing".to_string(),
            ));
        }
        inner.phase = SessionPhase::Executing;
        inner.remediation = None;
        Ok(())
    }

    fn back_to_input(&self) {
        self.lock().phase = SessionPhase::Input;
    }

    async fn run(&self, plan: StepPlan) -> ActionReport {
        // Each action gets a fresh handle so a cancel aimed at an earlier
        // action cannot leak into this one.
        let cancel = CancelHandle::new();
        {
            let mut inner = self.lock();
            inner.plan = Some(plan.clone());
            inner.cancel = cancel.clone();
        }

        let state = self.executor.execute(&plan, &cancel).await;

        let mut inner = self.lock();
        let remediation = match &state.outcome {
            Some(PlanOutcome::Completed) => {
                inner.phase = SessionPhase::Success;
                None
            }
            Some(PlanOutcome::ReturnedToInput { .. }) => {
                // Rejection and cancellation recover silently.
                inner.phase = SessionPhase::Input;
                None
            }
            Some(PlanOutcome::Failed { error, .. }) => {
                inner.phase = SessionPhase::Errored;
                Some(error.remediation())
            }
            None => {
                inner.phase = SessionPhase::Input;
                None
            }
        };
        inner.remediation = remediation;
        drop(inner);
        info!(plan_id = %plan.plan_id, phase = ?self.phase(), "action settled");

        ActionReport {
            plan,
            state,
            remediation,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("actor", &self.actor)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{LedgerClient, MockLedger, PoolState};
    use crate::config::Config;
    use crate::domain::amount::{parse_amount, Precision};
    use crate::domain::market::{DepositAsset, DepositRoute, Market, MarketId, PoolKind};
    use crate::domain::primitives::{ChainId, TokenSymbol};
    use crate::domain::step::StepStatus;
    use crate::engine::progress::DisplayStatus;
    use crate::index::MockPositionIndex;
    use crate::positions::PositionService;
    use crate::registry::MarketRegistry;
    use crate::router::{MockSwapRouter, SwapRouter};
    use alloy_primitives::U256;
    use rust_decimal::Decimal;
    use std::collections::HashMap;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn eth(amount: &str) -> U256 {
        parse_amount(amount, Precision::Ether).unwrap()
    }

    fn test_config() -> Arc<Config> {
        let mut env = HashMap::new();
        env.insert("REGISTRY_PATH".to_string(), "unused".to_string());
        env.insert("ROUTER_API_URL".to_string(), "unused".to_string());
        env.insert("PRICE_API_URL".to_string(), "unused".to_string());
        env.insert("INDEX_API_URL".to_string(), "unused".to_string());
        Arc::new(Config::from_env_map(env).unwrap())
    }

    fn market_fixture() -> Market {
        Market {
            id: MarketId::new("fusd-steth"),
            chain: ChainId::new(1),
            pegged_symbol: TokenSymbol::new("fUSD"),
            pegged_token: addr(0x11),
            wrapped_symbol: TokenSymbol::new("wstETH"),
            wrapped_token: addr(0x22),
            underlying_symbol: TokenSymbol::new("stETH"),
            underlying_token: Some(addr(0x33)),
            wrap_rate_fallback: None,
            minter: Some(addr(0x44)),
            zap: Some(addr(0x55)),
            collateral_pool: Some(addr(0x66)),
            sail_pool: None,
            genesis: None,
            flat_withdrawal_fee_pct: Decimal::new(30, 2),
            deposit_assets: vec![DepositAsset {
                symbol: TokenSymbol::new("fUSD"),
                token: Some(addr(0x11)),
                precision: Precision::Ether,
                route: DepositRoute::PeggedDirect,
            }],
        }
    }

    fn session_with(ledger: Arc<MockLedger>) -> Session {
        let ledger: Arc<dyn LedgerClient> = ledger;
        let router: Arc<dyn SwapRouter> = Arc::new(MockSwapRouter::new(addr(0x88)));
        let registry = Arc::new(MarketRegistry::from_markets(vec![market_fixture()]).unwrap());
        let config = test_config();
        let positions = Arc::new(PositionService::new(
            ledger.clone(),
            Arc::new(MockPositionIndex::new()),
            registry.clone(),
        ));
        Session::new(
            Arc::new(QuoteEngine::new(
                ledger.clone(),
                router,
                registry.clone(),
                config.clone(),
            )),
            Arc::new(PlanBuilder::new(ledger.clone(), positions, registry, config)),
            Arc::new(Executor::new(ledger)),
            addr(0x01),
        )
    }

    fn funded_ledger() -> Arc<MockLedger> {
        Arc::new(
            MockLedger::new(ChainId::new(1))
                .with_balance(addr(0x11), addr(0x01), eth("100"))
                .with_pool(addr(0x66), PoolState::new(addr(0x11))),
        )
    }

    fn deposit_input() -> DepositInput {
        DepositInput {
            market: MarketId::new("fusd-steth"),
            asset: TokenSymbol::new("fUSD"),
            amount_text: "100".to_string(),
            pool: Some(PoolKind::Collateral),
        }
    }

    fn quote_request() -> QuoteRequest {
        QuoteRequest {
            market: MarketId::new("fusd-steth"),
            asset: TokenSymbol::new("fUSD"),
            amount_text: "100".to_string(),
            slippage_bps: None,
        }
    }

    #[tokio::test]
    async fn test_deposit_runs_to_success() {
        let ledger = funded_ledger();
        let session = session_with(ledger.clone());
        assert_eq!(session.phase(), SessionPhase::Input);

        let quote = session.quote(&quote_request()).await.unwrap();
        let report = session
            .submit_deposit(&deposit_input(), &quote)
            .await
            .unwrap();

        assert!(matches!(
            report.state.outcome,
            Some(PlanOutcome::Completed)
        ));
        assert_eq!(session.phase(), SessionPhase::Success);
        assert_eq!(session.remediation(), None);
        assert_eq!(ledger.pool_deposit_of(addr(0x66), addr(0x01)), eth("100"));

        session.dismiss();
        assert_eq!(session.phase(), SessionPhase::Input);
    }

    #[tokio::test]
    async fn test_build_failure_returns_to_input() {
        let ledger = funded_ledger();
        let session = session_with(ledger);

        let quote = session.quote(&quote_request()).await.unwrap();
        let mut input = deposit_input();
        input.amount_text = "90".to_string();
        let err = session.submit_deposit(&input, &quote).await.unwrap_err();

        assert!(matches!(err, FlowError::PlanPrecondition(_)));
        assert_eq!(session.phase(), SessionPhase::Input);
    }

    #[tokio::test]
    async fn test_rejection_recovers_silently() {
        let ledger = funded_ledger();
        ledger.reject_next_submit();
        let session = session_with(ledger.clone());

        let quote = session.quote(&quote_request()).await.unwrap();
        let report = session
            .submit_deposit(&deposit_input(), &quote)
            .await
            .unwrap();

        assert!(matches!(
            report.state.outcome,
            Some(PlanOutcome::ReturnedToInput { .. })
        ));
        assert_eq!(session.phase(), SessionPhase::Input);
        assert_eq!(session.remediation(), None);
        assert_eq!(ledger.submitted_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_plan_offers_a_remediation() {
        let ledger = Arc::new(
            MockLedger::new(ChainId::new(1))
                .with_connected_chain(ChainId::new(10))
                .with_switch_allowed(false)
                .with_balance(addr(0x11), addr(0x01), eth("100"))
                .with_pool(addr(0x66), PoolState::new(addr(0x11))),
        );
        let session = session_with(ledger);

        let quote = session.quote(&quote_request()).await.unwrap();
        let report = session
            .submit_deposit(&deposit_input(), &quote)
            .await
            .unwrap();

        assert_eq!(report.remediation, Some(Remediation::SwitchNetwork));
        assert_eq!(session.phase(), SessionPhase::Errored);
        assert_eq!(session.remediation(), Some(Remediation::SwitchNetwork));

        session.dismiss();
        assert_eq!(session.phase(), SessionPhase::Input);
    }

    #[tokio::test]
    async fn test_resubmission_skips_already_satisfied_steps() {
        // As after an interrupted run that already approved the pool.
        let ledger = Arc::new(
            MockLedger::new(ChainId::new(1))
                .with_balance(addr(0x11), addr(0x01), eth("100"))
                .with_allowance(addr(0x11), addr(0x01), addr(0x66), eth("100"))
                .with_pool(addr(0x66), PoolState::new(addr(0x11))),
        );
        let session = session_with(ledger.clone());

        let quote = session.quote(&quote_request()).await.unwrap();
        let report = session
            .submit_deposit(&deposit_input(), &quote)
            .await
            .unwrap();

        assert!(report.plan.steps[0].satisfied_at_build);
        assert_eq!(report.state.statuses[0], StepStatus::Skipped);
        assert_eq!(ledger.submitted_count(), 1);
        assert_eq!(session.phase(), SessionPhase::Success);
    }

    #[tokio::test]
    async fn test_stale_cancel_does_not_leak_into_the_next_action() {
        let ledger = funded_ledger();
        let session = session_with(ledger);

        // Cancel aimed at no action at all; the next submission must not
        // observe it.
        session.cancel();

        let quote = session.quote(&quote_request()).await.unwrap();
        let report = session
            .submit_deposit(&deposit_input(), &quote)
            .await
            .unwrap();
        assert!(matches!(
            report.state.outcome,
            Some(PlanOutcome::Completed)
        ));
    }

    #[tokio::test]
    async fn test_display_steps_track_the_current_plan() {
        let ledger = funded_ledger();
        let session = session_with(ledger);
        assert!(session.display_steps().is_empty());

        let quote = session.quote(&quote_request()).await.unwrap();
        session
            .submit_deposit(&deposit_input(), &quote)
            .await
            .unwrap();

        let rows = session.display_steps();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["approve-pool", "deposit-pool"]);
        assert!(rows.iter().all(|r| r.status == DisplayStatus::Completed));
    }

    #[test]
    fn test_only_executing_blocks_a_new_action() {
        assert!(SessionPhase::Input.can_start());
        assert!(SessionPhase::Success.can_start());
        assert!(SessionPhase::Errored.can_start());
        assert!(!SessionPhase::Executing.can_start());
    }
}
