//! Plan builder: turns a confirmed user action into an ordered step plan.
//!
//! Plans are pure functions of fresh on-chain state plus the user's inputs,
//! which is what makes "retry" a plain rebuild: steps whose effect already
//! landed (an approval from an interrupted run) come back flagged as
//! satisfied and are skipped by the executor.

use alloy_primitives::{Address, U256};
use std::sync::Arc;
use tracing::debug;

use crate::chain::LedgerClient;
use crate::config::Config;
use crate::domain::amount::{parse_amount, Precision};
use crate::domain::market::{DepositRoute, Market, MarketId, PoolKind};
use crate::domain::primitives::{Timestamp, TokenSymbol};
use crate::domain::step::{
    AmountSource, CheckpointId, MinOutRule, PreviewVia, Step, StepAction, StepPlan,
};
use crate::domain::window::WindowStatus;
use crate::engine::quote::Quote;
use crate::error::FlowError;
use crate::positions::PositionService;
use crate::registry::MarketRegistry;

/// A confirmed deposit action.
#[derive(Debug, Clone)]
pub struct DepositInput {
    pub market: MarketId,
    pub asset: TokenSymbol,
    pub amount_text: String,
    /// Stake what the deposit produces in this pool; `None` leaves the
    /// pegged tokens in the wallet.
    pub pool: Option<PoolKind>,
}

/// A confirmed withdraw action.
#[derive(Debug, Clone)]
pub struct WithdrawInput {
    pub market: MarketId,
    /// Pegged tokens already in the wallet to include in the redemption.
    /// Empty text means none.
    pub wallet_amount_text: String,
    pub pools: Vec<PoolWithdrawal>,
    /// Stop after the withdraw legs, leaving pegged tokens in the wallet.
    pub withdraw_only: bool,
    pub slippage_bps: Option<u32>,
}

/// Per-pool withdrawal selection.
#[derive(Debug, Clone)]
pub struct PoolWithdrawal {
    pub kind: PoolKind,
    pub method: WithdrawalMethod,
    /// Ignored for [`WithdrawalMethod::Request`], which moves no tokens.
    pub amount_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalMethod {
    /// Start the fee-free window; tokens move later.
    Request,
    /// Withdraw now, bounded by the early-withdrawal cap and fee-bearing
    /// outside an open window.
    Immediate,
}

pub struct PlanBuilder {
    ledger: Arc<dyn LedgerClient>,
    positions: Arc<PositionService>,
    registry: Arc<MarketRegistry>,
    config: Arc<Config>,
}

impl PlanBuilder {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        positions: Arc<PositionService>,
        registry: Arc<MarketRegistry>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            ledger,
            positions,
            registry,
            config,
        }
    }

    /// Build the step plan for a deposit confirmed against `quote`.
    pub async fn build_deposit(
        &self,
        input: &DepositInput,
        quote: &Quote,
        actor: Address,
    ) -> Result<StepPlan, FlowError> {
        let market = self.registry.market(&input.market)?;
        let asset = market.deposit_asset(&input.asset).ok_or_else(|| {
            FlowError::PlanPrecondition(format!(
                "market {} does not accept {}",
                market.id, input.asset
            ))
        })?;
        let amount = parse_amount(&input.amount_text, asset.precision)?;

        // The quote the user confirmed must describe this exact action;
        // anything else means the inputs changed after it resolved.
        if quote.market != input.market || quote.asset != input.asset || quote.input_amount != amount
        {
            return Err(FlowError::PlanPrecondition(
                "quote is stale for the confirmed inputs".to_string(),
            ));
        }

        self.check_funding(asset.token, &asset.symbol, actor, amount)
            .await?;

        let pool = match input.pool {
            Some(kind) => Some(self.pool_target(market, kind)?),
            None => None,
        };

        let mut steps = Vec::new();
        match asset.route {
            DepositRoute::PeggedDirect => {
                let (kind, pool) = pool.ok_or_else(|| {
                    FlowError::PlanPrecondition(
                        "direct pegged deposits require a stability pool".to_string(),
                    )
                })?;
                steps.push(
                    self.approve_step(
                        "approve-pool",
                        format!("Approve {}", market.pegged_symbol),
                        market.pegged_token,
                        actor,
                        pool,
                        AmountSource::Fixed(amount),
                    )
                    .await?,
                );
                steps.push(Step::new(
                    "deposit-pool",
                    format!("Deposit into {kind} pool"),
                    StepAction::Deposit {
                        pool,
                        token: market.pegged_token,
                        amount: AmountSource::Fixed(amount),
                    },
                ));
            }
            DepositRoute::MintWrapped => {
                let minter = self.minter(market)?;
                steps.push(
                    self.approve_step(
                        "approve-minter",
                        format!("Approve {}", asset.symbol),
                        market.wrapped_token,
                        actor,
                        minter,
                        AmountSource::Fixed(amount),
                    )
                    .await?,
                );
                steps.push(
                    Step::new(
                        "mint",
                        format!("Mint {}", market.pegged_symbol),
                        StepAction::Mint {
                            minter,
                            collateral_token: market.wrapped_token,
                            amount: AmountSource::Fixed(amount),
                            min_out: MinOutRule::SlippageOnPreview {
                                bps: quote.slippage_bps,
                                via: PreviewVia::Mint { minter },
                            },
                        },
                    )
                    .recording(CheckpointId::MintOutput, market.pegged_token),
                );
                self.push_pool_leg(&mut steps, market, pool);
            }
            DepositRoute::Zap => {
                let zap = self.zap(market)?;
                if let Some(token) = asset.token {
                    steps.push(
                        self.approve_step(
                            "approve-zap",
                            format!("Approve {}", asset.symbol),
                            token,
                            actor,
                            zap,
                            AmountSource::Fixed(amount),
                        )
                        .await?,
                    );
                }
                steps.push(
                    Step::new(
                        "zap-mint",
                        format!("Mint {}", market.pegged_symbol),
                        StepAction::Zap {
                            zap,
                            asset: asset.token,
                            amount: AmountSource::Fixed(amount),
                            min_out: self.zap_min_out(market, quote.slippage_bps),
                        },
                    )
                    .recording(CheckpointId::MintOutput, market.pegged_token),
                );
                self.push_pool_leg(&mut steps, market, pool);
            }
            DepositRoute::SwapThenZap => {
                let zap = self.zap(market)?;
                let underlying = market.underlying_token.ok_or_else(|| {
                    FlowError::PlanPrecondition(format!(
                        "market {} has no underlying token for swap routing",
                        market.id
                    ))
                })?;
                let swap = quote.swap.as_ref().ok_or_else(|| {
                    FlowError::PlanPrecondition(
                        "quote carries no swap route for a swap-fed deposit".to_string(),
                    )
                })?;
                if let Some(token) = asset.token {
                    steps.push(
                        self.approve_step(
                            "approve-router",
                            format!("Approve {}", asset.symbol),
                            token,
                            actor,
                            swap.tx.to,
                            AmountSource::Fixed(amount),
                        )
                        .await?,
                    );
                }
                steps.push(
                    Step::new(
                        "swap",
                        format!("Swap {} for {}", asset.symbol, market.underlying_symbol),
                        StepAction::Swap {
                            router: swap.tx.to,
                            data: swap.tx.data.clone(),
                            value: swap.tx.value,
                        },
                    )
                    .recording(CheckpointId::SwapOutput, underlying),
                );
                // Everything downstream of the swap consumes the observed
                // swap output, never the quoted figure.
                steps.push(Step::new(
                    "approve-zap",
                    format!("Approve {}", market.underlying_symbol),
                    StepAction::Approve {
                        token: underlying,
                        spender: zap,
                        amount: AmountSource::DeltaSince(CheckpointId::SwapOutput),
                    },
                ));
                steps.push(
                    Step::new(
                        "zap-mint",
                        format!("Mint {}", market.pegged_symbol),
                        StepAction::Zap {
                            zap,
                            asset: Some(underlying),
                            amount: AmountSource::DeltaSince(CheckpointId::SwapOutput),
                            min_out: self.zap_min_out(market, quote.slippage_bps),
                        },
                    )
                    .recording(CheckpointId::MintOutput, market.pegged_token),
                );
                self.push_pool_leg(&mut steps, market, pool);
            }
        }

        let plan = StepPlan::new(market.id.clone(), actor, market.chain, steps);
        debug!(plan_id = %plan.plan_id, steps = plan.len(), route = ?asset.route, "deposit plan built");
        Ok(plan)
    }

    /// Build the step plan for a withdraw/redeem action from fresh
    /// positions.
    pub async fn build_withdraw(
        &self,
        input: &WithdrawInput,
        actor: Address,
    ) -> Result<StepPlan, FlowError> {
        let market = self.registry.market(&input.market)?;
        let positions = self.positions.load(&input.market, actor).await?;

        let wallet_amount = if input.wallet_amount_text.trim().is_empty() {
            U256::ZERO
        } else {
            parse_amount(&input.wallet_amount_text, Precision::Ether)?
        };
        if wallet_amount > positions.wallet {
            return Err(FlowError::InsufficientBalance {
                asset: market.pegged_symbol.to_string(),
                required: wallet_amount,
                available: positions.wallet,
            });
        }

        let now = Timestamp::now();
        let mut steps = Vec::new();
        let mut gains_recorded = false;
        for selection in &input.pools {
            let position = positions.pool(selection.kind).ok_or_else(|| {
                FlowError::PlanPrecondition(format!(
                    "no {} pool position in market {}",
                    selection.kind, market.id
                ))
            })?;
            match selection.method {
                WithdrawalMethod::Request => {
                    steps.push(Step::new(
                        format!("request-{}", selection.kind),
                        format!("Request withdrawal from {} pool", selection.kind),
                        StepAction::RequestWithdraw {
                            pool: position.pool,
                        },
                    ));
                }
                WithdrawalMethod::Immediate => {
                    let amount = parse_amount(&selection.amount_text, Precision::Ether)?;
                    // Inside an open window the full stake is withdrawable;
                    // outside it the pool's supply floor caps the amount.
                    let cap = if position.window.status(now) == WindowStatus::Open {
                        position.balance
                    } else {
                        position.early_withdrawal_cap()
                    };
                    if amount > cap {
                        return Err(FlowError::InsufficientBalance {
                            asset: format!("{} pool {}", selection.kind, market.pegged_symbol),
                            required: amount,
                            available: cap,
                        });
                    }
                    let mut step = Step::new(
                        format!("withdraw-{}", selection.kind),
                        format!("Withdraw from {} pool", selection.kind),
                        StepAction::Withdraw {
                            pool: position.pool,
                            amount: AmountSource::Fixed(amount),
                        },
                    );
                    if !gains_recorded {
                        step = step.recording(CheckpointId::WithdrawGains, market.pegged_token);
                        gains_recorded = true;
                    }
                    steps.push(step);
                }
            }
        }

        // Requests start a timer without yielding tokens, so a redeem leg
        // only exists when the wallet portion or an immediate withdrawal
        // produces something to redeem.
        let redeemable = wallet_amount > U256::ZERO || gains_recorded;
        if !input.withdraw_only && redeemable {
            let minter = self.minter(market)?;
            let amount = if gains_recorded {
                AmountSource::FixedPlusGains {
                    fixed: wallet_amount,
                    checkpoint: CheckpointId::WithdrawGains,
                }
            } else {
                AmountSource::Fixed(wallet_amount)
            };
            let approve = match amount {
                AmountSource::Fixed(fixed) => {
                    self.approve_step(
                        "approve-minter",
                        format!("Approve {}", market.pegged_symbol),
                        market.pegged_token,
                        actor,
                        minter,
                        AmountSource::Fixed(fixed),
                    )
                    .await?
                }
                _ => Step::new(
                    "approve-minter",
                    format!("Approve {}", market.pegged_symbol),
                    StepAction::Approve {
                        token: market.pegged_token,
                        spender: minter,
                        amount,
                    },
                ),
            };
            steps.push(approve);
            steps.push(Step::new(
                "redeem",
                format!("Redeem {}", market.pegged_symbol),
                StepAction::Redeem {
                    minter,
                    token: market.pegged_token,
                    amount,
                    min_out: MinOutRule::SlippageOnPreview {
                        bps: self
                            .config
                            .effective_slippage_bps(input.slippage_bps, false),
                        via: PreviewVia::Redeem { minter },
                    },
                },
            ));
        }

        if steps.is_empty() {
            return Err(FlowError::PlanPrecondition(
                "nothing selected to withdraw".to_string(),
            ));
        }

        let plan = StepPlan::new(market.id.clone(), actor, market.chain, steps);
        debug!(plan_id = %plan.plan_id, steps = plan.len(), "withdraw plan built");
        Ok(plan)
    }

    /// Approve step with a build-time allowance read; an already-covering
    /// allowance flags the step as satisfied.
    async fn approve_step(
        &self,
        id: &str,
        label: String,
        token: Address,
        owner: Address,
        spender: Address,
        amount: AmountSource,
    ) -> Result<Step, FlowError> {
        let satisfied = match amount {
            AmountSource::Fixed(required) => {
                let current = self.ledger.erc20_allowance(token, owner, spender).await?;
                current >= required
            }
            // Delta-sized approvals cannot be judged until the producing
            // step lands.
            _ => false,
        };
        Ok(Step::new(
            id,
            label,
            StepAction::Approve {
                token,
                spender,
                amount,
            },
        )
        .satisfied(satisfied))
    }

    fn push_pool_leg(
        &self,
        steps: &mut Vec<Step>,
        market: &Market,
        pool: Option<(PoolKind, Address)>,
    ) {
        let Some((kind, pool)) = pool else {
            return;
        };
        // The deposit consumes whatever the mint actually produced, so its
        // approval is delta-sized and never skippable at build time.
        steps.push(Step::new(
            "approve-pool",
            format!("Approve {}", market.pegged_symbol),
            StepAction::Approve {
                token: market.pegged_token,
                spender: pool,
                amount: AmountSource::DeltaSince(CheckpointId::MintOutput),
            },
        ));
        steps.push(Step::new(
            "deposit-pool",
            format!("Deposit into {kind} pool"),
            StepAction::Deposit {
                pool,
                token: market.pegged_token,
                amount: AmountSource::DeltaSince(CheckpointId::MintOutput),
            },
        ));
    }

    async fn check_funding(
        &self,
        token: Option<Address>,
        symbol: &TokenSymbol,
        actor: Address,
        required: U256,
    ) -> Result<(), FlowError> {
        let available = match token {
            Some(token) => self.ledger.erc20_balance(token, actor).await?,
            None => self.ledger.native_balance(actor).await?,
        };
        if available < required {
            return Err(FlowError::InsufficientBalance {
                asset: symbol.to_string(),
                required,
                available,
            });
        }
        Ok(())
    }

    fn pool_target(
        &self,
        market: &Market,
        kind: PoolKind,
    ) -> Result<(PoolKind, Address), FlowError> {
        market
            .pool_address(kind)
            .map(|pool| (kind, pool))
            .ok_or_else(|| {
                FlowError::PlanPrecondition(format!("market {} has no {kind} pool", market.id))
            })
    }

    fn minter(&self, market: &Market) -> Result<Address, FlowError> {
        market.minter.ok_or_else(|| {
            FlowError::PlanPrecondition(format!("market {} has no minter", market.id))
        })
    }

    fn zap(&self, market: &Market) -> Result<Address, FlowError> {
        market.zap.ok_or_else(|| {
            FlowError::PlanPrecondition(format!("market {} has no zap contract", market.id))
        })
    }

    /// Zap minimum-output rule; previews need a minter to model the mint.
    fn zap_min_out(&self, market: &Market, bps: u32) -> MinOutRule {
        match market.minter {
            Some(minter) => MinOutRule::SlippageOnPreview {
                bps,
                via: PreviewVia::WrapThenMint {
                    wrapper: market.wrapped_token,
                    minter,
                },
            },
            None => MinOutRule::None,
        }
    }
}

impl std::fmt::Debug for PlanBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanBuilder").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockLedger, PoolState};
    use crate::domain::market::DepositAsset;
    use crate::domain::primitives::ChainId;
    use crate::domain::window::WithdrawalWindow;
    use crate::engine::quote::{CapacityCheck, FeeQuote};
    use crate::index::MockPositionIndex;
    use crate::router::{SwapQuote, SwapTx};
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
            deposit_assets: vec![
                DepositAsset {
                    symbol: TokenSymbol::new("fUSD"),
                    token: Some(addr(0x11)),
                    precision: Precision::Ether,
                    route: DepositRoute::PeggedDirect,
                },
                DepositAsset {
                    symbol: TokenSymbol::new("wstETH"),
                    token: Some(addr(0x22)),
                    precision: Precision::Ether,
                    route: DepositRoute::MintWrapped,
                },
                DepositAsset {
                    symbol: TokenSymbol::new("USDC"),
                    token: Some(addr(0x77)),
                    precision: Precision::Micro,
                    route: DepositRoute::SwapThenZap,
                },
            ],
        }
    }

    fn builder_with(ledger: MockLedger, index: MockPositionIndex) -> PlanBuilder {
        let ledger: Arc<dyn LedgerClient> = Arc::new(ledger);
        let registry = Arc::new(MarketRegistry::from_markets(vec![market_fixture()]).unwrap());
        let positions = Arc::new(PositionService::new(
            ledger.clone(),
            Arc::new(index),
            registry.clone(),
        ));
        PlanBuilder::new(ledger, positions, registry, test_config())
    }

    fn quote_for(asset: &str, amount: U256, precision: Precision) -> Quote {
        Quote {
            market: MarketId::new("fusd-steth"),
            asset: TokenSymbol::new(asset),
            input_amount: amount,
            input_precision: precision,
            wrapped_amount: amount,
            expected_out: amount,
            min_received: amount,
            fee: FeeQuote::Known(Decimal::ZERO),
            capacity: CapacityCheck::Within,
            slippage_bps: 50,
            swap: None,
        }
    }

    fn deposit_input(asset: &str, amount: &str, pool: Option<PoolKind>) -> DepositInput {
        DepositInput {
            market: MarketId::new("fusd-steth"),
            asset: TokenSymbol::new(asset),
            amount_text: amount.to_string(),
            pool,
        }
    }

    fn step_ids(plan: &StepPlan) -> Vec<&str> {
        plan.steps.iter().map(|s| s.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_direct_deposit_plan() {
        let actor = addr(0x01);
        let ledger = MockLedger::new(ChainId::new(1)).with_balance(addr(0x11), actor, eth("100"));
        let builder = builder_with(ledger, MockPositionIndex::new());

        let input = deposit_input("fUSD", "100", Some(PoolKind::Collateral));
        let quote = quote_for("fUSD", eth("100"), Precision::Ether);
        let plan = builder.build_deposit(&input, &quote, actor).await.unwrap();

        assert_eq!(step_ids(&plan), vec!["approve-pool", "deposit-pool"]);
        assert!(!plan.steps[0].satisfied_at_build);
        assert_eq!(
            plan.steps[1].action,
            StepAction::Deposit {
                pool: addr(0x66),
                token: addr(0x11),
                amount: AmountSource::Fixed(eth("100")),
            }
        );
    }

    #[tokio::test]
    async fn test_existing_allowance_flags_approve_satisfied() {
        let actor = addr(0x01);
        let ledger = MockLedger::new(ChainId::new(1))
            .with_balance(addr(0x11), actor, eth("100"))
            .with_allowance(addr(0x11), actor, addr(0x66), eth("500"));
        let builder = builder_with(ledger, MockPositionIndex::new());

        let input = deposit_input("fUSD", "100", Some(PoolKind::Collateral));
        let quote = quote_for("fUSD", eth("100"), Precision::Ether);
        let plan = builder.build_deposit(&input, &quote, actor).await.unwrap();

        assert!(plan.steps[0].satisfied_at_build);
    }

    #[tokio::test]
    async fn test_mint_plan_sizes_pool_leg_from_observed_delta() {
        let actor = addr(0x01);
        let ledger = MockLedger::new(ChainId::new(1)).with_balance(addr(0x22), actor, eth("10"));
        let builder = builder_with(ledger, MockPositionIndex::new());

        let input = deposit_input("wstETH", "10", Some(PoolKind::Collateral));
        let quote = quote_for("wstETH", eth("10"), Precision::Ether);
        let plan = builder.build_deposit(&input, &quote, actor).await.unwrap();

        assert_eq!(
            step_ids(&plan),
            vec!["approve-minter", "mint", "approve-pool", "deposit-pool"]
        );
        let mint = plan.step(&crate::domain::step::StepId::new("mint")).unwrap();
        assert_eq!(mint.record_before.len(), 1);
        assert_eq!(mint.record_before[0].id, CheckpointId::MintOutput);
        assert_eq!(mint.record_before[0].token, addr(0x11));
        let deposit = &plan.steps[3];
        assert!(matches!(
            &deposit.action,
            StepAction::Deposit {
                amount: AmountSource::DeltaSince(CheckpointId::MintOutput),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_swap_then_zap_plan_order() {
        let actor = addr(0x01);
        let usdc = U256::from(100_000_000u64);
        let ledger = MockLedger::new(ChainId::new(1)).with_balance(addr(0x77), actor, usdc);
        let builder = builder_with(ledger, MockPositionIndex::new());

        let input = deposit_input("USDC", "100", None);
        let mut quote = quote_for("USDC", usdc, Precision::Micro);
        quote.swap = Some(SwapQuote {
            from_token: Some(addr(0x77)),
            to_token: addr(0x33),
            amount_in: usdc,
            expected_out: eth("0.04"),
            min_out: eth("0.0392"),
            fee_pct: None,
            tx: SwapTx {
                to: addr(0x88),
                data: vec![0x01, 0x02],
                value: U256::ZERO,
                gas_limit: Some(300_000),
            },
        });
        let plan = builder.build_deposit(&input, &quote, actor).await.unwrap();

        assert_eq!(
            step_ids(&plan),
            vec!["approve-router", "swap", "approve-zap", "zap-mint"]
        );
        let swap = &plan.steps[1];
        assert_eq!(swap.record_before[0].id, CheckpointId::SwapOutput);
        assert_eq!(swap.record_before[0].token, addr(0x33));
        assert!(matches!(
            &plan.steps[2].action,
            StepAction::Approve {
                amount: AmountSource::DeltaSince(CheckpointId::SwapOutput),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stale_quote_rejected() {
        let actor = addr(0x01);
        let ledger = MockLedger::new(ChainId::new(1)).with_balance(addr(0x11), actor, eth("100"));
        let builder = builder_with(ledger, MockPositionIndex::new());

        let input = deposit_input("fUSD", "100", Some(PoolKind::Collateral));
        // Quote was computed for a different amount.
        let quote = quote_for("fUSD", eth("90"), Precision::Ether);
        let err = builder
            .build_deposit(&input, &quote, actor)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::PlanPrecondition(_)));
    }

    #[tokio::test]
    async fn test_underfunded_deposit_rejected() {
        let actor = addr(0x01);
        let ledger = MockLedger::new(ChainId::new(1)).with_balance(addr(0x11), actor, eth("40"));
        let builder = builder_with(ledger, MockPositionIndex::new());

        let input = deposit_input("fUSD", "100", Some(PoolKind::Collateral));
        let quote = quote_for("fUSD", eth("100"), Precision::Ether);
        let err = builder
            .build_deposit(&input, &quote, actor)
            .await
            .unwrap_err();
        match err {
            FlowError::InsufficientBalance { available, .. } => assert_eq!(available, eth("40")),
            other => panic!("expected insufficient balance, got {other:?}"),
        }
    }

    fn staked_ledger(actor: Address) -> MockLedger {
        let mut pool = PoolState::new(addr(0x11));
        pool.total_supply = eth("1000");
        pool.min_total_supply = eth("950");
        pool.deposits.insert(actor, eth("100"));
        MockLedger::new(ChainId::new(1))
            .with_balance(addr(0x11), actor, eth("10"))
            .with_pool(addr(0x66), pool)
    }

    fn staked_index(actor: Address) -> MockPositionIndex {
        MockPositionIndex::new()
            .with_pool_deposit(actor, addr(0x66), "collateral", eth("100"))
            .with_wallet_balance(actor, addr(0x11), eth("10"))
    }

    fn withdraw_input(
        wallet: &str,
        pools: Vec<PoolWithdrawal>,
        withdraw_only: bool,
    ) -> WithdrawInput {
        WithdrawInput {
            market: MarketId::new("fusd-steth"),
            wallet_amount_text: wallet.to_string(),
            pools,
            withdraw_only,
            slippage_bps: None,
        }
    }

    #[tokio::test]
    async fn test_request_only_plan_has_no_redeem_leg() {
        let actor = addr(0x01);
        let builder = builder_with(staked_ledger(actor), staked_index(actor));

        let input = withdraw_input(
            "",
            vec![PoolWithdrawal {
                kind: PoolKind::Collateral,
                method: WithdrawalMethod::Request,
                amount_text: String::new(),
            }],
            false,
        );
        let plan = builder.build_withdraw(&input, actor).await.unwrap();
        assert_eq!(step_ids(&plan), vec!["request-collateral"]);
    }

    #[tokio::test]
    async fn test_immediate_withdrawal_over_cap_rejected() {
        let actor = addr(0x01);
        let builder = builder_with(staked_ledger(actor), staked_index(actor));

        // Cap is min(100, 1000 - 950) = 50.
        let input = withdraw_input(
            "",
            vec![PoolWithdrawal {
                kind: PoolKind::Collateral,
                method: WithdrawalMethod::Immediate,
                amount_text: "60".to_string(),
            }],
            true,
        );
        let err = builder.build_withdraw(&input, actor).await.unwrap_err();
        match err {
            FlowError::InsufficientBalance {
                required,
                available,
                ..
            } => {
                assert_eq!(required, eth("60"));
                assert_eq!(available, eth("50"));
            }
            other => panic!("expected the cap guard, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_window_lifts_cap_to_full_stake() {
        let actor = addr(0x01);
        let ledger = staked_ledger(actor);
        let now = Timestamp::now().as_u64();
        ledger.set_window(
            addr(0x66),
            actor,
            WithdrawalWindow::new(now.saturating_sub(60), now + 3600),
        );
        let builder = builder_with(ledger, staked_index(actor));

        let input = withdraw_input(
            "",
            vec![PoolWithdrawal {
                kind: PoolKind::Collateral,
                method: WithdrawalMethod::Immediate,
                amount_text: "100".to_string(),
            }],
            true,
        );
        let plan = builder.build_withdraw(&input, actor).await.unwrap();
        assert_eq!(step_ids(&plan), vec!["withdraw-collateral"]);
    }

    #[tokio::test]
    async fn test_withdraw_and_redeem_sized_from_observed_gains() {
        let actor = addr(0x01);
        let builder = builder_with(staked_ledger(actor), staked_index(actor));

        let input = withdraw_input(
            "10",
            vec![PoolWithdrawal {
                kind: PoolKind::Collateral,
                method: WithdrawalMethod::Immediate,
                amount_text: "40".to_string(),
            }],
            false,
        );
        let plan = builder.build_withdraw(&input, actor).await.unwrap();
        assert_eq!(
            step_ids(&plan),
            vec!["withdraw-collateral", "approve-minter", "redeem"]
        );
        // The withdraw snapshots the wallet so the redeem can consume the
        // observed gain.
        assert_eq!(
            plan.steps[0].record_before[0].id,
            CheckpointId::WithdrawGains
        );
        let expected = AmountSource::FixedPlusGains {
            fixed: eth("10"),
            checkpoint: CheckpointId::WithdrawGains,
        };
        assert!(matches!(
            &plan.steps[2].action,
            StepAction::Redeem { amount, .. } if *amount == expected
        ));
    }

    #[tokio::test]
    async fn test_wallet_only_redeem_uses_fixed_amount() {
        let actor = addr(0x01);
        let builder = builder_with(staked_ledger(actor), staked_index(actor));

        let input = withdraw_input("10", Vec::new(), false);
        let plan = builder.build_withdraw(&input, actor).await.unwrap();
        assert_eq!(step_ids(&plan), vec!["approve-minter", "redeem"]);
        assert!(matches!(
            &plan.steps[1].action,
            StepAction::Redeem {
                amount: AmountSource::Fixed(fixed),
                ..
            } if *fixed == eth("10")
        ));
    }

    #[tokio::test]
    async fn test_wallet_amount_over_balance_rejected() {
        let actor = addr(0x01);
        let builder = builder_with(staked_ledger(actor), staked_index(actor));

        let input = withdraw_input("11", Vec::new(), false);
        let err = builder.build_withdraw(&input, actor).await.unwrap_err();
        assert!(matches!(err, FlowError::InsufficientBalance { .. }));
    }

    #[tokio::test]
    async fn test_empty_withdraw_rejected() {
        let actor = addr(0x01);
        let builder = builder_with(staked_ledger(actor), staked_index(actor));

        let input = withdraw_input("", Vec::new(), false);
        let err = builder.build_withdraw(&input, actor).await.unwrap_err();
        assert!(matches!(err, FlowError::PlanPrecondition(_)));
    }
}
