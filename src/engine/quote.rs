//! Quote engine: answers "what will this deposit produce, at what fee, and
//! will the protocol take it all?"
//!
//! Quotes are built entirely from read-only calls. The conversion chain from
//! the input asset to wrapped collateral depends on the asset's deposit
//! route; the mint outcome comes from the minter's dry run; capacity is
//! checked against the minter's remaining headroom and inverted back into
//! input-asset units so callers can cap the field.

use alloy_primitives::{I256, U256};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::chain::{LedgerClient, LedgerError};
use crate::config::Config;
use crate::domain::amount::{parse_amount, pow10, Precision};
use crate::domain::market::{DepositAsset, DepositRoute, Market, MarketId};
use crate::domain::primitives::TokenSymbol;
use crate::error::{decode_revert, FlowError};
use crate::registry::MarketRegistry;
use crate::router::{SwapQuote, SwapRouter};

/// User inputs a quote is computed from.
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub market: MarketId,
    pub asset: TokenSymbol,
    /// Raw text from the amount field.
    pub amount_text: String,
    /// Overrides the configured default slippage when set.
    pub slippage_bps: Option<u32>,
}

/// Mint fee for the quoted deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeeQuote {
    /// Fee as a percentage; negative values are a rebate.
    Known(Decimal),
    /// The dry run reverted, the market has no minter, or minting is
    /// currently disallowed. Callers suppress fee displays and fee-based
    /// warnings; the transaction itself is not blocked.
    Unavailable,
}

impl FeeQuote {
    pub fn is_known(&self) -> bool {
        matches!(self, FeeQuote::Known(_))
    }
}

/// Where the input sits relative to the minter's remaining capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityCheck {
    Within,
    /// Input is at (or within 0.01 of) the maximum acceptable amount.
    /// Non-blocking notice; no adjustment needed.
    AtMax { max_input: U256 },
    /// Input exceeds the maximum acceptable amount; callers should cap the
    /// field to `max_input`.
    Clamped { max_input: U256 },
}

/// A computed deposit quote.
#[derive(Debug, Clone)]
pub struct Quote {
    pub market: MarketId,
    pub asset: TokenSymbol,
    /// Parsed input in raw units at `input_precision`.
    pub input_amount: U256,
    pub input_precision: Precision,
    /// Wrapped collateral presented to the minter; zero for direct
    /// pegged-token deposits.
    pub wrapped_amount: U256,
    /// Pegged tokens this deposit is expected to produce, 18 decimals.
    pub expected_out: U256,
    /// `expected_out` less the slippage tolerance.
    pub min_received: U256,
    pub fee: FeeQuote,
    pub capacity: CapacityCheck,
    /// Slippage tolerance actually applied, after the zap floor.
    pub slippage_bps: u32,
    /// Aggregator route for swap-fed deposits; the plan builder reuses its
    /// transaction payload.
    pub swap: Option<SwapQuote>,
}

pub struct QuoteEngine {
    ledger: Arc<dyn LedgerClient>,
    router: Arc<dyn SwapRouter>,
    registry: Arc<MarketRegistry>,
    config: Arc<Config>,
}

impl QuoteEngine {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        router: Arc<dyn SwapRouter>,
        registry: Arc<MarketRegistry>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            ledger,
            router,
            registry,
            config,
        }
    }

    pub async fn quote(&self, request: &QuoteRequest) -> Result<Quote, FlowError> {
        let market = self.registry.market(&request.market)?;
        let asset = market.deposit_asset(&request.asset).ok_or_else(|| {
            FlowError::PlanPrecondition(format!(
                "market {} does not accept {}",
                market.id, request.asset
            ))
        })?;
        let input = parse_amount(&request.amount_text, asset.precision)?;
        let zap_route = matches!(
            asset.route,
            DepositRoute::Zap | DepositRoute::SwapThenZap
        );
        let slippage_bps = self
            .config
            .effective_slippage_bps(request.slippage_bps, zap_route);

        if asset.route == DepositRoute::PeggedDirect {
            // Pegged tokens go into the pool as-is: no mint, no fee, no
            // slippage.
            return Ok(Quote {
                market: market.id.clone(),
                asset: asset.symbol.clone(),
                input_amount: input,
                input_precision: asset.precision,
                wrapped_amount: U256::ZERO,
                expected_out: input,
                min_received: input,
                fee: FeeQuote::Known(Decimal::ZERO),
                capacity: CapacityCheck::Within,
                slippage_bps,
                swap: None,
            });
        }

        let (wrapped, swap) = self.to_wrapped(market, asset, input, slippage_bps).await?;

        let (expected_out, fee, capacity) = match market.minter {
            None => (wrapped, FeeQuote::Unavailable, CapacityCheck::Within),
            Some(minter) => match self.ledger.preview_mint(minter, wrapped).await {
                Ok(preview) => {
                    let capacity_left = self.ledger.mint_capacity(minter).await?;
                    let capacity =
                        classify_capacity(input, asset.precision, wrapped, capacity_left);
                    (preview.minted, fee_from_ratio(preview.incentive_ratio), capacity)
                }
                Err(LedgerError::Revert { data }) => {
                    debug!(reason = %decode_revert(&data), "mint preview reverted, fee unknown");
                    (wrapped, FeeQuote::Unavailable, CapacityCheck::Within)
                }
                Err(e) => return Err(e.into()),
            },
        };

        let min_received = apply_slippage(expected_out, slippage_bps);
        debug!(
            market = %market.id,
            asset = %asset.symbol,
            %input,
            %wrapped,
            %expected_out,
            slippage_bps,
            "quote computed"
        );

        Ok(Quote {
            market: market.id.clone(),
            asset: asset.symbol.clone(),
            input_amount: input,
            input_precision: asset.precision,
            wrapped_amount: wrapped,
            expected_out,
            min_received,
            fee,
            capacity,
            slippage_bps,
            swap,
        })
    }

    /// Convert the input to wrapped-collateral units along the asset's
    /// deposit route.
    async fn to_wrapped(
        &self,
        market: &Market,
        asset: &DepositAsset,
        input: U256,
        slippage_bps: u32,
    ) -> Result<(U256, Option<SwapQuote>), FlowError> {
        match asset.route {
            DepositRoute::PeggedDirect => Ok((U256::ZERO, None)),
            DepositRoute::MintWrapped => Ok((input, None)),
            DepositRoute::Zap => Ok((self.wrap_estimate(market, input).await?, None)),
            DepositRoute::SwapThenZap => {
                let to_token = market.underlying_token.ok_or_else(|| {
                    FlowError::PlanPrecondition(format!(
                        "market {} has no underlying token for swap routing",
                        market.id
                    ))
                })?;
                let swap = self
                    .router
                    .quote(asset.token, to_token, input, slippage_bps)
                    .await?;
                let wrapped = self.wrap_estimate(market, swap.expected_out).await?;
                Ok((wrapped, Some(swap)))
            }
        }
    }

    /// Underlying-to-wrapped conversion: live read preferred, market
    /// fallback rate when the read is unavailable.
    async fn wrap_estimate(&self, market: &Market, underlying: U256) -> Result<U256, FlowError> {
        match self
            .ledger
            .convert_to_wrapped(market.wrapped_token, underlying)
            .await
        {
            Ok(wrapped) => Ok(wrapped),
            Err(e) => match market.wrap_rate_fallback {
                Some(rate) => {
                    warn!(error = %e, market = %market.id, "live wrap rate unavailable, using fallback");
                    Ok(underlying
                        .checked_mul(rate)
                        .map(|p| p / pow10(18))
                        .unwrap_or(U256::ZERO))
                }
                None => Err(e.into()),
            },
        }
    }
}

impl std::fmt::Debug for QuoteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteEngine").finish_non_exhaustive()
    }
}

fn fee_from_ratio(ratio: I256) -> FeeQuote {
    // Exactly 1e18 is the protocol's "minting disallowed" marker, not a
    // 100% fee.
    if ratio == I256::from_raw(pow10(18)) {
        return FeeQuote::Unavailable;
    }
    let Ok(raw) = Decimal::from_str(&ratio.to_string()) else {
        return FeeQuote::Unavailable;
    };
    // 1e18-scale ratio to percent: divide by 1e16.
    match raw.checked_div(Decimal::from(10_000_000_000_000_000u64)) {
        Some(pct) => FeeQuote::Known(pct.normalize()),
        None => FeeQuote::Unavailable,
    }
}

pub(crate) fn apply_slippage(amount: U256, slippage_bps: u32) -> U256 {
    let keep = U256::from(10_000u32.saturating_sub(slippage_bps));
    // An amount too large for the scale multiply keeps the full preview as
    // its floor.
    amount
        .checked_mul(keep)
        .map(|scaled| scaled / U256::from(10_000u32))
        .unwrap_or(amount)
}

/// Compare the input against the minter's remaining capacity, inverted
/// through the conversion chain into input-asset units.
///
/// Exceeding the maximum by more than 1e-5 of a unit asks the caller to cap
/// the field; sitting within 0.01 of the maximum (either side) is an "at
/// max" notice only. The gap between the bands is what keeps a capped input
/// from being re-adjusted on the next quote.
fn classify_capacity(
    input: U256,
    precision: Precision,
    wrapped: U256,
    capacity_left: U256,
) -> CapacityCheck {
    if wrapped.is_zero() || capacity_left == U256::MAX {
        return CapacityCheck::Within;
    }
    let Some(scaled) = input.checked_mul(capacity_left) else {
        return CapacityCheck::Within;
    };
    let max_input = scaled / wrapped;

    let decimals = precision.decimals();
    let reduce_epsilon = pow10(decimals.saturating_sub(5));
    let at_max_band = pow10(decimals.saturating_sub(2));

    let over = input.saturating_sub(max_input);
    if over > reduce_epsilon {
        CapacityCheck::Clamped { max_input }
    } else if max_input.saturating_sub(input) <= at_max_band {
        CapacityCheck::AtMax { max_input }
    } else {
        CapacityCheck::Within
    }
}

/// Debounces quote requests: only the latest request after a quiet period
/// reaches the engine, and a result that was superseded while its reads
/// were in flight is discarded. This is what prevents request storms while
/// the user is typing and what guarantees a quote is never reused across a
/// changed input.
#[derive(Clone)]
pub struct DebouncedQuoter {
    engine: Arc<QuoteEngine>,
    delay: Duration,
    generation: Arc<AtomicU64>,
}

impl DebouncedQuoter {
    pub fn new(engine: Arc<QuoteEngine>, delay: Duration) -> Self {
        Self {
            engine,
            delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Quote after the quiet period. Returns `None` when a newer request
    /// superseded this one.
    pub async fn quote(&self, request: QuoteRequest) -> Option<Result<Quote, FlowError>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return None;
        }
        let result = self.engine.quote(&request).await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return None;
        }
        Some(result)
    }
}
