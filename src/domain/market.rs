//! Market descriptors: the contract set and accepted deposit assets for one
//! pegged-token deployment.

use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::amount::Precision;
use crate::domain::primitives::{ChainId, TokenSymbol};

/// Stable market identifier (e.g., "fxsave-steth").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketId(pub String);

impl MarketId {
    pub fn new(id: impl Into<String>) -> Self {
        MarketId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MarketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which staking pool within a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Collateral-side pool; gains accrue in the pegged token.
    Collateral,
    /// Leverage-side pool.
    Sail,
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolKind::Collateral => write!(f, "collateral"),
            PoolKind::Sail => write!(f, "sail"),
        }
    }
}

/// How a deposit asset reaches the pegged token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositRoute {
    /// The asset is the pegged token itself; stake it directly.
    PeggedDirect,
    /// The asset is the wrapped collateral; mint against it.
    MintWrapped,
    /// Native asset or unwrapped underlying; one zap call wraps and mints.
    Zap,
    /// Anything else; aggregator swap into the underlying, then zap.
    SwapThenZap,
}

/// One asset a market accepts for deposits, and the route it takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositAsset {
    pub symbol: TokenSymbol,
    /// `None` for the chain's native asset.
    pub token: Option<Address>,
    pub precision: Precision,
    pub route: DepositRoute,
}

impl DepositAsset {
    pub fn is_native(&self) -> bool {
        self.token.is_none()
    }
}

/// Full contract set for one market. Optional addresses are features a given
/// deployment may lack (no sail pool, no zap, minting retired).
#[derive(Debug, Clone)]
pub struct Market {
    pub id: MarketId,
    pub chain: ChainId,
    pub pegged_symbol: TokenSymbol,
    pub pegged_token: Address,
    pub wrapped_symbol: TokenSymbol,
    /// Wrapped collateral; also the ERC-4626-style wrapper queried for live
    /// underlying-to-wrapped conversion.
    pub wrapped_token: Address,
    pub underlying_symbol: TokenSymbol,
    /// `None` when the underlying is the chain's native asset.
    pub underlying_token: Option<Address>,
    /// Static wrapped-per-underlying rate (1e18 scale) used when the live
    /// conversion read is unavailable.
    pub wrap_rate_fallback: Option<U256>,
    pub minter: Option<Address>,
    pub zap: Option<Address>,
    pub collateral_pool: Option<Address>,
    pub sail_pool: Option<Address>,
    /// Genesis bootstrap contract, carried for completeness; no flow in this
    /// engine targets it.
    pub genesis: Option<Address>,
    /// Flat early-withdrawal fee shown whenever no window is open.
    pub flat_withdrawal_fee_pct: Decimal,
    pub deposit_assets: Vec<DepositAsset>,
}

impl Market {
    /// Address of the requested pool, if this market has one.
    pub fn pool_address(&self, kind: PoolKind) -> Option<Address> {
        match kind {
            PoolKind::Collateral => self.collateral_pool,
            PoolKind::Sail => self.sail_pool,
        }
    }

    /// Look up a deposit asset by symbol.
    pub fn deposit_asset(&self, symbol: &TokenSymbol) -> Option<&DepositAsset> {
        self.deposit_assets.iter().find(|a| &a.symbol == symbol)
    }

    /// Whether this market can mint at all (a retired deployment keeps pools
    /// alive but drops its minter).
    pub fn can_mint(&self) -> bool {
        self.minter.is_some()
    }
}
