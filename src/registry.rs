//! Market registry: the static catalog of deployed markets.
//!
//! The catalog ships as JSON and is parsed into typed [`Market`] descriptors
//! up front, so address and rate mistakes surface at load time instead of
//! mid-flow.

use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::amount::Precision;
use crate::domain::market::{DepositAsset, DepositRoute, Market, MarketId};
use crate::domain::primitives::{ChainId, TokenSymbol};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Cannot read registry at {0}")]
    Unreadable(String),
    #[error("Invalid registry JSON: {0}")]
    Json(String),
    #[error("Invalid market {market}: {reason}")]
    InvalidMarket { market: String, reason: String },
    #[error("Duplicate market id: {0}")]
    DuplicateMarket(String),
    #[error("Unknown market: {0}")]
    UnknownMarket(String),
}

#[derive(Debug, Deserialize)]
struct RawRegistry {
    markets: Vec<RawMarket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMarket {
    id: String,
    chain_id: u64,
    pegged_symbol: String,
    pegged_token: String,
    wrapped_symbol: String,
    wrapped_token: String,
    underlying_symbol: String,
    #[serde(default)]
    underlying_token: Option<String>,
    #[serde(default)]
    wrap_rate_fallback: Option<String>,
    #[serde(default)]
    minter: Option<String>,
    #[serde(default)]
    zap: Option<String>,
    #[serde(default)]
    collateral_pool: Option<String>,
    #[serde(default)]
    sail_pool: Option<String>,
    #[serde(default)]
    genesis: Option<String>,
    flat_withdrawal_fee_pct: String,
    deposit_assets: Vec<RawDepositAsset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDepositAsset {
    symbol: String,
    #[serde(default)]
    token: Option<String>,
    decimals: u32,
    route: String,
}

/// Loaded, validated market catalog.
#[derive(Debug, Clone, Default)]
pub struct MarketRegistry {
    markets: Vec<Market>,
    by_id: HashMap<MarketId, usize>,
}

impl MarketRegistry {
    /// Build a registry from already-typed markets (tests, embedded setups).
    pub fn from_markets(markets: Vec<Market>) -> Result<Self, RegistryError> {
        let mut by_id = HashMap::new();
        for (idx, market) in markets.iter().enumerate() {
            if by_id.insert(market.id.clone(), idx).is_some() {
                return Err(RegistryError::DuplicateMarket(market.id.to_string()));
            }
        }
        Ok(MarketRegistry { markets, by_id })
    }

    /// Load and validate a JSON catalog file.
    pub fn from_json_file(path: &str) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| RegistryError::Unreadable(path.to_string()))?;
        Self::from_json_str(&content)
    }

    /// Parse and validate a JSON catalog.
    pub fn from_json_str(json: &str) -> Result<Self, RegistryError> {
        let raw: RawRegistry =
            serde_json::from_str(json).map_err(|e| RegistryError::Json(e.to_string()))?;
        let markets = raw
            .markets
            .into_iter()
            .map(convert_market)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_markets(markets)
    }

    /// Look up a market, erroring on unknown ids.
    pub fn market(&self, id: &MarketId) -> Result<&Market, RegistryError> {
        self.get(id)
            .ok_or_else(|| RegistryError::UnknownMarket(id.to_string()))
    }

    pub fn get(&self, id: &MarketId) -> Option<&Market> {
        self.by_id.get(id).map(|idx| &self.markets[*idx])
    }

    pub fn markets(&self) -> &[Market] {
        &self.markets
    }

    /// Other markets whose pegged token is the same contract. An index that
    /// tracks balances per token cannot tell these apart, so position reads
    /// for them fall back to the chain.
    pub fn sharing_pegged_token(&self, market: &Market) -> Vec<&Market> {
        self.markets
            .iter()
            .filter(|m| m.id != market.id && m.pegged_token == market.pegged_token)
            .collect()
    }
}

fn invalid(market: &str, reason: impl Into<String>) -> RegistryError {
    RegistryError::InvalidMarket {
        market: market.to_string(),
        reason: reason.into(),
    }
}

fn parse_addr(market: &str, field: &str, value: &str) -> Result<Address, RegistryError> {
    value
        .parse::<Address>()
        .map_err(|_| invalid(market, format!("{field} is not a valid address: {value}")))
}

fn parse_addr_opt(
    market: &str,
    field: &str,
    value: &Option<String>,
) -> Result<Option<Address>, RegistryError> {
    value
        .as_ref()
        .map(|v| parse_addr(market, field, v))
        .transpose()
}

fn convert_market(raw: RawMarket) -> Result<Market, RegistryError> {
    let id = raw.id.as_str();

    let wrap_rate_fallback = raw
        .wrap_rate_fallback
        .as_ref()
        .map(|v| {
            U256::from_str_radix(v, 10)
                .map_err(|_| invalid(id, format!("wrapRateFallback is not an integer: {v}")))
        })
        .transpose()?;

    let flat_withdrawal_fee_pct = Decimal::from_str(&raw.flat_withdrawal_fee_pct)
        .map_err(|_| invalid(id, "flatWithdrawalFeePct is not a decimal"))?;

    let minter = parse_addr_opt(id, "minter", &raw.minter)?;
    let zap = parse_addr_opt(id, "zap", &raw.zap)?;
    let underlying_token = parse_addr_opt(id, "underlyingToken", &raw.underlying_token)?;

    let mut deposit_assets = Vec::with_capacity(raw.deposit_assets.len());
    for asset in &raw.deposit_assets {
        let precision = match asset.decimals {
            18 => Precision::Ether,
            6 => Precision::Micro,
            other => {
                return Err(invalid(
                    id,
                    format!("asset {} has unsupported decimals {other}", asset.symbol),
                ))
            }
        };
        let route = match asset.route.as_str() {
            "pegged_direct" => DepositRoute::PeggedDirect,
            "mint_wrapped" => DepositRoute::MintWrapped,
            "zap" => DepositRoute::Zap,
            "swap_then_zap" => DepositRoute::SwapThenZap,
            other => {
                return Err(invalid(
                    id,
                    format!("asset {} has unknown route {other}", asset.symbol),
                ))
            }
        };
        // Routes only work if the contracts they drive exist.
        match route {
            DepositRoute::MintWrapped if minter.is_none() => {
                return Err(invalid(id, "mint_wrapped route requires a minter"));
            }
            DepositRoute::Zap if zap.is_none() => {
                return Err(invalid(id, "zap route requires a zap contract"));
            }
            DepositRoute::SwapThenZap if zap.is_none() || underlying_token.is_none() => {
                return Err(invalid(
                    id,
                    "swap_then_zap route requires a zap contract and an underlying token",
                ));
            }
            _ => {}
        }
        let token = parse_addr_opt(id, "asset token", &asset.token)?;
        if token.is_none() && precision != Precision::Ether {
            return Err(invalid(id, "native deposit assets must use 18 decimals"));
        }
        deposit_assets.push(DepositAsset {
            symbol: TokenSymbol::new(asset.symbol.clone()),
            token,
            precision,
            route,
        });
    }

    Ok(Market {
        id: MarketId::new(raw.id.clone()),
        chain: ChainId::new(raw.chain_id),
        pegged_symbol: TokenSymbol::new(raw.pegged_symbol),
        pegged_token: parse_addr(id, "peggedToken", &raw.pegged_token)?,
        wrapped_symbol: TokenSymbol::new(raw.wrapped_symbol),
        wrapped_token: parse_addr(id, "wrappedToken", &raw.wrapped_token)?,
        underlying_symbol: TokenSymbol::new(raw.underlying_symbol),
        underlying_token,
        wrap_rate_fallback,
        minter,
        zap,
        collateral_pool: parse_addr_opt(id, "collateralPool", &raw.collateral_pool)?,
        sail_pool: parse_addr_opt(id, "sailPool", &raw.sail_pool)?,
        genesis: parse_addr_opt(id, "genesis", &raw.genesis)?,
        flat_withdrawal_fee_pct,
        deposit_assets,
    })
}
