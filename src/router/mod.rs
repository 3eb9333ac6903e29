//! Swap aggregator abstraction for routing arbitrary assets into the
//! protocol's accepted tokens.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt;

pub mod http;
pub mod mock;

pub use http::AggregatorRouter;
pub use mock::MockSwapRouter;

/// Ready-to-submit swap call assembled by the aggregator. The calldata is
/// opaque; the aggregator embeds its own minimum-output bound in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapTx {
    pub to: Address,
    pub data: Vec<u8>,
    pub value: U256,
    pub gas_limit: Option<u64>,
}

/// A priced swap route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapQuote {
    /// `None` sells the native asset.
    pub from_token: Option<Address>,
    pub to_token: Address,
    pub amount_in: U256,
    pub expected_out: U256,
    /// Least output the embedded slippage bound will accept.
    pub min_out: U256,
    /// Aggregator fee as a percentage, when reported.
    pub fee_pct: Option<Decimal>,
    pub tx: SwapTx,
}

/// Quote source for aggregator swaps.
#[async_trait]
pub trait SwapRouter: Send + Sync + fmt::Debug {
    /// Price a swap of `amount_in` and return the executable call.
    ///
    /// `slippage_bps` bounds how far below the quoted output the embedded
    /// minimum may sit.
    async fn quote(
        &self,
        from_token: Option<Address>,
        to_token: Address,
        amount_in: U256,
        slippage_bps: u32,
    ) -> Result<SwapQuote, RouterError>;
}

/// Error type for aggregator operations.
#[derive(Debug, Clone)]
pub enum RouterError {
    /// Network error (connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// Invalid JSON or malformed response
    ParseError(String),
    /// The aggregator found no route for this pair
    NoRoute(String),
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            RouterError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            RouterError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            RouterError::NoRoute(msg) => write!(f, "No route: {}", msg),
        }
    }
}

impl std::error::Error for RouterError {}
