//! Position index abstraction.
//!
//! The index is an off-chain view of pool deposits and wallet balances,
//! faster than contract reads but potentially behind them. Callers that need
//! authority reconcile against the ledger.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use std::fmt;

pub mod http;
pub mod mock;

pub use http::GraphIndexClient;
pub use mock::MockPositionIndex;

/// One pool stake as the index sees it. `pool_type` is the index's own
/// label; position loading matches pools by address, not by this string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedPoolDeposit {
    pub pool: Address,
    pub pool_type: String,
    pub balance: U256,
}

/// One wallet token balance as the index sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedWalletBalance {
    pub token: Address,
    pub balance: U256,
}

/// Indexed position reads for one account.
#[async_trait]
pub trait PositionIndex: Send + Sync + fmt::Debug {
    /// All pool stakes the index knows for `owner`, across every market.
    async fn pool_deposits(&self, owner: Address)
        -> Result<Vec<IndexedPoolDeposit>, IndexError>;

    /// Tracked token balances the index knows for `owner`.
    async fn wallet_balances(
        &self,
        owner: Address,
    ) -> Result<Vec<IndexedWalletBalance>, IndexError>;
}

/// Error type for index operations.
#[derive(Debug, Clone)]
pub enum IndexError {
    /// Network error (connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// Invalid JSON or malformed response
    ParseError(String),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            IndexError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            IndexError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for IndexError {}
