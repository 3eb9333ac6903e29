//! Domain primitives: ChainId, TokenSymbol, Timestamp, TxHash.

use serde::{Deserialize, Serialize};

/// Transaction hash.
pub type TxHash = alloy_primitives::B256;

/// EVM chain identifier (e.g., 1 for mainnet, 31337 for a local fork).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChainId(pub u64);

impl ChainId {
    /// Create a ChainId from a raw numeric id.
    pub fn new(id: u64) -> Self {
        ChainId(id)
    }

    /// Get the underlying numeric id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token symbol (e.g., "fUSD", "wstETH").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenSymbol(pub String);

impl TokenSymbol {
    /// Create a TokenSymbol from a string.
    pub fn new(symbol: impl Into<String>) -> Self {
        TokenSymbol(symbol.into())
    }

    /// Get the symbol as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TokenSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Time in seconds since Unix epoch (on-chain timestamp convention).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a Timestamp from seconds.
    pub fn new(secs: u64) -> Self {
        Timestamp(secs)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Timestamp(chrono::Utc::now().timestamp().max(0) as u64)
    }

    /// Get the underlying seconds value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Seconds from `self` until `later`, or zero if `later` is in the past.
    pub fn until(&self, later: Timestamp) -> u64 {
        later.0.saturating_sub(self.0)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
