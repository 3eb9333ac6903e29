//! USD price oracle abstraction.
//!
//! Prices are advisory display data only; no flow math depends on them. An
//! unavailable price is a normal answer, not an error.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt;

use crate::domain::primitives::TokenSymbol;

pub mod http;
pub mod mock;
pub mod poller;

pub use http::PriceFeedClient;
pub use mock::MockPriceOracle;
pub use poller::{PriceBoard, PricePoller};

/// Spot USD price source.
#[async_trait]
pub trait PriceOracle: Send + Sync + fmt::Debug {
    /// Current USD price for a symbol, or `None` when the feed has no
    /// quote for it.
    async fn usd_price(&self, symbol: &TokenSymbol) -> Result<Option<Decimal>, OracleError>;
}

/// Error type for price feed operations.
#[derive(Debug, Clone)]
pub enum OracleError {
    /// Network error (connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// Invalid JSON or malformed response
    ParseError(String),
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            OracleError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            OracleError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for OracleError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_error_display() {
        let err = OracleError::NetworkError("timeout".to_string());
        assert_eq!(err.to_string(), "Network error: timeout");
    }
}
