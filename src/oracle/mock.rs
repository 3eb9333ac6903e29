//! Mock price oracle for testing without a feed.

use super::{OracleError, PriceOracle};
use crate::domain::primitives::TokenSymbol;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Mock oracle answering from a fixed price table; anything unlisted is
/// "no price".
#[derive(Debug, Clone, Default)]
pub struct MockPriceOracle {
    prices: HashMap<TokenSymbol, Decimal>,
}

impl MockPriceOracle {
    /// Create a mock oracle with no prices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the USD price returned for a symbol.
    pub fn with_price(mut self, symbol: TokenSymbol, price: Decimal) -> Self {
        self.prices.insert(symbol, price);
        self
    }
}

#[async_trait]
impl PriceOracle for MockPriceOracle {
    async fn usd_price(&self, symbol: &TokenSymbol) -> Result<Option<Decimal>, OracleError> {
        Ok(self.prices.get(symbol).copied())
    }
}
