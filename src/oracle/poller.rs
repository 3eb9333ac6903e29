//! Background price polling with latest-wins publication.

use super::PriceOracle;
use crate::domain::primitives::TokenSymbol;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Latest known USD prices for the tracked symbols. `None` means the feed
/// has no quote; display layers show "unavailable" rather than a stale
/// number.
#[derive(Debug, Clone, Default)]
pub struct PriceBoard {
    pub prices: HashMap<TokenSymbol, Option<Decimal>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PriceBoard {
    /// Price for a symbol, if the feed has one.
    pub fn price(&self, symbol: &TokenSymbol) -> Option<Decimal> {
        self.prices.get(symbol).copied().flatten()
    }
}

/// Polls a [`PriceOracle`] on an interval and publishes each refresh over a
/// watch channel. Consumers always observe the latest board; intermediate
/// refreshes they missed are dropped, never queued.
pub struct PricePoller {
    oracle: Arc<dyn PriceOracle>,
    symbols: Vec<TokenSymbol>,
    interval: Duration,
}

impl PricePoller {
    pub fn new(oracle: Arc<dyn PriceOracle>, symbols: Vec<TokenSymbol>, interval: Duration) -> Self {
        Self {
            oracle,
            symbols,
            interval,
        }
    }

    /// Start polling. The task stops when every receiver is dropped or the
    /// handle is aborted.
    pub fn spawn(self) -> (watch::Receiver<PriceBoard>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(PriceBoard::default());
        let handle = tokio::spawn(async move {
            let mut previous = PriceBoard::default();
            loop {
                let board = self.fetch_board(&previous).await;
                previous = board.clone();
                if tx.send(board).is_err() {
                    break;
                }
                tokio::time::sleep(self.interval).await;
            }
        });
        (rx, handle)
    }

    /// Fetch all symbols concurrently. A failed fetch keeps the symbol's
    /// previous value rather than blanking it.
    async fn fetch_board(&self, previous: &PriceBoard) -> PriceBoard {
        let fetches = self.symbols.iter().map(|symbol| {
            let oracle = Arc::clone(&self.oracle);
            async move {
                let result = oracle.usd_price(symbol).await;
                (symbol.clone(), result)
            }
        });

        let mut prices = HashMap::new();
        for (symbol, result) in join_all(fetches).await {
            let value = match result {
                Ok(price) => price,
                Err(err) => {
                    warn!("Price fetch failed for {}: {}", symbol, err);
                    previous.prices.get(&symbol).copied().flatten()
                }
            };
            prices.insert(symbol, value);
        }
        PriceBoard {
            prices,
            updated_at: Some(Utc::now()),
        }
    }
}
