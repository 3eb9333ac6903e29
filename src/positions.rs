//! Position loading: wallet and pool balances for one market and owner.
//!
//! The index is the preferred source for balances. Pool supplies and
//! withdrawal windows gate mutating flows, so those always come from the
//! chain. When the index reports no deposit for a pool, the chain is probed
//! directly if the market shares its pegged token with other markets, since
//! a per-token index cannot attribute such deposits to the right market.

use alloy_primitives::{Address, U256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chain::LedgerClient;
use crate::domain::market::{Market, MarketId, PoolKind};
use crate::domain::position::{PoolPosition, Positions};
use crate::error::FlowError;
use crate::index::{IndexedPoolDeposit, IndexedWalletBalance, PositionIndex};
use crate::registry::MarketRegistry;

pub struct PositionService {
    ledger: Arc<dyn LedgerClient>,
    index: Arc<dyn PositionIndex>,
    registry: Arc<MarketRegistry>,
}

impl PositionService {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        index: Arc<dyn PositionIndex>,
        registry: Arc<MarketRegistry>,
    ) -> Self {
        PositionService {
            ledger,
            index,
            registry,
        }
    }

    /// Load the owner's positions in one market.
    pub async fn load(&self, market_id: &MarketId, owner: Address) -> Result<Positions, FlowError> {
        let market = self.registry.market(market_id)?;

        // One degraded index call degrades them all; flows keep working off
        // chain reads alone.
        let (indexed_deposits, indexed_wallets) = match futures::try_join!(
            self.index.pool_deposits(owner),
            self.index.wallet_balances(owner),
        ) {
            Ok((deposits, wallets)) => (Some(deposits), Some(wallets)),
            Err(e) => {
                warn!(error = %e, "position index unavailable, reading positions from chain");
                (None, None)
            }
        };

        let wallet = self
            .wallet_balance(market, owner, indexed_wallets.as_deref())
            .await?;
        let collateral = self
            .pool_position(
                market,
                PoolKind::Collateral,
                owner,
                indexed_deposits.as_deref(),
            )
            .await?;
        let sail = self
            .pool_position(market, PoolKind::Sail, owner, indexed_deposits.as_deref())
            .await?;

        debug!(
            market = %market.id,
            %owner,
            %wallet,
            collateral = ?collateral.as_ref().map(|p| p.balance),
            sail = ?sail.as_ref().map(|p| p.balance),
            "positions loaded"
        );

        Ok(Positions {
            wallet,
            collateral,
            sail,
        })
    }

    async fn wallet_balance(
        &self,
        market: &Market,
        owner: Address,
        indexed: Option<&[IndexedWalletBalance]>,
    ) -> Result<U256, FlowError> {
        let indexed_balance = indexed.and_then(|rows| {
            rows.iter()
                .find(|row| row.token == market.pegged_token)
                .map(|row| row.balance)
        });
        match indexed_balance {
            Some(balance) => Ok(balance),
            // A missing wallet row is common (fresh wallet, index lag);
            // the token address is exact, so one chain read settles it.
            None => Ok(self
                .ledger
                .erc20_balance(market.pegged_token, owner)
                .await?),
        }
    }

    async fn pool_position(
        &self,
        market: &Market,
        kind: PoolKind,
        owner: Address,
        indexed: Option<&[IndexedPoolDeposit]>,
    ) -> Result<Option<PoolPosition>, FlowError> {
        let Some(pool) = market.pool_address(kind) else {
            return Ok(None);
        };

        let (total_supply, min_total_supply, window) = futures::try_join!(
            self.ledger.pool_total_supply(pool),
            self.ledger.pool_min_total_supply(pool),
            self.ledger.withdrawal_window(pool, owner),
        )?;

        let indexed_balance = indexed.and_then(|rows| {
            rows.iter()
                .find(|row| row.pool == pool)
                .map(|row| row.balance)
        });
        let balance = match (indexed, indexed_balance) {
            (Some(_), Some(balance)) => balance,
            (Some(_), None) if self.registry.sharing_pegged_token(market).is_empty() => U256::ZERO,
            // Index outage, or the pegged token is shared across markets and
            // the index cannot attribute the deposit. Probe the pool.
            _ => self.ledger.pool_balance(pool, owner).await?,
        };

        Ok(Some(PoolPosition {
            pool,
            kind,
            balance,
            total_supply,
            min_total_supply,
            window,
        }))
    }
}

impl std::fmt::Debug for PositionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionService").finish_non_exhaustive()
    }
}
