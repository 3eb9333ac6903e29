//! Mock position index for testing without an indexer.

use super::{IndexError, IndexedPoolDeposit, IndexedWalletBalance, PositionIndex};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use std::collections::HashMap;

/// Mock index answering from predefined per-owner rows. An owner with no
/// rows gets empty answers, which is how a lagging or unsynced index looks.
#[derive(Debug, Clone, Default)]
pub struct MockPositionIndex {
    deposits: HashMap<Address, Vec<IndexedPoolDeposit>>,
    balances: HashMap<Address, Vec<IndexedWalletBalance>>,
    failing: bool,
}

impl MockPositionIndex {
    /// Create an empty mock index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pool deposit row for an owner.
    pub fn with_pool_deposit(
        mut self,
        owner: Address,
        pool: Address,
        pool_type: &str,
        balance: U256,
    ) -> Self {
        self.deposits.entry(owner).or_default().push(IndexedPoolDeposit {
            pool,
            pool_type: pool_type.to_string(),
            balance,
        });
        self
    }

    /// Add a wallet balance row for an owner.
    pub fn with_wallet_balance(mut self, owner: Address, token: Address, balance: U256) -> Self {
        self.balances
            .entry(owner)
            .or_default()
            .push(IndexedWalletBalance { token, balance });
        self
    }

    /// Make every query fail, simulating an indexer outage.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }
}

#[async_trait]
impl PositionIndex for MockPositionIndex {
    async fn pool_deposits(
        &self,
        owner: Address,
    ) -> Result<Vec<IndexedPoolDeposit>, IndexError> {
        if self.failing {
            return Err(IndexError::NetworkError("mock index offline".to_string()));
        }
        Ok(self.deposits.get(&owner).cloned().unwrap_or_default())
    }

    async fn wallet_balances(
        &self,
        owner: Address,
    ) -> Result<Vec<IndexedWalletBalance>, IndexError> {
        if self.failing {
            return Err(IndexError::NetworkError("mock index offline".to_string()));
        }
        Ok(self.balances.get(&owner).cloned().unwrap_or_default())
    }
}
