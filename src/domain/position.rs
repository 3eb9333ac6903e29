//! Account positions within a market and the early-withdrawal cap.

use alloy_primitives::{Address, U256};

use crate::domain::market::PoolKind;
use crate::domain::window::WithdrawalWindow;

/// An account's stake in one pool, together with the pool-level supply
/// figures that bound how much can leave early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolPosition {
    pub pool: Address,
    pub kind: PoolKind,
    /// The account's staked balance.
    pub balance: U256,
    pub total_supply: U256,
    /// Supply floor the pool will not shrink below outside a window.
    pub min_total_supply: U256,
    pub window: WithdrawalWindow,
}

impl PoolPosition {
    /// Largest amount withdrawable right now without a window: the account
    /// balance, clipped to how far the pool can shrink before hitting its
    /// supply floor.
    pub fn early_withdrawal_cap(&self) -> U256 {
        let headroom = self.total_supply.saturating_sub(self.min_total_supply);
        self.balance.min(headroom)
    }
}

/// Everything an account holds in one market.
#[derive(Debug, Clone, Default)]
pub struct Positions {
    /// Pegged-token wallet balance.
    pub wallet: U256,
    pub collateral: Option<PoolPosition>,
    pub sail: Option<PoolPosition>,
}

impl Positions {
    pub fn pool(&self, kind: PoolKind) -> Option<&PoolPosition> {
        match kind {
            PoolKind::Collateral => self.collateral.as_ref(),
            PoolKind::Sail => self.sail.as_ref(),
        }
    }

    /// True when the account has nothing staked and no pegged tokens.
    pub fn is_empty(&self) -> bool {
        self.wallet.is_zero()
            && self.collateral.as_ref().map_or(true, |p| p.balance.is_zero())
            && self.sail.as_ref().map_or(true, |p| p.balance.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(balance: u64, total: u64, min_total: u64) -> PoolPosition {
        PoolPosition {
            pool: Address::repeat_byte(0x66),
            kind: PoolKind::Collateral,
            balance: U256::from(balance),
            total_supply: U256::from(total),
            min_total_supply: U256::from(min_total),
            window: WithdrawalWindow::absent(),
        }
    }

    #[test]
    fn test_cap_limited_by_supply_floor() {
        // Balance 100, but the pool can only shed 50 before its floor.
        let p = position(100, 1_000, 950);
        assert_eq!(p.early_withdrawal_cap(), U256::from(50u8));
    }

    #[test]
    fn test_cap_limited_by_balance() {
        let p = position(100, 10_000, 1_000);
        assert_eq!(p.early_withdrawal_cap(), U256::from(100u8));
    }

    #[test]
    fn test_cap_zero_when_pool_at_floor() {
        let p = position(100, 950, 950);
        assert_eq!(p.early_withdrawal_cap(), U256::ZERO);
        // A floor above the supply must not underflow.
        let p = position(100, 900, 950);
        assert_eq!(p.early_withdrawal_cap(), U256::ZERO);
    }

    #[test]
    fn test_positions_is_empty() {
        let mut positions = Positions::default();
        assert!(positions.is_empty());
        positions.wallet = U256::from(1u8);
        assert!(!positions.is_empty());
    }
}
