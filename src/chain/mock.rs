//! In-memory ledger for tests and the local-fork environment.
//!
//! `MockLedger` models the account-visible effects of the protocol contracts:
//! balances, allowances, minter previews, pool shares, and withdrawal
//! windows. Submissions mutate the state the same way the simulation sees it,
//! so delta-observed amounts behave exactly as they would against a node.
//! Failure modes (user rejection, forced reverts, refused chain switches) are
//! scripted per-call.

use alloy_primitives::{Address, I256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{LedgerClient, LedgerError, MintPreview, Receipt, TxPayload, TxRequest};
use crate::domain::amount::pow10;
use crate::domain::primitives::{ChainId, Timestamp, TxHash};
use crate::domain::window::WithdrawalWindow;
use crate::error::{encode_error_string, KnownRevert};

/// Pseudo-token address under which native balances are tracked.
const NATIVE: Address = Address::ZERO;

/// Minter contract state.
#[derive(Debug, Clone)]
pub struct MinterState {
    pub pegged_token: Address,
    pub collateral_token: Address,
    /// Signed 1e18-scale incentive ratio; exactly 1e18 disallows minting.
    pub incentive_ratio: I256,
    /// Collateral the minter can still accept. `U256::MAX` means unlimited.
    pub capacity: U256,
    /// Collateral paid out per pegged token redeemed, 1e18 scale.
    pub redeem_rate: U256,
    pub paused: bool,
}

impl MinterState {
    pub fn new(pegged_token: Address, collateral_token: Address) -> Self {
        MinterState {
            pegged_token,
            collateral_token,
            incentive_ratio: I256::ZERO,
            capacity: U256::MAX,
            redeem_rate: pow10(18),
            paused: false,
        }
    }
}

/// Staking pool state.
#[derive(Debug, Clone)]
pub struct PoolState {
    /// Token the pool stakes (the pegged token).
    pub token: Address,
    pub total_supply: U256,
    /// Supply floor the pool will not shrink below outside a window.
    pub min_total_supply: U256,
    pub deposits: HashMap<Address, U256>,
    pub windows: HashMap<Address, WithdrawalWindow>,
    /// Fraction of a fee-path withdrawal actually paid out, in basis points.
    pub payout_bps: u32,
    pub min_deposit: U256,
    /// Seconds between a request and its window opening.
    pub request_delay_secs: u64,
    /// Seconds the window stays open.
    pub window_secs: u64,
}

impl PoolState {
    pub fn new(token: Address) -> Self {
        PoolState {
            token,
            total_supply: U256::ZERO,
            min_total_supply: U256::ZERO,
            deposits: HashMap::new(),
            windows: HashMap::new(),
            payout_bps: 10_000,
            min_deposit: U256::ZERO,
            request_delay_secs: 86_400,
            window_secs: 86_400,
        }
    }
}

/// Wiring for a zap contract: which wrapper and minter it drives.
#[derive(Debug, Clone, Copy)]
pub struct ZapConfig {
    pub wrapper: Address,
    pub minter: Address,
}

/// The swap a mock router payload instructs the ledger to perform. Encoded
/// as JSON in the `SwapRaw` calldata; `amount_out` is what the swap actually
/// delivers, which a router mock may script below its own quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapInstruction {
    /// `None` pays with the native asset.
    pub token_in: Option<Address>,
    pub token_out: Address,
    pub amount_in: U256,
    pub amount_out: U256,
}

impl SwapInstruction {
    pub fn encode(&self) -> Vec<u8> {
        // Serialization of this struct cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}

#[derive(Debug, Clone, Default)]
struct ChainState {
    /// (token, owner) -> balance; native balances live under [`NATIVE`].
    balances: HashMap<(Address, Address), U256>,
    /// (token, owner, spender) -> remaining allowance.
    allowances: HashMap<(Address, Address, Address), U256>,
    minters: HashMap<Address, MinterState>,
    /// wrapper -> wrapped-per-underlying rate, 1e18 scale.
    wrappers: HashMap<Address, U256>,
    pools: HashMap<Address, PoolState>,
    zaps: HashMap<Address, ZapConfig>,
}

#[derive(Debug)]
struct Inner {
    /// Chain whose state this ledger holds; calls targeting any other
    /// chain fail at submit.
    chain: ChainId,
    connected: ChainId,
    switch_allowed: bool,
    state: ChainState,
    reject_next_submit: bool,
    revert_next_submit: Option<Vec<u8>>,
    nonce: u64,
    receipts: HashMap<TxHash, Receipt>,
    submitted: Vec<TxRequest>,
}

/// In-memory [`LedgerClient`] with builder-style setup and per-call failure
/// scripting.
#[derive(Debug)]
pub struct MockLedger {
    inner: Mutex<Inner>,
}

impl MockLedger {
    /// Create a ledger for `chain` with the wallet already connected to it.
    pub fn new(chain: ChainId) -> Self {
        MockLedger {
            inner: Mutex::new(Inner {
                chain,
                connected: chain,
                switch_allowed: true,
                state: ChainState::default(),
                reject_next_submit: false,
                revert_next_submit: None,
                nonce: 0,
                receipts: HashMap::new(),
                submitted: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning would mean a panic mid-test; propagating the inner
        // state is still the most useful behavior there.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start with the wallet connected to a different chain.
    pub fn with_connected_chain(self, chain: ChainId) -> Self {
        self.lock().connected = chain;
        self
    }

    /// Allow or refuse wallet chain switches.
    pub fn with_switch_allowed(self, allowed: bool) -> Self {
        self.lock().switch_allowed = allowed;
        self
    }

    pub fn with_native_balance(self, owner: Address, amount: U256) -> Self {
        self.lock().state.balances.insert((NATIVE, owner), amount);
        self
    }

    pub fn with_balance(self, token: Address, owner: Address, amount: U256) -> Self {
        self.lock().state.balances.insert((token, owner), amount);
        self
    }

    pub fn with_allowance(
        self,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Self {
        self.lock()
            .state
            .allowances
            .insert((token, owner, spender), amount);
        self
    }

    /// Register a wrapper with a wrapped-per-underlying rate (1e18 scale).
    pub fn with_wrapper(self, wrapper: Address, rate: U256) -> Self {
        self.lock().state.wrappers.insert(wrapper, rate);
        self
    }

    pub fn with_minter(self, minter: Address, state: MinterState) -> Self {
        self.lock().state.minters.insert(minter, state);
        self
    }

    pub fn with_pool(self, pool: Address, state: PoolState) -> Self {
        self.lock().state.pools.insert(pool, state);
        self
    }

    pub fn with_zap(self, zap: Address, config: ZapConfig) -> Self {
        self.lock().state.zaps.insert(zap, config);
        self
    }

    /// Reject the next signature request, as a wallet owner clicking
    /// "cancel" would.
    pub fn reject_next_submit(&self) {
        self.lock().reject_next_submit = true;
    }

    /// Force the next submission to revert with the given payload.
    pub fn revert_next_submit(&self, data: Vec<u8>) {
        self.lock().revert_next_submit = Some(data);
    }

    pub fn set_connected_chain(&self, chain: ChainId) {
        self.lock().connected = chain;
    }

    pub fn set_switch_allowed(&self, allowed: bool) {
        self.lock().switch_allowed = allowed;
    }

    pub fn set_balance(&self, token: Address, owner: Address, amount: U256) {
        self.lock().state.balances.insert((token, owner), amount);
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.lock()
            .state
            .allowances
            .insert((token, owner, spender), amount);
    }

    pub fn set_incentive_ratio(&self, minter: Address, ratio: I256) {
        if let Some(m) = self.lock().state.minters.get_mut(&minter) {
            m.incentive_ratio = ratio;
        }
    }

    pub fn set_minter_capacity(&self, minter: Address, capacity: U256) {
        if let Some(m) = self.lock().state.minters.get_mut(&minter) {
            m.capacity = capacity;
        }
    }

    pub fn set_pool_payout_bps(&self, pool: Address, bps: u32) {
        if let Some(p) = self.lock().state.pools.get_mut(&pool) {
            p.payout_bps = bps;
        }
    }

    pub fn set_window(&self, pool: Address, owner: Address, window: WithdrawalWindow) {
        if let Some(p) = self.lock().state.pools.get_mut(&pool) {
            p.windows.insert(owner, window);
        }
    }

    /// Current balance, native under the zero address.
    pub fn balance_of(&self, token: Address, owner: Address) -> U256 {
        self.lock()
            .state
            .balances
            .get(&(token, owner))
            .copied()
            .unwrap_or_default()
    }

    pub fn allowance_of(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.lock()
            .state
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    pub fn pool_deposit_of(&self, pool: Address, owner: Address) -> U256 {
        self.lock()
            .state
            .pools
            .get(&pool)
            .and_then(|p| p.deposits.get(&owner).copied())
            .unwrap_or_default()
    }

    /// Everything submitted so far, in order.
    pub fn submitted(&self) -> Vec<TxRequest> {
        self.lock().submitted.clone()
    }

    pub fn submitted_count(&self) -> usize {
        self.lock().submitted.len()
    }
}

fn overflow() -> LedgerError {
    LedgerError::Transport("arithmetic overflow in mock ledger".to_string())
}

fn mul_div(a: U256, b: U256, denom: U256) -> Result<U256, LedgerError> {
    a.checked_mul(b)
        .and_then(|p| p.checked_div(denom))
        .ok_or_else(overflow)
}

fn revert(known: KnownRevert) -> LedgerError {
    LedgerError::Revert {
        data: known.abi_encoded(),
    }
}

fn erc20_revert(message: &str) -> LedgerError {
    LedgerError::Revert {
        data: encode_error_string(message),
    }
}

impl ChainState {
    fn balance(&self, token: Address, owner: Address) -> U256 {
        self.balances.get(&(token, owner)).copied().unwrap_or_default()
    }

    fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    fn credit(&mut self, token: Address, owner: Address, amount: U256) -> Result<(), LedgerError> {
        let entry = self.balances.entry((token, owner)).or_default();
        *entry = entry.checked_add(amount).ok_or_else(overflow)?;
        Ok(())
    }

    fn debit(&mut self, token: Address, owner: Address, amount: U256) -> Result<(), LedgerError> {
        let balance = self.balance(token, owner);
        let remaining = balance
            .checked_sub(amount)
            .ok_or_else(|| erc20_revert("ERC20: transfer amount exceeds balance"))?;
        self.balances.insert((token, owner), remaining);
        Ok(())
    }

    /// transferFrom semantics: spend allowance, then move the balance.
    fn spend_allowance(
        &mut self,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        let allowance = self.allowance(token, owner, spender);
        let remaining = allowance
            .checked_sub(amount)
            .ok_or_else(|| erc20_revert("ERC20: insufficient allowance"))?;
        self.allowances.insert((token, owner, spender), remaining);
        Ok(())
    }

    fn wrap(&self, wrapper: Address, underlying_amount: U256) -> Result<U256, LedgerError> {
        let rate = self.wrappers.get(&wrapper).copied().ok_or_else(|| {
            LedgerError::Unsupported(format!("no wrapper configured at {wrapper}"))
        })?;
        mul_div(underlying_amount, rate, pow10(18))
    }

    fn preview_mint(&self, minter: Address, amount: U256) -> Result<MintPreview, LedgerError> {
        let state = self.minters.get(&minter).ok_or_else(|| {
            LedgerError::Unsupported(format!("no minter configured at {minter}"))
        })?;
        if state.paused {
            return Err(revert(KnownRevert::MintPaused));
        }
        let accepted = amount.min(state.capacity);
        let one = I256::from_raw(pow10(18));
        let factor = one - state.incentive_ratio;
        let minted = if factor.is_negative() || factor.is_zero() {
            U256::ZERO
        } else {
            mul_div(accepted, factor.unsigned_abs(), pow10(18))?
        };
        Ok(MintPreview {
            incentive_ratio: state.incentive_ratio,
            accepted,
            minted,
        })
    }

    /// Core mint: pull accepted collateral from payer, credit minted pegged
    /// tokens to receiver. `collateral_via_allowance` is false for zaps,
    /// which already hold the collateral they wrap.
    fn execute_mint(
        &mut self,
        minter: Address,
        payer: Address,
        receiver: Address,
        collateral_amount: U256,
        min_out: U256,
        collateral_via_allowance: bool,
    ) -> Result<U256, LedgerError> {
        let preview = self.preview_mint(minter, collateral_amount)?;
        let minter_state = self
            .minters
            .get(&minter)
            .cloned()
            .ok_or_else(|| LedgerError::Unsupported(format!("no minter configured at {minter}")))?;
        let one = I256::from_raw(pow10(18));
        if minter_state.incentive_ratio >= one {
            return Err(revert(KnownRevert::MintPaused));
        }
        if minter_state.capacity.is_zero() {
            return Err(revert(KnownRevert::CapacityExceeded));
        }
        if preview.minted < min_out {
            return Err(revert(KnownRevert::InsufficientOutput));
        }
        if collateral_via_allowance {
            self.spend_allowance(
                minter_state.collateral_token,
                payer,
                minter,
                preview.accepted,
            )?;
            self.debit(minter_state.collateral_token, payer, preview.accepted)?;
            self.credit(minter_state.collateral_token, minter, preview.accepted)?;
        }
        if let Some(m) = self.minters.get_mut(&minter) {
            if m.capacity != U256::MAX {
                m.capacity = m.capacity.saturating_sub(preview.accepted);
            }
        }
        self.credit(minter_state.pegged_token, receiver, preview.minted)?;
        Ok(preview.minted)
    }

    fn apply(&mut self, from: Address, payload: &TxPayload) -> Result<(), LedgerError> {
        match payload {
            TxPayload::Approve {
                token,
                spender,
                amount,
            } => {
                self.allowances.insert((*token, from, *spender), *amount);
                Ok(())
            }
            TxPayload::SwapRaw { to, data, value } => {
                let swap = SwapInstruction::decode(data).ok_or_else(|| {
                    LedgerError::Unsupported("swap calldata is not a mock instruction".to_string())
                })?;
                match swap.token_in {
                    None => {
                        if *value != swap.amount_in {
                            return Err(erc20_revert("swap value mismatch"));
                        }
                        self.debit(NATIVE, from, swap.amount_in)?;
                    }
                    Some(token_in) => {
                        self.spend_allowance(token_in, from, *to, swap.amount_in)?;
                        self.debit(token_in, from, swap.amount_in)?;
                    }
                }
                self.credit(swap.token_out, from, swap.amount_out)
            }
            TxPayload::Mint {
                minter,
                collateral_amount,
                receiver,
                min_out,
            } => self
                .execute_mint(*minter, from, *receiver, *collateral_amount, *min_out, true)
                .map(|_| ()),
            TxPayload::Zap {
                zap,
                asset,
                amount,
                receiver,
                min_out,
            } => {
                let config = self.zaps.get(zap).copied().ok_or_else(|| {
                    LedgerError::Unsupported(format!("no zap configured at {zap}"))
                })?;
                match asset {
                    None => self.debit(NATIVE, from, *amount)?,
                    Some(token) => {
                        self.spend_allowance(*token, from, *zap, *amount)?;
                        self.debit(*token, from, *amount)?;
                    }
                }
                let wrapped = self.wrap(config.wrapper, *amount)?;
                self.execute_mint(config.minter, *zap, *receiver, wrapped, *min_out, false)
                    .map(|_| ())
            }
            TxPayload::Deposit {
                pool,
                amount,
                receiver,
            } => {
                let (token, min_deposit) = {
                    let state = self.pools.get(pool).ok_or_else(|| {
                        LedgerError::Unsupported(format!("no pool configured at {pool}"))
                    })?;
                    (state.token, state.min_deposit)
                };
                if *amount < min_deposit {
                    return Err(revert(KnownRevert::DepositBelowMinimum));
                }
                self.spend_allowance(token, from, *pool, *amount)?;
                self.debit(token, from, *amount)?;
                self.credit(token, *pool, *amount)?;
                let state = self.pools.get_mut(pool).ok_or_else(|| {
                    LedgerError::Unsupported(format!("no pool configured at {pool}"))
                })?;
                let entry = state.deposits.entry(*receiver).or_default();
                *entry = entry.checked_add(*amount).ok_or_else(overflow)?;
                state.total_supply = state.total_supply.checked_add(*amount).ok_or_else(overflow)?;
                Ok(())
            }
            TxPayload::RequestWithdraw { pool } => {
                let now = Timestamp::now().as_u64();
                let state = self.pools.get_mut(pool).ok_or_else(|| {
                    LedgerError::Unsupported(format!("no pool configured at {pool}"))
                })?;
                let start = now + state.request_delay_secs;
                state
                    .windows
                    .insert(from, WithdrawalWindow::new(start, start + state.window_secs));
                Ok(())
            }
            TxPayload::Withdraw {
                pool,
                amount,
                receiver,
            } => {
                let now = Timestamp::now();
                let (token, payout, window_open) = {
                    let state = self.pools.get(pool).ok_or_else(|| {
                        LedgerError::Unsupported(format!("no pool configured at {pool}"))
                    })?;
                    let staked = state.deposits.get(&from).copied().unwrap_or_default();
                    if *amount > staked {
                        return Err(revert(KnownRevert::WithdrawalExceedsAvailable));
                    }
                    let window_open = state
                        .windows
                        .get(&from)
                        .map(|w| w.status(now) == crate::domain::window::WindowStatus::Open)
                        .unwrap_or(false);
                    let new_total = state
                        .total_supply
                        .checked_sub(*amount)
                        .ok_or_else(|| revert(KnownRevert::WithdrawalExceedsAvailable))?;
                    // Outside an open window the pool enforces its supply floor
                    // and takes the flat fee.
                    if !window_open && new_total < state.min_total_supply {
                        return Err(revert(KnownRevert::WithdrawalExceedsAvailable));
                    }
                    let payout = if window_open {
                        *amount
                    } else {
                        mul_div(*amount, U256::from(state.payout_bps), U256::from(10_000u64))?
                    };
                    (state.token, payout, window_open)
                };
                self.debit(token, *pool, payout)?;
                self.credit(token, *receiver, payout)?;
                let state = self.pools.get_mut(pool).ok_or_else(|| {
                    LedgerError::Unsupported(format!("no pool configured at {pool}"))
                })?;
                let staked = state.deposits.get(&from).copied().unwrap_or_default();
                state
                    .deposits
                    .insert(from, staked.saturating_sub(*amount));
                state.total_supply = state.total_supply.saturating_sub(*amount);
                if window_open {
                    state.windows.remove(&from);
                }
                Ok(())
            }
            TxPayload::Redeem {
                minter,
                amount,
                receiver,
                min_out,
            } => {
                let state = self.minters.get(minter).cloned().ok_or_else(|| {
                    LedgerError::Unsupported(format!("no minter configured at {minter}"))
                })?;
                let out = mul_div(*amount, state.redeem_rate, pow10(18))?;
                if out < *min_out {
                    return Err(revert(KnownRevert::InsufficientOutput));
                }
                self.spend_allowance(state.pegged_token, from, *minter, *amount)?;
                self.debit(state.pegged_token, from, *amount)?;
                self.credit(state.collateral_token, *receiver, out)
            }
        }
    }
}

fn mock_tx_hash(nonce: u64, description: &str) -> TxHash {
    let mut hasher = Sha256::new();
    hasher.update(nonce.to_be_bytes());
    hasher.update(description.as_bytes());
    let digest = hasher.finalize();
    TxHash::from_slice(&digest)
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn connected_chain(&self) -> Result<ChainId, LedgerError> {
        Ok(self.lock().connected)
    }

    async fn switch_chain(&self, target: ChainId) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if !inner.switch_allowed {
            return Err(LedgerError::SwitchFailed);
        }
        inner.connected = target;
        Ok(())
    }

    async fn native_balance(&self, owner: Address) -> Result<U256, LedgerError> {
        Ok(self.lock().state.balance(NATIVE, owner))
    }

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256, LedgerError> {
        Ok(self.lock().state.balance(token, owner))
    }

    async fn erc20_balances(
        &self,
        token: Address,
        owners: &[Address],
    ) -> Result<Vec<U256>, LedgerError> {
        let inner = self.lock();
        Ok(owners
            .iter()
            .map(|owner| inner.state.balance(token, *owner))
            .collect())
    }

    async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, LedgerError> {
        Ok(self.lock().state.allowance(token, owner, spender))
    }

    async fn convert_to_wrapped(
        &self,
        wrapper: Address,
        underlying_amount: U256,
    ) -> Result<U256, LedgerError> {
        self.lock().state.wrap(wrapper, underlying_amount)
    }

    async fn preview_mint(
        &self,
        minter: Address,
        collateral_amount: U256,
    ) -> Result<MintPreview, LedgerError> {
        self.lock().state.preview_mint(minter, collateral_amount)
    }

    async fn preview_redeem(
        &self,
        minter: Address,
        pegged_amount: U256,
    ) -> Result<U256, LedgerError> {
        let inner = self.lock();
        let state = inner.state.minters.get(&minter).ok_or_else(|| {
            LedgerError::Unsupported(format!("no minter configured at {minter}"))
        })?;
        mul_div(pegged_amount, state.redeem_rate, pow10(18))
    }

    async fn mint_capacity(&self, minter: Address) -> Result<U256, LedgerError> {
        let inner = self.lock();
        inner
            .state
            .minters
            .get(&minter)
            .map(|m| m.capacity)
            .ok_or_else(|| LedgerError::Unsupported(format!("no minter configured at {minter}")))
    }

    async fn pool_total_supply(&self, pool: Address) -> Result<U256, LedgerError> {
        let inner = self.lock();
        inner
            .state
            .pools
            .get(&pool)
            .map(|p| p.total_supply)
            .ok_or_else(|| LedgerError::Unsupported(format!("no pool configured at {pool}")))
    }

    async fn pool_min_total_supply(&self, pool: Address) -> Result<U256, LedgerError> {
        let inner = self.lock();
        inner
            .state
            .pools
            .get(&pool)
            .map(|p| p.min_total_supply)
            .ok_or_else(|| LedgerError::Unsupported(format!("no pool configured at {pool}")))
    }

    async fn pool_balance(&self, pool: Address, owner: Address) -> Result<U256, LedgerError> {
        let inner = self.lock();
        inner
            .state
            .pools
            .get(&pool)
            .map(|p| p.deposits.get(&owner).copied().unwrap_or_default())
            .ok_or_else(|| LedgerError::Unsupported(format!("no pool configured at {pool}")))
    }

    async fn withdrawal_window(
        &self,
        pool: Address,
        owner: Address,
    ) -> Result<WithdrawalWindow, LedgerError> {
        let inner = self.lock();
        inner
            .state
            .pools
            .get(&pool)
            .map(|p| {
                p.windows
                    .get(&owner)
                    .copied()
                    .unwrap_or_else(WithdrawalWindow::absent)
            })
            .ok_or_else(|| LedgerError::Unsupported(format!("no pool configured at {pool}")))
    }

    async fn simulate(&self, tx: &TxRequest) -> Result<(), LedgerError> {
        let inner = self.lock();
        let mut scratch = inner.state.clone();
        scratch.apply(tx.from, &tx.payload)
    }

    async fn submit(&self, tx: &TxRequest) -> Result<TxHash, LedgerError> {
        let mut inner = self.lock();
        if inner.reject_next_submit {
            inner.reject_next_submit = false;
            return Err(LedgerError::UserRejected);
        }
        if let Some(data) = inner.revert_next_submit.take() {
            return Err(LedgerError::Revert { data });
        }
        if tx.chain != inner.chain {
            return Err(LedgerError::Transport(format!(
                "call targets chain {} but this ledger serves chain {}",
                tx.chain, inner.chain
            )));
        }
        if inner.connected != tx.chain {
            return Err(LedgerError::Transport(format!(
                "wallet is on chain {} but the call targets chain {}",
                inner.connected, tx.chain
            )));
        }
        inner.state.apply(tx.from, &tx.payload)?;
        inner.nonce += 1;
        let hash = mock_tx_hash(inner.nonce, &tx.payload.describe());
        let receipt = Receipt {
            tx: hash,
            status: true,
            block_number: inner.nonce,
        };
        inner.receipts.insert(hash, receipt);
        inner.submitted.push(tx.clone());
        Ok(hash)
    }

    async fn wait_for_receipt(&self, tx: TxHash) -> Result<Receipt, LedgerError> {
        self.lock()
            .receipts
            .get(&tx)
            .copied()
            .ok_or_else(|| LedgerError::Transport(format!("unknown transaction {tx}")))
    }
}
