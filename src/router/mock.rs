//! Mock swap router for testing without an aggregator.

use super::{RouterError, SwapQuote, SwapRouter, SwapTx};
use crate::chain::SwapInstruction;
use crate::domain::amount::pow10;
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct MockRoute {
    /// Output base units per input base unit, 1e18 scale.
    rate: U256,
    fee_pct: Option<Decimal>,
    /// How far below the quoted output the swap actually delivers, in basis
    /// points. Models real execution landing under the quote.
    shortfall_bps: u32,
}

/// Mock router that prices routes from a fixed rate table and emits
/// [`SwapInstruction`] calldata the [`crate::chain::MockLedger`] executes.
#[derive(Debug, Clone)]
pub struct MockSwapRouter {
    address: Address,
    routes: HashMap<(Option<Address>, Address), MockRoute>,
}

impl MockSwapRouter {
    /// Create a mock router whose swap calls target `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            routes: HashMap::new(),
        }
    }

    /// Register a route at `rate` output-per-input (1e18 scale).
    pub fn with_route(mut self, from: Option<Address>, to: Address, rate: U256) -> Self {
        self.routes.insert(
            (from, to),
            MockRoute {
                rate,
                fee_pct: None,
                shortfall_bps: 0,
            },
        );
        self
    }

    /// Report an aggregator fee on an existing route.
    pub fn with_fee_pct(mut self, from: Option<Address>, to: Address, fee_pct: Decimal) -> Self {
        if let Some(route) = self.routes.get_mut(&(from, to)) {
            route.fee_pct = Some(fee_pct);
        }
        self
    }

    /// Make an existing route deliver `bps` below its quote at execution.
    pub fn with_shortfall_bps(mut self, from: Option<Address>, to: Address, bps: u32) -> Self {
        if let Some(route) = self.routes.get_mut(&(from, to)) {
            route.shortfall_bps = bps;
        }
        self
    }

    /// The address swap calls are sent to.
    pub fn address(&self) -> Address {
        self.address
    }
}

fn bps_of(amount: U256, bps: u32) -> U256 {
    amount * U256::from(bps) / U256::from(10_000u64)
}

#[async_trait]
impl SwapRouter for MockSwapRouter {
    async fn quote(
        &self,
        from_token: Option<Address>,
        to_token: Address,
        amount_in: U256,
        slippage_bps: u32,
    ) -> Result<SwapQuote, RouterError> {
        let route = self.routes.get(&(from_token, to_token)).ok_or_else(|| {
            let from = from_token.map_or_else(|| "native".to_string(), |a| a.to_string());
            RouterError::NoRoute(format!("{from} -> {to_token}"))
        })?;

        let expected_out = amount_in
            .checked_mul(route.rate)
            .map(|p| p / pow10(18))
            .ok_or_else(|| RouterError::ParseError("rate overflow".to_string()))?;
        if expected_out.is_zero() {
            return Err(RouterError::NoRoute("mock route quoted zero output".to_string()));
        }
        let min_out = bps_of(expected_out, 10_000 - slippage_bps.min(10_000));
        let delivered = bps_of(expected_out, 10_000 - route.shortfall_bps.min(10_000));

        let instruction = SwapInstruction {
            token_in: from_token,
            token_out: to_token,
            amount_in,
            amount_out: delivered,
        };
        let value = if from_token.is_none() {
            amount_in
        } else {
            U256::ZERO
        };

        Ok(SwapQuote {
            from_token,
            to_token,
            amount_in,
            expected_out,
            min_out,
            fee_pct: route.fee_pct,
            tx: SwapTx {
                to: self.address,
                data: instruction.encode(),
                value,
                gas_limit: Some(300_000),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bps_of() {
        assert_eq!(bps_of(U256::from(10_000u64), 9_950), U256::from(9_950u64));
        assert_eq!(bps_of(U256::from(10_000u64), 10_000), U256::from(10_000u64));
    }

    #[tokio::test]
    async fn test_quote_applies_rate_and_slippage() {
        let stable = Address::repeat_byte(0x77);
        let underlying = Address::repeat_byte(0x33);
        // 1_000 USDC (1e9 base units) buys 0.5 stETH (5e17 base units).
        let rate = U256::from(5u64) * pow10(26);
        let router = MockSwapRouter::new(Address::repeat_byte(0x88)).with_route(
            Some(stable),
            underlying,
            rate,
        );

        let quote = router
            .quote(Some(stable), underlying, U256::from(1_000_000_000u64), 50)
            .await
            .unwrap();
        assert_eq!(quote.expected_out, U256::from(5u64) * pow10(17));
        // 0.5% slippage bound below the quote.
        assert_eq!(quote.min_out, U256::from(4_975u64) * pow10(14));

        let instruction = SwapInstruction::decode(&quote.tx.data).unwrap();
        assert_eq!(instruction.amount_out, quote.expected_out);
        assert_eq!(instruction.token_in, Some(stable));
    }

    #[tokio::test]
    async fn test_shortfall_lands_below_quote() {
        let stable = Address::repeat_byte(0x77);
        let underlying = Address::repeat_byte(0x33);
        let router = MockSwapRouter::new(Address::repeat_byte(0x88))
            .with_route(Some(stable), underlying, pow10(18))
            .with_shortfall_bps(Some(stable), underlying, 10);

        let quote = router
            .quote(Some(stable), underlying, U256::from(10_000u64), 50)
            .await
            .unwrap();
        let instruction = SwapInstruction::decode(&quote.tx.data).unwrap();
        assert_eq!(quote.expected_out, U256::from(10_000u64));
        assert_eq!(instruction.amount_out, U256::from(9_990u64));
        // Still above the slippage bound, so execution would succeed.
        assert!(instruction.amount_out >= quote.min_out);
    }

    #[tokio::test]
    async fn test_native_route_carries_value() {
        let underlying = Address::repeat_byte(0x33);
        let router =
            MockSwapRouter::new(Address::repeat_byte(0x88)).with_route(None, underlying, pow10(18));

        let quote = router
            .quote(None, underlying, U256::from(7u8), 50)
            .await
            .unwrap();
        assert_eq!(quote.tx.value, U256::from(7u8));
    }

    #[tokio::test]
    async fn test_unknown_route_errors() {
        let router = MockSwapRouter::new(Address::repeat_byte(0x88));
        let err = router
            .quote(None, Address::repeat_byte(0x33), U256::from(1u8), 50)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::NoRoute(_)));
    }
}
