//! HTTP client for an aggregator quote API.

use super::{RouterError, SwapQuote, SwapRouter, SwapTx};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::debug;

/// Swap router backed by an aggregator's REST quote endpoint.
#[derive(Debug, Clone)]
pub struct AggregatorRouter {
    client: Client,
    base_url: String,
}

impl AggregatorRouter {
    /// Create a new aggregator router client.
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    async fn post_quote(
        &self,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, RouterError> {
        let url = format!("{}/quote", self.base_url);
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(15)),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .post(&url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| {
                    backoff::Error::transient(RouterError::NetworkError(e.to_string()))
                })?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(RouterError::HttpError {
                    status: 429,
                    message: "Rate limited".to_string(),
                }));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(RouterError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(RouterError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(RouterError::ParseError(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl SwapRouter for AggregatorRouter {
    async fn quote(
        &self,
        from_token: Option<Address>,
        to_token: Address,
        amount_in: U256,
        slippage_bps: u32,
    ) -> Result<SwapQuote, RouterError> {
        let from_field = from_token.map_or_else(|| "native".to_string(), |a| a.to_string());
        debug!(
            "Requesting swap quote from={}, to={}, amount={}, slippage_bps={}",
            from_field, to_token, amount_in, slippage_bps
        );

        let payload = serde_json::json!({
            "fromToken": from_field,
            "toToken": to_token.to_string(),
            "amount": amount_in.to_string(),
            "slippageBps": slippage_bps,
        });

        let response = self.post_quote(payload).await?;
        parse_quote(&response, from_token, to_token, amount_in)
    }
}

fn parse_address(value: &serde_json::Value, field: &str) -> Result<Address, RouterError> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RouterError::ParseError(format!("Missing {} field", field)))?
        .parse::<Address>()
        .map_err(|e| RouterError::ParseError(format!("Invalid {}: {}", field, e)))
}

fn parse_u256(value: &serde_json::Value, field: &str) -> Result<U256, RouterError> {
    let raw = value
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RouterError::ParseError(format!("Missing {} field", field)))?;
    U256::from_str_radix(raw, 10)
        .map_err(|e| RouterError::ParseError(format!("Invalid {}: {}", field, e)))
}

fn parse_quote(
    response: &serde_json::Value,
    from_token: Option<Address>,
    to_token: Address,
    amount_in: U256,
) -> Result<SwapQuote, RouterError> {
    // Aggregators answer "no route" as a success with an error body.
    if let Some(reason) = response.get("noRoute").and_then(|v| v.as_str()) {
        return Err(RouterError::NoRoute(reason.to_string()));
    }

    let expected_out = parse_u256(response, "toAmount")?;
    let min_out = parse_u256(response, "minAmount")?;
    if expected_out.is_zero() {
        return Err(RouterError::NoRoute("aggregator quoted zero output".to_string()));
    }

    let tx_json = response
        .get("tx")
        .ok_or_else(|| RouterError::ParseError("Missing tx field".to_string()))?;
    let to = parse_address(tx_json, "to")?;
    let data_hex = tx_json
        .get("data")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RouterError::ParseError("Missing tx.data field".to_string()))?;
    let data = hex::decode(data_hex.trim_start_matches("0x"))
        .map_err(|e| RouterError::ParseError(format!("Invalid tx.data: {}", e)))?;
    let value = parse_u256(tx_json, "value")?;
    let gas_limit = tx_json.get("gasLimit").and_then(|v| v.as_u64());

    let fee_pct = response
        .get("feePct")
        .and_then(|v| v.as_f64())
        .and_then(|f| Decimal::try_from(f).ok());

    Ok(SwapQuote {
        from_token,
        to_token,
        amount_in,
        expected_out,
        min_out,
        fee_pct,
        tx: SwapTx {
            to,
            data,
            value,
            gas_limit,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quote_valid() {
        let response = serde_json::json!({
            "toAmount": "1000000000000000000",
            "minAmount": "995000000000000000",
            "feePct": 0.3,
            "tx": {
                "to": "0x1111111111111111111111111111111111111111",
                "data": "0xdeadbeef",
                "value": "0",
                "gasLimit": 210000
            }
        });

        let to_token = Address::repeat_byte(0x33);
        let quote = parse_quote(&response, None, to_token, U256::from(5u8)).unwrap();
        assert_eq!(quote.expected_out, U256::from(10u64).pow(U256::from(18u8)));
        assert_eq!(quote.min_out, U256::from(995u64) * U256::from(10u64).pow(U256::from(15u8)));
        assert_eq!(quote.tx.data, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(quote.tx.gas_limit, Some(210_000));
        assert_eq!(quote.fee_pct, Some(Decimal::new(3, 1)));
        assert_eq!(quote.to_token, to_token);
    }

    #[test]
    fn test_parse_quote_no_route() {
        let response = serde_json::json!({ "noRoute": "insufficient liquidity" });
        let err = parse_quote(
            &response,
            None,
            Address::repeat_byte(0x33),
            U256::from(5u8),
        )
        .unwrap_err();
        assert!(matches!(err, RouterError::NoRoute(_)));
    }

    #[test]
    fn test_parse_quote_zero_output_is_no_route() {
        let response = serde_json::json!({
            "toAmount": "0",
            "minAmount": "0",
            "tx": {
                "to": "0x1111111111111111111111111111111111111111",
                "data": "0x",
                "value": "0"
            }
        });
        let err = parse_quote(
            &response,
            None,
            Address::repeat_byte(0x33),
            U256::from(5u8),
        )
        .unwrap_err();
        assert!(matches!(err, RouterError::NoRoute(_)));
    }

    #[test]
    fn test_parse_quote_missing_tx() {
        let response = serde_json::json!({
            "toAmount": "10",
            "minAmount": "9"
        });
        let err = parse_quote(
            &response,
            None,
            Address::repeat_byte(0x33),
            U256::from(5u8),
        )
        .unwrap_err();
        assert!(matches!(err, RouterError::ParseError(_)));
    }
}
