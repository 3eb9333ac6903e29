//! HTTP price feed client.

use super::{OracleError, PriceOracle};
use crate::domain::primitives::TokenSymbol;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Price oracle backed by a simple REST price endpoint.
#[derive(Debug, Clone)]
pub struct PriceFeedClient {
    client: Client,
    base_url: String,
}

impl PriceFeedClient {
    /// Create a new price feed client.
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    async fn get_price(&self, symbol: &str) -> Result<Option<serde_json::Value>, OracleError> {
        let url = format!("{}/prices", self.base_url);
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(15)),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .get(&url)
                .query(&[("symbol", symbol)])
                .send()
                .await
                .map_err(|e| {
                    backoff::Error::transient(OracleError::NetworkError(e.to_string()))
                })?;

            let status = response.status();
            // An unknown symbol is a normal "no price" answer.
            if status == 404 {
                return Ok(None);
            }
            if status == 429 {
                return Err(backoff::Error::transient(OracleError::HttpError {
                    status: 429,
                    message: "Rate limited".to_string(),
                }));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(OracleError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(OracleError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map(Some)
                .map_err(|e| backoff::Error::permanent(OracleError::ParseError(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl PriceOracle for PriceFeedClient {
    async fn usd_price(&self, symbol: &TokenSymbol) -> Result<Option<Decimal>, OracleError> {
        debug!("Fetching USD price for {}", symbol);
        match self.get_price(symbol.as_str()).await? {
            Some(response) => parse_price(&response).map(Some),
            None => Ok(None),
        }
    }
}

fn parse_price(response: &serde_json::Value) -> Result<Decimal, OracleError> {
    // Feeds report either {"usd": "2413.55"} or {"usd": 2413.55}; prefer the
    // string form to keep the exact decimal.
    let usd = response
        .get("usd")
        .ok_or_else(|| OracleError::ParseError("Missing usd field".to_string()))?;
    if let Some(text) = usd.as_str() {
        return Decimal::from_str(text)
            .map_err(|e| OracleError::ParseError(format!("Invalid usd: {}", e)));
    }
    usd.as_f64()
        .and_then(|f| Decimal::try_from(f).ok())
        .ok_or_else(|| OracleError::ParseError("Invalid usd field".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price_string_form() {
        let response = serde_json::json!({ "usd": "2413.55" });
        assert_eq!(parse_price(&response).unwrap(), Decimal::new(241_355, 2));
    }

    #[test]
    fn test_parse_price_number_form() {
        let response = serde_json::json!({ "usd": 1.0 });
        assert_eq!(parse_price(&response).unwrap(), Decimal::ONE);
    }

    #[test]
    fn test_parse_price_missing_field() {
        let response = serde_json::json!({ "eur": "1.0" });
        assert!(matches!(
            parse_price(&response),
            Err(OracleError::ParseError(_))
        ));
    }
}
