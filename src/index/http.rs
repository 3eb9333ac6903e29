//! GraphQL position index client.

use super::{IndexError, IndexedPoolDeposit, IndexedWalletBalance, PositionIndex};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const DEPOSITS_QUERY: &str = r#"
query Deposits($owner: String!) {
  poolDeposits(where: { owner: $owner }) {
    pool
    poolType
    balance
  }
}"#;

const BALANCES_QUERY: &str = r#"
query Balances($owner: String!) {
  walletBalances(where: { owner: $owner }) {
    token
    balance
  }
}"#;

/// Position index backed by a GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct GraphIndexClient {
    client: Client,
    endpoint: String,
}

impl GraphIndexClient {
    /// Create a new index client.
    pub fn new(endpoint: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
        }
    }

    async fn post_query(
        &self,
        query: &str,
        owner: Address,
    ) -> Result<serde_json::Value, IndexError> {
        let payload = serde_json::json!({
            "query": query,
            "variables": { "owner": owner.to_string() },
        });
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(15)),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .post(&self.endpoint)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(IndexError::NetworkError(e.to_string())))?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(IndexError::HttpError {
                    status: 429,
                    message: "Rate limited".to_string(),
                }));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(IndexError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(IndexError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(IndexError::ParseError(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl PositionIndex for GraphIndexClient {
    async fn pool_deposits(
        &self,
        owner: Address,
    ) -> Result<Vec<IndexedPoolDeposit>, IndexError> {
        debug!("Fetching indexed pool deposits for {}", owner);
        let response = self.post_query(DEPOSITS_QUERY, owner).await?;
        parse_pool_deposits(&response)
    }

    async fn wallet_balances(
        &self,
        owner: Address,
    ) -> Result<Vec<IndexedWalletBalance>, IndexError> {
        debug!("Fetching indexed wallet balances for {}", owner);
        let response = self.post_query(BALANCES_QUERY, owner).await?;
        parse_wallet_balances(&response)
    }
}

fn field_address(value: &serde_json::Value, field: &str) -> Result<Address, IndexError> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| IndexError::ParseError(format!("Missing {} field", field)))?
        .parse::<Address>()
        .map_err(|e| IndexError::ParseError(format!("Invalid {}: {}", field, e)))
}

fn field_u256(value: &serde_json::Value, field: &str) -> Result<U256, IndexError> {
    let raw = value
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| IndexError::ParseError(format!("Missing {} field", field)))?;
    U256::from_str_radix(raw, 10)
        .map_err(|e| IndexError::ParseError(format!("Invalid {}: {}", field, e)))
}

fn data_array<'a>(
    response: &'a serde_json::Value,
    field: &str,
) -> Result<&'a Vec<serde_json::Value>, IndexError> {
    response
        .get("data")
        .and_then(|d| d.get(field))
        .and_then(|v| v.as_array())
        .ok_or_else(|| IndexError::ParseError(format!("Missing data.{} array", field)))
}

fn parse_pool_deposits(
    response: &serde_json::Value,
) -> Result<Vec<IndexedPoolDeposit>, IndexError> {
    let rows = data_array(response, "poolDeposits")?;
    let mut deposits = Vec::with_capacity(rows.len());
    for row in rows {
        let pool = field_address(row, "pool")?;
        let pool_type = row
            .get("poolType")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let balance = field_u256(row, "balance")?;
        deposits.push(IndexedPoolDeposit {
            pool,
            pool_type,
            balance,
        });
    }
    Ok(deposits)
}

fn parse_wallet_balances(
    response: &serde_json::Value,
) -> Result<Vec<IndexedWalletBalance>, IndexError> {
    let rows = data_array(response, "walletBalances")?;
    let mut balances = Vec::with_capacity(rows.len());
    for row in rows {
        balances.push(IndexedWalletBalance {
            token: field_address(row, "token")?,
            balance: field_u256(row, "balance")?,
        });
    }
    Ok(balances)
}
