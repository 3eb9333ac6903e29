use std::collections::HashMap;
use thiserror::Error;

use crate::domain::primitives::ChainId;

#[derive(Debug, Clone)]
pub struct Config {
    pub chain_id: ChainId,
    pub environment: Environment,
    pub registry_path: String,
    pub router_api_url: String,
    pub price_api_url: String,
    pub index_api_url: String,
    pub default_slippage_bps: u32,
    pub zap_slippage_floor_bps: u32,
    pub quote_debounce_ms: u64,
    pub price_poll_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    LocalFork,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let chain_id = env_map
            .get("CHAIN_ID")
            .map(|s| s.as_str())
            .unwrap_or("1")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "CHAIN_ID".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;

        let environment = match env_map
            .get("ENVIRONMENT")
            .map(|s| s.as_str())
            .unwrap_or("production")
        {
            "production" => Environment::Production,
            "local-fork" => Environment::LocalFork,
            other => {
                return Err(ConfigError::InvalidValue(
                    "ENVIRONMENT".to_string(),
                    format!("must be production or local-fork, got {}", other),
                ))
            }
        };

        let registry_path = env_map
            .get("REGISTRY_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("REGISTRY_PATH".to_string()))?;

        let router_api_url = env_map
            .get("ROUTER_API_URL")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("ROUTER_API_URL".to_string()))?;

        let price_api_url = env_map
            .get("PRICE_API_URL")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("PRICE_API_URL".to_string()))?;

        let index_api_url = env_map
            .get("INDEX_API_URL")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("INDEX_API_URL".to_string()))?;

        let default_slippage_bps = parse_bps(&env_map, "DEFAULT_SLIPPAGE_BPS", "50")?;
        let zap_slippage_floor_bps = parse_bps(&env_map, "ZAP_SLIPPAGE_FLOOR_BPS", "200")?;

        let quote_debounce_ms = env_map
            .get("QUOTE_DEBOUNCE_MS")
            .map(|s| s.as_str())
            .unwrap_or("400")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "QUOTE_DEBOUNCE_MS".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;

        let price_poll_secs = env_map
            .get("PRICE_POLL_SECS")
            .map(|s| s.as_str())
            .unwrap_or("180")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "PRICE_POLL_SECS".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;

        Ok(Config {
            chain_id: ChainId::new(chain_id),
            environment,
            registry_path,
            router_api_url,
            price_api_url,
            index_api_url,
            default_slippage_bps,
            zap_slippage_floor_bps,
            quote_debounce_ms,
            price_poll_secs,
        })
    }

    /// Slippage tolerance to use for a quote. User overrides win, except
    /// that zap routes are floored at the configured minimum because the
    /// zap's internal wrap and mint legs each consume part of the budget.
    pub fn effective_slippage_bps(&self, user_override: Option<u32>, zap_route: bool) -> u32 {
        let base = user_override.unwrap_or(self.default_slippage_bps);
        if zap_route {
            base.max(self.zap_slippage_floor_bps)
        } else {
            base
        }
    }
}

fn parse_bps(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<u32, ConfigError> {
    let value = env_map
        .get(key)
        .map(|s| s.as_str())
        .unwrap_or(default)
        .parse::<u32>()
        .map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), "must be a valid u32".to_string())
        })?;
    if value > 10_000 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be at most 10000 basis points, got {}", value),
        ));
    }
    Ok(value)
}
