//! Process configuration from environment variables.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{parse_px6, Asset};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub chain_ws_url: String,
    pub chain_http_url: String,
    pub contract_address: String,
    pub db_conc: usize,
    pub rpc_conc: usize,
    pub backfill_chunk_size: usize,
    pub backfill_page_size: usize,
    pub watchdog: Duration,
    pub assets_seed: Vec<Asset>,
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
        let port = parse_with_default(&env_map, "PORT", 8080u16)?;

        let database_path = require(&env_map, "DATABASE_PATH")?;
        let chain_ws_url = require(&env_map, "CHAIN_WS_URL")?;
        let chain_http_url = require(&env_map, "CHAIN_HTTP_URL")?;
        let contract_address = require(&env_map, "CONTRACT_ADDRESS")?;

        let db_conc = parse_with_default(&env_map, "DB_CONC", 500usize)?;
        let rpc_conc = parse_with_default(&env_map, "RPC_CONC", 100usize)?;
        let backfill_chunk_size = parse_with_default(&env_map, "BACKFILL_CHUNK_SIZE", 400usize)?;
        let backfill_page_size = parse_with_default(&env_map, "BACKFILL_PAGE_SIZE", 10_000usize)?;
        let watchdog_secs = parse_with_default(&env_map, "WATCHDOG_SECS", 15u64)?;

        let assets_seed = match env_map.get("ASSETS_SEED") {
            Some(raw) => parse_assets_seed(raw)?,
            None => Vec::new(),
        };

        Ok(Config {
            port,
            database_path,
            chain_ws_url,
            chain_http_url,
            contract_address,
            db_conc,
            rpc_conc,
            backfill_chunk_size,
            backfill_page_size,
            watchdog: Duration::from_secs(watchdog_secs),
            assets_seed,
        })
    }
}

fn require(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn parse_with_default<T: std::str::FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), format!("cannot parse '{}'", raw))
        }),
    }
}

/// Parse the `ASSETS_SEED` list: comma-separated
/// `asset_id:symbol:tick:lot_num:lot_den` entries, tick given as a decimal
/// price string.
fn parse_assets_seed(raw: &str) -> Result<Vec<Asset>, ConfigError> {
    let mut assets = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parts: Vec<&str> = entry.split(':').collect();
        if parts.len() != 5 {
            return Err(ConfigError::InvalidValue(
                "ASSETS_SEED".to_string(),
                format!("entry '{}' must have 5 fields", entry),
            ));
        }
        let asset_id = parts[0].parse::<u32>().map_err(|_| {
            ConfigError::InvalidValue("ASSETS_SEED".to_string(), format!("bad id in '{}'", entry))
        })?;
        let tick_x6 = parse_px6(parts[2]).map_err(|e| {
            ConfigError::InvalidValue(
                "ASSETS_SEED".to_string(),
                format!("bad tick in '{}': {}", entry, e),
            )
        })?;
        if tick_x6 <= 0 {
            return Err(ConfigError::InvalidValue(
                "ASSETS_SEED".to_string(),
                format!("tick must be positive in '{}'", entry),
            ));
        }
        let lot_num = parts[3].parse::<i64>().map_err(|_| {
            ConfigError::InvalidValue(
                "ASSETS_SEED".to_string(),
                format!("bad lot_num in '{}'", entry),
            )
        })?;
        let lot_den = parts[4].parse::<i64>().map_err(|_| {
            ConfigError::InvalidValue(
                "ASSETS_SEED".to_string(),
                format!("bad lot_den in '{}'", entry),
            )
        })?;
        if lot_den <= 0 {
            return Err(ConfigError::InvalidValue(
                "ASSETS_SEED".to_string(),
                format!("lot_den must be positive in '{}'", entry),
            ));
        }
        assets.push(Asset {
            asset_id,
            symbol: parts[1].to_string(),
            tick_x6,
            lot_num,
            lot_den,
        });
    }
    Ok(assets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map.insert(
            "CHAIN_WS_URL".to_string(),
            "wss://rpc.example.org".to_string(),
        );
        map.insert(
            "CHAIN_HTTP_URL".to_string(),
            "https://rpc.example.org".to_string(),
        );
        map.insert(
            "CONTRACT_ADDRESS".to_string(),
            "0xaabbccdd00112233445566778899aabbccddeeff".to_string(),
        );
        map
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.db_conc, 500);
        assert_eq!(config.rpc_conc, 100);
        assert_eq!(config.backfill_chunk_size, 400);
        assert_eq!(config.backfill_page_size, 10_000);
        assert_eq!(config.watchdog, Duration::from_secs(15));
        assert!(config.assets_seed.is_empty());
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            other => panic!("expected MissingEnv, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_chain_urls() {
        for key in ["CHAIN_WS_URL", "CHAIN_HTTP_URL", "CONTRACT_ADDRESS"] {
            let mut env_map = setup_required_env();
            env_map.remove(key);
            match Config::from_env_map(env_map) {
                Err(ConfigError::MissingEnv(s)) => assert_eq!(s, key),
                other => panic!("expected MissingEnv for {}, got {:?}", key, other),
            }
        }
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_assets_seed_parsed() {
        let mut env_map = setup_required_env();
        env_map.insert(
            "ASSETS_SEED".to_string(),
            "0:BTC-PERP:0.01:1:1, 1:ETH-PERP:0.001:1:10".to_string(),
        );
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.assets_seed.len(), 2);
        assert_eq!(config.assets_seed[0].symbol, "BTC-PERP");
        assert_eq!(config.assets_seed[0].tick_x6, 10_000);
        assert_eq!(config.assets_seed[1].asset_id, 1);
        assert_eq!(config.assets_seed[1].tick_x6, 1_000);
        assert_eq!(config.assets_seed[1].lot_den, 10);
    }

    #[test]
    fn test_assets_seed_rejects_bad_entries() {
        for bad in [
            "0:BTC",
            "x:BTC:0.01:1:1",
            "0:BTC:zero:1:1",
            "0:BTC:0:1:1",
            "0:BTC:0.01:1:0",
        ] {
            let mut env_map = setup_required_env();
            env_map.insert("ASSETS_SEED".to_string(), bad.to_string());
            match Config::from_env_map(env_map) {
                Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "ASSETS_SEED"),
                other => panic!("expected InvalidValue for '{}', got {:?}", bad, other),
            }
        }
    }
}
