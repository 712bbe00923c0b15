//! Worker configuration from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_URL` | required for Postgres |
//! | `DATABASE_MAX_CONNECTIONS` | `5` |
//! | `AIRDROP_BATCH_SIZE` | `20` |
//! | `AIRDROP_TICK_SECS` | `60` |
//! | `AIRDROP_ALIGN_TO_WALL_CLOCK` | `true` |
//! | `MINT_API_URL` | `https://api.apillon.io` |
//! | `MINT_API_KEY`, `MINT_API_SECRET`, `MINT_COLLECTION_UUID` | required for minting |
//! | `MINT_TIMEOUT_SECS` | `60` |
//!
//! Empty values count as unset.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::jobs::SchedulerConfig;
use crate::mint::http::{DEFAULT_API_URL, DEFAULT_TIMEOUT};
use crate::mint::MintApiConfig;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AirdropConfig {
    pub database: Option<DatabaseConfig>,
    pub scheduler: SchedulerConfig,
    pub mint: Option<MintApiConfig>,
}

impl AirdropConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup` (key -> value).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_connections =
            parse_positive(&get, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let database = get("DATABASE_URL").map(|url| DatabaseConfig {
            url,
            max_connections,
        });

        let defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            batch_size: parse_positive(&get, "AIRDROP_BATCH_SIZE", defaults.batch_size)?,
            tick: Duration::from_secs(parse_positive(
                &get,
                "AIRDROP_TICK_SECS",
                defaults.tick.as_secs(),
            )?),
            align_to_wall_clock: match get("AIRDROP_ALIGN_TO_WALL_CLOCK") {
                Some(raw) => parse_bool("AIRDROP_ALIGN_TO_WALL_CLOCK", &raw)?,
                None => defaults.align_to_wall_clock,
            },
        };

        let credentials = (
            get("MINT_API_KEY"),
            get("MINT_API_SECRET"),
            get("MINT_COLLECTION_UUID"),
        );
        let mint = match credentials {
            (None, None, None) => None,
            (Some(key), Some(secret), Some(collection)) => {
                let timeout = parse_positive(&get, "MINT_TIMEOUT_SECS", DEFAULT_TIMEOUT.as_secs())?;
                let base_url = get("MINT_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
                Some(
                    MintApiConfig::new(key, secret, collection)
                        .with_base_url(base_url)
                        .with_timeout(Duration::from_secs(timeout)),
                )
            }
            (None, _, _) => return Err(ConfigError::Missing("MINT_API_KEY")),
            (_, None, _) => return Err(ConfigError::Missing("MINT_API_SECRET")),
            (_, _, None) => return Err(ConfigError::Missing("MINT_COLLECTION_UUID")),
        };

        Ok(Self {
            database,
            scheduler,
            mint,
        })
    }

    pub fn require_database(&self) -> Result<&DatabaseConfig, ConfigError> {
        self.database
            .as_ref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }

    pub fn require_mint(&self) -> Result<&MintApiConfig, ConfigError> {
        self.mint
            .as_ref()
            .ok_or(ConfigError::Missing("MINT_API_KEY"))
    }
}

fn parse_positive<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    let value: T = raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
