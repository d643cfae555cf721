use std::env;

use thiserror::Error;

use crate::blockchain::pow::{ProofOfWork, DEFAULT_DIFFICULTY};

pub const HOST_VAR: &str = "LEDGER_HOST";
pub const PORT_VAR: &str = "LEDGER_PORT";
pub const DIFFICULTY_VAR: &str = "LEDGER_DIFFICULTY";
pub const MAX_MINING_ATTEMPTS_VAR: &str = "LEDGER_MAX_MINING_ATTEMPTS";

/// Errors that can occur while reading configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings fixed for the lifetime of a ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Leading zero hex digits required by the proof of work
    pub difficulty: usize,

    /// Cap on proof of work attempts per block, unbounded if `None`
    pub max_mining_attempts: Option<u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            difficulty: DEFAULT_DIFFICULTY,
            max_mining_attempts: None,
        }
    }
}

impl LedgerConfig {
    /// Builds the solver described by this configuration
    pub fn proof_of_work(&self) -> ProofOfWork {
        ProofOfWork::new(self.difficulty, self.max_mining_attempts)
    }
}

/// Node configuration: HTTP binding plus ledger settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ledger: LedgerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ledger: LedgerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads the configuration from `LEDGER_*` environment variables,
    /// falling back to defaults for anything unset
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ServerConfig::default();

        let host = lookup(HOST_VAR).unwrap_or(defaults.host);
        let port = parse_var(&lookup, PORT_VAR)?.unwrap_or(defaults.port);
        let difficulty = parse_var(&lookup, DIFFICULTY_VAR)?.unwrap_or(defaults.ledger.difficulty);
        let max_mining_attempts = parse_var(&lookup, MAX_MINING_ATTEMPTS_VAR)?;

        Ok(ServerConfig {
            host,
            port,
            ledger: LedgerConfig {
                difficulty,
                max_mining_attempts,
            },
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => Err(ConfigError::InvalidValue {
                key,
                reason: e.to_string(),
                value,
            }),
        },
    }
}
