//! Configuration module
//!
//! Tunables for lock waits and optimistic retries, loadable from the
//! environment.

use std::env;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// How long a mutation waits for its account or transaction lock
    pub lock_timeout: Duration,

    /// How often a balance override re-reads and retries after a concurrent
    /// writer touched the same account
    pub max_adjustment_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            max_adjustment_retries: 3,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let lock_timeout = match env::var("LEDGER_LOCK_TIMEOUT_MS") {
            Ok(raw) => Duration::from_millis(
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("LEDGER_LOCK_TIMEOUT_MS"))?,
            ),
            Err(_) => defaults.lock_timeout,
        };

        let max_adjustment_retries = match env::var("LEDGER_MAX_ADJUSTMENT_RETRIES") {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue("LEDGER_MAX_ADJUSTMENT_RETRIES"))?,
            Err(_) => defaults.max_adjustment_retries,
        };

        Ok(Self {
            lock_timeout,
            max_adjustment_retries,
        })
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.max_adjustment_retries, 3);
    }

    // The only test in the crate that touches these variables.
    #[test]
    fn from_env_reads_and_rejects_values() {
        env::set_var("LEDGER_LOCK_TIMEOUT_MS", "250");
        env::set_var("LEDGER_MAX_ADJUSTMENT_RETRIES", " 7 ");
        let config = LedgerConfig::from_env().unwrap();
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.max_adjustment_retries, 7);

        env::set_var("LEDGER_LOCK_TIMEOUT_MS", "soon");
        assert!(matches!(
            LedgerConfig::from_env(),
            Err(ConfigError::InvalidValue("LEDGER_LOCK_TIMEOUT_MS"))
        ));

        env::remove_var("LEDGER_LOCK_TIMEOUT_MS");
        env::set_var("LEDGER_MAX_ADJUSTMENT_RETRIES", "-1");
        assert!(matches!(
            LedgerConfig::from_env(),
            Err(ConfigError::InvalidValue("LEDGER_MAX_ADJUSTMENT_RETRIES"))
        ));

        env::remove_var("LEDGER_MAX_ADJUSTMENT_RETRIES");
        assert_eq!(LedgerConfig::from_env().unwrap(), LedgerConfig::default());
    }
}
