//! Failover transport configuration, parsed once from composite URI query
//! parameters at construction time.
//!
//! Option keys match the connection-string surface exactly (camelCase).
//! Unknown keys are ignored so endpoint-level options can share the query
//! string; malformed values fail fast with `InvalidConfiguration`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::{BackoffConfig, UNLIMITED};
use crate::error::{Result, TransportError};
use crate::uri::BrokerUri;

/// Configuration for the failover transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// First backoff delay between reconnect cycles.
    pub initial_reconnect_delay: Duration,
    /// Backoff ceiling.
    pub max_reconnect_delay: Duration,
    /// Multiplier for exponential backoff growth.
    pub backoff_multiplier: f64,
    /// Whether backoff grows multiplicatively.
    pub use_exponential_backoff: bool,
    /// Steady-state retry budget, -1 = unlimited.
    pub max_reconnect_attempts: i32,
    /// Retry budget before the first successful connect, -1 = unlimited.
    pub startup_max_reconnect_attempts: i32,
    /// Shuffle non-priority candidates each attempt cycle.
    pub randomize: bool,
    /// Maintain a standby pool of pre-connected backups.
    pub backup: bool,
    /// Maximum standby connections.
    pub backup_pool_size: usize,
    /// Prefer designated priority URIs when filling the backup pool.
    pub priority_backup: bool,
    /// URIs always tried before ordinary candidates.
    pub priority_uris: Vec<BrokerUri>,
    /// Default block time for oneway/request in milliseconds; -1 waits
    /// indefinitely, 0 fails immediately when not connected.
    pub timeout_ms: i64,
    /// Retain all sent commands for replay, not just response-required ones.
    pub track_messages: bool,
    /// In-flight command table capacity.
    pub max_cache_size: usize,
    /// Whether add_uri/remove_uri calls are honored at runtime.
    pub update_uris_supported: bool,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            initial_reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            use_exponential_backoff: true,
            max_reconnect_attempts: UNLIMITED,
            startup_max_reconnect_attempts: UNLIMITED,
            randomize: true,
            backup: false,
            backup_pool_size: 1,
            priority_backup: false,
            priority_uris: Vec::new(),
            timeout_ms: -1,
            track_messages: false,
            max_cache_size: 128 * 1024,
            update_uris_supported: true,
        }
    }
}

impl FailoverConfig {
    /// Builds a configuration from composite-URI query parameters.
    pub fn from_params(params: &BTreeMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        for (key, value) in params {
            match key.as_str() {
                "initialReconnectDelay" => {
                    config.initial_reconnect_delay = Duration::from_millis(parse(key, value)?);
                }
                "maxReconnectDelay" => {
                    config.max_reconnect_delay = Duration::from_millis(parse(key, value)?);
                }
                "backOffMultiplier" => config.backoff_multiplier = parse(key, value)?,
                "useExponentialBackOff" => config.use_exponential_backoff = parse_bool(key, value)?,
                "maxReconnectAttempts" => {
                    config.max_reconnect_attempts = parse_attempts(key, value)?;
                }
                "startupMaxReconnectAttempts" => {
                    config.startup_max_reconnect_attempts = parse_attempts(key, value)?;
                }
                "randomize" => config.randomize = parse_bool(key, value)?,
                "backup" => config.backup = parse_bool(key, value)?,
                "backupPoolSize" => config.backup_pool_size = parse(key, value)?,
                "priorityBackup" => config.priority_backup = parse_bool(key, value)?,
                "priorityURIs" => {
                    config.priority_uris = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(BrokerUri::parse)
                        .collect::<Result<Vec<_>>>()?;
                }
                "timeout" => config.timeout_ms = parse(key, value)?,
                "trackMessages" => config.track_messages = parse_bool(key, value)?,
                "maxCacheSize" => config.max_cache_size = parse(key, value)?,
                "updateURIsSupported" => config.update_uris_supported = parse_bool(key, value)?,
                // Endpoint-level or future options share the query string.
                _ => {}
            }
        }

        Ok(config)
    }

    /// The backoff scheduler settings derived from this configuration.
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.initial_reconnect_delay,
            max_delay: self.max_reconnect_delay,
            multiplier: self.backoff_multiplier,
            use_exponential: self.use_exponential_backoff,
        }
    }

    /// The caller block time as a duration; `None` means wait indefinitely.
    pub fn block_timeout(&self) -> Option<Duration> {
        if self.timeout_ms < 0 {
            None
        } else {
            Some(Duration::from_millis(self.timeout_ms as u64))
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| TransportError::InvalidConfiguration {
        reason: format!("invalid value for {key}: '{value}'"),
    })
}

/// Retry budgets are `-1` (unlimited) or a non-negative count; anything
/// below `-1` is a configuration mistake, not an alias for unlimited.
fn parse_attempts(key: &str, value: &str) -> Result<i32> {
    let attempts: i32 = parse(key, value)?;
    if attempts < UNLIMITED {
        return Err(TransportError::InvalidConfiguration {
            reason: format!("invalid value for {key}: '{value}' (use -1 for unlimited)"),
        });
    }
    Ok(attempts)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(TransportError::InvalidConfiguration {
            reason: format!("invalid value for {key}: '{value}'"),
        }),
    }
}
