use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

const DEFAULT_KILL_DELAY_MS: u64 = 10_000;
const DEFAULT_DAEMON_WAIT_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_PENDING_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_PENDING_RETRY_BACKOFF_MS: u64 = 500;
const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Tunables of the overuse handler.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HandlerConfig {
    pub kill_delay_ms: u64,
    pub daemon_wait_timeout_ms: u64,
    pub pending_retry_attempts: u32,
    pub pending_retry_backoff_ms: u64,
    pub retention_days: u32,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            kill_delay_ms: DEFAULT_KILL_DELAY_MS,
            daemon_wait_timeout_ms: DEFAULT_DAEMON_WAIT_TIMEOUT_MS,
            pending_retry_attempts: DEFAULT_PENDING_RETRY_ATTEMPTS,
            pending_retry_backoff_ms: DEFAULT_PENDING_RETRY_BACKOFF_MS,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl HandlerConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn kill_delay(&self) -> Duration {
        Duration::from_millis(self.kill_delay_ms)
    }

    pub fn daemon_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.daemon_wait_timeout_ms)
    }

    pub fn pending_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.pending_retry_backoff_ms)
    }

    /// At least one attempt is always made.
    pub fn pending_retry_attempts(&self) -> u32 {
        self.pending_retry_attempts.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = HandlerConfig::from_toml_str("kill_delay_ms = 250\n").expect("parse");
        assert_eq!(config.kill_delay(), Duration::from_millis(250));
        assert_eq!(config.daemon_wait_timeout(), Duration::from_secs(3));
        assert_eq!(config.retention_days, 30);
    }

    #[test]
    fn zero_retry_attempts_still_tries_once() {
        let config = HandlerConfig {
            pending_retry_attempts: 0,
            ..HandlerConfig::default()
        };
        assert_eq!(config.pending_retry_attempts(), 1);
    }

    #[test]
    fn malformed_toml_is_rejected() {
        assert!(HandlerConfig::from_toml_str("kill_delay_ms = \"soon\"").is_err());
    }
}
