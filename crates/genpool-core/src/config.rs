//! Configuration, lifecycle policy and data directory management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One year, the default soft-suspension horizon after quota exhaustion.
pub const DEFAULT_SUSPENSION_SECS: i64 = 365 * 24 * 60 * 60;
const SECS_PER_DAY: i64 = 24 * 60 * 60;
pub const DEFAULT_LOGIN_SETTLE_MS: u64 = 10_000;
pub const DEFAULT_SELECTOR_TIMEOUT_MS: u64 = 30_000;

/// Paths to all genpool data directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Persisted credential records (`data/accounts/`).
    pub accounts: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            accounts: root.join("accounts"),
            root,
        };
        std::fs::create_dir_all(&paths.accounts)?;
        Ok(paths)
    }

    /// Directory holding the records of one service (`data/accounts/<service>/`).
    pub fn service_accounts(&self, service: &str) -> PathBuf {
        self.accounts.join(service)
    }
}

/// Timing and eviction policy shared by every worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecyclePolicy {
    /// How far in the future `suspended_until` is set after a 402.
    #[serde(default = "default_suspension")]
    pub suspension_horizon_secs: i64,
    /// Pause after interactive login while cookies are issued.
    #[serde(default = "default_settle")]
    pub login_settle_delay_ms: u64,
    #[serde(default = "default_selector_timeout")]
    pub selector_timeout_ms: u64,
    /// Periodic re-harvest of a live session. Disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_refresh_interval_secs: Option<u64>,
}

fn default_suspension() -> i64 {
    DEFAULT_SUSPENSION_SECS
}
fn default_settle() -> u64 {
    DEFAULT_LOGIN_SETTLE_MS
}
fn default_selector_timeout() -> u64 {
    DEFAULT_SELECTOR_TIMEOUT_MS
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            suspension_horizon_secs: DEFAULT_SUSPENSION_SECS,
            login_settle_delay_ms: DEFAULT_LOGIN_SETTLE_MS,
            selector_timeout_ms: DEFAULT_SELECTOR_TIMEOUT_MS,
            session_refresh_interval_secs: None,
        }
    }
}

impl LifecyclePolicy {
    pub fn login_settle_delay(&self) -> Duration {
        Duration::from_millis(self.login_settle_delay_ms)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_timeout_ms)
    }

    pub fn session_refresh_interval(&self) -> Option<Duration> {
        self.session_refresh_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Unix timestamp until which a quota-exhausted account stays suspended.
    pub fn suspended_until(&self, now: i64) -> i64 {
        now.saturating_add(self.suspension_horizon_secs)
    }
}

/// Top-level genpool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenpoolConfig {
    pub data_paths: DataPaths,
    pub policy: LifecyclePolicy,
}

impl GenpoolConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        Self::with_overrides(data_dir, |key| std::env::var(key).ok())
    }

    /// Create configuration, resolving overrides through `lookup`.
    pub fn with_overrides<F>(data_dir: impl AsRef<Path>, lookup: F) -> std::io::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut policy = LifecyclePolicy::default();

        if let Some(days) = lookup("GENPOOL_SUSPENSION_DAYS").and_then(|v| v.parse::<i64>().ok()) {
            match days.checked_mul(SECS_PER_DAY).filter(|_| days > 0) {
                Some(secs) => policy.suspension_horizon_secs = secs,
                None => warn!("Ignoring GENPOOL_SUSPENSION_DAYS={}", days),
            }
        }
        if let Some(ms) = lookup("GENPOOL_LOGIN_SETTLE_MS").and_then(|v| v.parse().ok()) {
            policy.login_settle_delay_ms = ms;
        }
        if let Some(secs) = lookup("GENPOOL_REFRESH_SECS").and_then(|v| v.parse().ok()) {
            policy.session_refresh_interval_secs = Some(secs);
        }

        let data_paths = DataPaths::new(data_dir)?;
        debug!("Lifecycle policy: {:?}", policy);

        Ok(Self { data_paths, policy })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = LifecyclePolicy::default();
        assert_eq!(policy.suspension_horizon_secs, 31_536_000);
        assert_eq!(policy.login_settle_delay(), Duration::from_secs(10));
        assert!(policy.session_refresh_interval().is_none());
        assert_eq!(policy.suspended_until(1_000), 1_000 + 31_536_000);
    }

    #[test]
    fn test_policy_deserialize_fills_defaults() {
        let policy: LifecyclePolicy =
            serde_json::from_str(r#"{"login_settle_delay_ms": 5}"#).unwrap();
        assert_eq!(policy.login_settle_delay_ms, 5);
        assert_eq!(policy.suspension_horizon_secs, DEFAULT_SUSPENSION_SECS);
    }

    #[test]
    fn test_zero_refresh_interval_disables_refresh() {
        let policy = LifecyclePolicy {
            session_refresh_interval_secs: Some(0),
            ..Default::default()
        };
        assert!(policy.session_refresh_interval().is_none());
    }

    #[test]
    fn test_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let config = GenpoolConfig::with_overrides(dir.path(), |key| match key {
            "GENPOOL_SUSPENSION_DAYS" => Some("30".into()),
            "GENPOOL_REFRESH_SECS" => Some("600".into()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.policy.suspension_horizon_secs, 30 * 86_400);
        assert_eq!(config.policy.session_refresh_interval_secs, Some(600));
        assert_eq!(config.policy.login_settle_delay_ms, DEFAULT_LOGIN_SETTLE_MS);
        assert!(config.data_paths.accounts.is_dir());
        assert_eq!(
            config.data_paths.service_accounts("pika"),
            dir.path().join("accounts").join("pika")
        );
    }

    #[test]
    fn test_invalid_suspension_days_keep_default() {
        let dir = tempfile::tempdir().unwrap();
        for days in ["0", "-5", "9223372036854775807", "1000000000000000"] {
            let config = GenpoolConfig::with_overrides(dir.path(), |key| match key {
                "GENPOOL_SUSPENSION_DAYS" => Some(days.into()),
                _ => None,
            })
            .unwrap();
            assert_eq!(config.policy.suspension_horizon_secs, DEFAULT_SUSPENSION_SECS, "days={}", days);
        }
    }

    #[test]
    fn test_suspended_until_saturates() {
        let policy = LifecyclePolicy {
            suspension_horizon_secs: i64::MAX,
            ..Default::default()
        };
        assert_eq!(policy.suspended_until(1_000), i64::MAX);
    }
}
