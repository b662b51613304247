//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

/// Controller-level configuration
///
/// All settings have defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Deadline of a single reconciliation pass (seconds)
    pub reconcile_timeout_secs: u64,
    /// Requeue interval after a successful reconciliation (seconds)
    pub resync_interval_secs: u64,
    /// Exponential backoff starting value (seconds)
    pub backoff_start_secs: u64,
    /// Exponential backoff maximum value (seconds)
    pub backoff_max_secs: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after the stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// Maximum concurrent reconciliations
    pub max_concurrent_reconciliations: usize,
    /// Failed finalization attempts after which cleanup is abandoned
    pub max_cleanup_attempts: u32,
    /// EventReport collection period (seconds)
    pub report_collection_interval_secs: u64,
    /// Namespace where the controller is deployed
    pub controller_namespace: String,
    /// Helm executable used to deploy charts
    pub helm_binary: String,
    /// Global log level (error, warn, info, debug, trace)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            reconcile_timeout_secs: DEFAULT_RECONCILE_TIMEOUT_SECS,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            backoff_start_secs: DEFAULT_BACKOFF_START_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            max_cleanup_attempts: DEFAULT_MAX_CLEANUP_ATTEMPTS,
            report_collection_interval_secs: DEFAULT_REPORT_COLLECTION_INTERVAL_SECS,
            controller_namespace: DEFAULT_CONTROLLER_NAMESPACE.to_string(),
            helm_binary: DEFAULT_HELM_BINARY.to_string(),
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            reconcile_timeout_secs: env_var_or_default(
                "RECONCILE_TIMEOUT_SECS",
                DEFAULT_RECONCILE_TIMEOUT_SECS,
            ),
            resync_interval_secs: env_var_or_default(
                "RESYNC_INTERVAL_SECS",
                DEFAULT_RESYNC_INTERVAL_SECS,
            ),
            backoff_start_secs: env_var_or_default("BACKOFF_START_SECS", DEFAULT_BACKOFF_START_SECS),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            watch_restart_delay_after_end_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            max_cleanup_attempts: env_var_or_default(
                "MAX_CLEANUP_ATTEMPTS",
                DEFAULT_MAX_CLEANUP_ATTEMPTS,
            ),
            report_collection_interval_secs: env_var_or_default(
                "REPORT_COLLECTION_INTERVAL_SECS",
                DEFAULT_REPORT_COLLECTION_INTERVAL_SECS,
            ),
            controller_namespace: env_var_or_default_str(
                "POD_NAMESPACE",
                DEFAULT_CONTROLLER_NAMESPACE,
            ),
            helm_binary: env_var_or_default_str("HELM_BINARY", DEFAULT_HELM_BINARY),
            log_level: env_var_or_default_str("LOG_LEVEL", "info"),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
        }
    }

    #[must_use]
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    #[must_use]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Get watch restart delay after end duration
    #[must_use]
    pub fn watch_restart_delay_after_end_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }

    #[must_use]
    pub fn report_collection_interval(&self) -> Duration {
        Duration::from_secs(self.report_collection_interval_secs.max(1))
    }

    /// JSON logs unless `LOG_FORMAT=text`
    #[must_use]
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// Read environment variable or return default value
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
pub(crate) fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.reconcile_timeout(), Duration::from_secs(120));
        assert_eq!(config.resync_interval(), Duration::from_secs(600));
        assert_eq!(config.max_concurrent_reconciliations, 10);
        assert_eq!(config.max_cleanup_attempts, 5);
        assert_eq!(config.helm_binary, "helm");
        assert!(!config.json_logs());
    }

    #[test]
    fn test_env_var_or_default_falls_back_on_garbage() {
        std::env::set_var("EVENT_MANAGER_TEST_GARBAGE_U64", "not-a-number");
        assert_eq!(env_var_or_default("EVENT_MANAGER_TEST_GARBAGE_U64", 7_u64), 7);
        std::env::remove_var("EVENT_MANAGER_TEST_GARBAGE_U64");
    }

    #[test]
    fn test_report_collection_interval_never_zero() {
        let config = ControllerConfig {
            report_collection_interval_secs: 0,
            ..ControllerConfig::default()
        };
        assert_eq!(config.report_collection_interval(), Duration::from_secs(1));
    }
}
