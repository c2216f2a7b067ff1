//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::*;
use std::path::PathBuf;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have defaults and can be overridden via environment variables.
/// In a cluster the variables come from a `ConfigMap` mounted with `envFrom`.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Root of the versioned chart/profile tree (`<dir>/<version>/charts`, `<dir>/<version>/profiles`)
    pub resource_directory: PathBuf,
    /// Profile applied to every mesh before its own profile
    pub default_profile: String,
    /// Requeue delay after a write conflict (seconds)
    pub conflict_requeue_secs: u64,
    /// Requeue delay when the API server rejects a create as unavailable (seconds)
    pub not_ready_requeue_secs: u64,
    /// Floor for the inactive revision grace period (seconds)
    pub min_grace_period_secs: i64,
    /// Fibonacci backoff lower bound (seconds)
    pub backoff_min_secs: u64,
    /// Fibonacci backoff upper bound (seconds)
    pub backoff_max_secs: u64,
    /// Delay before a controller stream that ended is restarted (seconds)
    pub watch_restart_delay_secs: u64,
    /// Limits how many objects of one kind are reconciled at the same time
    pub max_concurrent_reconciliations: u16,
    /// Port for /metrics, /healthz and /readyz
    pub metrics_port: u16,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
    /// Explicit helm binary; searched on PATH when unset
    pub helm_binary: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let vars = Vars(&lookup);
        Self {
            resource_directory: PathBuf::from(
                vars.string("RESOURCE_DIRECTORY", DEFAULT_RESOURCE_DIRECTORY),
            ),
            default_profile: vars.string("DEFAULT_PROFILE", DEFAULT_PROFILE),
            conflict_requeue_secs: vars.parsed("CONFLICT_REQUEUE_SECS", DEFAULT_CONFLICT_REQUEUE_SECS),
            not_ready_requeue_secs: vars
                .parsed("NOT_READY_REQUEUE_SECS", DEFAULT_NOT_READY_REQUEUE_SECS),
            min_grace_period_secs: vars.parsed(
                "MIN_GRACE_PERIOD_SECS",
                MIN_INACTIVE_REVISION_GRACE_PERIOD_SECS,
            ),
            backoff_min_secs: vars.parsed("BACKOFF_MIN_SECS", DEFAULT_BACKOFF_MIN_SECS),
            backoff_max_secs: vars.parsed("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            watch_restart_delay_secs: vars
                .parsed("WATCH_RESTART_DELAY_SECS", DEFAULT_WATCH_RESTART_DELAY_SECS),
            max_concurrent_reconciliations: vars.parsed("MAX_CONCURRENT_RECONCILIATIONS", 4),
            metrics_port: vars.parsed("METRICS_PORT", DEFAULT_METRICS_PORT),
            log_level: vars.string("LOG_LEVEL", "INFO"),
            log_format: vars.string("LOG_FORMAT", "json"),
            helm_binary: lookup("HELM_BINARY").filter(|v| !v.is_empty()),
        }
    }

    #[must_use]
    pub fn conflict_requeue(&self) -> Duration {
        Duration::from_secs(self.conflict_requeue_secs)
    }

    #[must_use]
    pub fn not_ready_requeue(&self) -> Duration {
        Duration::from_secs(self.not_ready_requeue_secs)
    }

    #[must_use]
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Directory holding the charts and profiles for one mesh version
    #[must_use]
    pub fn version_directory(&self, version: &str) -> PathBuf {
        self.resource_directory.join(version)
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    /// Read a variable and parse it, falling back to the default when unset or unparsable
    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        (self.0)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn string(&self, key: &str, default: &str) -> String {
        (self.0)(key)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }
}
