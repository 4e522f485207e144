//! Configuration types
//!
//! Every tunable of the engine lives in [`SyncConfig`]. Values come from
//! defaults, builder setters, `RESYNC_*` environment variables or a TOML file
//! whose fields are all optional and overlaid on the defaults.

use crate::{ConfigError, SyncResult};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

/// How long a successful fetch is trusted without asking the network (60s).
pub const DEFAULT_FRESHNESS_MS: u64 = 60_000;

/// Age beyond which cached data is no longer trusted for critical decisions (30min).
pub const DEFAULT_MAX_AGE_MS: u64 = 30 * 60_000;

/// Consecutive failures that open the circuit breaker.
pub const DEFAULT_ERROR_THRESHOLD: u32 = 3;

/// How long an open breaker refuses fetch attempts (15s).
pub const DEFAULT_CIRCUIT_COOLDOWN_MS: u64 = 15_000;

/// Minimum interval between accepted requests on volatile routes (3s).
pub const DEFAULT_REQUEST_DEBOUNCE_MS: u64 = 3_000;

/// Accepted requests per window on standard routes.
pub const DEFAULT_REQUEST_THRESHOLD: u32 = 5;

/// Length of the standard-route request counting window (10s).
pub const DEFAULT_REQUEST_COUNT_RESET_MS: u64 = 10_000;

/// Window in which identical notifications are dropped (500ms).
pub const DEFAULT_EVENT_DEDUP_WINDOW_MS: u64 = 500;

/// Age after which notification fingerprints are discarded (5s).
pub const DEFAULT_EVENT_CLEANUP_HORIZON_MS: u64 = 5_000;

/// Automatic release of a route's processing mark (10s).
pub const DEFAULT_PROCESSING_TIMEOUT_MS: u64 = 10_000;

/// Timeout passed to the transport for each fetch (10s).
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;

/// Key under which the durable snapshot is stored.
pub const DEFAULT_SNAPSHOT_KEY: &str = "resource";

// ============================================================================
// SYNC CONFIG
// ============================================================================

/// Tunables for the synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub freshness_duration: Duration,
    pub max_age_duration: Duration,
    pub error_threshold: u32,
    pub circuit_cooldown: Duration,
    pub request_debounce_time: Duration,
    pub request_threshold: u32,
    pub request_count_reset_time: Duration,
    pub event_dedup_window: Duration,
    pub event_cleanup_horizon: Duration,
    pub processing_timeout: Duration,
    pub fetch_timeout: Duration,
    pub fetch_retries: u32,
    pub snapshot_key: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            freshness_duration: Duration::from_millis(DEFAULT_FRESHNESS_MS),
            max_age_duration: Duration::from_millis(DEFAULT_MAX_AGE_MS),
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            circuit_cooldown: Duration::from_millis(DEFAULT_CIRCUIT_COOLDOWN_MS),
            request_debounce_time: Duration::from_millis(DEFAULT_REQUEST_DEBOUNCE_MS),
            request_threshold: DEFAULT_REQUEST_THRESHOLD,
            request_count_reset_time: Duration::from_millis(DEFAULT_REQUEST_COUNT_RESET_MS),
            event_dedup_window: Duration::from_millis(DEFAULT_EVENT_DEDUP_WINDOW_MS),
            event_cleanup_horizon: Duration::from_millis(DEFAULT_EVENT_CLEANUP_HORIZON_MS),
            processing_timeout: Duration::from_millis(DEFAULT_PROCESSING_TIMEOUT_MS),
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            fetch_retries: 0,
            snapshot_key: DEFAULT_SNAPSHOT_KEY.to_string(),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_freshness(mut self, duration: Duration) -> Self {
        self.freshness_duration = duration;
        self
    }

    pub fn with_max_age(mut self, duration: Duration) -> Self {
        self.max_age_duration = duration;
        self
    }

    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold;
        self
    }

    pub fn with_circuit_cooldown(mut self, duration: Duration) -> Self {
        self.circuit_cooldown = duration;
        self
    }

    pub fn with_request_debounce(mut self, duration: Duration) -> Self {
        self.request_debounce_time = duration;
        self
    }

    pub fn with_request_threshold(mut self, threshold: u32) -> Self {
        self.request_threshold = threshold;
        self
    }

    pub fn with_request_count_reset(mut self, duration: Duration) -> Self {
        self.request_count_reset_time = duration;
        self
    }

    pub fn with_event_dedup_window(mut self, duration: Duration) -> Self {
        self.event_dedup_window = duration;
        self
    }

    pub fn with_processing_timeout(mut self, duration: Duration) -> Self {
        self.processing_timeout = duration;
        self
    }

    pub fn with_snapshot_key(mut self, key: impl Into<String>) -> Self {
        self.snapshot_key = key.into();
        self
    }

    /// Create SyncConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `RESYNC_FRESHNESS_MS`, `RESYNC_MAX_AGE_MS`
    /// - `RESYNC_ERROR_THRESHOLD`, `RESYNC_CIRCUIT_COOLDOWN_MS`
    /// - `RESYNC_REQUEST_DEBOUNCE_MS`, `RESYNC_REQUEST_THRESHOLD`,
    ///   `RESYNC_REQUEST_COUNT_RESET_MS`
    /// - `RESYNC_EVENT_DEDUP_WINDOW_MS`, `RESYNC_EVENT_CLEANUP_HORIZON_MS`
    /// - `RESYNC_PROCESSING_TIMEOUT_MS`, `RESYNC_FETCH_TIMEOUT_MS`, `RESYNC_FETCH_RETRIES`
    /// - `RESYNC_SNAPSHOT_KEY`
    ///
    /// Missing or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let ms = |name: &str, default: Duration| {
            lookup(name)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let count = |name: &str, default: u32| {
            lookup(name)
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(default)
        };

        let defaults = Self::default();
        Self {
            freshness_duration: ms("RESYNC_FRESHNESS_MS", defaults.freshness_duration),
            max_age_duration: ms("RESYNC_MAX_AGE_MS", defaults.max_age_duration),
            error_threshold: count("RESYNC_ERROR_THRESHOLD", defaults.error_threshold),
            circuit_cooldown: ms("RESYNC_CIRCUIT_COOLDOWN_MS", defaults.circuit_cooldown),
            request_debounce_time: ms("RESYNC_REQUEST_DEBOUNCE_MS", defaults.request_debounce_time),
            request_threshold: count("RESYNC_REQUEST_THRESHOLD", defaults.request_threshold),
            request_count_reset_time: ms(
                "RESYNC_REQUEST_COUNT_RESET_MS",
                defaults.request_count_reset_time,
            ),
            event_dedup_window: ms("RESYNC_EVENT_DEDUP_WINDOW_MS", defaults.event_dedup_window),
            event_cleanup_horizon: ms(
                "RESYNC_EVENT_CLEANUP_HORIZON_MS",
                defaults.event_cleanup_horizon,
            ),
            processing_timeout: ms("RESYNC_PROCESSING_TIMEOUT_MS", defaults.processing_timeout),
            fetch_timeout: ms("RESYNC_FETCH_TIMEOUT_MS", defaults.fetch_timeout),
            fetch_retries: count("RESYNC_FETCH_RETRIES", defaults.fetch_retries),
            snapshot_key: lookup("RESYNC_SNAPSHOT_KEY")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.snapshot_key),
        }
    }

    /// Parse a TOML document and overlay it on the defaults.
    pub fn from_toml_str(contents: &str) -> SyncResult<Self> {
        let file: SyncConfigFile = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        let config = file.overlay(Self::default());
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file and overlay it on the defaults.
    pub fn from_path(path: &Path) -> SyncResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - all windows and timeouts are non-zero
    /// - `error_threshold` and `request_threshold` are at least 1
    /// - `max_age_duration` is not shorter than `freshness_duration`
    /// - `snapshot_key` is not blank
    pub fn validate(&self) -> SyncResult<()> {
        let durations = [
            ("freshness_duration", self.freshness_duration),
            ("max_age_duration", self.max_age_duration),
            ("circuit_cooldown", self.circuit_cooldown),
            ("request_debounce_time", self.request_debounce_time),
            ("request_count_reset_time", self.request_count_reset_time),
            ("event_dedup_window", self.event_dedup_window),
            ("event_cleanup_horizon", self.event_cleanup_horizon),
            ("processing_timeout", self.processing_timeout),
            ("fetch_timeout", self.fetch_timeout),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: format!("{:?}", value),
                    reason: "duration must be positive".to_string(),
                }
                .into());
            }
        }

        if self.error_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "error_threshold".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.request_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_threshold".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.max_age_duration < self.freshness_duration {
            return Err(ConfigError::InvalidValue {
                field: "max_age_duration".to_string(),
                value: format!("{:?}", self.max_age_duration),
                reason: format!(
                    "must not be shorter than freshness_duration ({:?})",
                    self.freshness_duration
                ),
            }
            .into());
        }
        if self.snapshot_key.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "snapshot_key".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// On-disk shape of [`SyncConfig`]. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SyncConfigFile {
    freshness_ms: Option<u64>,
    max_age_ms: Option<u64>,
    error_threshold: Option<u32>,
    circuit_cooldown_ms: Option<u64>,
    request_debounce_ms: Option<u64>,
    request_threshold: Option<u32>,
    request_count_reset_ms: Option<u64>,
    event_dedup_window_ms: Option<u64>,
    event_cleanup_horizon_ms: Option<u64>,
    processing_timeout_ms: Option<u64>,
    fetch_timeout_ms: Option<u64>,
    fetch_retries: Option<u32>,
    snapshot_key: Option<String>,
}

impl SyncConfigFile {
    fn overlay(self, mut base: SyncConfig) -> SyncConfig {
        fn set(target: &mut Duration, ms: Option<u64>) {
            if let Some(ms) = ms {
                *target = Duration::from_millis(ms);
            }
        }

        set(&mut base.freshness_duration, self.freshness_ms);
        set(&mut base.max_age_duration, self.max_age_ms);
        set(&mut base.circuit_cooldown, self.circuit_cooldown_ms);
        set(&mut base.request_debounce_time, self.request_debounce_ms);
        set(&mut base.request_count_reset_time, self.request_count_reset_ms);
        set(&mut base.event_dedup_window, self.event_dedup_window_ms);
        set(&mut base.event_cleanup_horizon, self.event_cleanup_horizon_ms);
        set(&mut base.processing_timeout, self.processing_timeout_ms);
        set(&mut base.fetch_timeout, self.fetch_timeout_ms);
        if let Some(threshold) = self.error_threshold {
            base.error_threshold = threshold;
        }
        if let Some(threshold) = self.request_threshold {
            base.request_threshold = threshold;
        }
        if let Some(retries) = self.fetch_retries {
            base.fetch_retries = retries;
        }
        if let Some(key) = self.snapshot_key {
            base.snapshot_key = key;
        }
        base
    }
}
