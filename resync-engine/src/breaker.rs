//! Failure-counting gate in front of the network.
//!
//! CLOSED admits everything. After `failure_threshold` consecutive failures
//! the breaker opens and refuses attempts until the cooldown has elapsed,
//! then admits a single half-open trial. A success from any fetch closes it
//! immediately; a failed trial re-opens it with a fresh cooldown.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use resync_core::{Instant, SyncConfig};
use tracing::{debug, info};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CircuitState {
    /// Attempts flow normally.
    Closed = 0,
    /// Attempts are refused without touching the network.
    Open = 1,
    /// One trial is in flight to test whether the backend recovered.
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl CircuitBreakerConfig {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            failure_threshold: config.error_threshold,
            cooldown: config.circuit_cooldown,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Decision for one attempted fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The cooldown elapsed and this caller holds the single half-open trial.
    Trial,
    Refused { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Refused { .. })
    }
}

/// Circuit breaker for the resource backend.
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_errors: AtomicU32,
    opened_at: RwLock<Option<Instant>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_errors: AtomicU32::new(0),
            opened_at: RwLock::new(None),
            config,
        }
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }

    /// When the breaker last opened, if it is not closed.
    pub fn opened_at(&self) -> Option<Instant> {
        *self
            .opened_at
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Time left before a trial will be admitted.
    pub fn retry_after(&self, now: Instant) -> Duration {
        match self.opened_at() {
            Some(opened) => self
                .config
                .cooldown
                .saturating_sub(now.saturating_duration_since(opened)),
            None => Duration::ZERO,
        }
    }

    /// Decide whether a fetch may be attempted at `now`.
    ///
    /// Exactly one caller observes [`Admission::Trial`] per cooldown expiry;
    /// every other caller is refused until the trial settles.
    pub fn admit(&self, now: Instant) -> Admission {
        match self.state() {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let retry_after = self.retry_after(now);
                if !retry_after.is_zero() {
                    return Admission::Refused { retry_after };
                }
                match self.state.compare_exchange(
                    CircuitState::Open as u8,
                    CircuitState::HalfOpen as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => {
                        info!("Circuit half-open, admitting trial");
                        Admission::Trial
                    }
                    Err(_) => Admission::Refused {
                        retry_after: Duration::ZERO,
                    },
                }
            }
            CircuitState::HalfOpen => Admission::Refused {
                retry_after: Duration::ZERO,
            },
        }
    }

    /// Give back a trial that never reached the network.
    pub fn abandon_trial(&self) {
        if self
            .state
            .compare_exchange(
                CircuitState::HalfOpen as u8,
                CircuitState::Open as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            debug!("Half-open trial abandoned");
        }
    }

    /// Any success closes the breaker regardless of elapsed cooldown.
    pub fn record_success(&self) {
        self.consecutive_errors.store(0, Ordering::SeqCst);
        let previous = CircuitState::from(
            self.state
                .swap(CircuitState::Closed as u8, Ordering::SeqCst),
        );
        self.set_opened_at(None);
        if previous != CircuitState::Closed {
            info!(previous = %previous, "Circuit closed");
        }
    }

    /// Count a failure. Returns the consecutive error count.
    pub fn record_failure(&self, now: Instant) -> u32 {
        let count = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.config.failure_threshold {
            let previous = CircuitState::from(
                self.state.swap(CircuitState::Open as u8, Ordering::SeqCst),
            );
            self.set_opened_at(Some(now));
            info!(
                previous = %previous,
                consecutive_errors = count,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "Circuit opened"
            );
        }
        count
    }

    pub fn reset(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::SeqCst);
        self.consecutive_errors.store(0, Ordering::SeqCst);
        self.set_opened_at(None);
    }

    fn set_opened_at(&self, value: Option<Instant>) {
        let mut guard = self
            .opened_at
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = value;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("consecutive_errors", &self.consecutive_errors())
            .field("opened_at", &self.opened_at())
            .finish()
    }
}
