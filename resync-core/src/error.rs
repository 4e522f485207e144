//! Error types for resync operations

use crate::RouteKey;
use thiserror::Error;

/// Transport layer errors, reported by whatever issues the actual network call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network failure on {route}: {reason}")]
    Network { route: RouteKey, reason: String },

    #[error("Request to {route} timed out after {after_ms}ms")]
    Timeout { route: RouteKey, after_ms: u64 },

    #[error("Request to {route} failed with status {status}: {message}")]
    Status {
        route: RouteKey,
        status: u16,
        message: String,
    },

    #[error("Response body from {route} could not be decoded: {reason}")]
    Decode { route: RouteKey, reason: String },
}

impl TransportError {
    /// Route the failed request targeted.
    pub fn route(&self) -> &RouteKey {
        match self {
            Self::Network { route, .. }
            | Self::Timeout { route, .. }
            | Self::Status { route, .. }
            | Self::Decode { route, .. } => route,
        }
    }
}

/// The fetch succeeded but the payload failed shape validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidPayloadError {
    #[error("Malformed payload: {reason}")]
    Malformed { reason: String },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Durable snapshot and in-memory store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Snapshot operation failed: {reason}")]
    Snapshot { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },

    #[error("Failed to read configuration file: {reason}")]
    Io { reason: String },

    #[error("No Tokio runtime available: {reason}")]
    Runtime { reason: String },
}

/// Master error type for all resync errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] InvalidPayloadError),

    #[error("Circuit open for {route}, retry after {retry_after_ms}ms")]
    CircuitOpen { route: RouteKey, retry_after_ms: u64 },

    #[error("Response from {route} (generation {generation}) discarded by a full clear")]
    Discarded { route: RouteKey, generation: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_invalid_payload(&self) -> bool {
        matches!(self, Self::InvalidPayload(_))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Whether this error should count toward opening the circuit breaker.
    ///
    /// A refused attempt never reached the network, so it is not a failure.
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::InvalidPayload(_))
    }
}

/// Result type alias for resync operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// TESTS
// =============================================================================
