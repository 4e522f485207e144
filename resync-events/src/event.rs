//! Lifecycle event kinds and their typed payloads.

use std::fmt;
use std::sync::Arc;

use resync_core::{Resource, RouteKey, SyncError};

/// Closed set of lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// A fetch started.
    Loading,
    /// A fetch settled successfully and its result was committed.
    Loaded,
    /// A fetch failed.
    Error,
    /// The cached resource changed.
    Updated,
    /// Cached freshness was cleared.
    Invalidated,
    /// A refresh is about to replace the invalidated data.
    Updating,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Loading,
        EventKind::Loaded,
        EventKind::Error,
        EventKind::Updated,
        EventKind::Invalidated,
        EventKind::Updating,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "LOADING",
            Self::Loaded => "LOADED",
            Self::Error => "ERROR",
            Self::Updated => "UPDATED",
            Self::Invalidated => "INVALIDATED",
            Self::Updating => "UPDATING",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything the bus can carry.
///
/// `digest_material` feeds the dedup fingerprint; two events of the same
/// kind with equal material inside the dedup window are delivered once.
pub trait BusEvent: Clone + Send + Sync + 'static {
    fn kind(&self) -> EventKind;

    fn digest_material(&self) -> Vec<u8>;
}

/// Lifecycle notification about one managed resource.
#[derive(Debug, Clone)]
pub enum SyncEvent<R> {
    Loading { route: RouteKey },
    Loaded { route: RouteKey, resource: Arc<R> },
    Error {
        route: RouteKey,
        error: SyncError,
        consecutive_errors: u32,
    },
    Updated { resource: Arc<R> },
    Invalidated { reason: String },
    Updating { reason: String },
}

impl<R> SyncEvent<R> {
    /// The resource carried by `Loaded` and `Updated`.
    pub fn resource(&self) -> Option<&Arc<R>> {
        match self {
            Self::Loaded { resource, .. } | Self::Updated { resource } => Some(resource),
            _ => None,
        }
    }
}

impl<R: Resource> BusEvent for SyncEvent<R> {
    fn kind(&self) -> EventKind {
        match self {
            Self::Loading { .. } => EventKind::Loading,
            Self::Loaded { .. } => EventKind::Loaded,
            Self::Error { .. } => EventKind::Error,
            Self::Updated { .. } => EventKind::Updated,
            Self::Invalidated { .. } => EventKind::Invalidated,
            Self::Updating { .. } => EventKind::Updating,
        }
    }

    fn digest_material(&self) -> Vec<u8> {
        match self {
            Self::Loading { route } => route.as_str().as_bytes().to_vec(),
            Self::Loaded { resource, .. } | Self::Updated { resource } => {
                // Falls back to the identifier if the resource cannot be encoded.
                serde_json::to_vec(resource.as_ref())
                    .unwrap_or_else(|_| resource.resource_id().into_bytes())
            }
            Self::Error {
                route,
                error,
                consecutive_errors,
            } => format!("{route}|{error}|{consecutive_errors}").into_bytes(),
            Self::Invalidated { reason } | Self::Updating { reason } => {
                reason.as_bytes().to_vec()
            }
        }
    }
}
