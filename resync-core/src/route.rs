//! Route identity and throttle classification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque name of one logical fetchable resource, e.g. `/me`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteKey(String);

impl RouteKey {
    pub fn new(route: impl Into<String>) -> Self {
        Self(route.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RouteKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RouteKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for RouteKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of an independent call site requesting the resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerId(String);

impl ConsumerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsumerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Throttle tier of a route, supplied explicitly when the route is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    /// Identity lookups that access guards depend on. Never throttled.
    CriticalIdentity,
    /// Rapidly changing data. A minimum debounce separates accepted requests.
    Volatile,
    /// Everything else. A sliding counter caps requests per window.
    #[default]
    Standard,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CriticalIdentity => "critical_identity",
            Self::Volatile => "volatile",
            Self::Standard => "standard",
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
