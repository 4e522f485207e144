//! Transport collaborator: whatever actually issues the network call.
//!
//! The engine only needs a JSON payload or a [`TransportError`]. Timeouts
//! are the transport's job and reach the engine as ordinary failures.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CACHE_CONTROL};
use resync_core::{ConfigError, FetchOptions, RouteKey, SyncResult, TransportError};
use tracing::{debug, warn};

/// Fetches raw resource payloads by route.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(
        &self,
        route: &RouteKey,
        options: &FetchOptions,
    ) -> Result<serde_json::Value, TransportError>;
}

/// Connection settings for [`RestTransport`].
#[derive(Debug, Clone)]
pub struct RestTransportConfig {
    pub base_url: String,
    pub bearer_token: Option<String>,
    pub api_key: Option<String>,
    pub default_timeout: Duration,
}

impl RestTransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bearer_token: None,
            api_key: None,
            default_timeout: Duration::from_millis(resync_core::DEFAULT_FETCH_TIMEOUT_MS),
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "base_url".to_string(),
            });
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "base_url".to_string(),
                value: self.base_url.clone(),
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if self.default_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "default_timeout".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// HTTP transport issuing `GET {base_url}{route}`.
#[derive(Clone)]
pub struct RestTransport {
    client: reqwest::Client,
    base_url: String,
    auth_headers: HeaderMap,
}

impl RestTransport {
    pub fn new(config: &RestTransportConfig) -> SyncResult<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.default_timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "http_client".to_string(),
                value: config.base_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            auth_headers: build_auth_headers(config)?,
        })
    }

    pub fn url_for(&self, route: &RouteKey) -> String {
        format!("{}{}", self.base_url, route)
    }

    async fn fetch_once(
        &self,
        route: &RouteKey,
        options: &FetchOptions,
    ) -> Result<serde_json::Value, TransportError> {
        let mut request = self
            .client
            .get(self.url_for(route))
            .headers(self.auth_headers.clone())
            .timeout(options.timeout);
        if options.no_cache {
            request = request.header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(route, options, e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                route: route.clone(),
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| TransportError::Decode {
                route: route.clone(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Transport for RestTransport {
    async fn fetch(
        &self,
        route: &RouteKey,
        options: &FetchOptions,
    ) -> Result<serde_json::Value, TransportError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(route, options).await {
                Ok(payload) => {
                    debug!(route = %route, attempt, "Fetched payload");
                    return Ok(payload);
                }
                Err(e) if attempt < options.retries && is_retryable(&e) => {
                    attempt += 1;
                    warn!(route = %route, attempt, error = %e, "Retrying fetch");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for RestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Client errors will not change on retry.
fn is_retryable(error: &TransportError) -> bool {
    match error {
        TransportError::Network { .. } | TransportError::Timeout { .. } => true,
        TransportError::Status { status, .. } => *status >= 500,
        TransportError::Decode { .. } => false,
    }
}

fn map_reqwest_error(route: &RouteKey, options: &FetchOptions, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout {
            route: route.clone(),
            after_ms: options.timeout.as_millis() as u64,
        }
    } else {
        TransportError::Network {
            route: route.clone(),
            reason: e.to_string(),
        }
    }
}

fn build_auth_headers(config: &RestTransportConfig) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    if let Some(api_key) = &config.api_key {
        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_str(api_key).map_err(|e| ConfigError::InvalidValue {
                field: "api_key".to_string(),
                value: "<redacted>".to_string(),
                reason: e.to_string(),
            })?,
        );
    }
    if let Some(token) = &config.bearer_token {
        let value = format!("Bearer {}", token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&value).map_err(|e| ConfigError::InvalidValue {
                field: "bearer_token".to_string(),
                value: "<redacted>".to_string(),
                reason: e.to_string(),
            })?,
        );
    }
    Ok(headers)
}
