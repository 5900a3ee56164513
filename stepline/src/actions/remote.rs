//! Remote delegate actions.
//!
//! A [`RemoteAction`] encodes the current value into a request payload,
//! hands it to a [`RemoteInvoker`], and decodes the response body back into
//! the next value. [`RetryingInvoker`] makes up to `retries + 1` attempts
//! over a single-shot [`RemoteTransport`]; [`ReqwestTransport`] is the HTTP
//! transport used in production.

use super::retry::{with_retry_if, RetryConfig};
use crate::errors::ActionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a remote call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request did not finish within the configured timeout.
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The response body.
        body: String,
    },

    /// The request could not be built. Never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RemoteError {
    /// Returns true if another attempt could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_))
    }
}

impl From<RemoteError> for ActionError {
    fn from(err: RemoteError) -> Self {
        Self::new(err.to_string())
    }
}

fn default_method() -> String {
    "POST".to_string()
}

const fn default_timeout_ms() -> u64 {
    1000
}

/// Where and how to call a remote step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSpec {
    /// Absolute endpoint URL.
    pub endpoint: String,
    /// HTTP method, `POST` or `GET`.
    #[serde(default = "default_method")]
    pub method: String,
    /// Per-attempt timeout.
    #[serde(default = "default_timeout_ms", rename = "timeoutMillis")]
    pub timeout_ms: u64,
    /// Extra attempts after the first one fails.
    #[serde(default)]
    pub retries: u32,
    /// Pause before retry `n` is `backoff_ms * n`.
    #[serde(default, rename = "backoffMillis")]
    pub backoff_ms: u64,
    /// Headers sent with every attempt.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl RemoteSpec {
    /// Creates a POST spec with default timeout and no retries.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: default_method(),
            timeout_ms: default_timeout_ms(),
            retries: 0,
            backoff_ms: 0,
            headers: BTreeMap::new(),
        }
    }

    /// Sets the HTTP method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets the number of retries.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the linear backoff between attempts.
    #[must_use]
    pub fn with_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.backoff_ms = backoff_ms;
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Returns true if the method is GET.
    #[must_use]
    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }

    /// The per-attempt timeout as a duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Builds the request for one attempt.
    ///
    /// GET requests carry the payload as a query string; every other method
    /// sends it as the body.
    pub fn request(&self, payload: String) -> Result<RemoteRequest, RemoteError> {
        if self.endpoint.trim().is_empty() {
            return Err(RemoteError::InvalidRequest("endpoint is required".to_string()));
        }
        let (url, body) = if self.is_get() {
            (with_query(&self.endpoint, &payload), None)
        } else {
            (self.endpoint.clone(), Some(payload))
        };
        Ok(RemoteRequest {
            method: self.method.to_ascii_uppercase(),
            url,
            headers: self.headers.clone(),
            body,
            timeout: self.timeout(),
        })
    }
}

fn with_query(endpoint: &str, query: &str) -> String {
    if query.trim().is_empty() {
        endpoint.to_string()
    } else if endpoint.contains('?') {
        format!("{endpoint}&{query}")
    } else {
        format!("{endpoint}?{query}")
    }
}

/// Pipeline-wide defaults applied to remote steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteDefaults {
    /// Base URL that relative paths are joined to.
    pub base_url: Option<String>,
    /// Per-attempt timeout.
    #[serde(rename = "timeoutMillis")]
    pub timeout_ms: u64,
    /// Extra attempts after the first one fails.
    pub retries: u32,
    /// Default HTTP method.
    pub method: String,
    /// Headers merged under each step's own headers.
    pub headers: BTreeMap<String, String>,
}

impl Default for RemoteDefaults {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: default_timeout_ms(),
            retries: 0,
            method: default_method(),
            headers: BTreeMap::new(),
        }
    }
}

impl RemoteDefaults {
    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Adds a default header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Resolves an endpoint or a path relative to the base URL.
    ///
    /// Absolute `http(s)://` URLs pass through. Otherwise the path is joined
    /// to the base URL with exactly one `/` between them.
    #[must_use]
    pub fn resolve_endpoint(&self, endpoint_or_path: &str) -> String {
        let path = endpoint_or_path.trim();
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = match self.base_url.as_deref().map(str::trim) {
            Some(base) if !base.is_empty() => base,
            _ => return path.to_string(),
        };
        match (base.ends_with('/'), path.starts_with('/')) {
            (true, true) => format!("{base}{}", &path[1..]),
            (false, false) => format!("{base}/{path}"),
            _ => format!("{base}{path}"),
        }
    }

    /// Merges `overrides` over the default headers.
    #[must_use]
    pub fn merge_headers(&self, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut merged = self.headers.clone();
        merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Builds a spec for `endpoint_or_path` from these defaults.
    #[must_use]
    pub fn to_spec(&self, endpoint_or_path: &str) -> RemoteSpec {
        RemoteSpec {
            endpoint: self.resolve_endpoint(endpoint_or_path),
            method: self.method.clone(),
            timeout_ms: self.timeout_ms,
            retries: self.retries,
            backoff_ms: 0,
            headers: self.headers.clone(),
        }
    }
}

/// A single outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    /// Upper-case HTTP method.
    pub method: String,
    /// Fully resolved URL, including any query string.
    pub url: String,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// JSON body, absent for GET.
    pub body: Option<String>,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

/// Sends one request and returns the response body.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Performs exactly one attempt.
    async fn send(&self, request: &RemoteRequest) -> Result<String, RemoteError>;
}

/// Performs a remote call described by a spec, including retries.
#[async_trait]
pub trait RemoteInvoker: Send + Sync {
    /// Calls the endpoint with the encoded payload and returns the response
    /// body, or the last failure once every attempt is spent.
    async fn invoke(&self, spec: &RemoteSpec, payload: String) -> Result<String, RemoteError>;
}

/// Retries a [`RemoteTransport`] according to the spec.
#[derive(Clone)]
pub struct RetryingInvoker {
    transport: Arc<dyn RemoteTransport>,
}

impl fmt::Debug for RetryingInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingInvoker").finish_non_exhaustive()
    }
}

impl RetryingInvoker {
    /// Wraps a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn RemoteTransport>) -> Self {
        Self { transport }
    }

    /// An invoker backed by a fresh [`ReqwestTransport`].
    #[cfg(feature = "remote")]
    #[must_use]
    pub fn http() -> Self {
        Self::new(Arc::new(ReqwestTransport::new()))
    }
}

#[async_trait]
impl RemoteInvoker for RetryingInvoker {
    async fn invoke(&self, spec: &RemoteSpec, payload: String) -> Result<String, RemoteError> {
        let request = spec.request(payload)?;
        let config = RetryConfig::for_remote(spec.retries, spec.backoff_ms);
        let transport = &self.transport;
        let request = &request;

        with_retry_if(&config, &request.url, RemoteError::is_retryable, || async move {
            match tokio::time::timeout(request.timeout, transport.send(request)).await {
                Ok(result) => result,
                Err(_) => Err(RemoteError::Timeout(
                    u64::try_from(request.timeout.as_millis()).unwrap_or(u64::MAX),
                )),
            }
        })
        .await
    }
}

/// HTTP transport built on `reqwest`.
#[cfg(feature = "remote")]
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

#[cfg(feature = "remote")]
impl ReqwestTransport {
    /// Creates a transport with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport sharing an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "remote")]
#[async_trait]
impl RemoteTransport for ReqwestTransport {
    async fn send(&self, request: &RemoteRequest) -> Result<String, RemoteError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| RemoteError::InvalidRequest(e.to_string()))?;
        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

type Encoder<T> = dyn Fn(&T) -> Result<String, ActionError> + Send + Sync;
type Decoder<T> = dyn Fn(T, String) -> Result<T, ActionError> + Send + Sync;

/// A step whose work happens on a remote endpoint.
pub struct RemoteAction<T> {
    spec: RemoteSpec,
    invoker: Arc<dyn RemoteInvoker>,
    encode: Arc<Encoder<T>>,
    decode: Arc<Decoder<T>>,
}

impl<T> fmt::Debug for RemoteAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteAction")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> RemoteAction<T> {
    /// Creates a remote action.
    ///
    /// `encode` turns the current value into the request payload; `decode`
    /// receives the current value and the response body and returns the next
    /// value.
    pub fn new<E, D>(spec: RemoteSpec, invoker: Arc<dyn RemoteInvoker>, encode: E, decode: D) -> Self
    where
        E: Fn(&T) -> Result<String, ActionError> + Send + Sync + 'static,
        D: Fn(T, String) -> Result<T, ActionError> + Send + Sync + 'static,
    {
        Self {
            spec,
            invoker,
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    /// Returns the spec.
    #[must_use]
    pub fn spec(&self) -> &RemoteSpec {
        &self.spec
    }

    pub(crate) async fn call(&self, value: T) -> Result<T, ActionError> {
        let payload = (self.encode)(&value)?;
        let body = self.invoker.invoke(&self.spec, payload).await?;
        (self.decode)(value, body)
    }
}

impl RemoteAction<String> {
    /// A text step: posts the value as a JSON string and adopts the raw
    /// response body.
    #[must_use]
    pub fn text(spec: RemoteSpec, invoker: Arc<dyn RemoteInvoker>) -> Self {
        Self::new(
            spec,
            invoker,
            |value: &String| {
                serde_json::to_string(value).map_err(|e| ActionError::new(e.to_string()))
            },
            |_, body| Ok(body),
        )
    }
}
