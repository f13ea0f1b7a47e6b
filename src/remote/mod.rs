//! Remote resource client contract and implementations.

use std::{fmt, future::Future, sync::Arc};

use serde_json::Value;

/// reqwest-backed client for the admin REST API.
pub mod http;
/// Deterministic in-process admin API with fault injection.
pub mod memory;

/// Classified failure of a remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Transport failure, timeout, or gateway error. Safe to retry.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    /// Business rule rejection; the message is shown verbatim.
    #[error("{0}")]
    ServerRejected(String),
    /// The session is missing or expired.
    #[error("unauthorized")]
    Unauthorized,
}

/// HTTP verb of a [`RemoteRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET.
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// PATCH.
    Patch,
    /// DELETE.
    Delete,
}

impl Method {
    /// Upper-case verb name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call to the backend: verb, endpoint path, optional JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    /// HTTP verb.
    pub method: Method,
    /// Path relative to the API base, e.g. `users/7`.
    pub endpoint: String,
    /// JSON body.
    pub payload: Option<Value>,
}

impl RemoteRequest {
    /// Creates a request without a body.
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            payload: None,
        }
    }

    /// GET `endpoint`.
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Get, endpoint)
    }

    /// DELETE `endpoint`.
    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Delete, endpoint)
    }

    /// Attaches a JSON body.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Asynchronous transport to the backend.
///
/// Each call is issued exactly once; implementations must not retry
/// non-idempotent requests on their own and must turn their own deadline
/// into [`RemoteError::NetworkUnavailable`].
pub trait RemoteClient: Send + Sync + 'static {
    /// Sends `request` and returns the parsed response body.
    fn call(&self, request: RemoteRequest) -> impl Future<Output = Result<Value, RemoteError>> + Send;

    /// Installs or clears the session credential used by later calls.
    fn authorize(&self, _token: Option<&str>) {}
}

impl<C: RemoteClient> RemoteClient for Arc<C> {
    fn call(&self, request: RemoteRequest) -> impl Future<Output = Result<Value, RemoteError>> + Send {
        (**self).call(request)
    }

    fn authorize(&self, token: Option<&str>) {
        (**self).authorize(token)
    }
}
