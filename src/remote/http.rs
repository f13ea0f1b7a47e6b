use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use reqwest::StatusCode;
use serde_json::Value;

use super::{Method, RemoteClient, RemoteError, RemoteRequest};

/// JSON-over-HTTP client for the admin API.
///
/// Holds the session bearer token; clones share it.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    token: Arc<RwLock<Option<String>>>,
}

impl HttpClient {
    /// Creates a client rooted at `base_url` with a per-request `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
            token: Arc::new(RwLock::new(None)),
        }
    }

    /// Installs the bearer token sent with every request.
    pub fn set_token(&self, token: impl Into<String>) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(token.into());
    }

    /// Stops sending a bearer token.
    pub fn clear_token(&self) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    fn current_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl RemoteClient for HttpClient {
    async fn call(&self, request: RemoteRequest) -> Result<Value, RemoteError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, self.url(&request.endpoint))
            .timeout(self.timeout);
        if let Some(token) = self.current_token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        tracing::debug!(method = %request.method, endpoint = %request.endpoint, "remote call");
        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                RemoteError::NetworkUnavailable(format!("timed out after {}ms", self.timeout.as_millis()))
            } else {
                RemoteError::NetworkUnavailable(error.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|error| RemoteError::NetworkUnavailable(error.to_string()))?;

        if !status.is_success() {
            let parsed = serde_json::from_slice::<Value>(&body).ok();
            return Err(classify_status(status, parsed.as_ref()));
        }
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body)
            .map_err(|error| RemoteError::ServerRejected(format!("invalid response body: {error}")))
    }

    fn authorize(&self, token: Option<&str>) {
        match token {
            Some(token) => self.set_token(token),
            None => self.clear_token(),
        }
    }
}

/// Maps a non-success status and its optional JSON body to a [`RemoteError`].
pub fn classify_status(status: StatusCode, body: Option<&Value>) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            RemoteError::NetworkUnavailable(format!("HTTP {status}"))
        }
        _ => {
            let message = body
                .and_then(|b| b.get("message").or_else(|| b.get("error")))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
                });
            RemoteError::ServerRejected(message)
        }
    }
}
