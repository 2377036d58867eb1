//! Backend RPC client.
//!
//! The ordering backend exposes JSON-RPC 2.0 routes (`type='json'`): every
//! call is a POST whose body wraps the parameters in a
//! `{"jsonrpc", "method": "call", "params", "id"}` envelope and whose answer
//! carries either `result` or `error`. Business failures are reported inside
//! `result` as `{ "success": false, "error": CODE, "message": ... }`.

use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{RelayError, Result};

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise a backend or device base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a relay error with a readable message.
pub(crate) fn friendly_error(url: &str, err: &reqwest::Error) -> RelayError {
    if err.is_timeout() {
        return RelayError::Timeout(format!("Connection to {url} timed out"));
    }
    if err.is_connect() {
        return RelayError::Network(format!("Cannot reach {url}"));
    }
    if err.is_builder() {
        return RelayError::Config(format!("Invalid URL: {url}"));
    }
    if err.is_decode() {
        return RelayError::Decode(format!("Unreadable response from {url}: {err}"));
    }
    RelayError::Network(format!("Network error communicating with {url}: {err}"))
}

/// Convert a non-success HTTP status into a relay error.
pub(crate) fn status_error(status: StatusCode) -> RelayError {
    let message = match status.as_u16() {
        401 => "Session expired or not authenticated".to_string(),
        403 => "Not authorized".to_string(),
        404 => "Endpoint not found".to_string(),
        s if s >= 500 => "Server error".to_string(),
        _ => "Unexpected response".to_string(),
    };
    RelayError::HttpStatus {
        status: status.as_u16(),
        message,
    }
}

/// Turn a `{ success: false, error, message, trace_id }` result into an error.
///
/// A missing `success` field counts as failure.
pub fn check_success(result: &Value) -> Result<()> {
    if result.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(());
    }
    let code = crate::value_str(result, &["error"]).unwrap_or_else(|| "UNKNOWN_ERROR".into());
    let message =
        crate::value_str(result, &["message"]).unwrap_or_else(|| "Request failed".into());
    Err(RelayError::Rpc {
        code,
        message,
        trace_id: crate::value_str(result, &["trace_id", "traceId"]),
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// JSON-RPC client bound to one backend base URL.
pub struct RpcClient {
    http: Client,
    base_url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url);
        if base_url.is_empty() {
            return Err(RelayError::Config("backend URL is empty".into()));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `params` to `path` and return the unwrapped `result` value.
    ///
    /// `path` should include the leading slash, e.g. `/pos/print_jobs/claim`.
    pub async fn call_value(&self, path: &str, params: Value) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": params,
            "id": id,
        });

        debug!(path = %path, id, "rpc call");

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| friendly_error(&url, &e))?;

        let status = resp.status();
        if !status.is_success() {
            warn!(path = %path, status = status.as_u16(), "rpc call rejected");
            return Err(status_error(status));
        }

        let envelope: Value = resp.json().await.map_err(|e| friendly_error(&url, &e))?;

        if let Some(err) = envelope.get("error").filter(|e| !e.is_null()) {
            let message = err
                .pointer("/data/message")
                .and_then(Value::as_str)
                .or_else(|| err.get("message").and_then(Value::as_str))
                .unwrap_or("API Error")
                .to_string();
            let code = err
                .get("code")
                .map(|c| match c {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "RPC_ERROR".into());
            return Err(RelayError::Rpc {
                code,
                message,
                trace_id: None,
            });
        }

        envelope
            .get("result")
            .cloned()
            .ok_or_else(|| RelayError::Decode(format!("{path}: response has no result")))
    }
}
