//! Print device dispatch.
//!
//! A claimed job is sent to the station's print recorder with a single HTTP
//! POST. The dispatcher never retries and never propagates errors: every
//! failure mode collapses into [`DispatchOutcome::Failed`] with a reason that
//! ends up in the job's `error_message`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::normalize_base_url;
use crate::error::{RelayError, Result};
use crate::jobs::{PrintJob, PrintType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Printed,
    Failed(String),
}

impl DispatchOutcome {
    pub fn is_printed(&self) -> bool {
        matches!(self, DispatchOutcome::Printed)
    }
}

/// The external device that physically executes a job.
#[async_trait]
pub trait PrintDevice: Send + Sync {
    async fn print(&self, job: &PrintJob) -> DispatchOutcome;
}

// ---------------------------------------------------------------------------
// Wire payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceLine {
    pub name: String,
    pub qty: f64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub note: String,
}

/// Body POSTed to the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRequest {
    pub job: String,
    pub print_type: PrintType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub printer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Table label printed in the ticket header.
    pub table: String,
    pub order: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_time: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub note: String,
    pub total: f64,
    pub lines: Vec<DeviceLine>,
}

impl DeviceRequest {
    pub fn from_job(job: &PrintJob) -> Self {
        let payload = &job.print_payload;
        // Kitchen tickets carry their own note; fall back to the order note.
        let note = match (job.print_type, payload.kitchen_note.as_deref()) {
            (PrintType::Kitchen, Some(kitchen)) if !kitchen.trim().is_empty() => {
                kitchen.trim().to_string()
            }
            _ => payload.note.trim().to_string(),
        };
        Self {
            job: job.name.clone(),
            print_type: job.print_type,
            printer: job.printer_name.clone(),
            trace_id: job.trace_id.clone(),
            table: payload.table_name.clone(),
            order: payload.order_name.clone(),
            order_time: payload.order_time.clone(),
            note,
            total: payload.total_amount,
            lines: payload
                .lines
                .iter()
                .map(|line| DeviceLine {
                    name: line.product_name.clone(),
                    qty: line.qty,
                    note: line.note.trim().to_string(),
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP device
// ---------------------------------------------------------------------------

/// Print recorder reachable over HTTP, optionally behind a bearer token.
pub struct HttpPrintDevice {
    http: Client,
    url: String,
    token: Option<String>,
}

impl HttpPrintDevice {
    pub fn new(url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let url = normalize_base_url(url);
        if url.is_empty() {
            return Err(RelayError::Config("print device URL is empty".into()));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            url,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Classify a 2xx body: only an explicit `success: false` or an unreadable
/// body counts as failure.
fn classify_body(body: &[u8]) -> DispatchOutcome {
    let parsed: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return DispatchOutcome::Failed(format!("Malformed device response: {e}")),
    };
    if parsed.get("success").and_then(Value::as_bool) == Some(false) {
        let reason = crate::value_str(&parsed, &["message", "error", "msg"])
            .unwrap_or_else(|| "Device reported failure".into());
        return DispatchOutcome::Failed(reason);
    }
    DispatchOutcome::Printed
}

#[async_trait]
impl PrintDevice for HttpPrintDevice {
    async fn print(&self, job: &PrintJob) -> DispatchOutcome {
        let body = DeviceRequest::from_job(job);
        debug!(job_id = job.id, url = %self.url, lines = body.lines.len(), "dispatching to print device");

        let mut req = self.http.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                let err = crate::api::friendly_error(&self.url, &e);
                warn!(job_id = job.id, error = %err, "print device unreachable");
                return DispatchOutcome::Failed(err.to_string());
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Unknown");
            warn!(job_id = job.id, status = status.as_u16(), "print device rejected job");
            return DispatchOutcome::Failed(format!("HTTP {}: {reason}", status.as_u16()));
        }

        let outcome = match resp.bytes().await {
            Ok(bytes) => classify_body(&bytes),
            Err(e) => DispatchOutcome::Failed(format!("Failed to read device response: {e}")),
        };
        if let DispatchOutcome::Failed(reason) = &outcome {
            warn!(job_id = job.id, reason = %reason, "print device reported failure");
        }
        outcome
    }
}
