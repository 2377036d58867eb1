//! Print job queue boundary.
//!
//! Jobs live on the backend (`pos.print.job`). A poller only ever holds a
//! transient copy: it lists pending jobs, claims one atomically with its own
//! client id, and reports the outcome. Exclusivity comes entirely from the
//! backend's compare-and-set on claim; nothing here assumes ownership before
//! `claim` returns [`ClaimOutcome::Granted`].

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::{check_success, RpcClient};
use crate::error::{RelayError, Result};

pub type JobId = i64;

const PATH_PENDING: &str = "/pos/print_jobs/pending";
const PATH_CLAIM: &str = "/pos/print_jobs/claim";
const PATH_MARK_DONE: &str = "/pos/print_jobs/mark_done";
const PATH_MARK_FAILED: &str = "/pos/print_jobs/mark_failed";
const PATH_RETRY: &str = "/pos/print_jobs/retry";
const PATH_STATUS: &str = "/pos/print_jobs/status";

/// Error code the backend uses when another client won the claim.
pub const CLAIM_FAILED: &str = "CLAIM_FAILED";

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Backend job state. `Printing` is what the backend calls a claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Printing,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_claimed(self) -> bool {
        self == JobStatus::Printing
    }

    /// Only failed or cancelled jobs may be put back to pending.
    pub fn is_retryable(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintType {
    #[default]
    Order,
    Kitchen,
    Receipt,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PrintLine {
    #[serde(default, deserialize_with = "falsy_string")]
    pub product_name: String,
    #[serde(default)]
    pub qty: f64,
    #[serde(default)]
    pub price_unit: f64,
    #[serde(default)]
    pub subtotal: f64,
    #[serde(default, deserialize_with = "falsy_string")]
    pub note: String,
}

/// Ticket content as stored on the job (`print_payload`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PrintPayload {
    #[serde(default, deserialize_with = "falsy_option")]
    pub order_id: Option<i64>,
    #[serde(default, deserialize_with = "falsy_string")]
    pub order_name: String,
    #[serde(default, deserialize_with = "falsy_string")]
    pub table_name: String,
    #[serde(default, deserialize_with = "falsy_option")]
    pub order_time: Option<String>,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default, deserialize_with = "falsy_string")]
    pub note: String,
    #[serde(
        default,
        deserialize_with = "falsy_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub kitchen_note: Option<String>,
    #[serde(default)]
    pub lines: Vec<PrintLine>,
}

/// Entry of the pending listing. The consumer never prints from a summary;
/// the authoritative payload comes back from `claim`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    #[serde(default, deserialize_with = "falsy_string")]
    pub name: String,
    #[serde(default)]
    pub print_type: PrintType,
    #[serde(default, deserialize_with = "falsy_option")]
    pub trace_id: Option<String>,
    #[serde(default, deserialize_with = "falsy_option")]
    pub create_date: Option<String>,
}

/// A job this poller holds a claim on.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PrintJob {
    pub id: JobId,
    #[serde(default, deserialize_with = "falsy_string")]
    pub name: String,
    #[serde(default)]
    pub print_type: PrintType,
    #[serde(default)]
    pub print_payload: PrintPayload,
    #[serde(default, deserialize_with = "falsy_option")]
    pub printer_name: Option<String>,
    #[serde(default, deserialize_with = "falsy_option")]
    pub trace_id: Option<String>,
}

/// Row of the inspection view (`status` operation), any state.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobStatusEntry {
    pub id: JobId,
    #[serde(default, deserialize_with = "falsy_string")]
    pub name: String,
    pub state: JobStatus,
    #[serde(default)]
    pub print_type: PrintType,
    #[serde(default, deserialize_with = "falsy_option")]
    pub printer_name: Option<String>,
    #[serde(default, deserialize_with = "falsy_option")]
    pub claimed_by: Option<String>,
    #[serde(default, deserialize_with = "falsy_option")]
    pub claimed_at: Option<String>,
    #[serde(default, deserialize_with = "falsy_option")]
    pub printed_at: Option<String>,
    #[serde(default, deserialize_with = "falsy_option")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, deserialize_with = "falsy_option")]
    pub trace_id: Option<String>,
    #[serde(default, deserialize_with = "falsy_option")]
    pub qr_order_id: Option<i64>,
    #[serde(default, deserialize_with = "falsy_option")]
    pub pos_order_id: Option<i64>,
    #[serde(default, deserialize_with = "falsy_option")]
    pub create_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Granted(PrintJob),
    /// The claim went through but the job in the answer could not be read.
    /// The job is held by this poller and still has to be reported.
    GrantedUnreadable { reason: String },
    /// Someone else holds the job, or it left the pending state.
    Denied { code: String, reason: String },
}

/// The backend serialises empty relational/char fields as `false`.
fn falsy_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null | Value::Bool(false) => Ok(None),
        other => serde_json::from_value(other)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn falsy_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(falsy_option::<D, String>(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Boundary
// ---------------------------------------------------------------------------

/// Request/response operations against the backend job queue.
///
/// Every call may fail in transit; callers treat that like a business
/// failure and never assume an unanswered request took effect.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Pending jobs for a station, oldest first, at most `limit`.
    async fn list_pending(&self, station_id: i64, limit: usize) -> Result<Vec<JobSummary>>;

    async fn claim(&self, job_id: JobId, client_id: &str) -> Result<ClaimOutcome>;

    async fn mark_done(&self, job_id: JobId) -> Result<()>;

    async fn mark_failed(&self, job_id: JobId, message: &str) -> Result<()>;

    async fn retry(&self, job_id: JobId) -> Result<()>;

    /// Most recent jobs in any state, newest first.
    async fn status(&self, station_id: i64, limit: usize) -> Result<Vec<JobStatusEntry>>;
}

/// [`JobQueue`] over the backend's JSON-RPC routes.
pub struct HttpJobQueue {
    rpc: Arc<RpcClient>,
}

impl HttpJobQueue {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }

    async fn call_checked(&self, path: &str, params: Value) -> Result<Value> {
        let result = self.rpc.call_value(path, params).await?;
        check_success(&result)?;
        Ok(result)
    }
}

fn decode_jobs<T: serde::de::DeserializeOwned>(result: &Value, path: &str) -> Result<Vec<T>> {
    let jobs = result.get("jobs").cloned().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(jobs).map_err(|e| RelayError::Decode(format!("{path}: {e}")))
}

#[async_trait]
impl JobQueue for HttpJobQueue {
    async fn list_pending(&self, station_id: i64, limit: usize) -> Result<Vec<JobSummary>> {
        let result = self
            .call_checked(
                PATH_PENDING,
                serde_json::json!({ "config_id": station_id, "limit": limit }),
            )
            .await?;
        let mut jobs: Vec<JobSummary> = decode_jobs(&result, PATH_PENDING)?;
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn claim(&self, job_id: JobId, client_id: &str) -> Result<ClaimOutcome> {
        let result = self
            .rpc
            .call_value(
                PATH_CLAIM,
                serde_json::json!({ "job_id": job_id, "client_id": client_id }),
            )
            .await?;

        if result.get("success").and_then(Value::as_bool) != Some(true) {
            let code = crate::value_str(&result, &["error"]).unwrap_or_else(|| CLAIM_FAILED.into());
            let reason = crate::value_str(&result, &["message"])
                .unwrap_or_else(|| "Job already claimed or status changed".into());
            debug!(job_id, code = %code, reason = %reason, "claim denied");
            return Ok(ClaimOutcome::Denied { code, reason });
        }

        let Some(job) = result.get("job").filter(|j| !j.is_null()).cloned() else {
            warn!(job_id, "claim granted without job");
            return Ok(ClaimOutcome::GrantedUnreadable {
                reason: "Claimed job missing from response".into(),
            });
        };
        match serde_json::from_value::<PrintJob>(job) {
            Ok(job) => Ok(ClaimOutcome::Granted(job)),
            Err(e) => {
                warn!(job_id, error = %e, "claimed job payload unreadable");
                Ok(ClaimOutcome::GrantedUnreadable {
                    reason: format!("Unreadable job payload: {e}"),
                })
            }
        }
    }

    async fn mark_done(&self, job_id: JobId) -> Result<()> {
        self.call_checked(PATH_MARK_DONE, serde_json::json!({ "job_id": job_id }))
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, job_id: JobId, message: &str) -> Result<()> {
        self.call_checked(
            PATH_MARK_FAILED,
            serde_json::json!({ "job_id": job_id, "error_message": message }),
        )
        .await?;
        Ok(())
    }

    async fn retry(&self, job_id: JobId) -> Result<()> {
        self.call_checked(PATH_RETRY, serde_json::json!({ "job_id": job_id }))
            .await?;
        info!(job_id, "print job requeued");
        Ok(())
    }

    async fn status(&self, station_id: i64, limit: usize) -> Result<Vec<JobStatusEntry>> {
        let result = self
            .call_checked(
                PATH_STATUS,
                serde_json::json!({ "config_id": station_id, "limit": limit }),
            )
            .await?;
        let mut jobs: Vec<JobStatusEntry> = decode_jobs(&result, PATH_STATUS)?;
        jobs.truncate(limit);
        Ok(jobs)
    }
}
