//! Print job consumer loop.
//!
//! One consumer per relay process. On every tick it lists the station's
//! pending jobs and works through them one at a time: claim, dispatch to the
//! device, report. Pollers in other processes see the same listing; the
//! backend's atomic claim decides who prints, so a denied claim is simply
//! skipped. Failures are contained per job: whatever happens after a
//! successful claim, the job is reported (done or failed) before the cycle
//! moves on.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::device::{DispatchOutcome, PrintDevice};
use crate::error::Result;
use crate::jobs::{ClaimOutcome, JobId, JobQueue, JobStatusEntry, JobSummary, PrintJob, CLAIM_FAILED};

// ---------------------------------------------------------------------------
// Settings / reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub station_id: i64,
    pub batch_limit: usize,
    pub status_limit: usize,
    pub poll_interval: Duration,
}

impl ConsumerSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            station_id: config.station_id,
            batch_limit: config.batch_limit,
            status_limit: config.status_limit,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

/// What happened to one listed job, from this poller's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Printed and acknowledged with `mark_done`.
    Printed,
    /// Reported with `mark_failed`.
    Failed { reason: String },
    /// Another poller holds the job (or it is no longer pending).
    Denied { code: String, reason: String },
    /// The claim request itself did not complete; nothing was dispatched.
    ClaimError(String),
    /// Claimed, but neither outcome could be reported. The backend's claim
    /// expiry is the only way back to pending.
    Unreported { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub listed: usize,
    pub outcomes: Vec<(JobId, JobOutcome)>,
    /// Listing failed; no job was touched.
    pub error: Option<String>,
    /// Another cycle was still running, so this one did nothing.
    pub coalesced: bool,
    /// Stop was requested before every listed job was visited.
    pub interrupted: bool,
}

impl CycleReport {
    fn coalesced() -> Self {
        Self {
            coalesced: true,
            ..Self::default()
        }
    }

    fn count(&self, pred: impl Fn(&JobOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    pub fn printed(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Printed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Failed { .. } | JobOutcome::Unreported { .. }))
    }

    pub fn denied(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Denied { .. }))
    }
}

/// Snapshot for the status panel.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStats {
    pub polling: bool,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub cycles: u64,
    pub printed: u64,
    pub failed: u64,
    pub denied: u64,
}

/// Poller identity sent with every claim: host name plus a random suffix so
/// two relays on one host never share an id.
pub fn generate_client_id() -> String {
    let host = std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "relay".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{host}-{}", &suffix[..12])
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Resets the single-cycle flag however the cycle ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct PrintConsumer<Q, D> {
    queue: Arc<Q>,
    device: Arc<D>,
    settings: ConsumerSettings,
    client_id: String,
    cycle_active: AtomicBool,
    stats: Mutex<ConsumerStats>,
    worker: Mutex<Option<Worker>>,
}

impl<Q, D> PrintConsumer<Q, D>
where
    Q: JobQueue + 'static,
    D: PrintDevice + 'static,
{
    pub fn new(
        queue: Arc<Q>,
        device: Arc<D>,
        settings: ConsumerSettings,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            device,
            settings,
            client_id: client_id.into(),
            cycle_active: AtomicBool::new(false),
            stats: Mutex::new(ConsumerStats::default()),
            worker: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Start polling. Returns `false` (and does nothing) when already running.
    ///
    /// The first cycle runs immediately, then every `poll_interval`. Ticks
    /// missed while a cycle was busy are dropped, not queued.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!(client_id = %self.client_id, "print consumer already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run(token).await });
        *worker = Some(Worker { cancel, handle });

        self.stats.lock().unwrap_or_else(|e| e.into_inner()).polling = true;
        info!(
            client_id = %self.client_id,
            station_id = self.settings.station_id,
            interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Print consumer started"
        );
        true
    }

    /// Stop polling. Returns `false` when it was not running.
    ///
    /// A job already claimed finishes and is reported; no further job is
    /// claimed and no further tick fires once this returns.
    pub async fn stop(&self) -> bool {
        let worker = {
            let mut guard = self.worker.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        let Some(worker) = worker else {
            return false;
        };

        worker.cancel.cancel();
        if let Err(e) = worker.handle.await {
            error!(client_id = %self.client_id, error = %e, "print consumer task ended abnormally");
        }

        self.stats.lock().unwrap_or_else(|e| e.into_inner()).polling = false;
        info!(client_id = %self.client_id, "Print consumer stopped");
        true
    }

    async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.cycle(Some(&cancel)).await;
                }
            }
        }
    }

    /// Run one poll cycle now, outside the timer. Coalesced into a no-op when
    /// a cycle is already in progress.
    pub async fn poll_now(&self) -> CycleReport {
        self.cycle(None).await
    }

    async fn cycle(&self, cancel: Option<&CancellationToken>) -> CycleReport {
        if self
            .cycle_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(client_id = %self.client_id, "poll cycle still running, tick coalesced");
            return CycleReport::coalesced();
        }
        let _guard = CycleGuard(&self.cycle_active);

        let mut report = CycleReport::default();
        let jobs = match self
            .queue
            .list_pending(self.settings.station_id, self.settings.batch_limit)
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(station_id = self.settings.station_id, error = %e, "Failed to list pending print jobs");
                report.error = Some(e.to_string());
                self.record(&report);
                return report;
            }
        };

        report.listed = jobs.len();
        if !jobs.is_empty() {
            debug!(count = jobs.len(), "pending print jobs found");
        }

        for summary in jobs {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                report.interrupted = true;
                break;
            }
            let outcome = self.process_job(&summary).await;
            report.outcomes.push((summary.id, outcome));
        }

        if report.printed() + report.failed() > 0 {
            info!(
                printed = report.printed(),
                failed = report.failed(),
                denied = report.denied(),
                "Print consumer processed jobs"
            );
        }
        self.record(&report);
        report
    }

    fn record(&self, report: &CycleReport) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.cycles += 1;
        stats.last_poll_at = Some(Utc::now());
        stats.last_error = report.error.clone();
        stats.printed += report.printed() as u64;
        stats.failed += report.failed() as u64;
        stats.denied += report.denied() as u64;
    }

    async fn process_job(&self, summary: &JobSummary) -> JobOutcome {
        let job = match self.queue.claim(summary.id, &self.client_id).await {
            Ok(ClaimOutcome::Granted(job)) => job,
            Ok(ClaimOutcome::Denied { code, reason }) => {
                if code == CLAIM_FAILED {
                    debug!(job_id = summary.id, job = %summary.name, "claim lost to another poller");
                } else {
                    warn!(job_id = summary.id, code = %code, reason = %reason, "claim rejected");
                }
                return JobOutcome::Denied { code, reason };
            }
            Ok(ClaimOutcome::GrantedUnreadable { reason }) => {
                return self.report_failure(summary.id, &reason).await;
            }
            Err(e) => {
                warn!(job_id = summary.id, error = %e, "claim request failed");
                return JobOutcome::ClaimError(e.to_string());
            }
        };

        info!(job_id = job.id, job = %job.name, client_id = %self.client_id, "Print job claimed");

        match self.dispatch(job.clone()).await {
            DispatchOutcome::Printed => match self.queue.mark_done(job.id).await {
                Ok(()) => {
                    info!(job_id = job.id, job = %job.name, "Print job done");
                    JobOutcome::Printed
                }
                Err(e) => {
                    warn!(job_id = job.id, error = %e, "Failed to mark print job done");
                    self.report_failure(job.id, &format!("mark done failed: {e}"))
                        .await
                }
            },
            DispatchOutcome::Failed(reason) => self.report_failure(job.id, &reason).await,
        }
    }

    /// Run the device call in its own task so a panicking driver fails the
    /// job instead of the cycle.
    async fn dispatch(&self, job: PrintJob) -> DispatchOutcome {
        let device = Arc::clone(&self.device);
        let job_id = job.id;
        match tokio::spawn(async move { device.print(&job).await }).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                error!(job_id, "print dispatch panicked");
                DispatchOutcome::Failed("print dispatch panicked".into())
            }
            Err(e) => DispatchOutcome::Failed(format!("print dispatch aborted: {e}")),
        }
    }

    async fn report_failure(&self, job_id: JobId, reason: &str) -> JobOutcome {
        let reason = if reason.trim().is_empty() {
            "Print failed".to_string()
        } else {
            reason.to_string()
        };
        match self.queue.mark_failed(job_id, &reason).await {
            Ok(()) => {
                warn!(job_id, reason = %reason, "Print job marked failed");
                JobOutcome::Failed { reason }
            }
            Err(e) => {
                error!(job_id, reason = %reason, error = %e, "Failed to mark print job failed");
                JobOutcome::Unreported { reason }
            }
        }
    }

    /// Put a failed or cancelled job back to pending.
    pub async fn retry_job(&self, job_id: JobId) -> Result<()> {
        self.queue.retry(job_id).await.inspect_err(|e| {
            warn!(job_id, error = %e, "Failed to retry print job");
        })
    }

    /// Recent jobs of this station in any state, for the inspection view.
    pub async fn refresh_status(&self) -> Result<Vec<JobStatusEntry>> {
        self.queue
            .status(self.settings.station_id, self.settings.status_limit)
            .await
    }
}
