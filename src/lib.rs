//! The Small QR - table ordering session controller and print job relay.
//!
//! Two halves share one transport and one error type:
//!
//! - the **print relay** (`consumer`, `jobs`, `device`) polls the backend for
//!   pending print jobs, claims them atomically and forwards each claimed job
//!   to the local print device;
//! - the **ordering session** (`session`, `cart`, `footer`, `overlay`,
//!   `scroll_lock`, `notify`, `ordering`) drives a table's cart, order
//!   history, footer state and overlays.
//!
//! The binary runs the print relay until Ctrl-C.

use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod cart;
pub mod config;
pub mod consumer;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod footer;
pub mod jobs;
pub mod notify;
pub mod ordering;
pub mod overlay;
pub mod scroll_lock;
pub mod session;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use config::RelayConfig;
pub use error::{RelayError, Result};

// ---------------------------------------------------------------------------
// Lenient JSON field access
// ---------------------------------------------------------------------------

/// First non-empty string among `keys`, trimmed.
pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn value_f64(v: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        match v.get(*key) {
            Some(serde_json::Value::Number(n)) => return n.as_f64(),
            // Odoo serialises some monetary fields as strings.
            Some(serde_json::Value::String(s)) => {
                if let Ok(n) = s.trim().parse::<f64>() {
                    return Some(n);
                }
            }
            _ => {}
        }
    }
    None
}

pub(crate) fn value_i64(v: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_i64()) {
            return Some(n);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install the console + daily rolling file subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process. Calling this twice keeps the first
/// subscriber.
pub fn init_logging(log_dir: &Path) -> WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,small_qr_relay=debug"));

    // Prune old log files before setting up the appender
    diagnostics::prune_old_logs(log_dir);
    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    guard
}

// ---------------------------------------------------------------------------
// Print relay entry point
// ---------------------------------------------------------------------------

/// Run the print relay until Ctrl-C.
pub async fn run(config: RelayConfig) -> Result<()> {
    config.validate()?;

    let rpc = Arc::new(api::RpcClient::new(
        &config.backend_url,
        config.request_timeout(),
    )?);
    let queue = Arc::new(jobs::HttpJobQueue::new(rpc));
    let device = Arc::new(device::HttpPrintDevice::new(
        &config.device_url,
        config.device_token.clone(),
        config.request_timeout(),
    )?);

    let client_id = config
        .client_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(consumer::generate_client_id);
    let consumer = Arc::new(consumer::PrintConsumer::new(
        queue,
        device,
        consumer::ConsumerSettings::from_config(&config),
        client_id,
    ));

    info!(
        "Starting The Small QR relay v{} (client {})",
        env!("CARGO_PKG_VERSION"),
        consumer.client_id()
    );
    info!(
        status = %diagnostics::status_report(&config, &consumer.stats()),
        "relay configuration"
    );

    consumer.start();
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C, stopping");
    }
    consumer.stop().await;

    let stats = consumer.stats();
    info!(
        cycles = stats.cycles,
        printed = stats.printed,
        failed = stats.failed,
        denied = stats.denied,
        "relay stopped"
    );
    Ok(())
}
