//! Diagnostics for the relay.
//!
//! Provides:
//! - **About info**: version, git SHA, platform
//! - **Status report**: redacted configuration plus consumer statistics
//! - **Log rotation helpers**: used by `lib.rs` to configure rolling log files.

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::RelayConfig;
use crate::consumer::ConsumerStats;

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// Prefix of the rolling log files.
pub const LOG_FILE_PREFIX: &str = "relay";

pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
    })
}

/// Everything worth attaching to a support request. Secrets are redacted.
pub fn status_report(config: &RelayConfig, stats: &ConsumerStats) -> Value {
    let config = serde_json::to_value(config).unwrap_or(Value::Null);
    json!({
        "about": get_about_info(),
        "config": redact_sensitive_fields(config),
        "consumer": serde_json::to_value(stats).unwrap_or(Value::Null),
    })
}

fn redact_sensitive_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if should_redact_key(&key) && !value.is_null() {
                        (key, Value::String("[REDACTED]".to_string()))
                    } else {
                        (key, redact_sensitive_fields(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(redact_sensitive_fields).collect())
        }
        other => other,
    }
}

fn should_redact_key(key: &str) -> bool {
    let normalized = key.to_ascii_lowercase();
    ["token", "secret", "password", "authorization", "pairing"]
        .iter()
        .any(|marker| normalized.contains(marker))
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

/// Default log directory.
pub fn get_log_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("small-qr-relay").join("logs")
}

/// Delete all but the newest `MAX_LOG_FILES` relay logs in `log_dir`.
pub fn prune_old_logs(log_dir: &Path) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };

    let prefix = format!("{LOG_FILE_PREFIX}.");
    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter(|entry| entry.path().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix))
        })
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            (entry.path(), modified)
        })
        .collect();

    // Newest first; ties broken by name so the daily suffix decides.
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}
