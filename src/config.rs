//! Relay configuration.
//!
//! Sources, later wins:
//! 1. built-in defaults
//! 2. a JSON file named by `SMALL_QR_CONFIG`
//! 3. `SMALL_QR_*` environment variables
//! 4. a pairing code in `SMALL_QR_PAIRING` (base64 or raw JSON carrying
//!    `url`, `station` and `token`)
//!
//! Secrets that are still missing afterwards are looked up in the OS
//! credential store.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::api::normalize_base_url;
use crate::error::{RelayError, Result};
use crate::storage::{self, CredentialStore, Keyring};

pub const DEFAULT_DEVICE_URL: &str = "http://127.0.0.1:8868/print";

const ENV_CONFIG_FILE: &str = "SMALL_QR_CONFIG";
const ENV_PAIRING: &str = "SMALL_QR_PAIRING";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    #[serde(alias = "backend_url")]
    pub backend_url: String,
    /// POS config the relay prints for.
    #[serde(alias = "station_id", alias = "config_id")]
    pub station_id: i64,
    /// Poller identity; generated per process when absent.
    #[serde(alias = "client_id")]
    pub client_id: Option<String>,
    #[serde(alias = "device_url")]
    pub device_url: String,
    #[serde(alias = "device_token")]
    pub device_token: Option<String>,
    #[serde(alias = "poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(alias = "batch_limit")]
    pub batch_limit: usize,
    #[serde(alias = "status_limit")]
    pub status_limit: usize,
    #[serde(alias = "request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(alias = "load_timeout_ms")]
    pub load_timeout_ms: u64,
    #[serde(alias = "toast_ms")]
    pub toast_ms: u64,
    #[serde(alias = "error_toast_ms")]
    pub error_toast_ms: u64,
    #[serde(alias = "table_token")]
    pub table_token: String,
    #[serde(alias = "access_token")]
    pub access_token: Option<String>,
    pub lang: String,
    #[serde(alias = "log_dir")]
    pub log_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            station_id: 0,
            client_id: None,
            device_url: DEFAULT_DEVICE_URL.to_string(),
            device_token: None,
            poll_interval_ms: 2500,
            batch_limit: 10,
            status_limit: 20,
            request_timeout_ms: 30_000,
            load_timeout_ms: 15_000,
            toast_ms: 4000,
            error_toast_ms: 2000,
            table_token: String::new(),
            access_token: None,
            lang: "zh_CN".to_string(),
            log_dir: None,
        }
    }
}

impl RelayConfig {
    /// Load from the process environment, then fill missing secrets from the
    /// credential store.
    pub fn load() -> Result<Self> {
        Self::load_with(&Keyring)
    }

    /// [`load`](Self::load) with an explicit credential store.
    pub fn load_with(credentials: &dyn CredentialStore) -> Result<Self> {
        let mut config = Self::load_from(|key| std::env::var(key).ok())?;
        if config.device_token.is_none() {
            config.device_token = credentials.get(storage::KEY_DEVICE_TOKEN);
        }
        if config.access_token.is_none() {
            config.access_token = credentials.get(storage::KEY_ACCESS_TOKEN);
        }
        Ok(config)
    }

    /// Load using `env` as the variable lookup. Does not touch the keyring.
    pub fn load_from(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match env(ENV_CONFIG_FILE).filter(|p| !p.trim().is_empty()) {
            Some(path) => Self::from_file(Path::new(path.trim()))?,
            None => Self::default(),
        };
        config.apply_env(&env)?;
        if let Some(code) = env(ENV_PAIRING).filter(|c| !c.trim().is_empty()) {
            config.apply_pairing(&code)?;
        }
        config.normalize();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| RelayError::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |name: &str| {
            env(&format!("SMALL_QR_{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("BACKEND_URL") {
            self.backend_url = v;
        }
        if let Some(v) = get("STATION_ID") {
            self.station_id = parse_number("SMALL_QR_STATION_ID", &v)?;
        }
        if let Some(v) = get("CLIENT_ID") {
            self.client_id = Some(v);
        }
        if let Some(v) = get("DEVICE_URL") {
            self.device_url = v;
        }
        if let Some(v) = get("DEVICE_TOKEN") {
            self.device_token = Some(v);
        }
        if let Some(v) = get("POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_number("SMALL_QR_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("BATCH_LIMIT") {
            self.batch_limit = parse_number("SMALL_QR_BATCH_LIMIT", &v)?;
        }
        if let Some(v) = get("STATUS_LIMIT") {
            self.status_limit = parse_number("SMALL_QR_STATUS_LIMIT", &v)?;
        }
        if let Some(v) = get("REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_number("SMALL_QR_REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("LOAD_TIMEOUT_MS") {
            self.load_timeout_ms = parse_number("SMALL_QR_LOAD_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("TOAST_MS") {
            self.toast_ms = parse_number("SMALL_QR_TOAST_MS", &v)?;
        }
        if let Some(v) = get("ERROR_TOAST_MS") {
            self.error_toast_ms = parse_number("SMALL_QR_ERROR_TOAST_MS", &v)?;
        }
        if let Some(v) = get("TABLE_TOKEN") {
            self.table_token = v;
        }
        if let Some(v) = get("ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
        if let Some(v) = get("LANG") {
            self.lang = v;
        }
        if let Some(v) = get("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Apply a pairing code handed out by the backend.
    pub fn apply_pairing(&mut self, code: &str) -> Result<()> {
        let payload = decode_pairing_code(code)
            .ok_or_else(|| RelayError::Config("pairing code is not valid".into()))?;

        if let Some(url) = crate::value_str(&payload, &["url", "backend"]) {
            self.backend_url = url;
        }
        let station = crate::value_i64(&payload, &["station", "config_id"]).or_else(|| {
            crate::value_str(&payload, &["station", "config_id"]).and_then(|s| s.parse().ok())
        });
        if let Some(station) = station {
            self.station_id = station;
        }
        if let Some(token) = crate::value_str(&payload, &["token"]) {
            self.device_token = Some(token);
        }
        if let Some(device) = crate::value_str(&payload, &["device"]) {
            self.device_url = device;
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.backend_url = normalize_base_url(&self.backend_url);
        self.device_url = normalize_base_url(&self.device_url);
        for secret in [&mut self.device_token, &mut self.access_token, &mut self.client_id] {
            if secret.as_deref().is_some_and(|s| s.trim().is_empty()) {
                *secret = None;
            }
        }
        self.table_token = self.table_token.trim().to_string();
    }

    /// Settings the print consumer cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.backend_url.is_empty() {
            return Err(RelayError::Config("backend URL is not set".into()));
        }
        if self.station_id <= 0 {
            return Err(RelayError::Config("station id must be a positive number".into()));
        }
        if self.device_url.is_empty() {
            return Err(RelayError::Config("print device URL is not set".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(RelayError::Config("poll interval must be greater than zero".into()));
        }
        if self.batch_limit == 0 {
            return Err(RelayError::Config("batch limit must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(crate::diagnostics::get_log_dir)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn toast_duration(&self) -> Duration {
        Duration::from_millis(self.toast_ms)
    }

    pub fn error_toast_duration(&self) -> Duration {
        Duration::from_millis(self.error_toast_ms)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| RelayError::Config(format!("{name} is not a valid number: {raw}")))
}

/// Decode a pairing code: raw JSON, or URL-safe / standard base64 of JSON.
pub fn decode_pairing_code(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str::<Value>(trimmed)
            .ok()
            .filter(Value::is_object);
    }
    // Base64 codes are often pasted wrapped over several lines.
    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() < 8 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64.trim_end_matches('='),
        "=".repeat((4 - base64.trim_end_matches('=').len() % 4) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded)
        .ok()
        .filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serial_test::serial;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.device_url, "http://127.0.0.1:8868/print");
        assert_eq!(config.poll_interval_ms, 2500);
        assert_eq!(config.batch_limit, 10);
        assert_eq!(config.status_limit, 20);
        assert_eq!(config.load_timeout(), Duration::from_secs(15));
        assert_eq!(config.toast_duration(), Duration::from_secs(4));
        assert_eq!(config.error_toast_duration(), Duration::from_secs(2));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_and_normalises() {
        let config = RelayConfig::load_from(env_of(&[
            ("SMALL_QR_BACKEND_URL", "shop.example.com/"),
            ("SMALL_QR_STATION_ID", "3"),
            ("SMALL_QR_POLL_INTERVAL_MS", "1000"),
            ("SMALL_QR_DEVICE_TOKEN", "   "),
            ("SMALL_QR_LANG", "ja_JP"),
            ("SMALL_QR_ERROR_TOAST_MS", "1500"),
        ]))
        .expect("config");

        assert_eq!(config.error_toast_duration(), Duration::from_millis(1500));
        assert_eq!(config.backend_url, "https://shop.example.com");
        assert_eq!(config.station_id, 3);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.device_token, None);
        assert_eq!(config.lang, "ja_JP");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_number_is_config_error() {
        let err = RelayConfig::load_from(env_of(&[("SMALL_QR_BATCH_LIMIT", "ten")])).unwrap_err();
        assert!(matches!(err, RelayError::Config(ref m) if m.contains("SMALL_QR_BATCH_LIMIT")));
    }

    #[test]
    fn test_file_then_env_then_pairing() {
        let dir = std::env::temp_dir().join(format!("relay_cfg_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("relay.json");
        std::fs::write(
            &path,
            r#"{ "backend_url": "http://localhost:8069", "station_id": 1, "batchLimit": 5, "device_token": "from-file" }"#,
        )
        .unwrap();

        let pairing = BASE64_URL_SAFE_NO_PAD
            .encode(r#"{"url":"https://pos.example.com","station":"7","token":"paired"}"#);
        let config = RelayConfig::load_from(env_of(&[
            ("SMALL_QR_CONFIG", path.to_str().unwrap()),
            ("SMALL_QR_STATION_ID", "2"),
            ("SMALL_QR_PAIRING", &pairing),
        ]))
        .expect("config");

        assert_eq!(config.backend_url, "https://pos.example.com");
        assert_eq!(config.station_id, 7);
        assert_eq!(config.batch_limit, 5);
        assert_eq!(config.device_token.as_deref(), Some("paired"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_decode_pairing_code() {
        let raw = r#"{"url":"a.b","station":4}"#;
        assert_eq!(decode_pairing_code(raw).unwrap()["station"], 4);
        assert_eq!(
            decode_pairing_code(&BASE64_STANDARD.encode(raw)).unwrap()["url"],
            "a.b"
        );
        assert!(decode_pairing_code("not a code").is_none());

        let spaced = decode_pairing_code("  {\"url\":\"a.b\",\"device\":\"My Printer\"}\n").unwrap();
        assert_eq!(spaced["device"], "My Printer");
        let wrapped = BASE64_STANDARD.encode(raw);
        let (head, tail) = wrapped.split_at(10);
        assert_eq!(decode_pairing_code(&format!("{head}\n  {tail}")).unwrap()["station"], 4);
        assert!(decode_pairing_code("[1,2,3]").is_none());

        let mut config = RelayConfig::default();
        assert!(config.apply_pairing("garbage!!").is_err());
    }

    #[test]
    fn test_validate_rejects_missing_pieces() {
        let ok = RelayConfig {
            backend_url: "https://pos.example.com".into(),
            station_id: 1,
            ..RelayConfig::default()
        };
        assert!(ok.validate().is_ok());

        for broken in [
            RelayConfig { backend_url: String::new(), ..ok.clone() },
            RelayConfig { station_id: 0, ..ok.clone() },
            RelayConfig { poll_interval_ms: 0, ..ok.clone() },
            RelayConfig { batch_limit: 0, ..ok.clone() },
            RelayConfig { device_url: String::new(), ..ok.clone() },
        ] {
            assert!(matches!(broken.validate(), Err(RelayError::Config(_))));
        }
    }

    #[test]
    #[serial]
    fn test_load_reads_process_env() {
        std::env::set_var("SMALL_QR_BACKEND_URL", "localhost:8069");
        std::env::set_var("SMALL_QR_STATION_ID", "9");
        std::env::set_var("SMALL_QR_DEVICE_TOKEN", "env-token");
        std::env::set_var("SMALL_QR_ACCESS_TOKEN", "env-access");

        std::env::set_var("SMALL_QR_TOAST_MS", "3000");
        let store = MemoryStore::with(&[
            (storage::KEY_DEVICE_TOKEN, "stored-device"),
            (storage::KEY_ACCESS_TOKEN, "stored-access"),
        ]);

        let config = RelayConfig::load_with(&store);
        std::env::remove_var("SMALL_QR_ACCESS_TOKEN");
        let fallback = RelayConfig::load_with(&store);

        std::env::remove_var("SMALL_QR_BACKEND_URL");
        std::env::remove_var("SMALL_QR_STATION_ID");
        std::env::remove_var("SMALL_QR_DEVICE_TOKEN");
        std::env::remove_var("SMALL_QR_TOAST_MS");

        let config = config.expect("config");
        assert_eq!(config.backend_url, "http://localhost:8069");
        assert_eq!(config.station_id, 9);
        assert_eq!(config.toast_ms, 3000);
        assert_eq!(config.device_token.as_deref(), Some("env-token"));
        assert_eq!(config.access_token.as_deref(), Some("env-access"));

        let fallback = fallback.expect("config");
        assert_eq!(fallback.device_token.as_deref(), Some("env-token"));
        assert_eq!(fallback.access_token.as_deref(), Some("stored-access"));
    }
}
