//! Relay secrets in the OS credential store.
//!
//! On Windows this is the Credential Manager, on macOS the Keychain and on
//! Linux the Secret Service API, all through the `keyring` crate. Only
//! secrets live here; everything else is plain configuration.

use keyring::Entry;
use tracing::warn;

use crate::error::{RelayError, Result};

const SERVICE_NAME: &str = "small-qr-relay";

pub const KEY_DEVICE_TOKEN: &str = "print_device_token";
pub const KEY_ACCESS_TOKEN: &str = "qr_access_token";

/// Where secrets are read from and written to.
pub trait CredentialStore: Send + Sync {
    /// A missing entry, or a store that cannot be reached, is `None`.
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// The OS keyring.
#[derive(Debug, Clone, Copy, Default)]
pub struct Keyring;

impl CredentialStore for Keyring {
    fn get(&self, key: &str) -> Option<String> {
        get_credential(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        set_credential(key, value)
    }
}

fn entry(key: &str) -> Result<Entry> {
    Entry::new(SERVICE_NAME, key).map_err(|e| RelayError::Credential(e.to_string()))
}

pub fn get_credential(key: &str) -> Option<String> {
    let entry = match entry(key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw).filter(|pw| !pw.trim().is_empty()),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

pub fn set_credential(key: &str, value: &str) -> Result<()> {
    entry(key)?
        .set_password(value)
        .map_err(|e| RelayError::Credential(e.to_string()))
}

/// In-memory store for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    entries: std::sync::Mutex<std::collections::HashMap<String, String>>,
    fail_writes: bool,
}

#[cfg(test)]
impl MemoryStore {
    pub(crate) fn with(pairs: &[(&str, &str)]) -> Self {
        let store = Self::default();
        for (k, v) in pairs {
            store
                .entries
                .lock()
                .unwrap()
                .insert(k.to_string(), v.to_string());
        }
        store
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes {
            return Err(RelayError::Credential("store locked".into()));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
