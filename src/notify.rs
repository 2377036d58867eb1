//! Transient notifications.
//!
//! One toast at a time. Showing a new toast replaces the current one and
//! restarts the auto-hide timer; a timer left over from an older toast never
//! hides a newer one.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    Info,
    Error,
    /// Order confirmation / "ordered, you can add more".
    OrderStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
    pub order_ref: Option<String>,
    pub table_name: Option<String>,
    pub can_add: bool,
}

impl Toast {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Info,
            message: message.into(),
            order_ref: None,
            table_name: None,
            can_add: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Error,
            ..Self::info(message)
        }
    }

    pub fn order_status(order_ref: &str, table_name: &str, can_add: bool) -> Self {
        Self {
            kind: ToastKind::OrderStatus,
            message: "order_submitted".into(),
            order_ref: Some(order_ref.to_string()),
            table_name: Some(table_name.to_string()).filter(|t| !t.is_empty()),
            can_add,
        }
    }
}

#[derive(Default)]
struct ToastSlot {
    current: Option<Toast>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

pub struct Notifier {
    slot: Arc<Mutex<ToastSlot>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(ToastSlot::default())),
        }
    }

    /// Show `toast`, hiding it after `auto_hide` when given. Returns the
    /// toast's generation.
    pub fn show(&self, toast: Toast, auto_hide: Option<Duration>) -> u64 {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.generation += 1;
        let generation = slot.generation;
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.current = Some(toast);

        if let (Some(delay), Ok(handle)) = (auto_hide, tokio::runtime::Handle::try_current()) {
            let shared = Arc::clone(&self.slot);
            slot.timer = Some(handle.spawn(async move {
                tokio::time::sleep(delay).await;
                let mut slot = shared.lock().unwrap_or_else(|e| e.into_inner());
                if slot.generation == generation {
                    slot.current = None;
                    slot.timer = None;
                }
            }));
        }
        generation
    }

    pub fn dismiss(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.generation += 1;
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.current = None;
    }

    pub fn current(&self) -> Option<Toast> {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .current
            .clone()
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
        }
    }
}
