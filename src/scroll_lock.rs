//! Reference-counted scroll lock.
//!
//! Independent requesters (overlays, the fatal screen, anything else that
//! must freeze the page behind it) each acquire under their own reason. The
//! global effect is engaged on the first acquire and disengaged when the last
//! outstanding reason is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// The side effect guarded by the lock.
pub trait LockEffect {
    fn engage(&mut self);
    fn disengage(&mut self);
}

/// Cloneable flag effect, for headless sessions and tests.
#[derive(Debug, Clone, Default)]
pub struct SharedFlag(Arc<AtomicBool>);

impl SharedFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl LockEffect for SharedFlag {
    fn engage(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn disengage(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct ScrollLock<E: LockEffect> {
    reasons: HashMap<String, u32>,
    total: u32,
    effect: E,
}

impl<E: LockEffect> ScrollLock<E> {
    pub fn new(effect: E) -> Self {
        Self {
            reasons: HashMap::new(),
            total: 0,
            effect,
        }
    }

    pub fn acquire(&mut self, reason: &str) {
        *self.reasons.entry(reason.to_string()).or_insert(0) += 1;
        self.total += 1;
        if self.total == 1 {
            self.effect.engage();
            debug!(reason, "scroll lock engaged");
        }
    }

    /// Release one hold for `reason`. Releasing a reason that holds nothing
    /// changes nothing.
    pub fn release(&mut self, reason: &str) {
        let Some(count) = self.reasons.get_mut(reason) else {
            debug!(reason, "release without matching acquire");
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.reasons.remove(reason);
        }
        self.total = self.total.saturating_sub(1);
        if self.total == 0 {
            self.effect.disengage();
            debug!(reason, "scroll lock released");
        }
    }

    /// Drop every hold and disengage unconditionally. Recovery only.
    pub fn force_clear(&mut self) {
        if self.total > 0 {
            warn!(count = self.total, reasons = ?self.reasons.keys().collect::<Vec<_>>(), "forcing scroll lock clear");
        }
        self.reasons.clear();
        self.total = 0;
        self.effect.disengage();
    }

    pub fn is_locked(&self) -> bool {
        self.total > 0
    }

    pub fn count(&self) -> u32 {
        self.total
    }

    pub fn reason_count(&self, reason: &str) -> u32 {
        self.reasons.get(reason).copied().unwrap_or(0)
    }

    /// Reasons currently held, sorted.
    pub fn reasons(&self) -> Vec<&str> {
        let mut reasons: Vec<&str> = self.reasons.keys().map(String::as_str).collect();
        reasons.sort_unstable();
        reasons
    }

    pub fn effect(&self) -> &E {
        &self.effect
    }
}
