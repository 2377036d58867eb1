//! Single-overlay presentation controller.
//!
//! At most one overlay is visible. Opening a second one first hides the
//! first, so the swap is atomic from the surface's point of view. Each open
//! overlay holds exactly one scroll-lock reason (`overlay-<name>`).

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use crate::scroll_lock::{LockEffect, ScrollLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Overlay {
    Cart,
    Order,
    Pay,
    Product,
}

impl Overlay {
    pub fn as_str(self) -> &'static str {
        match self {
            Overlay::Cart => "cart",
            Overlay::Order => "order",
            Overlay::Pay => "pay",
            Overlay::Product => "product",
        }
    }

    pub fn lock_reason(self) -> String {
        format!("overlay-{}", self.as_str())
    }
}

impl fmt::Display for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whatever renders the overlays.
pub trait OverlaySurface {
    fn show(&mut self, overlay: Overlay);
    fn hide(&mut self, overlay: Overlay);
    fn set_action_bar_visible(&mut self, visible: bool);
}

/// Plain record of what is on screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationState {
    pub visible: BTreeSet<Overlay>,
    pub action_bar_visible: bool,
}

impl Default for PresentationState {
    fn default() -> Self {
        Self {
            visible: BTreeSet::new(),
            action_bar_visible: true,
        }
    }
}

impl OverlaySurface for PresentationState {
    fn show(&mut self, overlay: Overlay) {
        self.visible.insert(overlay);
    }

    fn hide(&mut self, overlay: Overlay) {
        self.visible.remove(&overlay);
    }

    fn set_action_bar_visible(&mut self, visible: bool) {
        self.action_bar_visible = visible;
    }
}

pub struct OverlayController<S: OverlaySurface, E: LockEffect> {
    current: Option<Overlay>,
    surface: S,
    lock: ScrollLock<E>,
}

impl<S: OverlaySurface, E: LockEffect> OverlayController<S, E> {
    pub fn new(surface: S, lock: ScrollLock<E>) -> Self {
        Self {
            current: None,
            surface,
            lock,
        }
    }

    pub fn open(&mut self, overlay: Overlay) {
        let previous = match self.current {
            Some(current) if current == overlay => {
                // Re-show without taking a second hold.
                self.surface.show(overlay);
                return;
            }
            Some(current) => {
                self.surface.hide(current);
                Some(current)
            }
            None => None,
        };

        self.current = Some(overlay);
        self.surface.show(overlay);
        self.surface.set_action_bar_visible(false);
        // New hold first so a swap never drops the lock to zero.
        self.lock.acquire(&overlay.lock_reason());
        if let Some(previous) = previous {
            self.lock.release(&previous.lock_reason());
        }
        debug!(overlay = %overlay, "overlay opened");
    }

    /// Same swap as [`open`](Self::open); overlays never stack.
    pub fn replace(&mut self, overlay: Overlay) {
        self.open(overlay);
    }

    pub fn close(&mut self) {
        let Some(current) = self.current.take() else {
            return;
        };
        self.surface.hide(current);
        self.surface.set_action_bar_visible(true);
        self.lock.release(&current.lock_reason());
        debug!(overlay = %current, "overlay closed");
    }

    /// Close whatever is open and clear every scroll-lock hold, including
    /// ones taken outside the controller.
    pub fn reset(&mut self) {
        self.close();
        self.lock.force_clear();
        self.surface.set_action_bar_visible(true);
    }

    pub fn current(&self) -> Option<Overlay> {
        self.current
    }

    pub fn is_open(&self, overlay: Overlay) -> bool {
        self.current == Some(overlay)
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn scroll_lock(&self) -> &ScrollLock<E> {
        &self.lock
    }

    pub fn scroll_lock_mut(&mut self) -> &mut ScrollLock<E> {
        &mut self.lock
    }
}
