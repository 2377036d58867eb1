//! Ordering session: cart, order history, overlays and notifications for one
//! table.
//!
//! The session owns all mutable ordering state. Every change goes through a
//! named operation that talks to the backend first and then replaces local
//! state with the backend's answer, so the footer is always derived from the
//! latest confirmed view. Locks are never held across an await.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cart::{CartItem, Menu, MenuProduct, Order, OrderLookup, OrderState};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::footer::{derive_footer, FooterView};
use crate::notify::{Notifier, Toast};
use crate::ordering::{HttpOrderingBackend, OrderingBackend};
use crate::overlay::{Overlay, OverlayController, OverlaySurface};
use crate::scroll_lock::LockEffect;
use crate::storage::{CredentialStore, KEY_ACCESS_TOKEN};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub load_timeout: Duration,
    /// Auto-hide for order confirmations.
    pub order_toast: Duration,
    /// Auto-hide for plain and error toasts.
    pub toast: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(15),
            order_toast: Duration::from_secs(4),
            toast: Duration::from_secs(2),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            load_timeout: config.load_timeout(),
            order_toast: config.toast_duration(),
            toast: config.error_toast_duration(),
        }
    }
}

// ---------------------------------------------------------------------------
// Boot failures
// ---------------------------------------------------------------------------

/// Conditions under which the session cannot start at all.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BootError {
    #[error("table token missing")]
    MissingTableToken,
    #[error("initial load timed out after {0:?}")]
    Timeout(Duration),
    #[error("{message}")]
    Rejected {
        message: String,
        trace_id: Option<String>,
    },
    #[error("backend unreachable: {0}")]
    Unreachable(String),
}

impl BootError {
    fn from_relay(err: RelayError) -> Self {
        match err {
            RelayError::Rpc {
                message, trace_id, ..
            } => Self::Rejected { message, trace_id },
            other => Self::Unreachable(other.to_string()),
        }
    }

    pub fn fatal_screen(&self) -> FatalScreen {
        let (message, trace_id) = match self {
            Self::MissingTableToken => (
                "Table information is invalid, please scan the QR code again".to_string(),
                None,
            ),
            Self::Timeout(_) => ("Loading timed out, please retry".to_string(), None),
            Self::Rejected { message, trace_id } => (message.clone(), trace_id.clone()),
            Self::Unreachable(_) => (
                "Loading failed, please check the network and retry".to_string(),
                None,
            ),
        };
        FatalScreen {
            title: "load_failed",
            message,
            trace_id,
            retry_label: "retry",
        }
    }
}

/// Full-screen, dismissible error with a retry action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FatalScreen {
    pub title: &'static str,
    pub message: String,
    pub trace_id: Option<String>,
    pub retry_label: &'static str,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Submitted(Order),
    /// Another submit is still waiting for the backend.
    AlreadyInFlight,
    EmptyCart,
    Failed(RelayError),
}

#[derive(Debug, Default)]
struct SessionState {
    table_name: String,
    menu: Menu,
    cart: Vec<CartItem>,
    /// Newest first, never containing the cart order.
    orders: Vec<Order>,
    /// Bumped by every successful submit. A cart snapshot from a request
    /// started under an older epoch is stale.
    cart_epoch: u64,
}

/// Clears the in-flight flag however the submit ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct OrderSession<B, S: OverlaySurface, E: LockEffect> {
    backend: Arc<B>,
    state: Mutex<SessionState>,
    overlays: Mutex<OverlayController<S, E>>,
    notifier: Notifier,
    submitting: AtomicBool,
    settings: SessionSettings,
}

impl<B, S, E> OrderSession<B, S, E>
where
    B: OrderingBackend,
    S: OverlaySurface,
    E: LockEffect,
{
    /// Load the table's menu, cart and orders. Fails with a [`BootError`]
    /// instead of hanging when the backend does not answer in time.
    pub async fn boot(
        backend: Arc<B>,
        overlays: OverlayController<S, E>,
        settings: SessionSettings,
    ) -> Result<Self, BootError> {
        if backend.table_token().trim().is_empty() {
            warn!("ordering session started without a table token");
            return Err(BootError::MissingTableToken);
        }

        let init = match tokio::time::timeout(settings.load_timeout, backend.init()).await {
            Ok(Ok(init)) => init,
            Ok(Err(e)) => {
                warn!(error = %e, trace_id = ?e.trace_id(), "ordering session init failed");
                return Err(BootError::from_relay(e));
            }
            Err(_) => {
                warn!(timeout_ms = settings.load_timeout.as_millis() as u64, "ordering session init timed out");
                return Err(BootError::Timeout(settings.load_timeout));
            }
        };

        let state = SessionState {
            cart: init.cart(),
            orders: init.history(),
            table_name: init.table_name,
            menu: init.menu,
            cart_epoch: 0,
        };
        info!(table = %state.table_name, cart_lines = state.cart.len(), orders = state.orders.len(), "Ordering session ready");

        Ok(Self {
            backend,
            state: Mutex::new(state),
            overlays: Mutex::new(overlays),
            notifier: Notifier::new(),
            submitting: AtomicBool::new(false),
            settings,
        })
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn overlays(&self) -> MutexGuard<'_, OverlayController<S, E>> {
        self.overlays.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn toast(&self, message: impl Into<String>) {
        self.notifier
            .show(Toast::info(message), Some(self.settings.toast));
    }

    fn error_toast(&self, err: &RelayError, fallback: &str) {
        let message = match err {
            RelayError::Rpc { message, .. } if !message.is_empty() => message.clone(),
            _ => fallback.to_string(),
        };
        self.notifier
            .show(Toast::error(message), Some(self.settings.toast));
    }

    // -- Read side ----------------------------------------------------------

    pub fn footer(&self) -> FooterView {
        let state = self.state();
        derive_footer(&state.cart, &state.orders)
    }

    pub fn cart(&self) -> Vec<CartItem> {
        self.state().cart.clone()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.state().orders.clone()
    }

    pub fn table_name(&self) -> String {
        self.state().table_name.clone()
    }

    pub fn menu(&self) -> Menu {
        self.state().menu.clone()
    }

    pub fn current_overlay(&self) -> Option<Overlay> {
        self.overlays().current()
    }

    pub fn current_toast(&self) -> Option<Toast> {
        self.notifier.current()
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting.load(Ordering::SeqCst)
    }

    /// Run `f` against the overlay controller, e.g. to inspect the surface.
    pub fn with_overlays<R>(&self, f: impl FnOnce(&OverlayController<S, E>) -> R) -> R {
        f(&self.overlays())
    }

    /// Look an order up by reference. Never fabricates a record; callers that
    /// can live with a stand-in use [`OrderLookup::or_placeholder`].
    pub fn find_order(&self, reference: &str) -> OrderLookup {
        let reference = reference.trim();
        match self
            .state()
            .orders
            .iter()
            .find(|o| o.reference == reference || o.pos_order_name.as_deref() == Some(reference))
        {
            Some(order) => OrderLookup::Found(order.clone()),
            None => OrderLookup::NotFound {
                reference: reference.to_string(),
            },
        }
    }

    // -- Cart ---------------------------------------------------------------

    /// Add `qty` of a product. The cart is replaced with the backend's
    /// snapshot; on failure it is left as it was.
    pub async fn add_item(
        &self,
        product_id: i64,
        qty: f64,
        note: &str,
    ) -> Result<FooterView, RelayError> {
        let epoch = self.state().cart_epoch;
        match self.backend.add_to_cart(product_id, qty, note).await {
            Ok(cart_order) => {
                self.toast("added");
                Ok(self.apply_cart(epoch, &cart_order).await)
            }
            Err(e) => {
                warn!(product_id, error = %e, "add to cart failed");
                self.error_toast(&e, "add_failed");
                Err(e)
            }
        }
    }

    /// Set a cart line's quantity; zero or less removes it.
    pub async fn update_item(&self, line_id: i64, qty: f64) -> Result<FooterView, RelayError> {
        let epoch = self.state().cart_epoch;
        match self.backend.update_cart_line(line_id, qty).await {
            Ok(cart_order) => Ok(self.apply_cart(epoch, &cart_order).await),
            Err(e) => {
                warn!(line_id, error = %e, "cart update failed");
                self.error_toast(&e, "update_failed");
                Err(e)
            }
        }
    }

    /// Take a cart snapshot unless a submit finished while its request was
    /// in flight. A stale snapshot may hold lines that were already ordered,
    /// so the cart is reloaded from the backend instead.
    async fn apply_cart(&self, epoch: u64, cart_order: &Order) -> FooterView {
        {
            let mut state = self.state();
            if state.cart_epoch == epoch {
                state.cart = cart_order.cart_items();
                return derive_footer(&state.cart, &state.orders);
            }
        }
        debug!(epoch, "cart snapshot predates the last submit, resyncing");
        match self.sync_orders().await {
            Ok(footer) => footer,
            Err(_) => self.footer(),
        }
    }

    // -- Submit -------------------------------------------------------------

    /// Submit the cart. A call made while another is outstanding does
    /// nothing. Never retries on its own.
    pub async fn submit(&self, note: &str) -> SubmitOutcome {
        if self.state().cart.is_empty() {
            self.toast("cart_empty");
            return SubmitOutcome::EmptyCart;
        }
        if self
            .submitting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("submit already in flight, skipped");
            return SubmitOutcome::AlreadyInFlight;
        }
        let _in_flight = InFlight(&self.submitting);

        let order = match self.backend.submit_order(note.trim()).await {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, "order submit failed");
                self.error_toast(&e, "order_failed");
                return SubmitOutcome::Failed(e);
            }
        };

        let (footer, table_name) = {
            let mut state = self.state();
            state.cart.clear();
            state.cart_epoch += 1;
            state.orders.insert(0, order.clone());
            (derive_footer(&state.cart, &state.orders), state.table_name.clone())
        };
        self.overlays().close();

        let order_ref = if footer.order_ref.is_empty() {
            order.reference.clone()
        } else {
            footer.order_ref.clone()
        };
        self.notifier.show(
            Toast::order_status(&order_ref, &table_name, true),
            Some(self.settings.order_toast),
        );
        info!(order = %order.reference, table = %table_name, "Order submitted");
        SubmitOutcome::Submitted(order)
    }

    // -- Footer actions -----------------------------------------------------

    /// Primary footer button. Returns the overlay it opened; `None` when the
    /// button is disabled.
    pub fn primary_action(&self) -> Option<Overlay> {
        let footer = self.footer();
        if !footer.primary_enabled {
            return None;
        }
        let target = footer.primary.target();
        self.overlays().open(target);
        Some(target)
    }

    pub fn secondary_action(&self) -> Option<Overlay> {
        let target = self.footer().secondary?.target();
        self.overlays().open(target);
        Some(target)
    }

    /// Status chip: show the order toast until dismissed.
    pub fn status_chip_clicked(&self) -> Option<Toast> {
        let chip = self.footer().status?;
        let toast = Toast::order_status(chip.order_ref(), &self.table_name(), chip.can_add());
        self.notifier.show(toast.clone(), None);
        Some(toast)
    }

    /// Open the product detail overlay for a menu product.
    pub fn open_product(&self, product_id: i64) -> Option<MenuProduct> {
        let product = self.state().menu.product(product_id).cloned()?;
        self.overlays().open(Overlay::Product);
        Some(product)
    }

    pub fn open_overlay(&self, overlay: Overlay) {
        self.overlays().open(overlay);
    }

    pub fn close_overlay(&self) {
        self.overlays().close();
    }

    pub fn dismiss_toast(&self) {
        self.notifier.dismiss();
    }

    // -- Sync / teardown ----------------------------------------------------

    /// Refresh orders and cart from the backend, picking up changes made at
    /// the POS.
    pub async fn sync_orders(&self) -> Result<FooterView, RelayError> {
        let status = self.backend.order_status().await.inspect_err(|e| {
            warn!(error = %e, "order status refresh failed");
        })?;

        let mut state = self.state();
        state.cart = status
            .orders
            .iter()
            .find(|o| o.state == OrderState::Cart)
            .map(Order::cart_items)
            .unwrap_or_default();
        state.orders = status
            .orders
            .into_iter()
            .filter(|o| o.state != OrderState::Cart)
            .collect();
        Ok(derive_footer(&state.cart, &state.orders))
    }

    /// Close everything the session put on screen.
    pub fn end(&self) {
        self.overlays().reset();
        self.notifier.dismiss();
        info!(table = %self.table_name(), "Ordering session ended");
    }
}

impl<S, E> OrderSession<HttpOrderingBackend, S, E>
where
    S: OverlaySurface,
    E: LockEffect,
{
    /// Boot the session for the table in `config`. An access token handed
    /// out by the backend is kept in `credentials` for the next start.
    pub async fn connect(
        config: &RelayConfig,
        overlays: OverlayController<S, E>,
        credentials: &dyn CredentialStore,
    ) -> Result<Self, BootError> {
        let backend = HttpOrderingBackend::from_config(config).map_err(BootError::from_relay)?;
        let session =
            Self::boot(Arc::new(backend), overlays, SessionSettings::from_config(config)).await?;

        if let Some(token) = session.backend.access_token() {
            if config.access_token.as_deref() != Some(token.as_str()) {
                match credentials.set(KEY_ACCESS_TOKEN, &token) {
                    Ok(()) => debug!("session access token stored"),
                    Err(e) => warn!(error = %e, "failed to store session access token"),
                }
            }
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::OrderLine;
    use crate::footer::FooterState;
    use crate::notify::ToastKind;
    use crate::ordering::{InitData, OrderStatus};
    use crate::overlay::PresentationState;
    use crate::scroll_lock::{ScrollLock, SharedFlag};
    use async_trait::async_trait;

    type TestSession = OrderSession<FakeBackend, PresentationState, SharedFlag>;

    #[derive(Default)]
    struct Backend {
        next_line: i64,
        lines: Vec<OrderLine>,
        submitted: Vec<Order>,
        submit_calls: u32,
    }

    #[derive(Default)]
    struct FakeBackend {
        table_token: String,
        init_delay: Option<Duration>,
        init_error: Option<RelayError>,
        submit_delay: Option<Duration>,
        add_reply_delay: Option<Duration>,
        submit_error: Option<RelayError>,
        initial_orders: Vec<Order>,
        inner: Mutex<Backend>,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                table_token: "tbl-1".into(),
                ..Self::default()
            }
        }

        fn submit_calls(&self) -> u32 {
            self.inner.lock().unwrap().submit_calls
        }

        fn apply_add(&self, product_id: i64, qty: f64, note: &str) -> crate::error::Result<Order> {
            let mut inner = self.inner.lock().unwrap();
            if product_id == 404 {
                return Err(RelayError::rpc("ADD_FAILED", "Product is sold out"));
            }
            match inner
                .lines
                .iter_mut()
                .find(|l| l.product_id == Some(product_id) && note.is_empty())
            {
                Some(line) => line.qty += qty,
                None => {
                    inner.next_line += 1;
                    let id = inner.next_line;
                    inner.lines.push(OrderLine {
                        id: Some(id),
                        product_id: Some(product_id),
                        product_name: format!("product {product_id}"),
                        qty,
                        price_unit: 600.0,
                        note: note.to_string(),
                        state: "pending".into(),
                    });
                }
            }
            inner.lines.retain(|l| l.qty > 0.0);
            Ok(Self::cart_order(&inner.lines))
        }

        fn cart_order(lines: &[OrderLine]) -> Order {
            Order {
                state: OrderState::Cart,
                lines: lines.to_vec(),
                ..Order::placeholder("QRO-CART")
            }
        }
    }

    #[async_trait]
    impl OrderingBackend for FakeBackend {
        fn table_token(&self) -> &str {
            &self.table_token
        }

        async fn init(&self) -> crate::error::Result<InitData> {
            if let Some(delay) = self.init_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = &self.init_error {
                return Err(err.clone());
            }
            Ok(InitData {
                access_token: Some("acc".into()),
                table_name: "A3".into(),
                session_state: Some("ordering".into()),
                menu: Menu {
                    categories: Vec::new(),
                    products: vec![MenuProduct {
                        id: 5,
                        name: "Gyoza".into(),
                        price: 600.0,
                        category_id: None,
                    }],
                },
                orders: self.initial_orders.clone(),
                trace_id: None,
            })
        }

        async fn add_to_cart(&self, product_id: i64, qty: f64, note: &str) -> crate::error::Result<Order> {
            let reply = self.apply_add(product_id, qty, note);
            if let Some(delay) = self.add_reply_delay {
                tokio::time::sleep(delay).await;
            }
            reply
        }

        async fn update_cart_line(&self, line_id: i64, qty: f64) -> crate::error::Result<Order> {
            let mut inner = self.inner.lock().unwrap();
            if qty <= 0.0 {
                inner.lines.retain(|l| l.id != Some(line_id));
            } else if let Some(line) = inner.lines.iter_mut().find(|l| l.id == Some(line_id)) {
                line.qty = qty;
            }
            Ok(Self::cart_order(&inner.lines))
        }

        async fn submit_order(&self, note: &str) -> crate::error::Result<Order> {
            self.inner.lock().unwrap().submit_calls += 1;
            if let Some(delay) = self.submit_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = &self.submit_error {
                return Err(err.clone());
            }
            let mut inner = self.inner.lock().unwrap();
            let n = inner.submitted.len() + 1;
            let total: f64 = inner.lines.iter().map(|l| l.qty * l.price_unit).sum();
            let order = Order {
                state: OrderState::Ordered,
                note: note.to_string(),
                amount_total_incl: total * 1.1,
                amount_tax: total * 0.1,
                amount_untaxed: total,
                total_amount: total,
                lines: std::mem::take(&mut inner.lines),
                ..Order::placeholder(&format!("QRO-20260105-{n:04}"))
            };
            inner.submitted.insert(0, order.clone());
            Ok(order)
        }

        async fn order_status(&self) -> crate::error::Result<OrderStatus> {
            let inner = self.inner.lock().unwrap();
            let mut orders = Vec::new();
            if !inner.lines.is_empty() {
                orders.push(Self::cart_order(&inner.lines));
            }
            orders.extend(inner.submitted.iter().cloned());
            Ok(OrderStatus {
                orders,
                session_state: Some("ordering".into()),
            })
        }
    }

    fn overlays() -> (OverlayController<PresentationState, SharedFlag>, SharedFlag) {
        let flag = SharedFlag::new();
        (
            OverlayController::new(PresentationState::default(), ScrollLock::new(flag.clone())),
            flag,
        )
    }

    async fn boot_with(backend: FakeBackend) -> (Arc<TestSession>, Arc<FakeBackend>, SharedFlag) {
        let backend = Arc::new(backend);
        let (ctl, flag) = overlays();
        let session = OrderSession::boot(Arc::clone(&backend), ctl, SessionSettings::default())
            .await
            .expect("boot");
        (Arc::new(session), backend, flag)
    }

    async fn boot_err(backend: FakeBackend) -> BootError {
        let (ctl, _flag) = overlays();
        match OrderSession::boot(Arc::new(backend), ctl, SessionSettings::default()).await {
            Ok(_) => panic!("boot unexpectedly succeeded"),
            Err(e) => e,
        }
    }

    #[tokio::test]
    async fn test_end_to_end_footer_states() {
        let (session, _backend, _flag) = boot_with(FakeBackend::new()).await;
        assert_eq!(session.footer().state, FooterState::Browsing);

        let footer = session.add_item(5, 2.0, "").await.expect("add");
        assert_eq!(footer.state, FooterState::Selecting);
        assert_eq!(footer.cart_qty, 2.0);

        let order = match session.submit("").await {
            SubmitOutcome::Submitted(order) => order,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert!(session.cart().is_empty());
        let footer = session.footer();
        assert_eq!(footer.state, FooterState::Ordered);
        assert_eq!(footer.order_ref, order.reference);
        assert_eq!(footer.cart_amount, 0.0);

        let footer = session.add_item(5, 1.0, "").await.expect("add more");
        assert_eq!(footer.state, FooterState::AddingMore);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_submit_creates_one_order() {
        let backend = FakeBackend {
            submit_delay: Some(Duration::from_millis(500)),
            ..FakeBackend::new()
        };
        let (session, backend, _flag) = boot_with(backend).await;
        session.add_item(5, 1.0, "").await.expect("add");

        let (first, second) = tokio::join!(session.submit(""), session.submit(""));

        assert!(matches!(first, SubmitOutcome::Submitted(_)));
        assert_eq!(second, SubmitOutcome::AlreadyInFlight);
        assert_eq!(backend.submit_calls(), 1);
        assert_eq!(session.orders().len(), 1);
        assert!(!session.is_submitting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_cart_reply_after_submit_is_not_applied() {
        let backend = FakeBackend {
            add_reply_delay: Some(Duration::from_millis(300)),
            ..FakeBackend::new()
        };
        let (session, backend, _flag) = boot_with(backend).await;
        session.add_item(5, 1.0, "").await.expect("add");

        // The backend takes the add before the submit, but the add's reply
        // arrives after the submit's.
        let (added, submitted) = tokio::join!(session.add_item(6, 1.0, ""), session.submit(""));

        let SubmitOutcome::Submitted(order) = submitted else {
            panic!("submit failed: {submitted:?}");
        };
        assert_eq!(order.lines.len(), 2);
        let footer = added.expect("add");
        assert_eq!(footer.state, FooterState::Ordered);
        assert!(session.cart().is_empty());
        assert_eq!(session.footer().state, FooterState::Ordered);
        assert_eq!(session.orders().len(), 1);
        assert_eq!(backend.submit_calls(), 1);
    }

    #[tokio::test]
    async fn test_submit_failure_keeps_cart_and_allows_retry() {
        let backend = FakeBackend {
            submit_error: Some(RelayError::rpc("POS_NOT_OPEN", "POS session is not open")),
            ..FakeBackend::new()
        };
        let (session, backend, _flag) = boot_with(backend).await;
        session.add_item(5, 2.0, "").await.expect("add");
        session.open_overlay(Overlay::Cart);

        let outcome = session.submit("").await;
        assert!(matches!(outcome, SubmitOutcome::Failed(RelayError::Rpc { .. })));
        assert_eq!(session.cart().len(), 1);
        assert!(session.orders().is_empty());
        assert_eq!(session.current_overlay(), Some(Overlay::Cart));
        let toast = session.current_toast().expect("error toast");
        assert_eq!(toast.kind, ToastKind::Error);
        assert_eq!(toast.message, "POS session is not open");

        assert!(!session.is_submitting());
        assert!(matches!(session.submit("").await, SubmitOutcome::Failed(_)));
        assert_eq!(backend.submit_calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_cart_submit_only_notifies() {
        let (session, backend, _flag) = boot_with(FakeBackend::new()).await;
        assert_eq!(session.submit("").await, SubmitOutcome::EmptyCart);
        assert_eq!(backend.submit_calls(), 0);
        assert_eq!(session.current_toast().map(|t| t.message), Some("cart_empty".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_closes_overlay_and_shows_order_toast() {
        let (session, _backend, flag) = boot_with(FakeBackend::new()).await;
        session.add_item(5, 1.0, "").await.expect("add");
        assert_eq!(session.primary_action(), Some(Overlay::Cart));
        assert!(flag.is_set());

        let SubmitOutcome::Submitted(order) = session.submit("  no ice ").await else {
            panic!("submit failed");
        };
        assert_eq!(order.note, "no ice");
        assert_eq!(session.current_overlay(), None);
        assert!(!flag.is_set());

        let toast = session.current_toast().expect("order toast");
        assert_eq!(toast.kind, ToastKind::OrderStatus);
        assert_eq!(toast.order_ref.as_deref(), Some(order.reference.as_str()));
        assert_eq!(toast.table_name.as_deref(), Some("A3"));

        tokio::time::sleep(Duration::from_millis(4001)).await;
        assert!(session.current_toast().is_none());
    }

    #[tokio::test]
    async fn test_footer_actions_open_overlays() {
        let (session, _backend, _flag) = boot_with(FakeBackend::new()).await;
        assert_eq!(session.primary_action(), None);
        assert_eq!(session.secondary_action(), None);
        assert_eq!(session.status_chip_clicked(), None);

        session.add_item(5, 1.0, "").await.expect("add");
        assert_eq!(session.secondary_action(), Some(Overlay::Cart));
        session.submit("").await;

        assert_eq!(session.primary_action(), Some(Overlay::Pay));
        assert_eq!(session.secondary_action(), Some(Overlay::Order));
        session.with_overlays(|ctl| {
            assert_eq!(ctl.surface().visible.len(), 1);
            assert_eq!(ctl.scroll_lock().reasons(), vec!["overlay-order"]);
        });
        session.close_overlay();
        assert_eq!(session.current_overlay(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_chip_toast_is_sticky() {
        let (session, _backend, _flag) = boot_with(FakeBackend::new()).await;
        session.add_item(5, 1.0, "").await.expect("add");
        session.submit("").await;
        session.add_item(5, 1.0, "").await.expect("add");

        let toast = session.status_chip_clicked().expect("chip toast");
        assert!(toast.can_add);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(session.current_toast(), Some(toast));
        session.dismiss_toast();
        assert!(session.current_toast().is_none());
    }

    #[tokio::test]
    async fn test_add_failure_leaves_cart_untouched() {
        let (session, _backend, _flag) = boot_with(FakeBackend::new()).await;
        session.add_item(5, 1.0, "").await.expect("add");

        let err = session.add_item(404, 1.0, "").await.unwrap_err();
        assert!(matches!(err, RelayError::Rpc { .. }));
        assert_eq!(session.cart().len(), 1);
        assert_eq!(
            session.current_toast().map(|t| t.message),
            Some("Product is sold out".into())
        );
    }

    #[tokio::test]
    async fn test_update_item_to_zero_removes_line() {
        let (session, _backend, _flag) = boot_with(FakeBackend::new()).await;
        session.add_item(5, 2.0, "").await.expect("add");
        let line_id = session.cart()[0].line_id;

        let footer = session.update_item(line_id, 3.0).await.expect("update");
        assert_eq!(footer.cart_qty, 3.0);
        let footer = session.update_item(line_id, 0.0).await.expect("remove");
        assert_eq!(footer.state, FooterState::Browsing);
        assert!(session.cart().is_empty());
    }

    #[tokio::test]
    async fn test_boot_restores_cart_and_history() {
        let cart = FakeBackend::cart_order(&[OrderLine {
            id: Some(9),
            product_id: Some(5),
            product_name: "Gyoza".into(),
            qty: 2.0,
            price_unit: 600.0,
            note: String::new(),
            state: "pending".into(),
        }]);
        let cooking = Order {
            state: OrderState::Cooking,
            ..Order::placeholder("QRO-20260105-0007")
        };
        let backend = FakeBackend {
            initial_orders: vec![cart, cooking],
            ..FakeBackend::new()
        };
        let (session, _backend, _flag) = boot_with(backend).await;

        assert_eq!(session.table_name(), "A3");
        assert_eq!(session.cart().len(), 1);
        assert_eq!(session.orders().len(), 1);
        assert_eq!(session.footer().state, FooterState::AddingMore);
        assert_eq!(session.menu().products.len(), 1);
    }

    #[tokio::test]
    async fn test_boot_without_table_token_is_fatal() {
        let backend = FakeBackend {
            table_token: "  ".into(),
            ..FakeBackend::new()
        };
        let err = boot_err(backend).await;
        assert_eq!(err, BootError::MissingTableToken);
        let screen = err.fatal_screen();
        assert_eq!(screen.retry_label, "retry");
        assert_eq!(screen.trace_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_times_out() {
        let backend = FakeBackend {
            init_delay: Some(Duration::from_secs(60)),
            ..FakeBackend::new()
        };
        let err = boot_err(backend).await;
        assert_eq!(err, BootError::Timeout(Duration::from_secs(15)));
        assert!(err.fatal_screen().message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_boot_rejection_carries_trace_id() {
        let backend = FakeBackend {
            init_error: Some(RelayError::Rpc {
                code: "SESSION_EXPIRED".into(),
                message: "Session expired".into(),
                trace_id: Some("ab12cd34".into()),
            }),
            ..FakeBackend::new()
        };
        let screen = boot_err(backend).await.fatal_screen();
        assert_eq!(screen.message, "Session expired");
        assert_eq!(screen.trace_id.as_deref(), Some("ab12cd34"));

        let backend = FakeBackend {
            init_error: Some(RelayError::Network("Cannot reach host".into())),
            ..FakeBackend::new()
        };
        assert!(matches!(boot_err(backend).await, BootError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_find_order_and_sync() {
        let (session, backend, _flag) = boot_with(FakeBackend::new()).await;
        session.add_item(5, 1.0, "").await.expect("add");
        let SubmitOutcome::Submitted(order) = session.submit("").await else {
            panic!("submit failed");
        };

        assert!(session.find_order(&order.reference).is_found());
        let missing = session.find_order("QRO-404");
        assert_eq!(
            missing,
            OrderLookup::NotFound {
                reference: "QRO-404".into()
            }
        );
        assert_eq!(missing.or_placeholder().reference, "QRO-404");

        // A line added elsewhere shows up after a sync.
        backend.add_to_cart(5, 2.0, "").await.expect("external add");
        let footer = session.sync_orders().await.expect("sync");
        assert_eq!(footer.state, FooterState::AddingMore);
        assert_eq!(session.cart()[0].qty, 2.0);
        assert_eq!(session.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_open_product_and_end() {
        let (session, _backend, flag) = boot_with(FakeBackend::new()).await;
        assert!(session.open_product(99).is_none());
        assert_eq!(session.current_overlay(), None);

        let product = session.open_product(5).expect("product");
        assert_eq!(product.name, "Gyoza");
        assert_eq!(session.current_overlay(), Some(Overlay::Product));
        session.with_overlays(|ctl| assert!(!ctl.surface().action_bar_visible));

        session.status_chip_clicked();
        session.end();
        assert_eq!(session.current_overlay(), None);
        assert!(!flag.is_set());
        assert!(session.current_toast().is_none());
        session.with_overlays(|ctl| assert!(ctl.surface().action_bar_visible));
    }

    #[test]
    fn test_settings_from_config() {
        let config = RelayConfig {
            load_timeout_ms: 5000,
            toast_ms: 3000,
            error_toast_ms: 1000,
            ..RelayConfig::default()
        };
        let settings = SessionSettings::from_config(&config);
        assert_eq!(settings.load_timeout, Duration::from_secs(5));
        assert_eq!(settings.order_toast, Duration::from_secs(3));
        assert_eq!(settings.toast, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_connect_boots_from_config_and_stores_access_token() {
        use crate::ordering::INIT_PATH;
        use crate::storage::MemoryStore;
        use crate::test_support::spawn_server;
        use axum::{routing::post, Json, Router};
        use serde_json::{json, Value};

        let app = Router::new().route(
            INIT_PATH,
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["params"]["table_token"], "tbl-1");
                assert_eq!(body["params"]["lang"], "ja_JP");
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "result": {
                        "success": true,
                        "data": {
                            "access_token": "acc-9",
                            "table": { "name": "A3" },
                            "current_order": []
                        }
                    }
                }))
            }),
        );
        let config = RelayConfig {
            backend_url: spawn_server(app).await,
            table_token: "tbl-1".into(),
            lang: "ja_JP".into(),
            ..RelayConfig::default()
        };

        let store = MemoryStore::default();
        let (ctl, _flag) = overlays();
        let session = OrderSession::<HttpOrderingBackend, _, _>::connect(&config, ctl, &store)
            .await
            .expect("connect");
        assert_eq!(session.table_name(), "A3");
        assert_eq!(store.get(KEY_ACCESS_TOKEN).as_deref(), Some("acc-9"));

        // A failing store does not fail the boot.
        let store = MemoryStore::failing();
        let (ctl, _flag) = overlays();
        let session = OrderSession::<HttpOrderingBackend, _, _>::connect(&config, ctl, &store).await;
        assert!(session.is_ok());
        assert_eq!(store.get(KEY_ACCESS_TOKEN), None);

        let missing_token = RelayConfig {
            table_token: String::new(),
            ..config.clone()
        };
        let (ctl, _flag) = overlays();
        let store = MemoryStore::default();
        let err = match OrderSession::<HttpOrderingBackend, _, _>::connect(&missing_token, ctl, &store)
            .await
        {
            Ok(_) => panic!("boot unexpectedly succeeded"),
            Err(e) => e,
        };
        assert_eq!(err, BootError::MissingTableToken);
    }
}
