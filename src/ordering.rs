//! Order/cart boundary.
//!
//! Every call is a JSON-RPC request carrying the table token, the session
//! access token (once known) and the display language. Cart mutations answer
//! with the authoritative cart snapshot; the caller replaces its cart with it
//! instead of patching local state.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::api::{check_success, RpcClient};
use crate::cart::{orders_from_value, CartItem, Menu, Order, OrderState};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};

pub const INIT_PATH: &str = "/qr/api/init";
pub const CART_ADD_PATH: &str = "/qr/api/cart/add";
pub const CART_UPDATE_PATH: &str = "/qr/api/cart/update";
pub const ORDER_SUBMIT_PATH: &str = "/qr/api/order/submit";
pub const ORDER_STATUS_PATH: &str = "/qr/api/order/status";

/// Everything the session needs to start.
#[derive(Debug, Clone, PartialEq)]
pub struct InitData {
    pub access_token: Option<String>,
    pub table_name: String,
    pub session_state: Option<String>,
    pub menu: Menu,
    /// Newest first, the open cart order included.
    pub orders: Vec<Order>,
    pub trace_id: Option<String>,
}

impl InitData {
    /// Pending lines of the open cart order, if any.
    pub fn cart(&self) -> Vec<CartItem> {
        self.orders
            .iter()
            .find(|o| o.state == OrderState::Cart)
            .map(Order::cart_items)
            .unwrap_or_default()
    }

    /// Orders without the cart order.
    pub fn history(&self) -> Vec<Order> {
        self.orders
            .iter()
            .filter(|o| o.state != OrderState::Cart)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderStatus {
    pub orders: Vec<Order>,
    pub session_state: Option<String>,
}

#[async_trait]
pub trait OrderingBackend: Send + Sync {
    /// Token printed in the table's QR code. Empty when the link carried none.
    fn table_token(&self) -> &str;

    async fn init(&self) -> Result<InitData>;

    /// Add `qty` of a product (negative to decrement). Returns the cart order.
    async fn add_to_cart(&self, product_id: i64, qty: f64, note: &str) -> Result<Order>;

    /// Set a cart line's quantity; `qty <= 0` removes the line.
    async fn update_cart_line(&self, line_id: i64, qty: f64) -> Result<Order>;

    /// Submit the cart. Returns the created order.
    async fn submit_order(&self, note: &str) -> Result<Order>;

    async fn order_status(&self) -> Result<OrderStatus>;
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

pub struct HttpOrderingBackend {
    rpc: Arc<RpcClient>,
    table_token: String,
    access_token: Mutex<Option<String>>,
    lang: String,
}

impl HttpOrderingBackend {
    pub fn new(
        rpc: Arc<RpcClient>,
        table_token: impl Into<String>,
        access_token: Option<String>,
        lang: impl Into<String>,
    ) -> Self {
        Self {
            rpc,
            table_token: table_token.into(),
            access_token: Mutex::new(access_token.filter(|t| !t.is_empty())),
            lang: lang.into(),
        }
    }

    /// Backend for the table named in `config`.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let rpc = RpcClient::new(&config.backend_url, config.request_timeout())?;
        Ok(Self::new(
            Arc::new(rpc),
            config.table_token.trim(),
            config.access_token.clone(),
            config.lang.clone(),
        ))
    }

    /// Session access token, as configured or as handed out by `init`.
    pub fn access_token(&self) -> Option<String> {
        self.access_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn params(&self, extra: Value) -> Value {
        let mut params = Map::new();
        params.insert("table_token".into(), json!(self.table_token));
        if let Some(token) = self.access_token() {
            params.insert("access_token".into(), json!(token));
        }
        params.insert("lang".into(), json!(self.lang));
        if let Value::Object(extra) = extra {
            params.extend(extra);
        }
        Value::Object(params)
    }

    /// Call and return the `data` member of a successful result.
    async fn call_data(&self, path: &str, extra: Value) -> Result<Value> {
        let result = self.rpc.call_value(path, self.params(extra)).await?;
        check_success(&result)?;
        Ok(result.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn call_order(&self, path: &str, extra: Value) -> Result<Order> {
        let data = self.call_data(path, extra).await?;
        if !data.is_object() {
            return Err(RelayError::Decode(format!("{path}: missing order data")));
        }
        Ok(Order::from_value(&data))
    }
}

#[async_trait]
impl OrderingBackend for HttpOrderingBackend {
    fn table_token(&self) -> &str {
        &self.table_token
    }

    async fn init(&self) -> Result<InitData> {
        let result = self.rpc.call_value(INIT_PATH, self.params(json!({}))).await?;
        check_success(&result)?;
        let data = result.get("data").cloned().unwrap_or(Value::Null);

        let access_token = crate::value_str(&data, &["access_token"]);
        if let Some(token) = &access_token {
            *self.access_token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        }

        let init = InitData {
            access_token,
            table_name: data
                .get("table")
                .and_then(|t| crate::value_str(t, &["name"]))
                .unwrap_or_default(),
            session_state: data
                .get("session")
                .and_then(|s| crate::value_str(s, &["state"])),
            menu: data.get("menu").map(Menu::from_value).unwrap_or_default(),
            orders: data
                .get("current_order")
                .map(orders_from_value)
                .unwrap_or_default(),
            trace_id: crate::value_str(&result, &["trace_id"]),
        };
        info!(
            table = %init.table_name,
            products = init.menu.products.len(),
            orders = init.orders.len(),
            "Ordering session initialised"
        );
        Ok(init)
    }

    async fn add_to_cart(&self, product_id: i64, qty: f64, note: &str) -> Result<Order> {
        debug!(product_id, qty, "cart add");
        self.call_order(
            CART_ADD_PATH,
            json!({ "product_id": product_id, "qty": qty, "note": note }),
        )
        .await
    }

    async fn update_cart_line(&self, line_id: i64, qty: f64) -> Result<Order> {
        debug!(line_id, qty, "cart update");
        self.call_order(CART_UPDATE_PATH, json!({ "line_id": line_id, "qty": qty }))
            .await
    }

    async fn submit_order(&self, note: &str) -> Result<Order> {
        self.call_order(ORDER_SUBMIT_PATH, json!({ "note": note }))
            .await
    }

    async fn order_status(&self) -> Result<OrderStatus> {
        let data = self.call_data(ORDER_STATUS_PATH, json!({})).await?;
        Ok(OrderStatus {
            orders: data.get("orders").map(orders_from_value).unwrap_or_default(),
            session_state: crate::value_str(&data, &["session_state"]),
        })
    }
}
