//! Cart and order records as the ordering backend serialises them.
//!
//! Parsing is lenient: Odoo sends `false` for empty relations, omits amounts
//! on older builds and mixes cart lines with submitted ones, so records are
//! read field by field from `serde_json::Value` rather than derived.

use serde::Serialize;
use serde_json::Value;

use crate::{value_f64, value_i64, value_str};

// ---------------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------------

/// One line of the shared cart. `line_id` is assigned by the backend when the
/// item is added; the cart is never edited locally.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub line_id: i64,
    pub product_id: i64,
    pub name: String,
    pub price: f64,
    pub qty: f64,
    pub note: String,
}

impl CartItem {
    fn from_line(line: &OrderLine) -> Option<Self> {
        Some(Self {
            line_id: line.id?,
            product_id: line.product_id.unwrap_or_default(),
            name: line.product_name.clone(),
            price: line.price_unit,
            qty: line.qty,
            note: line.note.clone(),
        })
    }

    pub fn amount(&self) -> f64 {
        self.price * self.qty
    }
}

pub fn cart_quantity(cart: &[CartItem]) -> f64 {
    cart.iter().map(|item| item.qty).sum()
}

/// Cart value before tax. Exactly zero for an empty cart.
pub fn cart_amount(cart: &[CartItem]) -> f64 {
    if cart.is_empty() {
        return 0.0;
    }
    cart.iter().map(CartItem::amount).sum()
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderState {
    Cart,
    Ordered,
    Cooking,
    Serving,
    Paid,
    Cancelled,
    Other(String),
}

impl Serialize for OrderState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl OrderState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Cart => "cart",
            Self::Ordered => "ordered",
            Self::Cooking => "cooking",
            Self::Serving => "serving",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Other(raw) => raw,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "cart" => Self::Cart,
            "ordered" | "submitted" => Self::Ordered,
            "cooking" => Self::Cooking,
            "serving" => Self::Serving,
            "paid" | "done" => Self::Paid,
            "cancelled" | "cancel" => Self::Cancelled,
            other => Self::Other(other.to_string()),
        }
    }

    /// Anything that is not a cart, paid or cancelled counts as active.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Cart | Self::Paid | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub id: Option<i64>,
    pub product_id: Option<i64>,
    pub product_name: String,
    pub qty: f64,
    pub price_unit: f64,
    pub note: String,
    /// `pending` while the line sits in the cart.
    pub state: String,
}

impl OrderLine {
    pub fn from_value(v: &Value) -> Self {
        Self {
            id: value_i64(v, &["id"]),
            product_id: value_i64(v, &["product_id"]),
            product_name: value_str(v, &["product_name", "name"]).unwrap_or_default(),
            qty: value_f64(v, &["qty"]).unwrap_or(0.0),
            price_unit: value_f64(v, &["price_unit", "price"]).unwrap_or(0.0),
            note: value_str(v, &["note"]).unwrap_or_default(),
            state: value_str(v, &["state"]).unwrap_or_else(|| "pending".into()),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == "pending"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Option<i64>,
    pub reference: String,
    pub state: OrderState,
    pub pos_order_name: Option<String>,
    pub amount_untaxed: f64,
    pub amount_tax: f64,
    pub amount_total_incl: f64,
    /// Legacy pre-tax total, the fallback for the amounts above.
    pub total_amount: f64,
    pub total_qty: f64,
    pub note: String,
    pub order_time: Option<String>,
    pub lines: Vec<OrderLine>,
}

impl Order {
    pub fn from_value(v: &Value) -> Self {
        let lines = v
            .get("lines")
            .and_then(Value::as_array)
            .map(|lines| lines.iter().map(OrderLine::from_value).collect())
            .unwrap_or_default();
        Self {
            id: value_i64(v, &["id"]),
            reference: value_str(v, &["name"]).unwrap_or_default(),
            state: OrderState::parse(&value_str(v, &["state"]).unwrap_or_default()),
            pos_order_name: value_str(v, &["pos_order_name"]),
            amount_untaxed: value_f64(v, &["amount_untaxed"]).unwrap_or(0.0),
            amount_tax: value_f64(v, &["amount_tax"]).unwrap_or(0.0),
            amount_total_incl: value_f64(v, &["amount_total_incl"]).unwrap_or(0.0),
            total_amount: value_f64(v, &["total_amount"]).unwrap_or(0.0),
            total_qty: value_f64(v, &["total_qty"]).unwrap_or(0.0),
            note: value_str(v, &["note"]).unwrap_or_default(),
            order_time: value_str(v, &["order_time"]),
            lines,
        }
    }

    /// Minimal stand-in for an order that could not be found. Never produced
    /// implicitly; callers opt in through [`OrderLookup::or_placeholder`].
    pub fn placeholder(reference: &str) -> Self {
        Self {
            id: None,
            reference: reference.to_string(),
            state: OrderState::Ordered,
            pos_order_name: None,
            amount_untaxed: 0.0,
            amount_tax: 0.0,
            amount_total_incl: 0.0,
            total_amount: 0.0,
            total_qty: 0.0,
            note: String::new(),
            order_time: None,
            lines: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Tax-inclusive total, falling back to the legacy total when absent.
    pub fn total_incl(&self) -> f64 {
        nonzero_or(self.amount_total_incl, self.total_amount)
    }

    pub fn total_untaxed(&self) -> f64 {
        nonzero_or(self.amount_untaxed, self.total_amount)
    }

    /// Lines still in the cart, as cart items.
    pub fn cart_items(&self) -> Vec<CartItem> {
        self.lines
            .iter()
            .filter(|line| line.is_pending())
            .filter_map(CartItem::from_line)
            .collect()
    }

    /// Display reference: the last dash-separated segment, or the last six
    /// characters when there is no dash.
    pub fn short_ref(&self) -> String {
        short_order_ref(&self.reference)
    }
}

fn nonzero_or(value: f64, fallback: f64) -> f64 {
    if value != 0.0 {
        value
    } else {
        fallback
    }
}

pub fn short_order_ref(reference: &str) -> String {
    let reference = reference.trim();
    if reference.is_empty() {
        return "---".into();
    }
    if let Some((_, tail)) = reference.rsplit_once('-') {
        if !tail.is_empty() {
            return tail.to_string();
        }
    }
    let chars: Vec<char> = reference.chars().collect();
    let start = chars.len().saturating_sub(6);
    chars[start..].iter().collect()
}

/// Parse a list of serialised orders, skipping anything that is not an object.
pub fn orders_from_value(v: &Value) -> Vec<Order> {
    v.as_array()
        .map(|orders| {
            orders
                .iter()
                .filter(|o| o.is_object())
                .map(Order::from_value)
                .collect()
        })
        .unwrap_or_default()
}

/// Result of looking an order up by reference.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderLookup {
    Found(Order),
    NotFound { reference: String },
}

impl OrderLookup {
    pub fn found(self) -> Option<Order> {
        match self {
            Self::Found(order) => Some(order),
            Self::NotFound { .. } => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// The found order, or a [`Order::placeholder`] for the looked-up reference.
    pub fn or_placeholder(self) -> Order {
        match self {
            Self::Found(order) => order,
            Self::NotFound { reference } => Order::placeholder(&reference),
        }
    }
}

// ---------------------------------------------------------------------------
// Menu
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MenuCategory {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuProduct {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Menu {
    pub categories: Vec<MenuCategory>,
    pub products: Vec<MenuProduct>,
}

impl Menu {
    pub fn from_value(v: &Value) -> Self {
        let items = |key: &str| -> Vec<Value> {
            v.get(key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };
        Self {
            categories: items("categories")
                .iter()
                .filter_map(|c| {
                    Some(MenuCategory {
                        id: value_i64(c, &["id"])?,
                        name: value_str(c, &["name"]).unwrap_or_default(),
                    })
                })
                .collect(),
            products: items("products")
                .iter()
                .filter_map(|p| {
                    Some(MenuProduct {
                        id: value_i64(p, &["id"])?,
                        name: value_str(p, &["name", "display_name"]).unwrap_or_default(),
                        price: value_f64(p, &["price", "list_price"]).unwrap_or(0.0),
                        category_id: value_i64(p, &["category_id", "pos_categ_id"]),
                    })
                })
                .collect(),
        }
    }

    pub fn product(&self, id: i64) -> Option<&MenuProduct> {
        self.products.iter().find(|p| p.id == id)
    }
}
