//! Footer state machine.
//!
//! The action bar is a pure function of the cart and the order history,
//! recomputed on every change:
//!
//! | state | cart | active order | primary | secondary | chip |
//! |---|---|---|---|---|---|
//! | A | empty | no | submit (disabled) | none | none |
//! | B | items | no | submit | view cart | none |
//! | C | empty | yes | go to pay | view order | order ref |
//! | D | items | yes | add to order | view cart | can add more |

use serde::Serialize;

use crate::cart::{cart_amount, cart_quantity, short_order_ref, CartItem, Order};
use crate::overlay::Overlay;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FooterState {
    /// Nothing selected, nothing ordered.
    #[serde(rename = "A")]
    Browsing,
    #[serde(rename = "B")]
    Selecting,
    #[serde(rename = "C")]
    Ordered,
    #[serde(rename = "D")]
    AddingMore,
}

impl FooterState {
    pub fn letter(self) -> char {
        match self {
            Self::Browsing => 'A',
            Self::Selecting => 'B',
            Self::Ordered => 'C',
            Self::AddingMore => 'D',
        }
    }
}

/// Total over `(cart quantity, has active order)`.
pub fn classify(cart_qty: f64, has_active_order: bool) -> FooterState {
    let has_items = cart_qty > 0.0;
    match (has_items, has_active_order) {
        (false, false) => FooterState::Browsing,
        (true, false) => FooterState::Selecting,
        (false, true) => FooterState::Ordered,
        (true, true) => FooterState::AddingMore,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryAction {
    SubmitOrder,
    GoPay,
    AddOrder,
}

impl PrimaryAction {
    /// Message key for the label.
    pub fn label_key(self) -> &'static str {
        match self {
            Self::SubmitOrder => "submit_order",
            Self::GoPay => "go_pay",
            Self::AddOrder => "add_order",
        }
    }

    /// Overlay the button opens. Submission itself happens from the cart.
    pub fn target(self) -> Overlay {
        match self {
            Self::SubmitOrder | Self::AddOrder => Overlay::Cart,
            Self::GoPay => Overlay::Pay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryAction {
    ViewCart,
    ViewOrder,
}

impl SecondaryAction {
    pub fn label_key(self) -> &'static str {
        match self {
            Self::ViewCart => "view_cart",
            Self::ViewOrder => "view_order",
        }
    }

    pub fn target(self) -> Overlay {
        match self {
            Self::ViewCart => Overlay::Cart,
            Self::ViewOrder => Overlay::Order,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusChip {
    /// "Ordered #0031".
    Ordered { order_ref: String, short_ref: String },
    /// "Can add more"; still tied to the order being added to.
    CanAddMore { order_ref: String },
}

impl StatusChip {
    pub fn order_ref(&self) -> &str {
        match self {
            Self::Ordered { order_ref, .. } | Self::CanAddMore { order_ref } => order_ref,
        }
    }

    pub fn can_add(&self) -> bool {
        matches!(self, Self::CanAddMore { .. })
    }
}

/// Aggregates over every active order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotals {
    pub incl_tax: f64,
    pub tax: f64,
    pub untaxed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FooterView {
    pub state: FooterState,
    pub primary: PrimaryAction,
    pub primary_enabled: bool,
    pub secondary: Option<SecondaryAction>,
    pub status: Option<StatusChip>,
    /// `select_items` in state A.
    pub hint: Option<&'static str>,
    pub cart_qty: f64,
    pub cart_amount: f64,
    /// Reference of the most recent active order, empty when there is none.
    pub order_ref: String,
    pub totals: OrderTotals,
}

/// Derive the footer from the cart and the order history (newest first).
pub fn derive_footer(cart: &[CartItem], orders: &[Order]) -> FooterView {
    let cart_qty = cart_quantity(cart);
    let active: Vec<&Order> = orders.iter().filter(|o| o.is_active()).collect();
    let order_ref = active
        .first()
        .map(|o| o.reference.clone())
        .unwrap_or_default();

    let totals = active.iter().fold(OrderTotals::default(), |acc, o| OrderTotals {
        incl_tax: acc.incl_tax + o.total_incl(),
        tax: acc.tax + o.amount_tax,
        untaxed: acc.untaxed + o.total_untaxed(),
    });

    let state = classify(cart_qty, !active.is_empty());
    let (primary, primary_enabled, secondary, status, hint) = match state {
        FooterState::Browsing => (
            PrimaryAction::SubmitOrder,
            false,
            None,
            None,
            Some("select_items"),
        ),
        FooterState::Selecting => (
            PrimaryAction::SubmitOrder,
            true,
            Some(SecondaryAction::ViewCart),
            None,
            None,
        ),
        FooterState::Ordered => (
            PrimaryAction::GoPay,
            true,
            Some(SecondaryAction::ViewOrder),
            Some(StatusChip::Ordered {
                short_ref: short_order_ref(&order_ref),
                order_ref: order_ref.clone(),
            }),
            None,
        ),
        FooterState::AddingMore => (
            PrimaryAction::AddOrder,
            true,
            Some(SecondaryAction::ViewCart),
            Some(StatusChip::CanAddMore {
                order_ref: order_ref.clone(),
            }),
            None,
        ),
    };

    FooterView {
        state,
        primary,
        primary_enabled,
        secondary,
        status,
        hint,
        cart_qty,
        cart_amount: cart_amount(cart),
        order_ref,
        totals,
    }
}
