//! Point-of-sale flow: cart, checkout totals, order persistence and the
//! printed receipt.

use crate::remote::RemoteStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use tracing::warn;

/// Remote path orders are pushed under. Orders go straight to the remote
/// store; they are not part of the offline cache set.
pub const ORDERS_PATH: &str = "pos-orders";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PosSettings {
    pub tax_rate: f64,
    pub receipt_footer: String,
    pub auto_print: bool,
}

impl Default for PosSettings {
    fn default() -> Self {
        Self {
            tax_rate: 12.0,
            receipt_footer: "Thank you for dining with us!".into(),
            auto_print: false,
        }
    }
}

/// One sellable line: a recipe at its base price, or one of its priced
/// variations under a combined display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub recipe_id: String,
    pub name: String,
    pub price: f64,
    pub quantity: u32,
}

impl CartLine {
    pub fn line_total(&self) -> f64 {
        self.price * self.quantity as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Cart {
        Cart::default()
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Add one of the given item; an existing line with the same name and
    /// price just gains quantity.
    pub fn add(&mut self, recipe_id: &str, name: &str, price: f64) {
        if let Some(line) = self
            .lines
            .iter_mut()
            .find(|l| l.name == name && l.price == price)
        {
            line.quantity += 1;
            return;
        }
        self.lines.push(CartLine {
            recipe_id: recipe_id.to_string(),
            name: name.to_string(),
            price,
            quantity: 1,
        });
    }

    /// Take one of the given item out; the line disappears at zero.
    pub fn remove_one(&mut self, name: &str, price: f64) {
        if let Some(idx) = self
            .lines
            .iter()
            .position(|l| l.name == name && l.price == price)
        {
            if self.lines[idx].quantity > 1 {
                self.lines[idx].quantity -= 1;
            } else {
                self.lines.remove(idx);
            }
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn subtotal(&self) -> f64 {
        self.lines.iter().map(CartLine::line_total).sum()
    }
}

/// A completed sale as persisted under [`ORDERS_PATH`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub timestamp: i64,
    pub date: DateTime<Utc>,
    pub items: Vec<CartLine>,
    pub subtotal: f64,
    pub tax: f64,
    pub tax_rate: f64,
    pub total: f64,
    pub status: String,
}

/// Price the cart into an order at the configured tax rate.
pub fn checkout(cart: &Cart, settings: &PosSettings, now: DateTime<Utc>) -> Result<Order> {
    if cart.is_empty() {
        return Err(anyhow::anyhow!("cart is empty"));
    }
    let subtotal = cart.subtotal();
    let tax = subtotal * settings.tax_rate / 100.0;
    Ok(Order {
        timestamp: now.timestamp_millis(),
        date: now,
        items: cart.lines().to_vec(),
        subtotal,
        tax,
        tax_rate: settings.tax_rate,
        total: subtotal + tax,
        status: "completed".into(),
    })
}

/// Persist an order and return its store-assigned key.
pub async fn place_order(remote: &dyn RemoteStore, order: &Order) -> Result<String> {
    let payload = crate::catalog::to_payload(order)?;
    remote
        .create(ORDERS_PATH, &payload)
        .await
        .context("failed to save order")
}

/// All past orders, newest first. Entries that no longer parse are
/// skipped.
pub async fn order_history(remote: &dyn RemoteStore) -> Result<Vec<(String, Order)>> {
    let pairs = remote.read_all(ORDERS_PATH).await?;
    let mut orders: Vec<(String, Order)> = pairs
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value::<Order>(value) {
            Ok(order) => Some((key, order)),
            Err(err) => {
                warn!(%key, ?err, "skipping unreadable order");
                None
            }
        })
        .collect();
    orders.sort_by_key(|(_, order)| std::cmp::Reverse(order.timestamp));
    Ok(orders)
}

/// Short order reference printed on the receipt: the tail of the store
/// key, uppercased.
pub fn order_number(order_id: &str) -> String {
    let tail: String = order_id
        .chars()
        .rev()
        .take(8)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    tail.to_uppercase()
}

/// Plain-text receipt for printing.
pub fn render_receipt(order_id: &str, order: &Order, settings: &PosSettings) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "KNOX RESTAURANT");
    let _ = writeln!(out, "Point of Sale Receipt");
    let _ = writeln!(out, "{}", order.date.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "Order #: {}", order_number(order_id));
    let _ = writeln!(out);
    for item in &order.items {
        let _ = writeln!(
            out,
            "{:<24} x{:<3} ₱{:.2}",
            item.name,
            item.quantity,
            item.line_total()
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{:<28} ₱{:.2}", "Subtotal:", order.subtotal);
    let _ = writeln!(out, "{:<28} ₱{:.2}", format!("Tax ({}%):", order.tax_rate), order.tax);
    let _ = writeln!(out, "{:<28} ₱{:.2}", "TOTAL:", order.total);
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", settings.receipt_footer);
    let _ = writeln!(out, "Powered by Knox POS System");
    out
}
