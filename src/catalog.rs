//! Inventory and menu domain: supply items with derived pricing, stock
//! levels with a change ledger, and recipes with cost/price variations.
//!
//! Field names serialize in the remote store's original camelCase shape so
//! records written here stay readable by the existing front end.

use crate::model::Record;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Goods-and-services tax applied on top of the purchase price.
pub const GST_RATE: f64 = 0.08;

// ---------------------------------------------------------------------------
// Supply

/// Operator-entered fields of a raw-material supply item.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplyForm {
    pub name: String,
    /// Purchase price for one unit (e.g. one sack).
    pub price: f64,
    /// Unit size in its measure (e.g. grams per sack).
    pub size: f64,
    /// How much measure one product (serving) consumes.
    pub measure_per_product: f64,
}

/// A supply item with its derived pricing. Always built through
/// [`SupplyItem::from_form`] so the derived fields stay consistent with
/// the entered ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplyItem {
    pub name: String,
    pub price: f64,
    pub size: f64,
    pub measure_per_product: f64,
    #[serde(rename = "priceWithGST")]
    pub price_with_gst: f64,
    pub products_per_unit: f64,
    pub price_per_product: f64,
    pub created_at: DateTime<Utc>,
}

impl SupplyItem {
    pub fn from_form(form: SupplyForm, now: DateTime<Utc>) -> Result<SupplyItem> {
        if form.name.trim().is_empty() {
            return Err(anyhow!("supply item needs a name"));
        }
        if form.price < 0.0 || form.size <= 0.0 || form.measure_per_product <= 0.0 {
            return Err(anyhow!("supply item needs positive size and measure"));
        }
        let price_with_gst = form.price * (1.0 + GST_RATE);
        let products_per_unit = form.size / form.measure_per_product;
        let price_per_product = price_with_gst / products_per_unit;
        Ok(SupplyItem {
            name: form.name,
            price: form.price,
            size: form.size,
            measure_per_product: form.measure_per_product,
            price_with_gst,
            products_per_unit,
            price_per_product,
            created_at: now,
        })
    }
}

/// Case-insensitive lookup by display name, the way the entry forms
/// reference supply items.
pub fn find_supply<'a>(supplies: &'a [SupplyItem], name: &str) -> Option<&'a SupplyItem> {
    supplies
        .iter()
        .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
}

// ---------------------------------------------------------------------------
// Stock

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLogEntry {
    pub action: String,
    pub amount: f64,
    pub date: DateTime<Utc>,
    pub note: String,
}

/// Stock level for one supply item, with an append-only change ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockItem {
    pub supply_item_id: String,
    pub supply_item_name: String,
    pub amount_in_stock: f64,
    pub amount_used: f64,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub change_log: Vec<StockLogEntry>,
}

impl StockItem {
    pub fn new(supply_item_id: &str, supply_item_name: &str, amount: f64, now: DateTime<Utc>) -> StockItem {
        StockItem {
            supply_item_id: supply_item_id.to_string(),
            supply_item_name: supply_item_name.to_string(),
            amount_in_stock: amount,
            amount_used: 0.0,
            created_at: now,
            last_updated: now,
            change_log: vec![StockLogEntry {
                action: "added".into(),
                amount,
                date: now,
                note: format!("Added {amount} units"),
            }],
        }
    }

    /// Merge a delivery into the existing level.
    pub fn record_addition(&mut self, amount: f64, now: DateTime<Utc>) {
        self.amount_in_stock += amount;
        self.last_updated = now;
        self.change_log.push(StockLogEntry {
            action: "added".into(),
            amount,
            date: now,
            note: format!("Added {amount} units"),
        });
    }

    /// Take stock out of the level; refuses to go below zero.
    pub fn record_usage(&mut self, amount: f64, now: DateTime<Utc>) -> Result<()> {
        if amount <= 0.0 {
            return Err(anyhow!("usage amount must be positive"));
        }
        if amount > self.amount_in_stock {
            return Err(anyhow!(
                "cannot use {amount} units; only {} in stock",
                self.amount_in_stock
            ));
        }
        self.amount_in_stock -= amount;
        self.amount_used += amount;
        self.last_updated = now;
        self.change_log.push(StockLogEntry {
            action: "used".into(),
            amount,
            date: now,
            note: format!("Used {amount} units"),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Recipes

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeItem {
    pub item_id: String,
    pub item_name: String,
    pub measure: f64,
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariationAction {
    Substitute,
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationChange {
    pub action: VariationAction,
    #[serde(default)]
    pub original_item: String,
    #[serde(default)]
    pub new_item: String,
    pub measure: f64,
}

/// A priced variant of a recipe (e.g. "Large", "Extra cheese"), described
/// as a list of ingredient changes against the base recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub name: String,
    pub selling_price: f64,
    pub cost_adjustment: f64,
    pub total_cost: f64,
    pub changes: Vec<VariationChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub name: String,
    pub category: String,
    pub selling_price: f64,
    pub total_cost: f64,
    pub items: Vec<RecipeItem>,
    #[serde(default)]
    pub variations: Vec<Variation>,
    pub created_at: DateTime<Utc>,
}

impl Recipe {
    pub fn margin(&self) -> f64 {
        self.selling_price - self.total_cost
    }
}

/// Resolve `(ingredient name, measure)` pairs against the supply list.
/// Unknown ingredients are skipped, as in the entry form.
pub fn build_recipe_items(supplies: &[SupplyItem], lines: &[(String, f64)]) -> Vec<RecipeItem> {
    lines
        .iter()
        .filter(|(name, measure)| !name.trim().is_empty() && *measure > 0.0)
        .filter_map(|(name, measure)| {
            let Some(supply) = find_supply(supplies, name) else {
                warn!(ingredient = %name, "ingredient not in supply list; skipped");
                return None;
            };
            Some(RecipeItem {
                item_id: supply.name.clone(),
                item_name: supply.name.clone(),
                measure: *measure,
                cost: supply.price_per_product * measure,
            })
        })
        .collect()
}

pub fn recipe_total_cost(items: &[RecipeItem]) -> f64 {
    items.iter().map(|item| item.cost).sum()
}

/// Cost delta of a variation against the base recipe: substitutions count
/// the difference between new and original ingredient, additions add,
/// removals subtract. Changes referencing unknown ingredients contribute
/// nothing.
pub fn variation_cost_adjustment(supplies: &[SupplyItem], changes: &[VariationChange]) -> f64 {
    let mut adjustment = 0.0;
    for change in changes {
        if change.measure <= 0.0 {
            continue;
        }
        match change.action {
            VariationAction::Substitute => {
                let original = find_supply(supplies, &change.original_item);
                let new = find_supply(supplies, &change.new_item);
                if let (Some(original), Some(new)) = (original, new) {
                    let original_cost = original.price_per_product * change.measure;
                    let new_cost = new.price_per_product * change.measure;
                    adjustment += new_cost - original_cost;
                }
            }
            VariationAction::Add => {
                if let Some(supply) = find_supply(supplies, &change.new_item) {
                    adjustment += supply.price_per_product * change.measure;
                }
            }
            VariationAction::Remove => {
                if let Some(supply) = find_supply(supplies, &change.original_item) {
                    adjustment -= supply.price_per_product * change.measure;
                }
            }
        }
    }
    adjustment
}

/// Assemble a variation, pricing its changes against the supply list.
pub fn build_variation(
    supplies: &[SupplyItem],
    base_cost: f64,
    name: &str,
    selling_price: f64,
    changes: Vec<VariationChange>,
) -> Variation {
    let cost_adjustment = variation_cost_adjustment(supplies, &changes);
    Variation {
        name: name.to_string(),
        selling_price,
        cost_adjustment,
        total_cost: base_cost + cost_adjustment,
        changes,
    }
}

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+").expect("valid word pattern"));

/// Menu names are stored Title Cased: first letter of each word upper,
/// rest lower, whitespace preserved.
pub fn normalize_recipe_name(name: &str) -> String {
    WORD.replace_all(name, |caps: &regex::Captures<'_>| {
        let word = &caps[0];
        let mut chars = word.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
            None => String::new(),
        }
    })
    .into_owned()
}

// ---------------------------------------------------------------------------
// Record payload mapping

/// Serialize a domain value into the opaque field map the sync layer
/// stores and ships.
pub fn to_payload<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("expected an object payload, got {other}")),
    }
}

/// Read a domain value back out of a cached/remote record. Records whose
/// shape no longer matches read as `None` rather than failing the caller.
pub fn from_record<T: DeserializeOwned>(record: &Record) -> Option<T> {
    match serde_json::from_value(Value::Object(record.fields.clone())) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(id = record.id.as_str(), ?err, "record does not match expected shape");
            None
        }
    }
}
