use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// One normalized transaction line from a commission report.
///
/// Numeric measures are parsed and clamped to zero; dimension strings are
/// trimmed. Cells that did not map to any canonical column are preserved in
/// `extra` keyed by their original header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionFacts {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub product: String,
    pub platform: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub sub_id1: Option<String>,
    pub order_id: Option<String>,
    pub product_id: Option<String>,
    pub revenue: f64,
    pub commission: f64,
    pub cost: f64,
    pub quantity: i64,
    pub extra: BTreeMap<String, String>,
}

impl TransactionFacts {
    /// Derived measure persisted alongside the summed columns.
    pub fn profit(&self) -> f64 {
        self.revenue - self.commission - self.cost
    }
}

/// One normalized line from an ad-click log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickFacts {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub channel: String,
    pub sub_id: Option<String>,
    pub clicks: i64,
    pub extra: BTreeMap<String, String>,
}

/// A normalized source row, tagged by record shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedRow {
    Transaction(TransactionFacts),
    Click(ClickFacts),
}

/// An aggregated transaction fact ready for upsert, one per distinct
/// dimension key per processing unit. `row_hash` is unique per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub product: String,
    pub platform: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub sub_id1: Option<String>,
    pub order_id: Option<String>,
    pub product_id: Option<String>,
    pub revenue: f64,
    pub commission: f64,
    pub cost: f64,
    pub profit: f64,
    pub quantity: i64,
    pub row_hash: String,
}

/// An aggregated click fact ready for upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickRecord {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub channel: String,
    pub sub_id: Option<String>,
    pub clicks: i64,
    pub row_hash: String,
}
