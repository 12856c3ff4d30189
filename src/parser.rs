//! Parser module for exchange wire formats
//!
//! Handles deserialization of streaming feed events and REST order book
//! snapshots. Decimal fields arrive as strings and stay strings here; the
//! live book parses the ones it needs when applying an event.

use serde::Deserialize;

use crate::error::{QuoteError, Result};

/// Streaming event kind. Only `open`, `done`, `match` and `change` mutate
/// the book; everything else passes through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Received,
    Open,
    Done,
    Match,
    Change,
    MarginProfileUpdate,
    Heartbeat,
    Error,
    #[serde(other)]
    Unknown,
}

impl Default for EventType {
    fn default() -> Self {
        EventType::Unknown
    }
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Received => "received",
            EventType::Open => "open",
            EventType::Done => "done",
            EventType::Match => "match",
            EventType::Change => "change",
            EventType::MarginProfileUpdate => "margin_profile_update",
            EventType::Heartbeat => "heartbeat",
            EventType::Error => "error",
            EventType::Unknown => "unknown",
        }
    }
}

/// One streaming feed message
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Event {
    #[serde(rename = "type", default)]
    pub kind: EventType,

    #[serde(default)]
    pub sequence: i64,

    #[serde(default)]
    pub product_id: String,

    #[serde(default)]
    pub order_id: String,

    #[serde(default)]
    pub maker_order_id: String,

    #[serde(default)]
    pub taker_order_id: String,

    #[serde(default)]
    pub side: String,

    #[serde(default)]
    pub price: String,

    #[serde(default)]
    pub size: String,

    #[serde(default)]
    pub remaining_size: String,

    #[serde(default)]
    pub new_size: String,

    #[serde(default)]
    pub old_size: String,

    #[serde(default)]
    pub funds: String,

    #[serde(default)]
    pub order_type: String,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub time: String,

    #[serde(default)]
    pub trade_id: i64,

    #[serde(default)]
    pub message: String,
}

impl Event {
    /// Parse a raw feed frame
    pub fn parse(raw: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Third slot of a snapshot 3-tuple: an order id string at level 3, an
/// aggregated order count at levels 1 and 2.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EntryMeta {
    OrderId(String),
    NumOrders(f64),
}

/// One `[price, size, order_id | num_orders]` tuple from the snapshot body
#[derive(Debug, Clone, Deserialize)]
pub struct RawEntry(pub String, pub String, pub EntryMeta);

impl RawEntry {
    pub fn price(&self) -> Result<f64> {
        parse_decimal(&self.0, "price")
    }

    pub fn size(&self) -> Result<f64> {
        parse_decimal(&self.1, "size")
    }

    /// The order id, present only in level-3 books
    pub fn order_id(&self) -> Option<&str> {
        match &self.2 {
            EntryMeta::OrderId(id) => Some(id),
            EntryMeta::NumOrders(_) => None,
        }
    }
}

/// Order book snapshot as returned by the REST API
#[derive(Debug, Clone, Deserialize)]
pub struct RawBook {
    pub sequence: i64,
    pub bids: Vec<RawEntry>,
    pub asks: Vec<RawEntry>,
}

/// Parse a decimal string field, naming the field on failure
pub fn parse_decimal(value: &str, field: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|_| QuoteError::Decode(format!("error parsing float from {field} ({value})")))
}
