//! Core order book implementation
//!
//! Entries live in a slab arena and are referenced by stable keys from two
//! views: price-sorted bid/ask ladders and an order-id index. Lookups by id
//! are O(1); ladder maintenance is O(n) on the mutated side.

use std::collections::HashMap;

use slab::Slab;

use super::{Side, BUY_ACTION, SELL_ACTION};
use crate::error::{QuoteError, Result};
use crate::parser::RawBook;
use crate::products;

/// One resting limit order
#[derive(Debug, Clone)]
pub struct BookEntry {
    pub price: f64,
    pub size: f64,
    pub order_id: String,
    pub side: Side,
}

/// Snapshot of resting orders for one product
#[derive(Debug)]
pub struct Book {
    /// Last applied event sequence
    sequence: i64,
    entries: Slab<BookEntry>,
    /// Bid keys, price descending
    bids: Vec<usize>,
    /// Ask keys, price ascending
    asks: Vec<usize>,
    /// order_id -> slab key
    index: HashMap<String, usize>,
}

impl Book {
    /// Create an empty book at the given sequence
    pub fn new(sequence: i64) -> Self {
        Self {
            sequence,
            entries: Slab::new(),
            bids: Vec::new(),
            asks: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build a book from a level-3 REST snapshot. The exchange returns each
    /// side already sorted, so ladder order is taken as-is.
    pub fn from_raw(raw: &RawBook) -> Result<Self> {
        let mut book = Book::new(raw.sequence);

        for (raw_entries, side) in [(&raw.bids, Side::Bid), (&raw.asks, Side::Ask)] {
            for raw_entry in raw_entries {
                let order_id = raw_entry.order_id().ok_or_else(|| {
                    QuoteError::Decode("level 3 book entry is missing an order id".to_string())
                })?;
                let key = book.entries.insert(BookEntry {
                    price: raw_entry.price()?,
                    size: raw_entry.size()?,
                    order_id: order_id.to_string(),
                    side,
                });
                book.index.insert(order_id.to_string(), key);
                match side {
                    Side::Bid => book.bids.push(key),
                    Side::Ask => book.asks.push(key),
                }
            }
        }

        Ok(book)
    }

    pub const fn sequence(&self) -> i64 {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: i64) {
        self.sequence = sequence;
    }

    /// Look up an entry by order id
    pub fn find(&self, order_id: &str) -> Option<&BookEntry> {
        self.index.get(order_id).map(|&key| &self.entries[key])
    }

    /// Add a new order, keeping the side's price-sorted order: the entry is
    /// placed before the first incumbent it beats on price, or appended.
    /// Re-inserting an existing order id is the caller's bug.
    pub fn insert(&mut self, side: &str, price: f64, size: f64, order_id: &str) -> Result<()> {
        let side = Side::parse(side)?;
        let key = self.entries.insert(BookEntry {
            price,
            size,
            order_id: order_id.to_string(),
            side,
        });
        self.index.insert(order_id.to_string(), key);

        let entries = &self.entries;
        let ladder = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        let position = ladder
            .iter()
            .position(|&incumbent| match side {
                Side::Bid => price > entries[incumbent].price,
                Side::Ask => price < entries[incumbent].price,
            })
            .unwrap_or(ladder.len());
        ladder.insert(position, key);

        Ok(())
    }

    /// Remove the order with the given id. Unknown ids are a no-op; the
    /// matching open may have preceded the snapshot cut.
    pub fn delete(&mut self, order_id: &str) {
        let Some(key) = self.index.remove(order_id) else {
            return;
        };
        let ladder = match self.entries[key].side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        if let Some(position) = ladder.iter().position(|&k| k == key) {
            ladder.remove(position);
        }
        self.entries.remove(key);
    }

    /// Subtract a matched size from an existing order. A size that reaches 0
    /// is left in place; the exchange sends a subsequent done that deletes
    /// it. Unknown ids are a no-op.
    pub fn match_size(&mut self, maker_order_id: &str, size: f64) {
        if let Some(&key) = self.index.get(maker_order_id) {
            self.entries[key].size -= size;
        }
    }

    /// Set the size of an existing order. Unknown ids are a no-op.
    pub fn change(&mut self, order_id: &str, new_size: f64) {
        if let Some(&key) = self.index.get(order_id) {
            self.entries[key].size = new_size;
        }
    }

    /// Bid entries, best (highest) price first
    pub fn bids(&self) -> impl Iterator<Item = &BookEntry> {
        self.bids.iter().map(|&key| &self.entries[key])
    }

    /// Ask entries, best (lowest) price first
    pub fn asks(&self) -> impl Iterator<Item = &BookEntry> {
        self.asks.iter().map(|&key| &self.entries[key])
    }

    /// Number of entries per side
    pub fn depth(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    /// Tally entries until the requested amount is met, back out the
    /// overage against the last visited price, and round to the quote
    /// currency's precision.
    ///
    /// `inverse` flips the meaning of `amount`: when set, it is expressed
    /// in the quote currency (spend a fixed amount) rather than the base
    /// currency (acquire a fixed quantity).
    pub fn quote(
        &self,
        action: &str,
        currency: &str,
        amount: f64,
        inverse: bool,
    ) -> Result<(f64, f64)> {
        let ladder = match action {
            BUY_ACTION => &self.asks,
            SELL_ACTION => &self.bids,
            other => return Err(QuoteError::InvalidAction(other.to_string())),
        };

        let mut total = 0.0;
        let mut quantity = 0.0;
        let mut last_price = 0.0;
        for &key in ladder {
            let entry = &self.entries[key];
            last_price = entry.price;
            total += entry.price * entry.size;
            quantity += entry.size;
            let check = if inverse { total } else { quantity };
            if check >= amount {
                break;
            }
        }

        let check = if inverse { total } else { quantity };
        if check < amount {
            return Err(QuoteError::InsufficientLiquidity(currency.to_string()));
        }

        // subtract overage from total
        let overage = quantity - amount;
        let quantity = quantity - overage;
        let total = total - overage * last_price;
        let mut price = total / quantity;

        // account for prices that are too precise for their currency
        let precision = products::currency_precision(currency);
        let rounded = round(price, precision);
        let difference = price - rounded;
        price -= difference;
        let total = round(price * quantity, precision);

        Ok((price, total))
    }
}

fn round(f: f64, places: i32) -> f64 {
    let shift = 10f64.powi(places);
    (f * shift + 0.5).floor() / shift
}
