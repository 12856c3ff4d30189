//! Order book module
//!
//! Maintains synchronized order book state from the exchange feed and
//! serves price quotes against it.

mod book;
mod live;
mod registry;

pub use book::{Book, BookEntry};
pub use live::{LiveBook, Phase};
pub use registry::Registry;

use crate::error::{QuoteError, Result};

/// Quote actions, as they appear in requests
pub const BUY_ACTION: &str = "buy";
pub const SELL_ACTION: &str = "sell";

/// Side of the order book. The exchange labels resting bids "buy" and
/// resting asks "sell" on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Parse a wire-format side label
    pub fn parse(side: &str) -> Result<Self> {
        match side {
            "buy" => Ok(Side::Bid),
            "sell" => Ok(Side::Ask),
            other => Err(QuoteError::InvalidSide(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "buy",
            Side::Ask => "sell",
        }
    }
}
