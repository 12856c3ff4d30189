//! Quote server library
//!
//! Maintains live limit-order books for a fixed set of exchange products
//! and serves synchronous price quotes against them. Each book reconciles
//! an HTTP level-3 snapshot with the streaming feed, and the quote walk
//! answers "what does it cost to buy or sell this amount at current
//! depth".

pub mod config;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod orderbook;
pub mod parser;
pub mod products;
pub mod rest;
pub mod server;

pub use config::Config;
pub use error::{QuoteError, Result};
pub use feed::Feed;
pub use orderbook::{Book, BookEntry, LiveBook, Phase, Registry, Side};
pub use parser::{Event, EventType, RawBook};
pub use rest::ApiClient;

/// Application state shared across request handlers
pub struct AppState {
    pub registry: Registry,
    pub config: Config,
}
