//! Configuration module for the quote server

use std::env;

use crate::products;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP quote endpoint listens on
    pub listen_port: u16,

    /// REST API base URL for order book snapshots
    pub api_url: String,

    /// WebSocket feed URL
    pub websocket_url: String,

    /// Product ids to maintain live order books for
    pub products: Vec<String>,

    /// Capacity of each feed subscriber endpoint
    pub feed_buffer: usize,

    /// How long the feed reader waits on a full subscriber endpoint before
    /// dropping the subscriber
    pub send_timeout_ms: u64,

    /// REST client timeout
    pub request_timeout_secs: u64,

    /// Dropped-message count that triggers an automatic reset. Unset means
    /// gaps are only counted and logged.
    pub resync_dropped_threshold: Option<i64>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let products: Vec<String> = env::var("PRODUCTS")
            .unwrap_or_else(|_| products::PRODUCT_IDS.join(","))
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            products,
            listen_port: env::var("LISTEN_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),
            api_url: env::var("API_URL").unwrap_or_else(|_| "https://api.gdax.com".to_string()),
            websocket_url: env::var("WEBSOCKET_URL")
                .unwrap_or_else(|_| "wss://ws-feed.gdax.com".to_string()),
            feed_buffer: env::var("FEED_BUFFER")
                .unwrap_or_else(|_| "256".to_string())
                .parse()
                .unwrap_or(256),
            send_timeout_ms: env::var("SEND_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(5000),
            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            resync_dropped_threshold: env::var("RESYNC_DROPPED_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok()),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 3000,
            api_url: "https://api.gdax.com".to_string(),
            websocket_url: "wss://ws-feed.gdax.com".to_string(),
            products: products::PRODUCT_IDS.iter().map(|s| s.to_string()).collect(),
            feed_buffer: 256,
            send_timeout_ms: 5000,
            request_timeout_secs: 10,
            resync_dropped_threshold: None,
        }
    }
}
