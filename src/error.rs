//! Error types for the quote server

use thiserror::Error;

/// Quote server errors
#[derive(Error, Debug)]
pub enum QuoteError {
    #[error("received invalid order book side: {0}")]
    InvalidSide(String),

    #[error("invalid action {0}")]
    InvalidAction(String),

    #[error("not enough {0} available to fill order")]
    InsufficientLiquidity(String),

    #[error("amount must be a positive number")]
    InvalidAmount,

    #[error("invalid currency pair")]
    InvalidCurrencyPair,

    #[error("{0} is not a valid product id")]
    InvalidProduct(String),

    #[error("order book for {0} is not ready")]
    NotReady(String),

    #[error("order book request failed with status {status}")]
    SnapshotStatus { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for QuoteError {
    fn from(err: reqwest::Error) -> Self {
        QuoteError::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for QuoteError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        QuoteError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for QuoteError {
    fn from(err: serde_json::Error) -> Self {
        QuoteError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QuoteError>;
