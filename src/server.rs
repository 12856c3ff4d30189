//! HTTP surface: the quote endpoint plus health and metrics
//!
//! `POST /quote` takes `{action, base_currency, quote_currency, amount}`,
//! resolves the product and quote direction, and answers with price and
//! total formatted to the quote currency's precision. Other methods on the
//! path get a 405 with `Allow: POST` from the method router.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{QuoteError, Result};
use crate::metrics;
use crate::orderbook::{BUY_ACTION, SELL_ACTION};
use crate::products;
use crate::AppState;

/// Parameters for producing a quote, decoded from the request body
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteRequest {
    pub action: String,
    pub base_currency: String,
    pub quote_currency: String,
    pub amount: String,
}

/// A price quote for a quantity of a product
#[derive(Debug, Clone, Serialize)]
pub struct QuoteResponse {
    pub price: String,
    pub total: String,
    pub currency: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/quote", post(handle_quote))
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

async fn handle_quote(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<QuoteRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.to_string()),
    };

    match quote(&state, &request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(status_for(&err), err.to_string()),
    }
}

async fn quote(state: &AppState, request: &QuoteRequest) -> Result<QuoteResponse> {
    if request.action != BUY_ACTION && request.action != SELL_ACTION {
        return Err(QuoteError::InvalidAction(request.action.clone()));
    }

    let amount: f64 = request
        .amount
        .parse()
        .map_err(|_| QuoteError::InvalidAmount)?;
    if amount <= 0.0 {
        return Err(QuoteError::InvalidAmount);
    }

    let (product_id, action, inverse) =
        resolve_route(&request.action, &request.base_currency, &request.quote_currency)?;

    let book = state
        .registry
        .get(&product_id)
        .ok_or_else(|| QuoteError::InvalidProduct(product_id.clone()))?;

    let result = book
        .quote(&action, &request.quote_currency, amount, inverse)
        .await;
    let outcome = if result.is_ok() { "ok" } else { "error" };
    metrics::QUOTES
        .with_label_values(&[&product_id, outcome])
        .inc();
    let (price, total) = result?;

    let precision = products::currency_precision(&request.quote_currency).max(0) as usize;
    Ok(QuoteResponse {
        price: format_amount(price, precision),
        total: format_amount(total, precision),
        currency: request.quote_currency.clone(),
    })
}

/// Resolve the product id for a currency pair and the direction to walk
/// its book. When the pair arrives quoted against the product's base (the
/// canonical id doesn't start with the requested base currency), the quote
/// is inverse and the action flips.
fn resolve_route(action: &str, base_currency: &str, quote_currency: &str) -> Result<(String, String, bool)> {
    let product_id = products::product_id_for_pair(base_currency, quote_currency)
        .ok_or(QuoteError::InvalidCurrencyPair)?;

    let mut inverse = false;
    let mut action = action.to_string();
    if &product_id[..3] != base_currency {
        inverse = true;
        action = if action == BUY_ACTION {
            SELL_ACTION.to_string()
        } else {
            BUY_ACTION.to_string()
        };
    }

    Ok((product_id, action, inverse))
}

fn format_amount(value: f64, precision: usize) -> String {
    format!("{value:.precision$}")
}

fn status_for(err: &QuoteError) -> StatusCode {
    match err {
        QuoteError::InvalidSide(_)
        | QuoteError::InvalidAction(_)
        | QuoteError::InsufficientLiquidity(_)
        | QuoteError::InvalidAmount
        | QuoteError::InvalidCurrencyPair
        | QuoteError::InvalidProduct(_) => StatusCode::BAD_REQUEST,
        QuoteError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
        .into_response()
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let books: serde_json::Map<String, serde_json::Value> = state
        .registry
        .books()
        .map(|book| {
            (
                book.product_id().to_string(),
                serde_json::Value::String(book.phase().as_str().to_string()),
            )
        })
        .collect();
    let status = if state.registry.not_running().is_empty() {
        "healthy"
    } else {
        "degraded"
    };

    Json(serde_json::json!({
        "status": status,
        "component": "quote-server",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "books": books,
    }))
}

async fn render_metrics() -> String {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Log one line per request with a short trace id and the round trip time
async fn log_requests(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let trace_id = format!(
        "{:016x}",
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64
    );
    let method = request.method().clone();
    let uri = request.uri().clone();
    info!(trace_id = %trace_id, "==> {method} {uri}");

    let response = next.run(request).await;

    info!(
        trace_id = %trace_id,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "<== {method} {uri}"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_route_canonical_pair() {
        let (product_id, action, inverse) = resolve_route("buy", "BTC", "USD").unwrap();
        assert_eq!(product_id, "BTC-USD");
        assert_eq!(action, "buy");
        assert!(!inverse);
    }

    #[test]
    fn test_resolve_route_inverse_flips_action() {
        let (product_id, action, inverse) = resolve_route("buy", "USD", "BTC").unwrap();
        assert_eq!(product_id, "BTC-USD");
        assert_eq!(action, "sell");
        assert!(inverse);

        let (product_id, action, inverse) = resolve_route("sell", "USD", "BTC").unwrap();
        assert_eq!(product_id, "BTC-USD");
        assert_eq!(action, "buy");
        assert!(inverse);
    }

    #[test]
    fn test_resolve_route_crypto_pair() {
        let (product_id, action, inverse) = resolve_route("sell", "LTC", "BTC").unwrap();
        assert_eq!(product_id, "LTC-BTC");
        assert_eq!(action, "sell");
        assert!(!inverse);

        let (product_id, action, inverse) = resolve_route("buy", "BTC", "ETH").unwrap();
        assert_eq!(product_id, "ETH-BTC");
        assert_eq!(action, "sell");
        assert!(inverse);
    }

    #[test]
    fn test_resolve_route_rejects_unknown_pair() {
        let err = resolve_route("buy", "USD", "EUR").unwrap_err();
        assert!(matches!(err, QuoteError::InvalidCurrencyPair));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(50.01, 2), "50.01");
        assert_eq!(format_amount(100.02, 2), "100.02");
        assert_eq!(format_amount(50.0, 8), "50.00000000");
        assert_eq!(format_amount(11254.5, 2), "11254.50");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&QuoteError::InvalidAmount),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&QuoteError::InsufficientLiquidity("USD".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&QuoteError::NotReady("BTC-USD".to_string())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&QuoteError::Transport("boom".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
