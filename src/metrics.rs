//! Prometheus counters, registered on the default registry and rendered by
//! the /metrics endpoint.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec,
};

/// Book-mutating events applied, by product and event type
pub static EVENTS_APPLIED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "book_events_applied_total",
        "Book-mutating feed events applied",
        &["product", "type"]
    )
    .expect("book_events_applied_total")
});

/// Feed messages missed, detected from sequence gaps
pub static DROPPED_MESSAGES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_dropped_messages_total",
        "Feed messages missed, detected from sequence gaps",
        &["product"]
    )
    .expect("feed_dropped_messages_total")
});

/// Feed frames that failed to decode
pub static DECODE_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "feed_decode_errors_total",
        "Feed frames that failed to decode"
    )
    .expect("feed_decode_errors_total")
});

/// Quotes served, by product and outcome
pub static QUOTES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "quotes_total",
        "Quote requests served, by product and outcome",
        &["product", "status"]
    )
    .expect("quotes_total")
});
