//! Feed fan-out
//!
//! One reader task decodes frames from the transport and delivers each
//! event to every subscriber over a bounded endpoint. Delivery is
//! serialized with the reader, so a slow subscriber applies backpressure
//! to the others; one that stays stalled past the send timeout is dropped
//! rather than blocking the feed indefinitely.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::client::FeedTransport;
use crate::error::Result;
use crate::metrics;
use crate::parser::Event;

struct Subscriber {
    name: String,
    endpoint: mpsc::Sender<Event>,
}

/// Fan-out over a single exchange feed connection
pub struct Feed {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    shutdown: watch::Sender<bool>,
    buffer: usize,
    _reader: JoinHandle<()>,
}

impl Feed {
    /// Connect to the feed, subscribe to the given products, and spawn the
    /// reader task.
    pub async fn open(
        url: &str,
        product_ids: &[String],
        buffer: usize,
        send_timeout: Duration,
    ) -> Result<Self> {
        let transport = FeedTransport::connect(url, product_ids).await?;
        let subscribers = Arc::new(Mutex::new(Vec::new()));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let reader = tokio::spawn(read_loop(
            transport,
            subscribers.clone(),
            shutdown_rx,
            send_timeout,
        ));

        Ok(Self {
            subscribers,
            shutdown,
            buffer,
            _reader: reader,
        })
    }

    /// Add a delivery endpoint. Delivery begins with the next event read
    /// from the transport.
    pub async fn subscribe(&self, name: &str) -> mpsc::Receiver<Event> {
        let (endpoint, events) = mpsc::channel(self.buffer);
        self.subscribers.lock().await.push(Subscriber {
            name: name.to_string(),
            endpoint,
        });
        events
    }

    /// Stop the reader and close every subscriber endpoint
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn read_loop(
    mut transport: FeedTransport,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    mut shutdown: watch::Receiver<bool>,
    send_timeout: Duration,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = transport.recv() => match frame {
                Ok(Some(text)) => {
                    let event = match Event::parse(&text) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %e, "error decoding feed frame");
                            metrics::DECODE_ERRORS.inc();
                            continue;
                        }
                    };
                    deliver(&subscribers, event, send_timeout).await;
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "feed read failed, closing subscribers");
                    break;
                }
            }
        }
    }

    transport.close().await;
    // dropping the endpoints ends every subscriber's receive loop
    subscribers.lock().await.clear();
    info!("feed reader stopped");
}

async fn deliver(
    subscribers: &Mutex<Vec<Subscriber>>,
    event: Event,
    send_timeout: Duration,
) {
    let mut subscribers = subscribers.lock().await;
    let mut stalled = Vec::new();

    for (i, subscriber) in subscribers.iter().enumerate() {
        match subscriber.endpoint.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                match tokio::time::timeout(send_timeout, subscriber.endpoint.send(event)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => stalled.push(i),
                    Err(_) => {
                        warn!(
                            subscriber = %subscriber.name,
                            "dropping stalled feed subscriber"
                        );
                        stalled.push(i);
                    }
                }
            }
            Err(TrySendError::Closed(_)) => stalled.push(i),
        }
    }

    for i in stalled.into_iter().rev() {
        subscribers.remove(i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_event(sequence: i64) -> Event {
        Event {
            kind: crate::parser::EventType::Open,
            sequence,
            product_id: "BTC-USD".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_deliver_reaches_every_subscriber() {
        let subscribers = Mutex::new(Vec::new());
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        subscribers.lock().await.push(Subscriber {
            name: "a".to_string(),
            endpoint: tx_a,
        });
        subscribers.lock().await.push(Subscriber {
            name: "b".to_string(),
            endpoint: tx_b,
        });

        deliver(&subscribers, open_event(1), Duration::from_millis(50)).await;
        deliver(&subscribers, open_event(2), Duration::from_millis(50)).await;

        assert_eq!(rx_a.recv().await.unwrap().sequence, 1);
        assert_eq!(rx_a.recv().await.unwrap().sequence, 2);
        assert_eq!(rx_b.recv().await.unwrap().sequence, 1);
        assert_eq!(rx_b.recv().await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_stalled_subscriber_is_dropped() {
        let subscribers = Mutex::new(Vec::new());
        // hold the receiver but never drain it
        let (tx_slow, _rx_slow) = mpsc::channel(1);
        let (tx_live, mut rx_live) = mpsc::channel(4);
        subscribers.lock().await.push(Subscriber {
            name: "slow".to_string(),
            endpoint: tx_slow,
        });
        subscribers.lock().await.push(Subscriber {
            name: "live".to_string(),
            endpoint: tx_live,
        });

        // first event fills the slow endpoint, second stalls it past the
        // timeout and gets it dropped
        deliver(&subscribers, open_event(1), Duration::from_millis(10)).await;
        deliver(&subscribers, open_event(2), Duration::from_millis(10)).await;

        assert_eq!(subscribers.lock().await.len(), 1);
        assert_eq!(subscribers.lock().await[0].name, "live");
        assert_eq!(rx_live.recv().await.unwrap().sequence, 1);
        assert_eq!(rx_live.recv().await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_removed() {
        let subscribers = Mutex::new(Vec::new());
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        subscribers.lock().await.push(Subscriber {
            name: "gone".to_string(),
            endpoint: tx,
        });

        deliver(&subscribers, open_event(1), Duration::from_millis(10)).await;

        assert!(subscribers.lock().await.is_empty());
    }
}
