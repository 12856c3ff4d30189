//! WebSocket transport to the exchange feed
//!
//! Handles connection, the subscription frame, and frame reception.

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::error::{QuoteError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Serialize)]
struct SubscribeFrame<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    product_ids: &'a [String],
}

/// A connected feed transport
pub struct FeedTransport {
    stream: Option<WsStream>,
}

impl FeedTransport {
    /// Connect to the feed and subscribe to the given products
    pub async fn connect(url: &str, product_ids: &[String]) -> Result<Self> {
        info!(url = %url, "connecting to exchange feed");

        let (mut stream, response) = connect_async(url).await?;
        info!(status = ?response.status(), "feed connected");

        let frame = serde_json::to_string(&SubscribeFrame {
            kind: "subscribe",
            product_ids,
        })?;
        stream.send(Message::Text(frame)).await?;

        Ok(Self {
            stream: Some(stream),
        })
    }

    /// Receive the next data frame. Returns `Ok(None)` for control frames.
    /// A close frame or end of stream is terminal.
    pub async fn recv(&mut self) -> Result<Option<String>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| QuoteError::Transport("feed is not connected".to_string()))?;

        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(len = text.len(), "received feed frame");
                Ok(Some(text))
            }
            Some(Ok(Message::Binary(data))) => {
                let text = String::from_utf8_lossy(&data).to_string();
                Ok(Some(text))
            }
            Some(Ok(Message::Ping(data))) => {
                debug!("received ping, sending pong");
                if let Some(stream) = self.stream.as_mut() {
                    let _ = stream.send(Message::Pong(data)).await;
                }
                Ok(None)
            }
            Some(Ok(Message::Pong(_))) => Ok(None),
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "received close frame");
                self.stream = None;
                Err(QuoteError::Transport("feed connection closed".to_string()))
            }
            Some(Ok(Message::Frame(_))) => Ok(None),
            Some(Err(e)) => {
                self.stream = None;
                Err(QuoteError::from(e))
            }
            None => {
                self.stream = None;
                Err(QuoteError::Transport("feed stream ended".to_string()))
            }
        }
    }

    /// Close the connection
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}
