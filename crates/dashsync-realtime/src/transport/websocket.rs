//! WebSocket transport
//!
//! Opens a WebSocket, then splits it into a writer task (outbound control
//! messages, JSON-encoded) and a reader task (decoded frames forwarded as
//! [`ChannelSignal`]s). Dropping the handle's outbound sender sends a close
//! frame and ends both tasks.

use std::time::Duration;

use async_trait::async_trait;
use dashsync_core::{ConnectionConfig, OutboundMessage};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::codec::{self, InboundFrame};
use super::{ChannelHandle, ChannelSignal, Transport, TransportError};

/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebSocketTransport {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(config.url.clone()).with_timeout(config.connect_timeout())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<ChannelHandle, TransportError> {
        debug!(url = %self.url, "[WebSocketTransport] Opening channel");

        let (stream, _response) = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        info!(url = %self.url, "[WebSocketTransport] Channel open");

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<ChannelSignal>();

        let writer_signals = inbound_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let text = match codec::encode(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(
                            message_type = message.type_name(),
                            "[WebSocketTransport] Failed to encode outbound message: {}", e
                        );
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    let _ = writer_signals.send(ChannelSignal::Error(TransportError::Send(
                        e.to_string(),
                    )));
                    return;
                }
            }

            // Owner dropped the channel
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
            debug!("[WebSocketTransport] Writer closed");
        });

        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let signal = match frame {
                    Ok(Message::Text(text)) => match codec::decode(text.as_str()) {
                        Ok(InboundFrame::Event(event)) => ChannelSignal::Event(event),
                        Ok(InboundFrame::Pong) => ChannelSignal::Pong,
                        Err(e) => {
                            warn!("[WebSocketTransport] Dropping undecodable frame: {}", e);
                            continue;
                        }
                    },
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => ChannelSignal::Pong,
                    Ok(Message::Binary(data)) => {
                        debug!(bytes = data.len(), "[WebSocketTransport] Ignoring binary frame");
                        continue;
                    }
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty());
                        let _ = inbound_tx.send(ChannelSignal::Closed { reason });
                        return;
                    }
                    Ok(Message::Frame(_)) => continue,
                    Err(e) => {
                        let _ = inbound_tx
                            .send(ChannelSignal::Error(TransportError::Protocol(e.to_string())));
                        return;
                    }
                };

                if inbound_tx.send(signal).is_err() {
                    // Owner discarded the channel
                    return;
                }
            }

            let _ = inbound_tx.send(ChannelSignal::Closed { reason: None });
        });

        Ok(ChannelHandle::new(outbound_tx, inbound_rx))
    }

    fn description(&self) -> String {
        format!("websocket {}", self.url)
    }
}
