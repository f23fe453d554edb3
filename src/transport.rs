//! Message transport underneath a connection
//!
//! The client only ever exchanges UTF-8 JSON text frames. A [`Transport`]
//! opens a duplex [`TransportLink`]; the link closing (the inbound receiver
//! yielding `None`) is the disconnect signal. Firing or dropping `close`
//! tears the link down from the client side.

use crate::error::{RemoteError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// Both halves of an open transport.
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
    pub close: oneshot::Sender<()>,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<TransportLink>;
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<TransportLink> {
        let (ws_stream, response) = connect_async(url)
            .await
            .map_err(|e| RemoteError::Transport(format!("WebSocket connect failed: {e}")))?;
        debug!("websocket {} upgraded with status {}", url, response.status());

        let (mut sink, mut stream) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (close_tx, mut close_rx) = oneshot::channel::<()>();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let writer_url = url.to_string();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = &mut close_rx => {
                        debug!("websocket {} closing", writer_url);
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    Some(text) = outbound_rx.recv() => Message::Text(text),
                    Some(data) = pong_rx.recv() => Message::Pong(data),
                    else => break,
                };
                if let Err(e) = sink.send(message).await {
                    warn!("websocket {} write failed: {}", writer_url, e);
                    break;
                }
            }
            let _ = sink.close().await;
            let _ = stop_tx.send(true);
        });

        let reader_url = url.to_string();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    frame = stream.next() => frame,
                    _ = stop_rx.changed() => break,
                };
                let Some(frame) = frame else {
                    break;
                };
                match frame {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = pong_tx.send(data);
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("websocket {} read failed: {}", reader_url, e);
                        break;
                    }
                }
            }
            debug!("websocket {} reader finished", reader_url);
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
            close: close_tx,
        })
    }
}
