//! WebSocket connection from a participant to the hub.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::signal::{ClientMessage, ServerMessage};
use crate::{Error, Result};

/// Channel pair bridged to a hub socket by two background tasks
pub struct SignalClient {
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    pub inbound: mpsc::UnboundedReceiver<ServerMessage>,
}

impl SignalClient {
    /// Connect to `url` (e.g. `ws://host:3000/ws`) and start the writer
    /// and reader tasks. Dropping `outbound` closes the socket.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to signalling hub: {}", url);
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocketError(format!("failed to connect to {}: {}", url, e)))?;
        let (mut write, mut read) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerMessage>();

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!("Failed to send to hub: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
            debug!("Signalling writer stopped");
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                        Ok(message) => {
                            if in_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring frame from hub: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        info!("Hub closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Signalling socket error: {}", e);
                        break;
                    }
                }
            }
            debug!("Signalling reader stopped");
        });

        Ok(Self {
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    pub fn send(&self, message: ClientMessage) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| Error::WebSocketError("hub connection closed".to_string()))
    }

    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.inbound.recv().await
    }

    pub fn split(
        self,
    ) -> (
        mpsc::UnboundedSender<ClientMessage>,
        mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        (self.outbound, self.inbound)
    }
}
