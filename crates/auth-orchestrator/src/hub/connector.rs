//! Socket seam for the hub.
//!
//! A [`WsConnector`] turns a URL into a [`WsLink`]: a pair of text
//! channels backed by a pump task that owns the actual socket. Dropping
//! the link's outbound sender closes the socket; the socket closing ends
//! the inbound receiver.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::config::OrchestratorConfig;
use crate::error::{AuthError, AuthResult};

use super::ChannelName;

/// Buffer size for each direction of a link.
const LINK_BUFFER: usize = 64;

/// Text pipes into and out of one open socket.
#[derive(Debug)]
pub struct WsLink {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

impl WsLink {
    /// Build a link together with the far ends of its channels.
    ///
    /// Returns the link plus `(outbound_rx, inbound_tx)` for whatever
    /// owns the socket.
    pub fn pair() -> (Self, mpsc::Receiver<String>, mpsc::Sender<String>) {
        let (outbound, outbound_rx) = mpsc::channel(LINK_BUFFER);
        let (inbound_tx, inbound) = mpsc::channel(LINK_BUFFER);
        (Self { outbound, inbound }, outbound_rx, inbound_tx)
    }
}

/// Opens channel sockets.
#[async_trait]
pub trait WsConnector: Send + Sync {
    async fn connect(&self, channel: ChannelName, url: &str) -> AuthResult<WsLink>;
}

/// [`WsConnector`] over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.timeouts.ws_connect_timeout_ms),
        }
    }
}

#[async_trait]
impl WsConnector for TungsteniteConnector {
    async fn connect(&self, channel: ChannelName, url: &str) -> AuthResult<WsLink> {
        let (ws, response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| AuthError::Timeout {
                millis: u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(|e| AuthError::ConnectionFailed {
                url: redact(url),
                reason: format!("WebSocket connection failed: {e}"),
            })?;

        tracing::info!(%channel, status = %response.status(), "Channel socket connected");

        let (link, outbound_rx, inbound_tx) = WsLink::pair();
        tokio::spawn(pump(ws, channel, outbound_rx, inbound_tx));
        Ok(link)
    }
}

/// Shuttle text frames between the socket and the link until either side ends.
async fn pump<S>(
    ws: S,
    channel: ChannelName,
    mut outbound_rx: mpsc::Receiver<String>,
    inbound_tx: mpsc::Sender<String>,
) where
    S: Stream<Item = Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Send
        + Unpin
        + 'static,
{
    let (mut writer, mut reader) = ws.split();

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                let Some(text) = outgoing else {
                    let _ = writer.send(Message::Close(None)).await;
                    break;
                };
                if let Err(e) = writer.send(Message::Text(text.into())).await {
                    tracing::warn!(%channel, error = %e, "Channel write failed");
                    break;
                }
            }
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if inbound_tx.send(text.as_str().to_owned()).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(%channel, "Channel socket closed by server");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(%channel, error = %e, "Channel read error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!(%channel, "Channel pump exiting");
}

/// Strip the query string so tokens never reach logs or errors.
fn redact(url: &str) -> String {
    url.split_once('?')
        .map_or_else(|| url.to_string(), |(base, _)| base.to_string())
}
