//! Duplex channel to the relay server.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use anonfly_common::helpers::ws_url_with_token;
use anonfly_common::{ClientMessage, Error, Result, ServerMessage};

/// One open duplex channel.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, msg: &ClientMessage) -> Result<()>;

    /// Next inbound frame. `None` once the channel is closed.
    async fn recv(&mut self) -> Option<Result<ServerMessage>>;
}

/// Opens channels authenticated by a session token.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, token: &str) -> Result<Box<dyn Transport>>;
}

/// Websocket connector; the token travels as `?token=`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    ws_url: String,
}

impl WsConnector {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, token: &str) -> Result<Box<dyn Transport>> {
        let url = ws_url_with_token(&self.ws_url, token)?;
        debug!("Connecting to {}", self.ws_url);
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(Error::connectivity)?;
        Ok(Box::new(WsTransport { ws }))
    }
}

pub struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(msg)?;
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(Error::connectivity)
    }

    async fn recv(&mut self) -> Option<Result<ServerMessage>> {
        while let Some(msg) = self.ws.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(frame) => return Some(Ok(frame)),
                    Err(e) => warn!("Dropping malformed frame: {}", e),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(Error::connectivity(e))),
            }
        }
        None
    }
}
