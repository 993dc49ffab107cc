//! WebSocket transport for the wire protocol.
//!
//! The engine talks to the socket through the `Transport` trait so tests can
//! drive it over in-memory channels. The production implementation wraps
//! `tokio-tungstenite`.

pub mod framer;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::WaError;

/// WebSocket endpoints for the web client.
pub mod endpoints {
    pub const MAIN: &str = "wss://web.whatsapp.com/ws";
    pub const FALLBACK: &str = "wss://w1.web.whatsapp.com/ws";
    pub const ORIGIN: &str = "https://web.whatsapp.com";
}

/// One raw frame on the wire, before tag parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// A connected socket carrying wire frames.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: WireFrame) -> Result<(), WaError>;

    /// Next inbound frame, or `None` once the socket is closed.
    async fn recv(&mut self) -> Option<WireFrame>;

    async fn close(&mut self);
}

/// Establishes a fresh `Transport` for each connection attempt.
#[async_trait]
pub trait Dial: Send + Sync {
    async fn dial(&self) -> Result<Box<dyn Transport>, WaError>;
}

/// Production transport over `tokio-tungstenite`.
pub struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: WireFrame) -> Result<(), WaError> {
        let message = match frame {
            WireFrame::Text(s) => Message::Text(s.into()),
            WireFrame::Binary(b) => Message::Binary(b.into()),
        };
        self.ws
            .send(message)
            .await
            .map_err(|e| WaError::Socket(e.to_string()))
    }

    async fn recv(&mut self) -> Option<WireFrame> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(t)) => return Some(WireFrame::Text(t.as_str().to_owned())),
                Ok(Message::Binary(b)) => return Some(WireFrame::Binary(b.to_vec())),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!(error = %e, "websocket close failed");
        }
    }
}

/// Dialer for the production endpoints.
pub struct WsDialer {
    url: String,
}

impl WsDialer {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for WsDialer {
    fn default() -> Self {
        Self::new(endpoints::MAIN)
    }
}

#[async_trait]
impl Dial for WsDialer {
    async fn dial(&self) -> Result<Box<dyn Transport>, WaError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| WaError::Socket(e.to_string()))?;
        request
            .headers_mut()
            .insert("Origin", HeaderValue::from_static(endpoints::ORIGIN));

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| WaError::Socket(e.to_string()))?;

        Ok(Box::new(WsTransport { ws }))
    }
}
