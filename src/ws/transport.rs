use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;

use super::codec::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// What the transport reports back to the client
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Server acknowledged the connect; events may flow from now on
    Connected { sid: Option<String> },
    Event { name: String, data: Value },
    Ack { id: u64, data: Option<Value> },
    /// Terminal. Nothing follows on this link.
    Closed { reason: String },
}

/// A named event to put on the wire, optionally expecting an ack
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub name: String,
    pub data: Value,
    pub ack: Option<u64>,
}

/// One live duplex link. Dropping `outgoing` asks the transport to close.
pub struct TransportLink {
    pub outgoing: mpsc::UnboundedSender<OutboundEvent>,
    pub incoming: mpsc::UnboundedReceiver<TransportEvent>,
}

pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<TransportLink, TransportError>> + Send + 'a>>;

/// Opens links to the realtime endpoint.
///
/// `connect` resolves once the underlying socket is open; the server's
/// connect acknowledgment arrives later as [`TransportEvent::Connected`].
pub trait Transport: Send + Sync + 'static {
    fn connect(&self) -> ConnectFuture<'_>;
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("invalid realtime url '{0}'")]
    InvalidUrl(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("protocol error: {0}")]
    Codec(#[from] CodecError),
    #[error("realtime endpoint unavailable: {0}")]
    Unavailable(String),
    #[error("connection closed")]
    Closed,
    #[error("no async runtime available to hold the connection")]
    NoRuntime,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(e))
    }
}
