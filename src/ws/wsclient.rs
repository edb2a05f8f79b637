use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::codec::{Packet, SocketPacket};
use super::transport::{ConnectFuture, OutboundEvent, Transport, TransportError, TransportEvent, TransportLink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const SOCKET_PATH: &str = "/socket.io/?EIO=4&transport=websocket";

/// Liveness window announced by the server in its open packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl Heartbeat {
    pub fn from_open(open: &Value) -> Self {
        let millis = |key: &str, default: u64| {
            Duration::from_millis(open.get(key).and_then(Value::as_u64).unwrap_or(default))
        };
        Self {
            ping_interval: millis("pingInterval", 25_000),
            ping_timeout: millis("pingTimeout", 20_000),
        }
    }

    /// Longest silence tolerated before the server counts as gone
    pub fn deadline(&self) -> Duration {
        self.ping_interval + self.ping_timeout
    }
}

/// Websocket transport speaking the Socket.IO text protocol
#[derive(Debug, Clone)]
pub struct WsTransport {
    base_url: String,
    bearer_token: Option<String>,
}

impl WsTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: None,
        }
    }

    /// Authenticate the upgrade request. Browsers send the session cookie;
    /// native callers present the backend token instead.
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> Result<String, TransportError> {
        let base = if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if self.base_url.starts_with("ws://") || self.base_url.starts_with("wss://") {
            self.base_url.clone()
        } else {
            return Err(TransportError::InvalidUrl(self.base_url.clone()));
        };
        Ok(format!("{}{}", base, SOCKET_PATH))
    }

    async fn open(&self) -> Result<TransportLink, TransportError> {
        let url = self.endpoint()?;
        let mut request = url.as_str().into_client_request()?;
        if let Some(token) = &self.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| TransportError::Handshake("bearer token is not a valid header value".to_string()))?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }

        info!("Socket: connecting {}", url);
        let (ws, _response) = tokio_tungstenite::connect_async(request).await?;
        let (mut sink, mut source) = ws.split();

        // Engine.IO open packet comes first
        let heartbeat = match source.next().await {
            Some(Ok(Message::Text(text))) => match Packet::decode(text.as_str())? {
                Packet::Open(open) => {
                    debug!("Socket: engine open {}", open);
                    Heartbeat::from_open(&open)
                }
                other => {
                    return Err(TransportError::Handshake(format!("expected open packet, got {:?}", other)));
                }
            },
            Some(Ok(other)) => {
                return Err(TransportError::Handshake(format!("unexpected frame {:?}", other)));
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err(TransportError::Closed),
        };

        send_packet(&mut sink, &Packet::Message(SocketPacket::Connect(None))).await?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(sink, source, heartbeat, out_rx, in_tx));

        Ok(TransportLink { outgoing: out_tx, incoming: in_rx })
    }
}

impl Transport for WsTransport {
    fn connect(&self) -> ConnectFuture<'_> {
        Box::pin(self.open())
    }
}

async fn send_packet(sink: &mut WsSink, packet: &Packet) -> Result<(), TransportError> {
    sink.send(Message::Text(packet.encode().into())).await?;
    Ok(())
}

/// Moves frames between the socket and the client until either side goes away.
async fn pump(
    mut sink: WsSink,
    mut source: WsSource,
    heartbeat: Heartbeat,
    mut outgoing: mpsc::UnboundedReceiver<OutboundEvent>,
    incoming: mpsc::UnboundedSender<TransportEvent>,
) {
    let silence = heartbeat.deadline();
    let idle = tokio::time::sleep(silence);
    tokio::pin!(idle);

    let reason = loop {
        tokio::select! {
            () = &mut idle => {
                warn!("Socket: no ping from server within {:?}", silence);
                break "ping timeout".to_string();
            }
            frame = source.next() => {
                idle.as_mut().reset(Instant::now() + silence);
                let text = match frame {
                    None => break "transport close".to_string(),
                    Some(Err(e)) => break format!("transport error: {}", e),
                    Some(Ok(Message::Close(_))) => break "transport close".to_string(),
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                };
                let packet = match Packet::decode(text.as_str()) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!("Socket: dropping malformed frame: {}", e);
                        continue;
                    }
                };
                match packet {
                    Packet::Ping => {
                        if let Err(e) = send_packet(&mut sink, &Packet::Pong).await {
                            break format!("pong failed: {}", e);
                        }
                    }
                    Packet::Close => break "server close".to_string(),
                    Packet::Open(_) | Packet::Pong | Packet::Noop => {}
                    Packet::Message(SocketPacket::Connect(payload)) => {
                        let sid = payload
                            .as_ref()
                            .and_then(|v| v.get("sid"))
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        let _ = incoming.send(TransportEvent::Connected { sid });
                    }
                    Packet::Message(SocketPacket::Disconnect) => break "io server disconnect".to_string(),
                    Packet::Message(SocketPacket::ConnectError(payload)) => {
                        error!("Socket: connect_error {}", payload);
                        break format!("connect_error: {}", payload);
                    }
                    Packet::Message(SocketPacket::Event { name, data, .. }) => {
                        let data = data.into_iter().next().unwrap_or(Value::Null);
                        let _ = incoming.send(TransportEvent::Event { name, data });
                    }
                    Packet::Message(SocketPacket::Ack { id, data }) => {
                        let data = data.into_iter().next();
                        let _ = incoming.send(TransportEvent::Ack { id, data });
                    }
                }
            }
            event = outgoing.recv() => {
                match event {
                    Some(event) => {
                        let packet = Packet::event(&event.name, event.data, event.ack);
                        if let Err(e) = send_packet(&mut sink, &packet).await {
                            break format!("send failed: {}", e);
                        }
                    }
                    None => {
                        let _ = send_packet(&mut sink, &Packet::Message(SocketPacket::Disconnect)).await;
                        let _ = sink.close().await;
                        break "io client disconnect".to_string();
                    }
                }
            }
        }
    };
    debug!("Socket: transport finished ({})", reason);
    let _ = incoming.send(TransportEvent::Closed { reason });
}
