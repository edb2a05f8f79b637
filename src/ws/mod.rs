pub mod codec;
pub mod listeners;
pub mod planroom;
pub mod rooms;
pub mod transport;
pub mod wsclient;

pub use listeners::{EventKind, ListenerHandle};
pub use planroom::{ClientTimings, ConnectionInfo, PlanRoomClient, RealtimeConfig};
pub use transport::{ConnectionState, OutboundEvent, Transport, TransportError, TransportEvent, TransportLink};
pub use wsclient::WsTransport;
