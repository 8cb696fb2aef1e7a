pub mod connection;
pub mod ice;
pub mod state;
pub mod transport;
pub mod types;

pub use connection::{WebRtcTransport, WebRtcTransportFactory};
pub use transport::{
    LinkState, PeerTransport, SessionId, TransportEvent, TransportEventKind, TransportEvents,
    TransportFactory,
};
pub use types::{ChatState, ConnectionStatus, IceCandidate, IceServerConfig, SessionDescription};
