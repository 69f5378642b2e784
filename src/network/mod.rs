//! Network Layer
//!
//! Encoding, message dispatch and transports. Everything here is plumbing
//! around `sync/`: it decides nothing about movement.

pub mod peer;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod udp;
pub mod wire;

pub use peer::{ClientPeer, Role, ServerPeer};
pub use protocol::{Datagram, EntityId, Message, MessageHandler, MessageKind};
pub use session::{EntityReport, LoopbackSession};
pub use transport::{LinkConditions, LinkEndpoint, LinkStats, LossyLink, Transport, TransportError};
pub use udp::UdpTransport;
pub use wire::{Wire, WireError};
