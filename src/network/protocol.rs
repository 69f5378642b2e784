//! Protocol Messages
//!
//! Every datagram is one message about one entity:
//!
//! ```text
//!   u8 kind | u32 entity (LE) | payload
//! ```
//!
//! Dispatch is a plain `match` over `Message` into a `MessageHandler`.

use serde::{Serialize, Deserialize};

use crate::network::wire::{
    decode_raw, decode_report, decode_timestamp, encode_raw, encode_report, encode_timestamp,
    Wire, WireError,
};
use crate::sync::command::Command;
use crate::sync::snapshot::{Ack, Snapshot};

/// Identifies a replicated entity across peers.
pub type EntityId = u32;

/// Envelope header size in bytes.
pub const HEADER_SIZE: usize = 5;

// =============================================================================
// MESSAGE KINDS
// =============================================================================

/// Discriminant byte of a datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// Client -> server: batched unacknowledged commands.
    Commands = 1,
    /// Server -> owner: last simulated command and resulting snapshot.
    Ack = 2,
    /// Server -> observers: snapshot only.
    Snapshot = 3,
    /// Client -> server: RTT ping.
    Ping = 4,
    /// Server -> client: RTT ping echo.
    Pong = 5,
}

impl MessageKind {
    /// Stable message name.
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Commands => "commands",
            MessageKind::Ack => "ack",
            MessageKind::Snapshot => "snapshot",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = WireError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            1 => MessageKind::Commands,
            2 => MessageKind::Ack,
            3 => MessageKind::Snapshot,
            4 => MessageKind::Ping,
            5 => MessageKind::Pong,
            other => return Err(WireError::UnknownKind(other)),
        })
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

/// A decoded message body.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Unacknowledged command tail (at most 255 per message).
    Commands(Vec<Command>),
    /// Owner acknowledgement.
    Ack(Ack),
    /// Observer update.
    Snapshot(Snapshot),
    /// RTT ping carrying the client's clock.
    Ping {
        /// Client clock when sent
        client_time: f64,
    },
    /// Echo of a ping.
    Pong {
        /// Echoed client clock
        client_time: f64,
    },
}

impl Message {
    /// Kind byte for this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Commands(_) => MessageKind::Commands,
            Message::Ack(_) => MessageKind::Ack,
            Message::Snapshot(_) => MessageKind::Snapshot,
            Message::Ping { .. } => MessageKind::Ping,
            Message::Pong { .. } => MessageKind::Pong,
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, WireError> {
        match self {
            Message::Commands(commands) => encode_report(commands),
            Message::Ack(ack) => ack.to_bytes(),
            Message::Snapshot(snapshot) => snapshot.to_bytes(),
            Message::Ping { client_time } | Message::Pong { client_time } => {
                encode_timestamp(*client_time)
            }
        }
    }

    fn decode_payload(kind: MessageKind, payload: &[u8]) -> Result<Self, WireError> {
        Ok(match kind {
            MessageKind::Commands => Message::Commands(decode_report(payload)?),
            MessageKind::Ack => Message::Ack(Ack::from_bytes(payload)?),
            MessageKind::Snapshot => Message::Snapshot(Snapshot::from_bytes(payload)?),
            MessageKind::Ping => Message::Ping { client_time: decode_timestamp(payload)? },
            MessageKind::Pong => Message::Pong { client_time: decode_timestamp(payload)? },
        })
    }

    /// Hand this message, received from `from`, to the matching handler method.
    pub fn dispatch<E, H>(self, from: E, entity: EntityId, handler: &mut H)
    where
        H: MessageHandler<E> + ?Sized,
    {
        match self {
            Message::Commands(commands) => handler.on_commands(from, entity, &commands),
            Message::Ack(ack) => handler.on_ack(from, entity, ack),
            Message::Snapshot(snapshot) => handler.on_snapshot(from, entity, snapshot),
            Message::Ping { client_time } => handler.on_ping(from, entity, client_time),
            Message::Pong { client_time } => handler.on_pong(from, entity, client_time),
        }
    }
}

/// Receiver side of the protocol, generic over the sender's address type.
/// Unhandled kinds are ignored.
pub trait MessageHandler<E> {
    /// Batched commands for `entity`.
    fn on_commands(&mut self, _from: E, _entity: EntityId, _commands: &[Command]) {}
    /// Ack for an owned entity.
    fn on_ack(&mut self, _from: E, _entity: EntityId, _ack: Ack) {}
    /// Snapshot of an observed entity.
    fn on_snapshot(&mut self, _from: E, _entity: EntityId, _snapshot: Snapshot) {}
    /// Ping from a client.
    fn on_ping(&mut self, _from: E, _entity: EntityId, _client_time: f64) {}
    /// Pong from the server.
    fn on_pong(&mut self, _from: E, _entity: EntityId, _client_time: f64) {}
}

// =============================================================================
// DATAGRAM ENVELOPE
// =============================================================================

/// A message addressed to an entity.
#[derive(Clone, Debug, PartialEq)]
pub struct Datagram {
    /// Entity the message is about.
    pub entity: EntityId,
    /// Body
    pub message: Message,
}

impl Datagram {
    /// Create a datagram.
    pub fn new(entity: EntityId, message: Message) -> Self {
        Self { entity, message }
    }

    /// Encode header and payload.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let payload = self.message.encode_payload()?;
        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        encode_raw(&(self.message.kind() as u8, self.entity), &mut out)?;
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode a complete datagram.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let ((kind, entity), payload): ((u8, EntityId), _) = decode_raw(bytes, HEADER_SIZE)?;
        let kind = MessageKind::try_from(kind)?;
        let message = Message::decode_payload(kind, payload)?;
        Ok(Self { entity, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::{Quat, Vec2, Vec3};

    fn snapshot() -> Snapshot {
        Snapshot {
            time: 2.0,
            position: Vec3::new(1.0, 0.0, -1.0),
            rotation: Quat::from_yaw_degrees(270.0),
        }
    }

    #[test]
    fn test_header_layout() {
        let datagram = Datagram::new(0x0102_0304, Message::Snapshot(snapshot()));
        let bytes = datagram.encode().unwrap();
        assert_eq!(bytes[0], MessageKind::Snapshot as u8);
        assert_eq!(&bytes[1..5], &0x0102_0304u32.to_le_bytes());
        assert_eq!(bytes.len(), HEADER_SIZE + 32);
        assert_eq!(Datagram::decode(&bytes).unwrap(), datagram);
    }

    #[test]
    fn test_every_kind_decodes() {
        let command = Command::new(3, Vec2::new(0.0, 1.0), 0.05);
        let messages = vec![
            Message::Commands(vec![command, command.renumbered(4)]),
            Message::Ack(Ack { command, snapshot: snapshot() }),
            Message::Snapshot(snapshot()),
            Message::Ping { client_time: 1.5 },
            Message::Pong { client_time: 1.5 },
        ];
        for message in messages {
            let datagram = Datagram::new(9, message);
            let decoded = Datagram::decode(&datagram.encode().unwrap()).unwrap();
            assert_eq!(decoded, datagram, "{}", datagram.message.kind().name());
        }
    }

    #[test]
    fn test_unknown_kind() {
        let mut bytes = Datagram::new(1, Message::Ping { client_time: 0.0 }).encode().unwrap();
        bytes[0] = 0xee;
        assert_eq!(Datagram::decode(&bytes), Err(WireError::UnknownKind(0xee)));
    }

    #[test]
    fn test_short_header() {
        assert!(matches!(Datagram::decode(&[1, 0]), Err(WireError::Truncated { .. })));
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<(EntityId, MessageKind)>,
    }

    impl MessageHandler<u8> for Recorder {
        fn on_ack(&mut self, _from: u8, entity: EntityId, _ack: Ack) {
            self.seen.push((entity, MessageKind::Ack));
        }

        fn on_pong(&mut self, _from: u8, entity: EntityId, _client_time: f64) {
            self.seen.push((entity, MessageKind::Pong));
        }
    }

    #[test]
    fn test_dispatch_routes_by_kind() {
        let mut recorder = Recorder::default();
        let ack = Ack {
            command: Command::new(0, Vec2::ZERO, 0.1),
            snapshot: snapshot(),
        };
        Message::Ack(ack).dispatch(0u8, 4, &mut recorder);
        Message::Snapshot(snapshot()).dispatch(0u8, 5, &mut recorder);
        Message::Pong { client_time: 0.0 }.dispatch(0u8, 6, &mut recorder);

        assert_eq!(
            recorder.seen,
            vec![(4, MessageKind::Ack), (6, MessageKind::Pong)]
        );
    }
}
