//! Wire Encoding
//!
//! Fixed little-endian layouts, field order is a compatibility contract:
//!
//! ```text
//!   Command   i32 sequence | f32 axis.x | f32 axis.y | f32 dt              16 bytes
//!   Snapshot  f32 time | f32 px py pz | f32 rw rx ry rz                    32 bytes
//!   Ack       Command | Snapshot                                          48 bytes
//!   Report    u8 count | count x Command
//! ```
//!
//! Encoding goes through bincode with fixed-width integers so every layout
//! above is exactly the sum of its fields.

use bincode::Options;
use serde::{Serialize, Deserialize};

use crate::core::math::{Quat, Vec2, Vec3};
use crate::sync::command::Command;
use crate::sync::snapshot::{Ack, Snapshot};

/// Most commands one report can carry.
pub const MAX_REPORT_COMMANDS: usize = u8::MAX as usize;

/// Wire format errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WireError {
    /// Payload shorter than the layout requires.
    #[error("Truncated payload: need {needed} bytes, got {got}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes available
        got: usize,
    },

    /// Sequence numbers are never negative.
    #[error("Negative command sequence {0}")]
    NegativeSequence(i32),

    /// Sequence does not fit the signed wire field.
    #[error("Command sequence {0} exceeds the wire range")]
    SequenceOverflow(u32),

    /// Bytes left over after a complete message.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// Too many commands for a single report.
    #[error("Report of {0} commands exceeds the limit of 255")]
    ReportTooLong(usize),

    /// Unrecognized message kind byte.
    #[error("Unknown message kind {0:#04x}")]
    UnknownKind(u8),

    /// Low-level codec failure.
    #[error("Codec error: {0}")]
    Codec(String),
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .allow_trailing_bytes()
}

pub(crate) fn encode_raw<T: Serialize>(value: &T, out: &mut Vec<u8>) -> Result<(), WireError> {
    options()
        .serialize_into(out, value)
        .map_err(|e| WireError::Codec(e.to_string()))
}

pub(crate) fn decode_raw<'a, T: for<'de> Deserialize<'de>>(
    bytes: &'a [u8],
    size: usize,
) -> Result<(T, &'a [u8]), WireError> {
    if bytes.len() < size {
        return Err(WireError::Truncated { needed: size, got: bytes.len() });
    }
    let (head, rest) = bytes.split_at(size);
    let value = options()
        .deserialize(head)
        .map_err(|e| WireError::Codec(e.to_string()))?;
    Ok((value, rest))
}

#[derive(Serialize, Deserialize)]
struct CommandLayout {
    sequence: i32,
    axis: [f32; 2],
    dt: f32,
}

#[derive(Serialize, Deserialize)]
struct SnapshotLayout {
    time: f32,
    position: [f32; 3],
    rotation: [f32; 4],
}

/// A type with a fixed binary layout.
pub trait Wire: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Append the encoding to `out`.
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), WireError>;

    /// Decode from the front of `bytes`, returning the remainder.
    fn decode_prefix(bytes: &[u8]) -> Result<(Self, &[u8]), WireError>;

    /// Encode into a fresh buffer.
    fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(Self::SIZE);
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Decode a complete payload; trailing bytes are an error.
    fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let (value, rest) = Self::decode_prefix(bytes)?;
        if !rest.is_empty() {
            return Err(WireError::TrailingBytes(rest.len()));
        }
        Ok(value)
    }
}

impl Wire for Command {
    const SIZE: usize = 16;

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        let sequence =
            i32::try_from(self.sequence).map_err(|_| WireError::SequenceOverflow(self.sequence))?;
        encode_raw(
            &CommandLayout {
                sequence,
                axis: [self.axis.x, self.axis.y],
                dt: self.dt,
            },
            out,
        )
    }

    fn decode_prefix(bytes: &[u8]) -> Result<(Self, &[u8]), WireError> {
        let (raw, rest): (CommandLayout, _) = decode_raw(bytes, Self::SIZE)?;
        let sequence =
            u32::try_from(raw.sequence).map_err(|_| WireError::NegativeSequence(raw.sequence))?;
        let command = Command::new(sequence, Vec2::new(raw.axis[0], raw.axis[1]), raw.dt);
        Ok((command, rest))
    }
}

impl Wire for Snapshot {
    const SIZE: usize = 32;

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        let p = self.position;
        let r = self.rotation;
        encode_raw(
            &SnapshotLayout {
                time: self.time as f32,
                position: [p.x, p.y, p.z],
                rotation: [r.w, r.x, r.y, r.z],
            },
            out,
        )
    }

    fn decode_prefix(bytes: &[u8]) -> Result<(Self, &[u8]), WireError> {
        let (raw, rest): (SnapshotLayout, _) = decode_raw(bytes, Self::SIZE)?;
        let [px, py, pz] = raw.position;
        let [rw, rx, ry, rz] = raw.rotation;
        let snapshot = Snapshot {
            time: raw.time as f64,
            position: Vec3::new(px, py, pz),
            rotation: Quat::new(rw, rx, ry, rz),
        };
        Ok((snapshot, rest))
    }
}

impl Wire for Ack {
    const SIZE: usize = Command::SIZE + Snapshot::SIZE;

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        self.command.encode_into(out)?;
        self.snapshot.encode_into(out)
    }

    fn decode_prefix(bytes: &[u8]) -> Result<(Self, &[u8]), WireError> {
        let (command, rest) = Command::decode_prefix(bytes)?;
        let (snapshot, rest) = Snapshot::decode_prefix(rest)?;
        Ok((Ack { command, snapshot }, rest))
    }
}

/// Encode one batched report. At most 255 commands.
pub fn encode_report(commands: &[Command]) -> Result<Vec<u8>, WireError> {
    if commands.len() > MAX_REPORT_COMMANDS {
        return Err(WireError::ReportTooLong(commands.len()));
    }
    let mut out = Vec::with_capacity(1 + commands.len() * Command::SIZE);
    out.push(commands.len() as u8);
    for command in commands {
        command.encode_into(&mut out)?;
    }
    Ok(out)
}

/// Decode a batched report.
pub fn decode_report(bytes: &[u8]) -> Result<Vec<Command>, WireError> {
    let (&count, mut rest) = bytes
        .split_first()
        .ok_or(WireError::Truncated { needed: 1, got: 0 })?;

    let needed = count as usize * Command::SIZE;
    if rest.len() < needed {
        return Err(WireError::Truncated { needed: needed + 1, got: bytes.len() });
    }

    let mut commands = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (command, tail) = Command::decode_prefix(rest)?;
        commands.push(command);
        rest = tail;
    }
    if !rest.is_empty() {
        return Err(WireError::TrailingBytes(rest.len()));
    }
    Ok(commands)
}

/// Split an unacknowledged tail into reports that each fit the u8 count.
pub fn split_report(commands: &[Command]) -> impl Iterator<Item = &[Command]> {
    commands.chunks(MAX_REPORT_COMMANDS)
}

/// Encode a ping or pong timestamp.
pub fn encode_timestamp(time: f64) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::with_capacity(8);
    encode_raw(&time, &mut out)?;
    Ok(out)
}

/// Decode a ping or pong timestamp.
pub fn decode_timestamp(bytes: &[u8]) -> Result<f64, WireError> {
    let (time, rest): (f64, _) = decode_raw(bytes, 8)?;
    if !rest.is_empty() {
        return Err(WireError::TrailingBytes(rest.len()));
    }
    Ok(time)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> Command {
        Command::new(7, Vec2::new(0.5, -1.0), 1.0 / 60.0)
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            time: 12.5,
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::from_yaw_degrees(45.0),
        }
    }

    #[test]
    fn test_command_layout() {
        let bytes = command().to_bytes().unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &7i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &0.5f32.to_le_bytes());
        assert_eq!(&bytes[8..12], &(-1.0f32).to_le_bytes());
        assert_eq!(Command::from_bytes(&bytes).unwrap(), command());
    }

    #[test]
    fn test_snapshot_layout_wxyz() {
        let snap = snapshot();
        let bytes = snap.to_bytes().unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[0..4], &12.5f32.to_le_bytes());
        assert_eq!(&bytes[16..20], &snap.rotation.w.to_le_bytes());
        assert_eq!(Snapshot::from_bytes(&bytes).unwrap(), snap);
    }

    #[test]
    fn test_ack_is_command_then_snapshot() {
        let ack = Ack { command: command(), snapshot: snapshot() };
        let bytes = ack.to_bytes().unwrap();
        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[..16], &command().to_bytes().unwrap()[..]);
        assert_eq!(Ack::from_bytes(&bytes).unwrap(), ack);
    }

    #[test]
    fn test_negative_sequence_rejected() {
        let mut bytes = command().to_bytes().unwrap();
        bytes[0..4].copy_from_slice(&(-3i32).to_le_bytes());
        assert_eq!(Command::from_bytes(&bytes), Err(WireError::NegativeSequence(-3)));

        let huge = Command::new(u32::MAX, Vec2::ZERO, 0.1);
        assert_eq!(huge.to_bytes(), Err(WireError::SequenceOverflow(u32::MAX)));
    }

    #[test]
    fn test_truncated_and_trailing() {
        let bytes = command().to_bytes().unwrap();
        assert_eq!(
            Command::from_bytes(&bytes[..10]),
            Err(WireError::Truncated { needed: 16, got: 10 })
        );

        let mut long = bytes.clone();
        long.push(0);
        assert_eq!(Command::from_bytes(&long), Err(WireError::TrailingBytes(1)));
    }

    #[test]
    fn test_report_framing() {
        let commands: Vec<Command> = (0..3).map(|i| command().renumbered(i)).collect();
        let bytes = encode_report(&commands).unwrap();
        assert_eq!(bytes[0], 3);
        assert_eq!(bytes.len(), 1 + 3 * 16);
        assert_eq!(decode_report(&bytes).unwrap(), commands);

        assert_eq!(decode_report(&[]), Err(WireError::Truncated { needed: 1, got: 0 }));
        assert!(matches!(decode_report(&bytes[..20]), Err(WireError::Truncated { .. })));
        assert_eq!(decode_report(&[0]).unwrap(), vec![]);
    }

    #[test]
    fn test_long_tail_split() {
        let commands: Vec<Command> = (0..600).map(|i| command().renumbered(i)).collect();
        assert_eq!(encode_report(&commands), Err(WireError::ReportTooLong(600)));

        let sizes: Vec<usize> = split_report(&commands).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![255, 255, 90]);
        for chunk in split_report(&commands) {
            assert!(encode_report(chunk).is_ok());
        }
    }

    #[test]
    fn test_timestamp() {
        let bytes = encode_timestamp(3.25).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(decode_timestamp(&bytes).unwrap(), 3.25);
        assert!(decode_timestamp(&bytes[..4]).is_err());
    }
}
