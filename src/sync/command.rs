//! Commands and the Command Buffer
//!
//! A command is one client tick of input plus the time it covers. Both peers
//! keep commands in a buffer where `buffer[i].sequence == i` always holds:
//! the client by construction, the server by overwriting resends and padding
//! gaps on intake.

use serde::{Serialize, Deserialize};

use crate::core::hash::{StateHash, StateHasher};
use crate::core::math::Vec2;
use crate::sync::events::{Instrument, SyncEvent};

/// One tick of movement input.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Per-entity sequence number, strictly increasing, zero-based.
    pub sequence: u32,
    /// Movement axis (x = strafe, y = forward), components in [-1, 1].
    pub axis: Vec2,
    /// Simulated duration in seconds.
    pub dt: f32,
}

impl Command {
    /// Create a new command.
    pub const fn new(sequence: u32, axis: Vec2, dt: f32) -> Self {
        Self { sequence, axis, dt }
    }

    /// Same input under a different sequence number.
    #[inline]
    pub fn renumbered(&self, sequence: u32) -> Self {
        Self { sequence, ..*self }
    }
}

/// What the server did with an incoming command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intake {
    /// Sequence was already buffered; the slot was overwritten.
    Overwritten,
    /// Sequence was the next expected one.
    Appended,
    /// Sequence was ahead; `filled` synthetic commands were inserted first.
    Backfilled {
        /// Number of synthesized commands
        filled: u32,
    },
    /// Sequence jumped further than the configured limit; dropped.
    Rejected,
}

/// Append-only, sequence-indexed store of commands.
#[derive(Clone, Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            commands: Vec::with_capacity(256),
        }
    }

    /// Number of buffered commands (== next sequence).
    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True if nothing is buffered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sequence the next appended command will carry.
    #[inline]
    pub fn next_sequence(&self) -> u32 {
        self.commands.len() as u32
    }

    /// Command at `sequence`, if buffered.
    #[inline]
    pub fn get(&self, sequence: u32) -> Option<&Command> {
        self.commands.get(sequence as usize)
    }

    /// Most recently buffered command.
    #[inline]
    pub fn last(&self) -> Option<&Command> {
        self.commands.last()
    }

    /// All buffered commands in sequence order.
    #[inline]
    pub fn as_slice(&self) -> &[Command] {
        &self.commands
    }

    /// Commands with sequence strictly greater than `after` (all of them for `None`).
    pub fn after(&self, after: Option<u32>) -> &[Command] {
        let start = after.map_or(0, |s| s as usize + 1);
        self.commands.get(start..).unwrap_or(&[])
    }

    /// Sum of `dt` over every buffered command.
    pub fn buffered_time(&self) -> f32 {
        self.commands.iter().map(|c| c.dt).sum()
    }

    /// Build and append the next command. Returns a copy of it.
    pub fn issue(&mut self, axis: Vec2, dt: f32) -> Command {
        let command = Command::new(self.next_sequence(), axis, dt);
        self.commands.push(command);
        command
    }

    /// Append clones of `template`, renumbered, until `last_sequence` is buffered.
    ///
    /// Returns the number of commands appended (0 if already that long).
    pub fn fill_through(&mut self, template: &Command, last_sequence: u32) -> u32 {
        let mut filled = 0;
        while self.commands.len() <= last_sequence as usize {
            let next = self.next_sequence();
            self.commands.push(template.renumbered(next));
            filled += 1;
        }
        filled
    }

    /// Duplicate the last command under the next sequence.
    ///
    /// Returns `None` if the buffer is empty.
    pub fn pad_last(&mut self) -> Option<Command> {
        let next = self.next_sequence();
        let padded = self.commands.last()?.renumbered(next);
        self.commands.push(padded);
        Some(padded)
    }

    /// Server-side intake: place `command` at index `command.sequence`.
    ///
    /// - below the end: overwrite (resends are idempotent)
    /// - at the end: append
    /// - past the end: pad with clones of the last buffered command (or of
    ///   `command` itself when the buffer is empty), then append
    ///
    /// Jumps of more than `max_gap` synthetic commands are rejected.
    pub fn insert(
        &mut self,
        command: Command,
        max_gap: u32,
        sink: &mut impl Instrument,
    ) -> Intake {
        let sequence = command.sequence;
        let len = self.next_sequence();

        if sequence < len {
            let slot = &mut self.commands[sequence as usize];
            let changed = *slot != command;
            *slot = command;
            sink.record(SyncEvent::CommandOverwritten { sequence, changed });
            return Intake::Overwritten;
        }

        if sequence == len {
            self.commands.push(command);
            return Intake::Appended;
        }

        let gap = sequence - len;
        if gap > max_gap {
            sink.record(SyncEvent::CommandRejected { sequence, buffered: len });
            return Intake::Rejected;
        }

        let template = self.commands.last().copied().unwrap_or(command);
        let filled = self.fill_through(&template, sequence - 1);
        sink.record(SyncEvent::GapFilled { from: len, count: filled });
        self.commands.push(command);
        Intake::Backfilled { filled }
    }

    /// Hash of every buffered command, for comparing two peers' histories.
    pub fn state_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_commands();
        for c in &self.commands {
            hasher.update_u32(c.sequence);
            hasher.update_f32(c.axis.x);
            hasher.update_f32(c.axis.y);
            hasher.update_f32(c.dt);
        }
        hasher.finalize()
    }

    /// Check the `buffer[i].sequence == i` invariant.
    pub fn is_contiguous(&self) -> bool {
        self.commands
            .iter()
            .enumerate()
            .all(|(i, c)| c.sequence as usize == i)
    }
}
