//! Authoritative Server Simulation
//!
//! One `ServerSimulator` per entity. Commands arrive unordered and possibly
//! duplicated; intake keeps the buffer contiguous. Each server tick then
//! consumes commands against a leaky-bucket time budget:
//!
//! ```text
//!   budget    = server_dt - carryover
//!   consume commands until sum(dt) >= budget   (pad with the last one if starved)
//!   carryover = sum(dt) - budget
//! ```
//!
//! so simulated time tracks wall time over the long run even when client and
//! server tick periods share no common divisor.

use tracing::warn;

use crate::sync::command::{Command, CommandBuffer, Intake};
use crate::sync::config::SyncConfig;
use crate::sync::events::{Instrument, SyncEvent};
use crate::sync::simulate::{simulate_actor, Actor};
use crate::sync::snapshot::{Ack, Snapshot, SnapshotHistory};

/// Tolerance when comparing accumulated dt against the budget.
pub const BUDGET_EPSILON: f32 = 1e-6;

/// Upper bound on commands simulated in a single tick.
pub const MAX_STEPS_PER_TICK: u32 = 4096;

/// What one simulated tick produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickOutput {
    /// Unicast to the owner.
    pub ack: Ack,
    /// Broadcast to observers.
    pub snapshot: Snapshot,
    /// Commands consumed this tick, including padding.
    pub consumed: u32,
    /// Commands synthesized under starvation this tick.
    pub padded: u32,
}

/// Server-side state for one entity.
#[derive(Clone, Debug)]
pub struct ServerSimulator {
    config: SyncConfig,
    commands: CommandBuffer,
    /// Index of the next command to simulate.
    cursor: u32,
    carryover: f32,
    started: bool,
    simulated_time: f64,
    history: SnapshotHistory,
}

impl ServerSimulator {
    /// Create a simulator that has received nothing.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            commands: CommandBuffer::new(),
            cursor: 0,
            carryover: 0.0,
            started: false,
            simulated_time: 0.0,
            history: SnapshotHistory::new(),
        }
    }

    /// Received and synthesized commands.
    pub fn commands(&self) -> &CommandBuffer {
        &self.commands
    }

    /// Recorded snapshots.
    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    /// Budget left over from the previous tick (may be negative).
    pub fn carryover(&self) -> f32 {
        self.carryover
    }

    /// True once input buffering finished.
    pub fn started(&self) -> bool {
        self.started
    }

    /// Total dt of every simulated command.
    pub fn simulated_time(&self) -> f64 {
        self.simulated_time
    }

    /// Newest simulated sequence.
    pub fn last_simulated(&self) -> Option<u32> {
        self.cursor.checked_sub(1)
    }

    /// Seconds of received input not yet simulated.
    pub fn pending_time(&self) -> f32 {
        self.commands.after(self.last_simulated()).iter().map(|c| c.dt).sum()
    }

    /// Take one command off the wire.
    ///
    /// Commands with a non-finite or non-positive dt, or an axis outside
    /// [-1, 1], never enter the buffer.
    pub fn receive(&mut self, command: Command, sink: &mut impl Instrument) -> Intake {
        if !is_well_formed(&command) {
            sink.record(SyncEvent::CommandRejected {
                sequence: command.sequence,
                buffered: self.commands.next_sequence(),
            });
            return Intake::Rejected;
        }
        self.commands.insert(command, self.config.max_gap_fill, sink)
    }

    /// Take a whole report.
    pub fn receive_all(&mut self, commands: &[Command], sink: &mut impl Instrument) {
        for command in commands {
            self.receive(*command, sink);
        }
    }

    /// Run one server tick at server time `now`.
    ///
    /// Returns `None` while still buffering input.
    pub fn tick(
        &mut self,
        now: f64,
        actor: &mut impl Actor,
        sink: &mut impl Instrument,
    ) -> Option<TickOutput> {
        if !self.started {
            let buffered = self.pending_time();
            let underfilled = buffered + BUDGET_EPSILON < self.config.input_buffer_time;
            if self.commands.is_empty() || underfilled {
                return None;
            }
            self.started = true;
            sink.record(SyncEvent::SimulationStarted { buffered_time: buffered });
        }

        let budget = self.config.server_tick_period - self.carryover;
        let mut sum = 0.0f32;
        let mut consumed = 0u32;
        let mut padded = 0u32;

        while sum + BUDGET_EPSILON < budget {
            if consumed >= MAX_STEPS_PER_TICK {
                warn!(
                    "server tick hit {} steps with {:.6}s of budget left, dropping debt",
                    MAX_STEPS_PER_TICK,
                    budget - sum
                );
                sum = budget;
                break;
            }

            let command = match self.commands.get(self.cursor) {
                Some(c) => *c,
                None => match self.commands.pad_last() {
                    Some(c) => {
                        padded += 1;
                        c
                    }
                    None => break,
                },
            };

            simulate_actor(actor, &command, &self.config.motion);
            sum += command.dt;
            self.simulated_time += command.dt as f64;
            self.cursor += 1;
            consumed += 1;
        }

        if padded > 0 {
            sink.record(SyncEvent::StarvationPadded { count: padded });
        }
        self.carryover = sum - budget;

        let acked = *self.commands.get(self.cursor.checked_sub(1)?)?;
        let snapshot = Snapshot::capture(now, &actor.transform());
        self.history.push(snapshot);

        Some(TickOutput {
            ack: Ack { command: acked, snapshot },
            snapshot,
            consumed,
            padded,
        })
    }
}

fn is_well_formed(command: &Command) -> bool {
    let unit = |v: f32| v.is_finite() && (-1.0..=1.0).contains(&v);
    command.dt.is_finite() && command.dt > 0.0 && unit(command.axis.x) && unit(command.axis.y)
}
