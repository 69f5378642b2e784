//! Synchronization Events
//!
//! Everything the engine compensates for silently (resends, gaps, starvation,
//! corrections, stale or reordered packets) is reported here instead of being
//! counted on the entity state. Components take an `&mut impl Instrument` and
//! call `record` at the point the compensation happens.

use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

/// An observable compensation or anomaly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// Server received a command it already held (resend).
    CommandOverwritten {
        /// Sequence that was overwritten
        sequence: u32,
        /// True if the stored command differed (e.g. it was synthetic fill)
        changed: bool,
    },

    /// Server padded a sequence gap with clones of its last command.
    GapFilled {
        /// First synthesized sequence
        from: u32,
        /// Number of synthesized commands
        count: u32,
    },

    /// Server ran out of commands mid-tick and duplicated the last one.
    StarvationPadded {
        /// Number of synthesized commands this tick
        count: u32,
    },

    /// Server dropped a command whose sequence jumped too far ahead.
    CommandRejected {
        /// Offending sequence
        sequence: u32,
        /// Buffer length at the time
        buffered: u32,
    },

    /// Server finished input buffering for an entity and began simulating.
    SimulationStarted {
        /// Seconds of input buffered at start
        buffered_time: f32,
    },

    /// Client ignored an ack no newer than one it already processed.
    StaleAckDropped {
        /// Sequence carried by the stale ack
        sequence: u32,
        /// Newest sequence already acknowledged
        last_acked: u32,
    },

    /// Client dropped an ack too far ahead of anything it simulated.
    AckRejected {
        /// Sequence carried by the ack
        sequence: u32,
        /// Commands between the last simulated sequence and the ack
        ahead_by: u32,
    },

    /// Client snapped to server state and replayed its pending commands.
    Corrected {
        /// Acknowledged sequence
        sequence: u32,
        /// Commands replayed on top of the server state
        replayed: u32,
        /// Distance between the predicted and corrected positions
        pop: f32,
    },

    /// Client fell behind the server and synthesized filler commands.
    Resynced {
        /// Last sequence the client had simulated
        from: u32,
        /// Sequence the client resynced to
        to: u32,
    },

    /// Observer dropped a snapshot that was not newer than its window.
    SnapshotRejected {
        /// Server time of the rejected snapshot
        time: f64,
        /// Newest time already in the window, `None` if it was empty
        newest: Option<f64>,
    },

    /// Interpolation cursor ran past the window. Indicates a bug.
    CursorOverrun {
        /// Cursor position
        left_index: usize,
        /// Window length
        window_len: usize,
    },

    /// A datagram could not be decoded.
    MalformedMessage {
        /// Decoder error text
        reason: String,
    },
}

/// Sink for synchronization events.
pub trait Instrument {
    /// Record one event.
    fn record(&mut self, event: SyncEvent);
}

/// Discards every event.
impl Instrument for () {
    fn record(&mut self, _event: SyncEvent) {}
}

/// Keeps every event in order.
impl Instrument for Vec<SyncEvent> {
    fn record(&mut self, event: SyncEvent) {
        self.push(event);
    }
}

/// Counters aggregated from events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Resent commands received
    pub commands_overwritten: u64,
    /// Commands synthesized to fill sequence gaps
    pub gap_filled: u64,
    /// Commands synthesized under starvation
    pub starvation_padded: u64,
    /// Commands rejected for jumping too far ahead
    pub commands_rejected: u64,
    /// Entities that finished input buffering
    pub simulations_started: u64,
    /// Stale acks ignored
    pub stale_acks: u64,
    /// Acks dropped for jumping too far ahead
    pub acks_rejected: u64,
    /// Reconciliations performed
    pub corrections: u64,
    /// Largest reconciliation pop seen
    pub max_pop: f32,
    /// Sequence resyncs
    pub resyncs: u64,
    /// Out-of-order or duplicate snapshots rejected
    pub snapshots_rejected: u64,
    /// Interpolation cursor overruns (bugs)
    pub cursor_overruns: u64,
    /// Undecodable datagrams
    pub malformed: u64,
}

impl SyncStats {
    /// Total commands the server invented rather than received.
    pub fn synthetic_commands(&self) -> u64 {
        self.gap_filled + self.starvation_padded
    }

    /// Fold another set of counters into this one.
    pub fn merge(&mut self, other: &SyncStats) {
        self.commands_overwritten += other.commands_overwritten;
        self.gap_filled += other.gap_filled;
        self.starvation_padded += other.starvation_padded;
        self.commands_rejected += other.commands_rejected;
        self.simulations_started += other.simulations_started;
        self.stale_acks += other.stale_acks;
        self.acks_rejected += other.acks_rejected;
        self.corrections += other.corrections;
        self.max_pop = self.max_pop.max(other.max_pop);
        self.resyncs += other.resyncs;
        self.snapshots_rejected += other.snapshots_rejected;
        self.cursor_overruns += other.cursor_overruns;
        self.malformed += other.malformed;
    }
}

impl Instrument for SyncStats {
    fn record(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::CommandOverwritten { .. } => self.commands_overwritten += 1,
            SyncEvent::GapFilled { from, count } => {
                debug!("gap filled: {} commands from sequence {}", count, from);
                self.gap_filled += count as u64;
            }
            SyncEvent::StarvationPadded { count } => {
                debug!("starvation: padded {} commands", count);
                self.starvation_padded += count as u64;
            }
            SyncEvent::CommandRejected { sequence, buffered } => {
                warn!("rejected command {} (buffer holds {})", sequence, buffered);
                self.commands_rejected += 1;
            }
            SyncEvent::SimulationStarted { .. } => self.simulations_started += 1,
            SyncEvent::StaleAckDropped { .. } => self.stale_acks += 1,
            SyncEvent::AckRejected { .. } => self.acks_rejected += 1,
            SyncEvent::Corrected { pop, .. } => {
                self.corrections += 1;
                self.max_pop = self.max_pop.max(pop);
            }
            SyncEvent::Resynced { from, to } => {
                warn!("resynced from sequence {} to {}", from, to);
                self.resyncs += 1;
            }
            SyncEvent::SnapshotRejected { .. } => self.snapshots_rejected += 1,
            SyncEvent::CursorOverrun { .. } => self.cursor_overruns += 1,
            SyncEvent::MalformedMessage { reason } => {
                debug!("malformed message: {}", reason);
                self.malformed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_count_events() {
        let mut stats = SyncStats::default();
        stats.record(SyncEvent::GapFilled { from: 3, count: 2 });
        stats.record(SyncEvent::StarvationPadded { count: 1 });
        stats.record(SyncEvent::Corrected { sequence: 4, replayed: 2, pop: 0.5 });
        stats.record(SyncEvent::Corrected { sequence: 5, replayed: 1, pop: 0.25 });

        assert_eq!(stats.gap_filled, 2);
        assert_eq!(stats.starvation_padded, 1);
        assert_eq!(stats.synthetic_commands(), 3);
        assert_eq!(stats.corrections, 2);
        assert_eq!(stats.max_pop, 0.5);
    }

    #[test]
    fn test_vec_keeps_order() {
        let mut log: Vec<SyncEvent> = Vec::new();
        log.record(SyncEvent::StarvationPadded { count: 1 });
        log.record(SyncEvent::StaleAckDropped { sequence: 1, last_acked: 2 });
        assert_eq!(log.len(), 2);
        assert!(matches!(log[1], SyncEvent::StaleAckDropped { .. }));
    }

    #[test]
    fn test_rejections_counted() {
        let mut stats = SyncStats::default();
        stats.record(SyncEvent::AckRejected { sequence: 9_000, ahead_by: 8_999 });
        stats.record(SyncEvent::SnapshotRejected { time: f64::NAN, newest: None });
        stats.record(SyncEvent::CursorOverrun { left_index: 3, window_len: 3 });

        assert_eq!(stats.acks_rejected, 1);
        assert_eq!(stats.snapshots_rejected, 1);
        assert_eq!(stats.cursor_overruns, 1);
    }

    #[test]
    fn test_merge() {
        let mut a = SyncStats { resyncs: 1, max_pop: 0.1, ..Default::default() };
        let b = SyncStats { resyncs: 2, max_pop: 0.4, ..Default::default() };
        a.merge(&b);
        assert_eq!(a.resyncs, 3);
        assert_eq!(a.max_pop, 0.4);
    }
}
