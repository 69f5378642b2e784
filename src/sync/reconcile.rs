//! Client Reconciliation
//!
//! Acks are only queued when they arrive. On the next client tick the queued
//! ack is processed as a rollback:
//!
//! ```text
//!   Idle --(ack newer than last_acked)--> Rollback --(replay done)--> Idle
//!
//!   Rollback:
//!     0. ack more than max_gap_fill ahead of last simulated?  drop it
//!     1. ack ahead of last simulated?  fill with clones of the acked command
//!        up to ack + min(ceil(factor * (rtt/2 + server_dt) / dt), max_gap_fill)
//!     2. actor <- ack.snapshot
//!     3. last_acked = last_simulated = ack.sequence
//!     4. re-simulate every buffered command after ack.sequence
//! ```

use tracing::warn;

use crate::sync::command::{Command, CommandBuffer};
use crate::sync::config::{MotionConfig, SyncConfig};
use crate::sync::events::{Instrument, SyncEvent};
use crate::sync::simulate::{simulate_actor, Actor};
use crate::sync::snapshot::Ack;

/// Outcome of one processed rollback.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rollback {
    /// Sequence the server acknowledged.
    pub sequence: u32,
    /// Commands re-simulated after the snap.
    pub replayed: u32,
    /// If the client was behind, the sequence it resynced to.
    pub resynced_to: Option<u32>,
    /// Distance between predicted and corrected position.
    pub pop: f32,
}

/// Tracks acknowledgements and performs rollback-and-replay.
#[derive(Clone, Debug)]
pub struct Reconciler {
    last_acked: Option<u32>,
    pending: Option<Ack>,
    resync_rtt_factor: f32,
    server_tick_period: f32,
    max_gap_fill: u32,
}

impl Reconciler {
    /// Create a reconciler from the shared config.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            last_acked: None,
            pending: None,
            resync_rtt_factor: config.resync_rtt_factor,
            server_tick_period: config.server_tick_period,
            max_gap_fill: config.max_gap_fill,
        }
    }

    /// Newest sequence processed so far.
    #[inline]
    pub fn last_acked(&self) -> Option<u32> {
        self.last_acked
    }

    /// True if an ack is waiting for the next tick.
    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Queue an ack for the next tick.
    ///
    /// Acks no newer than the last processed (or already queued) one are
    /// dropped; arrival order means nothing on an unordered transport.
    /// Returns true if the ack was queued.
    pub fn on_ack(&mut self, ack: Ack, sink: &mut impl Instrument) -> bool {
        let sequence = ack.command.sequence;
        let newest = match (self.last_acked, self.pending) {
            (Some(a), Some(p)) => Some(a.max(p.command.sequence)),
            (Some(a), None) => Some(a),
            (None, Some(p)) => Some(p.command.sequence),
            (None, None) => None,
        };

        if let Some(newest) = newest {
            if sequence <= newest {
                sink.record(SyncEvent::StaleAckDropped { sequence, last_acked: newest });
                return false;
            }
        }

        self.pending = Some(ack);
        true
    }

    /// Sequence a lagging client should jump to after acking `acked`.
    ///
    /// The lead past `acked` never exceeds `max_gap_fill` commands.
    pub fn resync_target(&self, acked: &Command, rtt: f64) -> u32 {
        let lead = self.resync_rtt_factor as f64 * (rtt * 0.5 + self.server_tick_period as f64);
        let dt = acked.dt as f64;
        if !(dt > 0.0 && lead.is_finite() && lead > 0.0) {
            return acked.sequence;
        }
        let steps = (lead / dt).ceil().min(self.max_gap_fill as f64) as u32;
        acked.sequence.saturating_add(steps)
    }

    /// Process the queued ack, if any.
    ///
    /// `last_simulated` is the newest sequence already applied to `actor`.
    pub fn rollback(
        &mut self,
        commands: &mut CommandBuffer,
        last_simulated: &mut Option<u32>,
        actor: &mut impl Actor,
        motion: &MotionConfig,
        rtt: f64,
        sink: &mut impl Instrument,
    ) -> Option<Rollback> {
        let ack = self.pending.take()?;
        let sequence = ack.command.sequence;
        let predicted = actor.position();

        let ahead_by = match *last_simulated {
            Some(s) => sequence.saturating_sub(s),
            None => sequence.saturating_add(1),
        };
        if ahead_by > self.max_gap_fill {
            warn!(
                "dropping ack {}: {} commands ahead of last simulated {:?} (limit {})",
                sequence, ahead_by, last_simulated, self.max_gap_fill
            );
            sink.record(SyncEvent::AckRejected { sequence, ahead_by });
            return None;
        }

        let resynced_to = if ahead_by > 0 {
            let target = self.resync_target(&ack.command, rtt);
            commands.fill_through(&ack.command, target);
            sink.record(SyncEvent::Resynced {
                from: last_simulated.unwrap_or(0),
                to: target,
            });
            Some(target)
        } else {
            None
        };

        actor.set_transform(ack.snapshot.transform());
        self.last_acked = Some(sequence);
        *last_simulated = Some(sequence);

        let mut replayed = 0;
        for command in commands.after(Some(sequence)) {
            simulate_actor(actor, command, motion);
            *last_simulated = Some(command.sequence);
            replayed += 1;
        }

        let pop = predicted.distance(actor.position());
        sink.record(SyncEvent::Corrected { sequence, replayed, pop });

        Some(Rollback {
            sequence,
            replayed,
            resynced_to,
            pop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::{Quat, Vec2, Vec3};
    use crate::sync::simulate::{simulate, Transform};
    use crate::sync::snapshot::Snapshot;

    fn config() -> SyncConfig {
        SyncConfig {
            client_tick_period: 0.1,
            server_tick_period: 0.1,
            ..Default::default()
        }
    }

    fn ack(sequence: u32, x: f32) -> Ack {
        Ack {
            command: Command::new(sequence, Vec2::new(1.0, 0.0), 0.1),
            snapshot: Snapshot {
                time: sequence as f64 * 0.1,
                position: Vec3::new(x, 0.0, 0.0),
                rotation: Quat::from_yaw_degrees(90.0),
            },
        }
    }

    #[test]
    fn test_stale_acks_dropped() {
        let mut rec = Reconciler::new(&config());
        let mut events = Vec::new();

        assert!(rec.on_ack(ack(5, 0.0), &mut events));
        assert!(!rec.on_ack(ack(5, 0.0), &mut events));
        assert!(!rec.on_ack(ack(3, 0.0), &mut events));
        assert!(rec.on_ack(ack(6, 0.0), &mut events));

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SyncEvent::StaleAckDropped { sequence: 5, last_acked: 5 }));
    }

    #[test]
    fn test_rollback_snaps_then_replays() {
        let cfg = config();
        let mut rec = Reconciler::new(&cfg);
        let mut commands = CommandBuffer::new();
        let mut actor = Transform::default();
        let mut last_simulated = None;

        for _ in 0..6 {
            let c = commands.issue(Vec2::new(0.0, 1.0), 0.1);
            simulate_actor(&mut actor, &c, &cfg.motion);
            last_simulated = Some(c.sequence);
        }

        // Server says after command 2 we were somewhere else entirely.
        let server_ack = ack(2, 3.0);
        rec.on_ack(server_ack, &mut ());
        let result = rec
            .rollback(&mut commands, &mut last_simulated, &mut actor, &cfg.motion, 0.0, &mut ())
            .unwrap();

        let mut expected = server_ack.snapshot.transform();
        for c in commands.after(Some(2)) {
            expected = simulate(&expected, c, &cfg.motion);
        }

        assert_eq!(result.replayed, 3);
        assert_eq!(result.resynced_to, None);
        assert_eq!(actor, expected);
        assert_eq!(last_simulated, Some(5));
        assert_eq!(rec.last_acked(), Some(2));
        assert!(!rec.has_pending());
    }

    #[test]
    fn test_matching_ack_is_invisible() {
        let cfg = config();
        let mut rec = Reconciler::new(&cfg);
        let mut commands = CommandBuffer::new();
        let mut actor = Transform::default();
        let mut last_simulated = None;
        let mut after_two = Transform::default();

        for _ in 0..5 {
            let c = commands.issue(Vec2::new(1.0, 0.0), 0.1);
            simulate_actor(&mut actor, &c, &cfg.motion);
            last_simulated = Some(c.sequence);
            if c.sequence == 2 {
                after_two = actor;
            }
        }
        let predicted = actor;

        rec.on_ack(
            Ack {
                command: *commands.get(2).unwrap(),
                snapshot: Snapshot::capture(0.3, &after_two),
            },
            &mut (),
        );
        let result = rec
            .rollback(&mut commands, &mut last_simulated, &mut actor, &cfg.motion, 0.0, &mut ())
            .unwrap();

        assert_eq!(result.pop, 0.0);
        assert_eq!(actor.state_hash(), predicted.state_hash());
    }

    #[test]
    fn test_behind_client_synthesizes_fillers() {
        // Client simulated through 40; the server acks 50.
        let cfg = config();
        let mut rec = Reconciler::new(&cfg);
        let mut commands = CommandBuffer::new();
        let mut actor = Transform::default();
        let mut last_simulated = None;

        for _ in 0..=40 {
            let c = commands.issue(Vec2::new(0.0, 1.0), 0.1);
            simulate_actor(&mut actor, &c, &cfg.motion);
            last_simulated = Some(c.sequence);
        }
        assert_eq!(last_simulated, Some(40));

        let rtt = 0.2;
        let server_ack = ack(50, 1.0);
        let target = rec.resync_target(&server_ack.command, rtt);
        // 50 + ceil(2 * (0.1 + 0.1) / 0.1) = 54
        assert_eq!(target, 54);

        let mut events = Vec::new();
        rec.on_ack(server_ack, &mut events);
        let result = rec
            .rollback(&mut commands, &mut last_simulated, &mut actor, &cfg.motion, rtt, &mut events)
            .unwrap();

        for s in 41..=50 {
            assert_eq!(*commands.get(s).unwrap(), server_ack.command.renumbered(s));
        }
        assert!(commands.is_contiguous());
        assert_eq!(commands.len(), 55);
        assert_eq!(result.resynced_to, Some(54));
        assert_eq!(result.replayed, 4);
        assert_eq!(last_simulated, Some(54));
        assert!(events.contains(&SyncEvent::Resynced { from: 40, to: 54 }));
    }

    #[test]
    fn test_resync_factor_is_tunable() {
        let mut cfg = config();
        cfg.resync_rtt_factor = 0.0;
        let rec = Reconciler::new(&cfg);
        assert_eq!(rec.resync_target(&ack(50, 0.0).command, 0.2), 50);

        cfg.resync_rtt_factor = 4.0;
        let rec = Reconciler::new(&cfg);
        assert_eq!(rec.resync_target(&ack(50, 0.0).command, 0.2), 58);
    }

    #[test]
    fn test_far_future_ack_dropped() {
        let cfg = config();
        let mut rec = Reconciler::new(&cfg);
        let mut commands = CommandBuffer::new();
        let mut actor = Transform::default();
        let c = commands.issue(Vec2::new(1.0, 0.0), 0.1);
        simulate_actor(&mut actor, &c, &cfg.motion);
        let mut last_simulated = Some(c.sequence);
        let before = actor;

        let mut events = Vec::new();
        assert!(rec.on_ack(ack(20_000_000, 7.0), &mut events));
        let result = rec.rollback(
            &mut commands,
            &mut last_simulated,
            &mut actor,
            &cfg.motion,
            0.2,
            &mut events,
        );

        assert!(result.is_none());
        assert_eq!(commands.len(), 1);
        assert_eq!(actor, before);
        assert_eq!(last_simulated, Some(0));
        assert_eq!(rec.last_acked(), None);
        assert!(!rec.has_pending());
        assert_eq!(
            events,
            vec![SyncEvent::AckRejected { sequence: 20_000_000, ahead_by: 20_000_000 }]
        );

        // A sane ack afterwards is still processed.
        assert!(rec.on_ack(ack(0, 0.5), &mut events));
        assert!(rec
            .rollback(&mut commands, &mut last_simulated, &mut actor, &cfg.motion, 0.2, &mut ())
            .is_some());
        assert_eq!(rec.last_acked(), Some(0));
    }

    #[test]
    fn test_resync_lead_capped_by_max_gap_fill() {
        let mut cfg = config();
        cfg.max_gap_fill = 3;
        let rec = Reconciler::new(&cfg);
        // Uncapped this would be 50 + ceil(2 * (5.0 + 0.1) / 0.1) = 152.
        assert_eq!(rec.resync_target(&ack(50, 0.0).command, 10.0), 53);
    }

    #[test]
    fn test_no_pending_no_rollback() {
        let cfg = config();
        let mut rec = Reconciler::new(&cfg);
        let mut commands = CommandBuffer::new();
        let mut actor = Transform::default();
        let mut last = None;
        assert!(rec
            .rollback(&mut commands, &mut last, &mut actor, &cfg.motion, 0.0, &mut ())
            .is_none());
    }
}
