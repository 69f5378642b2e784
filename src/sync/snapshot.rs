//! Snapshots and Acks
//!
//! The server produces one snapshot per simulated tick per entity. The owner
//! gets it paired with the last command simulated (an ack); everyone else
//! gets the bare snapshot.

use serde::{Serialize, Deserialize};

use crate::core::math::{Quat, Vec3};
use crate::sync::command::Command;
use crate::sync::simulate::Transform;

/// Authoritative state of an entity at a server time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Server time in seconds.
    pub time: f64,
    /// Position
    pub position: Vec3,
    /// Rotation
    pub rotation: Quat,
}

impl Snapshot {
    /// Capture a transform at `time`.
    pub fn capture(time: f64, transform: &Transform) -> Self {
        Self {
            time,
            position: transform.position,
            rotation: transform.rotation,
        }
    }

    /// The transform this snapshot describes.
    #[inline]
    pub fn transform(&self) -> Transform {
        Transform::new(self.position, self.rotation)
    }

    /// Interpolate between `self` and `next` at `time`.
    ///
    /// Times at or before `self.time` return `self`; times at or after
    /// `next.time` return `next`. Position is lerped, rotation slerped.
    pub fn interpolate(&self, next: &Snapshot, time: f64) -> Snapshot {
        if time <= self.time {
            return *self;
        }
        if time >= next.time {
            return *next;
        }
        let t = ((time - self.time) / (next.time - self.time)) as f32;
        Snapshot {
            time,
            position: self.position.lerp(next.position, t),
            rotation: self.rotation.slerp(next.rotation, t),
        }
    }

    /// Continue the motion from `self` through `next` out to `time`.
    ///
    /// `time` is normally past `next.time`. Degenerate pairs (equal times)
    /// hold at `next`.
    pub fn extrapolate(&self, next: &Snapshot, time: f64) -> Snapshot {
        let span = next.time - self.time;
        if span <= 0.0 {
            return Snapshot { time, ..*next };
        }
        let t = ((time - self.time) / span) as f32;
        Snapshot {
            time,
            position: self.position.lerp(next.position, t),
            rotation: self.rotation.slerp(next.rotation, t).normalize(),
        }
    }
}

/// Server's reply to the owner of an entity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    /// The last command the server simulated this tick.
    pub command: Command,
    /// State after simulating it.
    pub snapshot: Snapshot,
}

/// Append-only, time-ordered snapshot record kept by the server.
#[derive(Clone, Debug, Default)]
pub struct SnapshotHistory {
    snapshots: Vec<Snapshot>,
}

impl SnapshotHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a snapshot. Times must not go backwards.
    pub fn push(&mut self, snapshot: Snapshot) {
        debug_assert!(
            self.snapshots.last().map_or(true, |s| s.time <= snapshot.time),
            "snapshot history must be time-ordered"
        );
        self.snapshots.push(snapshot);
    }

    /// Number of snapshots recorded.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// True if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// All snapshots, oldest first.
    pub fn as_slice(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Authoritative state at `time`, interpolated between recorded ticks.
    pub fn sample(&self, time: f64) -> Option<Snapshot> {
        let idx = self.snapshots.partition_point(|s| s.time <= time);
        match idx {
            0 => self.snapshots.first().copied(),
            i if i == self.snapshots.len() => self.snapshots.last().copied(),
            i => Some(self.snapshots[i - 1].interpolate(&self.snapshots[i], time)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(time: f64, x: f32, yaw: f32) -> Snapshot {
        Snapshot {
            time,
            position: Vec3::new(x, 0.0, 0.0),
            rotation: Quat::from_yaw_degrees(yaw),
        }
    }

    #[test]
    fn test_interpolate_boundaries_exact() {
        let a = snap(1.0, 0.1, 10.0);
        let b = snap(1.7, 0.7, 200.0);
        assert_eq!(a.interpolate(&b, a.time), a);
        assert_eq!(a.interpolate(&b, b.time), b);
    }

    #[test]
    fn test_interpolate_midpoint() {
        let a = snap(0.0, 0.0, 0.0);
        let b = snap(1.0, 10.0, 90.0);
        let mid = a.interpolate(&b, 0.5);
        assert!((mid.position.x - 5.0).abs() < 1e-5);
        assert!((mid.rotation.yaw_degrees() - 45.0).abs() < 1e-3);
        assert_eq!(mid.time, 0.5);
    }

    #[test]
    fn test_extrapolate_continues_trend() {
        let a = snap(0.0, 0.0, 0.0);
        let b = snap(1.0, 2.0, 0.0);
        let ahead = a.extrapolate(&b, 1.5);
        assert!((ahead.position.x - 3.0).abs() < 1e-5);
        assert_eq!(ahead.time, 1.5);
    }

    #[test]
    fn test_extrapolate_degenerate_holds() {
        let a = snap(1.0, 0.0, 0.0);
        let b = snap(1.0, 2.0, 0.0);
        let held = a.extrapolate(&b, 3.0);
        assert_eq!(held.position, b.position);
    }

    #[test]
    fn test_history_sample() {
        let mut history = SnapshotHistory::new();
        assert!(history.sample(0.0).is_none());

        history.push(snap(0.0, 0.0, 0.0));
        history.push(snap(1.0, 10.0, 0.0));
        history.push(snap(2.0, 20.0, 0.0));

        assert_eq!(history.sample(-1.0).unwrap().position.x, 0.0);
        assert!((history.sample(1.5).unwrap().position.x - 15.0).abs() < 1e-5);
        assert_eq!(history.sample(1.0).unwrap().position.x, 10.0);
        assert_eq!(history.sample(9.0).unwrap().position.x, 20.0);
        assert_eq!(history.len(), 3);
    }
}
