//! Remote Entity Interpolation
//!
//! Observers never simulate other players; they play back server snapshots
//! with a small delay. Per local tick the interpolator picks a policy:
//!
//! | Policy        | When                                                   |
//! |---------------|--------------------------------------------------------|
//! | `None`        | window empty, or still warming up                      |
//! | `Replicate`   | first sample ever: snap to it                          |
//! | `Interpolate` | newest snapshot is at least one local tick ahead       |
//! | `Extrapolate` | window exhausted: continue the last two samples' trend |
//!
//! The playback clock (`last_rendered`) advances exactly one local tick per
//! interpolated or extrapolated frame.

use serde::{Serialize, Deserialize};
use tracing::error;

use crate::sync::config::SyncConfig;
use crate::sync::events::{Instrument, SyncEvent};
use crate::sync::simulate::{Actor, Transform};
use crate::sync::snapshot::Snapshot;

/// How a frame was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Policy {
    /// Nothing rendered.
    None,
    /// Snapped to the first buffered sample.
    Replicate,
    /// Blended between two buffered samples.
    Interpolate,
    /// Projected past the newest sample.
    Extrapolate,
}

/// One rendered frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frame {
    /// Policy used
    pub policy: Policy,
    /// Playback time of the frame
    pub time: f64,
    /// Transform to display, absent for `Policy::None`
    pub transform: Option<Transform>,
}

impl Frame {
    fn none(time: f64) -> Self {
        Self {
            policy: Policy::None,
            time,
            transform: None,
        }
    }

    fn from_snapshot(policy: Policy, snapshot: Snapshot) -> Self {
        Self {
            policy,
            time: snapshot.time,
            transform: Some(snapshot.transform()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Playback {
    /// Nothing replicated yet.
    Idle,
    /// First sample shown, accumulating `interpolation_delay` of lead.
    WarmingUp,
    /// Advancing one local tick per frame.
    Playing,
}

/// Snapshot window and playback state for one remote entity.
#[derive(Clone, Debug)]
pub struct RemoteInterpolator {
    window: Vec<Snapshot>,
    left_index: usize,
    last_rendered: f64,
    playback: Playback,
    local_tick_period: f64,
    interpolation_delay: f64,
}

impl RemoteInterpolator {
    /// Create an interpolator ticking at the client rate.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            window: Vec::new(),
            left_index: 0,
            last_rendered: 0.0,
            playback: Playback::Idle,
            local_tick_period: config.client_tick_period as f64,
            interpolation_delay: config.interpolation_delay,
        }
    }

    /// Buffered snapshots, strictly increasing in time.
    pub fn window(&self) -> &[Snapshot] {
        &self.window
    }

    /// Playback clock.
    pub fn last_rendered(&self) -> f64 {
        self.last_rendered
    }

    /// True once warm-up finished.
    pub fn is_playing(&self) -> bool {
        self.playback == Playback::Playing
    }

    /// Admit a snapshot if its time is finite and strictly newer than the
    /// window's newest.
    pub fn push(&mut self, snapshot: Snapshot, sink: &mut impl Instrument) -> bool {
        let newest = self.window.last().map(|s| s.time);
        let admitted = snapshot.time.is_finite() && newest.map_or(true, |n| snapshot.time > n);
        if !admitted {
            sink.record(SyncEvent::SnapshotRejected { time: snapshot.time, newest });
            return false;
        }
        self.window.push(snapshot);
        true
    }

    /// Produce this tick's frame and write it to `actor`.
    pub fn tick(&mut self, actor: &mut impl Actor, sink: &mut impl Instrument) -> Policy {
        let frame = self.advance(sink);
        if let Some(transform) = frame.transform {
            actor.set_transform(transform);
        }
        frame.policy
    }

    /// Produce this tick's frame.
    pub fn advance(&mut self, sink: &mut impl Instrument) -> Frame {
        let (first, newest) = match (self.window.first(), self.window.last()) {
            (Some(first), Some(newest)) => (*first, newest.time),
            _ => return Frame::none(self.last_rendered),
        };

        match self.playback {
            Playback::Idle => {
                self.left_index = 0;
                self.last_rendered = first.time;
                self.playback = Playback::WarmingUp;
                return Frame::from_snapshot(Policy::Replicate, first);
            }
            Playback::WarmingUp => {
                if newest - self.last_rendered < self.interpolation_delay {
                    return Frame::none(self.last_rendered);
                }
                self.playback = Playback::Playing;
            }
            Playback::Playing => {}
        }

        let target = self.last_rendered + self.local_tick_period;
        if newest >= target {
            self.interpolate(target, sink)
        } else {
            self.extrapolate(target)
        }
    }

    fn interpolate(&mut self, target: f64, sink: &mut impl Instrument) -> Frame {
        loop {
            match self.window.get(self.left_index + 1) {
                Some(right) if right.time < target => self.left_index += 1,
                Some(_) => break,
                None => {
                    error!(
                        "interpolation cursor {} ran past window of {} at t={:.4}",
                        self.left_index,
                        self.window.len(),
                        target
                    );
                    sink.record(SyncEvent::CursorOverrun {
                        left_index: self.left_index,
                        window_len: self.window.len(),
                    });
                    self.left_index = 0;
                    return self.extrapolate(target);
                }
            }
        }

        let left = self.window[self.left_index];
        let right = self.window[self.left_index + 1];
        let sample = left.interpolate(&right, target);

        self.last_rendered = target;
        self.window.drain(..self.left_index);
        self.left_index = 0;

        Frame::from_snapshot(Policy::Interpolate, sample)
    }

    fn extrapolate(&mut self, target: f64) -> Frame {
        let len = self.window.len();
        let sample = match len {
            0 => return Frame::none(self.last_rendered),
            1 => Snapshot { time: target, ..self.window[0] },
            _ => self.window[len - 2].extrapolate(&self.window[len - 1], target),
        };

        self.last_rendered = target;
        // Keep the newest sample at or before the playback clock, and the two
        // newest overall for the trend.
        let stale = self
            .window
            .iter()
            .skip(1)
            .take_while(|s| s.time <= self.last_rendered)
            .count()
            .min(len.saturating_sub(2));
        self.window.drain(..stale);

        Frame::from_snapshot(Policy::Extrapolate, sample)
    }
}
