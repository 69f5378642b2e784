//! Shared Movement Simulation
//!
//! `simulate` is run by the predicting client and by the authoritative
//! server on the same inputs. It must stay bit-for-bit deterministic:
//! prediction, correction and replay all assume that feeding the same
//! commands to the same baseline yields the same transform.

use serde::{Serialize, Deserialize};

use crate::core::hash::{StateHash, StateHasher};
use crate::core::math::{normalize_degrees, Quat, Vec3};
use crate::sync::command::Command;
use crate::sync::config::MotionConfig;

/// Position and orientation of one entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// World position (Y up)
    pub position: Vec3,
    /// Orientation
    pub rotation: Quat,
}

impl Transform {
    /// Create a transform.
    pub const fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Transform at `position` with no rotation.
    pub const fn at(position: Vec3) -> Self {
        Self { position, rotation: Quat::IDENTITY }
    }

    /// Bitwise hash of this transform.
    pub fn state_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_transform();
        hasher.update_vec3(self.position);
        hasher.update_quat(self.rotation);
        hasher.finalize()
    }
}

/// Where the engine keeps an entity's position and rotation.
///
/// The engine's scene object implements this; the sync components read
/// and write through it instead of owning the object.
pub trait Actor {
    /// Current position.
    fn position(&self) -> Vec3;
    /// Move to `position`.
    fn set_position(&mut self, position: Vec3);
    /// Current rotation.
    fn rotation(&self) -> Quat;
    /// Rotate to `rotation`.
    fn set_rotation(&mut self, rotation: Quat);

    /// Read both at once.
    fn transform(&self) -> Transform {
        Transform::new(self.position(), self.rotation())
    }

    /// Write both at once.
    fn set_transform(&mut self, transform: Transform) {
        self.set_position(transform.position);
        self.set_rotation(transform.rotation);
    }
}

impl Actor for Transform {
    fn position(&self) -> Vec3 {
        self.position
    }

    fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    fn rotation(&self) -> Quat {
        self.rotation
    }

    fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
    }
}

/// Heading in degrees [0, 360) for a movement axis; 0 faces +Z, 90 faces +X.
#[inline]
pub fn heading_degrees(axis_x: f32, axis_y: f32) -> f32 {
    normalize_degrees(axis_x.atan2(axis_y).to_degrees())
}

/// Advance `transform` by one command.
///
/// Position moves by `axis * dt * move_speed` on X/Z and is clamped to the
/// configured bounds. Heading is always taken from the axis, so a zero axis
/// faces 0 degrees.
pub fn simulate(transform: &Transform, command: &Command, motion: &MotionConfig) -> Transform {
    let step = command.dt * motion.move_speed;
    let b = &motion.bounds;

    let x = (transform.position.x + command.axis.x * step).clamp(b.min_x, b.max_x);
    let z = (transform.position.z + command.axis.y * step).clamp(b.min_z, b.max_z);
    let position = Vec3::new(x, transform.position.y, z);

    let rotation = Quat::from_yaw_degrees(heading_degrees(command.axis.x, command.axis.y));

    Transform { position, rotation }
}

/// Run `simulate` on an actor in place.
pub fn simulate_actor(actor: &mut impl Actor, command: &Command, motion: &MotionConfig) {
    let next = simulate(&actor.transform(), command, motion);
    actor.set_transform(next);
}
