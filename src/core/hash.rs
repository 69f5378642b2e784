//! State Hashing for Verification
//!
//! SHA-256 over the exact bit patterns of simulation state. Two peers that
//! ran the same commands from the same baseline must produce the same hash;
//! any divergence, however small, shows up as a different digest.

use sha2::{Sha256, Digest};
use super::math::{Quat, Vec3};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for simulation state.
///
/// Order of updates is part of the hash.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for a single entity transform.
    pub fn for_transform() -> Self {
        Self::new(b"MOVESYNC_TRANSFORM_V1")
    }

    /// Create hasher for a command stream.
    pub fn for_commands() -> Self {
        Self::new(b"MOVESYNC_COMMANDS_V1")
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an f32 bit pattern (little-endian).
    ///
    /// `0.0` and `-0.0` hash differently.
    #[inline]
    pub fn update_f32(&mut self, value: f32) {
        self.hasher.update(value.to_bits().to_le_bytes());
    }

    /// Update with a Vec3.
    #[inline]
    pub fn update_vec3(&mut self, value: Vec3) {
        self.update_f32(value.x);
        self.update_f32(value.y);
        self.update_f32(value.z);
    }

    /// Update with a Quat in w, x, y, z order.
    #[inline]
    pub fn update_quat(&mut self, value: Quat) {
        self.update_f32(value.w);
        self.update_f32(value.x);
        self.update_f32(value.y);
        self.update_f32(value.z);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Short hex prefix of a hash for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..6])
}
