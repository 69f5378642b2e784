//! Core deterministic primitives.
//!
//! Math, seeded randomness and state hashing shared by the client and the
//! server. Nothing in here reads the clock or touches the network.

pub mod math;
pub mod rng;
pub mod hash;

// Re-export core types
pub use math::{Vec2, Vec3, Quat};
pub use rng::DeterministicRng;
pub use hash::{StateHash, StateHasher};
