//! # Movesync
//!
//! Client-side prediction, server reconciliation and snapshot interpolation
//! for real-time movement over an unreliable, unordered transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         MOVESYNC                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Deterministic primitives                │
//! │  ├── math.rs       - Vec2, Vec3, Quat (lerp / slerp)         │
//! │  ├── rng.rs        - Deterministic Xorshift128+ PRNG         │
//! │  └── hash.rs       - State hashing for convergence checks    │
//! │                                                              │
//! │  sync/             - Movement synchronization                │
//! │  ├── config.rs     - Injected configuration                  │
//! │  ├── command.rs    - Commands and the command buffer         │
//! │  ├── simulate.rs   - Shared deterministic movement step      │
//! │  ├── snapshot.rs   - Snapshots, acks, server history         │
//! │  ├── predictor.rs  - Client prediction                       │
//! │  ├── reconcile.rs  - Rollback, replay and resync             │
//! │  ├── server.rs     - Leaky-bucket server simulation          │
//! │  ├── interpolate.rs- Remote entity playback                  │
//! │  ├── rtt.rs        - Round-trip estimation                   │
//! │  └── events.rs     - Observability events and counters       │
//! │                                                              │
//! │  network/          - Bytes and endpoints                     │
//! │  ├── wire.rs       - Fixed binary layouts                    │
//! │  ├── protocol.rs   - Message kinds, envelope, dispatch       │
//! │  ├── transport.rs  - Transport trait, lossy in-memory link   │
//! │  ├── udp.rs        - Tokio UDP transport                     │
//! │  ├── peer.rs       - Server and client peers                 │
//! │  └── session.rs    - Loopback session harness                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! `sync::simulate` is the one function both sides run. It uses only
//! IEEE-754 add, multiply and clamp on `f32` plus a heading computed from
//! the input axis, so the same commands from the same baseline give the
//! same bits on client and server. Reconciliation relies on it: a client
//! whose prediction matched the server never moves when corrected.
//!
//! ## Flow
//!
//! ```text
//!  owner client                 server                     observer client
//!  ─────────────                ──────                     ───────────────
//!  issue + predict ──Commands──▶ intake (dedup / backfill)
//!                               leaky-bucket tick
//!  rollback + replay ◀──Ack──── snapshot ──Snapshot──────▶ interpolate
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod network;
pub mod sync;

// Re-export commonly used types
pub use core::math::{Quat, Vec2, Vec3};
pub use core::rng::DeterministicRng;
pub use network::protocol::{Datagram, EntityId, Message, MessageKind};
pub use network::peer::{ClientPeer, Role, ServerPeer};
pub use network::session::LoopbackSession;
pub use sync::{
    Ack, Actor, ClientPredictor, Command, CommandBuffer, RemoteInterpolator, ServerSimulator,
    Snapshot, SyncConfig, SyncEvent, SyncStats, Transform,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
