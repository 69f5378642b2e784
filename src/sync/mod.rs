//! Movement Synchronization
//!
//! Prediction and reconciliation for the locally owned entity, the
//! authoritative leaky-bucket simulation on the server, and snapshot
//! interpolation for everyone else. Nothing in here touches bytes or
//! sockets; see `network` for that.

pub mod command;
pub mod config;
pub mod events;
pub mod interpolate;
pub mod predictor;
pub mod reconcile;
pub mod rtt;
pub mod server;
pub mod simulate;
pub mod snapshot;

pub use command::{Command, CommandBuffer, Intake};
pub use config::{Bounds, ConfigError, MotionConfig, SyncConfig};
pub use events::{Instrument, SyncEvent, SyncStats};
pub use interpolate::{Frame, Policy, RemoteInterpolator};
pub use predictor::{ClientPredictor, PredictedTick};
pub use reconcile::{Reconciler, Rollback};
pub use rtt::RttEstimator;
pub use server::{ServerSimulator, TickOutput};
pub use simulate::{heading_degrees, simulate, simulate_actor, Actor, Transform};
pub use snapshot::{Ack, Snapshot, SnapshotHistory};
