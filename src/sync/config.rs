//! Synchronization Configuration
//!
//! One plain value handed to every component at construction time.
//! Client and server must agree on `motion` or prediction will diverge.

use serde::{Serialize, Deserialize};

/// Axis-aligned rectangle on the horizontal (X/Z) plane.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Minimum X
    pub min_x: f32,
    /// Maximum X
    pub max_x: f32,
    /// Minimum Z
    pub min_z: f32,
    /// Maximum Z
    pub max_z: f32,
}

impl Bounds {
    /// Square centred on the origin.
    pub const fn square(half_extent: f32) -> Self {
        Self {
            min_x: -half_extent,
            max_x: half_extent,
            min_z: -half_extent,
            max_z: half_extent,
        }
    }

    /// True if the rectangle has positive area.
    pub fn is_valid(&self) -> bool {
        self.min_x < self.max_x && self.min_z < self.max_z
    }
}

/// Parameters of the shared movement simulation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Units per second at full axis deflection.
    pub move_speed: f32,
    /// Playable area.
    pub bounds: Bounds,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            move_speed: 5.0,
            bounds: Bounds::square(50.0),
        }
    }
}

/// Configuration for prediction, server simulation and interpolation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Shared movement parameters.
    pub motion: MotionConfig,
    /// Seconds per client tick (also the dt of every issued command).
    pub client_tick_period: f32,
    /// Seconds per server tick.
    pub server_tick_period: f32,
    /// Buffered command time the server waits for before simulating an entity.
    pub input_buffer_time: f32,
    /// Buffered snapshot time an observer waits for before starting playback.
    pub interpolation_delay: f64,
    /// Multiplier on `(rtt/2 + server_tick_period)` when a client resyncs.
    pub resync_rtt_factor: f32,
    /// Largest forward sequence jump the server will pad; larger jumps are dropped.
    pub max_gap_fill: u32,
    /// Client ticks between RTT pings (0 disables pinging).
    pub ping_interval_ticks: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            motion: MotionConfig::default(),
            client_tick_period: 1.0 / 60.0,
            server_tick_period: 1.0 / 20.0,
            input_buffer_time: 0.1,
            interpolation_delay: 0.1,
            resync_rtt_factor: 2.0,
            max_gap_fill: 1024,
            ping_interval_ticks: 30,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A tick period is zero, negative or not finite.
    #[error("Tick period `{name}` must be positive, got {value}")]
    InvalidTickPeriod {
        /// Field name
        name: &'static str,
        /// Offending value
        value: f64,
    },

    /// Buffer time or delay is negative.
    #[error("`{name}` must not be negative, got {value}")]
    NegativeDelay {
        /// Field name
        name: &'static str,
        /// Offending value
        value: f64,
    },

    /// Movement speed is zero, negative or not finite.
    #[error("Move speed must be positive, got {0}")]
    InvalidSpeed(f32),

    /// Bounds rectangle is empty.
    #[error("Bounds must have positive area")]
    EmptyBounds,

    /// Resync factor is negative or not finite.
    #[error("Resync RTT factor must be non-negative, got {0}")]
    InvalidResyncFactor(f32),

    /// JSON parse failure.
    #[error("Invalid config JSON: {0}")]
    Json(String),
}

impl SyncConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s).map_err(|e| ConfigError::Json(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Check that every field is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("client_tick_period", self.client_tick_period),
            ("server_tick_period", self.server_tick_period),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidTickPeriod { name, value: value as f64 });
            }
        }

        if !(self.input_buffer_time >= 0.0) {
            return Err(ConfigError::NegativeDelay {
                name: "input_buffer_time",
                value: self.input_buffer_time as f64,
            });
        }
        if !(self.interpolation_delay >= 0.0) {
            return Err(ConfigError::NegativeDelay {
                name: "interpolation_delay",
                value: self.interpolation_delay,
            });
        }

        if !(self.motion.move_speed.is_finite() && self.motion.move_speed > 0.0) {
            return Err(ConfigError::InvalidSpeed(self.motion.move_speed));
        }
        if !self.motion.bounds.is_valid() {
            return Err(ConfigError::EmptyBounds);
        }
        if !(self.resync_rtt_factor.is_finite() && self.resync_rtt_factor >= 0.0) {
            return Err(ConfigError::InvalidResyncFactor(self.resync_rtt_factor));
        }

        Ok(())
    }
}
