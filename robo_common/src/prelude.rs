//! Prelude module for common re-exports.
//!
//! ```rust
//! use robo_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};
pub use crate::profile::RobotProfile;

// ─── Devices ────────────────────────────────────────────────────────
pub use crate::device::{
    Device, DeviceFlags, DeviceId, MotorController, MotorCore, MotorOutput, SimMotor, SimOutput,
};

// ─── Input ──────────────────────────────────────────────────────────
pub use crate::input::{ControllerData, ControllerFeed, InputSource, PacketError};
pub use crate::transform::{AxisTransform, CubicAxisTransform, SquareRootAxisTransform};

// ─── Telemetry ──────────────────────────────────────────────────────
pub use crate::table::{KeyValueStore, NetworkTable};
