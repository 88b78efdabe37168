//! Runtime error taxonomy.
//!
//! Usage faults surface as `Err` from the offending call and never tear the
//! scheduler down. Device contention is not an error: it resolves through
//! preemption.

use robo_common::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// Call on a component that has already been shut down.
    #[error("runtime is closed")]
    Closed,

    /// Device lock requested by an action that is not running.
    #[error("action '{0}' is not running")]
    NotRunning(String),

    /// Control call before the robot was started.
    #[error("robot has not been started")]
    NotStarted,

    #[error("robot is already started")]
    AlreadyStarted,

    #[error("device {0} is not registered")]
    UnknownDevice(String),

    /// Action started from inside one of its own hooks.
    #[error("action '{0}' cannot be started from its own hook")]
    Reentrant(String),

    /// A user hook panicked on a runtime thread; the robot was halted.
    #[error("hook panicked: {0}")]
    HookPanicked(String),

    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
