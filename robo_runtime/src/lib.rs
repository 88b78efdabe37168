//! # Robo Runtime
//!
//! Periodic lifecycle scheduler coupled to a cooperative, resource-locking
//! action engine for small robots.
//!
//! ## Components
//!
//! 1. **Device registry** ([`registry`]): live devices and robot-wide
//!    enable state
//! 2. **Action engine** ([`action`]): run state, the device lock table and
//!    preemption, ticked by the worker pool ([`scheduler`])
//! 3. **Trigger evaluator** ([`trigger`]): edge-driven action starts
//! 4. **Lifecycle scheduler** ([`robot`]): enable/disable state machine,
//!    user hooks and the watchdog
//!
//! Input reaches actions through [`gamepad::Gamepad`], which applies the
//! staleness guard. [`drive`] and [`control`] are helpers for action code.
//!
//! ## Ownership
//!
//! There is no global state. A [`robot::Robot`] owns its registry, action
//! manager and pool; hooks reach them through [`robot::RobotContext`].

pub mod action;
pub mod control;
pub mod drive;
pub mod error;
pub mod gamepad;
pub mod registry;
pub mod robot;
pub mod scheduler;
pub mod trigger;

/// Common re-exports.
pub mod prelude {
    pub use crate::action::{
        Action, ActionContext, ActionHandle, ActionId, ActionManager, ActionOutcome,
        ActionSeries,
    };
    pub use crate::control::{Pid, PidGains};
    pub use crate::drive::{ArcadeDriveHelper, MotorGroup, TankDriveHelper};
    pub use crate::error::RuntimeError;
    pub use crate::gamepad::Gamepad;
    pub use crate::registry::{DeviceHandle, DeviceRegistry, Lockable};
    pub use crate::robot::{Robot, RobotContext, RobotHooks, RobotState};
    pub use crate::trigger::{ActionTrigger, ButtonTrigger, Edge, TriggerId};
    pub use robo_common::prelude::*;
}
