//! Robot lifecycle state machine.
//!
//! Constructed → Started → Disabled ↔ Enabled, any → Stopped.

use std::fmt;

/// Robot lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RobotState {
    Constructed = 0,
    Started = 1,
    Enabled = 2,
    Disabled = 3,
    Stopped = 4,
}

impl RobotState {
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Constructed),
            1 => Some(Self::Started),
            2 => Some(Self::Enabled),
            3 => Some(Self::Disabled),
            4 => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Value published under the `robotstate` table key, if any.
    pub const fn table_value(self) -> Option<&'static str> {
        match self {
            Self::Enabled => Some("ENABLED"),
            Self::Disabled => Some("DISABLED"),
            _ => None,
        }
    }
}

impl fmt::Display for RobotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of a lifecycle transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded, new state.
    Ok(RobotState),
    /// Event does not move the machine (already there).
    Unchanged(RobotState),
    /// Transition rejected, with reason.
    Rejected(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotEvent {
    /// Lifecycle thread (or manual stepping) begins.
    Start,
    /// `robot_started` returned; settle into Disabled.
    Ready,
    Enable,
    Disable,
    Stop,
}

#[derive(Debug, Clone)]
pub struct RobotStateMachine {
    state: RobotState,
}

impl Default for RobotStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RobotStateMachine {
    pub const fn new() -> Self {
        Self {
            state: RobotState::Constructed,
        }
    }

    #[inline]
    pub const fn state(&self) -> RobotState {
        self.state
    }

    pub fn handle_event(&mut self, event: RobotEvent) -> TransitionResult {
        use RobotEvent::*;
        use RobotState::*;

        let next = match (self.state, event) {
            (Stopped, Stop) => return TransitionResult::Unchanged(Stopped),
            (_, Stop) => Stopped,
            (Stopped, _) => return TransitionResult::Rejected("Stopped: robot is shut down"),

            (Constructed, Start) => Started,
            (Started, Ready) => Disabled,

            (Disabled, Enable) => Enabled,
            (Enabled, Disable) => Disabled,
            (Enabled, Enable) | (Disabled, Disable) => {
                return TransitionResult::Unchanged(self.state);
            }

            (Constructed, _) => return TransitionResult::Rejected("Constructed: only Start allowed"),
            (Started, _) => return TransitionResult::Rejected("Started: waiting for robot_started"),
            _ => return TransitionResult::Rejected("invalid event for current state"),
        };

        self.state = next;
        TransitionResult::Ok(next)
    }

    #[inline]
    pub const fn is_enabled(&self) -> bool {
        matches!(self.state, RobotState::Enabled)
    }
}
