//! Edge-driven triggers that start actions from input transitions.
//!
//! Triggers are polled once per lifecycle tick by
//! [`ActionManager::check_triggers`](crate::action::ActionManager::check_triggers).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use robo_common::input::InputSource;

use crate::action::ActionHandle;

static NEXT_TRIGGER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerId(u64);

impl TriggerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TRIGGER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Condition bound to a target action.
pub trait ActionTrigger: Send {
    /// Sample the condition. Called exactly once per tick, so implementations
    /// may keep the previous sample for edge detection.
    fn should_run(&mut self) -> bool;

    fn target(&self) -> &ActionHandle;

    /// Hard-restart a target that is already running instead of leaving it.
    fn do_restart(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Pressed,
    Released,
}

/// Fires on one edge of a button.
pub struct ButtonTrigger {
    source: Arc<dyn InputSource>,
    button: usize,
    edge: Edge,
    target: ActionHandle,
    restart: bool,
    last: bool,
}

impl ButtonTrigger {
    pub fn new(
        source: Arc<dyn InputSource>,
        button: usize,
        edge: Edge,
        target: ActionHandle,
        do_restart: bool,
    ) -> Self {
        Self {
            source,
            button,
            edge,
            target,
            restart: do_restart,
            last: false,
        }
    }

    pub fn pressed(
        source: Arc<dyn InputSource>,
        button: usize,
        target: ActionHandle,
        do_restart: bool,
    ) -> Self {
        Self::new(source, button, Edge::Pressed, target, do_restart)
    }

    pub fn released(
        source: Arc<dyn InputSource>,
        button: usize,
        target: ActionHandle,
        do_restart: bool,
    ) -> Self {
        Self::new(source, button, Edge::Released, target, do_restart)
    }
}

impl ActionTrigger for ButtonTrigger {
    fn should_run(&mut self) -> bool {
        let now = self.source.button(self.button);
        let fired = match self.edge {
            Edge::Pressed => now && !self.last,
            Edge::Released => !now && self.last,
        };
        self.last = now;
        fired
    }

    fn target(&self) -> &ActionHandle {
        &self.target
    }

    fn do_restart(&self) -> bool {
        self.restart
    }
}

impl fmt::Debug for ButtonTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ButtonTrigger")
            .field("button", &self.button)
            .field("edge", &self.edge)
            .field("target", &self.target.name())
            .field("restart", &self.restart)
            .finish()
    }
}
