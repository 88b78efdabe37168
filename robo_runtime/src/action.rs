//! Actions: cooperative units of device-mutating behavior.
//!
//! An action is driven through four hooks: `begin` once when started,
//! `process` every action period, `should_continue` right after each
//! `process`, and `finish(interrupted)` exactly once per run. Hooks of one
//! action never run concurrently with each other.
//!
//! Devices are claimed with [`ActionContext::lock_device`]. Claiming a
//! device held by another running action interrupts that action first.

pub mod manager;
pub mod series;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use static_assertions::assert_impl_all;

use crate::error::RuntimeError;
use crate::registry::Lockable;

pub use manager::ActionManager;
pub use series::ActionSeries;

static NEXT_ACTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "act#{}", self.0)
    }
}

/// How the most recent run of an action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// `should_continue` returned false; `finish(false)` ran.
    Completed,
    /// Stopped or preempted; `finish(true)` ran.
    Interrupted,
}

/// User behavior plugged into the engine.
pub trait Action: Send + 'static {
    fn begin(&mut self, _ctx: &ActionContext<'_>) {}

    fn process(&mut self, _ctx: &ActionContext<'_>) {}

    /// Evaluated after every `process`. Returning false completes the run.
    fn should_continue(&mut self, _ctx: &ActionContext<'_>) -> bool {
        true
    }

    fn finish(&mut self, _ctx: &ActionContext<'_>, _interrupted: bool) {}
}

pub(crate) struct ActionCell {
    id: ActionId,
    name: String,
    hooks: Mutex<Box<dyn Action>>,
}

/// Shared handle to an action. Clones refer to the same action.
#[derive(Clone)]
pub struct ActionHandle {
    cell: Arc<ActionCell>,
}

impl ActionHandle {
    pub fn new(name: impl Into<String>, action: impl Action) -> Self {
        Self {
            cell: Arc::new(ActionCell {
                id: ActionId(NEXT_ACTION_ID.fetch_add(1, Ordering::Relaxed)),
                name: name.into(),
                hooks: Mutex::new(Box::new(action)),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> ActionId {
        self.cell.id
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    #[inline]
    pub(crate) fn hooks(&self) -> &Mutex<Box<dyn Action>> {
        &self.cell.hooks
    }

    /// No other clone of this handle exists.
    pub(crate) fn is_unshared(&self) -> bool {
        Arc::strong_count(&self.cell) == 1
    }
}

impl PartialEq for ActionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Eq for ActionHandle {}

impl fmt::Debug for ActionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionHandle")
            .field("id", &self.cell.id)
            .field("name", &self.cell.name)
            .finish()
    }
}

assert_impl_all!(ActionHandle: Send, Sync, Clone);

/// What a hook can reach while it runs.
pub struct ActionContext<'a> {
    manager: &'a ActionManager,
    action: &'a ActionHandle,
}

impl<'a> ActionContext<'a> {
    pub(crate) fn new(manager: &'a ActionManager, action: &'a ActionHandle) -> Self {
        Self { manager, action }
    }

    pub fn manager(&self) -> &'a ActionManager {
        self.manager
    }

    /// The action whose hook is running.
    pub fn action(&self) -> &'a ActionHandle {
        self.action
    }

    /// Claim `device` for this action, interrupting its current holder.
    ///
    /// Fails with [`RuntimeError::NotRunning`] once this action has been
    /// stopped, even from inside its own `begin`.
    pub fn lock_device(&self, device: &dyn Lockable) -> Result<(), RuntimeError> {
        self.manager.lock_devices(self.action, &[device])
    }

    /// Claim several devices at once. Either all are claimed or none.
    pub fn lock_devices(&self, devices: &[&dyn Lockable]) -> Result<(), RuntimeError> {
        self.manager.lock_devices(self.action, devices)
    }

    pub fn is_running(&self) -> bool {
        self.manager.is_running(self.action)
    }

    /// Interrupt this action. `finish(true)` runs when the current hook returns.
    pub fn stop(&self) -> Result<bool, RuntimeError> {
        self.manager.stop_action(self.action)
    }
}
