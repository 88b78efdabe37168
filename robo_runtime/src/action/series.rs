//! Sequential composition of actions.

use tracing::{debug, warn};

use super::{Action, ActionContext, ActionHandle, ActionOutcome};

/// Runs its members one after another, then an optional finish action.
///
/// A member that completes hands over to the next one. A member that is
/// interrupted from outside (stopped or preempted) ends the series as
/// interrupted and the finish action is not started. Interrupting the
/// series interrupts the member currently running.
pub struct ActionSeries {
    members: Vec<ActionHandle>,
    finish_action: Option<ActionHandle>,
    index: usize,
}

impl ActionSeries {
    pub fn new(members: Vec<ActionHandle>) -> Self {
        Self {
            members,
            finish_action: None,
            index: 0,
        }
    }

    /// Start `action` after the last member completes.
    pub fn with_finish_action(mut self, action: ActionHandle) -> Self {
        self.finish_action = Some(action);
        self
    }

    pub fn members(&self) -> &[ActionHandle] {
        &self.members
    }

    fn start_current(&self, ctx: &ActionContext<'_>) {
        let Some(member) = self.members.get(self.index) else {
            return;
        };
        debug!(series = ctx.action().name(), member = member.name(), "series step");
        if let Err(e) = ctx.manager().start_action(member) {
            warn!(series = ctx.action().name(), member = member.name(), error = %e, "series member failed to start");
        }
    }
}

impl Action for ActionSeries {
    fn begin(&mut self, ctx: &ActionContext<'_>) {
        self.index = 0;
        self.start_current(ctx);
    }

    fn process(&mut self, ctx: &ActionContext<'_>) {
        let Some(member) = self.members.get(self.index) else {
            return;
        };
        let manager = ctx.manager();
        if manager.is_running(member) {
            return;
        }
        match manager.outcome(member) {
            Some(ActionOutcome::Completed) => {
                self.index += 1;
                self.start_current(ctx);
            }
            Some(ActionOutcome::Interrupted) => {
                debug!(series = ctx.action().name(), member = member.name(), "series member interrupted");
                let _ = ctx.stop();
            }
            // Start was refused earlier; try again.
            None => self.start_current(ctx),
        }
    }

    fn should_continue(&mut self, _ctx: &ActionContext<'_>) -> bool {
        self.index < self.members.len()
    }

    fn finish(&mut self, ctx: &ActionContext<'_>, interrupted: bool) {
        if interrupted {
            if let Some(member) = self.members.get(self.index) {
                let _ = ctx.manager().stop_action(member);
            }
            return;
        }
        if let Some(action) = &self.finish_action
            && let Err(e) = ctx.manager().start_action(action)
        {
            warn!(series = ctx.action().name(), error = %e, "finish action failed to start");
        }
    }
}
