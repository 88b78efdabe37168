//! Action engine: run state, the device lock table and trigger polling.
//!
//! # Locking
//!
//! All run state and the device lock table live behind one engine mutex.
//! A stop transition (running flag cleared, every lock of the action
//! released) is a single critical section, and preemption performs the
//! victim's stop transition in the same critical section that hands the
//! device to the new holder.
//!
//! Hooks run outside the engine mutex under the per-action hook mutex, so
//! `finish` never overlaps `process` of the same action. A stop transition
//! leaves a pending `finish` on the action; whoever next holds its hook
//! mutex delivers it, and always before a new `begin`. A thread that stops
//! an action whose hook it is currently running (self-stop, or a nested
//! start that preempts an outer action) leaves the pending `finish` to that
//! hook's return.
//!
//! Any other stopper waits for the victim's hook, so a preempting lock
//! returns only after the victim's `finish` ran. Threads that wait on a hook
//! while holding hooks of their own register in a wait-for table. If the
//! victim's hook holder is, directly or through other waiters, waiting on a
//! hook the stopper holds, the stopper stops waiting and delivery is left to
//! the in-flight hook.
//!
//! Entries of stopped actions are dropped once nothing outside the engine
//! refers to the action any more.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock};
use robo_common::device::DeviceId;
use tracing::{debug, warn};

use super::{Action, ActionContext, ActionHandle, ActionId, ActionOutcome};
use crate::error::RuntimeError;
use crate::registry::{DeviceRegistry, Lockable};
use crate::scheduler::{Scheduler, TaskControl, TaskId};
use crate::trigger::{ActionTrigger, TriggerId};

/// Re-check interval while waiting on another action's hook.
const HOOK_WAIT_SLICE: Duration = Duration::from_millis(1);

// ─── Hook Frames ────────────────────────────────────────────────────

thread_local! {
    /// Actions whose hook mutex this thread currently holds, innermost last.
    static ACTIVE_HOOKS: RefCell<Vec<ActionId>> = const { RefCell::new(Vec::new()) };
}

struct HookFrame(ActionId);

impl HookFrame {
    fn enter(id: ActionId) -> Self {
        ACTIVE_HOOKS.with_borrow_mut(|stack| stack.push(id));
        Self(id)
    }
}

impl Drop for HookFrame {
    fn drop(&mut self) {
        ACTIVE_HOOKS.with_borrow_mut(|stack| {
            if let Some(pos) = stack.iter().rposition(|&id| id == self.0) {
                stack.remove(pos);
            }
        });
    }
}

fn hook_active_here(id: ActionId) -> bool {
    ACTIVE_HOOKS.with_borrow(|stack| stack.contains(&id))
}

fn holds_any_hook() -> bool {
    ACTIVE_HOOKS.with_borrow(|stack| !stack.is_empty())
}

// ─── Engine State ───────────────────────────────────────────────────

struct Entry {
    handle: ActionHandle,
    running: bool,
    generation: u64,
    locked: Vec<DeviceId>,
    outcome: Option<ActionOutcome>,
    in_hook: bool,
    /// Thread running the in-flight hook.
    hook_thread: Option<ThreadId>,
    /// `finish(interrupted)` owed for the last stop.
    pending_finish: Option<bool>,
    task: Option<TaskId>,
}

impl Entry {
    fn new(handle: ActionHandle) -> Self {
        Self {
            handle,
            running: false,
            generation: 0,
            locked: Vec::new(),
            outcome: None,
            in_hook: false,
            hook_thread: None,
            pending_finish: None,
            task: None,
        }
    }
}

#[derive(Default)]
struct Engine {
    entries: HashMap<ActionId, Entry>,
    /// Authoritative device ownership. Owners are always running.
    owners: HashMap<DeviceId, ActionId>,
    /// Hook-holding threads blocked on another action's hook.
    waiting: HashMap<ThreadId, ActionId>,
    closed: bool,
}

impl Engine {
    /// Stop transition. Returns `None` if `id` was not running, otherwise
    /// the tick task to cancel.
    fn mark_stopped(&mut self, id: ActionId, outcome: ActionOutcome) -> Option<Option<TaskId>> {
        let entry = self.entries.get_mut(&id)?;
        if !entry.running {
            return None;
        }
        entry.running = false;
        entry.outcome = Some(outcome);
        entry.pending_finish = Some(outcome == ActionOutcome::Interrupted);
        for device in entry.locked.drain(..) {
            if self.owners.get(&device) == Some(&id) {
                self.owners.remove(&device);
            }
        }
        Some(entry.task.take())
    }

    fn is_current(&self, id: ActionId, generation: u64) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|e| e.running && e.generation == generation)
    }

    fn has_pending_finish(&self, id: ActionId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|e| e.pending_finish.is_some())
    }

    /// Whether waiting on the hook of `target` would close a wait-for cycle
    /// through `me`.
    fn closes_cycle(&self, mut target: ActionId, me: ThreadId) -> bool {
        // A chain longer than the waiter count is a cycle not involving `me`.
        for _ in 0..=self.waiting.len() {
            let Some(holder) = self.entries.get(&target).and_then(|e| e.hook_thread) else {
                return false;
            };
            if holder == me {
                return true;
            }
            match self.waiting.get(&holder) {
                Some(&next) => target = next,
                None => return false,
            }
        }
        false
    }

    /// Drop stopped entries no handle outside the engine refers to.
    fn prune(&mut self) {
        let before = self.entries.len();
        self.entries.retain(|_, e| {
            e.running || e.in_hook || e.pending_finish.is_some() || !e.handle.is_unshared()
        });
        let pruned = before - self.entries.len();
        if pruned > 0 {
            debug!(pruned, "dropped released action entries");
        }
    }
}

/// Registers the calling thread in the wait-for table until dropped.
struct HookWait<'a> {
    engine: &'a Mutex<Engine>,
    thread: ThreadId,
}

impl<'a> HookWait<'a> {
    fn register(engine: &'a Mutex<Engine>, target: ActionId) -> Self {
        let thread = thread::current().id();
        engine.lock().waiting.insert(thread, target);
        Self { engine, thread }
    }
}

impl Drop for HookWait<'_> {
    fn drop(&mut self) {
        self.engine.lock().waiting.remove(&self.thread);
    }
}

/// Clears `in_hook` if a hook unwinds.
struct InHookGuard<'a> {
    engine: &'a Mutex<Engine>,
    id: ActionId,
}

impl Drop for InHookGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking()
            && let Some(entry) = self.engine.lock().entries.get_mut(&self.id)
        {
            entry.in_hook = false;
            entry.hook_thread = None;
        }
    }
}

// ─── Manager ────────────────────────────────────────────────────────

/// Owns run state for every action started through it.
///
/// Created behind `Arc`. Without an attached [`Scheduler`] running actions
/// are advanced only by [`ActionManager::tick_all`].
pub struct ActionManager {
    me: Weak<ActionManager>,
    engine: Mutex<Engine>,
    triggers: Mutex<Vec<(TriggerId, Box<dyn ActionTrigger>)>>,
    scheduler: RwLock<Option<Arc<Scheduler>>>,
    registry: Arc<DeviceRegistry>,
    period: Duration,
}

impl ActionManager {
    /// `period` is the interval between two ticks of one running action.
    pub fn new(registry: Arc<DeviceRegistry>, period: Duration) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            engine: Mutex::new(Engine::default()),
            triggers: Mutex::new(Vec::new()),
            scheduler: RwLock::new(None),
            registry,
            period,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Hand periodic ticking to `scheduler`. Actions already running are
    /// scheduled immediately.
    pub fn attach_scheduler(&self, scheduler: Arc<Scheduler>) {
        *self.scheduler.write() = Some(scheduler);
        let running: Vec<(ActionHandle, u64)> = {
            let engine = self.engine.lock();
            engine
                .entries
                .values()
                .filter(|e| e.running && e.task.is_none())
                .map(|e| (e.handle.clone(), e.generation))
                .collect()
        };
        for (handle, generation) in running {
            self.schedule_ticks(&handle, generation);
        }
    }

    /// Detach the scheduler; running actions stop being ticked.
    pub fn detach_scheduler(&self) -> Option<Arc<Scheduler>> {
        let scheduler = self.scheduler.write().take();
        let mut engine = self.engine.lock();
        for entry in engine.entries.values_mut() {
            if let (Some(task), Some(s)) = (entry.task.take(), scheduler.as_ref()) {
                s.cancel(task);
            }
        }
        scheduler
    }

    fn schedule_ticks(&self, handle: &ActionHandle, generation: u64) {
        let Some(scheduler) = self.scheduler.read().clone() else {
            return;
        };
        let me = self.me.clone();
        let target = handle.clone();
        let scheduled = scheduler.schedule_repeated(Duration::ZERO, self.period, move || {
            match me.upgrade() {
                Some(manager) if manager.tick(&target, generation) => TaskControl::Continue,
                _ => TaskControl::Stop,
            }
        });
        match scheduled {
            Ok(task) => {
                let mut engine = self.engine.lock();
                match engine.entries.get_mut(&handle.id()) {
                    Some(entry) if entry.running && entry.generation == generation => {
                        entry.task = Some(task);
                    }
                    _ => {
                        drop(engine);
                        scheduler.cancel(task);
                    }
                }
            }
            Err(e) => warn!(action = handle.name(), error = %e, "failed to schedule action ticks"),
        }
    }

    // ─── Queries ────────────────────────────────────────────────────

    pub fn is_closed(&self) -> bool {
        self.engine.lock().closed
    }

    pub fn is_running(&self, handle: &ActionHandle) -> bool {
        self.engine
            .lock()
            .entries
            .get(&handle.id())
            .is_some_and(|e| e.running)
    }

    /// How the last run ended; `None` while running or if never run.
    pub fn outcome(&self, handle: &ActionHandle) -> Option<ActionOutcome> {
        self.engine
            .lock()
            .entries
            .get(&handle.id())
            .and_then(|e| e.outcome)
    }

    pub fn lock_owner(&self, device: DeviceId) -> Option<ActionId> {
        self.engine.lock().owners.get(&device).copied()
    }

    pub fn locked_devices(&self, handle: &ActionHandle) -> Vec<DeviceId> {
        self.engine
            .lock()
            .entries
            .get(&handle.id())
            .map(|e| e.locked.clone())
            .unwrap_or_default()
    }

    pub fn running_actions(&self) -> Vec<ActionHandle> {
        let engine = self.engine.lock();
        let mut running: Vec<ActionHandle> = engine
            .entries
            .values()
            .filter(|e| e.running)
            .map(|e| e.handle.clone())
            .collect();
        running.sort_by_key(ActionHandle::id);
        running
    }

    fn is_current(&self, id: ActionId, generation: u64) -> bool {
        self.engine.lock().is_current(id, generation)
    }

    // ─── Start / Stop ───────────────────────────────────────────────

    /// Start `handle` and run its `begin` on the calling thread.
    ///
    /// Returns `Ok(false)` without side effects if it is already running.
    pub fn start_action(&self, handle: &ActionHandle) -> Result<bool, RuntimeError> {
        let id = handle.id();
        if hook_active_here(id) {
            return Err(RuntimeError::Reentrant(handle.name().to_string()));
        }
        {
            let engine = self.engine.lock();
            if engine.closed {
                return Err(RuntimeError::Closed);
            }
            if engine.entries.get(&id).is_some_and(|e| e.running) {
                debug!(action = handle.name(), "start ignored, already running");
                return Ok(false);
            }
        }

        // Serialize with any hook still in flight from a previous run and
        // deliver that run's finish first.
        let wait = holds_any_hook().then(|| HookWait::register(&self.engine, id));
        let mut hooks = handle.hooks().lock();
        drop(wait);
        self.deliver_pending(handle, &mut hooks);
        let generation = {
            let mut engine = self.engine.lock();
            if engine.closed {
                return Err(RuntimeError::Closed);
            }
            engine.prune();
            let entry = engine
                .entries
                .entry(id)
                .or_insert_with(|| Entry::new(handle.clone()));
            if entry.running {
                return Ok(false);
            }
            entry.running = true;
            entry.generation += 1;
            entry.outcome = None;
            entry.generation
        };

        debug!(action = handle.name(), "action begin");
        self.invoke(handle, &mut hooks, |action, ctx| action.begin(ctx));
        drop(hooks);

        if self.is_current(id, generation) {
            self.schedule_ticks(handle, generation);
        }
        Ok(true)
    }

    /// Interrupt `handle`: release its devices and run `finish(true)`.
    ///
    /// Returns `Ok(false)` if it was not running.
    pub fn stop_action(&self, handle: &ActionHandle) -> Result<bool, RuntimeError> {
        self.stop_with(handle, ActionOutcome::Interrupted)
    }

    /// Stop `handle` if running, then start it again.
    pub fn restart_action(&self, handle: &ActionHandle) -> Result<bool, RuntimeError> {
        if hook_active_here(handle.id()) {
            return Err(RuntimeError::Reentrant(handle.name().to_string()));
        }
        self.stop_with(handle, ActionOutcome::Interrupted)?;
        self.start_action(handle)
    }

    /// Interrupt every running action. Returns how many were stopped.
    pub fn stop_all(&self) -> Result<usize, RuntimeError> {
        let mut stopped = 0;
        for handle in self.running_actions() {
            if self.stop_action(&handle)? {
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    /// Interrupt everything, drop all triggers and refuse further use.
    pub fn close(&self) {
        let stopped: Vec<(ActionHandle, Option<TaskId>)> = {
            let mut engine = self.engine.lock();
            if engine.closed {
                return;
            }
            engine.closed = true;
            let ids: Vec<ActionId> = engine
                .entries
                .values()
                .filter(|e| e.running)
                .map(|e| e.handle.id())
                .collect();
            ids.into_iter()
                .filter_map(|id| {
                    let task = engine.mark_stopped(id, ActionOutcome::Interrupted)?;
                    Some((engine.entries.get(&id)?.handle.clone(), task))
                })
                .collect()
        };
        self.triggers.lock().clear();
        for (handle, task) in stopped {
            self.complete_stop(&handle, true, task);
        }
        debug!("action manager closed");
    }

    fn stop_with(&self, handle: &ActionHandle, outcome: ActionOutcome) -> Result<bool, RuntimeError> {
        let task = {
            let mut engine = self.engine.lock();
            if engine.closed {
                return Err(RuntimeError::Closed);
            }
            match engine.mark_stopped(handle.id(), outcome) {
                Some(task) => task,
                None => return Ok(false),
            }
        };
        self.complete_stop(handle, outcome == ActionOutcome::Interrupted, task);
        Ok(true)
    }

    fn complete_stop(&self, handle: &ActionHandle, interrupted: bool, task: Option<TaskId>) {
        if let (Some(task), Some(scheduler)) = (task, self.scheduler.read().as_ref()) {
            scheduler.cancel(task);
        }
        debug!(action = handle.name(), interrupted, "action finish");
        self.run_finish(handle);
    }

    /// Deliver the pending `finish` of a stopped action.
    fn run_finish(&self, handle: &ActionHandle) {
        let id = handle.id();
        if hook_active_here(id) {
            // Delivered when the running hook returns.
            return;
        }
        if !holds_any_hook() {
            let mut hooks = handle.hooks().lock();
            self.deliver_pending(handle, &mut hooks);
            return;
        }
        let me = thread::current().id();
        let wait = HookWait::register(&self.engine, id);
        loop {
            if let Some(mut hooks) = handle.hooks().try_lock_for(HOOK_WAIT_SLICE) {
                drop(wait);
                self.deliver_pending(handle, &mut hooks);
                return;
            }
            let engine = self.engine.lock();
            let Some(entry) = engine.entries.get(&id) else {
                return;
            };
            if entry.pending_finish.is_none() && !entry.in_hook {
                // Delivered by the hook that just returned.
                return;
            }
            if engine.closes_cycle(id, me) {
                debug!(action = handle.name(), "hook wait cycle, finish left to in-flight hook");
                return;
            }
        }
    }

    fn deliver_pending(&self, handle: &ActionHandle, hooks: &mut MutexGuard<'_, Box<dyn Action>>) {
        if self.engine.lock().has_pending_finish(handle.id()) {
            self.invoke(handle, hooks, |_, _| ());
        }
    }

    /// Run one hook with the hook mutex held, then deliver any pending finish.
    fn invoke<R>(
        &self,
        handle: &ActionHandle,
        hooks: &mut MutexGuard<'_, Box<dyn Action>>,
        f: impl FnOnce(&mut dyn Action, &ActionContext<'_>) -> R,
    ) -> R {
        let id = handle.id();
        if let Some(entry) = self.engine.lock().entries.get_mut(&id) {
            entry.in_hook = true;
            entry.hook_thread = Some(thread::current().id());
        }
        let _in_hook = InHookGuard {
            engine: &self.engine,
            id,
        };
        let _frame = HookFrame::enter(id);
        let ctx = ActionContext::new(self, handle);
        let out = f(&mut ***hooks, &ctx);
        loop {
            // Claiming the last pending finish and leaving the hook is one
            // critical section; `run_finish` relies on it.
            let pending = {
                let mut engine = self.engine.lock();
                match engine.entries.get_mut(&id) {
                    Some(entry) => {
                        let next = entry.pending_finish.take();
                        if next.is_none() {
                            entry.in_hook = false;
                            entry.hook_thread = None;
                        }
                        next
                    }
                    None => None,
                }
            };
            match pending {
                Some(interrupted) => hooks.finish(&ctx, interrupted),
                None => break,
            }
        }
        out
    }

    // ─── Ticking ────────────────────────────────────────────────────

    /// One `process` / `should_continue` step. Returns whether the run that
    /// `generation` identifies is still live.
    pub(crate) fn tick(&self, handle: &ActionHandle, generation: u64) -> bool {
        let id = handle.id();
        if !self.is_current(id, generation) {
            return false;
        }
        if hook_active_here(id) {
            return true;
        }
        let mut hooks = handle.hooks().lock();
        if !self.is_current(id, generation) {
            return false;
        }
        self.invoke(handle, &mut hooks, |action, ctx| {
            action.process(ctx);
            if self.is_current(id, generation) && !action.should_continue(ctx) {
                // finish(false) runs once this hook returns.
                let _ = self.stop_with(handle, ActionOutcome::Completed);
            }
        });
        self.is_current(id, generation)
    }

    /// Tick every running action once, in creation order.
    ///
    /// Actions started during the pass are first ticked on the next pass.
    /// Used for manual stepping; do not mix with an attached scheduler.
    pub fn tick_all(&self) {
        let mut running: Vec<(ActionHandle, u64)> = {
            let engine = self.engine.lock();
            engine
                .entries
                .values()
                .filter(|e| e.running)
                .map(|e| (e.handle.clone(), e.generation))
                .collect()
        };
        running.sort_by_key(|(h, _)| h.id());
        for (handle, generation) in running {
            self.tick(&handle, generation);
        }
    }

    // ─── Device Locks ───────────────────────────────────────────────

    pub(crate) fn lock_devices(
        &self,
        holder: &ActionHandle,
        devices: &[&dyn Lockable],
    ) -> Result<(), RuntimeError> {
        let id = holder.id();
        let mut preempted: Vec<(ActionHandle, Option<TaskId>)> = Vec::new();
        {
            let mut engine = self.engine.lock();
            if engine.closed {
                return Err(RuntimeError::Closed);
            }
            if !engine.entries.get(&id).is_some_and(|e| e.running) {
                return Err(RuntimeError::NotRunning(holder.name().to_string()));
            }
            if let Some(unknown) = devices
                .iter()
                .find(|d| !self.registry.contains(d.device_id()))
            {
                return Err(RuntimeError::UnknownDevice(unknown.device_name().to_string()));
            }

            for device in devices {
                let dev = device.device_id();
                match engine.owners.get(&dev).copied() {
                    Some(owner) if owner == id => continue,
                    Some(owner) => {
                        if let Some(task) = engine.mark_stopped(owner, ActionOutcome::Interrupted)
                            && let Some(victim) = engine.entries.get(&owner)
                        {
                            warn!(
                                device = device.device_name(),
                                victim = victim.handle.name(),
                                by = holder.name(),
                                "device preempted"
                            );
                            preempted.push((victim.handle.clone(), task));
                        }
                    }
                    None => {}
                }
                engine.owners.insert(dev, id);
                if let Some(entry) = engine.entries.get_mut(&id) {
                    entry.locked.push(dev);
                }
            }
        }
        for (victim, task) in preempted {
            self.complete_stop(&victim, true, task);
        }
        Ok(())
    }

    /// Drop any lock on `device` without stopping its holder.
    pub fn release_device(&self, device: DeviceId) -> Option<ActionId> {
        let mut engine = self.engine.lock();
        let owner = engine.owners.remove(&device)?;
        if let Some(entry) = engine.entries.get_mut(&owner) {
            entry.locked.retain(|&d| d != device);
        }
        Some(owner)
    }

    // ─── Triggers ───────────────────────────────────────────────────

    pub fn add_trigger(
        &self,
        trigger: impl ActionTrigger + 'static,
    ) -> Result<TriggerId, RuntimeError> {
        if self.is_closed() {
            return Err(RuntimeError::Closed);
        }
        let id = TriggerId::next();
        self.triggers.lock().push((id, Box::new(trigger)));
        Ok(id)
    }

    pub fn remove_trigger(&self, id: TriggerId) -> bool {
        let mut triggers = self.triggers.lock();
        let before = triggers.len();
        triggers.retain(|(t, _)| *t != id);
        triggers.len() != before
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.lock().len()
    }

    /// Sample every trigger once and start (or restart) the fired targets.
    pub fn check_triggers(&self) {
        let fired: Vec<(ActionHandle, bool)> = {
            let mut triggers = self.triggers.lock();
            triggers
                .iter_mut()
                .filter_map(|(_, t)| {
                    t.should_run()
                        .then(|| (t.target().clone(), t.do_restart()))
                })
                .collect()
        };
        for (target, restart) in fired {
            debug!(action = target.name(), restart, "trigger fired");
            let result = if restart {
                self.restart_action(&target)
            } else {
                self.start_action(&target)
            };
            if let Err(e) = result {
                warn!(action = target.name(), error = %e, "trigger could not start action");
            }
        }
    }
}
