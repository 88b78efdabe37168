//! Robot lifecycle scheduler.
//!
//! One lifecycle thread ticks at `periodic_function_rate`. Each tick runs,
//! in order:
//!
//! 1. Watchdog check (a trip disables watchdog-governed devices and forces
//!    the robot Disabled)
//! 2. Pending enable / disable / stop commands
//! 3. `enabled_periodic` or `disabled_periodic`
//! 4. `periodic`
//! 5. Trigger evaluation
//!
//! Between ticks the loop also wakes at the watchdog deadline, so a trip
//! never waits for the next tick.
//!
//! Running actions are ticked independently by the worker pool. In manual
//! mode ([`Robot::begin_manual`] + [`Robot::step`]) there is no thread and
//! no pool: `step` runs one tick on the caller and then one pass over every
//! running action.

pub mod machine;
pub mod watchdog;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use robo_common::consts::ROBOT_STATE_KEY;
use robo_common::device::{Device, DeviceFlags};
use robo_common::profile::RobotProfile;
use robo_common::table::{KeyValueStore, NetworkTable};
use tracing::{debug, error, info, warn};

use crate::action::ActionManager;
use crate::error::RuntimeError;
use crate::registry::{DeviceHandle, DeviceRegistry, Lockable};
use crate::scheduler::{FaultSlot, Scheduler, panic_message};

pub use machine::{RobotEvent, RobotState, RobotStateMachine, TransitionResult};
pub use watchdog::Watchdog;

#[cfg(feature = "rt")]
const LIFECYCLE_RT_PRIORITY: i32 = 50;

/// User robot behavior. All hooks run on the lifecycle thread.
pub trait RobotHooks: Send + 'static {
    /// Once, before the robot settles into Disabled.
    fn robot_started(&mut self, _ctx: &RobotContext) {}

    fn robot_enabled(&mut self, _ctx: &RobotContext) {}

    /// On every Disabled edge, and once right after `robot_started`.
    fn robot_disabled(&mut self, _ctx: &RobotContext) {}

    fn enabled_periodic(&mut self, _ctx: &RobotContext) {}

    fn disabled_periodic(&mut self, _ctx: &RobotContext) {}

    /// Every tick, after the state-specific hook.
    fn periodic(&mut self, _ctx: &RobotContext) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Enable,
    Disable,
    Stop,
}

// ─── Timing ─────────────────────────────────────────────────────────

/// Lifecycle loop timing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    /// Ticks that took longer than the period.
    pub overruns: u64,
    pub max_tick: Duration,
    pub total: Duration,
}

impl LoopStats {
    fn record(&mut self, elapsed: Duration, period: Duration) -> bool {
        self.ticks += 1;
        self.total += elapsed;
        self.max_tick = self.max_tick.max(elapsed);
        let overrun = elapsed > period;
        if overrun {
            self.overruns += 1;
        }
        overrun
    }

    pub fn average(&self) -> Duration {
        if self.ticks == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total.as_nanos() / u128::from(self.ticks);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

// ─── Context ────────────────────────────────────────────────────────

struct Shared {
    profile: Arc<RobotProfile>,
    devices: Arc<DeviceRegistry>,
    actions: Arc<ActionManager>,
    table: NetworkTable,
    state: AtomicU8,
    watchdog: Mutex<Watchdog>,
    commands: Sender<Command>,
    running: AtomicBool,
    closed: AtomicBool,
    faults: FaultSlot,
    stats: Mutex<LoopStats>,
}

/// Handle to the robot's shared state, passed to every hook.
///
/// Clones refer to the same robot. Control calls fail with
/// [`RuntimeError::Closed`] once the robot has been shut down.
#[derive(Clone)]
pub struct RobotContext {
    shared: Arc<Shared>,
}

impl RobotContext {
    pub fn profile(&self) -> &RobotProfile {
        &self.shared.profile
    }

    pub fn actions(&self) -> &Arc<ActionManager> {
        &self.shared.actions
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.shared.devices
    }

    pub fn table(&self) -> &NetworkTable {
        &self.shared.table
    }

    pub fn state(&self) -> RobotState {
        RobotState::from_u8(self.shared.state.load(Ordering::SeqCst)).unwrap_or(RobotState::Stopped)
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == RobotState::Enabled
    }

    pub fn watchdog_tripped(&self) -> bool {
        self.shared.watchdog.lock().is_tripped()
    }

    pub fn loop_stats(&self) -> LoopStats {
        *self.shared.stats.lock()
    }

    /// First hook panic recorded on a runtime thread, if any.
    pub fn fault(&self) -> Option<String> {
        self.shared.faults.get()
    }

    fn ensure_open(&self) -> Result<(), RuntimeError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(RuntimeError::Closed);
        }
        Ok(())
    }

    /// Reset the watchdog deadline. After a trip this also brings back
    /// watchdog-governed devices (those following robot state only while the
    /// robot is enabled); the robot itself stays Disabled until enabled again.
    pub fn feed_watchdog(&self) -> Result<(), RuntimeError> {
        self.ensure_open()?;
        let recovered = self.shared.watchdog.lock().feed(Instant::now());
        if recovered {
            info!("watchdog fed after trip");
            self.shared.devices.watchdog_recover(self.is_enabled());
        }
        Ok(())
    }

    pub fn request_enable(&self) -> Result<(), RuntimeError> {
        self.send(Command::Enable)
    }

    pub fn request_disable(&self) -> Result<(), RuntimeError> {
        self.send(Command::Disable)
    }

    /// Ask the lifecycle loop to exit after the current tick.
    pub fn request_stop(&self) -> Result<(), RuntimeError> {
        self.send(Command::Stop)
    }

    fn send(&self, command: Command) -> Result<(), RuntimeError> {
        self.ensure_open()?;
        if self.state() == RobotState::Constructed {
            return Err(RuntimeError::NotStarted);
        }
        self.shared
            .commands
            .send(command)
            .map_err(|_| RuntimeError::Closed)
    }

    /// Register a device. A device that follows robot state is enabled
    /// right away if the robot is enabled.
    pub fn register_device<D: Device + 'static>(
        &self,
        device: D,
    ) -> Result<DeviceHandle<D>, RuntimeError> {
        self.register_device_arc(Arc::new(device))
    }

    pub fn register_device_arc<D: Device + 'static>(
        &self,
        device: Arc<D>,
    ) -> Result<DeviceHandle<D>, RuntimeError> {
        self.ensure_open()?;
        if self.is_enabled() && device.flags().contains(DeviceFlags::MATCHES_ROBOT_STATE) {
            device.enable();
        }
        Ok(self.shared.devices.register_arc(device))
    }

    /// Disable a device, drop any action lock on it and unregister it.
    pub fn destroy_device<D: Device + ?Sized>(
        &self,
        handle: DeviceHandle<D>,
    ) -> Result<(), RuntimeError> {
        self.ensure_open()?;
        let id = handle.id();
        let Some(device) = self.shared.devices.get(id) else {
            return Err(RuntimeError::UnknownDevice(handle.device_name().to_string()));
        };
        device.disable();
        if let Some(owner) = self.shared.actions.release_device(id) {
            debug!(device = device.name(), %owner, "lock dropped with device");
        }
        self.shared.devices.unregister(id);
        debug!(device = device.name(), %id, "device destroyed");
        Ok(())
    }
}

// ─── Lifecycle ──────────────────────────────────────────────────────

struct Lifecycle<H> {
    ctx: RobotContext,
    hooks: H,
    machine: RobotStateMachine,
    commands: Receiver<Command>,
}

impl<H: RobotHooks> Lifecycle<H> {
    fn publish(&self, state: RobotState) {
        self.ctx.shared.state.store(state as u8, Ordering::SeqCst);
        if let Some(value) = state.table_value() {
            self.ctx.table().set(ROBOT_STATE_KEY, value);
        }
    }

    /// Leave Constructed so control requests queue up from here on.
    fn mark_started(&mut self) {
        if let TransitionResult::Ok(state) = self.machine.handle_event(RobotEvent::Start) {
            self.publish(state);
        }
    }

    fn begin(&mut self) {
        let ctx = self.ctx.clone();
        ctx.devices().disable_all();
        ctx.shared.watchdog.lock().feed(Instant::now());
        info!(
            threads = ctx.profile().main_scheduler_threads,
            period_ms = ctx.profile().periodic_function_rate_ms,
            "robot started"
        );
        self.hooks.robot_started(&ctx);
        if let TransitionResult::Ok(state) = self.machine.handle_event(RobotEvent::Ready) {
            self.publish(state);
            debug!("robot settled disabled");
            self.hooks.robot_disabled(&ctx);
        }
    }

    fn stop(&mut self) {
        if let TransitionResult::Ok(state) = self.machine.handle_event(RobotEvent::Stop) {
            self.publish(state);
        }
    }

    fn tick(&mut self, drive_actions: bool) {
        let ctx = self.ctx.clone();
        self.check_watchdog();
        self.drain_commands();

        if self.machine.is_enabled() {
            self.hooks.enabled_periodic(&ctx);
        } else {
            self.hooks.disabled_periodic(&ctx);
        }
        self.hooks.periodic(&ctx);

        ctx.actions().check_triggers();
        if drive_actions {
            ctx.actions().tick_all();
        }
    }

    fn check_watchdog(&mut self) {
        let tripped = self.ctx.shared.watchdog.lock().check(Instant::now());
        if !tripped {
            return;
        }
        let disabled = self.ctx.devices().watchdog_disable();
        warn!(
            timeout_ms = self.ctx.profile().watchdog_timeout_ms,
            devices = disabled,
            "watchdog timed out"
        );
        if self.machine.is_enabled() {
            self.apply(RobotEvent::Disable);
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Enable if self.ctx.watchdog_tripped() => {
                    warn!("enable rejected, watchdog tripped");
                }
                Command::Enable => self.apply(RobotEvent::Enable),
                Command::Disable => self.apply(RobotEvent::Disable),
                Command::Stop => {
                    info!("stop requested");
                    self.ctx.shared.running.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    fn apply(&mut self, event: RobotEvent) {
        let ctx = self.ctx.clone();
        match self.machine.handle_event(event) {
            TransitionResult::Ok(RobotState::Enabled) => {
                self.publish(RobotState::Enabled);
                ctx.devices().enable_matching();
                info!("robot enabled");
                self.hooks.robot_enabled(&ctx);
            }
            TransitionResult::Ok(RobotState::Disabled) => {
                self.publish(RobotState::Disabled);
                ctx.devices().disable_matching();
                info!("robot disabled");
                self.hooks.robot_disabled(&ctx);
            }
            TransitionResult::Ok(state) => self.publish(state),
            TransitionResult::Unchanged(_) => {}
            TransitionResult::Rejected(reason) => {
                warn!(?event, reason, "lifecycle event rejected");
            }
        }
    }

    /// Fail safe after a hook panic: nothing keeps actuating.
    fn halt(&mut self, message: String) {
        error!(%message, "hook panicked, halting robot");
        self.ctx.shared.faults.record(message);
        self.ctx.shared.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.ctx.actions().stop_all() {
            warn!(error = %e, "could not stop actions");
        }
        self.ctx.devices().disable_all();
        if let TransitionResult::Ok(state) = self.machine.handle_event(RobotEvent::Disable) {
            self.publish(state);
        }
    }

    /// Sleep until `next_tick`, waking at the watchdog deadline if it falls
    /// first. Returns false if a hook panicked meanwhile.
    fn idle_until(&mut self, next_tick: Instant) -> bool {
        loop {
            let now = Instant::now();
            if now >= next_tick {
                return true;
            }
            let deadline = self.ctx.shared.watchdog.lock().deadline();
            match deadline {
                Some(deadline) if deadline < next_tick => {
                    if deadline > now {
                        thread::sleep(deadline - now);
                    }
                    if let Err(payload) =
                        panic::catch_unwind(AssertUnwindSafe(|| self.check_watchdog()))
                    {
                        self.halt(panic_message(payload.as_ref()));
                        return false;
                    }
                }
                _ => {
                    thread::sleep(next_tick - now);
                    return true;
                }
            }
        }
    }

    fn run(&mut self) {
        request_rt_priority();
        let period = self.ctx.profile().periodic_function_rate();

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.begin())) {
            self.halt(panic_message(payload.as_ref()));
            return;
        }

        while self.ctx.shared.running.load(Ordering::SeqCst) {
            let started = Instant::now();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.tick(false))) {
                self.halt(panic_message(payload.as_ref()));
                break;
            }
            // Worker-side panics land in the fault slot.
            if let Some(message) = self.ctx.fault() {
                self.halt(message);
                break;
            }

            let elapsed = started.elapsed();
            let mut stats = self.ctx.shared.stats.lock();
            if stats.record(elapsed, period) && (stats.overruns <= 10 || stats.overruns % 1000 == 0) {
                warn!(
                    overruns = stats.overruns,
                    tick_us = elapsed.as_micros() as u64,
                    period_ms = period.as_millis() as u64,
                    "lifecycle tick overran its period"
                );
            }
            drop(stats);
            if !self.idle_until(started + period) {
                break;
            }
        }

        let stats = self.ctx.loop_stats();
        info!(
            ticks = stats.ticks,
            overruns = stats.overruns,
            avg_us = stats.average().as_micros() as u64,
            "lifecycle loop stopped"
        );
    }
}

/// Request SCHED_FIFO for the calling thread.
///
/// No-op when the `rt` feature is not enabled.
#[cfg(feature = "rt")]
fn request_rt_priority() {
    let param = libc::sched_param {
        sched_priority: LIFECYCLE_RT_PRIORITY,
    };
    // SAFETY: pid 0 targets the calling thread; `param` outlives the call.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        warn!(error = %err, "sched_setscheduler(SCHED_FIFO) failed, running without RT priority");
    }
}

#[cfg(not(feature = "rt"))]
fn request_rt_priority() {}

// ─── Robot ──────────────────────────────────────────────────────────

enum Mode<H> {
    Ready(Box<Lifecycle<H>>),
    Manual(Box<Lifecycle<H>>),
    Threaded {
        lifecycle: JoinHandle<Box<Lifecycle<H>>>,
        scheduler: Arc<Scheduler>,
    },
    Done,
}

/// Owns the lifecycle loop, the worker pool and every registered device.
///
/// Dropping the robot shuts it down.
pub struct Robot<H: RobotHooks> {
    ctx: RobotContext,
    mode: Mode<H>,
}

impl<H: RobotHooks> Robot<H> {
    pub fn new(profile: RobotProfile, hooks: H) -> Result<Self, RuntimeError> {
        profile.validate()?;
        let profile = Arc::new(profile);
        let devices = Arc::new(DeviceRegistry::new());
        let actions = ActionManager::new(Arc::clone(&devices), profile.action_function_period());
        let table = NetworkTable::new();
        table.set(ROBOT_STATE_KEY, "DISABLED");
        let (commands, receiver) = unbounded();

        let ctx = RobotContext {
            shared: Arc::new(Shared {
                watchdog: Mutex::new(Watchdog::new(profile.watchdog_timeout())),
                profile,
                devices,
                actions,
                table,
                state: AtomicU8::new(RobotState::Constructed as u8),
                commands,
                running: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                faults: FaultSlot::default(),
                stats: Mutex::new(LoopStats::default()),
            }),
        };
        let lifecycle = Lifecycle {
            ctx: ctx.clone(),
            hooks,
            machine: RobotStateMachine::new(),
            commands: receiver,
        };
        Ok(Self {
            ctx,
            mode: Mode::Ready(Box::new(lifecycle)),
        })
    }

    pub fn context(&self) -> &RobotContext {
        &self.ctx
    }

    pub fn state(&self) -> RobotState {
        self.ctx.state()
    }

    pub fn actions(&self) -> &Arc<ActionManager> {
        self.ctx.actions()
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        self.ctx.devices()
    }

    pub fn table(&self) -> &NetworkTable {
        self.ctx.table()
    }

    pub fn register_device<D: Device + 'static>(
        &self,
        device: D,
    ) -> Result<DeviceHandle<D>, RuntimeError> {
        self.ctx.register_device(device)
    }

    pub fn destroy_device<D: Device + ?Sized>(
        &self,
        handle: DeviceHandle<D>,
    ) -> Result<(), RuntimeError> {
        self.ctx.destroy_device(handle)
    }

    pub fn enable(&self) -> Result<(), RuntimeError> {
        self.ctx.request_enable()
    }

    pub fn disable(&self) -> Result<(), RuntimeError> {
        self.ctx.request_disable()
    }

    fn take_ready(&mut self) -> Result<Box<Lifecycle<H>>, RuntimeError> {
        match std::mem::replace(&mut self.mode, Mode::Done) {
            Mode::Ready(lifecycle) => Ok(lifecycle),
            other => {
                let err = match other {
                    Mode::Done => RuntimeError::Closed,
                    _ => RuntimeError::AlreadyStarted,
                };
                self.mode = other;
                Err(err)
            }
        }
    }

    /// Spawn the worker pool and the lifecycle thread.
    pub fn start(&mut self) -> Result<(), RuntimeError> {
        let mut lifecycle = self.take_ready()?;
        let threads = self.ctx.profile().main_scheduler_threads as usize;
        let scheduler = match Scheduler::new(threads, self.ctx.shared.faults.clone()) {
            Ok(scheduler) => Arc::new(scheduler),
            Err(e) => {
                self.mode = Mode::Ready(lifecycle);
                return Err(e);
            }
        };
        self.ctx.actions().attach_scheduler(Arc::clone(&scheduler));
        self.ctx.shared.running.store(true, Ordering::SeqCst);
        lifecycle.mark_started();

        let spawned = thread::Builder::new()
            .name("robo-lifecycle".into())
            .spawn(move || {
                lifecycle.run();
                lifecycle
            });
        match spawned {
            Ok(handle) => {
                self.mode = Mode::Threaded {
                    lifecycle: handle,
                    scheduler,
                };
                Ok(())
            }
            Err(e) => {
                self.ctx.shared.running.store(false, Ordering::SeqCst);
                self.ctx.actions().detach_scheduler();
                scheduler.shutdown();
                Err(RuntimeError::ThreadSpawn(e.to_string()))
            }
        }
    }

    /// Run `robot_started` on the caller and switch to manual stepping.
    pub fn begin_manual(&mut self) -> Result<(), RuntimeError> {
        let mut lifecycle = self.take_ready()?;
        self.ctx.shared.running.store(true, Ordering::SeqCst);
        lifecycle.mark_started();
        lifecycle.begin();
        self.mode = Mode::Manual(lifecycle);
        Ok(())
    }

    /// One lifecycle tick plus one pass over every running action.
    ///
    /// Returns `Ok(false)` once a stop has been requested. Hook panics
    /// propagate to the caller.
    pub fn step(&mut self) -> Result<bool, RuntimeError> {
        match &mut self.mode {
            Mode::Manual(lifecycle) => {
                if !self.ctx.shared.running.load(Ordering::SeqCst) {
                    return Ok(false);
                }
                let started = Instant::now();
                lifecycle.tick(true);
                let period = self.ctx.profile().periodic_function_rate();
                self.ctx.shared.stats.lock().record(started.elapsed(), period);
                Ok(self.ctx.shared.running.load(Ordering::SeqCst))
            }
            Mode::Ready(_) => Err(RuntimeError::NotStarted),
            Mode::Threaded { .. } => Err(RuntimeError::AlreadyStarted),
            Mode::Done => Err(RuntimeError::Closed),
        }
    }

    /// Block until the lifecycle loop exits (stop request or fault), then
    /// shut down.
    pub fn wait(mut self) -> Result<(), RuntimeError> {
        self.teardown()
    }

    /// Stop the lifecycle loop and shut down.
    pub fn shutdown(mut self) -> Result<(), RuntimeError> {
        self.ctx.shared.running.store(false, Ordering::SeqCst);
        self.teardown()
    }

    fn join_lifecycle(&mut self) -> (Option<Arc<Scheduler>>, Option<Box<Lifecycle<H>>>) {
        match std::mem::replace(&mut self.mode, Mode::Done) {
            Mode::Threaded {
                lifecycle,
                scheduler,
            } => match lifecycle.join() {
                Ok(lifecycle) => (Some(scheduler), Some(lifecycle)),
                Err(payload) => {
                    self.ctx.shared.faults.record(panic_message(payload.as_ref()));
                    (Some(scheduler), None)
                }
            },
            Mode::Ready(lifecycle) | Mode::Manual(lifecycle) => (None, Some(lifecycle)),
            Mode::Done => (None, None),
        }
    }

    fn teardown(&mut self) -> Result<(), RuntimeError> {
        let (scheduler, lifecycle) = self.join_lifecycle();
        let shared = &self.ctx.shared;
        if !shared.closed.swap(true, Ordering::SeqCst) {
            shared.running.store(false, Ordering::SeqCst);
            let actions = self.ctx.actions();
            actions.close();
            if let Some(scheduler) = actions.detach_scheduler().or(scheduler) {
                scheduler.shutdown();
            }
            self.ctx.devices().disable_all();
            match lifecycle {
                Some(mut lifecycle) => lifecycle.stop(),
                // The lifecycle thread died outside its own panic guard.
                None => shared.state.store(RobotState::Stopped as u8, Ordering::SeqCst),
            }
            shared.table.set(ROBOT_STATE_KEY, "DISABLED");
            info!("robot stopped");
        }
        match shared.faults.get() {
            Some(message) => Err(RuntimeError::HookPanicked(message)),
            None => Ok(()),
        }
    }
}

impl<H: RobotHooks> Drop for Robot<H> {
    fn drop(&mut self) {
        if matches!(self.mode, Mode::Done) && self.ctx.shared.closed.load(Ordering::SeqCst) {
            return;
        }
        self.ctx.shared.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.teardown() {
            error!(error = %e, "robot dropped after fault");
        }
    }
}
