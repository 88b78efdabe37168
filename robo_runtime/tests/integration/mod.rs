//! Shared fixtures for the integration scenarios.

pub mod lifecycle;
pub mod series;
pub mod triggers;
pub mod worker_pool;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use robo_common::device::SimMotor;
use robo_common::input::{ControllerData, ControllerFeed};
use robo_common::profile::RobotProfile;
use robo_runtime::action::{Action, ActionContext, ActionHandle};
use robo_runtime::registry::{DeviceHandle, Lockable};
use robo_runtime::robot::{RobotContext, RobotHooks};

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

/// Fast profile for tests; the watchdog is out of the way unless a test
/// shortens it.
pub fn test_profile() -> RobotProfile {
    RobotProfile {
        main_scheduler_threads: 4,
        periodic_function_rate_ms: 5,
        max_gamepad_data_age_ms: 1_000,
        action_function_period_ms: 5,
        watchdog_timeout_ms: 10_000,
    }
}

pub fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Publish a fresh sample for `controller` with only `button` in `pressed`.
pub fn set_button(feed: &ControllerFeed, controller: u8, button: usize, pressed: bool) {
    let mut buttons = vec![false; button + 1];
    buttons[button] = pressed;
    feed.store(
        ControllerData {
            controller,
            axes: vec![0.0; 2],
            buttons,
            dpads: vec![0],
        },
        Instant::now(),
    );
}

/// Robot hooks that only keep the watchdog fed.
pub struct FeedingHooks;

impl RobotHooks for FeedingHooks {
    fn periodic(&mut self, ctx: &RobotContext) {
        let _ = ctx.feed_watchdog();
    }
}

/// Action that records its hooks as `name:hook` strings.
pub struct Scripted {
    name: &'static str,
    log: Log,
    devices: Vec<DeviceHandle<SimMotor>>,
    runs: Option<usize>,
    done: usize,
}

impl Scripted {
    pub fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: Arc::clone(log),
            devices: Vec::new(),
            runs: None,
            done: 0,
        }
    }

    /// Lock `device` in `begin`.
    pub fn locking(mut self, device: &DeviceHandle<SimMotor>) -> Self {
        self.devices.push(device.clone());
        self
    }

    /// Complete after `n` process calls.
    pub fn runs(mut self, n: usize) -> Self {
        self.runs = Some(n);
        self
    }

    pub fn handle(self) -> ActionHandle {
        ActionHandle::new(self.name, self)
    }

    fn record(&self, event: &str) {
        self.log.lock().push(format!("{}:{event}", self.name));
    }
}

impl Action for Scripted {
    fn begin(&mut self, ctx: &ActionContext<'_>) {
        self.done = 0;
        self.record("begin");
        if !self.devices.is_empty() {
            let refs: Vec<&dyn Lockable> = self.devices.iter().map(|d| d as &dyn Lockable).collect();
            ctx.lock_devices(&refs).unwrap();
            self.record("locked");
        }
    }

    fn process(&mut self, _ctx: &ActionContext<'_>) {
        self.done += 1;
        self.record("process");
    }

    fn should_continue(&mut self, _ctx: &ActionContext<'_>) -> bool {
        self.runs.is_none_or(|n| self.done < n)
    }

    fn finish(&mut self, _ctx: &ActionContext<'_>, interrupted: bool) {
        self.record(&format!("finish({interrupted})"));
    }
}
