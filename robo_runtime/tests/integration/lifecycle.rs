//! Lifecycle edges, the watchdog and fault handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use robo_common::consts::ROBOT_STATE_KEY;
use robo_common::device::{Device, MotorController, SimMotor};
use robo_common::table::KeyValueStore;
use robo_runtime::action::{Action, ActionContext, ActionHandle};
use robo_runtime::error::RuntimeError;
use robo_runtime::robot::{Robot, RobotContext, RobotHooks, RobotState};

use super::{FeedingHooks, Scripted, new_log, test_profile, wait_until};

#[derive(Default)]
struct Counts {
    started: AtomicUsize,
    enabled: AtomicUsize,
    disabled: AtomicUsize,
    enabled_periodic: AtomicUsize,
    disabled_periodic: AtomicUsize,
    periodic: AtomicUsize,
}

struct Counting {
    counts: Arc<Counts>,
    feed: Arc<AtomicBool>,
}

impl RobotHooks for Counting {
    fn robot_started(&mut self, _ctx: &RobotContext) {
        self.counts.started.fetch_add(1, Ordering::SeqCst);
    }
    fn robot_enabled(&mut self, _ctx: &RobotContext) {
        self.counts.enabled.fetch_add(1, Ordering::SeqCst);
    }
    fn robot_disabled(&mut self, _ctx: &RobotContext) {
        self.counts.disabled.fetch_add(1, Ordering::SeqCst);
    }
    fn enabled_periodic(&mut self, _ctx: &RobotContext) {
        self.counts.enabled_periodic.fetch_add(1, Ordering::SeqCst);
    }
    fn disabled_periodic(&mut self, _ctx: &RobotContext) {
        self.counts.disabled_periodic.fetch_add(1, Ordering::SeqCst);
    }
    fn periodic(&mut self, ctx: &RobotContext) {
        self.counts.periodic.fetch_add(1, Ordering::SeqCst);
        if self.feed.load(Ordering::SeqCst) {
            ctx.feed_watchdog().unwrap();
        }
    }
}

fn counting() -> (Counting, Arc<Counts>, Arc<AtomicBool>) {
    let counts = Arc::new(Counts::default());
    let feed = Arc::new(AtomicBool::new(true));
    (
        Counting {
            counts: Arc::clone(&counts),
            feed: Arc::clone(&feed),
        },
        counts,
        feed,
    )
}

#[test]
fn edge_hooks_fire_once_per_edge() {
    let (hooks, counts, _feed) = counting();
    let mut robot = Robot::new(test_profile(), hooks).unwrap();
    robot.begin_manual().unwrap();
    assert_eq!(counts.started.load(Ordering::SeqCst), 1);
    // Settling into Disabled at start reports once.
    assert_eq!(counts.disabled.load(Ordering::SeqCst), 1);

    for _ in 0..3 {
        robot.enable().unwrap();
        for _ in 0..5 {
            robot.step().unwrap();
        }
    }
    assert_eq!(counts.enabled.load(Ordering::SeqCst), 1);
    assert_eq!(counts.enabled_periodic.load(Ordering::SeqCst), 15);

    robot.disable().unwrap();
    robot.disable().unwrap();
    for _ in 0..5 {
        robot.step().unwrap();
    }
    assert_eq!(counts.disabled.load(Ordering::SeqCst), 2);
    assert_eq!(counts.disabled_periodic.load(Ordering::SeqCst), 5);
    assert_eq!(counts.periodic.load(Ordering::SeqCst), 20);
}

#[test]
fn watchdog_trip_is_sticky_until_fed_and_enabled() {
    let (hooks, counts, feed) = counting();
    let mut profile = test_profile();
    profile.watchdog_timeout_ms = 30;
    let mut robot = Robot::new(profile, hooks).unwrap();
    let motor = robot.register_device(SimMotor::sim("drive")).unwrap();
    robot.begin_manual().unwrap();
    robot.enable().unwrap();
    robot.step().unwrap();
    motor.set_speed(0.6);
    assert_eq!(motor.driven_output(), 0.6);

    feed.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(60));
    robot.step().unwrap();

    assert_eq!(robot.state(), RobotState::Disabled);
    assert!(robot.context().watchdog_tripped());
    assert!(!motor.is_enabled());
    assert_eq!(motor.driven_output(), 0.0);
    assert_eq!(counts.disabled.load(Ordering::SeqCst), 2);
    assert_eq!(robot.table().get(ROBOT_STATE_KEY), "DISABLED");

    // Enabling while tripped is refused.
    robot.enable().unwrap();
    robot.step().unwrap();
    assert_eq!(robot.state(), RobotState::Disabled);

    // Feeding alone does not re-enable.
    feed.store(true, Ordering::SeqCst);
    robot.step().unwrap();
    assert!(!robot.context().watchdog_tripped());
    assert_eq!(robot.state(), RobotState::Disabled);

    robot.enable().unwrap();
    robot.step().unwrap();
    assert_eq!(robot.state(), RobotState::Enabled);
    assert!(motor.is_enabled());
    assert_eq!(counts.enabled.load(Ordering::SeqCst), 2);
}

#[test]
fn threaded_robot_runs_and_shuts_down() {
    let (hooks, counts, _feed) = counting();
    let mut robot = Robot::new(test_profile(), hooks).unwrap();
    let motor = robot.register_device(SimMotor::sim("drive")).unwrap();
    let log = new_log();
    let hold = Scripted::new("hold", &log).locking(&motor).handle();

    robot.start().unwrap();
    assert!(matches!(robot.step(), Err(RuntimeError::AlreadyStarted)));
    assert!(wait_until(Duration::from_secs(2), || robot.state() == RobotState::Disabled));
    robot.enable().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        counts.enabled_periodic.load(Ordering::SeqCst) >= 3
    }));
    assert!(motor.is_enabled());

    robot.actions().start_action(&hold).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        log.lock().iter().filter(|e| *e == "hold:process").count() >= 3
    }));

    let ctx = robot.context().clone();
    robot.shutdown().unwrap();
    assert_eq!(ctx.state(), RobotState::Stopped);
    assert!(!motor.is_enabled());
    assert_eq!(log.lock().last().map(String::as_str), Some("hold:finish(true)"));
    assert!(ctx.loop_stats().ticks > 0);
}

#[test]
fn enable_right_after_start_is_accepted() {
    let (hooks, counts, _feed) = counting();
    let mut robot = Robot::new(test_profile(), hooks).unwrap();
    robot.start().unwrap();
    assert_ne!(robot.state(), RobotState::Constructed);
    robot.enable().unwrap();
    assert!(wait_until(Duration::from_secs(2), || robot.state() == RobotState::Enabled));
    assert_eq!(counts.started.load(Ordering::SeqCst), 1);
    assert_eq!(counts.disabled.load(Ordering::SeqCst), 1);
    assert_eq!(counts.enabled.load(Ordering::SeqCst), 1);
    robot.shutdown().unwrap();
}

/// Feeds until `feeding` clears, remembering when it last fed.
struct LastFeed {
    feeding: Arc<AtomicBool>,
    fed_at: Arc<Mutex<Instant>>,
}

impl RobotHooks for LastFeed {
    fn periodic(&mut self, ctx: &RobotContext) {
        if self.feeding.load(Ordering::SeqCst) {
            ctx.feed_watchdog().unwrap();
            *self.fed_at.lock() = Instant::now();
        }
    }
}

#[test]
fn watchdog_trips_between_slow_ticks() {
    let feeding = Arc::new(AtomicBool::new(true));
    let fed_at = Arc::new(Mutex::new(Instant::now()));
    let mut profile = test_profile();
    profile.periodic_function_rate_ms = 100;
    profile.watchdog_timeout_ms = 150;
    let hooks = LastFeed {
        feeding: Arc::clone(&feeding),
        fed_at: Arc::clone(&fed_at),
    };
    let mut robot = Robot::new(profile, hooks).unwrap();
    let motor = robot.register_device(SimMotor::sim("drive")).unwrap();
    robot.start().unwrap();
    robot.enable().unwrap();
    assert!(wait_until(Duration::from_secs(2), || robot.state() == RobotState::Enabled));

    feeding.store(false, Ordering::SeqCst);
    // Let an in-flight feed land before reading its time.
    thread::sleep(Duration::from_millis(5));
    assert!(wait_until(Duration::from_secs(2), || robot.state() == RobotState::Disabled));
    let latency = fed_at.lock().elapsed();

    // A tick-aligned check would only see the trip at 200 ms.
    assert!(latency >= Duration::from_millis(145), "{latency:?}");
    assert!(latency < Duration::from_millis(185), "{latency:?}");
    assert!(robot.context().watchdog_tripped());
    assert!(!motor.is_enabled());
    robot.shutdown().unwrap();
}

#[test]
fn stop_request_ends_wait() {
    let mut robot = Robot::new(test_profile(), FeedingHooks).unwrap();
    robot.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || robot.state() == RobotState::Disabled));
    robot.context().request_stop().unwrap();
    robot.wait().unwrap();
}

struct PanicsWhenEnabled;

impl RobotHooks for PanicsWhenEnabled {
    fn enabled_periodic(&mut self, _ctx: &RobotContext) {
        panic!("arm limit switch unreadable");
    }
    fn periodic(&mut self, ctx: &RobotContext) {
        let _ = ctx.feed_watchdog();
    }
}

#[test]
fn lifecycle_hook_panic_halts_robot() {
    let mut robot = Robot::new(test_profile(), PanicsWhenEnabled).unwrap();
    let motor = robot.register_device(SimMotor::sim("arm")).unwrap();
    robot.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || robot.state() == RobotState::Disabled));
    robot.enable().unwrap();
    assert!(wait_until(Duration::from_secs(2), || robot.context().fault().is_some()));

    let ctx = robot.context().clone();
    let err = robot.wait().unwrap_err();
    assert!(matches!(err, RuntimeError::HookPanicked(m) if m == "arm limit switch unreadable"));
    assert!(!motor.is_enabled());
    assert_eq!(ctx.state(), RobotState::Stopped);
}

struct PanicsInProcess(Arc<Mutex<bool>>);

impl Action for PanicsInProcess {
    fn process(&mut self, _ctx: &ActionContext<'_>) {
        if *self.0.lock() {
            panic!("encoder overflow");
        }
    }
}

#[test]
fn action_panic_on_worker_halts_robot() {
    let mut robot = Robot::new(test_profile(), FeedingHooks).unwrap();
    let motor = robot.register_device(SimMotor::sim("arm")).unwrap();
    let armed = Arc::new(Mutex::new(false));
    let faulty = ActionHandle::new("faulty", PanicsInProcess(Arc::clone(&armed)));

    robot.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || robot.state() == RobotState::Disabled));
    robot.enable().unwrap();
    assert!(wait_until(Duration::from_secs(2), || motor.is_enabled()));
    robot.actions().start_action(&faulty).unwrap();
    *armed.lock() = true;

    assert!(wait_until(Duration::from_secs(2), || !motor.is_enabled()));
    assert!(!robot.actions().is_running(&faulty));
    assert!(matches!(robot.wait(), Err(RuntimeError::HookPanicked(m)) if m == "encoder overflow"));
}
