//! Actions ticked by the worker pool of a running robot.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use robo_common::device::SimMotor;
use robo_runtime::action::{Action, ActionContext, ActionHandle};
use robo_runtime::registry::DeviceHandle;
use robo_runtime::robot::{Robot, RobotState};

use super::{FeedingHooks, test_profile, wait_until};

#[derive(Default)]
struct Gauge {
    inside: AtomicUsize,
    max_inside: AtomicUsize,
    runs: AtomicUsize,
}

/// Slow action measuring how many of its own `process` calls overlap.
struct Slow {
    own: Arc<Gauge>,
    all: Arc<Gauge>,
    work: Duration,
}

impl Slow {
    fn enter(gauge: &Gauge) {
        let now = gauge.inside.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.max_inside.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(gauge: &Gauge) {
        gauge.inside.fetch_sub(1, Ordering::SeqCst);
        gauge.runs.fetch_add(1, Ordering::SeqCst);
    }
}

impl Action for Slow {
    fn process(&mut self, _ctx: &ActionContext<'_>) {
        Self::enter(&self.own);
        Self::enter(&self.all);
        thread::sleep(self.work);
        Self::leave(&self.all);
        Self::leave(&self.own);
    }
}

fn started_robot(threads: u32) -> Robot<FeedingHooks> {
    let mut profile = test_profile();
    profile.main_scheduler_threads = threads;
    let mut robot = Robot::new(profile, FeedingHooks).unwrap();
    robot.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || robot.state() == RobotState::Disabled));
    robot
}

#[test]
fn process_never_overlaps_itself_but_actions_run_in_parallel() {
    let robot = started_robot(4);
    let all = Arc::new(Gauge::default());
    let gauges: Vec<Arc<Gauge>> = (0..4).map(|_| Arc::new(Gauge::default())).collect();
    for (i, own) in gauges.iter().enumerate() {
        let action = ActionHandle::new(
            format!("slow-{i}"),
            Slow {
                own: Arc::clone(own),
                all: Arc::clone(&all),
                work: Duration::from_millis(15),
            },
        );
        robot.actions().start_action(&action).unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || {
        gauges.iter().all(|g| g.runs.load(Ordering::SeqCst) >= 5)
    }));
    robot.shutdown().unwrap();

    for gauge in &gauges {
        assert_eq!(gauge.max_inside.load(Ordering::SeqCst), 1);
    }
    assert!(all.max_inside.load(Ordering::SeqCst) > 1);
}

#[test]
fn saturated_pool_delays_but_does_not_drop_ticks() {
    let robot = started_robot(2);
    let all = Arc::new(Gauge::default());
    let gauges: Vec<Arc<Gauge>> = (0..6).map(|_| Arc::new(Gauge::default())).collect();
    for (i, own) in gauges.iter().enumerate() {
        let action = ActionHandle::new(
            format!("busy-{i}"),
            Slow {
                own: Arc::clone(own),
                all: Arc::clone(&all),
                work: Duration::from_millis(5),
            },
        );
        robot.actions().start_action(&action).unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || {
        gauges.iter().all(|g| g.runs.load(Ordering::SeqCst) >= 3)
    }));
    assert!(all.max_inside.load(Ordering::SeqCst) <= 2);
    robot.shutdown().unwrap();
}

#[derive(Default)]
struct Tally {
    begins: AtomicUsize,
    finishes: AtomicUsize,
}

/// Locks the shared motor in `begin`.
struct Contender {
    motor: DeviceHandle<SimMotor>,
    tally: Arc<Tally>,
}

impl Action for Contender {
    fn begin(&mut self, ctx: &ActionContext<'_>) {
        self.tally.begins.fetch_add(1, Ordering::SeqCst);
        // Err only when preempted again before the lock; that is fine here.
        let _ = ctx.lock_device(&self.motor);
    }

    fn finish(&mut self, _ctx: &ActionContext<'_>, _interrupted: bool) {
        self.tally.finishes.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn contended_device_has_exactly_one_owner() {
    let robot = started_robot(4);
    let motor = robot.register_device(SimMotor::sim("shared")).unwrap();
    let contenders: Vec<(ActionHandle, Arc<Tally>)> = (0..8)
        .map(|i| {
            let tally = Arc::new(Tally::default());
            let handle = ActionHandle::new(
                format!("contender-{i}"),
                Contender {
                    motor: motor.clone(),
                    tally: Arc::clone(&tally),
                },
            );
            (handle, tally)
        })
        .collect();

    thread::scope(|s| {
        for (handle, _) in &contenders {
            let actions = Arc::clone(robot.actions());
            s.spawn(move || {
                for _ in 0..50 {
                    actions.restart_action(handle).unwrap();
                }
            });
        }
    });

    let manager = robot.actions();
    let running = manager.running_actions();
    assert_eq!(running.len(), 1, "{running:?}");
    assert_eq!(manager.lock_owner(motor.id()), Some(running[0].id()));

    // A finish handed to an in-flight tick may land just after the joins.
    let balanced = || {
        contenders.iter().all(|(handle, tally)| {
            let begins = tally.begins.load(Ordering::SeqCst);
            let finishes = tally.finishes.load(Ordering::SeqCst);
            begins == finishes + usize::from(manager.is_running(handle))
        })
    };
    assert!(wait_until(Duration::from_secs(2), balanced));
    robot.shutdown().unwrap();
}
