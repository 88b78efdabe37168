//! Action series stepping through the lifecycle loop.

use robo_common::device::SimMotor;
use robo_runtime::action::{ActionHandle, ActionOutcome, ActionSeries};
use robo_runtime::robot::Robot;

use super::{FeedingHooks, Scripted, entries, new_log, test_profile};

#[test]
fn members_then_finish_action() {
    let mut robot = Robot::new(test_profile(), FeedingHooks).unwrap();
    robot.begin_manual().unwrap();

    let log = new_log();
    let a1 = Scripted::new("A1", &log).runs(1).handle();
    let a2 = Scripted::new("A2", &log).runs(2).handle();
    let done = Scripted::new("Afinish", &log).runs(1).handle();
    let series = ActionHandle::new(
        "auto",
        ActionSeries::new(vec![a1.clone(), a2.clone()]).with_finish_action(done.clone()),
    );

    robot.actions().start_action(&series).unwrap();
    for _ in 0..8 {
        robot.step().unwrap();
    }

    assert!(!robot.actions().is_running(&series));
    assert_eq!(robot.actions().outcome(&series), Some(ActionOutcome::Completed));
    assert_eq!(robot.actions().outcome(&done), Some(ActionOutcome::Completed));

    let begins: Vec<String> = entries(&log)
        .into_iter()
        .filter(|e| e.ends_with(":begin") || e.ends_with(":finish(false)"))
        .collect();
    assert_eq!(
        begins,
        vec![
            "A1:begin",
            "A1:finish(false)",
            "A2:begin",
            "A2:finish(false)",
            "Afinish:begin",
            "Afinish:finish(false)",
        ]
    );
}

#[test]
fn preempted_member_ends_series_without_finish_action() {
    let mut robot = Robot::new(test_profile(), FeedingHooks).unwrap();
    let motor = robot.register_device(SimMotor::sim("lift")).unwrap();
    robot.begin_manual().unwrap();

    let log = new_log();
    let member = Scripted::new("raise", &log).locking(&motor).handle();
    let done = Scripted::new("after", &log).handle();
    let series = ActionHandle::new(
        "routine",
        ActionSeries::new(vec![member.clone()]).with_finish_action(done.clone()),
    );
    let manual = Scripted::new("manual", &log).locking(&motor).handle();

    robot.actions().start_action(&series).unwrap();
    robot.step().unwrap();
    robot.actions().start_action(&manual).unwrap();
    robot.step().unwrap();

    assert_eq!(robot.actions().outcome(&member), Some(ActionOutcome::Interrupted));
    assert_eq!(robot.actions().outcome(&series), Some(ActionOutcome::Interrupted));
    assert!(robot.actions().is_running(&manual));
    assert!(!entries(&log).contains(&"after:begin".to_string()));
}

#[test]
fn restarting_series_starts_from_first_member() {
    let mut robot = Robot::new(test_profile(), FeedingHooks).unwrap();
    robot.begin_manual().unwrap();

    let log = new_log();
    let a1 = Scripted::new("A1", &log).runs(1).handle();
    let a2 = Scripted::new("A2", &log).handle();
    let series = ActionHandle::new("s", ActionSeries::new(vec![a1.clone(), a2.clone()]));

    robot.actions().start_action(&series).unwrap();
    robot.step().unwrap();
    robot.step().unwrap();
    assert!(robot.actions().is_running(&a2));

    robot.actions().restart_action(&series).unwrap();
    assert!(!robot.actions().is_running(&a2));
    assert!(robot.actions().is_running(&a1));
}
