//! Trigger evaluation driven by a gamepad behind the staleness guard.

use std::time::{Duration, Instant};

use robo_common::input::{ControllerData, ControllerFeed};
use robo_runtime::gamepad::Gamepad;
use robo_runtime::robot::Robot;
use robo_runtime::trigger::ButtonTrigger;

use super::{FeedingHooks, Scripted, entries, new_log, set_button, test_profile};

fn count(log: &super::Log, event: &str) -> usize {
    entries(log).iter().filter(|e| *e == event).count()
}

#[test]
fn held_button_fires_once_per_press() {
    let mut robot = Robot::new(test_profile(), FeedingHooks).unwrap();
    let feed = ControllerFeed::new();
    let pad = robot
        .register_device(Gamepad::new(1, feed.clone(), Duration::from_secs(1)))
        .unwrap();
    let log = new_log();
    let shoot = Scripted::new("shoot", &log).runs(1).handle();
    robot
        .actions()
        .add_trigger(ButtonTrigger::pressed(pad.arc(), 2, shoot.clone(), false))
        .unwrap();
    robot.begin_manual().unwrap();

    set_button(&feed, 1, 2, true);
    for _ in 0..5 {
        robot.step().unwrap();
    }
    assert_eq!(count(&log, "shoot:begin"), 1);

    set_button(&feed, 1, 2, false);
    robot.step().unwrap();
    set_button(&feed, 1, 2, true);
    robot.step().unwrap();
    assert_eq!(count(&log, "shoot:begin"), 2);
}

#[test]
fn non_restart_trigger_leaves_running_target_alone() {
    let mut robot = Robot::new(test_profile(), FeedingHooks).unwrap();
    let feed = ControllerFeed::new();
    let pad = robot
        .register_device(Gamepad::new(0, feed.clone(), Duration::from_secs(1)))
        .unwrap();
    let log = new_log();
    let intake = Scripted::new("intake", &log).handle();
    robot
        .actions()
        .add_trigger(ButtonTrigger::pressed(pad.arc(), 0, intake.clone(), false))
        .unwrap();
    robot.begin_manual().unwrap();
    robot.actions().start_action(&intake).unwrap();

    set_button(&feed, 0, 0, true);
    robot.step().unwrap();

    assert!(robot.actions().is_running(&intake));
    assert_eq!(count(&log, "intake:begin"), 1);
    assert_eq!(count(&log, "intake:finish(true)"), 0);
}

#[test]
fn restart_trigger_hard_restarts_running_target() {
    let mut robot = Robot::new(test_profile(), FeedingHooks).unwrap();
    let feed = ControllerFeed::new();
    let pad = robot
        .register_device(Gamepad::new(0, feed.clone(), Duration::from_secs(1)))
        .unwrap();
    let log = new_log();
    let aim = Scripted::new("aim", &log).handle();
    robot
        .actions()
        .add_trigger(ButtonTrigger::pressed(pad.arc(), 0, aim.clone(), true))
        .unwrap();
    robot.begin_manual().unwrap();
    robot.actions().start_action(&aim).unwrap();

    set_button(&feed, 0, 0, true);
    robot.step().unwrap();

    assert!(robot.actions().is_running(&aim));
    let events = entries(&log);
    assert_eq!(&events[..3], &["aim:begin", "aim:finish(true)", "aim:begin"]);
}

#[test]
fn release_trigger_fires_on_falling_edge() {
    let mut robot = Robot::new(test_profile(), FeedingHooks).unwrap();
    let feed = ControllerFeed::new();
    let pad = robot
        .register_device(Gamepad::new(0, feed.clone(), Duration::from_secs(1)))
        .unwrap();
    let log = new_log();
    let park = Scripted::new("park", &log).handle();
    robot
        .actions()
        .add_trigger(ButtonTrigger::released(pad.arc(), 1, park.clone(), false))
        .unwrap();
    robot.begin_manual().unwrap();

    set_button(&feed, 0, 1, true);
    robot.step().unwrap();
    assert!(!robot.actions().is_running(&park));
    set_button(&feed, 0, 1, false);
    robot.step().unwrap();
    assert!(robot.actions().is_running(&park));
}

#[test]
fn stale_input_never_fires() {
    let mut robot = Robot::new(test_profile(), FeedingHooks).unwrap();
    let feed = ControllerFeed::new();
    let pad = robot
        .register_device(Gamepad::new(0, feed.clone(), Duration::from_millis(50)))
        .unwrap();
    let log = new_log();
    let target = Scripted::new("target", &log).handle();
    robot
        .actions()
        .add_trigger(ButtonTrigger::pressed(pad.arc(), 0, target.clone(), false))
        .unwrap();
    robot.begin_manual().unwrap();

    let Some(old) = Instant::now().checked_sub(Duration::from_secs(1)) else {
        return;
    };
    feed.store(
        ControllerData {
            controller: 0,
            axes: vec![0.8],
            buttons: vec![true],
            dpads: vec![2],
        },
        old,
    );
    robot.step().unwrap();
    robot.step().unwrap();
    assert!(!robot.actions().is_running(&target));
}

#[test]
fn removed_trigger_stops_firing() {
    let mut robot = Robot::new(test_profile(), FeedingHooks).unwrap();
    let feed = ControllerFeed::new();
    let pad = robot
        .register_device(Gamepad::new(0, feed.clone(), Duration::from_secs(1)))
        .unwrap();
    let log = new_log();
    let target = Scripted::new("target", &log).handle();
    let id = robot
        .actions()
        .add_trigger(ButtonTrigger::pressed(pad.arc(), 0, target.clone(), false))
        .unwrap();
    robot.begin_manual().unwrap();

    assert!(robot.actions().remove_trigger(id));
    assert!(!robot.actions().remove_trigger(id));
    set_button(&feed, 0, 0, true);
    robot.step().unwrap();
    assert!(!robot.actions().is_running(&target));
}
