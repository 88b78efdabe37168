//! Sample robot: arcade teleop on two simulated motors, plus a pivot
//! routine bound to button 0 that hands control back to teleop when done.

use std::sync::Arc;

use robo_common::device::{MotorController, SimMotor};
use robo_common::input::{ControllerFeed, InputSource};
use robo_common::transform::SquareRootAxisTransform;
use robo_runtime::action::{Action, ActionContext, ActionHandle, ActionSeries};
use robo_runtime::control::{Pid, PidGains};
use robo_runtime::drive::{ArcadeDriveHelper, MotorGroup};
use robo_runtime::error::RuntimeError;
use robo_runtime::gamepad::Gamepad;
use robo_runtime::registry::DeviceHandle;
use robo_runtime::robot::{RobotContext, RobotHooks};
use robo_runtime::trigger::ButtonTrigger;
use tracing::{info, warn};

const DEADBAND: f64 = 0.05;
const AXIS_TURN: usize = 0;
const AXIS_FORWARD: usize = 1;
const BUTTON_ROUTINE: usize = 0;
/// Simulated turn rate at full rotation command [deg/s].
const MAX_TURN_RATE: f64 = 180.0;
const HEADING_TOLERANCE: f64 = 1.0;
/// Lifecycle ticks between two status lines.
const REPORT_EVERY: u64 = 250;

fn drive_for(left: &DeviceHandle<SimMotor>, right: &DeviceHandle<SimMotor>) -> ArcadeDriveHelper {
    let left: MotorGroup = vec![left.arc() as Arc<dyn MotorController>];
    let right: MotorGroup = vec![right.arc() as Arc<dyn MotorController>];
    ArcadeDriveHelper::new(left, right)
}

// ─── Actions ────────────────────────────────────────────────────────

/// Drives from the sticks until interrupted.
struct Teleop {
    gamepad: Arc<Gamepad>,
    left: DeviceHandle<SimMotor>,
    right: DeviceHandle<SimMotor>,
    drive: ArcadeDriveHelper,
}

impl Action for Teleop {
    fn begin(&mut self, ctx: &ActionContext<'_>) {
        if let Err(e) = ctx.lock_devices(&[&self.left, &self.right]) {
            warn!(error = %e, "teleop could not claim the drivetrain");
        }
    }

    fn process(&mut self, _ctx: &ActionContext<'_>) {
        let forward = -self.gamepad.axis(AXIS_FORWARD, DEADBAND);
        let turn = self.gamepad.axis(AXIS_TURN, DEADBAND);
        self.drive.update(forward, turn);
    }

    fn finish(&mut self, _ctx: &ActionContext<'_>, _interrupted: bool) {
        self.drive.stop();
    }
}

/// Turns in place by `angle` degrees on a dead-reckoned heading.
struct Pivot {
    angle: f64,
    heading: f64,
    pid: Pid,
    left: DeviceHandle<SimMotor>,
    right: DeviceHandle<SimMotor>,
    drive: ArcadeDriveHelper,
}

impl Pivot {
    fn new(angle: f64, left: &DeviceHandle<SimMotor>, right: &DeviceHandle<SimMotor>) -> Self {
        let gains = PidGains {
            kp: 0.02,
            ki: 0.0,
            kd: 0.002,
            kf: 0.0,
        };
        Self {
            angle,
            heading: 0.0,
            pid: Pid::new(gains, -0.6, 0.6),
            left: left.clone(),
            right: right.clone(),
            drive: drive_for(left, right),
        }
    }
}

impl Action for Pivot {
    fn begin(&mut self, ctx: &ActionContext<'_>) {
        self.heading = 0.0;
        self.pid.reset();
        self.pid.set_setpoint(self.angle);
        if let Err(e) = ctx.lock_devices(&[&self.left, &self.right]) {
            warn!(error = %e, "pivot could not claim the drivetrain");
        }
    }

    fn process(&mut self, ctx: &ActionContext<'_>) {
        let rotation = self.pid.get_output(self.heading);
        self.drive.update(0.0, rotation);
        // Read back what the motors actually drove; zero while disabled.
        let applied = (self.left.speed() - self.right.speed()) / 2.0;
        self.heading += applied * MAX_TURN_RATE * ctx.manager().period().as_secs_f64();
    }

    fn should_continue(&mut self, _ctx: &ActionContext<'_>) -> bool {
        (self.angle - self.heading).abs() > HEADING_TOLERANCE
    }

    fn finish(&mut self, ctx: &ActionContext<'_>, interrupted: bool) {
        self.drive.stop();
        info!(
            action = ctx.action().name(),
            heading = self.heading,
            interrupted,
            "pivot done"
        );
    }
}

// ─── Robot ──────────────────────────────────────────────────────────

struct Parts {
    left: DeviceHandle<SimMotor>,
    right: DeviceHandle<SimMotor>,
    teleop: ActionHandle,
}

pub struct DemoRobot {
    feed: ControllerFeed,
    parts: Option<Parts>,
    ticks: u64,
}

impl DemoRobot {
    pub fn new(feed: ControllerFeed) -> Self {
        Self {
            feed,
            parts: None,
            ticks: 0,
        }
    }

    fn build(&self, ctx: &RobotContext) -> Result<Parts, RuntimeError> {
        let left = ctx.register_device(SimMotor::sim("drive-left"))?;
        let right = ctx.register_device(SimMotor::sim("drive-right"))?;
        right.set_inverted(true);

        let gamepad = ctx
            .register_device(Gamepad::new(
                0,
                self.feed.clone(),
                ctx.profile().max_gamepad_data_age(),
            ))?
            .arc();
        gamepad.set_axis_transform(AXIS_TURN, Arc::new(SquareRootAxisTransform));

        let teleop = ActionHandle::new(
            "teleop",
            Teleop {
                gamepad: Arc::clone(&gamepad),
                left: left.clone(),
                right: right.clone(),
                drive: drive_for(&left, &right),
            },
        );
        let routine = ActionHandle::new(
            "pivot-routine",
            ActionSeries::new(vec![
                ActionHandle::new("pivot-out", Pivot::new(90.0, &left, &right)),
                ActionHandle::new("pivot-back", Pivot::new(-90.0, &left, &right)),
            ])
            .with_finish_action(teleop.clone()),
        );
        ctx.actions().add_trigger(ButtonTrigger::pressed(
            gamepad as Arc<dyn InputSource>,
            BUTTON_ROUTINE,
            routine,
            true,
        ))?;

        Ok(Parts {
            left,
            right,
            teleop,
        })
    }
}

impl RobotHooks for DemoRobot {
    fn robot_started(&mut self, ctx: &RobotContext) {
        match self.build(ctx) {
            Ok(parts) => {
                info!(devices = ctx.devices().len(), "demo robot wired");
                self.parts = Some(parts);
            }
            Err(e) => warn!(error = %e, "demo robot wiring failed"),
        }
    }

    fn robot_enabled(&mut self, ctx: &RobotContext) {
        if let Some(parts) = &self.parts
            && let Err(e) = ctx.actions().start_action(&parts.teleop)
        {
            warn!(error = %e, "teleop did not start");
        }
    }

    fn robot_disabled(&mut self, ctx: &RobotContext) {
        if let Err(e) = ctx.actions().stop_all() {
            warn!(error = %e, "stopping actions on disable failed");
        }
    }

    fn periodic(&mut self, ctx: &RobotContext) {
        if let Err(e) = ctx.feed_watchdog() {
            warn!(error = %e, "watchdog feed failed");
        }
        self.ticks += 1;
        if self.ticks % REPORT_EVERY == 0
            && let Some(parts) = &self.parts
        {
            let stats = ctx.loop_stats();
            info!(
                state = %ctx.state(),
                left = parts.left.driven_output(),
                right = parts.right.driven_output(),
                running = ctx.actions().running_actions().len(),
                avg_tick_us = stats.average().as_micros() as u64,
                overruns = stats.overruns,
                "status"
            );
        }
    }
}
