//! Differential drive helpers over groups of motor controllers.
//!
//! Helpers only write speeds. Locking the motors is the caller's job,
//! normally the action that owns the drivetrain.

use std::sync::Arc;

use robo_common::device::MotorController;

pub type MotorGroup = Vec<Arc<dyn MotorController>>;

fn set_all(motors: &[Arc<dyn MotorController>], speed: f64) {
    for motor in motors {
        motor.set_speed(speed);
    }
}

/// Mix `speed` and `rotation` (both clamped to [-1, 1]) into
/// `(left, right)` wheel speeds.
pub fn calculate_arcade_speeds(speed: f64, rotation: f64) -> (f64, f64) {
    let speed = speed.clamp(-1.0, 1.0);
    let rotation = rotation.clamp(-1.0, 1.0);
    let max_input = speed.abs().max(rotation.abs()).copysign(speed);

    if (speed >= 0.0) == (rotation >= 0.0) {
        (max_input, speed - rotation)
    } else {
        (speed + rotation, max_input)
    }
}

/// Speed + rotation drive.
pub struct ArcadeDriveHelper {
    left: MotorGroup,
    right: MotorGroup,
    speed: f64,
    rotation: f64,
}

impl ArcadeDriveHelper {
    pub fn new(left: MotorGroup, right: MotorGroup) -> Self {
        Self {
            left,
            right,
            speed: 0.0,
            rotation: 0.0,
        }
    }

    pub fn update(&mut self, speed: f64, rotation: f64) {
        self.speed = speed.clamp(-1.0, 1.0);
        self.rotation = rotation.clamp(-1.0, 1.0);
        self.apply();
    }

    /// Change speed, keep the last rotation.
    pub fn update_speed(&mut self, speed: f64) {
        self.update(speed, self.rotation);
    }

    /// Change rotation, keep the last speed.
    pub fn update_rotation(&mut self, rotation: f64) {
        self.update(self.speed, rotation);
    }

    pub fn stop(&mut self) {
        self.update(0.0, 0.0);
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    fn apply(&self) {
        let (left, right) = calculate_arcade_speeds(self.speed, self.rotation);
        set_all(&self.left, left);
        set_all(&self.right, right);
    }
}

/// Independent left / right drive.
pub struct TankDriveHelper {
    left: MotorGroup,
    right: MotorGroup,
    left_speed: f64,
    right_speed: f64,
}

impl TankDriveHelper {
    pub fn new(left: MotorGroup, right: MotorGroup) -> Self {
        Self {
            left,
            right,
            left_speed: 0.0,
            right_speed: 0.0,
        }
    }

    pub fn update(&mut self, left: f64, right: f64) {
        self.left_speed = left.clamp(-1.0, 1.0);
        self.right_speed = right.clamp(-1.0, 1.0);
        set_all(&self.left, self.left_speed);
        set_all(&self.right, self.right_speed);
    }

    pub fn update_left(&mut self, left: f64) {
        self.update(left, self.right_speed);
    }

    pub fn update_right(&mut self, right: f64) {
        self.update(self.left_speed, right);
    }

    pub fn stop(&mut self) {
        self.update(0.0, 0.0);
    }
}
