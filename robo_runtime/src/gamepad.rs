//! Gamepad device: a controller slot read through the staleness guard.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use robo_common::consts::DPAD_CENTERED;
use robo_common::device::Device;
use robo_common::input::{ControllerData, ControllerFeed, InputSource};
use robo_common::transform::AxisTransform;

/// One controller index on a [`ControllerFeed`].
///
/// A sample older than `max_age`, a missing sample and an out-of-range
/// index all read neutral.
pub struct Gamepad {
    name: String,
    controller: u8,
    feed: ControllerFeed,
    max_age: Duration,
    transforms: Mutex<HashMap<usize, Arc<dyn AxisTransform>>>,
}

impl Gamepad {
    pub fn new(controller: u8, feed: ControllerFeed, max_age: Duration) -> Self {
        Self {
            name: format!("Gamepad({controller})"),
            controller,
            feed,
            max_age,
            transforms: Mutex::new(HashMap::new()),
        }
    }

    pub fn controller(&self) -> u8 {
        self.controller
    }

    /// Apply `transform` to every read of `axis` after deadband handling.
    pub fn set_axis_transform(&self, axis: usize, transform: Arc<dyn AxisTransform>) {
        self.transforms.lock().insert(axis, transform);
    }

    pub fn clear_axis_transform(&self, axis: usize) {
        self.transforms.lock().remove(&axis);
    }

    /// Whether a fresh sample is available right now.
    pub fn is_connected(&self) -> bool {
        self.fresh(|_| ()).is_some()
    }

    fn fresh<R>(&self, f: impl FnOnce(&ControllerData) -> R) -> Option<R> {
        let max_age = self.max_age;
        self.feed
            .read(self.controller, |data, received| {
                (Instant::now().saturating_duration_since(received) <= max_age).then(|| f(data))
            })
            .flatten()
    }
}

/// Collapse `|value| < deadband` to zero and rescale the rest onto [-1, 1].
fn apply_deadband(value: f64, deadband: f64) -> f64 {
    if value.abs() < deadband {
        return 0.0;
    }
    if deadband > 0.0 && deadband < 1.0 {
        (value - value.signum() * deadband) / (1.0 - deadband)
    } else {
        value
    }
}

impl Device for Gamepad {
    fn name(&self) -> &str {
        &self.name
    }
}

impl InputSource for Gamepad {
    fn axis(&self, index: usize, deadband: f64) -> f64 {
        let Some(raw) = self.fresh(|d| d.axes.get(index).copied()).flatten() else {
            return 0.0;
        };
        let value = apply_deadband(raw, deadband.abs());
        if value == 0.0 {
            return 0.0;
        }
        match self.transforms.lock().get(&index) {
            Some(transform) => transform.apply(value).clamp(-1.0, 1.0),
            None => value,
        }
    }

    fn button(&self, index: usize) -> bool {
        self.fresh(|d| d.buttons.get(index).copied())
            .flatten()
            .unwrap_or(false)
    }

    fn dpad(&self, index: usize) -> u8 {
        self.fresh(|d| d.dpads.get(index).copied())
            .flatten()
            .unwrap_or(DPAD_CENTERED)
    }
}
