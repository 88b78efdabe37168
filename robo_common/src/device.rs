//! Device capability contracts.
//!
//! The runtime never drives hardware directly. It consumes devices through
//! the [`Device`] trait (identity, enable state, flags) and, for actuators,
//! the [`MotorController`] capability. Driver crates plug in below
//! [`MotorCore`] by implementing [`MotorOutput`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use parking_lot::Mutex;
use static_assertions::assert_impl_all;

// ─── Identity ───────────────────────────────────────────────────────

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique device identity used as the lock table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Allocate a fresh id. Ids are never reused within a process.
    pub fn next() -> Self {
        Self(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

bitflags! {
    /// How a device follows robot-wide state changes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceFlags: u8 {
        /// Enabled and disabled together with the robot.
        const MATCHES_ROBOT_STATE    = 0x01;
        /// Disabled when the watchdog trips.
        const DISABLES_WITH_WATCHDOG = 0x02;
    }
}

impl DeviceFlags {
    /// Flags carried by every actuator.
    pub const ACTUATOR: Self = Self::from_bits_truncate(
        Self::MATCHES_ROBOT_STATE.bits() | Self::DISABLES_WITH_WATCHDOG.bits(),
    );
}

impl Default for DeviceFlags {
    fn default() -> Self {
        Self::empty()
    }
}

// ─── Capabilities ───────────────────────────────────────────────────

/// Base capability every registered device provides.
///
/// Implementations use interior mutability: devices are shared between the
/// lifecycle thread, worker threads and user code behind `Arc`.
pub trait Device: Send + Sync {
    /// Stable human-readable name.
    fn name(&self) -> &str;

    fn flags(&self) -> DeviceFlags {
        DeviceFlags::empty()
    }

    fn enable(&self) {}

    fn disable(&self) {}

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Signed-speed actuator capability.
pub trait MotorController: Device {
    /// User-facing speed in [-1.0, 1.0]. Reads 0.0 while disabled.
    fn speed(&self) -> f64;

    /// Clamped to [-1.0, 1.0]. Ignored while disabled.
    fn set_speed(&self, speed: f64);

    fn is_inverted(&self) -> bool;

    fn set_inverted(&self, inverted: bool);

    fn is_brake_mode(&self) -> bool;

    fn set_brake_mode(&self, brake_mode: bool);
}

/// Driver seam below [`MotorCore`]. Receives the signed, inversion-applied
/// output value every time it changes.
pub trait MotorOutput: Send + 'static {
    fn write(&mut self, output: f64, brake_mode: bool);
}

// ─── Motor Core ─────────────────────────────────────────────────────

struct MotorState<O> {
    enabled: bool,
    /// Output value with the inversion factor applied.
    output: f64,
    factor: f64,
    brake_mode: bool,
    driver: O,
}

impl<O: MotorOutput> MotorState<O> {
    #[inline]
    fn push(&mut self) {
        let (output, brake) = (self.output, self.brake_mode);
        self.driver.write(output, brake);
    }
}

/// Shared speed / inversion / brake logic for any motor driver.
///
/// Starts disabled; the robot enables it together with its own state.
pub struct MotorCore<O: MotorOutput> {
    name: String,
    state: Mutex<MotorState<O>>,
}

impl<O: MotorOutput> MotorCore<O> {
    pub fn new(name: impl Into<String>, driver: O) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MotorState {
                enabled: false,
                output: 0.0,
                factor: 1.0,
                brake_mode: false,
                driver,
            }),
        }
    }

    /// Run `f` against the driver under the motor lock.
    pub fn with_driver<R>(&self, f: impl FnOnce(&O) -> R) -> R {
        f(&self.state.lock().driver)
    }
}

impl<O: MotorOutput> Device for MotorCore<O> {
    fn name(&self) -> &str {
        &self.name
    }

    fn flags(&self) -> DeviceFlags {
        DeviceFlags::ACTUATOR
    }

    fn enable(&self) {
        self.state.lock().enabled = true;
    }

    fn disable(&self) {
        let mut state = self.state.lock();
        state.enabled = false;
        state.output = 0.0;
        state.push();
    }

    fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }
}

impl<O: MotorOutput> MotorController for MotorCore<O> {
    fn speed(&self) -> f64 {
        let state = self.state.lock();
        if !state.enabled {
            return 0.0;
        }
        state.output / state.factor
    }

    fn set_speed(&self, speed: f64) {
        let mut state = self.state.lock();
        if !state.enabled {
            return;
        }
        state.output = speed.clamp(-1.0, 1.0) * state.factor;
        state.push();
    }

    fn is_inverted(&self) -> bool {
        self.state.lock().factor < 0.0
    }

    fn set_inverted(&self, inverted: bool) {
        let mut state = self.state.lock();
        let base = state.output * state.factor;
        state.factor = if inverted { -1.0 } else { 1.0 };
        state.output = base * state.factor;
    }

    fn is_brake_mode(&self) -> bool {
        self.state.lock().brake_mode
    }

    fn set_brake_mode(&self, brake_mode: bool) {
        self.state.lock().brake_mode = brake_mode;
    }
}

// ─── Simulation ─────────────────────────────────────────────────────

/// In-memory driver recording the last value written.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SimOutput {
    pub output: f64,
    pub brake_mode: bool,
    pub writes: u64,
}

impl MotorOutput for SimOutput {
    fn write(&mut self, output: f64, brake_mode: bool) {
        self.output = output;
        self.brake_mode = brake_mode;
        self.writes += 1;
    }
}

/// Motor controller backed by [`SimOutput`].
pub type SimMotor = MotorCore<SimOutput>;

impl SimMotor {
    pub fn sim(name: impl Into<String>) -> Self {
        Self::new(name, SimOutput::default())
    }

    /// Last signed value the driver received.
    pub fn driven_output(&self) -> f64 {
        self.with_driver(|d| d.output)
    }
}

assert_impl_all!(SimMotor: Device, MotorController, Send, Sync);
