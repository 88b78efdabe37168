//! Runtime-wide constants.
//!
//! Single source of truth for profile defaults and numeric limits.

/// Default number of worker threads driving action ticks.
pub const MAIN_SCHEDULER_THREADS_DEFAULT: u32 = 10;

/// Upper bound on the worker pool size.
pub const MAIN_SCHEDULER_THREADS_MAX: u32 = 256;

/// Default lifecycle tick period [ms].
pub const PERIODIC_FUNCTION_RATE_MS_DEFAULT: u64 = 50;

/// Default maximum age of controller samples before they read neutral [ms].
pub const MAX_GAMEPAD_DATA_AGE_MS_DEFAULT: u64 = 100;

/// Default action tick period [ms].
pub const ACTION_FUNCTION_PERIOD_MS_DEFAULT: u64 = 50;

/// Default watchdog window [ms].
pub const WATCHDOG_TIMEOUT_MS_DEFAULT: u64 = 500;

/// Maximum controller dpad value (8 directions + centered).
pub const DPAD_MAX: u8 = 8;

/// Dpad value reported for a centered or invalid pad.
pub const DPAD_CENTERED: u8 = 0;

/// Network table key carrying the robot enable state.
pub const ROBOT_STATE_KEY: &str = "robotstate";
