//! Robot profile: the immutable timing and pool configuration snapshot.
//!
//! Loaded from TOML (or built in code) before the robot is constructed.
//! The runtime stores it behind an `Arc` and never mutates it afterwards.
//!
//! # TOML Example
//!
//! ```toml
//! [profile]
//! main_scheduler_threads = 4
//! periodic_function_rate_ms = 20
//! watchdog_timeout_ms = 250
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::consts::{
    ACTION_FUNCTION_PERIOD_MS_DEFAULT, MAIN_SCHEDULER_THREADS_DEFAULT, MAIN_SCHEDULER_THREADS_MAX,
    MAX_GAMEPAD_DATA_AGE_MS_DEFAULT, PERIODIC_FUNCTION_RATE_MS_DEFAULT,
    WATCHDOG_TIMEOUT_MS_DEFAULT,
};

/// Timing and pool configuration consumed at robot construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotProfile {
    /// Worker threads driving action `process()` ticks.
    pub main_scheduler_threads: u32,
    /// Lifecycle tick period [ms].
    pub periodic_function_rate_ms: u64,
    /// Controller samples older than this read neutral [ms].
    pub max_gamepad_data_age_ms: u64,
    /// Period between two ticks of one running action [ms].
    pub action_function_period_ms: u64,
    /// Watchdog window [ms]. Not derived from the tick rate.
    pub watchdog_timeout_ms: u64,
}

impl Default for RobotProfile {
    fn default() -> Self {
        Self {
            main_scheduler_threads: MAIN_SCHEDULER_THREADS_DEFAULT,
            periodic_function_rate_ms: PERIODIC_FUNCTION_RATE_MS_DEFAULT,
            max_gamepad_data_age_ms: MAX_GAMEPAD_DATA_AGE_MS_DEFAULT,
            action_function_period_ms: ACTION_FUNCTION_PERIOD_MS_DEFAULT,
            watchdog_timeout_ms: WATCHDOG_TIMEOUT_MS_DEFAULT,
        }
    }
}

impl RobotProfile {
    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.main_scheduler_threads == 0
            || self.main_scheduler_threads > MAIN_SCHEDULER_THREADS_MAX
        {
            return Err(ConfigError::ValidationError(format!(
                "main_scheduler_threads {} out of range [1, {}]",
                self.main_scheduler_threads, MAIN_SCHEDULER_THREADS_MAX
            )));
        }
        for (name, value) in [
            ("periodic_function_rate_ms", self.periodic_function_rate_ms),
            ("action_function_period_ms", self.action_function_period_ms),
            ("watchdog_timeout_ms", self.watchdog_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn periodic_function_rate(&self) -> Duration {
        Duration::from_millis(self.periodic_function_rate_ms)
    }

    #[inline]
    pub fn max_gamepad_data_age(&self) -> Duration {
        Duration::from_millis(self.max_gamepad_data_age_ms)
    }

    #[inline]
    pub fn action_function_period(&self) -> Duration {
        Duration::from_millis(self.action_function_period_ms)
    }

    #[inline]
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }
}
