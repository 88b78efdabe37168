//! Feedback control helpers for actions.

pub mod pid;

pub use pid::{Pid, PidGains, PidState};
