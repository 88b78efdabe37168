//! Robo Common Library
//!
//! Shared configuration and the capability contracts the runtime consumes
//! from device drivers and input links.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and types
//! - [`profile`] - Robot timing and pool profile
//! - [`device`] - Device and motor controller capabilities
//! - [`input`] - Controller packets and the latest-sample feed
//! - [`transform`] - Axis response curves
//! - [`table`] - Key/value network table
//! - [`prelude`] - Common re-exports for convenience

pub mod config;
pub mod consts;
pub mod device;
pub mod input;
pub mod prelude;
pub mod profile;
pub mod table;
pub mod transform;
