//! # Robo Bring-up Binary
//!
//! Runs the sample robot on simulated motors and a simulated driver
//! station. Useful for checking a profile and watching the runtime's
//! timing before real drivers are wired in.
//!
//! # Usage
//!
//! ```bash
//! # Run until Ctrl-C
//! robo
//!
//! # Run for 10 seconds with debug logging
//! robo --duration-secs 10 -v
//!
//! # Print the effective configuration (defaults filled in) and exit
//! robo --config path/to/robot.toml --print-config
//! ```

mod demo;
mod sim;

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use robo_common::config::{ConfigLoader, LogLevel, SharedConfig};
use robo_common::input::ControllerFeed;
use robo_common::profile::RobotProfile;
use robo_runtime::robot::Robot;
use serde::{Deserialize, Serialize};
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use crate::demo::DemoRobot;
use crate::sim::SimulatedController;

/// Rate of the simulated driver station.
const SIM_PACKET_RATE: Duration = Duration::from_millis(20);

/// Robo - sample robot on simulated hardware
#[derive(Parser, Debug)]
#[command(name = "robo")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Runs the sample robot on simulated motors and a simulated controller")]
#[command(long_about = None)]
struct Args {
    /// Path to the bring-up configuration (robot.toml).
    #[arg(short, long, default_value = "robo/config/robot.toml")]
    config: PathBuf,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(short, long, value_name = "SECS")]
    duration_secs: Option<u64>,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

/// `robot.toml` layout.
#[derive(Debug, Serialize, Deserialize)]
struct BringUpConfig {
    shared: SharedConfig,
    #[serde(default)]
    profile: RobotProfile,
}

fn main() {
    if let Err(e) = run() {
        // The subscriber may not be installed yet.
        eprintln!("robo: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = BringUpConfig::load(&args.config)?;
    config.shared.validate()?;
    config.profile.validate()?;

    if args.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    setup_tracing(&args, config.shared.log_level);
    info!(
        "robo v{} starting as '{}'",
        env!("CARGO_PKG_VERSION"),
        config.shared.service_name
    );

    let feed = ControllerFeed::new();
    let mut robot = Robot::new(config.profile, DemoRobot::new(feed.clone()))?;
    let driver_station = SimulatedController::spawn(feed, 0, SIM_PACKET_RATE)?;

    let ctx = robot.context().clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        if let Err(e) = ctx.request_stop() {
            warn!("stop request failed: {}", e);
        }
    })?;

    robot.start()?;
    robot.enable()?;

    if let Some(secs) = args.duration_secs {
        let ctx = robot.context().clone();
        thread::Builder::new()
            .name("robo-deadline".into())
            .spawn(move || {
                thread::sleep(Duration::from_secs(secs));
                info!("Run duration of {}s elapsed", secs);
                if let Err(e) = ctx.request_stop() {
                    warn!("stop request failed: {}", e);
                }
            })?;
    }

    let stats = robot.context().clone();
    let result = robot.wait();
    driver_station.stop();

    let stats = stats.loop_stats();
    info!(
        ticks = stats.ticks,
        overruns = stats.overruns,
        max_tick_us = stats.max_tick.as_micros() as u64,
        avg_tick_us = stats.average().as_micros() as u64,
        "lifecycle loop finished"
    );
    result?;
    info!("robo shutdown complete");
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        configured.as_directive().parse().unwrap_or(Level::INFO)
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
