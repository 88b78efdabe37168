//! Simulated driver station.
//!
//! Publishes raw controller packets on a [`ControllerFeed`] at a fixed rate,
//! the same way a radio link would. Sticks sweep slowly and button 0 is
//! tapped once every few seconds.

use std::f64::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use robo_common::input::ControllerFeed;
use tracing::{debug, warn};

/// Seconds between two taps of button 0.
const TAP_INTERVAL_S: f64 = 4.0;
const TAP_LENGTH_S: f64 = 0.3;

pub struct SimulatedController {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SimulatedController {
    pub fn spawn(feed: ControllerFeed, controller: u8, rate: Duration) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name("robo-sim-ds".into())
            .spawn(move || {
                let start = Instant::now();
                while flag.load(Ordering::Relaxed) {
                    let packet = encode_packet(controller, start.elapsed().as_secs_f64());
                    if let Err(e) = feed.update(&packet) {
                        warn!(error = %e, "simulated packet rejected");
                    }
                    thread::sleep(rate);
                }
                debug!(controller, "simulated driver station stopped");
            })?;
        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SimulatedController {
    fn drop(&mut self) {
        self.halt();
    }
}

fn axis_raw(value: f64) -> [u8; 2] {
    let scaled = if value < 0.0 { value * 32768.0 } else { value * 32767.0 };
    (scaled.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16).to_be_bytes()
}

/// Two axes, four buttons and one dpad at time `t` seconds.
fn encode_packet(controller: u8, t: f64) -> Vec<u8> {
    let turn = 0.4 * (TAU * t / 7.0).sin();
    let forward = -0.8 * (TAU * t / 11.0).cos();
    let tapped = t % TAP_INTERVAL_S < TAP_LENGTH_S && t >= TAP_INTERVAL_S;

    let mut packet = vec![controller, 2, 4, 1];
    packet.extend_from_slice(&axis_raw(turn));
    packet.extend_from_slice(&axis_raw(forward));
    packet.push(if tapped { 0x80 } else { 0x00 });
    packet.push(0x00);
    packet
}
