//! Controller input: wire sample decoding and the shared latest-sample feed.
//!
//! # Packet layout
//!
//! ```text
//! [controller][axis_count][button_count][dpad_count]
//! [axis 0 hi][axis 0 lo] ...            big-endian i16 per axis
//! [button bytes]                        ceil(button_count / 8)
//! [dpad bytes]                          ceil(dpad_count / 2), one nibble each
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::warn;

use crate::consts::{DPAD_CENTERED, DPAD_MAX};

/// Readable controller capability.
///
/// Every read is subject to the implementor's staleness policy: a stale or
/// missing source reads neutral (axis 0.0, button released, dpad centered).
pub trait InputSource: Send + Sync {
    /// Axis value in [-1.0, 1.0] after deadband handling.
    fn axis(&self, index: usize, deadband: f64) -> f64;

    fn button(&self, index: usize) -> bool;

    /// Dpad direction in `0..=8`, 0 meaning centered.
    fn dpad(&self, index: usize) -> u8;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("controller packet too short: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
}

/// One decoded controller sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerData {
    pub controller: u8,
    pub axes: Vec<f64>,
    pub buttons: Vec<bool>,
    pub dpads: Vec<u8>,
}

impl ControllerData {
    const HEADER_LEN: usize = 4;

    /// Decode a raw controller packet.
    pub fn from_packet(packet: &[u8]) -> Result<Self, PacketError> {
        if packet.len() < Self::HEADER_LEN {
            return Err(PacketError::Truncated {
                needed: Self::HEADER_LEN,
                actual: packet.len(),
            });
        }
        let controller = packet[0];
        let axis_count = packet[1] as usize;
        let button_count = packet[2] as usize;
        let dpad_count = packet[3] as usize;

        let button_bytes = button_count.div_ceil(8);
        let dpad_bytes = dpad_count.div_ceil(2);
        let axes_at = Self::HEADER_LEN;
        let buttons_at = axes_at + 2 * axis_count;
        let dpads_at = buttons_at + button_bytes;
        let needed = dpads_at + dpad_bytes;
        if packet.len() < needed {
            return Err(PacketError::Truncated {
                needed,
                actual: packet.len(),
            });
        }

        let axes = packet[axes_at..buttons_at]
            .chunks_exact(2)
            .map(|pair| {
                let raw = i16::from_be_bytes([pair[0], pair[1]]);
                if raw <= 0 {
                    f64::from(raw) / 32768.0
                } else {
                    f64::from(raw) / 32767.0
                }
            })
            .collect();

        // Bit 7 of byte i is button i*8, bit 0 is button i*8+7.
        let mut buttons = vec![false; button_count];
        for (i, &byte) in packet[buttons_at..dpads_at].iter().enumerate() {
            for j in 0..8 {
                let index = i * 8 + j;
                if index < button_count {
                    buttons[index] = byte & (0x80 >> j) != 0;
                }
            }
        }

        // High nibble of byte i is dpad i*2, low nibble is dpad i*2+1.
        let mut dpads = vec![DPAD_CENTERED; dpad_count];
        for (i, &byte) in packet[dpads_at..needed].iter().enumerate() {
            for (j, nibble) in [byte >> 4, byte & 0x0F].into_iter().enumerate() {
                let index = i * 2 + j;
                if index < dpad_count {
                    if nibble <= DPAD_MAX {
                        dpads[index] = nibble;
                    } else {
                        warn!(
                            controller,
                            dpad = index,
                            raw = nibble,
                            "dpad out of range, reading centered"
                        );
                    }
                }
            }
        }

        Ok(Self {
            controller,
            axes,
            buttons,
            dpads,
        })
    }
}

#[derive(Debug, Clone)]
struct Sample {
    data: ControllerData,
    received: Instant,
}

/// Latest sample per controller index, shared between the receiver and
/// every gamepad reading it.
#[derive(Debug, Clone, Default)]
pub struct ControllerFeed {
    samples: Arc<RwLock<HashMap<u8, Sample>>>,
}

impl ControllerFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `packet` and store it stamped with the current time.
    ///
    /// Returns the controller index the packet belonged to.
    pub fn update(&self, packet: &[u8]) -> Result<u8, PacketError> {
        let data = ControllerData::from_packet(packet)?;
        let controller = data.controller;
        self.store(data, Instant::now());
        Ok(controller)
    }

    /// Store an already decoded sample with an explicit receive time.
    pub fn store(&self, data: ControllerData, received: Instant) {
        self.samples
            .write()
            .insert(data.controller, Sample { data, received });
    }

    /// Forget a controller (e.g. on disconnect).
    pub fn remove(&self, controller: u8) {
        self.samples.write().remove(&controller);
    }

    /// Run `f` on the latest sample of `controller` and its receive time.
    pub fn read<R>(
        &self,
        controller: u8,
        f: impl FnOnce(&ControllerData, Instant) -> R,
    ) -> Option<R> {
        let samples = self.samples.read();
        samples.get(&controller).map(|s| f(&s.data, s.received))
    }
}
