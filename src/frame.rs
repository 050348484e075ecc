// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Sensor frame decoding
//!
//! The particulate sensor streams fixed-layout frames over a 9600 baud UART
//! with no transport-level framing. Bytes are accumulated in a statically
//! sized buffer; the caller decides when a frame is complete (the line went
//! quiet for the settle time) and asks the decoder to validate it.
//!
//! # Frame Format
//!
//! ```text
//! [0x16 0x11 0x0B] [b3 b4] [pm25 MSB] [pm25 LSB] [b7 .. b19]
//!
//! sum(b0 ..= b19) mod 256 == 0
//! ```

use crate::error::FrameError;
use crate::metrics::DecoderStats;
use crate::window::ReadingWindow;
use log::{debug, info, warn};

/// Header every sensor frame starts with
pub const FRAME_MAGIC: [u8; 3] = [0x16, 0x11, 0x0B];

/// Bytes covered by the checksum
pub const FRAME_LEN: usize = 20;

/// Offset of the big-endian 16-bit reading
pub const VALUE_OFFSET: usize = 5;

/// Size of the receive buffer
pub const FRAME_CAPACITY: usize = 255;

/// One validated sensor reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Raw value from the frame
    pub raw: u16,
    /// New smoothed value, present when this reading completed a window cycle
    pub average: Option<f64>,
}

/// Fixed-capacity receive buffer with an explicit cursor
#[derive(Debug, Clone)]
pub struct SensorFrame {
    bytes: [u8; FRAME_CAPACITY],
    len: usize,
}

impl SensorFrame {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self {
            bytes: [0; FRAME_CAPACITY],
            len: 0,
        }
    }

    /// Append a byte
    ///
    /// When the cursor reaches capacity everything is discarded and an
    /// overflow error is returned. No frame recovery is attempted.
    pub fn push(&mut self, byte: u8) -> Result<(), FrameError> {
        self.bytes[self.len] = byte;
        self.len += 1;
        if self.len >= FRAME_CAPACITY {
            self.clear();
            return Err(FrameError::Overflow {
                capacity: FRAME_CAPACITY,
            });
        }
        Ok(())
    }

    /// Bytes accumulated so far
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Number of accumulated bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is accumulated
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Zero the buffer and rewind the cursor
    pub fn clear(&mut self) {
        self.bytes = [0; FRAME_CAPACITY];
        self.len = 0;
    }

    /// Validate the accumulated bytes as a sensor frame
    ///
    /// Returns the raw reading on success. Never reads past the cursor.
    pub fn validate(&self) -> Result<u16, FrameError> {
        let data = self.as_slice();
        if data.len() < FRAME_LEN {
            return Err(FrameError::BufferTooShort {
                needed: FRAME_LEN,
                available: data.len(),
            });
        }

        if data[..FRAME_MAGIC.len()] != FRAME_MAGIC {
            return Err(FrameError::InvalidHeader {
                found: [data[0], data[1], data[2]],
            });
        }

        let sum = checksum(&data[..FRAME_LEN]);
        if sum != 0 {
            return Err(FrameError::InvalidChecksum { sum });
        }

        Ok(u16::from_be_bytes([data[VALUE_OFFSET], data[VALUE_OFFSET + 1]]))
    }
}

impl Default for SensorFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrapping 8-bit sum of `bytes`
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Decoder turning the sensor byte stream into readings
#[derive(Debug, Clone, Default)]
pub struct SensorFrameDecoder {
    frame: SensorFrame,
    window: ReadingWindow,
    stats: DecoderStats,
}

impl SensorFrameDecoder {
    /// Create a decoder with an empty buffer and window
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate one byte from the sensor link
    pub fn feed(&mut self, byte: u8) {
        if let Err(e) = self.frame.push(byte) {
            self.stats.overflows += 1;
            warn!("sensor: {}, bytes discarded", e);
        }
    }

    /// Accumulate a run of bytes
    pub fn feed_slice(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.feed(b);
        }
    }

    /// Validate and consume the accumulated frame
    ///
    /// Call once the byte source has gone quiet. The buffer is cleared whatever
    /// the outcome, so a malformed frame is never partially consumed.
    pub fn try_decode(&mut self) -> Option<Reading> {
        let result = self.frame.validate();
        self.frame.clear();

        match result {
            Ok(raw) => {
                self.stats.frames_decoded += 1;
                debug!("sensor: PM2.5 reading {}", raw);
                let average = self.window.push(raw);
                if let Some(avg) = average {
                    info!("sensor: new PM2.5 average {:.2}", avg);
                }
                Some(Reading { raw, average })
            }
            Err(e) => {
                match e {
                    FrameError::BufferTooShort { .. } => self.stats.short_frames += 1,
                    FrameError::InvalidHeader { .. } => self.stats.bad_header += 1,
                    FrameError::InvalidChecksum { .. } => self.stats.bad_checksum += 1,
                    FrameError::Overflow { .. } => self.stats.overflows += 1,
                }
                warn!("sensor: frame rejected: {}", e);
                None
            }
        }
    }

    /// Bytes waiting for validation
    pub fn len(&self) -> usize {
        self.frame.len()
    }

    /// Whether no bytes are pending
    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// Drop pending bytes without validating them
    pub fn clear(&mut self) {
        self.frame.clear();
    }

    /// Smoothing window
    pub fn window(&self) -> &ReadingWindow {
        &self.window
    }

    /// Counters
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }
}

/// Build a well-formed frame carrying `value`
///
/// The last byte is chosen so the checksum closes to zero. Useful for
/// simulators and tests.
pub fn encode_frame(value: u16) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..FRAME_MAGIC.len()].copy_from_slice(&FRAME_MAGIC);
    frame[VALUE_OFFSET..VALUE_OFFSET + 2].copy_from_slice(&value.to_be_bytes());
    let sum = checksum(&frame[..FRAME_LEN - 1]);
    frame[FRAME_LEN - 1] = 0u8.wrapping_sub(sum);
    frame
}
