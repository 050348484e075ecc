// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Reading window
//!
//! Circular buffer of the five most recent raw readings. A smoothed value is
//! produced once per five accepted readings, when the write index wraps.

/// Number of readings averaged together
pub const WINDOW_SIZE: usize = 5;

/// Fixed five-slot smoothing window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingWindow {
    samples: [u16; WINDOW_SIZE],
    index: usize,
    average: f64,
    valid: bool,
}

impl ReadingWindow {
    /// Create an empty window
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a reading
    ///
    /// Returns the new mean when this reading completed a cycle of five.
    pub fn push(&mut self, raw: u16) -> Option<f64> {
        self.samples[self.index] = raw;
        self.index = (self.index + 1) % WINDOW_SIZE;

        if self.index != 0 {
            return None;
        }

        let sum: u32 = self.samples.iter().map(|&s| s as u32).sum();
        self.average = sum as f64 / WINDOW_SIZE as f64;
        self.valid = true;
        Some(self.average)
    }

    /// Latest mean, `None` until the first full cycle
    pub fn average(&self) -> Option<f64> {
        self.valid.then_some(self.average)
    }

    /// Whether a full cycle has completed
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Slots in storage order
    pub fn samples(&self) -> &[u16; WINDOW_SIZE] {
        &self.samples
    }

    /// Next slot to be written
    pub fn index(&self) -> usize {
        self.index
    }
}
