// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Activity counters
//!
//! Plain counters kept by the frame decoder and the connectivity manager.
//! They are cheap to copy out and let the orchestrator log a periodic summary.

/// Frame decoder statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames that passed header and checksum validation
    pub frames_decoded: u64,
    /// Frames rejected for a wrong header
    pub bad_header: u64,
    /// Frames rejected for a non-zero checksum
    pub bad_checksum: u64,
    /// Frames shorter than the fixed frame length
    pub short_frames: u64,
    /// Buffer overflows (bytes discarded)
    pub overflows: u64,
}

impl DecoderStats {
    /// Total frames rejected for any reason
    pub fn rejected(&self) -> u64 {
        self.bad_header + self.bad_checksum + self.short_frames
    }

    /// Fraction of completed frames that decoded (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        let total = self.frames_decoded + self.rejected();
        if total == 0 {
            return 0.0;
        }
        self.frames_decoded as f64 / total as f64
    }
}

/// Connectivity statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Calls that actually tried to connect
    pub connect_attempts: u64,
    /// Attempts that ended offline
    pub connect_failures: u64,
    /// Messages handed to the session
    pub publishes: u64,
    /// Publishes refused by the session
    pub publish_failures: u64,
    /// Publishes skipped because the node was offline
    pub dropped_offline: u64,
    /// Messages received on subscribed topics
    pub inbound: u64,
}

impl LinkStats {
    /// Successful connects so far
    pub fn connects(&self) -> u64 {
        self.connect_attempts - self.connect_failures
    }
}
