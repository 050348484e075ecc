// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Fixed-interval attempt limiting
//!
//! Reconnects are paced by a single fixed interval rather than a backoff, so
//! the worst-case time to come back online is one interval plus one handshake.

use std::time::Duration;

/// Gate allowing at most one attempt per interval
///
/// The gate starts open: the first attempt after boot is allowed immediately,
/// as if the previous attempt happened infinitely long ago.
#[derive(Debug, Clone)]
pub struct AttemptGate {
    interval: Duration,
    last_attempt: Option<Duration>,
}

impl AttemptGate {
    /// Create an open gate
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_attempt: None,
        }
    }

    /// Whether an attempt at `now` would be allowed
    pub fn is_open(&self, now: Duration) -> bool {
        match self.last_attempt {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.interval,
        }
    }

    /// Record an attempt at `now`, closing the gate for one interval
    pub fn mark(&mut self, now: Duration) {
        self.last_attempt = Some(now);
    }

    /// Time until the gate opens again
    pub fn remaining(&self, now: Duration) -> Duration {
        match self.last_attempt {
            None => Duration::ZERO,
            Some(last) => (last + self.interval).saturating_sub(now),
        }
    }

    /// Uptime of the last recorded attempt
    pub fn last_attempt(&self) -> Option<Duration> {
        self.last_attempt
    }

    /// Configured interval
    pub fn interval(&self) -> Duration {
        self.interval
    }
}
