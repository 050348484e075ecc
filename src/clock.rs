// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Time sources
//!
//! The node needs two notions of time: a monotonic uptime for every interval
//! decision (reconnect gate, heartbeat, fix age, settle time) and a wall clock
//! for the `tst` field of published payloads.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of uptime and wall-clock time
pub trait Clock {
    /// Monotonic time since the clock was created
    fn uptime(&self) -> Duration;

    /// Seconds since the Unix epoch
    fn unix_seconds(&self) -> i64;
}

/// Production clock backed by `Instant` and `chrono::Utc`
#[derive(Debug, Clone)]
pub struct SystemClock {
    boot: Instant,
}

impl SystemClock {
    /// Create a clock whose uptime starts now
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn uptime(&self) -> Duration {
        self.boot.elapsed()
    }

    fn unix_seconds(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Hand-driven clock for tests and simulations
///
/// Clones share the same time, so a test can keep one handle and advance it
/// while a component owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    uptime_ms: Arc<AtomicU64>,
    /// Wall clock at uptime zero
    unix_base: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock at uptime zero and the given wall-clock time
    pub fn new(unix_seconds: i64) -> Self {
        Self {
            uptime_ms: Arc::new(AtomicU64::new(0)),
            unix_base: Arc::new(AtomicI64::new(unix_seconds)),
        }
    }

    /// Move both uptime and wall clock forward
    pub fn advance(&self, by: Duration) {
        self.uptime_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump the wall clock without touching uptime (e.g. an NTP correction)
    pub fn set_unix_seconds(&self, unix_seconds: i64) {
        self.unix_base
            .store(unix_seconds - self.elapsed_secs(), Ordering::SeqCst);
    }

    fn elapsed_secs(&self) -> i64 {
        (self.uptime_ms.load(Ordering::SeqCst) / 1000) as i64
    }
}

impl Clock for ManualClock {
    fn uptime(&self) -> Duration {
        Duration::from_millis(self.uptime_ms.load(Ordering::SeqCst))
    }

    fn unix_seconds(&self) -> i64 {
        self.unix_base.load(Ordering::SeqCst) + self.elapsed_secs()
    }
}
