// pmnode Agent - Host-side control loop for pmnode
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Cooperative control loop
//!
//! One thread, one loop: sensor bytes, GPS bytes, passthrough lines,
//! connectivity housekeeping, then the idle delay. Nothing in a cycle blocks
//! for longer than the transport write timeout.

use crate::serial::ByteSource;
use pmnode::config::SensorConfig;
use pmnode::transport::{LinkLayer, SessionTransport};
use pmnode::{
    Clock, ConnectivityManager, GeoFix, GeoThrottle, LineAssembler, NmeaDecoder, SensorFrameDecoder,
    ThrottleConfig,
};
use std::time::Duration;
use tracing::{debug, warn};

const READ_CHUNK: usize = 256;

/// Byte sources attached to the node
pub struct Sources {
    pub sensor: Box<dyn ByteSource>,
    pub gps: Option<Box<dyn ByteSource>>,
    pub passthrough: Option<Box<dyn ByteSource>>,
}

/// Everything the control loop owns
pub struct Node<L, S, C> {
    connectivity: ConnectivityManager<L, S, C>,
    sources: Sources,
    sensor_config: SensorConfig,
    decoder: SensorFrameDecoder,
    last_sensor_byte: Duration,
    nmea: NmeaDecoder,
    throttle: GeoThrottle,
    lines: LineAssembler,
}

/// Read once from `source`, logging and swallowing I/O errors
fn poll(source: &mut dyn ByteSource, buf: &mut [u8]) -> usize {
    match source.read_available(buf) {
        Ok(n) => n,
        Err(e) => {
            warn!("Read from {} failed: {}", source.name(), e);
            0
        }
    }
}

impl<L: LinkLayer, S: SessionTransport, C: Clock> Node<L, S, C> {
    /// Assemble a node from its connectivity manager and byte sources
    pub fn new(
        connectivity: ConnectivityManager<L, S, C>,
        sources: Sources,
        sensor_config: SensorConfig,
        throttle_config: ThrottleConfig,
    ) -> Self {
        Self {
            connectivity,
            sources,
            sensor_config,
            decoder: SensorFrameDecoder::new(),
            last_sensor_byte: Duration::ZERO,
            nmea: NmeaDecoder::new(),
            throttle: GeoThrottle::new(throttle_config),
            lines: LineAssembler::new(),
        }
    }

    /// First connection attempt at boot
    pub fn start(&mut self) {
        if !self.connectivity.connect() {
            warn!("Initial connect failed, running offline until the next attempt");
        }
    }

    /// Latest position, or an invalid zero fix before the first one
    fn position(&self, now: Duration) -> GeoFix {
        self.nmea.fix(now).unwrap_or(GeoFix {
            valid: false,
            ..GeoFix::new(0.0, 0.0, 0.0)
        })
    }

    fn poll_sensor(&mut self, now: Duration) {
        let mut buf = [0u8; READ_CHUNK];
        let n = poll(&mut *self.sources.sensor, &mut buf);
        if n > 0 {
            self.decoder.feed_slice(&buf[..n]);
            self.last_sensor_byte = now;
            return;
        }

        // Frame is complete once the line has been quiet for the settle time
        if self.decoder.is_empty()
            || now.saturating_sub(self.last_sensor_byte) < self.sensor_config.settle_time
        {
            return;
        }
        if let Some(reading) = self.decoder.try_decode() {
            debug!("PM2.5 raw {}", reading.raw);
            if let Some(average) = reading.average {
                let fix = self.position(now);
                self.connectivity.publish_air(average, &fix);
            }
        }
    }

    fn poll_gps(&mut self, now: Duration) {
        let Some(gps) = self.sources.gps.as_mut() else {
            return;
        };
        let mut buf = [0u8; READ_CHUNK];
        let n = poll(&mut **gps, &mut buf);
        if n == 0 || !self.nmea.feed_slice(&buf[..n], now) {
            return;
        }
        if let Some(fix) = self.nmea.fix(now) {
            if self.throttle.observe(&fix, now) {
                self.connectivity.publish_gps(&fix);
            }
        }
    }

    fn poll_passthrough(&mut self) {
        let Some(source) = self.sources.passthrough.as_mut() else {
            return;
        };
        let mut buf = [0u8; READ_CHUNK];
        let n = poll(&mut **source, &mut buf);
        for line in self.lines.push_slice(&buf[..n]) {
            self.connectivity.publish_serial(&line);
        }
    }

    /// One pass over every component, without the idle delay
    pub fn cycle(&mut self) {
        let now = self.connectivity.clock().uptime();
        self.poll_sensor(now);
        self.poll_gps(now);
        self.poll_passthrough();
        self.connectivity.tick();
    }

    /// Run forever, calling `after_cycle` after each pass
    pub fn run<F>(&mut self, mut after_cycle: F) -> !
    where
        F: FnMut(&mut ConnectivityManager<L, S, C>),
    {
        self.start();
        loop {
            self.cycle();
            after_cycle(&mut self.connectivity);
            std::thread::sleep(self.sensor_config.idle_delay);
        }
    }

    /// Connectivity manager
    pub fn connectivity(&self) -> &ConnectivityManager<L, S, C> {
        &self.connectivity
    }

    /// Mutable connectivity manager
    pub fn connectivity_mut(&mut self) -> &mut ConnectivityManager<L, S, C> {
        &mut self.connectivity
    }
}
