// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # pmnode - Particulate matter field node core
//!
//! The acquire, validate, throttle and publish pipeline of a battery-powered
//! PM2.5 sensor node that reports over an unreliable wireless link.
//!
//! ## Key Features
//!
//! - **Bounded framing**: fixed-size sensor frame buffer with discard-on-overflow
//! - **Smoothing**: 5-sample mean over validated readings
//! - **Movement throttle**: publish on accumulated great-circle distance or heartbeat
//! - **Fixed-interval reconnect**: link and session re-established at a bounded cadence
//! - **Stable identity**: device id derived from hardware ids, baked into every topic
//!
//! ## Quick Start
//!
//! ```rust
//! use pmnode::{encode_frame, GeoFix, GeoThrottle, SensorFrameDecoder, ThrottleConfig};
//! use std::time::Duration;
//!
//! let mut decoder = SensorFrameDecoder::new();
//! decoder.feed_slice(&encode_frame(33));
//! let reading = decoder.try_decode().unwrap();
//! assert_eq!(reading.raw, 33);
//!
//! let mut throttle = GeoThrottle::new(ThrottleConfig::with_min_distance(10));
//! let here = GeoFix::new(0.0, 0.0, 0.0);
//! assert!(!throttle.observe(&here, Duration::ZERO)); // baseline only
//! ```
//!
//! ## Modules
//!
//! - [`connectivity`]: Link and session state machine
//! - [`frame`]: Sensor frame validation
//! - [`window`]: Reading smoothing
//! - [`geo`]: Distance and publish throttle
//! - [`nmea`]: Position source decoding
//! - [`line`]: Passthrough line assembly
//! - [`transport`]: Link and session abstractions
//! - [`payload`]: Published JSON documents

// Modules
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod frame;
pub mod geo;
pub mod identity;
pub mod line;
pub mod metrics;
pub mod nmea;
pub mod payload;
pub mod recovery;
pub mod transport;
pub mod window;

// Re-exports for convenient access
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BrokerConfig, LinkConfig, NodeConfig, SensorConfig, ThrottleConfig, TopicConfig};
pub use connectivity::{ConnectivityManager, ConnectivityState, MessageHandler};
pub use error::{ConfigError, FrameError, NodeError, PayloadError, Result, SentenceError, TransportError};
pub use frame::{encode_frame, Reading, SensorFrame, SensorFrameDecoder};
pub use geo::{distance_m, GeoFix, GeoThrottle};
pub use identity::{DeviceIdentity, Topics};
pub use line::LineAssembler;
pub use metrics::{DecoderStats, LinkStats};
pub use nmea::NmeaDecoder;
pub use payload::{AirReport, GpsReport, Presence};
pub use recovery::AttemptGate;
pub use transport::{
    InboundMessage, LastWill, LinkLayer, MemoryLink, MemorySession, Qos, SessionParams,
    SessionTransport,
};
pub use window::ReadingWindow;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
