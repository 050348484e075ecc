// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for the node
//!
//! All values are supplied at build or boot time. Defaults match the field
//! firmware deployment.

use crate::error::ConfigError;
use std::time::Duration;

/// Complete node configuration
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Link-layer network
    pub link: LinkConfig,
    /// Pub/sub broker session
    pub broker: BrokerConfig,
    /// Topic naming
    pub topics: TopicConfig,
    /// Position publish throttle
    pub throttle: ThrottleConfig,
    /// Particulate sensor link
    pub sensor: SensorConfig,
}

/// Link-layer (wireless network) settings
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Network name
    pub ssid: String,
    /// Network passphrase, opaque
    pub password: String,
    /// Maximum time to wait for the join to complete
    pub join_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            join_timeout: Duration::from_secs(10),
        }
    }
}

/// Session-layer (MQTT broker) settings
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker host name or address
    pub host: String,
    /// Broker TCP port
    pub port: u16,
    /// Username, empty for anonymous
    pub username: String,
    /// Password, opaque
    pub password: String,
    /// Prepended to the device id to form the client id
    pub client_id_prefix: String,
    /// Keep-alive announced to the broker
    pub keep_alive: Duration,
    /// Upper bound on a blocking handshake or write
    pub write_timeout: Duration,
    /// Minimum time between two connect attempts
    pub reconnect_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id_prefix: "gps-node-".to_string(),
            keep_alive: Duration::from_secs(15),
            write_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(60),
        }
    }
}

/// Topic naming settings
#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// Base topic, without trailing slash
    pub base: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            base: "pm25".to_string(),
        }
    }
}

/// Position publish throttle settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Accumulated movement that triggers a publish
    pub min_distance_m: u64,
    /// Publish at least this often, even without movement
    pub heartbeat_interval: Duration,
    /// Fixes at least this old are ignored
    pub max_fix_age: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_distance_m: 10,
            heartbeat_interval: Duration::from_secs(60 * 60),
            max_fix_age: Duration::from_millis(2000),
        }
    }
}

impl ThrottleConfig {
    /// Default throttle with a custom minimum distance
    pub fn with_min_distance(min_distance_m: u64) -> Self {
        Self {
            min_distance_m,
            ..Default::default()
        }
    }
}

/// Particulate sensor link settings
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Serial baud rate
    pub baud_rate: u32,
    /// Quiet time after the last byte before a frame counts as complete
    pub settle_time: Duration,
    /// Pause at the end of every control-loop cycle
    pub idle_delay: Duration,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            settle_time: Duration::from_millis(100),
            idle_delay: Duration::from_millis(500),
        }
    }
}

impl NodeConfig {
    /// Check the configuration before the node starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::Missing("broker.host"));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::Invalid {
                field: "broker.port",
                reason: "must not be 0".to_string(),
            });
        }
        if self.broker.keep_alive < Duration::from_secs(5) {
            return Err(ConfigError::Invalid {
                field: "broker.keep_alive",
                reason: format!("{:?} is below the 5s minimum", self.broker.keep_alive),
            });
        }
        if self.broker.reconnect_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "broker.reconnect_interval",
                reason: "must be positive".to_string(),
            });
        }
        if self.broker.write_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "broker.write_timeout",
                reason: "must be positive".to_string(),
            });
        }

        let base = &self.topics.base;
        if base.is_empty() {
            return Err(ConfigError::Missing("topics.base"));
        }
        if base.ends_with('/') || base.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "topics.base",
                reason: "must not start or end with '/'".to_string(),
            });
        }
        if base.contains(['+', '#']) {
            return Err(ConfigError::Invalid {
                field: "topics.base",
                reason: "must not contain MQTT wildcards".to_string(),
            });
        }

        if self.throttle.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "throttle.heartbeat_interval",
                reason: "must be positive".to_string(),
            });
        }
        if self.sensor.baud_rate == 0 {
            return Err(ConfigError::Invalid {
                field: "sensor.baud_rate",
                reason: "must not be 0".to_string(),
            });
        }
        Ok(())
    }
}
