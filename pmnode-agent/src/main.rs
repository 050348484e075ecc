// pmnode Agent - Host-side control loop for pmnode
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # pmnode Agent
//!
//! Runs a particulate matter field node from a host with USB serial adapters:
//! PM2.5 sensor, optional GPS receiver and optional passthrough port, reporting
//! to an MQTT broker.
//!
//! ## Usage
//!
//! ```bash
//! # Sensor and GPS, credentials from the environment
//! PMNODE_MQTT_PASSWORD=secret pmnode-agent --sensor-port /dev/ttyUSB0 \
//!     --gps-port /dev/ttyUSB1 --chip-id a1b2c3 --flash-id 1640ef \
//!     --broker-host broker.local --mqtt-user node
//!
//! # Log what would be published without a broker
//! pmnode-agent --sensor-port /dev/ttyUSB0 --chip-id 1 --flash-id 1 --dry-run
//! ```

mod error;
mod link;
mod mqtt;
mod node;
mod serial;

use clap::Parser;
use error::{AgentError, Result};
use link::HostLink;
use mqtt::MqttSession;
use node::{Node, Sources};
use pmnode::config::NodeConfig;
use pmnode::{ConnectivityManager, DeviceIdentity, MemoryLink, MemorySession, SystemClock};
use serial::{ByteSource, SerialSource};
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// pmnode field node agent
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port of the PM2.5 sensor
    #[arg(long, env = "PMNODE_SENSOR_PORT")]
    sensor_port: String,

    /// Serial port of the GPS receiver
    #[arg(long, env = "PMNODE_GPS_PORT")]
    gps_port: Option<String>,

    /// Serial port whose lines are forwarded on the serial topic
    #[arg(long, env = "PMNODE_PASSTHROUGH_PORT")]
    passthrough_port: Option<String>,

    /// Baud rate of every serial port
    #[arg(long, default_value = "9600")]
    baud_rate: u32,

    /// Chip id (hex) used to derive the device identity
    #[arg(long, env = "PMNODE_CHIP_ID", value_parser = parse_hex)]
    chip_id: u32,

    /// Flash chip id (hex) used to derive the device identity
    #[arg(long, env = "PMNODE_FLASH_ID", value_parser = parse_hex)]
    flash_id: u32,

    /// Wireless network name (informational on hosts)
    #[arg(long, env = "PMNODE_SSID", default_value = "")]
    ssid: String,

    /// Wireless network password
    #[arg(long, env = "PMNODE_WIFI_PASSWORD", default_value = "", hide_env_values = true)]
    wifi_password: String,

    /// MQTT broker host
    #[arg(long, env = "PMNODE_BROKER_HOST", default_value = "localhost")]
    broker_host: String,

    /// MQTT broker port
    #[arg(long, env = "PMNODE_BROKER_PORT", default_value = "1883")]
    broker_port: u16,

    /// MQTT username
    #[arg(long, env = "PMNODE_MQTT_USER", default_value = "")]
    mqtt_user: String,

    /// MQTT password
    #[arg(long, env = "PMNODE_MQTT_PASSWORD", default_value = "", hide_env_values = true)]
    mqtt_password: String,

    /// Base topic; messages go to <base>/<device id>/...
    #[arg(long, env = "PMNODE_BASE_TOPIC", default_value = "pm25")]
    base_topic: String,

    /// Seconds between reconnect attempts
    #[arg(long, default_value = "60")]
    reconnect_interval: u64,

    /// MQTT keep-alive in seconds
    #[arg(long, default_value = "15")]
    keep_alive: u64,

    /// Meters of movement before a position is published
    #[arg(long, default_value = "10")]
    min_distance: u64,

    /// Seconds after which a position is published even without movement
    #[arg(long, default_value = "3600")]
    heartbeat: u64,

    /// Use in-memory transports and log what would be published
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_hex(value: &str) -> std::result::Result<u32, String> {
    let digits = value.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("'{}' is not a hex id: {}", value, e))
}

impl Args {
    fn node_config(&self) -> Result<NodeConfig> {
        let mut config = NodeConfig::default();
        config.link.ssid = self.ssid.clone();
        config.link.password = self.wifi_password.clone();
        config.broker.host = self.broker_host.clone();
        config.broker.port = self.broker_port;
        config.broker.username = self.mqtt_user.clone();
        config.broker.password = self.mqtt_password.clone();
        config.broker.reconnect_interval = Duration::from_secs(self.reconnect_interval);
        config.broker.keep_alive = Duration::from_secs(self.keep_alive);
        config.topics.base = self.base_topic.clone();
        config.throttle.min_distance_m = self.min_distance;
        config.throttle.heartbeat_interval = Duration::from_secs(self.heartbeat);
        config.sensor.baud_rate = self.baud_rate;
        config.validate()?;
        Ok(config)
    }

    fn sources(&self, baud_rate: u32) -> Result<Sources> {
        let open = |path: &str| -> Result<Box<dyn ByteSource>> {
            Ok(Box::new(SerialSource::open(path, baud_rate)?))
        };
        Ok(Sources {
            sensor: open(&self.sensor_port)?,
            gps: self.gps_port.as_deref().map(open).transpose()?,
            passthrough: self.passthrough_port.as_deref().map(open).transpose()?,
        })
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(args: Args) -> Result<()> {
    let config = args.node_config()?;
    let identity = DeviceIdentity::from_hardware(args.chip_id, args.flash_id);
    info!("Device id {}", identity);

    let sources = args.sources(config.sensor.baud_rate)?;
    let clock = SystemClock::new();

    if args.dry_run {
        info!("Dry run: nothing leaves this host");
        let connectivity = ConnectivityManager::new(
            &config,
            identity,
            MemoryLink::new(),
            MemorySession::new(),
            clock,
        );
        let mut node = Node::new(connectivity, sources, config.sensor.clone(), config.throttle.clone());
        node.run(|connectivity| {
            while let Some(msg) = connectivity.session_mut().pop_published() {
                info!(
                    "[dry-run] {} (retained={}): {}",
                    msg.topic,
                    msg.retained,
                    msg.payload_str()
                );
            }
        })
    }

    info!(
        "Broker {}:{}, base topic '{}'",
        config.broker.host, config.broker.port, config.topics.base
    );
    let link = HostLink::new(&config.broker.host, config.broker.port);
    let connectivity = ConnectivityManager::new(&config, identity, link, MqttSession::new(), clock);
    let mut node = Node::new(connectivity, sources, config.sensor.clone(), config.throttle.clone());
    node.run(|_| {})
}

fn main() {
    let args = Args::parse();
    init_tracing(&args.log_level);

    info!("pmnode agent v{} (core v{})", env!("CARGO_PKG_VERSION"), pmnode::VERSION);

    if let Err(e) = run(args) {
        error!("{}", e);
        if let AgentError::Serial { .. } = e {
            error!("Check the port path and that this user may open it");
        }
        std::process::exit(1);
    }
}
