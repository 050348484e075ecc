// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Connectivity management
//!
//! [`ConnectivityManager`] owns the link and session handles and the
//! connection state machine. Every public operation reports failure through
//! its return value; nothing here returns an error to the control loop.
//!
//! # Example
//!
//! ```rust
//! use pmnode::clock::ManualClock;
//! use pmnode::config::NodeConfig;
//! use pmnode::connectivity::ConnectivityManager;
//! use pmnode::identity::DeviceIdentity;
//! use pmnode::transport::{MemoryLink, MemorySession};
//!
//! let mut node = ConnectivityManager::new(
//!     &NodeConfig::default(),
//!     DeviceIdentity::from_hardware(0xa1b2c3, 0xef),
//!     MemoryLink::new(),
//!     MemorySession::new(),
//!     ManualClock::new(1_700_000_000),
//! );
//!
//! assert!(node.connect());
//! assert!(node.publish("pm25/a1b2c3ef/serial", b"hello", true));
//! ```

use crate::clock::Clock;
use crate::config::{BrokerConfig, LinkConfig, NodeConfig};
use crate::error::{Result, TransportError};
use crate::geo::GeoFix;
use crate::identity::{DeviceIdentity, Topics};
use crate::metrics::LinkStats;
use crate::payload::{AirReport, GpsReport, Presence};
use crate::recovery::AttemptGate;
use crate::transport::{
    InboundMessage, LastWill, LinkLayer, Qos, SessionParams, SessionTransport,
};
use log::{debug, info, warn};
use std::fmt;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityState {
    /// Nothing usable; the next tick may attempt a reconnect
    #[default]
    Offline,
    /// Link joined, session handshake in progress
    LinkUp,
    /// Session established; publishes go out
    SessionUp,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectivityState::Offline => "offline",
            ConnectivityState::LinkUp => "link-up",
            ConnectivityState::SessionUp => "session-up",
        };
        f.write_str(name)
    }
}

/// Callback for messages arriving on the subscribed passthrough topic
pub type MessageHandler = Box<dyn FnMut(&InboundMessage)>;

/// Owner of the link and session and of the node's identity on the network
pub struct ConnectivityManager<L, S, C> {
    link: L,
    session: S,
    clock: C,
    link_config: LinkConfig,
    broker: BrokerConfig,
    identity: DeviceIdentity,
    topics: Topics,
    client_id: String,
    gate: AttemptGate,
    state: ConnectivityState,
    stats: LinkStats,
    handler: Option<MessageHandler>,
}

impl<L: LinkLayer, S: SessionTransport, C: Clock> ConnectivityManager<L, S, C> {
    /// Create a manager in the `Offline` state
    ///
    /// Topics and the client id are derived from `identity` once here and
    /// never change afterwards.
    pub fn new(config: &NodeConfig, identity: DeviceIdentity, link: L, session: S, clock: C) -> Self {
        let topics = Topics::new(&config.topics.base, &identity);
        let client_id = identity.client_id(&config.broker.client_id_prefix);
        Self {
            link,
            session,
            clock,
            link_config: config.link.clone(),
            broker: config.broker.clone(),
            identity,
            topics,
            client_id,
            gate: AttemptGate::new(config.broker.reconnect_interval),
            state: ConnectivityState::Offline,
            stats: LinkStats::default(),
            handler: None,
        }
    }

    /// Join the link and open the session
    ///
    /// On success the retained startup announcement is published on the LWT
    /// topic and the passthrough topic is subscribed. Any failure leaves the
    /// manager `Offline`. Every call restarts the reconnect interval.
    pub fn connect(&mut self) -> bool {
        self.gate.mark(self.clock.uptime());
        self.stats.connect_attempts += 1;

        match self.establish() {
            Ok(()) => {
                self.state = ConnectivityState::SessionUp;
                info!(
                    "connected to {}:{} as {}",
                    self.broker.host, self.broker.port, self.client_id
                );
                true
            }
            Err(e) => {
                if self.session.is_connected() {
                    self.session.close();
                }
                self.state = ConnectivityState::Offline;
                self.stats.connect_failures += 1;
                warn!("connect attempt failed: {}", e);
                false
            }
        }
    }

    fn establish(&mut self) -> Result<()> {
        if !self.link.is_up() {
            debug!("joining network '{}'", self.link_config.ssid);
            self.link.join(&self.link_config)?;
        }
        if !self.link.is_up() {
            return Err(TransportError::LinkDown.into());
        }
        self.state = ConnectivityState::LinkUp;

        let params = self.session_params()?;
        self.session.open(&params)?;

        let startup = Presence::startup(&self.identity).to_json()?;
        self.session
            .publish(self.topics.lwt(), startup.as_bytes(), Qos::AtMostOnce, true)?;
        self.session.subscribe(self.topics.serial(), Qos::AtMostOnce)?;
        Ok(())
    }

    /// Handshake parameters, including the last will
    pub fn session_params(&self) -> Result<SessionParams> {
        let will = Presence::last_will(&self.identity).to_json()?;
        Ok(SessionParams {
            host: self.broker.host.clone(),
            port: self.broker.port,
            client_id: self.client_id.clone(),
            username: self.broker.username.clone(),
            password: self.broker.password.clone(),
            keep_alive: self.broker.keep_alive,
            write_timeout: self.broker.write_timeout,
            will: LastWill {
                topic: self.topics.lwt().to_string(),
                payload: will.into_bytes(),
                qos: Qos::AtLeastOnce,
                retain: true,
            },
        })
    }

    /// Connect if the reconnect interval has elapsed since the last attempt
    pub fn reconnect(&mut self) -> bool {
        let now = self.clock.uptime();
        if !self.gate.is_open(now) {
            debug!(
                "reconnect suppressed, next attempt in {:?}",
                self.gate.remaining(now)
            );
            return false;
        }
        info!("attempting reconnect");
        self.connect()
    }

    /// Whether link and session are both up right now
    ///
    /// Asks the transports rather than trusting the cached state, and
    /// updates the cached state accordingly.
    pub fn is_online(&mut self) -> bool {
        let online = self.link.is_up() && self.session.is_connected();
        if online {
            self.state = ConnectivityState::SessionUp;
        } else if self.state != ConnectivityState::Offline {
            warn!("connection lost");
            self.state = ConnectivityState::Offline;
        }
        online
    }

    /// Per-cycle housekeeping
    ///
    /// Offline: try a (rate limited) reconnect. Online: service the session
    /// and hand inbound messages to the message handler.
    pub fn tick(&mut self) {
        if !self.is_online() {
            self.reconnect();
            return;
        }

        match self.session.service() {
            Ok(messages) => {
                for message in messages {
                    self.stats.inbound += 1;
                    match self.handler.as_mut() {
                        Some(handler) => handler(&message),
                        None => info!(
                            "inbound on {}: {}",
                            message.topic,
                            message.payload_str()
                        ),
                    }
                }
            }
            Err(e) => {
                warn!("session service failed: {}", e);
                self.state = ConnectivityState::Offline;
            }
        }
    }

    /// Publish `payload` on `topic`
    ///
    /// Returns `false` without touching the transport when offline.
    pub fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> bool {
        if !self.is_online() {
            self.stats.dropped_offline += 1;
            debug!("offline, not publishing on {}", topic);
            return false;
        }

        match self
            .session
            .publish(topic, payload, Qos::AtMostOnce, retained)
        {
            Ok(()) => {
                self.stats.publishes += 1;
                true
            }
            Err(e) => {
                self.stats.publish_failures += 1;
                warn!("publish on {} failed: {}", topic, e);
                if !self.session.is_connected() {
                    self.state = ConnectivityState::Offline;
                }
                false
            }
        }
    }

    /// Publish a position report on the gps topic
    pub fn publish_gps(&mut self, fix: &GeoFix) -> bool {
        if !self.is_online() {
            self.stats.dropped_offline += 1;
            return false;
        }
        let report = GpsReport::new(fix, self.clock.unix_seconds(), &self.identity);
        match report.to_json() {
            Ok(json) => {
                let topic = self.topics.gps().to_string();
                let sent = self.publish(&topic, json.as_bytes(), true);
                if sent {
                    info!("gps: {}", json);
                }
                sent
            }
            Err(e) => {
                warn!("gps: {}", e);
                false
            }
        }
    }

    /// Publish a smoothed PM2.5 value tagged with `fix` on the air topic
    pub fn publish_air(&mut self, pm25: f64, fix: &GeoFix) -> bool {
        if !self.is_online() {
            self.stats.dropped_offline += 1;
            return false;
        }
        let report = AirReport::new(pm25, fix, self.clock.unix_seconds(), &self.identity);
        match report.to_json() {
            Ok(json) => {
                let topic = self.topics.air().to_string();
                let sent = self.publish(&topic, json.as_bytes(), true);
                if sent {
                    info!("air: {}", json);
                }
                sent
            }
            Err(e) => {
                warn!("air: {}", e);
                false
            }
        }
    }

    /// Forward a passthrough line on the serial topic
    ///
    /// Lines arriving while offline are dropped, not buffered.
    pub fn publish_serial(&mut self, line: &str) -> bool {
        if line.is_empty() {
            return false;
        }
        if !self.is_online() {
            self.stats.dropped_offline += 1;
            info!("serial: offline, dropped '{}'", line);
            return false;
        }
        let topic = self.topics.serial().to_string();
        self.publish(&topic, line.as_bytes(), true)
    }

    /// Close the session cleanly
    ///
    /// The broker discards the last will. The link stays up and the
    /// reconnect policy still applies on the next tick.
    pub fn disconnect(&mut self) {
        if self.session.is_connected() {
            self.session.close();
            info!("disconnected from {}:{}", self.broker.host, self.broker.port);
        }
        self.state = ConnectivityState::Offline;
    }

    /// Install the callback for inbound passthrough messages
    pub fn set_message_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&InboundMessage) + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    /// Cached state as of the last operation
    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    /// Device identity
    pub fn device_id(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Session client id
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Topics derived from the identity
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Link counters
    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Clock used for intervals and payload timestamps
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Link layer handle
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Mutable link layer handle
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Session handle
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Mutable session handle
    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::{MemoryLink, MemorySession};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    type Node = ConnectivityManager<MemoryLink, MemorySession, ManualClock>;

    fn node() -> (Node, ManualClock) {
        let clock = ManualClock::new(1_700_000_000);
        let mut config = NodeConfig::default();
        config.link.ssid = "field".to_string();
        config.broker.username = "node".to_string();
        config.broker.password = "secret".to_string();
        let node = ConnectivityManager::new(
            &config,
            DeviceIdentity::from_hardware(0xa1b2c3, 0xef),
            MemoryLink::new(),
            MemorySession::new(),
            clock.clone(),
        );
        (node, clock)
    }

    fn online() -> (Node, ManualClock) {
        let (mut node, clock) = node();
        assert!(node.connect());
        while node.session_mut().pop_published().is_some() {}
        (node, clock)
    }

    #[test]
    fn test_connect_announces_and_subscribes() {
        let (mut node, _) = node();
        assert_eq!(node.state(), ConnectivityState::Offline);

        assert!(node.connect());
        assert_eq!(node.state(), ConnectivityState::SessionUp);
        assert!(node.is_online());

        let startup = node.session_mut().pop_published().unwrap();
        assert_eq!(startup.topic, "pm25/a1b2c3ef/LWT");
        assert_eq!(
            startup.payload_str(),
            r#"{"_type":"startup","device_id":"a1b2c3ef"}"#
        );
        assert!(startup.retained);
        assert_eq!(node.session().subscriptions(), ["pm25/a1b2c3ef/serial"]);
    }

    #[test]
    fn test_connect_registers_last_will() {
        let (mut node, _) = node();
        node.connect();

        let params = node.session().last_params().unwrap();
        assert_eq!(params.client_id, "gps-node-a1b2c3ef");
        assert_eq!(params.username, "node");
        assert_eq!(params.password, "secret");
        assert_eq!(params.will.topic, "pm25/a1b2c3ef/LWT");
        assert_eq!(params.will.qos, Qos::AtLeastOnce);
        assert!(params.will.retain);
        assert_eq!(
            String::from_utf8_lossy(&params.will.payload),
            r#"{"_type":"lwt","tst":0,"device_id":"a1b2c3ef"}"#
        );
    }

    #[test]
    fn test_link_failure_leaves_offline() {
        let (mut node, _) = node();
        node.link_mut().set_available(false);

        assert!(!node.connect());
        assert_eq!(node.state(), ConnectivityState::Offline);
        assert_eq!(node.session().opens(), 0);
        assert_eq!(node.stats().connect_failures, 1);
    }

    #[test]
    fn test_refused_session_returns_to_offline_with_link_up() {
        let (mut node, _) = node();
        node.session_mut().set_accept(false);

        assert!(!node.connect());
        assert_eq!(node.state(), ConnectivityState::Offline);
        assert!(node.link().is_up());
        assert!(!node.is_online());
    }

    #[test]
    fn test_reconnect_rate_limited() {
        let (mut node, clock) = node();
        node.session_mut().set_accept(false);

        assert!(!node.reconnect());
        assert_eq!(node.session().opens(), 1);

        clock.advance(Duration::from_secs(30));
        assert!(!node.reconnect());
        assert_eq!(node.session().opens(), 1);

        node.session_mut().set_accept(true);
        clock.advance(Duration::from_secs(30));
        assert!(node.reconnect());
        assert_eq!(node.session().opens(), 2);
    }

    #[test]
    fn test_direct_connect_restarts_interval() {
        let (mut node, clock) = node();
        node.connect();
        node.session_mut().drop_connection();

        clock.advance(Duration::from_secs(59));
        assert!(!node.reconnect());
        clock.advance(Duration::from_secs(1));
        assert!(node.reconnect());
    }

    #[test]
    fn test_publish_offline_sends_nothing() {
        let (mut node, _) = node();
        assert!(!node.publish("pm25/a1b2c3ef/air", b"{}", true));
        assert_eq!(node.session().pending_published(), 0);
        assert_eq!(node.stats().dropped_offline, 1);
    }

    #[test]
    fn test_publish_online() {
        let (mut node, _) = online();
        assert!(node.publish("pm25/a1b2c3ef/air", b"{}", false));
        let msg = node.session_mut().pop_published().unwrap();
        assert_eq!(msg.topic, "pm25/a1b2c3ef/air");
        assert!(!msg.retained);
        assert_eq!(node.stats().publishes, 1);
    }

    #[test]
    fn test_publish_failure_reported() {
        let clock = ManualClock::new(0);
        let mut node = ConnectivityManager::new(
            &NodeConfig::default(),
            DeviceIdentity::from_hardware(1, 2),
            MemoryLink::new(),
            MemorySession::with_outbox_size(1),
            clock,
        );
        assert!(node.connect());
        // Startup announcement filled the outbox
        assert!(!node.publish("t", b"x", false));
        assert_eq!(node.stats().publish_failures, 1);
        assert_eq!(node.state(), ConnectivityState::SessionUp);
    }

    #[test]
    fn test_is_online_follows_transport() {
        let (mut node, _) = online();
        node.session_mut().drop_connection();
        assert_eq!(node.state(), ConnectivityState::SessionUp);
        assert!(!node.is_online());
        assert_eq!(node.state(), ConnectivityState::Offline);
        assert!(node.session().will_delivered().is_some());
    }

    #[test]
    fn test_link_loss_detected() {
        let (mut node, _) = online();
        node.link_mut().set_available(false);
        assert!(!node.is_online());
    }

    #[test]
    fn test_tick_reconnects_after_interval() {
        let (mut node, clock) = online();
        node.session_mut().drop_connection();

        node.tick();
        assert_eq!(node.session().opens(), 1);

        clock.advance(Duration::from_secs(60));
        node.tick();
        assert_eq!(node.session().opens(), 2);
        assert_eq!(node.state(), ConnectivityState::SessionUp);
    }

    #[test]
    fn test_tick_service_failure_goes_offline() {
        let (mut node, clock) = online();
        node.session_mut().set_fail_service(true);
        node.tick();
        assert_eq!(node.state(), ConnectivityState::Offline);

        node.session_mut().set_fail_service(false);
        clock.advance(Duration::from_secs(60));
        node.tick();
        assert_eq!(node.state(), ConnectivityState::SessionUp);
    }

    #[test]
    fn test_tick_dispatches_inbound() {
        let (mut node, _) = online();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        node.set_message_handler(move |m| sink.borrow_mut().push(m.payload_str().into_owned()));

        node.session_mut()
            .push_inbound("pm25/a1b2c3ef/serial", b"reboot");
        node.session_mut().push_inbound("other/topic", b"ignored");
        node.tick();

        assert_eq!(*seen.borrow(), vec!["reboot".to_string()]);
        assert_eq!(node.stats().inbound, 1);
    }

    #[test]
    fn test_publish_gps_payload() {
        let (mut node, clock) = online();
        clock.set_unix_seconds(1_700_000_123);
        let fix = GeoFix::new(48.137154, 11.576125, 3.0);

        assert!(node.publish_gps(&fix));
        let msg = node.session_mut().pop_published().unwrap();
        assert_eq!(msg.topic, "pm25/a1b2c3ef/gps");
        assert!(msg.retained);
        assert_eq!(
            msg.payload_str(),
            r#"{"lat":48.137154,"lon":11.576125,"speed":3.00,"tst":1700000123,"device_id":"a1b2c3ef"}"#
        );
    }

    #[test]
    fn test_publish_air_payload() {
        let (mut node, _) = online();
        let fix = GeoFix::new(1.0, 2.0, 0.0);
        assert!(node.publish_air(33.4, &fix));
        let msg = node.session_mut().pop_published().unwrap();
        assert_eq!(msg.topic, "pm25/a1b2c3ef/air");
        assert!(msg.payload_str().starts_with(r#"{"pm25":33.40,"lat":1.000000"#));
    }

    #[test]
    fn test_publish_air_rejects_nan() {
        let (mut node, _) = online();
        assert!(!node.publish_air(f64::NAN, &GeoFix::new(0.0, 0.0, 0.0)));
        assert_eq!(node.session().pending_published(), 0);
    }

    #[test]
    fn test_publish_serial() {
        let (mut node, _) = online();
        assert!(!node.publish_serial(""));
        assert!(node.publish_serial("temp=21.5"));
        let msg = node.session_mut().pop_published().unwrap();
        assert_eq!(msg.topic, "pm25/a1b2c3ef/serial");
        assert_eq!(msg.payload, b"temp=21.5");
    }

    #[test]
    fn test_publish_serial_offline_dropped() {
        let (mut node, _) = node();
        assert!(!node.publish_serial("temp=21.5"));
        assert_eq!(node.stats().dropped_offline, 1);
    }

    #[test]
    fn test_disconnect_is_clean() {
        let (mut node, _) = online();
        node.disconnect();
        assert_eq!(node.state(), ConnectivityState::Offline);
        assert!(node.link().is_up());
        assert!(node.session().will_delivered().is_none());
        assert!(!node.publish_serial("late"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectivityState::SessionUp.to_string(), "session-up");
    }
}
