// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Transport abstraction module
//!
//! The node talks to the network through two layers: a link layer (the
//! wireless network) and a session layer (the pub/sub broker connection built
//! on top of it). Both are traits so the connectivity manager can run over a
//! real radio, a host network stack, or the in-memory implementations below.

use crate::config::LinkConfig;
use crate::error::TransportError;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Delivery guarantee requested from the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qos {
    /// QoS 0
    #[default]
    AtMostOnce,
    /// QoS 1
    AtLeastOnce,
    /// QoS 2
    ExactlyOnce,
}

impl Qos {
    /// Numeric QoS level
    pub fn level(&self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QoS{}", self.level())
    }
}

/// Message the broker publishes on our behalf after an unclean disconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
}

/// Everything needed to establish a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
    pub write_timeout: Duration,
    pub will: LastWill,
}

/// Message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Payload as text, lossily converted
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Link layer: joins the physical/wireless network
pub trait LinkLayer {
    /// Join the network, blocking at most `config.join_timeout`
    fn join(&mut self, config: &LinkConfig) -> TransportResult<()>;

    /// Live link status
    fn is_up(&self) -> bool;

    /// Leave the network
    fn leave(&mut self);
}

/// Session layer: pub/sub connection to the broker
pub trait SessionTransport {
    /// Perform the session handshake, registering the last will
    fn open(&mut self, params: &SessionParams) -> TransportResult<()>;

    /// Live session status
    fn is_connected(&self) -> bool;

    /// Queue a message for transmission
    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retained: bool,
    ) -> TransportResult<()>;

    /// Subscribe to a topic
    fn subscribe(&mut self, topic: &str, qos: Qos) -> TransportResult<()>;

    /// Move pending traffic in both directions and keep the session alive
    ///
    /// Returns messages received on subscribed topics. Must not block beyond
    /// the write timeout.
    fn service(&mut self) -> TransportResult<Vec<InboundMessage>>;

    /// Close the session cleanly (the broker discards the last will)
    fn close(&mut self);
}

/// In-memory link for tests and dry runs
#[derive(Debug, Clone)]
pub struct MemoryLink {
    up: bool,
    available: bool,
    joins: u32,
}

impl MemoryLink {
    /// Create a link whose network is reachable
    pub fn new() -> Self {
        Self {
            up: false,
            available: true,
            joins: 0,
        }
    }

    /// Make joins succeed or fail; making the network unavailable drops the link
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
        if !available {
            self.up = false;
        }
    }

    /// Number of join calls
    pub fn joins(&self) -> u32 {
        self.joins
    }
}

impl Default for MemoryLink {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkLayer for MemoryLink {
    fn join(&mut self, config: &LinkConfig) -> TransportResult<()> {
        self.joins += 1;
        if self.up {
            return Ok(());
        }
        if !self.available {
            return Err(TransportError::LinkJoin(format!(
                "network '{}' not reachable",
                config.ssid
            )));
        }
        self.up = true;
        Ok(())
    }

    fn is_up(&self) -> bool {
        self.up
    }

    fn leave(&mut self) {
        self.up = false;
    }
}

/// A message captured by [`MemorySession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retained: bool,
}

impl PublishedMessage {
    /// Payload as text, lossily converted
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// In-memory broker session for tests and dry runs
#[derive(Debug)]
pub struct MemorySession {
    connected: bool,
    accept: bool,
    opens: u32,
    last_params: Option<SessionParams>,
    subscriptions: Vec<String>,
    outbox: VecDeque<PublishedMessage>,
    inbox: VecDeque<InboundMessage>,
    max_outbox: usize,
    fail_service: bool,
    will_delivered: Option<LastWill>,
}

impl MemorySession {
    /// Create a session that accepts handshakes
    pub fn new() -> Self {
        Self::with_outbox_size(1000)
    }

    /// Create a session whose outbox holds at most `max_outbox` messages
    pub fn with_outbox_size(max_outbox: usize) -> Self {
        Self {
            connected: false,
            accept: true,
            opens: 0,
            last_params: None,
            subscriptions: Vec::new(),
            outbox: VecDeque::new(),
            inbox: VecDeque::new(),
            max_outbox,
            fail_service: false,
            will_delivered: None,
        }
    }

    /// Make handshakes succeed or be refused
    pub fn set_accept(&mut self, accept: bool) {
        self.accept = accept;
    }

    /// Simulate the broker dropping us; the last will is delivered
    pub fn drop_connection(&mut self) {
        if self.connected {
            self.will_delivered = self.last_params.as_ref().map(|p| p.will.clone());
        }
        self.connected = false;
    }

    /// Make the next `service` calls fail as if the socket died
    pub fn set_fail_service(&mut self, fail: bool) {
        self.fail_service = fail;
    }

    /// Queue a message the broker will deliver on the next `service`
    pub fn push_inbound(&mut self, topic: &str, payload: &[u8]) {
        self.inbox.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }

    /// Take the oldest published message
    pub fn pop_published(&mut self) -> Option<PublishedMessage> {
        self.outbox.pop_front()
    }

    /// All published messages, oldest first
    pub fn published(&self) -> impl Iterator<Item = &PublishedMessage> {
        self.outbox.iter()
    }

    /// Number of published messages not yet popped
    pub fn pending_published(&self) -> usize {
        self.outbox.len()
    }

    /// Number of handshakes attempted
    pub fn opens(&self) -> u32 {
        self.opens
    }

    /// Parameters of the most recent handshake
    pub fn last_params(&self) -> Option<&SessionParams> {
        self.last_params.as_ref()
    }

    /// Current subscriptions
    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Last will the broker published after an unclean drop, if any
    pub fn will_delivered(&self) -> Option<&LastWill> {
        self.will_delivered.as_ref()
    }
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTransport for MemorySession {
    fn open(&mut self, params: &SessionParams) -> TransportResult<()> {
        self.opens += 1;
        self.last_params = Some(params.clone());
        if !self.accept {
            self.connected = false;
            return Err(TransportError::SessionRefused(
                "connection refused".to_string(),
            ));
        }
        self.connected = true;
        self.subscriptions.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retained: bool,
    ) -> TransportResult<()> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.outbox.len() >= self.max_outbox {
            return Err(TransportError::WriteTimeout { timeout_ms: 0 });
        }
        self.outbox.push_back(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retained,
        });
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, _qos: Qos) -> TransportResult<()> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if !self.subscriptions.iter().any(|t| t == topic) {
            self.subscriptions.push(topic.to_string());
        }
        Ok(())
    }

    fn service(&mut self) -> TransportResult<Vec<InboundMessage>> {
        if self.fail_service {
            self.drop_connection();
            return Err(TransportError::Io("connection reset".to_string()));
        }
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let subscriptions = &self.subscriptions;
        let (delivered, _): (Vec<_>, Vec<_>) = self
            .inbox
            .drain(..)
            .partition(|m| subscriptions.iter().any(|t| t == &m.topic));
        Ok(delivered)
    }

    fn close(&mut self) {
        self.connected = false;
        self.subscriptions.clear();
    }
}
