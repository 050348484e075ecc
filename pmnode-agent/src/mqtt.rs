// pmnode Agent - Host-side control loop for pmnode
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! MQTT session over `rumqttc`
//!
//! Uses the synchronous client: the connection only makes progress while it
//! is polled, which the connectivity manager does once per cycle through
//! `service()`. Keep-alive pings and peer closes are only handled while the
//! event loop runs, so `service()` drives it with a short blocking wait.

use pmnode::transport::{InboundMessage, Qos, SessionParams, SessionTransport, TransportResult};
use pmnode::TransportError;
use rumqttc::{
    Client, ConnectReturnCode, Connection, Event, LastWill, MqttOptions, Packet, QoS,
    RecvTimeoutError,
};
use std::time::{Duration, Instant};

/// Requests buffered between the client handle and the connection
const REQUEST_CAPACITY: usize = 32;

/// Events handled per `service()` call
const MAX_EVENTS_PER_SERVICE: usize = 64;

/// Longest wait for the next event before `service()` returns
const SERVICE_POLL: Duration = Duration::from_millis(20);

fn to_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Build client options from session parameters
pub fn mqtt_options(params: &SessionParams) -> MqttOptions {
    let mut options = MqttOptions::new(&params.client_id, &params.host, params.port);
    options.set_keep_alive(params.keep_alive);
    options.set_clean_session(true);
    if !params.username.is_empty() {
        options.set_credentials(&params.username, &params.password);
    }
    options.set_last_will(LastWill::new(
        &params.will.topic,
        params.will.payload.clone(),
        to_qos(params.will.qos),
        params.will.retain,
    ));
    options
}

/// Session backed by a `rumqttc` client and connection
#[derive(Default)]
pub struct MqttSession {
    client: Option<Client>,
    connection: Option<Connection>,
    connected: bool,
    write_timeout: Duration,
}

impl MqttSession {
    /// Create a closed session
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_down(&mut self) {
        self.connected = false;
        self.client = None;
        self.connection = None;
    }

    fn client(&mut self) -> TransportResult<&mut Client> {
        match self.client.as_mut() {
            Some(client) if self.connected => Ok(client),
            _ => Err(TransportError::NotConnected),
        }
    }
}

impl SessionTransport for MqttSession {
    fn open(&mut self, params: &SessionParams) -> TransportResult<()> {
        self.mark_down();
        self.write_timeout = params.write_timeout;

        let (client, mut connection) = Client::new(mqtt_options(params), REQUEST_CAPACITY);
        let deadline = Instant::now() + params.write_timeout;

        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(TransportError::SessionRefused(format!(
                    "no CONNACK within {:?}",
                    params.write_timeout
                )));
            }
            match connection.recv_timeout(left) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(TransportError::SessionRefused(format!("{:?}", ack.code)));
                    }
                    break;
                }
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return Err(TransportError::SessionRefused(e.to_string())),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::SessionRefused("event loop closed".to_string()))
                }
            }
        }

        tracing::debug!("MQTT session open as {}", params.client_id);
        self.client = Some(client);
        self.connection = Some(connection);
        self.connected = true;
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
        let timeout_ms = self.write_timeout.as_millis() as u64;
        self.client()?
            .try_publish(topic, to_qos(qos), retained, payload.to_vec())
            .map_err(|_| TransportError::WriteTimeout { timeout_ms })
    }

    fn subscribe(&mut self, topic: &str, qos: Qos) -> TransportResult<()> {
        self.client()?
            .try_subscribe(topic, to_qos(qos))
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn service(&mut self) -> TransportResult<Vec<InboundMessage>> {
        let connection = match self.connection.as_mut() {
            Some(connection) if self.connected => connection,
            _ => return Err(TransportError::NotConnected),
        };

        let mut inbound = Vec::new();
        for _ in 0..MAX_EVENTS_PER_SERVICE {
            match connection.recv_timeout(SERVICE_POLL) {
                Ok(Ok(Event::Incoming(Packet::Publish(p)))) => inbound.push(InboundMessage {
                    topic: p.topic.clone(),
                    payload: p.payload.to_vec(),
                }),
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    self.mark_down();
                    return Err(TransportError::Io("broker sent DISCONNECT".to_string()));
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    let err = TransportError::Io(e.to_string());
                    self.mark_down();
                    return Err(err);
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    self.mark_down();
                    return Err(TransportError::Io("event loop closed".to_string()));
                }
            }
        }
        Ok(inbound)
    }

    fn close(&mut self) {
        if let (Some(client), Some(connection)) = (self.client.as_mut(), self.connection.as_mut()) {
            if client.try_disconnect().is_ok() {
                // Drive the connection until DISCONNECT has gone out
                let deadline = Instant::now() + self.write_timeout;
                while Instant::now() < deadline {
                    match connection.recv_timeout(Duration::from_millis(100)) {
                        Ok(Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect))) => break,
                        Ok(Ok(_)) | Err(RecvTimeoutError::Timeout) => {}
                        Ok(Err(_)) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            }
        }
        self.mark_down();
    }
}
