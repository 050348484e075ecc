// pmnode Agent - Host-side control loop for pmnode
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Link layer on a host with an OS network stack
//!
//! There is no radio to join: the operating system owns the network. The
//! link counts as up while the OS has a route to the broker.

use pmnode::config::LinkConfig;
use pmnode::transport::{LinkLayer, TransportResult};
use pmnode::TransportError;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

/// Link to the broker host through the OS network stack
#[derive(Debug, Clone)]
pub struct HostLink {
    host: String,
    port: u16,
    target: Option<SocketAddr>,
}

impl HostLink {
    /// Link towards `host:port`; nothing is resolved until `join`
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            target: None,
        }
    }

    /// Address resolved by the last successful join
    pub fn target(&self) -> Option<SocketAddr> {
        self.target
    }
}

/// Ask the OS for a route to `addr`; no packet is sent
fn has_route(addr: SocketAddr) -> bool {
    let local: SocketAddr = if addr.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    UdpSocket::bind(local)
        .and_then(|socket| socket.connect(addr))
        .is_ok()
}

impl LinkLayer for HostLink {
    fn join(&mut self, config: &LinkConfig) -> TransportResult<()> {
        if !config.ssid.is_empty() {
            tracing::debug!("Network '{}' is managed by the host, not joining", config.ssid);
        }

        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| TransportError::LinkJoin(format!("resolve {}: {}", self.host, e)))?
            .next()
            .ok_or_else(|| TransportError::LinkJoin(format!("no address for {}", self.host)))?;

        if !has_route(addr) {
            self.target = None;
            return Err(TransportError::LinkDown);
        }
        self.target = Some(addr);
        Ok(())
    }

    fn is_up(&self) -> bool {
        self.target.map_or(false, has_route)
    }

    fn leave(&mut self) {
        self.target = None;
    }
}
