// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Device identity and topic naming
//!
//! The identity is derived once from two hardware identifiers and never
//! changes while the process runs. Every topic and the session client id are
//! pure functions of it.

use std::fmt;

/// Topic suffixes under `<base>/<deviceId>/`
pub const TOPIC_GPS: &str = "gps";
pub const TOPIC_AIR: &str = "air";
pub const TOPIC_SERIAL: &str = "serial";
pub const TOPIC_LWT: &str = "LWT";

/// Stable identifier of this node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    id: String,
}

impl DeviceIdentity {
    /// Derive the identity from the chip id and the flash chip id
    ///
    /// The chip id is rendered as (at least) six lowercase hex digits, then the
    /// last two hex digits of the six-digit flash id are appended.
    pub fn from_hardware(chip_id: u32, flash_id: u32) -> Self {
        let flash = format!("{:06x}", flash_id);
        let tail = &flash[flash.len() - 2..];
        Self {
            id: format!("{:06x}{}", chip_id, tail),
        }
    }

    /// Identifier as text
    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// Identifier as raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.id.as_bytes()
    }

    /// Session client id: `<prefix><deviceId>`
    pub fn client_id(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.id)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// The four per-device topics, built once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    gps: String,
    air: String,
    serial: String,
    lwt: String,
}

impl Topics {
    /// Build all topics for `identity` under `base`
    pub fn new(base: &str, identity: &DeviceIdentity) -> Self {
        let prefix = format!("{}/{}", base, identity);
        Self {
            gps: format!("{}/{}", prefix, TOPIC_GPS),
            air: format!("{}/{}", prefix, TOPIC_AIR),
            serial: format!("{}/{}", prefix, TOPIC_SERIAL),
            lwt: format!("{}/{}", prefix, TOPIC_LWT),
        }
    }

    /// Position reports
    pub fn gps(&self) -> &str {
        &self.gps
    }

    /// Smoothed particulate readings
    pub fn air(&self) -> &str {
        &self.air
    }

    /// Raw serial passthrough, both directions
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Last-will and startup announcements
    pub fn lwt(&self) -> &str {
        &self.lwt
    }
}
