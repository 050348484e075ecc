// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Published payloads
//!
//! JSON documents for every topic the node publishes. Field order is fixed by
//! the struct layout and numbers are written with a fixed number of decimals
//! (6 for coordinates, 2 for speed and PM2.5) so consumers can compare the
//! text directly.

use crate::error::PayloadError;
use crate::geo::GeoFix;
use crate::identity::DeviceIdentity;
use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;

fn fixed<S: Serializer>(value: f64, decimals: usize, serializer: S) -> Result<S::Ok, S::Error> {
    if !value.is_finite() {
        return Err(S::Error::custom("non-finite number"));
    }
    let raw = RawValue::from_string(format!("{:.*}", decimals, value)).map_err(S::Error::custom)?;
    raw.serialize(serializer)
}

fn fixed6<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    fixed(*value, 6, serializer)
}

fn fixed2<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    fixed(*value, 2, serializer)
}

fn ensure_finite(field: &'static str, value: f64) -> Result<(), PayloadError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PayloadError::NonFinite { field })
    }
}

/// Position report, published retained on `<base>/<id>/gps`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsReport {
    #[serde(serialize_with = "fixed6")]
    pub lat: f64,
    #[serde(serialize_with = "fixed6")]
    pub lon: f64,
    #[serde(serialize_with = "fixed2")]
    pub speed: f64,
    pub tst: i64,
    pub device_id: String,
}

impl GpsReport {
    /// Report for `fix` at wall-clock time `tst`
    pub fn new(fix: &GeoFix, tst: i64, device: &DeviceIdentity) -> Self {
        Self {
            lat: fix.lat,
            lon: fix.lon,
            speed: fix.speed_kmh,
            tst,
            device_id: device.to_string(),
        }
    }

    /// Serialize to JSON text
    pub fn to_json(&self) -> Result<String, PayloadError> {
        ensure_finite("lat", self.lat)?;
        ensure_finite("lon", self.lon)?;
        ensure_finite("speed", self.speed)?;
        Ok(serde_json::to_string(self)?)
    }
}

/// Smoothed particulate reading tagged with the latest position,
/// published retained on `<base>/<id>/air`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirReport {
    #[serde(serialize_with = "fixed2")]
    pub pm25: f64,
    #[serde(serialize_with = "fixed6")]
    pub lat: f64,
    #[serde(serialize_with = "fixed6")]
    pub lon: f64,
    #[serde(serialize_with = "fixed2")]
    pub speed: f64,
    pub tst: i64,
    pub device_id: String,
}

impl AirReport {
    /// Report for `pm25` measured at `fix`
    pub fn new(pm25: f64, fix: &GeoFix, tst: i64, device: &DeviceIdentity) -> Self {
        Self {
            pm25,
            lat: fix.lat,
            lon: fix.lon,
            speed: fix.speed_kmh,
            tst,
            device_id: device.to_string(),
        }
    }

    /// Serialize to JSON text
    pub fn to_json(&self) -> Result<String, PayloadError> {
        ensure_finite("pm25", self.pm25)?;
        ensure_finite("lat", self.lat)?;
        ensure_finite("lon", self.lon)?;
        ensure_finite("speed", self.speed)?;
        Ok(serde_json::to_string(self)?)
    }
}

/// Presence messages on `<base>/<id>/LWT`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "lowercase")]
pub enum Presence {
    /// Registered as last will, delivered by the broker after an unclean drop
    Lwt { tst: i64, device_id: String },
    /// Published after every successful (re)connect
    Startup { device_id: String },
}

impl Presence {
    /// Last-will document; `tst` is always 0 because the broker sends it later
    pub fn last_will(device: &DeviceIdentity) -> Self {
        Presence::Lwt {
            tst: 0,
            device_id: device.to_string(),
        }
    }

    /// Startup announcement
    pub fn startup(device: &DeviceIdentity) -> Self {
        Presence::Startup {
            device_id: device.to_string(),
        }
    }

    /// Serialize to JSON text
    pub fn to_json(&self) -> Result<String, PayloadError> {
        Ok(serde_json::to_string(self)?)
    }
}
