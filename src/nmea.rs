// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! GPS sentence decoding
//!
//! Byte-fed NMEA 0183 decoder for the position source. Only `RMC` and `GGA`
//! sentences carry what the node needs; everything else is skipped. The
//! sentence buffer is statically sized and, like the sensor frame buffer,
//! discards its content on overflow.

use crate::error::SentenceError;
use crate::geo::{GeoFix, KMH_PER_KNOT};
use log::{debug, trace};
use std::time::Duration;

/// Longest sentence accepted (NMEA allows 82 characters)
pub const SENTENCE_CAPACITY: usize = 96;

/// Position update parsed from one sentence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentenceFix {
    /// Latitude and longitude in degrees, `None` when the fields were empty
    pub position: Option<(f64, f64)>,
    /// Ground speed in km/h (RMC only)
    pub speed_kmh: Option<f64>,
    /// Receiver reports a valid fix
    pub valid: bool,
}

/// Streaming decoder keeping the latest known position
#[derive(Debug, Clone)]
pub struct NmeaDecoder {
    buf: [u8; SENTENCE_CAPACITY],
    len: usize,
    in_sentence: bool,
    lat: f64,
    lon: f64,
    speed_kmh: f64,
    valid: bool,
    updated_at: Option<Duration>,
    sentences: u64,
    failures: u64,
}

impl NmeaDecoder {
    /// Create a decoder with no position
    pub fn new() -> Self {
        Self {
            buf: [0; SENTENCE_CAPACITY],
            len: 0,
            in_sentence: false,
            lat: 0.0,
            lon: 0.0,
            speed_kmh: 0.0,
            valid: false,
            updated_at: None,
            sentences: 0,
            failures: 0,
        }
    }

    /// Feed one byte received at uptime `now`
    ///
    /// Returns `true` when the byte completed a sentence that updated the
    /// position.
    pub fn feed(&mut self, byte: u8, now: Duration) -> bool {
        match byte {
            b'$' => {
                self.len = 0;
                self.in_sentence = true;
                false
            }
            b'\r' => false,
            b'\n' => {
                if !self.in_sentence {
                    return false;
                }
                self.in_sentence = false;
                let updated = self.finish(now);
                self.len = 0;
                updated
            }
            _ if !self.in_sentence => false,
            _ => {
                if self.len >= SENTENCE_CAPACITY {
                    trace!("gps: sentence overflow, discarding");
                    self.len = 0;
                    self.in_sentence = false;
                    self.failures += 1;
                    return false;
                }
                self.buf[self.len] = byte;
                self.len += 1;
                false
            }
        }
    }

    /// Feed a run of bytes; returns `true` if any sentence updated the position
    pub fn feed_slice(&mut self, bytes: &[u8], now: Duration) -> bool {
        let mut updated = false;
        for &b in bytes {
            updated |= self.feed(b, now);
        }
        updated
    }

    fn finish(&mut self, now: Duration) -> bool {
        let parsed = std::str::from_utf8(&self.buf[..self.len])
            .map_err(|_| SentenceError::Malformed("not ASCII"))
            .and_then(parse_sentence);

        match parsed {
            Ok(fix) => {
                self.sentences += 1;
                self.valid = fix.valid;
                if let Some(speed) = fix.speed_kmh {
                    self.speed_kmh = speed;
                }
                match fix.position {
                    Some((lat, lon)) if fix.valid => {
                        self.lat = lat;
                        self.lon = lon;
                        self.updated_at = Some(now);
                        true
                    }
                    _ => false,
                }
            }
            Err(SentenceError::Unsupported(kind)) => {
                trace!("gps: skipping {} sentence", kind);
                false
            }
            Err(e) => {
                self.failures += 1;
                debug!("gps: {}", e);
                false
            }
        }
    }

    /// Latest position as seen from uptime `now`
    ///
    /// `None` until the receiver delivered a first valid position.
    pub fn fix(&self, now: Duration) -> Option<GeoFix> {
        let updated_at = self.updated_at?;
        Some(GeoFix {
            lat: self.lat,
            lon: self.lon,
            speed_kmh: self.speed_kmh,
            age: now.saturating_sub(updated_at),
            valid: self.valid,
        })
    }

    /// Sentences parsed successfully
    pub fn sentences(&self) -> u64 {
        self.sentences
    }

    /// Sentences rejected (checksum, format or overflow)
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

impl Default for NmeaDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a sentence body, i.e. everything between `$` and the line end
pub fn parse_sentence(body: &str) -> Result<SentenceFix, SentenceError> {
    let (data, given) = body
        .split_once('*')
        .ok_or(SentenceError::Malformed("missing checksum"))?;

    let expected = u8::from_str_radix(given.trim(), 16)
        .map_err(|_| SentenceError::Malformed("bad checksum digits"))?;
    let actual = data.bytes().fold(0u8, |acc, b| acc ^ b);
    if expected != actual {
        return Err(SentenceError::Checksum { expected, actual });
    }

    let fields: Vec<&str> = data.split(',').collect();
    let kind = fields[0];
    if kind.len() < 5 {
        return Err(SentenceError::Malformed("short address field"));
    }

    match kind.get(kind.len() - 3..) {
        Some("RMC") => parse_rmc(&fields),
        Some("GGA") => parse_gga(&fields),
        Some(other) => Err(SentenceError::Unsupported(other.to_string())),
        None => Err(SentenceError::Malformed("bad address field")),
    }
}

fn parse_rmc(fields: &[&str]) -> Result<SentenceFix, SentenceError> {
    if fields.len() < 8 {
        return Err(SentenceError::Malformed("RMC has too few fields"));
    }
    let valid = fields[2] == "A";
    let position = parse_position(fields[3], fields[4], fields[5], fields[6])?;
    let speed_kmh = if fields[7].is_empty() {
        None
    } else {
        let knots: f64 = fields[7]
            .parse()
            .map_err(|_| SentenceError::Malformed("bad speed"))?;
        Some(knots * KMH_PER_KNOT)
    };
    Ok(SentenceFix {
        position,
        speed_kmh,
        valid,
    })
}

fn parse_gga(fields: &[&str]) -> Result<SentenceFix, SentenceError> {
    if fields.len() < 7 {
        return Err(SentenceError::Malformed("GGA has too few fields"));
    }
    let quality: u8 = fields[6].parse().unwrap_or(0);
    let position = parse_position(fields[2], fields[3], fields[4], fields[5])?;
    Ok(SentenceFix {
        position,
        speed_kmh: None,
        valid: quality > 0,
    })
}

fn parse_position(
    lat: &str,
    ns: &str,
    lon: &str,
    ew: &str,
) -> Result<Option<(f64, f64)>, SentenceError> {
    if lat.is_empty() || lon.is_empty() {
        return Ok(None);
    }
    let mut lat = parse_coordinate(lat, 2)?;
    let mut lon = parse_coordinate(lon, 3)?;
    match ns {
        "N" => {}
        "S" => lat = -lat,
        _ => return Err(SentenceError::Malformed("bad N/S indicator")),
    }
    match ew {
        "E" => {}
        "W" => lon = -lon,
        _ => return Err(SentenceError::Malformed("bad E/W indicator")),
    }
    Ok(Some((lat, lon)))
}

/// `ddmm.mmmm` (or `dddmm.mmmm`) to decimal degrees
fn parse_coordinate(text: &str, degree_digits: usize) -> Result<f64, SentenceError> {
    if text.len() < degree_digits + 2 || !text.is_char_boundary(degree_digits) {
        return Err(SentenceError::Malformed("short coordinate"));
    }
    let (deg, min) = text.split_at(degree_digits);
    let deg: f64 = deg
        .parse()
        .map_err(|_| SentenceError::Malformed("bad coordinate degrees"))?;
    let min: f64 = min
        .parse()
        .map_err(|_| SentenceError::Malformed("bad coordinate minutes"))?;
    if min >= 60.0 {
        return Err(SentenceError::Malformed("minutes out of range"));
    }
    Ok(deg + min / 60.0)
}
