// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Position fixes and the distance-based publish throttle
//!
//! The throttle is a pure policy: it sees fixes and the current uptime and
//! answers whether a position publish is due. Publishing happens elsewhere.

use crate::config::ThrottleConfig;
use log::debug;
use std::time::Duration;

/// Sphere radius used for great-circle distances, in meters
pub const EARTH_RADIUS_M: f64 = 6_372_795.0;

/// Kilometers per hour in one knot
pub const KMH_PER_KNOT: f64 = 1.852;

/// A position fix from the GPS receiver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFix {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lon: f64,
    /// Ground speed in km/h
    pub speed_kmh: f64,
    /// Time since the receiver last updated this position
    pub age: Duration,
    /// Whether the receiver reported a valid fix
    pub valid: bool,
}

impl GeoFix {
    /// A fresh, valid fix
    pub fn new(lat: f64, lon: f64, speed_kmh: f64) -> Self {
        Self {
            lat,
            lon,
            speed_kmh,
            age: Duration::ZERO,
            valid: true,
        }
    }

    /// Same fix with a different age
    pub fn with_age(mut self, age: Duration) -> Self {
        self.age = age;
        self
    }

    /// Whether the fix can be trusted given a maximum age
    pub fn is_usable(&self, max_age: Duration) -> bool {
        self.valid && self.age < max_age && self.lat.is_finite() && self.lon.is_finite()
    }

    /// Great-circle distance to `other` in meters
    pub fn distance_to(&self, other: &GeoFix) -> f64 {
        distance_m(self.lat, self.lon, other.lat, other.lon)
    }
}

/// Great-circle distance in meters between two points given in degrees
pub fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    (EARTH_RADIUS_M * c).max(0.0)
}

/// Accumulated-distance / heartbeat publish throttle
#[derive(Debug, Clone)]
pub struct GeoThrottle {
    config: ThrottleConfig,
    last_position: Option<GeoFix>,
    last_published: Option<GeoFix>,
    last_publish_at: Duration,
    accumulated_m: u64,
}

impl GeoThrottle {
    /// Create a throttle with no baseline
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            last_position: None,
            last_published: None,
            last_publish_at: Duration::ZERO,
            accumulated_m: 0,
        }
    }

    /// Feed a fix observed at uptime `now`
    ///
    /// Returns `true` when a publish is due. Stale or invalid fixes are
    /// ignored entirely. The first usable fix only sets the baseline.
    pub fn observe(&mut self, fix: &GeoFix, now: Duration) -> bool {
        if !fix.is_usable(self.config.max_fix_age) {
            debug!("gps: ignoring stale or invalid fix (age {:?})", fix.age);
            return false;
        }

        let Some(previous) = self.last_position else {
            self.last_position = Some(*fix);
            self.last_published = Some(*fix);
            self.last_publish_at = now;
            debug!("gps: baseline at ({:.6}, {:.6})", fix.lat, fix.lon);
            return false;
        };

        // Whole meters per step, as the accumulator is an integer
        let step = previous.distance_to(fix) as u64;
        self.accumulated_m = self.accumulated_m.saturating_add(step);
        self.last_position = Some(*fix);

        let moved = self.accumulated_m >= self.config.min_distance_m;
        let heartbeat = now.saturating_sub(self.last_publish_at) >= self.config.heartbeat_interval;
        if !(moved || heartbeat) {
            return false;
        }

        debug!(
            "gps: publish due ({} m accumulated, heartbeat={})",
            self.accumulated_m, heartbeat
        );
        self.accumulated_m = 0;
        self.last_published = Some(*fix);
        self.last_publish_at = now;
        true
    }

    /// Meters accumulated since the last publish decision
    pub fn accumulated_m(&self) -> u64 {
        self.accumulated_m
    }

    /// Fix recorded at the last publish decision (or the baseline)
    pub fn last_published(&self) -> Option<&GeoFix> {
        self.last_published.as_ref()
    }

    /// Most recent accepted fix
    pub fn last_position(&self) -> Option<&GeoFix> {
        self.last_position.as_ref()
    }

    /// Whether a baseline fix has been recorded
    pub fn has_baseline(&self) -> bool {
        self.last_position.is_some()
    }

    /// Throttle settings
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // One degree of latitude on the model sphere
    const M_PER_DEG: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

    fn config(min_distance_m: u64) -> ThrottleConfig {
        ThrottleConfig {
            min_distance_m,
            heartbeat_interval: Duration::from_secs(3600),
            max_fix_age: Duration::from_secs(2),
        }
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_distance_zero() {
        assert_eq!(distance_m(48.1, 11.5, 48.1, 11.5), 0.0);
    }

    #[test]
    fn test_distance_one_degree_latitude() {
        assert_relative_eq!(distance_m(0.0, 0.0, 1.0, 0.0), M_PER_DEG, max_relative = 1e-9);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = distance_m(51.5074, -0.1278, 48.8566, 2.3522);
        let b = distance_m(48.8566, 2.3522, 51.5074, -0.1278);
        assert_relative_eq!(a, b, max_relative = 1e-12);
        // London - Paris is about 344 km
        assert!((340_000.0..348_000.0).contains(&a));
    }

    #[test]
    fn test_distance_antipodal() {
        let d = distance_m(0.0, 0.0, 0.0, 180.0);
        assert_relative_eq!(d, EARTH_RADIUS_M * std::f64::consts::PI, max_relative = 1e-9);
    }

    #[test]
    fn test_first_fix_is_baseline_only() {
        let mut throttle = GeoThrottle::new(config(10));
        assert!(!throttle.observe(&GeoFix::new(0.0, 0.0, 0.0), secs(1)));
        assert!(throttle.has_baseline());
        assert_eq!(throttle.last_published().unwrap().lat, 0.0);
        assert_eq!(throttle.accumulated_m(), 0);
    }

    #[test]
    fn test_publish_after_min_distance() {
        let mut throttle = GeoThrottle::new(config(10));
        throttle.observe(&GeoFix::new(0.0, 0.0, 0.0), secs(1));

        let fifteen_m = 15.0 / M_PER_DEG;
        let fix = GeoFix::new(fifteen_m, 0.0, 3.0);
        assert!(throttle.observe(&fix, secs(2)));
        assert_eq!(throttle.accumulated_m(), 0);
        assert_eq!(throttle.last_published(), Some(&fix));
    }

    #[test]
    fn test_small_steps_accumulate() {
        let mut throttle = GeoThrottle::new(config(10));
        throttle.observe(&GeoFix::new(0.0, 0.0, 0.0), secs(0));

        let step = 4.5 / M_PER_DEG;
        assert!(!throttle.observe(&GeoFix::new(step, 0.0, 0.0), secs(1)));
        assert!(!throttle.observe(&GeoFix::new(2.0 * step, 0.0, 0.0), secs(2)));
        assert_eq!(throttle.accumulated_m(), 8);
        assert!(throttle.observe(&GeoFix::new(3.0 * step, 0.0, 0.0), secs(3)));
        assert_eq!(throttle.accumulated_m(), 0);
    }

    #[test]
    fn test_back_and_forth_not_double_counted() {
        let mut throttle = GeoThrottle::new(config(20));
        throttle.observe(&GeoFix::new(0.0, 0.0, 0.0), secs(0));

        // Two fixes six meters from the baseline add up to six, not twelve
        let six_m = 6.5 / M_PER_DEG;
        throttle.observe(&GeoFix::new(six_m, 0.0, 0.0), secs(1));
        throttle.observe(&GeoFix::new(six_m, 0.0, 0.0), secs(2));
        assert_eq!(throttle.accumulated_m(), 6);
    }

    #[test]
    fn test_identical_fixes_only_heartbeat() {
        let mut throttle = GeoThrottle::new(config(10));
        let fix = GeoFix::new(48.137154, 11.576124, 0.0);
        throttle.observe(&fix, secs(0));

        for t in 1..100 {
            assert!(!throttle.observe(&fix, secs(t)));
        }
        assert_eq!(throttle.accumulated_m(), 0);

        assert!(throttle.observe(&fix, secs(3600)));
        assert!(!throttle.observe(&fix, secs(3601)));
    }

    #[test]
    fn test_stale_fix_ignored() {
        let mut throttle = GeoThrottle::new(config(10));
        throttle.observe(&GeoFix::new(0.0, 0.0, 0.0), secs(0));

        let far = GeoFix::new(1.0, 0.0, 0.0).with_age(Duration::from_millis(2000));
        assert!(!throttle.observe(&far, secs(1)));
        assert_eq!(throttle.accumulated_m(), 0);
        assert_eq!(throttle.last_position().unwrap().lat, 0.0);
    }

    #[test]
    fn test_stale_first_fix_sets_no_baseline() {
        let mut throttle = GeoThrottle::new(config(10));
        let stale = GeoFix::new(1.0, 1.0, 0.0).with_age(secs(5));
        assert!(!throttle.observe(&stale, secs(0)));
        assert!(!throttle.has_baseline());
    }

    #[test]
    fn test_invalid_fix_ignored() {
        let mut throttle = GeoThrottle::new(config(10));
        let mut fix = GeoFix::new(1.0, 1.0, 0.0);
        fix.valid = false;
        assert!(!throttle.observe(&fix, secs(0)));
        assert!(!throttle.has_baseline());
    }

    #[test]
    fn test_heartbeat_measured_from_last_publish() {
        let mut throttle = GeoThrottle::new(config(10));
        throttle.observe(&GeoFix::new(0.0, 0.0, 0.0), secs(100));

        let far = GeoFix::new(20.0 / M_PER_DEG, 0.0, 0.0);
        assert!(throttle.observe(&far, secs(200)));

        assert!(!throttle.observe(&far, secs(200 + 3599)));
        assert!(throttle.observe(&far, secs(200 + 3600)));
    }
}
