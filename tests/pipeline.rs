// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! End-to-end scenarios: bytes in, broker messages out, over the in-memory
//! transports.

use pmnode::*;
use std::time::Duration;

const M_PER_DEG_LAT: f64 = 111_226.0;

struct Rig {
    node: ConnectivityManager<MemoryLink, MemorySession, ManualClock>,
    clock: ManualClock,
    decoder: SensorFrameDecoder,
    throttle: GeoThrottle,
    gps: NmeaDecoder,
    lines: LineAssembler,
}

impl Rig {
    fn new() -> Self {
        let clock = ManualClock::new(1_700_000_000);
        let config = NodeConfig::default();
        config.validate().unwrap();
        let node = ConnectivityManager::new(
            &config,
            DeviceIdentity::from_hardware(0x1a2b3c, 0x00004d),
            MemoryLink::new(),
            MemorySession::new(),
            clock.clone(),
        );
        Self {
            node,
            clock,
            decoder: SensorFrameDecoder::new(),
            throttle: GeoThrottle::new(config.throttle.clone()),
            gps: NmeaDecoder::new(),
            lines: LineAssembler::new(),
        }
    }

    fn sentence(body: &str) -> String {
        let sum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("${}*{:02X}\r\n", body, sum)
    }

    fn drain(&mut self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        while let Some(msg) = self.node.session_mut().pop_published() {
            out.push((msg.topic.clone(), msg.payload_str().into_owned()));
        }
        out
    }
}

#[test]
fn test_boot_announces_presence() {
    let mut rig = Rig::new();
    rig.node.tick();

    assert_eq!(rig.node.state(), ConnectivityState::SessionUp);
    let sent = rig.drain();
    assert_eq!(
        sent,
        vec![(
            "pm25/1a2b3c4d/LWT".to_string(),
            r#"{"_type":"startup","device_id":"1a2b3c4d"}"#.to_string()
        )]
    );
}

#[test]
fn test_air_published_once_per_five_frames() {
    let mut rig = Rig::new();
    rig.node.tick();
    rig.drain();

    let fix = GeoFix::new(48.0, 11.0, 0.0);
    let mut published = 0;
    for value in 1..=10u16 {
        rig.decoder.feed_slice(&encode_frame(value * 10));
        if let Some(avg) = rig.decoder.try_decode().and_then(|r| r.average) {
            assert!(rig.node.publish_air(avg, &fix));
            published += 1;
        }
    }

    assert_eq!(published, 2);
    let sent = rig.drain();
    assert!(sent[0].1.starts_with(r#"{"pm25":30.00,"#));
    assert!(sent[1].1.starts_with(r#"{"pm25":80.00,"#));
}

#[test]
fn test_garbage_between_frames_is_recovered() {
    let mut rig = Rig::new();

    rig.decoder.feed_slice(&[0x00, 0x42, 0x16]);
    assert!(rig.decoder.try_decode().is_none());

    rig.decoder.feed_slice(&encode_frame(7));
    assert_eq!(rig.decoder.try_decode().map(|r| r.raw), Some(7));

    let stats = rig.decoder.stats();
    assert_eq!(stats.frames_decoded, 1);
    assert_eq!(stats.rejected(), 1);
}

#[test]
fn test_throttle_scenario_ten_meters() {
    let mut throttle = GeoThrottle::new(ThrottleConfig::with_min_distance(10));
    let origin = GeoFix::new(0.0, 0.0, 0.0);
    let moved = GeoFix::new(15.0 / M_PER_DEG_LAT, 0.0, 0.0);

    assert!(!throttle.observe(&origin, Duration::from_secs(1)));
    assert!(throttle.observe(&moved, Duration::from_secs(2)));
    assert_eq!(throttle.accumulated_m(), 0);
}

#[test]
fn test_gps_stream_drives_throttle_and_publish() {
    let mut rig = Rig::new();
    rig.node.tick();
    rig.drain();

    // 4807.038 -> 4807.048 minutes is about 18.5 m north
    let first = Rig::sentence("GPRMC,120000,A,4807.038,N,01131.000,E,001.0,0.0,010124,,");
    let second = Rig::sentence("GPRMC,120001,A,4807.048,N,01131.000,E,001.0,0.0,010124,,");

    let mut published = Vec::new();
    for line in [first, second] {
        let now = rig.clock.uptime();
        if rig.gps.feed_slice(line.as_bytes(), now) {
            let fix = rig.gps.fix(now).unwrap();
            if rig.throttle.observe(&fix, now) {
                assert!(rig.node.publish_gps(&fix));
                published.push(fix);
            }
        }
        rig.clock.advance(Duration::from_secs(1));
    }

    assert_eq!(published.len(), 1);
    let sent = rig.drain();
    assert_eq!(sent[0].0, "pm25/1a2b3c4d/gps");
    assert!(sent[0].1.contains(r#""lat":48.117467"#));
    assert!(sent[0].1.contains(r#""speed":1.85"#));
    assert!(sent[0].1.contains(r#""tst":1700000001"#));
}

#[test]
fn test_passthrough_lines_forwarded() {
    let mut rig = Rig::new();
    rig.node.tick();
    rig.drain();

    for line in rig.lines.push_slice(b"T=21.5\r\nRH=40\r\npartial") {
        assert!(rig.node.publish_serial(&line));
    }

    let sent = rig.drain();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], ("pm25/1a2b3c4d/serial".to_string(), "T=21.5".to_string()));
    assert_eq!(sent[1].1, "RH=40");
    assert_eq!(rig.lines.pending(), 7);
}

#[test]
fn test_outage_and_recovery() {
    let mut rig = Rig::new();
    rig.node.tick();
    rig.drain();

    rig.node.link_mut().set_available(false);
    rig.node.session_mut().drop_connection();
    assert!(!rig.node.publish_serial("lost"));
    assert!(rig.node.session().will_delivered().is_some());

    // Network comes back quickly, but the reconnect interval still applies
    rig.node.link_mut().set_available(true);
    for _ in 0..10 {
        rig.clock.advance(Duration::from_secs(5));
        rig.node.tick();
    }
    assert_eq!(rig.node.state(), ConnectivityState::Offline);

    rig.clock.advance(Duration::from_secs(10));
    rig.node.tick();
    assert_eq!(rig.node.state(), ConnectivityState::SessionUp);

    let sent = rig.drain();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "pm25/1a2b3c4d/LWT");

    let stats = rig.node.stats();
    assert_eq!(stats.connects(), 2);
    assert_eq!(stats.dropped_offline, 1);
}

#[test]
fn test_reconnect_attempts_bounded_during_long_outage() {
    let mut rig = Rig::new();
    rig.node.link_mut().set_available(false);

    // One hour of half-second ticks
    for _ in 0..7200 {
        rig.node.tick();
        rig.clock.advance(Duration::from_millis(500));
    }

    let stats = rig.node.stats();
    assert_eq!(stats.connect_attempts, 60);
    assert_eq!(stats.connect_failures, 60);
    assert_eq!(rig.node.link().joins(), 60);
}
