// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Benchmarks for the sensor, GPS and throttle hot paths

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pmnode::{distance_m, encode_frame, GeoFix, GeoThrottle, NmeaDecoder, SensorFrameDecoder, ThrottleConfig};
use std::time::Duration;

fn generate_frames(count: usize) -> Vec<u8> {
    (0..count)
        .flat_map(|i| encode_frame((i % 500) as u16))
        .collect()
}

fn bench_frame_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decoding");

    let stream = generate_frames(1000);
    group.throughput(Throughput::Elements(1000));

    group.bench_function("decode_1000_frames", |b| {
        b.iter(|| {
            let mut decoder = SensorFrameDecoder::new();
            for frame in stream.chunks(20) {
                decoder.feed_slice(frame);
                black_box(decoder.try_decode());
            }
        })
    });

    group.finish();
}

fn bench_nmea(c: &mut Criterion) {
    let mut group = c.benchmark_group("nmea");

    let sentence = b"$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";
    group.throughput(Throughput::Bytes(sentence.len() as u64));

    group.bench_function("rmc_sentence", |b| {
        let mut decoder = NmeaDecoder::new();
        b.iter(|| black_box(decoder.feed_slice(sentence, Duration::ZERO)))
    });

    group.finish();
}

fn bench_throttle(c: &mut Criterion) {
    let mut group = c.benchmark_group("geo");

    group.bench_function("distance_m", |b| {
        b.iter(|| distance_m(black_box(48.1173), black_box(11.5167), black_box(48.1180), black_box(11.5170)))
    });

    let fixes: Vec<GeoFix> = (0..1000)
        .map(|i| GeoFix::new(48.0 + i as f64 * 1e-5, 11.0, 5.0))
        .collect();
    group.throughput(Throughput::Elements(fixes.len() as u64));

    group.bench_function("observe_1000_fixes", |b| {
        b.iter(|| {
            let mut throttle = GeoThrottle::new(ThrottleConfig::default());
            for (i, fix) in fixes.iter().enumerate() {
                black_box(throttle.observe(fix, Duration::from_secs(i as u64)));
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_frame_decoding, bench_nmea, bench_throttle);
criterion_main!(benches);
