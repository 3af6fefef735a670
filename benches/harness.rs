use criterion::{criterion_group, criterion_main, Criterion};
use image::{DynamicImage, ImageBuffer, Rgb};
use png_harness::engine::{
    AncillaryRecordSet, FeatureCode, HarnessRng, ImageConfig, NamingScheme, SynthesisSettings,
};
use png_harness::{round_trip_bytes, run_bytes, HarnessConfig, HarnessMode};
use std::hint::black_box;
use std::io::Cursor;

const NAMES: &[&str] = &[
    "basn2c08.png", "bgbn4a08.png", "tbrn2c08.png", "g04n2c08.png", "ps1n0g08.png",
    "ct1n0g04.png", "ch2n3p08.png", "cm7n0g04.png", "z09n2c08.png",
];

fn fixture(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 64]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn bench_synthesis(c: &mut Criterion) {
    let codes: Vec<FeatureCode> = NAMES
        .iter()
        .map(|name| FeatureCode::derive(name, NamingScheme::Plain))
        .collect();
    let settings = SynthesisSettings::default();

    c.bench_function("config synthesis", |b| {
        let mut rng = HarnessRng::from_seed(1);
        b.iter(|| {
            for code in &codes {
                let config = ImageConfig::from_code(black_box(code), &mut rng);
                black_box(AncillaryRecordSet::synthesize(&config, &mut rng, &settings));
            }
        })
    });
}

fn bench_sessions(c: &mut Criterion) {
    let png = fixture(64, 64);
    let pixels = vec![0x42u8; 32 * 32 * 8];
    let read = HarnessConfig {
        mode: HarnessMode::Read,
        ..HarnessConfig::default()
    };
    let write = HarnessConfig {
        mode: HarnessMode::Write,
        ..HarnessConfig::default()
    };

    let mut group = c.benchmark_group("sessions");
    group.bench_function("decode 64x64 rgb", |b| {
        b.iter(|| run_bytes("basn2c08.png", black_box(&png), &read))
    });
    group.bench_function("encode 32x32 rgb", |b| {
        b.iter(|| run_bytes("basn2c08.png", black_box(&pixels), &write))
    });
    group.bench_function("round trip 32x32 rgba16", |b| {
        b.iter(|| round_trip_bytes("basn6a16.png", black_box(&pixels), &HarnessConfig::default()))
    });
    group.finish();
}

criterion_group!(benches, bench_synthesis, bench_sessions);
criterion_main!(benches);
