#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use png_harness::{round_trip_bytes, HarnessConfig};

const GEOMETRIES: &[&str] = &[
    "basn0g01", "basn0g02", "basn0g04", "basn0g08", "basn0g16", "basn2c08", "basn2c16",
    "basn3p01", "basn3p02", "basn3p04", "basn3p08", "basn4a08", "basn4a16", "basn6a08",
    "basn6a16", "s01n3p01", "s09n3p02", "s40i3p04",
];

#[derive(Arbitrary, Debug)]
struct Input {
    geometry: u8,
    seed: u64,
    pixels: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let name = GEOMETRIES[input.geometry as usize % GEOMETRIES.len()];
    let config = HarnessConfig {
        seed: Some(input.seed),
        ..HarnessConfig::default()
    };
    if let Err(err) = round_trip_bytes(name, &input.pixels, &config) {
        if err.is_contract_violation() {
            panic!("{name}: {err}");
        }
    }
});
