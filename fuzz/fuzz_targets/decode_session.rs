#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use png_harness::{run_bytes, HarnessConfig, HarnessMode};

// Feature codes covering every synthesizer family.
const NAMES: &[&str] = &[
    "basn0g01.png", "basn2c16.png", "basn3p04.png", "basi4a08.png", "basn6a16.png",
    "bgbn4a08.png", "tbrn2c08.png", "g04n2c08.png", "f02n2c08.png", "s09n3p02.png",
    "ps1n0g08.png", "ct1n0g04.png", "ctzn0g04.png", "ch1n3p04.png", "cs5n2c08.png",
    "pp0n2c16.png", "cm7n0g04.png", "oi4n2c16.png", "z09n2c08.png", "xcrn0g04.png",
];

#[derive(Arbitrary, Debug)]
struct Input {
    name: u8,
    seed: Option<u8>,
    data: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let name = NAMES[input.name as usize % NAMES.len()];
    let config = HarnessConfig {
        mode: HarnessMode::Read,
        seed: input.seed.map(u64::from),
        ..HarnessConfig::default()
    };
    if let Err(err) = run_bytes(name, &input.data, &config) {
        if err.is_contract_violation() {
            panic!("{name}: {err}");
        }
    }
});
