#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use png_harness::{run_bytes, HarnessConfig, HarnessMode};

#[derive(Arbitrary, Debug)]
struct Input {
    /// Raw feature code; only the first eight bytes are read.
    code: [u8; 8],
    seed: u64,
    init_probability: u8,
    pixels: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let name = format!("{}.png", String::from_utf8_lossy(&input.code));
    let config = HarnessConfig {
        mode: HarnessMode::Write,
        seed: Some(input.seed),
        init_probability: f64::from(input.init_probability) / 255.0,
        ..HarnessConfig::default()
    };
    if let Err(err) = run_bytes(&name, &input.pixels, &config) {
        if err.is_contract_violation() {
            panic!("{name}: {err}");
        }
    }
});
