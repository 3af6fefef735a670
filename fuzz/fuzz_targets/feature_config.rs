#![no_main]

use libfuzzer_sys::fuzz_target;
use png_harness::engine::{FeatureCode, HarnessRng, ImageConfig, FEATURE_CODE_LEN};

fuzz_target!(|data: &[u8]| {
    let Some((&seed, name)) = data.split_first() else {
        return;
    };
    let code = FeatureCode::from_bytes(name);
    assert!(code.len() <= FEATURE_CODE_LEN);

    let first = ImageConfig::from_code(&code, &mut HarnessRng::from_seed(u64::from(seed)));
    let again = ImageConfig::from_code(&code, &mut HarnessRng::from_seed(u64::from(seed)));
    assert_eq!(first, again, "synthesis is not deterministic for {code}");

    let _ = first.decode_flags();
    let _ = first.filter_choice();
    let _ = first.compression_level();
});
