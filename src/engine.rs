// src/engine.rs
//
// The core of png-harness. One harness run:
// 1. Names the input (feature code) and synthesizes an ImageConfig from it
// 2. Drives one decode or encode session through every codec entry point
// 3. Checks the codec's output contracts and tears the session down
//
// This file is a facade over the modules in engine/

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

mod ancillary;
mod api;
mod common;
mod config;
mod decoder;
mod encoder;
mod firewall;
mod io;
mod namer;
mod options;

pub use ancillary::{AncillaryRecordSet, SynthesisSettings};
pub use api::{
    derive_seed, exit_code, run_bytes, run_file, HarnessConfig, HarnessMode, SessionKind,
    SessionOutcome, SessionReport,
};
pub use common::{run_with_panic_policy, EngineResult, HarnessRng};
pub use config::{Background, FeatureConfig, ImageConfig, PaletteIntent, TextIntent};
pub use decoder::{
    check_list_counts, check_splt_records, check_text_records, check_unknown_chunks, run_decode,
    DecodePlan, DECODE_FORMAT,
};
pub use encoder::{
    check_buffer_retrieval, run_encode, run_round_trip, EncodePlan, EncodeTransport,
    RoundTripReport, ENCODE_FORMAT,
};
pub use firewall::{
    BufferRejection, HarnessLimits, CHUNK_HARD_LIMIT, CHUNK_SOFT_LIMIT, MAX_BUFFER_BYTES,
    MAX_IMAGE_DIMENSION,
};
pub use io::{file_transport, DecodeTransport, ReadCursor, Source, TransportState, WriteBudget};
pub use namer::{FeatureCode, NamingScheme, FEATURE_CODE_LEN};
pub use options::{
    apply_options, choose_options, random_option_count, sample_value, OptionChoice,
    COMPRESSION_LEVELS,
};

/// Run a round trip over `data` for the image named by `identifier`.
pub fn round_trip_bytes(
    identifier: &str,
    data: &[u8],
    config: &HarnessConfig,
) -> EngineResult<RoundTripReport> {
    config.validate()?;
    if data.is_empty() {
        return Err(crate::error::HarnessError::empty_input(identifier.to_string()));
    }
    let mut rng = HarnessRng::from_seed(config.seed.unwrap_or_else(|| derive_seed(data)));
    let code = FeatureCode::derive(identifier, config.naming);
    let image_config = ImageConfig::from_code(&code, &mut rng);
    run_round_trip(data, &image_config, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn test_black_background_adam7_scenario() {
        let mut rng = HarnessRng::from_seed(0);
        let code = FeatureCode::derive("suite/bgbi4a08.png", NamingScheme::Plain);
        let config = ImageConfig::from_code(&code, &mut rng);
        assert_eq!(config.background, Background::Black);
        assert!(config.interlace);
        assert_eq!((config.color_type, config.bit_depth), (4, 8));
    }

    #[test]
    fn test_afl_names_reach_the_same_config() {
        let plain = FeatureCode::derive("bgbi4a08.png", NamingScheme::Plain);
        let afl = FeatureCode::derive(
            "queue/id:000007,src:000001,op:havoc,orig:bgbi4a08.png",
            NamingScheme::Afl,
        );
        assert_eq!(plain, afl);
    }

    #[test]
    fn test_round_trip_bytes_uses_the_named_config() {
        let data = vec![3u8; 32 * 32 * 3];
        let report = round_trip_bytes("basn2c08.png", &data, &HarnessConfig::default()).unwrap();
        assert!(report.outcome.is_completed());
        assert_eq!(report.decoded.map(|h| h.color_type), Some(2));
    }

    #[test]
    fn test_empty_input_never_reaches_the_codec() {
        let err = round_trip_bytes("basn2c08.png", &[], &HarnessConfig::default()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Environment);
        let err = run_bytes("basn2c08.png", &[], &HarnessConfig::default()).unwrap_err();
        assert_eq!(exit_code(&Err::<(), _>(err)), 2);
    }
}
