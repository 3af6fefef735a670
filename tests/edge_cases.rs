// tests/edge_cases.rs
//
// Edge case tests for png-harness
// Tests boundary inputs, degenerate names and environment failures

use png_harness::engine::{
    check_buffer_retrieval, FeatureCode, HarnessLimits, HarnessRng, ImageConfig, NamingScheme,
    SessionKind,
};
use png_harness::{exit_code, run_bytes, run_file, ErrorCategory, HarnessConfig, HarnessMode, SessionOutcome};
use std::io::Write;

fn write_mode(seed: u64) -> HarnessConfig {
    HarnessConfig {
        mode: HarnessMode::Write,
        seed: Some(seed),
        header_fidelity: 1.0,
        ..HarnessConfig::default()
    }
}

mod input_tests {
    use super::*;

    #[test]
    fn test_zero_length_file_is_environment_failure() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = run_file(file.path(), &HarnessConfig::default());
        let err = result.as_ref().unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Environment);
        assert_eq!(exit_code(&result), 2);
    }

    #[test]
    fn test_missing_file_is_environment_failure() {
        let result = run_file(
            std::path::Path::new("/nonexistent/dir/basn0g01.png"),
            &HarnessConfig::default(),
        );
        assert_eq!(exit_code(&result), 2);
    }

    #[test]
    fn test_single_byte_file_runs() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(&[0x89]).unwrap();
        file.flush().unwrap();
        let result = run_file(file.path(), &HarnessConfig::default());
        assert_eq!(exit_code(&result), 0, "{result:?}");
    }

    #[test]
    fn test_png_signature_only() {
        let signature = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        for seed in 0..8 {
            let config = HarnessConfig {
                mode: HarnessMode::Read,
                seed: Some(seed),
                ..HarnessConfig::default()
            };
            let report = run_bytes("basn0g08.png", &signature, &config).unwrap();
            assert!(matches!(report.outcome, SessionOutcome::CodecRejected { .. }));
        }
    }
}

mod naming_tests {
    use super::*;

    #[test]
    fn test_two_byte_name_gives_short_code() {
        let code = FeatureCode::derive("ab", NamingScheme::Plain);
        assert_eq!(code.as_bytes(), b"ab");
        let config = ImageConfig::from_code(&code, &mut HarnessRng::from_seed(0));
        assert_eq!(config, ImageConfig::default());
    }

    #[test]
    fn test_short_name_still_runs_a_session() {
        let report = run_bytes("ab", &[1, 2, 3, 4], &write_mode(0)).unwrap();
        assert_eq!(report.feature_code, "ab");
        assert_eq!(report.family, "unrecognized");
    }

    #[test]
    fn test_afl_name_without_origin_gives_empty_code() {
        let code = FeatureCode::derive("id:000001", NamingScheme::Afl);
        assert!(code.is_empty());
        let report = run_bytes("id:000001", &[5; 16], &write_mode(0)).unwrap();
        assert_eq!(report.family, "unrecognized");
    }

    #[test]
    fn test_non_ascii_name() {
        let report = run_bytes("ünïcødé.png", &[9; 64], &write_mode(1));
        assert_eq!(exit_code(&report), 0);
    }
}

mod boundary_tests {
    use super::*;

    #[test]
    fn test_size_zero_rejected_before_encode() {
        // s00 names a 0x0 image: nothing to encode
        let report = run_bytes("s00n0g08.png", &[7; 64], &write_mode(0)).unwrap();
        assert_eq!(report.kind, SessionKind::Encode);
        assert!(!report.outcome.is_completed());
        assert!(report.encoded.is_none());
    }

    #[test]
    fn test_source_one_byte_short() {
        // 32x32 gray8 needs 1024 bytes
        let report = run_bytes("basn0g08.png", &[0; 1023], &write_mode(2)).unwrap();
        assert!(matches!(report.outcome, SessionOutcome::BufferRejected(_)));
    }

    #[test]
    fn test_tight_limits_reject_buffers() {
        let config = HarnessConfig {
            limits: HarnessLimits {
                max_buffer_bytes: 16,
                ..HarnessLimits::default()
            },
            ..write_mode(3)
        };
        let report = run_bytes("basn2c08.png", &[0; 4096], &config).unwrap();
        assert!(matches!(report.outcome, SessionOutcome::BufferRejected(_)));
    }

    #[test]
    fn test_invalid_limits_are_environment_failures() {
        let config = HarnessConfig {
            limits: HarnessLimits {
                chunk_soft: 10,
                chunk_hard: 5,
                ..HarnessLimits::default()
            },
            ..HarnessConfig::default()
        };
        let result = run_bytes("basn0g08.png", &[1; 8], &config);
        assert_eq!(exit_code(&result), 2);
    }

    #[test]
    fn test_zero_max_string_len_rejected() {
        let config = HarnessConfig {
            max_string_len: 0,
            ..HarnessConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_buffer_reported_as_success_is_a_violation() {
        let retrieval = png_harness::codecs::BufferRetrieval {
            buffer: Some(Vec::new()),
            size: 0,
            error: None,
        };
        assert!(check_buffer_retrieval(&retrieval).is_err());
    }

    #[test]
    fn test_no_buffer_and_no_error_is_accepted() {
        let retrieval = png_harness::codecs::BufferRetrieval {
            buffer: None,
            size: 0,
            error: None,
        };
        assert!(check_buffer_retrieval(&retrieval).is_ok());
    }
}
