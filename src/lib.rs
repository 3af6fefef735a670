// lib.rs
//
// png-harness: a configuration-driven round-trip fuzz harness for PNG codecs
//
// Design goals:
// - Drive every codec entry point (buffer, stream and file transports;
//   one-shot and progressive decode/encode)
// - Synthesize plausible-but-adversarial metadata from a test-vector name
// - Treat codec rejections as normal and contract breaches as findings
// - Release every session and payload exactly once, on every exit path

pub mod codecs;
pub mod engine;
pub mod error;
pub mod ops;

pub use engine::{
    exit_code, round_trip_bytes, run_bytes, run_file, HarnessConfig, HarnessMode, SessionOutcome,
    SessionReport,
};
pub use error::{CodecError, ContractViolation, ErrorCategory, HarnessError};

/// Library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
