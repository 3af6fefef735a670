// src/error.rs
//
// Unified error handling for png-harness
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - CodecFailure: the codec rejected an input or call (expected, non-fatal)
// - ContractViolation: the codec broke its own interface contract (a finding)
// - Environment: the harness could not run at all (input unreadable, bad config)

use std::borrow::Cow;
use thiserror::Error;

/// Three-tier taxonomy used to pick the driver's exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCategory {
    /// The codec rejected something. This is the common, healthy outcome of fuzzing.
    CodecFailure,
    /// The codec returned data that breaks its own documented contract.
    ContractViolation,
    /// Input, filesystem or configuration problem; the codec was never driven.
    Environment,
}

/// Errors returned by a codec session call.
///
/// Every variant carries a stable numeric code (see [`CodecError::code`]) so that
/// logs can be compared across runs.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid argument for {name}: {reason}")]
    InvalidArgument {
        name: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    #[error("operation {operation} is not available on a {role} context")]
    ContextType {
        operation: &'static str,
        role: &'static str,
    },

    #[error("a transport is already bound to this context")]
    TransportAlreadyBound,

    #[error("no transport bound to this context")]
    NoTransport,

    #[error("operation {operation} is not valid in the current state")]
    OperationState { operation: &'static str },

    #[error("output buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("image {width}x{height} exceeds limits {max_width}x{max_height}")]
    ImageLimits {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    #[error("chunk data exceeds limits: {reason}")]
    ChunkLimits { reason: Cow<'static, str> },

    #[error("CRC mismatch in {chunk} chunk")]
    CrcMismatch { chunk: Cow<'static, str> },

    #[error("malformed {chunk} chunk: {reason}")]
    MalformedChunk {
        chunk: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    #[error("end of image")]
    EndOfImage,

    #[error("unsupported: {what}")]
    Unsupported { what: Cow<'static, str> },

    #[error("decode failed: {message}")]
    Decode { message: Cow<'static, str> },

    #[error("encode failed: {message}")]
    Encode { message: Cow<'static, str> },

    #[error("transport I/O failed: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl CodecError {
    pub fn invalid_argument(
        name: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn context_type(operation: &'static str, role: &'static str) -> Self {
        Self::ContextType { operation, role }
    }

    pub fn operation_state(operation: &'static str) -> Self {
        Self::OperationState { operation }
    }

    pub fn chunk_limits(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::ChunkLimits {
            reason: reason.into(),
        }
    }

    pub fn crc_mismatch(chunk: impl Into<Cow<'static, str>>) -> Self {
        Self::CrcMismatch {
            chunk: chunk.into(),
        }
    }

    pub fn malformed_chunk(
        chunk: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::MalformedChunk {
            chunk: chunk.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(what: impl Into<Cow<'static, str>>) -> Self {
        Self::Unsupported { what: what.into() }
    }

    pub fn decode(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn encode(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Stable numeric code, used in log lines next to the message.
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidArgument { .. } => 1,
            Self::ContextType { .. } => 2,
            Self::TransportAlreadyBound => 3,
            Self::NoTransport => 4,
            Self::OperationState { .. } => 5,
            Self::BufferTooSmall { .. } => 6,
            Self::ImageLimits { .. } => 7,
            Self::ChunkLimits { .. } => 8,
            Self::CrcMismatch { .. } => 9,
            Self::MalformedChunk { .. } => 10,
            Self::EndOfImage => 75,
            Self::Unsupported { .. } => 11,
            Self::Decode { .. } => 12,
            Self::Encode { .. } => 13,
            Self::Io { .. } => 14,
        }
    }
}

impl From<png::DecodingError> for CodecError {
    fn from(err: png::DecodingError) -> Self {
        match err {
            png::DecodingError::IoError(source) => Self::Io { source },
            png::DecodingError::LimitsExceeded => {
                Self::chunk_limits("decoder allocation limit exceeded")
            }
            other => Self::decode(other.to_string()),
        }
    }
}

impl From<png::EncodingError> for CodecError {
    fn from(err: png::EncodingError) -> Self {
        match err {
            png::EncodingError::IoError(source) => Self::Io { source },
            other => Self::encode(other.to_string()),
        }
    }
}

/// A breach of the codec's interface contract detected by the harness.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("{family} record {index}: {reason}")]
    MalformedRecord {
        family: &'static str,
        index: usize,
        reason: Cow<'static, str>,
    },

    #[error("{family} count regressed: bounded query returned {bounded}, total query returned {total}")]
    CountRegression {
        family: &'static str,
        bounded: usize,
        total: usize,
    },

    #[error("{family} bounded query wrote {written} records into a capacity of {capacity}")]
    CapacityOverrun {
        family: &'static str,
        written: usize,
        capacity: usize,
    },

    #[error("output buffer retrieval broke the tri-state contract: {reason}")]
    BufferRetrieval { reason: Cow<'static, str> },

    #[error("codec panicked during {stage}: {message}")]
    CodecPanicked {
        stage: &'static str,
        message: Cow<'static, str>,
    },

    #[error("round trip broke at {stage}: {reason}")]
    RoundTrip {
        stage: &'static str,
        reason: Cow<'static, str>,
    },
}

impl ContractViolation {
    pub fn malformed_record(
        family: &'static str,
        index: usize,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::MalformedRecord {
            family,
            index,
            reason: reason.into(),
        }
    }

    pub fn buffer_retrieval(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::BufferRetrieval {
            reason: reason.into(),
        }
    }

    pub fn round_trip(stage: &'static str, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::RoundTrip {
            stage,
            reason: reason.into(),
        }
    }
}

/// png-harness error type
#[derive(Debug, Error)]
pub enum HarnessError {
    // Environment Errors
    #[error("Input file not found: {path}")]
    InputNotFound { path: Cow<'static, str> },

    #[error("Failed to read input '{path}': {source}")]
    InputReadFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Input '{path}' is empty")]
    EmptyInput { path: Cow<'static, str> },

    #[error("Failed to prepare file transport: {source}")]
    TempFileFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid harness configuration for {name}: {reason}")]
    InvalidConfig {
        name: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    // Findings
    #[error("Contract violation: {0}")]
    Contract(#[from] ContractViolation),

    // Codec failure surfaced outside a session (e.g. while creating it)
    #[error("Codec failure: {0}")]
    Codec(#[from] CodecError),
}

// Constructor Helpers
impl HarnessError {
    pub fn input_not_found(path: impl Into<Cow<'static, str>>) -> Self {
        Self::InputNotFound { path: path.into() }
    }

    pub fn input_read_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::InputReadFailed {
            path: path.into(),
            source,
        }
    }

    pub fn empty_input(path: impl Into<Cow<'static, str>>) -> Self {
        Self::EmptyInput { path: path.into() }
    }

    pub fn temp_file_failed(source: std::io::Error) -> Self {
        Self::TempFileFailed { source }
    }

    pub fn invalid_config(
        name: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidConfig {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InputNotFound { .. }
            | Self::InputReadFailed { .. }
            | Self::EmptyInput { .. }
            | Self::TempFileFailed { .. }
            | Self::InvalidConfig { .. } => ErrorCategory::Environment,
            Self::Contract(_) => ErrorCategory::ContractViolation,
            Self::Codec(_) => ErrorCategory::CodecFailure,
        }
    }

    pub fn is_contract_violation(&self) -> bool {
        self.category() == ErrorCategory::ContractViolation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            HarnessError::empty_input("x.png").category(),
            ErrorCategory::Environment
        );
        assert_eq!(
            HarnessError::invalid_config("init_probability", "out of range").category(),
            ErrorCategory::Environment
        );
        assert_eq!(
            HarnessError::from(CodecError::EndOfImage).category(),
            ErrorCategory::CodecFailure
        );
        let violation = ContractViolation::buffer_retrieval("size without buffer");
        assert!(HarnessError::from(violation).is_contract_violation());
    }

    #[test]
    fn test_codec_error_codes_are_distinct() {
        let errors = [
            CodecError::invalid_argument("x", "y"),
            CodecError::context_type("op", "decoder"),
            CodecError::TransportAlreadyBound,
            CodecError::NoTransport,
            CodecError::operation_state("op"),
            CodecError::BufferTooSmall {
                needed: 2,
                actual: 1,
            },
            CodecError::chunk_limits("x"),
            CodecError::crc_mismatch("IHDR"),
            CodecError::malformed_chunk("tIME", "short"),
            CodecError::EndOfImage,
            CodecError::unsupported("x"),
            CodecError::decode("x"),
            CodecError::encode("x"),
        ];
        let mut codes: Vec<u32> = errors.iter().map(CodecError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_error_messages_are_readable() {
        let err = CodecError::BufferTooSmall {
            needed: 64,
            actual: 8,
        };
        assert_eq!(
            err.to_string(),
            "output buffer too small: need 64 bytes, got 8"
        );
        let violation = ContractViolation::CountRegression {
            family: "text",
            bounded: 4,
            total: 2,
        };
        assert!(violation.to_string().contains("bounded query returned 4"));
    }
}
