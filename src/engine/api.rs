// src/engine/api.rs
//
// Harness entry points: configuration, per-session reports and the
// identifier + bytes -> session dispatch the driver and fuzz targets call.

use crate::engine::ancillary::SynthesisSettings;
use crate::engine::common::{EngineResult, HarnessRng};
use crate::engine::config::ImageConfig;
use crate::engine::decoder::run_decode;
use crate::engine::encoder::run_encode;
use crate::engine::firewall::{BufferRejection, HarnessLimits};
use crate::engine::io::Source;
use crate::engine::namer::{FeatureCode, NamingScheme};
use crate::error::{CodecError, ErrorCategory, HarnessError};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// Which harness a run drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HarnessMode {
    Read,
    Write,
    /// Pick read or write from the seeded generator.
    #[default]
    Random,
}

impl HarnessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HarnessMode::Read => "read",
            HarnessMode::Write => "write",
            HarnessMode::Random => "random",
        }
    }
}

/// Run-time switches of the harness.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub mode: HarnessMode,
    pub naming: NamingScheme,
    /// Fixed seed; when `None` the seed is the middle byte of the input.
    pub seed: Option<u64>,
    /// Chance that each ancillary record family is initialised on encode.
    pub init_probability: f64,
    /// Chance the encoder header comes from the ImageConfig.
    pub header_fidelity: f64,
    pub max_string_len: usize,
    /// Capacity of the bounded first call of two-call list queries, and the
    /// most records per list family the encoder synthesizes.
    pub max_list_records: usize,
    pub limits: HarnessLimits,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let synthesis = SynthesisSettings::default();
        Self {
            mode: HarnessMode::default(),
            naming: NamingScheme::default(),
            seed: None,
            init_probability: synthesis.init_probability,
            header_fidelity: synthesis.header_fidelity,
            max_string_len: synthesis.max_string_len,
            max_list_records: synthesis.max_list_records,
            limits: HarnessLimits::default(),
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<(), HarnessError> {
        for (name, p) in [
            ("init_probability", self.init_probability),
            ("header_fidelity", self.header_fidelity),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(HarnessError::invalid_config(
                    name,
                    format!("{p} is outside [0, 1]"),
                ));
            }
        }
        if self.max_string_len == 0 {
            return Err(HarnessError::invalid_config(
                "max_string_len",
                "must be at least 1",
            ));
        }
        self.limits.validate()
    }

    pub fn synthesis(&self) -> SynthesisSettings {
        SynthesisSettings {
            init_probability: self.init_probability,
            header_fidelity: self.header_fidelity,
            max_string_len: self.max_string_len,
            max_list_records: self.max_list_records,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Decode,
    Encode,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Decode => "decode",
            SessionKind::Encode => "encode",
        }
    }
}

/// How a session ended, short of a contract violation.
#[derive(Debug)]
pub enum SessionOutcome {
    /// Every step ran.
    Completed,
    /// The codec refused a call; the rest of the session was skipped.
    CodecRejected {
        stage: &'static str,
        error: CodecError,
    },
    /// The harness refused to allocate or hand over a pixel buffer.
    BufferRejected(BufferRejection),
}

impl SessionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SessionOutcome::Completed)
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Completed => f.write_str("completed"),
            SessionOutcome::CodecRejected { stage, error } => {
                write!(f, "codec rejected at {stage}: {error}")
            }
            SessionOutcome::BufferRejected(rejection) => write!(f, "buffer rejected: {rejection}"),
        }
    }
}

/// What one harness run did.
#[derive(Debug)]
pub struct SessionReport {
    pub kind: SessionKind,
    pub seed: u64,
    pub feature_code: String,
    pub family: &'static str,
    pub transport: &'static str,
    pub progressive: bool,
    pub options_applied: usize,
    /// Ancillary records the decoder surfaced.
    pub records_seen: usize,
    /// Encoder record setters that refused their record.
    pub setter_failures: usize,
    /// Decoded image bytes, or encoded bytes written to the transport.
    pub bytes_out: usize,
    /// The retrieved PNG of an encode-to-buffer session.
    pub encoded: Option<Vec<u8>>,
    pub outcome: SessionOutcome,
}

impl SessionReport {
    pub(crate) fn new(kind: SessionKind, seed: u64, config: &ImageConfig) -> Self {
        Self {
            kind,
            seed,
            feature_code: String::new(),
            family: config.feature.family(),
            transport: "",
            progressive: false,
            options_applied: 0,
            records_seen: 0,
            setter_failures: 0,
            bytes_out: 0,
            encoded: None,
            outcome: SessionOutcome::Completed,
        }
    }
}

/// Seed used when the config does not fix one: the input's middle byte.
pub fn derive_seed(data: &[u8]) -> u64 {
    data.get(data.len() / 2).copied().map_or(0, u64::from)
}

/// Run one harness session over `data`, naming it after `identifier`.
pub fn run_bytes(identifier: &str, data: &[u8], config: &HarnessConfig) -> EngineResult<SessionReport> {
    config.validate()?;
    if data.is_empty() {
        return Err(HarnessError::empty_input(identifier.to_string()));
    }

    let mut rng = HarnessRng::from_seed(config.seed.unwrap_or_else(|| derive_seed(data)));
    let code = FeatureCode::derive(identifier, config.naming);
    let image_config = ImageConfig::from_code(&code, &mut rng);
    let kind = match config.mode {
        HarnessMode::Read => SessionKind::Decode,
        HarnessMode::Write => SessionKind::Encode,
        HarnessMode::Random if rng.coin() => SessionKind::Decode,
        HarnessMode::Random => SessionKind::Encode,
    };
    info!(
        target: "png_harness::engine",
        identifier,
        code = %code,
        naming = config.naming.as_str(),
        mode = config.mode.as_str(),
        kind = kind.as_str(),
        seed = rng.seed(),
        "harness run"
    );

    let result = match kind {
        SessionKind::Decode => run_decode(data, &image_config, &mut rng, config),
        SessionKind::Encode => run_encode(data, &image_config, &mut rng, config),
    };
    match result {
        Ok(mut report) => {
            report.feature_code = code.to_string();
            Ok(report)
        }
        Err(err) => {
            if err.is_contract_violation() {
                warn!(target: "png_harness::engine", identifier, seed = rng.seed(), %err, "contract violation");
            }
            Err(err)
        }
    }
}

/// Map the input file at `path` and run one session over it.
pub fn run_file(path: &Path, config: &HarnessConfig) -> EngineResult<SessionReport> {
    let source = Source::open(path)?;
    run_bytes(&path.to_string_lossy(), source.as_bytes(), config)
}

/// Process exit status for a harness result: 0 when the harness ran to the
/// end (codec rejections included), 1 for a contract violation, 2 when the
/// codec was never driven.
pub fn exit_code<T>(result: &EngineResult<T>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(err) => match err.category() {
            ErrorCategory::ContractViolation => 1,
            ErrorCategory::Environment => 2,
            ErrorCategory::CodecFailure => 0,
        },
    }
}
