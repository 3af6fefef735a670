// src/engine/encoder.rs
//
// Encode harness: synthesizes a record set, feeds it to a PngEncodeSession
// over a byte-budgeted stream or an in-memory buffer, encodes the raw input as
// pixels and checks the buffer retrieval contract.

use crate::codecs::records::{Ihdr, Plte, PlteEntry, COLOR_INDEXED};
use crate::codecs::{BufferRetrieval, CodecResult, PngDecodeSession, PngEncodeSession, WriteCallback};
use crate::engine::ancillary::AncillaryRecordSet;
use crate::engine::api::{HarnessConfig, SessionKind, SessionOutcome, SessionReport};
use crate::engine::common::{conclude, guarded, rejected, EngineResult, HarnessRng, Step, Stop};
use crate::engine::config::ImageConfig;
use crate::engine::firewall::BufferRejection;
use crate::engine::io::WriteBudget;
use crate::engine::options::{apply_options, choose_options, random_option_count, OptionChoice};
use crate::error::{CodecError, ContractViolation};
use crate::ops::{CodecOption, CrcAction, DecodeFlags, EncodeFlags, PixelFormat};
use tracing::{debug, info, trace, warn};

/// Source pixel layout of every encode session.
pub const ENCODE_FORMAT: PixelFormat = PixelFormat::Png;

/// Image compression level set before any sampled option, to keep sessions fast.
const BASELINE_COMPRESSION_LEVEL: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeTransport {
    /// Write callback that accepts `budget` bytes and then fails.
    Stream { budget: u64 },
    /// Codec-owned buffer, retrieved after the encode.
    Buffer,
}

impl EncodeTransport {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodeTransport::Stream { .. } => "stream",
            EncodeTransport::Buffer => "buffer",
        }
    }
}

/// Random choices of one encode session.
#[derive(Debug, Clone)]
pub struct EncodePlan {
    pub transport: EncodeTransport,
    pub progressive: bool,
    pub options: Vec<OptionChoice>,
}

impl EncodePlan {
    pub fn draw(config: &ImageConfig, rng: &mut HarnessRng) -> Self {
        let transport = if rng.coin() {
            EncodeTransport::Stream {
                budget: u64::from(rng.u32()),
            }
        } else {
            EncodeTransport::Buffer
        };
        let progressive = rng.coin();

        let mut options = config_options(config);
        let count = random_option_count(rng);
        options.extend(choose_options(rng, count));
        Self {
            transport,
            progressive,
            options,
        }
    }
}

/// Tunables the feature family asks for (filtering and compression families).
fn config_options(config: &ImageConfig) -> Vec<OptionChoice> {
    let mut options = Vec::new();
    if let Some(filter) = config.filter_choice() {
        options.push(OptionChoice {
            option: CodecOption::FilterChoice,
            value: i32::try_from(filter.bits()).unwrap_or(i32::MAX),
        });
    }
    if let Some(level) = config.compression_level() {
        options.push(OptionChoice {
            option: CodecOption::ImgCompressionLevel,
            value: level,
        });
    }
    options
}

/// Run one encode session with `data` as the pixel source.
pub fn run_encode(
    data: &[u8],
    config: &ImageConfig,
    rng: &mut HarnessRng,
    harness: &HarnessConfig,
) -> EngineResult<SessionReport> {
    let records = AncillaryRecordSet::synthesize(config, rng, &harness.synthesis());
    let plan = EncodePlan::draw(config, rng);
    let mut report = SessionReport::new(SessionKind::Encode, rng.seed(), config);
    report.transport = plan.transport.as_str();
    report.progressive = plan.progressive;
    info!(
        target: "png_harness::encode",
        codec = crate::codecs::version(),
        seed = rng.seed(),
        family = config.feature.family(),
        transport = plan.transport.as_str(),
        progressive = plan.progressive,
        options = plan.options.len(),
        payload_bytes = records.payload_bytes(),
        "encode session"
    );

    let (stream, state) = match plan.transport {
        EncodeTransport::Stream { budget } => {
            let budget = WriteBudget::new(budget);
            let state = budget.state();
            (Some(budget.into_callback()), Some(state))
        }
        EncodeTransport::Buffer => (None, None),
    };

    let mut session = PngEncodeSession::new();
    let mut step = drive(&mut session, data, stream, &records, &plan, harness, &mut report);

    // Retrieval is probed after failed encodes too; both sides of the
    // contract must hold.
    if plan.transport == EncodeTransport::Buffer && !matches!(step, Err(Stop::Violation(_))) {
        if let Err(stop) = guarded("png_buffer", || retrieve_buffer(&mut session, &mut report)) {
            step = Err(stop);
        }
    }
    if let Some(state) = state {
        report.bytes_out = state.position() as usize;
    }
    drop(session);

    report.outcome = conclude(step)?;
    info!(target: "png_harness::encode", outcome = %report.outcome, bytes = report.bytes_out, "encode finished");
    Ok(report)
}

fn drive<'a>(
    session: &mut PngEncodeSession<'a>,
    data: &[u8],
    stream: Option<WriteCallback<'a>>,
    records: &AncillaryRecordSet,
    plan: &EncodePlan,
    harness: &HarnessConfig,
    report: &mut SessionReport,
) -> Step<()> {
    report.options_applied = guarded("setup", || configure(session, stream, plan, harness))?;

    let ihdr = records.ihdr.unwrap_or_default();
    report.setter_failures = guarded("records", || set_records(session, &ihdr, records))?;

    let needed = ihdr.image_bytes().ok_or(BufferRejection::Ceiling {
        stage: "encode",
        needed: usize::MAX,
        limit: harness.limits.max_buffer_bytes,
    })?;
    harness.limits.enforce_source(needed, data.len(), "encode")?;
    let pixels = &data[..needed];

    if plan.progressive {
        guarded("progressive encode", || encode_progressive(session, pixels, &ihdr))
    } else {
        guarded("encode", || {
            session
                .encode_image(Some(pixels), ENCODE_FORMAT, EncodeFlags::FINALIZE)
                .map_err(rejected("encode_image"))
        })
    }
}

fn configure<'a>(
    session: &mut PngEncodeSession<'a>,
    stream: Option<WriteCallback<'a>>,
    plan: &EncodePlan,
    harness: &HarnessConfig,
) -> Step<usize> {
    match stream {
        Some(callback) => session
            .set_png_stream(callback)
            .map_err(rejected("bind transport"))?,
        None => session
            .set_option(CodecOption::EncodeToBuffer, 1)
            .map_err(rejected("encode_to_buffer"))?,
    }
    session
        .set_option(CodecOption::ImgCompressionLevel, BASELINE_COMPRESSION_LEVEL)
        .map_err(rejected("img_compression_level"))?;
    session
        .set_image_limits(harness.limits.max_width, harness.limits.max_height)
        .map_err(rejected("set_image_limits"))?;
    Ok(apply_options(&plan.options, |option, value| {
        session.set_option(option, value)
    }))
}

/// Hand the header and every initialised record to the codec. A rejected
/// header ends the session; other rejections are logged and counted.
fn set_records(
    session: &mut PngEncodeSession<'_>,
    ihdr: &Ihdr,
    records: &AncillaryRecordSet,
) -> Step<usize> {
    session.set_ihdr(ihdr).map_err(rejected("set_ihdr"))?;

    let mut failures = 0;
    let mut note = |family: &'static str, result: CodecResult<()>| {
        if let Err(error) = result {
            debug!(target: "png_harness::encode", family, %error, "record rejected");
            failures += 1;
        }
    };
    if let Some(plte) = &records.plte {
        note("plte", session.set_plte(plte));
    }
    if let Some(trns) = &records.trns {
        note("trns", session.set_trns(trns));
    }
    if let Some(chrm) = &records.chrm {
        note("chrm", session.set_chrm(chrm));
    }
    if let Some(chrm) = &records.chrm_int {
        note("chrm_int", session.set_chrm_int(chrm));
    }
    note("gama", session.set_gama(records.gama));
    note("gama_int", session.set_gama_int(records.gama_int));
    if let Some(iccp) = &records.iccp {
        note("iccp", session.set_iccp(iccp));
    }
    if let Some(sbit) = &records.sbit {
        note("sbit", session.set_sbit(sbit));
    }
    note("srgb", session.set_srgb(records.srgb));
    if !records.text.is_empty() {
        note("text", session.set_text(&records.text));
    }
    if let Some(bkgd) = &records.bkgd {
        note("bkgd", session.set_bkgd(bkgd));
    }
    if let Some(hist) = &records.hist {
        note("hist", session.set_hist(hist));
    }
    if let Some(phys) = &records.phys {
        note("phys", session.set_phys(phys));
    }
    if !records.splt.is_empty() {
        note("splt", session.set_splt(&records.splt));
    }
    if let Some(time) = &records.time {
        note("time", session.set_time(time));
    }
    if !records.unknown.is_empty() {
        note("unknown_chunks", session.set_unknown_chunks(&records.unknown));
    }
    if let Some(offs) = &records.offs {
        note("offs", session.set_offs(offs));
    }
    if let Some(exif) = &records.exif {
        note("exif", session.set_exif(exif));
    }
    Ok(failures)
}

fn encode_progressive(
    session: &mut PngEncodeSession<'_>,
    pixels: &[u8],
    ihdr: &Ihdr,
) -> Step<()> {
    match session.encode_scanline(pixels) {
        Ok(()) => warn!(target: "png_harness::encode", "encode_scanline accepted before encode_image"),
        Err(error) => trace!(target: "png_harness::encode", %error, "encode_scanline refused"),
    }
    session
        .encode_image(
            None,
            ENCODE_FORMAT,
            EncodeFlags::PROGRESSIVE | EncodeFlags::FINALIZE,
        )
        .map_err(rejected("encode_image"))?;
    if let Err(error) = session.encode_chunks() {
        trace!(target: "png_harness::encode", %error, "encode_chunks");
    }

    let stride = pixels.len() / ihdr.height.max(1) as usize;
    loop {
        let info = match session.row_info() {
            Ok(info) => info,
            Err(CodecError::EndOfImage) => return Ok(()),
            Err(error) => return Err(rejected("row_info")(error)),
        };
        let offset = info.row_num as usize * stride;
        let Some(row) = pixels.get(offset..) else {
            return Err(ContractViolation::malformed_record(
                "row",
                info.scanline_idx as usize,
                format!("row {} beyond image height {}", info.row_num, ihdr.height),
            )
            .into());
        };
        session.encode_row(row).map_err(rejected("encode_row"))?;
    }
}

fn retrieve_buffer(session: &mut PngEncodeSession<'_>, report: &mut SessionReport) -> Step<()> {
    let retrieval = session.png_buffer();
    check_buffer_retrieval(&retrieval)?;
    match (retrieval.buffer, retrieval.error) {
        (Some(buffer), _) => {
            debug!(target: "png_harness::encode", size = buffer.len(), "png buffer retrieved");
            report.bytes_out = buffer.len();
            report.encoded = Some(buffer);
        }
        (None, Some(error)) => trace!(target: "png_harness::encode", %error, "no png buffer"),
        (None, None) => {}
    }
    Ok(())
}

/// A returned buffer is never empty and always matches the reported size; an
/// error never comes with a buffer or a size. `(None, 0, None)` is allowed.
pub fn check_buffer_retrieval(retrieval: &BufferRetrieval) -> Result<(), ContractViolation> {
    match (&retrieval.buffer, &retrieval.error) {
        (Some(_), Some(_)) => Err(ContractViolation::buffer_retrieval(
            "buffer and error both present",
        )),
        (Some(buffer), None) if buffer.is_empty() => Err(ContractViolation::buffer_retrieval(
            "empty buffer returned as success",
        )),
        (Some(buffer), None) if buffer.len() != retrieval.size => {
            Err(ContractViolation::buffer_retrieval(format!(
                "size {} disagrees with buffer length {}",
                retrieval.size,
                buffer.len()
            )))
        }
        (None, Some(_)) if retrieval.size != 0 => Err(ContractViolation::buffer_retrieval(
            format!("size {} reported without a buffer", retrieval.size),
        )),
        _ => Ok(()),
    }
}

// =============================================================================
// ROUND TRIP
// =============================================================================

/// Both ends of an encode-then-decode round trip.
#[derive(Debug)]
pub struct RoundTripReport {
    /// Header handed to the encoder.
    pub encoded: Ihdr,
    /// Header the decoder read back, when the encode produced a PNG.
    pub decoded: Option<Ihdr>,
    pub encoded_len: usize,
    pub outcome: SessionOutcome,
}

/// Encode `data` as pixels of the image `config` describes, decode the result
/// with CRC checking on and compare the geometry.
///
/// The encode side may refuse (bad header, short source); once it produced a
/// PNG, any decode failure or geometry mismatch is a contract violation.
pub fn run_round_trip(
    data: &[u8],
    config: &ImageConfig,
    harness: &HarnessConfig,
) -> EngineResult<RoundTripReport> {
    let ihdr = Ihdr {
        width: config.size,
        height: config.size,
        bit_depth: config.bit_depth,
        color_type: config.color_type,
        compression_method: 0,
        filter_method: 0,
        interlace_method: u8::from(config.interlace),
    };
    let mut report = RoundTripReport {
        encoded: ihdr,
        decoded: None,
        encoded_len: 0,
        outcome: SessionOutcome::Completed,
    };
    let step = round_trip(data, config, harness, &mut report);
    report.outcome = conclude(step)?;
    info!(
        target: "png_harness::encode",
        family = config.feature.family(),
        encoded_len = report.encoded_len,
        outcome = %report.outcome,
        "round trip finished"
    );
    Ok(report)
}

fn round_trip(
    data: &[u8],
    config: &ImageConfig,
    harness: &HarnessConfig,
    report: &mut RoundTripReport,
) -> Step<()> {
    let ihdr = report.encoded;
    let needed = ihdr.image_bytes().ok_or(BufferRejection::Ceiling {
        stage: "round trip",
        needed: usize::MAX,
        limit: harness.limits.max_buffer_bytes,
    })?;
    harness.limits.enforce_source(needed, data.len(), "round trip")?;

    let encoded = guarded("round trip encode", || {
        let mut session = PngEncodeSession::new();
        session
            .set_option(CodecOption::EncodeToBuffer, 1)
            .map_err(rejected("encode_to_buffer"))?;
        apply_options(&config_options(config), |option, value| {
            session.set_option(option, value)
        });
        session.set_ihdr(&ihdr).map_err(rejected("set_ihdr"))?;
        if ihdr.color_type == COLOR_INDEXED {
            session
                .set_plte(&gray_ramp(ihdr.bit_depth))
                .map_err(rejected("set_plte"))?;
        }
        session
            .encode_image(Some(&data[..needed]), ENCODE_FORMAT, EncodeFlags::FINALIZE)
            .map_err(rejected("encode_image"))?;
        let retrieval = session.png_buffer();
        check_buffer_retrieval(&retrieval)?;
        match (retrieval.buffer, retrieval.error) {
            (Some(buffer), _) => Ok(buffer),
            (None, Some(error)) => Err(rejected("png_buffer")(error)),
            (None, None) => {
                let reason = "no buffer after a finalized encode";
                Err(ContractViolation::round_trip("png_buffer", reason).into())
            }
        }
    })?;
    report.encoded_len = encoded.len();

    let broke = |stage: &'static str| {
        move |error: CodecError| Stop::from(ContractViolation::round_trip(stage, error.to_string()))
    };
    let decoded = guarded("round trip decode", || {
        let mut session = PngDecodeSession::new();
        session.set_png_buffer(&encoded).map_err(broke("set_png_buffer"))?;
        session
            .set_crc_action(CrcAction::Error, CrcAction::Error)
            .map_err(broke("set_crc_action"))?;
        let size = session
            .decoded_image_size(PixelFormat::Png)
            .map_err(broke("decoded_image_size"))?;
        harness.limits.enforce_buffer(size, "round trip")?;
        let decoded = session.ihdr().map_err(broke("ihdr"))?;
        let mut out = vec![0u8; size];
        session
            .decode_image(Some(out.as_mut_slice()), PixelFormat::Png, DecodeFlags::empty())
            .map_err(broke("decode_image"))?;
        Ok(decoded)
    })?;
    report.decoded = Some(decoded);

    let geometry = |h: &Ihdr| (h.width, h.height, h.color_type, h.bit_depth);
    if geometry(&decoded) != geometry(&ihdr) {
        return Err(ContractViolation::round_trip(
            "ihdr",
            format!(
                "decoded {:?} from encoded {:?}",
                geometry(&decoded),
                geometry(&ihdr)
            ),
        )
        .into());
    }
    Ok(())
}

/// Full-size gray palette for an indexed image of `bit_depth`.
fn gray_ramp(bit_depth: u8) -> Plte {
    let n = 1usize << bit_depth.min(8);
    Plte {
        entries: (0..n)
            .map(|i| {
                let v = (i * 255 / (n - 1).max(1)) as u8;
                PlteEntry {
                    red: v,
                    green: v,
                    blue: v,
                    alpha: 255,
                }
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::tracking::{enable_drop_tracking, live_encoders};
    use crate::engine::ancillary::tracking as record_tracking;
    use crate::engine::namer::{FeatureCode, NamingScheme};

    fn config(code: &str) -> ImageConfig {
        let mut rng = HarnessRng::from_seed(0);
        ImageConfig::from_code(&FeatureCode::derive(code, NamingScheme::Plain), &mut rng)
    }

    fn faithful() -> HarnessConfig {
        HarnessConfig {
            header_fidelity: 1.0,
            ..HarnessConfig::default()
        }
    }

    #[test]
    fn test_tri_state_contract() {
        let ok = BufferRetrieval {
            buffer: Some(vec![1, 2, 3]),
            size: 3,
            error: None,
        };
        assert!(check_buffer_retrieval(&ok).is_ok());
        let failed = BufferRetrieval {
            buffer: None,
            size: 0,
            error: Some(CodecError::NoTransport),
        };
        assert!(check_buffer_retrieval(&failed).is_ok());

        let both = BufferRetrieval {
            buffer: Some(vec![1]),
            size: 1,
            error: Some(CodecError::NoTransport),
        };
        assert!(check_buffer_retrieval(&both).is_err());
        let neither = BufferRetrieval {
            buffer: None,
            size: 0,
            error: None,
        };
        assert!(check_buffer_retrieval(&neither).is_ok());
        let wrong_size = BufferRetrieval {
            buffer: Some(vec![1, 2]),
            size: 5,
            error: None,
        };
        assert!(check_buffer_retrieval(&wrong_size).is_err());
        let phantom = BufferRetrieval {
            buffer: None,
            size: 4,
            error: Some(CodecError::NoTransport),
        };
        assert!(check_buffer_retrieval(&phantom).is_err());
    }

    #[test]
    fn test_both_gamma_setters_run_every_session() {
        let ihdr = Ihdr {
            width: 1,
            height: 1,
            bit_depth: 8,
            color_type: 0,
            compression_method: 0,
            filter_method: 0,
            interlace_method: 0,
        };
        // gama_int 0 is out of range, so only the fixed-point setter fails
        let records = AncillaryRecordSet {
            gama: 0.45455,
            gama_int: 0,
            ..AncillaryRecordSet::default()
        };
        let mut session = PngEncodeSession::new();
        assert_eq!(set_records(&mut session, &ihdr, &records).unwrap(), 1);

        let records = AncillaryRecordSet {
            gama: -1.0,
            gama_int: 45455,
            ..AncillaryRecordSet::default()
        };
        let mut session = PngEncodeSession::new();
        assert_eq!(set_records(&mut session, &ihdr, &records).unwrap(), 1);
    }

    #[test]
    fn test_short_source_is_buffer_rejection() {
        let data = [7u8; 10];
        for seed in 0..8 {
            let mut rng = HarnessRng::from_seed(seed);
            let report = run_encode(&data, &config("basn2c08"), &mut rng, &faithful()).unwrap();
            assert!(matches!(
                report.outcome,
                SessionOutcome::BufferRejected(BufferRejection::SourceTooShort { needed: 3072, .. })
            ));
        }
    }

    #[test]
    fn test_buffer_encodes_decode_back_to_the_header() {
        let data = vec![0x5au8; 32 * 32 * 8];
        let mut produced = 0;
        for seed in 0..48 {
            let mut rng = HarnessRng::from_seed(seed);
            let report = run_encode(&data, &config("basn2c08"), &mut rng, &faithful()).unwrap();
            let Some(encoded) = report.encoded else { continue };
            let decoder = png::Decoder::new(std::io::Cursor::new(encoded));
            let reader = decoder.read_info().unwrap();
            assert_eq!((reader.info().width, reader.info().height), (32, 32));
            produced += 1;
        }
        assert!(produced > 0);
    }

    #[test]
    fn test_round_trip_keeps_geometry() {
        let data = vec![0xa5u8; 32 * 32 * 8];
        for code in ["basn0g01", "basn2c16", "basn3p04", "basn4a08", "bgbi4a08", "basn6a16"] {
            let report = run_round_trip(&data, &config(code), &HarnessConfig::default()).unwrap();
            assert!(report.outcome.is_completed(), "{code}: {}", report.outcome);
            let decoded = report.decoded.unwrap();
            assert_eq!(decoded.width, 32);
            assert_eq!(decoded.color_type, report.encoded.color_type);
            assert_eq!(decoded.bit_depth, report.encoded.bit_depth);
        }
    }

    #[test]
    fn test_round_trip_rejects_degenerate_size() {
        let report = run_round_trip(&[1, 2, 3], &config("s00n0g08"), &HarnessConfig::default()).unwrap();
        assert!(matches!(
            report.outcome,
            SessionOutcome::BufferRejected(BufferRejection::Empty { .. })
        ));
        assert!(report.decoded.is_none());
    }

    #[test]
    fn test_sessions_and_records_released() {
        let _guard = enable_drop_tracking();
        record_tracking::reset();
        let data = vec![1u8; 4096];
        for seed in 0..16 {
            let mut rng = HarnessRng::from_seed(seed);
            let _ = run_encode(&data, &config("s05n3p02"), &mut rng, &HarnessConfig::default());
        }
        assert_eq!(live_encoders(), 0);
        assert_eq!(record_tracking::live_record_sets(), 0);
        assert_eq!(record_tracking::released_record_sets(), 16);
    }
}
