// src/engine/decoder.rs
//
// Decode harness: drives one PngDecodeSession through transport binding,
// limits, options, every metadata accessor and a one-shot or progressive
// decode, checking the two-call list contracts along the way.

use crate::codecs::records::{Ihdr, Splt, Text, UnknownChunk};
use crate::codecs::{CodecResult, PngDecodeSession};
use crate::engine::api::{HarnessConfig, SessionKind, SessionReport};
use crate::engine::common::{conclude, guarded, rejected, EngineResult, HarnessRng, Step};
use crate::engine::config::ImageConfig;
use crate::engine::io::{file_transport, DecodeTransport, ReadCursor};
use crate::engine::options::{apply_options, choose_options, random_option_count, OptionChoice};
use crate::error::{CodecError, ContractViolation};
use crate::ops::{CodecOption, CrcAction, DecodeFlags, PixelFormat};
use std::fmt::Debug;
use std::fs::File;
use tracing::{debug, info, trace, warn};

/// Output format of every decode session.
pub const DECODE_FORMAT: PixelFormat = PixelFormat::Color8;

/// Random choices of one decode session, drawn before the codec is touched.
#[derive(Debug, Clone)]
pub struct DecodePlan {
    pub transport: DecodeTransport,
    pub discard_crc: bool,
    pub progressive: bool,
    pub flags: DecodeFlags,
    pub options: Vec<OptionChoice>,
}

impl DecodePlan {
    pub fn draw(config: &ImageConfig, rng: &mut HarnessRng) -> Self {
        let transport = if rng.coin() {
            if rng.coin() {
                DecodeTransport::File
            } else {
                DecodeTransport::Stream
            }
        } else {
            DecodeTransport::Buffer
        };
        let discard_crc = rng.coin();
        let progressive = rng.coin();
        let sampled = rng
            .pick(&DecodeFlags::CHOICES)
            .unwrap_or_else(DecodeFlags::empty);
        let count = random_option_count(rng);
        let options = choose_options(rng, count);
        Self {
            transport,
            discard_crc,
            progressive,
            flags: sampled | config.decode_flags(),
            options,
        }
    }
}

/// Run one decode session over `data`.
///
/// Codec rejections and firewall refusals end the session normally and are
/// reported in the outcome; only contract violations and environment failures
/// come back as `Err`.
pub fn run_decode(
    data: &[u8],
    config: &ImageConfig,
    rng: &mut HarnessRng,
    harness: &HarnessConfig,
) -> EngineResult<SessionReport> {
    let plan = DecodePlan::draw(config, rng);
    let mut report = SessionReport::new(SessionKind::Decode, rng.seed(), config);
    report.transport = plan.transport.as_str();
    report.progressive = plan.progressive;
    info!(
        target: "png_harness::decode",
        codec = crate::codecs::version(),
        seed = rng.seed(),
        family = config.feature.family(),
        transport = plan.transport.as_str(),
        progressive = plan.progressive,
        discard_crc = plan.discard_crc,
        flags = ?plan.flags,
        options = plan.options.len(),
        "decode session"
    );

    let file = match plan.transport {
        DecodeTransport::File => Some(file_transport(data)?),
        DecodeTransport::Buffer | DecodeTransport::Stream => None,
    };
    let mut session = PngDecodeSession::new();
    let step = drive(&mut session, data, file, &plan, harness, &mut report);
    report.outcome = conclude(step)?;
    info!(target: "png_harness::decode", outcome = %report.outcome, bytes = report.bytes_out, "decode finished");
    Ok(report)
}

fn drive<'a>(
    session: &mut PngDecodeSession<'a>,
    data: &'a [u8],
    file: Option<File>,
    plan: &DecodePlan,
    harness: &HarnessConfig,
    report: &mut SessionReport,
) -> Step<()> {
    report.options_applied = guarded("setup", || configure(session, data, file, plan, harness))?;

    let size = guarded("size", || {
        session
            .decoded_image_size(DECODE_FORMAT)
            .map_err(rejected("decoded_image_size"))
    })?;
    harness.limits.enforce_buffer(size, "decode")?;
    let mut out = vec![0u8; size];

    let (ihdr, seen) = guarded("metadata", || inspect_metadata(session, harness.max_list_records))?;
    report.records_seen = seen;

    if plan.progressive {
        guarded("progressive decode", || {
            decode_progressive(session, &mut out, plan.flags, &ihdr)
        })?;
    } else {
        guarded("decode", || {
            session
                .decode_image(Some(out.as_mut_slice()), DECODE_FORMAT, plan.flags)
                .map_err(rejected("decode_image"))
        })?;
    }
    report.bytes_out = size;

    // tIME may follow the image data, so it is read once more after decoding.
    match guarded("time", || Ok(session.time()))? {
        Ok(time) => trace!(target: "png_harness::decode", ?time, "time after decode"),
        Err(error) => debug!(target: "png_harness::decode", %error, "time after decode"),
    }
    Ok(())
}

fn configure<'a>(
    session: &mut PngDecodeSession<'a>,
    data: &'a [u8],
    file: Option<File>,
    plan: &DecodePlan,
    harness: &HarnessConfig,
) -> Step<usize> {
    let bound = match (plan.transport, file) {
        (DecodeTransport::File, Some(file)) => session.set_png_file(file),
        (DecodeTransport::Stream, _) => {
            session.set_png_stream(ReadCursor::new(data).into_callback())
        }
        _ => session.set_png_buffer(data),
    };
    bound.map_err(rejected("bind transport"))?;

    let limits = &harness.limits;
    let (width, height) = session.image_limits();
    trace!(target: "png_harness::decode", width, height, "default image limits");
    session
        .set_image_limits(limits.max_width, limits.max_height)
        .map_err(rejected("set_image_limits"))?;
    let (soft, hard) = session.chunk_limits();
    trace!(target: "png_harness::decode", soft, hard, "default chunk limits");
    session
        .set_chunk_limits(limits.chunk_soft, limits.chunk_hard)
        .map_err(rejected("set_chunk_limits"))?;

    let ancillary = if plan.discard_crc {
        CrcAction::Discard
    } else {
        CrcAction::Use
    };
    session
        .set_crc_action(CrcAction::Use, ancillary)
        .map_err(rejected("set_crc_action"))?;

    let applied = apply_options(&plan.options, |option, value| session.set_option(option, value));
    session
        .set_option(CodecOption::KeepUnknownChunks, 1)
        .map_err(rejected("keep_unknown_chunks"))?;
    for option in CodecOption::ALL {
        match session.get_option(option) {
            Ok(value) => trace!(target: "png_harness::decode", option = option.name(), value),
            Err(error) => debug!(target: "png_harness::decode", option = option.name(), %error, "get_option"),
        }
    }
    Ok(applied)
}

/// Query every metadata family. Absence is fine; an accessor error ends the
/// session.
fn inspect_metadata(
    session: &mut PngDecodeSession<'_>,
    capacity: usize,
) -> Step<(Ihdr, usize)> {
    let ihdr = session.ihdr().map_err(rejected("ihdr"))?;
    debug!(
        target: "png_harness::decode",
        width = ihdr.width,
        height = ihdr.height,
        bit_depth = ihdr.bit_depth,
        color_type = ihdr.color_type,
        interlace = ihdr.interlace_method,
        "ihdr"
    );

    let mut seen = 0;
    seen += present("plte", session.plte().map_err(rejected("plte"))?);
    seen += present("trns", session.trns().map_err(rejected("trns"))?);
    seen += present("chrm", session.chrm().map_err(rejected("chrm"))?);
    seen += present("chrm_int", session.chrm_int().map_err(rejected("chrm_int"))?);
    seen += present("gama", session.gama().map_err(rejected("gama"))?);
    seen += present("gama_int", session.gama_int().map_err(rejected("gama_int"))?);
    seen += present("iccp", session.iccp().map_err(rejected("iccp"))?);
    seen += present("sbit", session.sbit().map_err(rejected("sbit"))?);
    seen += present("srgb", session.srgb().map_err(rejected("srgb"))?);
    seen += query_list(session, "text", capacity, PngDecodeSession::text, check_text_records)?;
    seen += present("bkgd", session.bkgd().map_err(rejected("bkgd"))?);
    seen += present("hist", session.hist().map_err(rejected("hist"))?);
    seen += present("phys", session.phys().map_err(rejected("phys"))?);
    seen += query_list(session, "splt", capacity, PngDecodeSession::splt, check_splt_records)?;
    seen += present("time", session.time().map_err(rejected("time"))?);
    seen += query_list(
        session,
        "unknown_chunks",
        capacity,
        PngDecodeSession::unknown_chunks,
        check_unknown_chunks,
    )?;
    seen += present("offs", session.offs().map_err(rejected("offs"))?);
    seen += present("exif", session.exif().map_err(rejected("exif"))?);
    Ok((ihdr, seen))
}

fn present<T: Debug>(family: &'static str, record: Option<T>) -> usize {
    match record {
        Some(record) => {
            trace!(target: "png_harness::decode", family, ?record);
            1
        }
        None => 0,
    }
}

/// Two-call list access: a bounded read into `capacity` slots, then the total
/// count, then a full read when the bounded one came up short. Returns the
/// number of records read.
fn query_list<'a, T: Clone + Default>(
    session: &mut PngDecodeSession<'a>,
    family: &'static str,
    capacity: usize,
    query: impl Fn(&mut PngDecodeSession<'a>, Option<&mut [T]>) -> CodecResult<usize>,
    check: impl Fn(&[T]) -> Result<(), ContractViolation>,
) -> Step<usize> {
    let mut records = vec![T::default(); capacity];
    let bounded = query(session, Some(&mut records)).map_err(rejected(family))?;
    let total = query(session, None).map_err(rejected(family))?;
    check_list_counts(family, bounded, total, capacity)?;

    let mut read = bounded;
    if total > bounded {
        records = vec![T::default(); total];
        read = query(session, Some(&mut records)).map_err(rejected(family))?;
        check_list_counts(family, read, total, total)?;
    }
    records.truncate(read);
    check(&records)?;
    if total > 0 {
        debug!(target: "png_harness::decode", family, bounded, total, "list records");
    }
    Ok(read)
}

fn decode_progressive(
    session: &mut PngDecodeSession<'_>,
    out: &mut [u8],
    flags: DecodeFlags,
    ihdr: &Ihdr,
) -> Step<()> {
    // Both calls are out of sequence here; the codec must refuse or no-op.
    match session.decode_scanline(out) {
        Ok(info) => warn!(target: "png_harness::decode", ?info, "decode_scanline accepted before decode_image"),
        Err(error) => trace!(target: "png_harness::decode", %error, "decode_scanline refused"),
    }
    if let Err(error) = session.decode_chunks() {
        trace!(target: "png_harness::decode", %error, "decode_chunks refused");
    }

    session
        .decode_image(None, DECODE_FORMAT, flags | DecodeFlags::PROGRESSIVE)
        .map_err(rejected("decode_image"))?;

    let stride = out.len() / ihdr.height.max(1) as usize;
    loop {
        let info = match session.row_info() {
            Ok(info) => info,
            Err(CodecError::EndOfImage) => return Ok(()),
            Err(error) => return Err(rejected("row_info")(error)),
        };
        let offset = info.row_num as usize * stride;
        let Some(dest) = out.get_mut(offset..) else {
            return Err(ContractViolation::malformed_record(
                "row",
                info.scanline_idx as usize,
                format!("row {} beyond image height {}", info.row_num, ihdr.height),
            )
            .into());
        };
        session.decode_row(dest).map_err(rejected("decode_row"))?;
    }
}

// =============================================================================
// LIST CONTRACTS
// =============================================================================

/// Keywords and palette names are 1 to 79 bytes.
const MAX_KEYWORD_LEN: usize = 79;

/// A bounded query may write at most its capacity and never more than the
/// total an unbounded query reported.
pub fn check_list_counts(
    family: &'static str,
    written: usize,
    total: usize,
    capacity: usize,
) -> Result<(), ContractViolation> {
    if written > capacity {
        return Err(ContractViolation::CapacityOverrun {
            family,
            written,
            capacity,
        });
    }
    if written > total {
        return Err(ContractViolation::CountRegression {
            family,
            bounded: written,
            total,
        });
    }
    Ok(())
}

pub fn check_text_records(records: &[Text]) -> Result<(), ContractViolation> {
    for (index, text) in records.iter().enumerate() {
        let reason = if text.keyword.is_empty() {
            "empty keyword"
        } else if text.keyword.len() > MAX_KEYWORD_LEN {
            "keyword longer than 79 bytes"
        } else if text.language_tag.is_none() {
            "missing language tag"
        } else if text.translated_keyword.is_none() {
            "missing translated keyword"
        } else {
            match &text.text {
                Some(_) if text.length == 0 => "payload present for zero-length text",
                None if text.length > 0 => "missing text payload",
                Some(body) if body.len() != text.length => "text length disagrees with its payload",
                _ => continue,
            }
        };
        return Err(ContractViolation::malformed_record("text", index, reason));
    }
    Ok(())
}

pub fn check_splt_records(records: &[Splt]) -> Result<(), ContractViolation> {
    for (index, splt) in records.iter().enumerate() {
        let reason = match &splt.entries {
            _ if splt.name.is_empty() => "empty palette name",
            _ if splt.name.len() > MAX_KEYWORD_LEN => "palette name longer than 79 bytes",
            Some(_) if splt.n_entries == 0 => "entries present for an empty palette",
            None if splt.n_entries > 0 => "missing entries",
            Some(entries) if entries.len() != splt.n_entries as usize => {
                "entry count disagrees with the entries"
            }
            _ => continue,
        };
        return Err(ContractViolation::malformed_record("splt", index, reason));
    }
    Ok(())
}

pub fn check_unknown_chunks(records: &[UnknownChunk]) -> Result<(), ContractViolation> {
    for (index, chunk) in records.iter().enumerate() {
        let reason = match &chunk.data {
            Some(_) if chunk.length == 0 => "payload present for a zero-length chunk",
            None if chunk.length > 0 => "missing payload",
            Some(data) if data.len() != chunk.length => "length disagrees with the payload",
            _ => continue,
        };
        return Err(ContractViolation::malformed_record("unknown_chunks", index, reason));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::records::SpltEntry;
    use crate::codecs::tracking::{enable_drop_tracking, live_decoders};
    use crate::engine::api::SessionOutcome;
    use crate::engine::namer::{FeatureCode, NamingScheme};
    use image::{DynamicImage, ImageFormat, RgbaImage};
    use std::io::Cursor;

    fn fixture(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| image::Rgba([x as u8, y as u8, 9, 255]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn config() -> ImageConfig {
        let mut rng = HarnessRng::from_seed(0);
        ImageConfig::from_code(&FeatureCode::derive("basn6a08", NamingScheme::Plain), &mut rng)
    }

    fn text(keyword: &[u8], body: Option<&[u8]>) -> Text {
        Text {
            keyword: keyword.to_vec(),
            language_tag: Some(Vec::new()),
            translated_keyword: Some(Vec::new()),
            length: body.map_or(0, <[u8]>::len),
            text: body.map(<[u8]>::to_vec),
            ..Text::default()
        }
    }

    #[test]
    fn test_list_count_contract() {
        assert!(check_list_counts("text", 2, 4, 2).is_ok());
        assert_eq!(
            check_list_counts("text", 3, 4, 2),
            Err(ContractViolation::CapacityOverrun { family: "text", written: 3, capacity: 2 })
        );
        assert_eq!(
            check_list_counts("splt", 5, 4, 8),
            Err(ContractViolation::CountRegression { family: "splt", bounded: 5, total: 4 })
        );
    }

    #[test]
    fn test_text_record_contract() {
        assert!(check_text_records(&[text(b"Title", Some(b"x")), text(b"Empty", None)]).is_ok());
        assert!(check_text_records(&[text(b"", Some(b"x"))]).is_err());
        assert!(check_text_records(&[text(&[b'k'; 80], Some(b"x"))]).is_err());
        let mut no_tag = text(b"Title", None);
        no_tag.language_tag = None;
        let err = check_text_records(&[text(b"ok", None), no_tag]).unwrap_err();
        assert!(matches!(err, ContractViolation::MalformedRecord { index: 1, .. }));
        let mut short = text(b"Title", Some(b"abc"));
        short.length = 5;
        assert!(check_text_records(&[short]).is_err());
    }

    #[test]
    fn test_text_payload_present_exactly_when_length_nonzero() {
        let with_len = |length, body: Option<&[u8]>| Text {
            length,
            ..text(b"Title", body)
        };
        assert!(check_text_records(&[with_len(0, None)]).is_ok());
        assert!(check_text_records(&[with_len(3, Some(b"abc"))]).is_ok());
        let stray = check_text_records(&[with_len(0, Some(b""))]).unwrap_err();
        assert!(matches!(stray, ContractViolation::MalformedRecord { family: "text", index: 0, .. }));
        assert!(check_text_records(&[with_len(4, None)]).is_err());
    }

    #[test]
    fn test_splt_entries_present_exactly_when_count_nonzero() {
        let splt = |n_entries, entries: Option<Vec<SpltEntry>>| Splt {
            name: b"pal".to_vec(),
            sample_depth: 8,
            n_entries,
            entries,
        };
        assert!(check_splt_records(&[splt(0, None)]).is_ok());
        assert!(check_splt_records(&[splt(2, Some(vec![SpltEntry::default(); 2]))]).is_ok());
        let stray = check_splt_records(&[splt(0, Some(Vec::new()))]).unwrap_err();
        assert!(matches!(stray, ContractViolation::MalformedRecord { family: "splt", index: 0, .. }));
        assert!(check_splt_records(&[splt(1, None)]).is_err());
    }

    #[test]
    fn test_splt_and_unknown_contracts() {
        let good = Splt {
            name: b"pal".to_vec(),
            sample_depth: 8,
            n_entries: 1,
            entries: Some(vec![SpltEntry::default()]),
        };
        assert!(check_splt_records(std::slice::from_ref(&good)).is_ok());
        let unnamed = Splt { name: Vec::new(), ..good.clone() };
        assert!(check_splt_records(&[unnamed]).is_err());
        let missing = Splt { entries: None, ..good.clone() };
        assert!(check_splt_records(&[missing]).is_err());
        let miscounted = Splt { n_entries: 2, ..good.clone() };
        assert!(check_splt_records(&[miscounted]).is_err());

        let chunk = UnknownChunk {
            chunk_type: *b"prVt",
            location: 1,
            length: 2,
            data: Some(vec![1, 2]),
        };
        assert!(check_unknown_chunks(std::slice::from_ref(&chunk)).is_ok());
        let missing = UnknownChunk { data: None, ..chunk.clone() };
        assert!(check_unknown_chunks(&[missing]).is_err());
        let stray = UnknownChunk { length: 0, ..chunk };
        assert!(check_unknown_chunks(&[stray]).is_err());
    }

    #[test]
    fn test_valid_png_never_violates_contracts() {
        let data = fixture(9, 7);
        let harness = HarnessConfig::default();
        let mut completed = 0;
        for seed in 0..32 {
            let mut rng = HarnessRng::from_seed(seed);
            let report = run_decode(&data, &config(), &mut rng, &harness).unwrap();
            if matches!(report.outcome, SessionOutcome::Completed) {
                assert_eq!(report.bytes_out, 9 * 7 * 4);
                completed += 1;
            }
        }
        assert!(completed > 0);
    }

    #[test]
    fn test_truncated_png_is_rejected_not_fatal() {
        let data = fixture(16, 16);
        let truncated = &data[..data.len() / 2];
        for seed in 0..8 {
            let mut rng = HarnessRng::from_seed(seed);
            let report = run_decode(truncated, &config(), &mut rng, &HarnessConfig::default()).unwrap();
            assert!(!matches!(report.outcome, SessionOutcome::Completed));
        }
    }

    #[test]
    fn test_session_released_on_every_path() {
        let _guard = enable_drop_tracking();
        let data = fixture(4, 4);
        for seed in 0..8 {
            let mut rng = HarnessRng::from_seed(seed);
            let _ = run_decode(&data[..seed as usize * 8], &config(), &mut rng, &HarnessConfig::default());
            let _ = run_decode(&data, &config(), &mut rng, &HarnessConfig::default());
        }
        assert_eq!(live_decoders(), 0);
    }
}
