// src/codecs/encoder.rs
//
// Encode session. Records are validated when they are set and written when the
// image is encoded; the png crate writes the header block (IHDR, pHYs, PLTE, tRNS,
// gAMA, cHRM, text) and this module adds the remaining ancillary chunks around
// the image data.

use crate::codecs::options::OptionTable;
use crate::codecs::records::{
    scaled_from_float, Bkgd, Chrm, ChrmInt, Exif, Hist, Iccp, Ihdr, Offs, Phys, Plte, Sbit, Splt,
    Text, TextKind, Time, Trns, UnknownChunk, PNG_U31_MAX,
};
use crate::codecs::{
    track_created, track_released, BufferRetrieval, CodecResult, RowCursor, RowInfo, Sink,
    Tracked, WriteCallback, DEFAULT_IMAGE_LIMIT,
};
use crate::error::CodecError;
use crate::ops::{ChunkLocation, CodecOption, ContextRole, EncodeFlags, PixelFormat};
use png::chunk::ChunkType;
use std::io::Write;
use tracing::debug;

#[derive(Debug, Default)]
struct StoredRecords {
    ihdr: Option<Ihdr>,
    plte: Option<Plte>,
    trns: Option<Trns>,
    chrm: Option<ChrmInt>,
    gama: Option<u32>,
    iccp: Option<Iccp>,
    sbit: Option<Sbit>,
    srgb: Option<u8>,
    text: Vec<Text>,
    bkgd: Option<Bkgd>,
    hist: Option<Hist>,
    phys: Option<Phys>,
    splt: Vec<Splt>,
    time: Option<Time>,
    unknown: Vec<UnknownChunk>,
    offs: Option<Offs>,
    exif: Option<Exif>,
}

impl StoredRecords {
    fn ancillary_count(&self) -> usize {
        let singles = [
            self.trns.is_some(),
            self.chrm.is_some(),
            self.gama.is_some(),
            self.iccp.is_some(),
            self.sbit.is_some(),
            self.srgb.is_some(),
            self.bkgd.is_some(),
            self.hist.is_some(),
            self.phys.is_some(),
            self.time.is_some(),
            self.offs.is_some(),
            self.exif.is_some(),
        ];
        singles.iter().filter(|set| **set).count()
            + self.text.len()
            + self.splt.len()
            + self.unknown.len()
    }

    fn palette_len(&self) -> Option<usize> {
        self.plte.as_ref().map(|p| p.entries.len())
    }
}

struct ProgressiveEncode {
    cursor: RowCursor,
    row_len: usize,
    total: usize,
    pixels: Vec<u8>,
    pending: Option<RowInfo>,
}

enum Stage {
    Idle,
    Progressive(ProgressiveEncode),
    Written,
    Finalized,
    Invalid,
}

/// An encoder context producing one PNG stream.
pub struct PngEncodeSession<'a> {
    sink: Option<Sink<'a>>,
    options: OptionTable,
    image_limits: (u32, u32),
    records: StoredRecords,
    stage: Stage,
    finalize: bool,
}

impl<'a> PngEncodeSession<'a> {
    pub fn new() -> Self {
        track_created(Tracked::Encoder);
        Self {
            sink: None,
            options: OptionTable::new(ContextRole::Encoder),
            image_limits: (DEFAULT_IMAGE_LIMIT, DEFAULT_IMAGE_LIMIT),
            records: StoredRecords::default(),
            stage: Stage::Idle,
            finalize: false,
        }
    }

    pub fn role(&self) -> ContextRole {
        ContextRole::Encoder
    }

    fn require_idle(&self, operation: &'static str) -> CodecResult<()> {
        match self.stage {
            Stage::Idle => Ok(()),
            _ => Err(CodecError::operation_state(operation)),
        }
    }

    fn header(&self, name: &'static str) -> CodecResult<Ihdr> {
        self.records
            .ihdr
            .ok_or_else(|| CodecError::invalid_argument(name, "no header set"))
    }

    pub fn set_png_stream(&mut self, callback: WriteCallback<'a>) -> CodecResult<()> {
        self.require_idle("set_png_stream")?;
        if self.sink.is_some() || self.options.flag(CodecOption::EncodeToBuffer) {
            return Err(CodecError::TransportAlreadyBound);
        }
        self.sink = Some(Sink::Stream(callback));
        Ok(())
    }

    pub fn set_option(&mut self, option: CodecOption, value: i32) -> CodecResult<()> {
        if option == CodecOption::EncodeToBuffer {
            self.require_idle("set_option(encode_to_buffer)")?;
            if value != 0 && self.sink.is_some() {
                return Err(CodecError::TransportAlreadyBound);
            }
        }
        self.options.set(option, value)
    }

    pub fn get_option(&self, option: CodecOption) -> CodecResult<i32> {
        Ok(self.options.get(option))
    }

    pub fn set_image_limits(&mut self, width: u32, height: u32) -> CodecResult<()> {
        if width > PNG_U31_MAX || height > PNG_U31_MAX {
            return Err(CodecError::invalid_argument("image_limits", "limit above 2^31-1"));
        }
        self.image_limits = (width, height);
        Ok(())
    }

    pub fn image_limits(&self) -> (u32, u32) {
        self.image_limits
    }

    // ---- record setters --------------------------------------------------

    pub fn set_ihdr(&mut self, ihdr: &Ihdr) -> CodecResult<()> {
        self.require_idle("set_ihdr")?;
        ihdr.validate()?;
        let (max_width, max_height) = self.image_limits;
        if ihdr.width > max_width || ihdr.height > max_height {
            return Err(CodecError::ImageLimits {
                width: ihdr.width,
                height: ihdr.height,
                max_width,
                max_height,
            });
        }
        self.records.ihdr = Some(*ihdr);
        Ok(())
    }

    pub fn set_plte(&mut self, plte: &Plte) -> CodecResult<()> {
        self.require_idle("set_plte")?;
        plte.validate(&self.header("plte")?)?;
        self.records.plte = Some(plte.clone());
        Ok(())
    }

    pub fn set_trns(&mut self, trns: &Trns) -> CodecResult<()> {
        self.require_idle("set_trns")?;
        trns.validate(&self.header("trns")?, self.records.palette_len())?;
        self.records.trns = Some(trns.clone());
        Ok(())
    }

    pub fn set_chrm(&mut self, chrm: &Chrm) -> CodecResult<()> {
        self.require_idle("set_chrm")?;
        self.records.chrm = Some(chrm.to_fixed()?);
        Ok(())
    }

    pub fn set_chrm_int(&mut self, chrm: &ChrmInt) -> CodecResult<()> {
        self.require_idle("set_chrm_int")?;
        chrm.validate()?;
        self.records.chrm = Some(*chrm);
        Ok(())
    }

    pub fn set_gama(&mut self, gamma: f64) -> CodecResult<()> {
        self.require_idle("set_gama")?;
        let scaled = scaled_from_float(gamma, "gama")?;
        self.set_gama_int(scaled)
    }

    pub fn set_gama_int(&mut self, gamma: u32) -> CodecResult<()> {
        self.require_idle("set_gama_int")?;
        if gamma == 0 || gamma > PNG_U31_MAX {
            return Err(CodecError::invalid_argument("gama", "must lie in 1..=2^31-1"));
        }
        self.records.gama = Some(gamma);
        Ok(())
    }

    pub fn set_iccp(&mut self, iccp: &Iccp) -> CodecResult<()> {
        self.require_idle("set_iccp")?;
        iccp.validate()?;
        self.records.iccp = Some(iccp.clone());
        Ok(())
    }

    pub fn set_sbit(&mut self, sbit: &Sbit) -> CodecResult<()> {
        self.require_idle("set_sbit")?;
        sbit.validate(&self.header("sbit")?)?;
        self.records.sbit = Some(*sbit);
        Ok(())
    }

    pub fn set_srgb(&mut self, rendering_intent: u8) -> CodecResult<()> {
        self.require_idle("set_srgb")?;
        if rendering_intent > 3 {
            return Err(CodecError::invalid_argument("srgb", "rendering intent must be 0..=3"));
        }
        self.records.srgb = Some(rendering_intent);
        Ok(())
    }

    /// Replace the stored text records. All records must be valid.
    pub fn set_text(&mut self, text: &[Text]) -> CodecResult<()> {
        self.require_idle("set_text")?;
        for record in text {
            record.prepare()?;
        }
        self.records.text = text.to_vec();
        Ok(())
    }

    pub fn set_bkgd(&mut self, bkgd: &Bkgd) -> CodecResult<()> {
        self.require_idle("set_bkgd")?;
        bkgd.validate(&self.header("bkgd")?, self.records.palette_len())?;
        self.records.bkgd = Some(*bkgd);
        Ok(())
    }

    pub fn set_hist(&mut self, hist: &Hist) -> CodecResult<()> {
        self.require_idle("set_hist")?;
        hist.validate(self.records.palette_len())?;
        self.records.hist = Some(hist.clone());
        Ok(())
    }

    pub fn set_phys(&mut self, phys: &Phys) -> CodecResult<()> {
        self.require_idle("set_phys")?;
        phys.validate()?;
        self.records.phys = Some(*phys);
        Ok(())
    }

    /// Replace the stored suggested palettes. Names must be unique.
    pub fn set_splt(&mut self, splt: &[Splt]) -> CodecResult<()> {
        self.require_idle("set_splt")?;
        for (i, palette) in splt.iter().enumerate() {
            palette.validate()?;
            if splt[..i].iter().any(|other| other.name == palette.name) {
                return Err(CodecError::invalid_argument("splt", "duplicate palette name"));
            }
        }
        self.records.splt = splt.to_vec();
        Ok(())
    }

    pub fn set_time(&mut self, time: &Time) -> CodecResult<()> {
        self.require_idle("set_time")?;
        time.validate()?;
        self.records.time = Some(*time);
        Ok(())
    }

    pub fn set_unknown_chunks(&mut self, chunks: &[UnknownChunk]) -> CodecResult<()> {
        self.require_idle("set_unknown_chunks")?;
        for chunk in chunks {
            chunk.validate()?;
        }
        self.records.unknown = chunks.to_vec();
        Ok(())
    }

    pub fn set_offs(&mut self, offs: &Offs) -> CodecResult<()> {
        self.require_idle("set_offs")?;
        offs.validate()?;
        self.records.offs = Some(*offs);
        Ok(())
    }

    pub fn set_exif(&mut self, exif: &Exif) -> CodecResult<()> {
        self.require_idle("set_exif")?;
        exif.validate()?;
        self.records.exif = Some(exif.clone());
        Ok(())
    }

    // ---- pixel data ------------------------------------------------------

    /// Encode `image` in one shot, or start a progressive encode when `flags`
    /// contains `PROGRESSIVE` (rows then arrive through [`Self::encode_row`]).
    pub fn encode_image(
        &mut self,
        image: Option<&[u8]>,
        format: PixelFormat,
        flags: EncodeFlags,
    ) -> CodecResult<()> {
        self.require_idle("encode_image")?;
        let ihdr = self
            .records
            .ihdr
            .ok_or_else(|| CodecError::operation_state("encode_image"))?;
        if !format.is_encodable() {
            return Err(CodecError::unsupported(format!(
                "encoding from {} pixels",
                format.as_str()
            )));
        }
        if self.sink.is_none() {
            if self.options.flag(CodecOption::EncodeToBuffer) {
                self.sink = Some(Sink::Buffer(Vec::new()));
            } else {
                return Err(CodecError::NoTransport);
            }
        }
        let stored = self.records.ancillary_count();
        if stored > self.options.chunk_count_limit() {
            return Err(CodecError::chunk_limits(format!(
                "{stored} ancillary records exceed the chunk count limit"
            )));
        }
        let row_len = ihdr
            .row_bytes(ihdr.width)
            .ok_or_else(|| CodecError::invalid_argument("ihdr", "row size overflows"))?;
        let total = ihdr
            .image_bytes()
            .ok_or_else(|| CodecError::invalid_argument("ihdr", "image size overflows"))?;
        self.finalize = flags.contains(EncodeFlags::FINALIZE);
        debug!(target: "png_harness::codec", ?flags, total, "encode_image");

        if flags.contains(EncodeFlags::PROGRESSIVE) {
            self.stage = Stage::Progressive(ProgressiveEncode {
                cursor: RowCursor::new(ihdr.width, ihdr.height, false),
                row_len,
                total,
                pixels: Vec::new(),
                pending: None,
            });
            return Ok(());
        }

        let image = image.ok_or_else(|| {
            CodecError::invalid_argument("encode_image", "no image for a one-shot encode")
        })?;
        if image.len() < total {
            return Err(CodecError::BufferTooSmall {
                needed: total,
                actual: image.len(),
            });
        }
        self.write(&image[..total], None)
    }

    fn write(&mut self, pixels: &[u8], progressive_row_len: Option<usize>) -> CodecResult<()> {
        let result = match self.sink.as_mut() {
            Some(sink) => write_stream(sink, &self.records, &self.options, pixels, progressive_row_len),
            None => Err(CodecError::NoTransport),
        };
        match result {
            Ok(()) => {
                self.stage = if self.finalize {
                    Stage::Finalized
                } else {
                    Stage::Written
                };
                Ok(())
            }
            Err(err) => {
                self.stage = Stage::Invalid;
                Err(err)
            }
        }
    }

    /// Descriptor of the next row a progressive encode expects.
    pub fn row_info(&mut self) -> CodecResult<RowInfo> {
        let progressive = match &mut self.stage {
            Stage::Progressive(progressive) => progressive,
            Stage::Written | Stage::Finalized => return Err(CodecError::EndOfImage),
            Stage::Idle | Stage::Invalid => return Err(CodecError::operation_state("row_info")),
        };
        if let Some(info) = progressive.pending {
            return Ok(info);
        }
        let (scanline_idx, row_num, pass, _) = progressive
            .cursor
            .next_row()
            .ok_or(CodecError::EndOfImage)?;
        let info = RowInfo {
            scanline_idx,
            row_num,
            pass,
            len: progressive.row_len,
        };
        progressive.pending = Some(info);
        Ok(info)
    }

    /// Supply the next row; the stream is written once the last row arrives.
    pub fn encode_row(&mut self, row: &[u8]) -> CodecResult<()> {
        let info = self.row_info()?;
        if row.len() < info.len {
            return Err(CodecError::BufferTooSmall {
                needed: info.len,
                actual: row.len(),
            });
        }
        let Stage::Progressive(progressive) = &mut self.stage else {
            return Err(CodecError::operation_state("encode_row"));
        };
        progressive.pixels.extend_from_slice(&row[..info.len]);
        progressive.pending = None;
        if progressive.pixels.len() < progressive.total {
            return Ok(());
        }
        let Stage::Progressive(done) = std::mem::replace(&mut self.stage, Stage::Invalid) else {
            return Err(CodecError::operation_state("encode_row"));
        };
        self.write(&done.pixels, Some(done.row_len))
    }

    /// Raw scanline entry point; only valid during a progressive encode.
    pub fn encode_scanline(&mut self, row: &[u8]) -> CodecResult<()> {
        if !matches!(self.stage, Stage::Progressive(_)) {
            return Err(CodecError::operation_state("encode_scanline"));
        }
        self.encode_row(row)
    }

    /// Flush pending chunks. Completes a stream written without `FINALIZE`.
    pub fn encode_chunks(&mut self) -> CodecResult<()> {
        match self.stage {
            Stage::Idle | Stage::Invalid => Err(CodecError::operation_state("encode_chunks")),
            Stage::Progressive(_) | Stage::Finalized => Ok(()),
            Stage::Written => {
                self.stage = Stage::Finalized;
                Ok(())
            }
        }
    }

    /// Hand over the in-memory output of an encode-to-buffer session.
    pub fn png_buffer(&mut self) -> BufferRetrieval {
        if !self.options.flag(CodecOption::EncodeToBuffer) {
            return BufferRetrieval::failed(CodecError::operation_state("png_buffer"));
        }
        if !matches!(self.stage, Stage::Finalized) {
            return BufferRetrieval::failed(CodecError::operation_state("png_buffer"));
        }
        match self.sink.take() {
            Some(Sink::Buffer(buffer)) => BufferRetrieval {
                size: buffer.len(),
                buffer: Some(buffer),
                error: None,
            },
            other => {
                self.sink = other;
                BufferRetrieval::failed(CodecError::operation_state("png_buffer"))
            }
        }
    }
}

impl Default for PngEncodeSession<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PngEncodeSession<'_> {
    fn drop(&mut self) {
        track_released(Tracked::Encoder);
    }
}

fn write_unknown<W: Write>(
    writer: &mut png::Writer<W>,
    chunks: &[UnknownChunk],
    location: ChunkLocation,
) -> CodecResult<()> {
    for chunk in chunks.iter().filter(|c| c.location == location as u8) {
        writer.write_chunk(ChunkType(chunk.chunk_type), chunk.body())?;
    }
    Ok(())
}

fn write_stream<W: Write>(
    out: W,
    records: &StoredRecords,
    options: &OptionTable,
    pixels: &[u8],
    progressive_row_len: Option<usize>,
) -> CodecResult<()> {
    let ihdr = records
        .ihdr
        .ok_or_else(|| CodecError::operation_state("encode_image"))?;
    let color = png::ColorType::from_u8(ihdr.color_type)
        .ok_or_else(|| CodecError::invalid_argument("ihdr", "color type"))?;
    let depth = png::BitDepth::from_u8(ihdr.bit_depth)
        .ok_or_else(|| CodecError::invalid_argument("ihdr", "bit depth"))?;

    let mut encoder = png::Encoder::new(out, ihdr.width, ihdr.height);
    encoder.set_color(color);
    encoder.set_depth(depth);
    encoder.set_compression(options.image_compression());
    let (filter, adaptive) = options.filter_choice().to_png();
    encoder.set_filter(filter);
    encoder.set_adaptive_filter(adaptive);

    if let Some(plte) = &records.plte {
        encoder.set_palette(plte.to_body());
    }
    if let Some(trns) = &records.trns {
        encoder.set_trns(trns.to_body(ihdr.color_type));
    }
    if let Some(gamma) = records.gama {
        encoder.set_source_gamma(png::ScaledFloat::from_scaled(gamma));
    }
    if let Some(c) = records.chrm {
        let pair = |x: u32, y: u32| (png::ScaledFloat::from_scaled(x), png::ScaledFloat::from_scaled(y));
        encoder.set_source_chromaticities(png::SourceChromaticities {
            white: pair(c.white_point_x, c.white_point_y),
            red: pair(c.red_x, c.red_y),
            green: pair(c.green_x, c.green_y),
            blue: pair(c.blue_x, c.blue_y),
        });
    }
    if let Some(phys) = records.phys {
        encoder.set_pixel_dims(Some(png::PixelDimensions {
            xppu: phys.ppu_x,
            yppu: phys.ppu_y,
            unit: if phys.unit_specifier == 1 {
                png::Unit::Meter
            } else {
                png::Unit::Unspecified
            },
        }));
    }
    for record in &records.text {
        let text = record.prepare()?;
        match text.kind {
            TextKind::Text => encoder.add_text_chunk(text.keyword, text.text)?,
            TextKind::Ztxt => encoder.add_ztxt_chunk(text.keyword, text.text)?,
            TextKind::Itxt => encoder.add_itxt_chunk(text.keyword, text.text)?,
        }
    }

    let mut writer = encoder.write_header()?;

    if let Some(sbit) = &records.sbit {
        writer.write_chunk(ChunkType(*b"sBIT"), &sbit.to_body(ihdr.color_type))?;
    }
    if let Some(intent) = records.srgb {
        writer.write_chunk(ChunkType(*b"sRGB"), &[intent])?;
    }
    if let Some(iccp) = &records.iccp {
        writer.write_chunk(ChunkType(*b"iCCP"), &iccp.to_body(options.text_compression())?)?;
    }
    write_unknown(&mut writer, &records.unknown, ChunkLocation::AfterIhdr)?;

    if let Some(bkgd) = &records.bkgd {
        writer.write_chunk(ChunkType(*b"bKGD"), &bkgd.to_body(ihdr.color_type))?;
    }
    if let (Some(hist), Some(palette_len)) = (&records.hist, records.palette_len()) {
        writer.write_chunk(ChunkType(*b"hIST"), &hist.to_body(palette_len))?;
    }
    write_unknown(&mut writer, &records.unknown, ChunkLocation::AfterPlte)?;

    for splt in &records.splt {
        writer.write_chunk(ChunkType(*b"sPLT"), &splt.to_body()?)?;
    }
    if let Some(offs) = &records.offs {
        writer.write_chunk(ChunkType(*b"oFFs"), &offs.to_body())?;
    }
    if let Some(exif) = &records.exif {
        writer.write_chunk(ChunkType(*b"eXIf"), exif.validate()?)?;
    }
    if let Some(time) = &records.time {
        writer.write_chunk(ChunkType(*b"tIME"), &time.to_body())?;
    }

    match progressive_row_len {
        Some(row_len) if row_len > 0 => {
            let mut stream = writer.stream_writer()?;
            for row in pixels.chunks(row_len) {
                stream.write_all(row)?;
            }
            stream.finish()?;
        }
        _ => writer.write_image_data(pixels)?,
    }

    write_unknown(&mut writer, &records.unknown, ChunkLocation::AfterIdat)?;
    writer.finish()?;
    Ok(())
}
