// src/codecs/decoder.rs
//
// Decode session: a png::Decoder/Reader pair behind the two-call metadata API,
// transport binding, limits, CRC policy and progressive row access.

use crate::codecs::chunks::{ChunkDirectory, ScanPolicy};
use crate::codecs::options::OptionTable;
use crate::codecs::records::{
    string_to_latin1, Bkgd, Chrm, ChrmInt, Exif, Hist, Iccp, Ihdr, Offs, Phys,
    Plte, Sbit, Splt, Text, TextKind, Time, Trns, UnknownChunk, PNG_U31_MAX,
};
use crate::codecs::{
    expand_pass_row, track_created, track_released, CallbackReader, CodecResult, ReadCallback,
    RowCursor, RowInfo, TeeReader, Tracked, DEFAULT_IMAGE_LIMIT,
};
use crate::error::CodecError;
use crate::ops::{CodecOption, ContextRole, CrcAction, DecodeFlags, PixelFormat};
use std::cell::RefCell;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::rc::Rc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Created,
    HeaderRead,
    Progressive,
    Decoded,
    Invalid,
}

struct Progressive {
    cursor: RowCursor,
    interlaced: bool,
    bits_per_pixel: usize,
    row_bytes: usize,
    /// Fetched row, its width in pixels and the pass bytes png returned.
    pending: Option<(RowInfo, u32, Vec<u8>)>,
}

/// A decoder context over one PNG stream.
///
/// The stream is opened lazily: the first call that needs header data reads the
/// signature and every chunk up to the first IDAT.
pub struct PngDecodeSession<'a> {
    transport: Option<Box<dyn Read + 'a>>,
    transport_bound: bool,
    options: OptionTable,
    image_limits: (u32, u32),
    chunk_limits: (usize, usize),
    crc: (CrcAction, CrcAction),
    seen: Rc<RefCell<Vec<u8>>>,
    reader: Option<png::Reader<TeeReader<'a>>>,
    format: PixelFormat,
    directory: ChunkDirectory,
    stage: Stage,
    progressive: Option<Progressive>,
}

impl<'a> PngDecodeSession<'a> {
    pub fn new() -> Self {
        track_created(Tracked::Decoder);
        Self {
            transport: None,
            transport_bound: false,
            options: OptionTable::new(ContextRole::Decoder),
            image_limits: (DEFAULT_IMAGE_LIMIT, DEFAULT_IMAGE_LIMIT),
            chunk_limits: (usize::MAX, usize::MAX),
            crc: (CrcAction::Error, CrcAction::Error),
            seen: Rc::new(RefCell::new(Vec::new())),
            reader: None,
            format: PixelFormat::Png,
            directory: ChunkDirectory::default(),
            stage: Stage::Created,
            progressive: None,
        }
    }

    pub fn role(&self) -> ContextRole {
        ContextRole::Decoder
    }

    // ---- transport -------------------------------------------------------

    pub fn set_png_buffer(&mut self, data: &'a [u8]) -> CodecResult<()> {
        self.bind(Box::new(Cursor::new(data)))
    }

    pub fn set_png_stream(&mut self, callback: ReadCallback<'a>) -> CodecResult<()> {
        self.bind(Box::new(CallbackReader(callback)))
    }

    pub fn set_png_file(&mut self, file: File) -> CodecResult<()> {
        self.bind(Box::new(BufReader::new(file)))
    }

    fn bind(&mut self, source: Box<dyn Read + 'a>) -> CodecResult<()> {
        if self.transport_bound {
            return Err(CodecError::TransportAlreadyBound);
        }
        self.transport = Some(source);
        self.transport_bound = true;
        Ok(())
    }

    // ---- limits, CRC policy, options -------------------------------------

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

    pub fn set_chunk_limits(&mut self, chunk_size: usize, cache_size: usize) -> CodecResult<()> {
        self.chunk_limits = (chunk_size, cache_size);
        Ok(())
    }

    pub fn chunk_limits(&self) -> (usize, usize) {
        self.chunk_limits
    }

    pub fn set_crc_action(&mut self, critical: CrcAction, ancillary: CrcAction) -> CodecResult<()> {
        if critical == CrcAction::Discard {
            return Err(CodecError::invalid_argument(
                "crc_action",
                "critical chunks cannot be discarded",
            ));
        }
        self.crc = (critical, ancillary);
        Ok(())
    }

    pub fn set_option(&mut self, option: CodecOption, value: i32) -> CodecResult<()> {
        self.options.set(option, value)
    }

    pub fn get_option(&self, option: CodecOption) -> CodecResult<i32> {
        Ok(self.options.get(option))
    }

    // ---- stream state ----------------------------------------------------

    fn fail<T>(&mut self, err: CodecError) -> CodecResult<T> {
        self.stage = Stage::Invalid;
        Err(err)
    }

    fn ensure_open(&mut self, format: PixelFormat) -> CodecResult<()> {
        match self.stage {
            Stage::Invalid => return Err(CodecError::operation_state("decode")),
            Stage::Created => {}
            _ if format == self.format => return Ok(()),
            _ => {
                return Err(CodecError::unsupported(format!(
                    "session is already decoding as {}",
                    self.format.as_str()
                )))
            }
        }
        let source = self.transport.take().ok_or(CodecError::NoTransport)?;

        let mut options = png::DecodeOptions::default();
        options.set_ignore_crc(self.crc != (CrcAction::Error, CrcAction::Error));
        options.set_ignore_adler32(true);
        let mut decoder = png::Decoder::new_with_options(
            TeeReader::new(source, Rc::clone(&self.seen)),
            options,
        );
        decoder.set_limits(png::Limits {
            bytes: self.chunk_limits.1,
        });
        decoder.set_transformations(format.transformations());

        let reader = match decoder.read_info() {
            Ok(reader) => reader,
            Err(err) => return self.fail(err.into()),
        };
        let (width, height) = (reader.info().width, reader.info().height);
        let (max_width, max_height) = self.image_limits;
        if width > max_width || height > max_height {
            return self.fail(CodecError::ImageLimits {
                width,
                height,
                max_width,
                max_height,
            });
        }
        debug!(target: "png_harness::codec", width, height, format = format.as_str(), "header read");
        self.reader = Some(reader);
        self.format = format;
        self.stage = Stage::HeaderRead;
        self.rescan()
    }

    fn rescan(&mut self) -> CodecResult<()> {
        let policy = ScanPolicy {
            crc_critical: self.crc.0,
            crc_ancillary: self.crc.1,
            chunk_size_limit: self.chunk_limits.0,
            cache_limit: self.chunk_limits.1,
            chunk_count_limit: self.options.chunk_count_limit(),
            keep_unknown: self.options.flag(CodecOption::KeepUnknownChunks),
        };
        let scanned = ChunkDirectory::scan(&self.seen.borrow(), &policy);
        match scanned {
            Ok(directory) => {
                self.directory = directory;
                Ok(())
            }
            Err(err) => self.fail(err),
        }
    }

    fn reader_mut(&mut self) -> CodecResult<&mut png::Reader<TeeReader<'a>>> {
        self.reader
            .as_mut()
            .ok_or_else(|| CodecError::operation_state("decode"))
    }

    fn with_info<T>(&mut self, f: impl FnOnce(&png::Info<'_>) -> T) -> CodecResult<T> {
        if self.stage == Stage::Invalid {
            return Err(CodecError::operation_state("metadata"));
        }
        self.ensure_open(self.format)?;
        let reader = self.reader_mut()?;
        Ok(f(reader.info()))
    }

    /// Read trailing chunks after the image data and refresh the directory.
    fn complete(&mut self) -> CodecResult<()> {
        if let Some(reader) = self.reader.as_mut() {
            if let Err(err) = reader.finish() {
                debug!(target: "png_harness::codec", error = %err, "trailing chunks unreadable");
            }
        }
        self.progressive = None;
        self.stage = Stage::Decoded;
        self.rescan()
    }

    // ---- pixel data ------------------------------------------------------

    /// Exact output size for `format`; opens the stream in that format.
    pub fn decoded_image_size(&mut self, format: PixelFormat) -> CodecResult<usize> {
        self.ensure_open(format)?;
        Ok(self.reader_mut()?.output_buffer_size())
    }

    /// One-shot decode into `out`, or start a progressive decode when
    /// `flags` contains `PROGRESSIVE` (then `out` is ignored).
    pub fn decode_image(
        &mut self,
        out: Option<&mut [u8]>,
        format: PixelFormat,
        flags: DecodeFlags,
    ) -> CodecResult<()> {
        self.ensure_open(format)?;
        if self.stage != Stage::HeaderRead {
            return Err(CodecError::operation_state("decode_image"));
        }
        debug!(target: "png_harness::codec", ?flags, format = format.as_str(), "decode_image");

        if flags.contains(DecodeFlags::PROGRESSIVE) {
            let (width, height, interlaced) = self.with_info(|i| (i.width, i.height, i.interlaced))?;
            let reader = self.reader_mut()?;
            let (color_type, bit_depth) = reader.output_color_type();
            let bits_per_pixel = color_type.samples() * bit_depth as usize;
            let row_bytes = reader.output_line_size(width);
            self.progressive = Some(Progressive {
                cursor: RowCursor::new(width, height, interlaced),
                interlaced,
                bits_per_pixel,
                row_bytes,
                pending: None,
            });
            self.stage = Stage::Progressive;
            return Ok(());
        }

        let out = out.ok_or_else(|| {
            CodecError::invalid_argument("decode_image", "no output buffer for a one-shot decode")
        })?;
        let needed = self.reader_mut()?.output_buffer_size();
        if out.len() < needed {
            return Err(CodecError::BufferTooSmall {
                needed,
                actual: out.len(),
            });
        }
        let decoded = self.reader_mut()?.next_frame(&mut out[..needed]);
        if let Err(err) = decoded {
            return self.fail(err.into());
        }
        self.complete()
    }

    /// Descriptor of the next progressive row. `EndOfImage` once every row is out.
    pub fn row_info(&mut self) -> CodecResult<RowInfo> {
        if self.stage != Stage::Progressive {
            return Err(CodecError::operation_state("row_info"));
        }
        let (reader, progressive) = match (self.reader.as_mut(), self.progressive.as_mut()) {
            (Some(reader), Some(progressive)) => (reader, progressive),
            _ => return Err(CodecError::operation_state("row_info")),
        };
        if let Some((info, _, _)) = &progressive.pending {
            return Ok(*info);
        }
        let Some((scanline_idx, row_num, pass, pass_width)) = progressive.cursor.next_row() else {
            self.complete()?;
            return Err(CodecError::EndOfImage);
        };
        let fetched = match reader.next_row() {
            Ok(Some(row)) => Ok(Some(row.data().to_vec())),
            Ok(None) => Ok(None),
            Err(err) => Err(CodecError::from(err)),
        };
        match fetched {
            Ok(Some(data)) => {
                let info = RowInfo {
                    scanline_idx,
                    row_num,
                    pass,
                    len: progressive.row_bytes,
                };
                progressive.pending = Some((info, pass_width, data));
                Ok(info)
            }
            Ok(None) => {
                self.complete()?;
                Err(CodecError::EndOfImage)
            }
            Err(err) => self.fail(err),
        }
    }

    /// Decode the next progressive row into the front of `out`. Rows of an
    /// interlaced pass land in their own pixel columns; the other columns of
    /// `out` are left untouched.
    pub fn decode_row(&mut self, out: &mut [u8]) -> CodecResult<RowInfo> {
        let info = self.row_info()?;
        if out.len() < info.len {
            return Err(CodecError::BufferTooSmall {
                needed: info.len,
                actual: out.len(),
            });
        }
        let progressive = self
            .progressive
            .as_mut()
            .ok_or_else(|| CodecError::operation_state("decode_row"))?;
        let (_, pass_width, data) = progressive
            .pending
            .take()
            .ok_or_else(|| CodecError::operation_state("decode_row"))?;
        let dest = &mut out[..info.len];
        if progressive.interlaced {
            expand_pass_row(dest, &data, info.pass, pass_width, progressive.bits_per_pixel);
        } else {
            let n = data.len().min(dest.len());
            dest[..n].copy_from_slice(&data[..n]);
        }
        Ok(info)
    }

    /// Raw scanline entry point; only meaningful during a progressive decode.
    pub fn decode_scanline(&mut self, out: &mut [u8]) -> CodecResult<RowInfo> {
        if self.stage != Stage::Progressive {
            return Err(CodecError::operation_state("decode_scanline"));
        }
        self.decode_row(out)
    }

    /// Read all chunks available at this point (up to the image data, or to the
    /// end of the stream once the image has been decoded).
    pub fn decode_chunks(&mut self) -> CodecResult<()> {
        match self.stage {
            Stage::Created => self.ensure_open(self.format),
            Stage::HeaderRead | Stage::Progressive | Stage::Decoded => self.rescan(),
            Stage::Invalid => Err(CodecError::operation_state("decode_chunks")),
        }
    }

    // ---- metadata --------------------------------------------------------

    pub fn ihdr(&mut self) -> CodecResult<Ihdr> {
        self.with_info(|i| Ihdr {
            width: i.width,
            height: i.height,
            bit_depth: i.bit_depth as u8,
            color_type: i.color_type as u8,
            compression_method: 0,
            filter_method: 0,
            interlace_method: u8::from(i.interlaced),
        })
    }

    pub fn plte(&mut self) -> CodecResult<Option<Plte>> {
        self.with_info(|i| i.palette.as_ref().map(|p| Plte::from_rgb(p)))
    }

    pub fn trns(&mut self) -> CodecResult<Option<Trns>> {
        self.with_info(|i| {
            i.trns
                .as_ref()
                .map(|t| Trns::parse(t, i.color_type as u8))
        })?
        .transpose()
    }

    pub fn chrm_int(&mut self) -> CodecResult<Option<ChrmInt>> {
        self.with_info(|i| {
            i.source_chromaticities.as_ref().map(|c| ChrmInt {
                white_point_x: c.white.0.into_scaled(),
                white_point_y: c.white.1.into_scaled(),
                red_x: c.red.0.into_scaled(),
                red_y: c.red.1.into_scaled(),
                green_x: c.green.0.into_scaled(),
                green_y: c.green.1.into_scaled(),
                blue_x: c.blue.0.into_scaled(),
                blue_y: c.blue.1.into_scaled(),
            })
        })
    }

    pub fn chrm(&mut self) -> CodecResult<Option<Chrm>> {
        Ok(self.chrm_int()?.map(|c| c.to_float()))
    }

    pub fn gama_int(&mut self) -> CodecResult<Option<u32>> {
        self.with_info(|i| i.source_gamma.map(|g| g.into_scaled()))
    }

    pub fn gama(&mut self) -> CodecResult<Option<f64>> {
        Ok(self.gama_int()?.map(|g| f64::from(g) / 100_000.0))
    }

    pub fn iccp(&mut self) -> CodecResult<Option<Iccp>> {
        self.with_info(|_| ())?;
        Ok(self.directory.iccp.clone())
    }

    pub fn sbit(&mut self) -> CodecResult<Option<Sbit>> {
        self.with_info(|_| ())?;
        Ok(self.directory.sbit)
    }

    pub fn srgb(&mut self) -> CodecResult<Option<u8>> {
        self.with_info(|i| {
            i.srgb.map(|intent| match intent {
                png::SrgbRenderingIntent::Perceptual => 0,
                png::SrgbRenderingIntent::RelativeColorimetric => 1,
                png::SrgbRenderingIntent::Saturation => 2,
                png::SrgbRenderingIntent::AbsoluteColorimetric => 3,
            })
        })
    }

    /// Two-call text access: `None` returns the total count, `Some(buf)` fills
    /// at most `buf.len()` records and returns how many were written.
    pub fn text(&mut self, out: Option<&mut [Text]>) -> CodecResult<usize> {
        let records = self.with_info(collect_text)??;
        Ok(fill(&records, out))
    }

    pub fn bkgd(&mut self) -> CodecResult<Option<Bkgd>> {
        self.with_info(|_| ())?;
        Ok(self.directory.bkgd)
    }

    pub fn hist(&mut self) -> CodecResult<Option<Hist>> {
        self.with_info(|_| ())?;
        Ok(self.directory.hist.clone())
    }

    pub fn phys(&mut self) -> CodecResult<Option<Phys>> {
        self.with_info(|i| {
            i.pixel_dims.map(|d| Phys {
                ppu_x: d.xppu,
                ppu_y: d.yppu,
                unit_specifier: match d.unit {
                    png::Unit::Meter => 1,
                    png::Unit::Unspecified => 0,
                },
            })
        })
    }

    /// Two-call suggested-palette access, same convention as [`Self::text`].
    pub fn splt(&mut self, out: Option<&mut [Splt]>) -> CodecResult<usize> {
        self.with_info(|_| ())?;
        Ok(fill(&self.directory.splt, out))
    }

    pub fn time(&mut self) -> CodecResult<Option<Time>> {
        self.with_info(|_| ())?;
        Ok(self.directory.time)
    }

    /// Two-call unknown-chunk access, same convention as [`Self::text`].
    pub fn unknown_chunks(&mut self, out: Option<&mut [UnknownChunk]>) -> CodecResult<usize> {
        self.with_info(|_| ())?;
        Ok(fill(&self.directory.unknown, out))
    }

    pub fn offs(&mut self) -> CodecResult<Option<Offs>> {
        self.with_info(|_| ())?;
        Ok(self.directory.offs)
    }

    pub fn exif(&mut self) -> CodecResult<Option<Exif>> {
        self.with_info(|_| ())?;
        Ok(self.directory.exif.clone())
    }

    /// Bytes pulled from the transport so far.
    pub fn bytes_consumed(&self) -> usize {
        self.seen.borrow().len()
    }
}

impl Default for PngDecodeSession<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PngDecodeSession<'_> {
    fn drop(&mut self) {
        track_released(Tracked::Decoder);
    }
}

fn fill<T: Clone>(records: &[T], out: Option<&mut [T]>) -> usize {
    match out {
        None => records.len(),
        Some(buf) => {
            let n = records.len().min(buf.len());
            buf[..n].clone_from_slice(&records[..n]);
            n
        }
    }
}

fn text_record(
    kind: TextKind,
    keyword: &str,
    text: Vec<u8>,
    language_tag: &str,
    translated_keyword: &str,
    compressed: bool,
) -> Text {
    Text {
        keyword: string_to_latin1(keyword),
        text_type: kind as u8,
        compression_flag: u8::from(compressed),
        language_tag: Some(language_tag.as_bytes().to_vec()),
        translated_keyword: Some(translated_keyword.as_bytes().to_vec()),
        length: text.len(),
        text: (!text.is_empty()).then_some(text),
    }
}

fn collect_text(info: &png::Info<'_>) -> CodecResult<Vec<Text>> {
    let mut records = Vec::new();
    for chunk in &info.uncompressed_latin1_text {
        records.push(text_record(
            TextKind::Text,
            &chunk.keyword,
            string_to_latin1(&chunk.text),
            "",
            "",
            false,
        ));
    }
    for chunk in &info.compressed_latin1_text {
        let text = chunk.get_text()?;
        records.push(text_record(
            TextKind::Ztxt,
            &chunk.keyword,
            string_to_latin1(&text),
            "",
            "",
            true,
        ));
    }
    for chunk in &info.utf8_text {
        let text = chunk.get_text()?;
        records.push(text_record(
            TextKind::Itxt,
            &chunk.keyword,
            text.into_bytes(),
            &chunk.language_tag,
            &chunk.translated_keyword,
            chunk.compressed,
        ));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::chunks::encode_chunk;
    use crate::codecs::tracking::{enable_drop_tracking, live_decoders, released_contexts};
    use image::{DynamicImage, ImageFormat, RgbImage};

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 7]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    /// Insert a chunk right after IHDR (signature 8 + IHDR 25 bytes).
    fn with_chunk(png: &[u8], kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = png[..33].to_vec();
        out.extend(encode_chunk(kind, body));
        out.extend_from_slice(&png[33..]);
        out
    }

    #[test]
    fn test_one_shot_decode_matches_size() {
        let png = encode_png(5, 3);
        let mut session = PngDecodeSession::new();
        session.set_png_buffer(&png).unwrap();
        let size = session.decoded_image_size(PixelFormat::Png).unwrap();
        assert_eq!(size, 5 * 3 * 3);
        let mut out = vec![0u8; size];
        session
            .decode_image(Some(&mut out), PixelFormat::Png, DecodeFlags::empty())
            .unwrap();
        assert_eq!(&out[..3], &[0, 0, 7]);
        assert_eq!(session.ihdr().unwrap().width, 5);
    }

    #[test]
    fn test_second_transport_is_rejected() {
        let png = encode_png(1, 1);
        let mut session = PngDecodeSession::new();
        session.set_png_buffer(&png).unwrap();
        assert!(matches!(
            session.set_png_buffer(&png),
            Err(CodecError::TransportAlreadyBound)
        ));
    }

    #[test]
    fn test_no_transport() {
        let mut session = PngDecodeSession::new();
        assert!(matches!(session.ihdr(), Err(CodecError::NoTransport)));
    }

    #[test]
    fn test_image_limits_enforced() {
        let png = encode_png(16, 2);
        let mut session = PngDecodeSession::new();
        session.set_png_buffer(&png).unwrap();
        session.set_image_limits(8, 8).unwrap();
        assert!(matches!(
            session.decoded_image_size(PixelFormat::Png),
            Err(CodecError::ImageLimits { .. })
        ));
        // the session is unusable afterwards
        assert!(session.ihdr().is_err());
    }

    #[test]
    fn test_progressive_rows_cover_image() {
        let png = encode_png(4, 3);
        let mut session = PngDecodeSession::new();
        session.set_png_buffer(&png).unwrap();
        let size = session.decoded_image_size(PixelFormat::Png).unwrap();
        assert!(session.decode_scanline(&mut [0u8; 12]).is_err());
        session
            .decode_image(None, PixelFormat::Png, DecodeFlags::PROGRESSIVE)
            .unwrap();
        let mut image = vec![0u8; size];
        let stride = size / 3;
        let mut rows = 0;
        loop {
            let info = match session.row_info() {
                Ok(info) => info,
                Err(CodecError::EndOfImage) => break,
                Err(err) => panic!("unexpected {err}"),
            };
            let offset = info.row_num as usize * stride;
            session.decode_row(&mut image[offset..]).unwrap();
            rows += 1;
        }
        assert_eq!(rows, 3);
        assert_eq!(&image[stride..stride + 3], &[0, 1, 7]);
    }

    /// 8x8 gray8 Adam7 image whose pixel at (x, y) is `y * 8 + x`.
    fn interlaced_gray8() -> Vec<u8> {
        use flate2::write::ZlibEncoder;
        use std::io::Write;

        const START_X: [u32; 7] = [0, 4, 0, 2, 0, 1, 0];
        const START_Y: [u32; 7] = [0, 0, 4, 0, 2, 0, 1];
        const STEP_X: [u32; 7] = [8, 8, 4, 4, 2, 2, 1];
        const STEP_Y: [u32; 7] = [8, 8, 8, 4, 4, 2, 2];
        let mut raw = Vec::new();
        for pass in 0..7 {
            for y in (START_Y[pass]..8).step_by(STEP_Y[pass] as usize) {
                raw.push(0);
                for x in (START_X[pass]..8).step_by(STEP_X[pass] as usize) {
                    raw.push((y * 8 + x) as u8);
                }
            }
        }
        let mut zlib = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        zlib.write_all(&raw).unwrap();
        let idat = zlib.finish().unwrap();

        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&8u32.to_be_bytes());
        ihdr.extend_from_slice(&8u32.to_be_bytes());
        ihdr.extend_from_slice(&[8, 0, 0, 0, 1]);
        let mut png = crate::codecs::chunks::PNG_SIGNATURE.to_vec();
        png.extend(encode_chunk(b"IHDR", &ihdr));
        png.extend(encode_chunk(b"IDAT", &idat));
        png.extend(encode_chunk(b"IEND", &[]));
        png
    }

    #[test]
    fn test_progressive_interlaced_matches_one_shot() {
        let png = interlaced_gray8();

        let mut session = PngDecodeSession::new();
        session.set_png_buffer(&png).unwrap();
        let size = session.decoded_image_size(PixelFormat::Png).unwrap();
        assert_eq!(size, 64);
        let mut full = vec![0u8; size];
        session
            .decode_image(Some(&mut full), PixelFormat::Png, DecodeFlags::empty())
            .unwrap();
        let expected: Vec<u8> = (0..64).collect();
        assert_eq!(full, expected);

        let mut session = PngDecodeSession::new();
        session.set_png_buffer(&png).unwrap();
        session
            .decode_image(None, PixelFormat::Png, DecodeFlags::PROGRESSIVE)
            .unwrap();
        let mut rows = vec![0u8; 64];
        let mut passes = std::collections::BTreeSet::new();
        loop {
            let info = match session.row_info() {
                Ok(info) => info,
                Err(CodecError::EndOfImage) => break,
                Err(err) => panic!("unexpected {err}"),
            };
            assert_eq!(info.len, 8);
            passes.insert(info.pass);
            let offset = info.row_num as usize * 8;
            session.decode_row(&mut rows[offset..]).unwrap();
        }
        assert_eq!(passes.len(), 7);
        assert_eq!(full, rows);
    }

    #[test]
    fn test_ancillary_chunks_surface() {
        let png = with_chunk(&encode_png(2, 2), b"sBIT", &[5, 6, 5]);
        let png = with_chunk(&png, b"prVt", b"opaque");
        let mut session = PngDecodeSession::new();
        session.set_png_buffer(&png).unwrap();
        session.set_option(CodecOption::KeepUnknownChunks, 1).unwrap();
        assert_eq!(session.sbit().unwrap().unwrap().red_bits, 5);
        assert_eq!(session.unknown_chunks(None).unwrap(), 1);
        let mut buf = vec![UnknownChunk::default(); 4];
        assert_eq!(session.unknown_chunks(Some(&mut buf)).unwrap(), 1);
        assert_eq!(buf[0].chunk_type, *b"prVt");
        assert_eq!(buf[0].data.as_deref(), Some(&b"opaque"[..]));
    }

    #[test]
    fn test_text_two_call_convention() {
        let png = with_chunk(&encode_png(2, 2), b"tEXt", b"Title\0hello");
        let png = with_chunk(&png, b"tEXt", b"Author\0me");
        let mut session = PngDecodeSession::new();
        session.set_png_buffer(&png).unwrap();
        let total = session.text(None).unwrap();
        assert_eq!(total, 2);
        let mut one = vec![Text::default(); 1];
        assert_eq!(session.text(Some(&mut one)).unwrap(), 1);
        assert_eq!(one[0].length, one[0].text.as_ref().map_or(0, Vec::len));
    }

    #[test]
    fn test_encode_to_buffer_rejected_on_decoder() {
        let mut session = PngDecodeSession::new();
        assert!(matches!(
            session.set_option(CodecOption::EncodeToBuffer, 1),
            Err(CodecError::ContextType { .. })
        ));
    }

    #[test]
    fn test_session_released_once() {
        let _guard = enable_drop_tracking();
        {
            let png = encode_png(1, 1);
            let mut session = PngDecodeSession::new();
            session.set_png_buffer(&png).unwrap();
            assert_eq!(live_decoders(), 1);
            let _ = session.ihdr();
        }
        assert_eq!(live_decoders(), 0);
        assert_eq!(released_contexts(), 1);
    }
}
