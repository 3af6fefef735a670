// src/codecs/records.rs
//
// Typed ancillary records exchanged with the codec sessions, plus the chunk body
// parsers/serialisers for the families the png crate does not surface itself.
//
// Records that carry a heap payload keep an explicit declared length next to the
// payload (`length` + `Option<Vec<u8>>`). The harness deliberately produces records
// whose declared length disagrees with the payload; the sessions must reject those.

use crate::codecs::CodecResult;
use crate::error::CodecError;
use crate::ops::ChunkLocation;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Largest value a PNG 4-byte field may carry (2^31 - 1).
pub const PNG_U31_MAX: u32 = i32::MAX as u32;

pub const COLOR_GRAY: u8 = 0;
pub const COLOR_TRUECOLOR: u8 = 2;
pub const COLOR_INDEXED: u8 = 3;
pub const COLOR_GRAY_ALPHA: u8 = 4;
pub const COLOR_TRUECOLOR_ALPHA: u8 = 6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ihdr {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
    pub compression_method: u8,
    pub filter_method: u8,
    pub interlace_method: u8,
}

impl Ihdr {
    pub fn validate(&self) -> CodecResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CodecError::invalid_argument("ihdr", "zero width or height"));
        }
        if self.width > PNG_U31_MAX || self.height > PNG_U31_MAX {
            return Err(CodecError::invalid_argument("ihdr", "dimension above 2^31-1"));
        }
        if !depth_allowed(self.color_type, self.bit_depth) {
            return Err(CodecError::invalid_argument(
                "ihdr",
                format!(
                    "bit depth {} not allowed for color type {}",
                    self.bit_depth, self.color_type
                ),
            ));
        }
        if self.compression_method != 0 {
            return Err(CodecError::invalid_argument("ihdr", "compression method must be 0"));
        }
        if self.filter_method != 0 {
            return Err(CodecError::invalid_argument("ihdr", "filter method must be 0"));
        }
        if self.interlace_method > 1 {
            return Err(CodecError::invalid_argument("ihdr", "interlace method must be 0 or 1"));
        }
        Ok(())
    }

    /// Samples per pixel, `None` for an invalid colour type.
    pub fn channels(&self) -> Option<u32> {
        channels_for(self.color_type)
    }

    pub fn bits_per_pixel(&self) -> Option<u32> {
        Some(self.channels()? * u32::from(self.bit_depth))
    }

    /// Bytes in one unfiltered row of `width` pixels.
    pub fn row_bytes(&self, width: u32) -> Option<usize> {
        let bits = u64::from(width) * u64::from(self.bits_per_pixel()?);
        usize::try_from(bits.div_ceil(8)).ok()
    }

    /// Bytes of the whole unfiltered image (rows packed, no filter bytes).
    pub fn image_bytes(&self) -> Option<usize> {
        self.row_bytes(self.width)?
            .checked_mul(usize::try_from(self.height).ok()?)
    }

    pub fn is_interlaced(&self) -> bool {
        self.interlace_method == 1
    }

    /// Largest sample value representable at this bit depth.
    pub fn max_sample(&self) -> u16 {
        match self.bit_depth {
            1..=15 => (1u16 << self.bit_depth) - 1,
            _ => u16::MAX,
        }
    }
}

pub fn channels_for(color_type: u8) -> Option<u32> {
    match color_type {
        COLOR_GRAY | COLOR_INDEXED => Some(1),
        COLOR_TRUECOLOR => Some(3),
        COLOR_GRAY_ALPHA => Some(2),
        COLOR_TRUECOLOR_ALPHA => Some(4),
        _ => None,
    }
}

pub fn depth_allowed(color_type: u8, bit_depth: u8) -> bool {
    match color_type {
        COLOR_GRAY => matches!(bit_depth, 1 | 2 | 4 | 8 | 16),
        COLOR_INDEXED => matches!(bit_depth, 1 | 2 | 4 | 8),
        COLOR_TRUECOLOR | COLOR_GRAY_ALPHA | COLOR_TRUECOLOR_ALPHA => matches!(bit_depth, 8 | 16),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlteEntry {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    /// Not stored in PLTE; kept for layout parity with the other colour records.
    pub alpha: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plte {
    pub entries: Vec<PlteEntry>,
}

impl Plte {
    pub fn validate(&self, ihdr: &Ihdr) -> CodecResult<()> {
        let n = self.entries.len();
        if n == 0 || n > 256 {
            return Err(CodecError::invalid_argument("plte", format!("{n} entries")));
        }
        match ihdr.color_type {
            COLOR_GRAY | COLOR_GRAY_ALPHA => Err(CodecError::invalid_argument(
                "plte",
                "palette not allowed for grayscale images",
            )),
            COLOR_INDEXED if n > 1usize << ihdr.bit_depth.min(8) => Err(
                CodecError::invalid_argument("plte", "more entries than the bit depth can index"),
            ),
            _ => Ok(()),
        }
    }

    pub fn from_rgb(bytes: &[u8]) -> Self {
        Self {
            entries: bytes
                .chunks_exact(3)
                .map(|c| PlteEntry {
                    red: c[0],
                    green: c[1],
                    blue: c[2],
                    alpha: 255,
                })
                .collect(),
        }
    }

    pub fn to_body(&self) -> Vec<u8> {
        self.entries
            .iter()
            .flat_map(|e| [e.red, e.green, e.blue])
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trns {
    pub gray: u16,
    pub red: u16,
    pub green: u16,
    pub blue: u16,
    /// Declared number of palette alpha values; may disagree with `type3_alpha`.
    pub n_type3_entries: u32,
    pub type3_alpha: Vec<u8>,
}

impl Trns {
    pub fn parse(body: &[u8], color_type: u8) -> CodecResult<Self> {
        let mut trns = Trns::default();
        match color_type {
            COLOR_GRAY if body.len() >= 2 => trns.gray = be16(body, 0),
            COLOR_TRUECOLOR if body.len() >= 6 => {
                trns.red = be16(body, 0);
                trns.green = be16(body, 2);
                trns.blue = be16(body, 4);
            }
            COLOR_INDEXED => {
                trns.n_type3_entries = body.len() as u32;
                trns.type3_alpha = body.to_vec();
            }
            _ => return Err(CodecError::malformed_chunk("tRNS", "bad length for color type")),
        }
        Ok(trns)
    }

    pub fn validate(&self, ihdr: &Ihdr, palette_len: Option<usize>) -> CodecResult<()> {
        let max = ihdr.max_sample();
        match ihdr.color_type {
            COLOR_GRAY if self.gray > max => {
                Err(CodecError::invalid_argument("trns", "gray value exceeds bit depth"))
            }
            COLOR_TRUECOLOR if self.red > max || self.green > max || self.blue > max => {
                Err(CodecError::invalid_argument("trns", "color value exceeds bit depth"))
            }
            COLOR_INDEXED => {
                let n = self.n_type3_entries as usize;
                let palette_len = palette_len
                    .ok_or_else(|| CodecError::invalid_argument("trns", "no palette set"))?;
                if n == 0 || n > self.type3_alpha.len() || n > palette_len {
                    Err(CodecError::invalid_argument(
                        "trns",
                        format!(
                            "{n} alpha entries declared, {} supplied, palette has {palette_len}",
                            self.type3_alpha.len()
                        ),
                    ))
                } else {
                    Ok(())
                }
            }
            COLOR_GRAY_ALPHA | COLOR_TRUECOLOR_ALPHA => Err(CodecError::invalid_argument(
                "trns",
                "not allowed for color types with alpha",
            )),
            _ => Ok(()),
        }
    }

    pub fn to_body(&self, color_type: u8) -> Vec<u8> {
        match color_type {
            COLOR_GRAY => self.gray.to_be_bytes().to_vec(),
            COLOR_TRUECOLOR => [self.red, self.green, self.blue]
                .iter()
                .flat_map(|v| v.to_be_bytes())
                .collect(),
            _ => self.type3_alpha[..self.n_type3_entries as usize].to_vec(),
        }
    }
}

/// Chromaticities as floating-point values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Chrm {
    pub white_point_x: f64,
    pub white_point_y: f64,
    pub red_x: f64,
    pub red_y: f64,
    pub green_x: f64,
    pub green_y: f64,
    pub blue_x: f64,
    pub blue_y: f64,
}

/// Chromaticities in PNG fixed point (value * 100000).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChrmInt {
    pub white_point_x: u32,
    pub white_point_y: u32,
    pub red_x: u32,
    pub red_y: u32,
    pub green_x: u32,
    pub green_y: u32,
    pub blue_x: u32,
    pub blue_y: u32,
}

impl Chrm {
    pub fn to_fixed(&self) -> CodecResult<ChrmInt> {
        let fixed = |v: f64| scaled_from_float(v, "chrm");
        Ok(ChrmInt {
            white_point_x: fixed(self.white_point_x)?,
            white_point_y: fixed(self.white_point_y)?,
            red_x: fixed(self.red_x)?,
            red_y: fixed(self.red_y)?,
            green_x: fixed(self.green_x)?,
            green_y: fixed(self.green_y)?,
            blue_x: fixed(self.blue_x)?,
            blue_y: fixed(self.blue_y)?,
        })
    }
}

impl ChrmInt {
    pub fn validate(&self) -> CodecResult<()> {
        let values = [
            self.white_point_x,
            self.white_point_y,
            self.red_x,
            self.red_y,
            self.green_x,
            self.green_y,
            self.blue_x,
            self.blue_y,
        ];
        if values.iter().any(|&v| v > PNG_U31_MAX) {
            return Err(CodecError::invalid_argument("chrm", "value above 2^31-1"));
        }
        Ok(())
    }

    pub fn to_float(&self) -> Chrm {
        let f = |v: u32| f64::from(v) / 100_000.0;
        Chrm {
            white_point_x: f(self.white_point_x),
            white_point_y: f(self.white_point_y),
            red_x: f(self.red_x),
            red_y: f(self.red_y),
            green_x: f(self.green_x),
            green_y: f(self.green_y),
            blue_x: f(self.blue_x),
            blue_y: f(self.blue_y),
        }
    }
}

/// Convert a float to PNG fixed point (x 100000), rejecting values that do not fit.
pub fn scaled_from_float(value: f64, name: &'static str) -> CodecResult<u32> {
    let scaled = (value * 100_000.0).round();
    if !scaled.is_finite() || scaled < 0.0 || scaled > f64::from(PNG_U31_MAX) {
        return Err(CodecError::invalid_argument(
            name,
            format!("{value} is out of the fixed-point range"),
        ));
    }
    Ok(scaled as u32)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Iccp {
    pub profile_name: Vec<u8>,
    /// Declared profile length; may exceed the supplied payload.
    pub profile_len: usize,
    pub profile: Option<Vec<u8>>,
}

impl Iccp {
    pub fn parse(body: &[u8], max_profile: usize) -> CodecResult<Self> {
        let nul = body
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| CodecError::malformed_chunk("iCCP", "missing name terminator"))?;
        let name = &body[..nul];
        check_keyword(name, "iccp").map_err(|_| CodecError::malformed_chunk("iCCP", "bad name"))?;
        let method = body
            .get(nul + 1)
            .ok_or_else(|| CodecError::malformed_chunk("iCCP", "missing compression method"))?;
        if *method != 0 {
            return Err(CodecError::malformed_chunk("iCCP", "unknown compression method"));
        }
        let mut profile = Vec::new();
        ZlibDecoder::new(&body[nul + 2..])
            .take(max_profile as u64 + 1)
            .read_to_end(&mut profile)
            .map_err(|e| CodecError::malformed_chunk("iCCP", e.to_string()))?;
        if profile.len() > max_profile {
            return Err(CodecError::chunk_limits("iCCP profile exceeds the chunk limit"));
        }
        if profile.is_empty() {
            return Err(CodecError::malformed_chunk("iCCP", "empty profile"));
        }
        Ok(Iccp {
            profile_name: name.to_vec(),
            profile_len: profile.len(),
            profile: Some(profile),
        })
    }

    pub fn validate(&self) -> CodecResult<&[u8]> {
        check_keyword(&self.profile_name, "iccp")?;
        payload_prefix(self.profile_len, self.profile.as_deref(), "iccp", false)
    }

    pub fn to_body(&self, level: Compression) -> CodecResult<Vec<u8>> {
        let profile = self.validate()?;
        let mut body = self.profile_name.clone();
        body.extend_from_slice(&[0, 0]);
        let mut encoder = ZlibEncoder::new(body, level);
        encoder.write_all(profile)?;
        Ok(encoder.finish()?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sbit {
    pub grayscale_bits: u8,
    pub red_bits: u8,
    pub green_bits: u8,
    pub blue_bits: u8,
    pub alpha_bits: u8,
}

impl Sbit {
    pub fn parse(body: &[u8], color_type: u8) -> CodecResult<Self> {
        let expect = match color_type {
            COLOR_GRAY => 1,
            COLOR_TRUECOLOR | COLOR_INDEXED => 3,
            COLOR_GRAY_ALPHA => 2,
            COLOR_TRUECOLOR_ALPHA => 4,
            _ => 0,
        };
        if expect == 0 || body.len() != expect {
            return Err(CodecError::malformed_chunk("sBIT", "bad length for color type"));
        }
        let mut sbit = Sbit::default();
        match color_type {
            COLOR_GRAY => sbit.grayscale_bits = body[0],
            COLOR_GRAY_ALPHA => {
                sbit.grayscale_bits = body[0];
                sbit.alpha_bits = body[1];
            }
            _ => {
                sbit.red_bits = body[0];
                sbit.green_bits = body[1];
                sbit.blue_bits = body[2];
                if color_type == COLOR_TRUECOLOR_ALPHA {
                    sbit.alpha_bits = body[3];
                }
            }
        }
        Ok(sbit)
    }

    pub fn validate(&self, ihdr: &Ihdr) -> CodecResult<()> {
        let depth = if ihdr.color_type == COLOR_INDEXED {
            8
        } else {
            ihdr.bit_depth
        };
        let fields = self.relevant(ihdr.color_type);
        if fields.iter().any(|&b| b == 0 || b > depth) {
            return Err(CodecError::invalid_argument(
                "sbit",
                format!("significant bits must lie in 1..={depth}"),
            ));
        }
        Ok(())
    }

    pub fn to_body(&self, color_type: u8) -> Vec<u8> {
        self.relevant(color_type)
    }

    fn relevant(&self, color_type: u8) -> Vec<u8> {
        match color_type {
            COLOR_GRAY => vec![self.grayscale_bits],
            COLOR_GRAY_ALPHA => vec![self.grayscale_bits, self.alpha_bits],
            COLOR_TRUECOLOR | COLOR_INDEXED => vec![self.red_bits, self.green_bits, self.blue_bits],
            COLOR_TRUECOLOR_ALPHA => vec![
                self.red_bits,
                self.green_bits,
                self.blue_bits,
                self.alpha_bits,
            ],
            _ => Vec::new(),
        }
    }
}

/// Which text chunk a [`Text`] record maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TextKind {
    Text = 1,
    Ztxt = 2,
    Itxt = 3,
}

impl TextKind {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(TextKind::Text),
            2 => Some(TextKind::Ztxt),
            3 => Some(TextKind::Itxt),
            _ => None,
        }
    }
}

/// A textual metadata record.
///
/// `length` is the declared payload length. A well-formed record has
/// `length == 0` exactly when `text` is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Text {
    pub keyword: Vec<u8>,
    pub text_type: u8,
    pub compression_flag: u8,
    pub language_tag: Option<Vec<u8>>,
    pub translated_keyword: Option<Vec<u8>>,
    pub length: usize,
    pub text: Option<Vec<u8>>,
}

/// A text record checked and converted for the png encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PreparedText {
    pub kind: TextKind,
    pub keyword: String,
    pub text: String,
}

impl Text {
    pub(crate) fn prepare(&self) -> CodecResult<PreparedText> {
        let kind = TextKind::from_raw(self.text_type).ok_or_else(|| {
            CodecError::invalid_argument("text", format!("unknown text type {}", self.text_type))
        })?;
        check_keyword(&self.keyword, "text")?;
        let payload = payload_prefix(self.length, self.text.as_deref(), "text", true)?;
        let text = match kind {
            TextKind::Text | TextKind::Ztxt => {
                if payload.contains(&0) {
                    return Err(CodecError::invalid_argument("text", "NUL inside latin-1 text"));
                }
                latin1_to_string(payload)
            }
            TextKind::Itxt => {
                if self.compression_flag > 1 {
                    return Err(CodecError::invalid_argument("text", "compression flag must be 0 or 1"));
                }
                let tag = self.language_tag.as_deref().unwrap_or_default();
                if !tag.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-') {
                    return Err(CodecError::invalid_argument("text", "bad language tag"));
                }
                if let Some(translated) = &self.translated_keyword {
                    std::str::from_utf8(translated).map_err(|_| {
                        CodecError::invalid_argument("text", "translated keyword is not UTF-8")
                    })?;
                }
                String::from_utf8(payload.to_vec())
                    .map_err(|_| CodecError::invalid_argument("text", "iTXt text is not UTF-8"))?
            }
        };
        Ok(PreparedText {
            kind,
            keyword: latin1_to_string(&self.keyword),
            text,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bkgd {
    pub gray: u16,
    pub red: u16,
    pub green: u16,
    pub blue: u16,
    pub plte_index: u16,
}

impl Bkgd {
    pub fn parse(body: &[u8], color_type: u8) -> CodecResult<Self> {
        let mut bkgd = Bkgd::default();
        match (color_type, body.len()) {
            (COLOR_GRAY | COLOR_GRAY_ALPHA, 2) => bkgd.gray = be16(body, 0),
            (COLOR_TRUECOLOR | COLOR_TRUECOLOR_ALPHA, 6) => {
                bkgd.red = be16(body, 0);
                bkgd.green = be16(body, 2);
                bkgd.blue = be16(body, 4);
            }
            (COLOR_INDEXED, 1) => bkgd.plte_index = u16::from(body[0]),
            _ => return Err(CodecError::malformed_chunk("bKGD", "bad length for color type")),
        }
        Ok(bkgd)
    }

    pub fn validate(&self, ihdr: &Ihdr, palette_len: Option<usize>) -> CodecResult<()> {
        let max = ihdr.max_sample();
        let ok = match ihdr.color_type {
            COLOR_GRAY | COLOR_GRAY_ALPHA => self.gray <= max,
            COLOR_TRUECOLOR | COLOR_TRUECOLOR_ALPHA => {
                self.red <= max && self.green <= max && self.blue <= max
            }
            COLOR_INDEXED => palette_len.is_some_and(|n| usize::from(self.plte_index) < n),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(CodecError::invalid_argument("bkgd", "value out of range for the header"))
        }
    }

    pub fn to_body(&self, color_type: u8) -> Vec<u8> {
        match color_type {
            COLOR_GRAY | COLOR_GRAY_ALPHA => self.gray.to_be_bytes().to_vec(),
            COLOR_INDEXED => vec![self.plte_index as u8],
            _ => [self.red, self.green, self.blue]
                .iter()
                .flat_map(|v| v.to_be_bytes())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hist {
    pub frequency: Vec<u16>,
}

impl Hist {
    pub fn parse(body: &[u8]) -> CodecResult<Self> {
        if body.is_empty() || body.len() % 2 != 0 || body.len() > 512 {
            return Err(CodecError::malformed_chunk("hIST", "bad length"));
        }
        Ok(Hist {
            frequency: body.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect(),
        })
    }

    pub fn validate(&self, palette_len: Option<usize>) -> CodecResult<usize> {
        let n = palette_len.ok_or_else(|| CodecError::invalid_argument("hist", "no palette set"))?;
        if self.frequency.len() < n {
            return Err(CodecError::invalid_argument(
                "hist",
                "fewer frequencies than palette entries",
            ));
        }
        Ok(n)
    }

    pub fn to_body(&self, palette_len: usize) -> Vec<u8> {
        self.frequency[..palette_len]
            .iter()
            .flat_map(|f| f.to_be_bytes())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Phys {
    pub ppu_x: u32,
    pub ppu_y: u32,
    pub unit_specifier: u8,
}

impl Phys {
    pub fn validate(&self) -> CodecResult<()> {
        if self.unit_specifier > 1 {
            return Err(CodecError::invalid_argument("phys", "unit must be 0 or 1"));
        }
        if self.ppu_x > PNG_U31_MAX || self.ppu_y > PNG_U31_MAX {
            return Err(CodecError::invalid_argument("phys", "density above 2^31-1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpltEntry {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
    pub alpha: u16,
    pub frequency: u16,
}

/// Suggested palette. `n_entries` is declared, `entries` is the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Splt {
    pub name: Vec<u8>,
    pub sample_depth: u8,
    pub n_entries: u32,
    pub entries: Option<Vec<SpltEntry>>,
}

impl Splt {
    pub fn parse(body: &[u8]) -> CodecResult<Self> {
        let nul = body
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| CodecError::malformed_chunk("sPLT", "missing name terminator"))?;
        let name = body[..nul].to_vec();
        check_keyword(&name, "splt").map_err(|_| CodecError::malformed_chunk("sPLT", "bad name"))?;
        let depth = *body
            .get(nul + 1)
            .ok_or_else(|| CodecError::malformed_chunk("sPLT", "missing sample depth"))?;
        let data = &body[nul + 2..];
        let entry_len = match depth {
            8 => 6,
            16 => 10,
            _ => return Err(CodecError::malformed_chunk("sPLT", "sample depth must be 8 or 16")),
        };
        if data.len() % entry_len != 0 {
            return Err(CodecError::malformed_chunk("sPLT", "truncated entry"));
        }
        let entries: Vec<SpltEntry> = data
            .chunks_exact(entry_len)
            .map(|c| {
                if depth == 8 {
                    SpltEntry {
                        red: u16::from(c[0]),
                        green: u16::from(c[1]),
                        blue: u16::from(c[2]),
                        alpha: u16::from(c[3]),
                        frequency: be16(c, 4),
                    }
                } else {
                    SpltEntry {
                        red: be16(c, 0),
                        green: be16(c, 2),
                        blue: be16(c, 4),
                        alpha: be16(c, 6),
                        frequency: be16(c, 8),
                    }
                }
            })
            .collect();
        Ok(Splt {
            name,
            sample_depth: depth,
            n_entries: entries.len() as u32,
            entries: (!entries.is_empty()).then_some(entries),
        })
    }

    pub fn validate(&self) -> CodecResult<&[SpltEntry]> {
        check_keyword(&self.name, "splt")?;
        if self.sample_depth != 8 && self.sample_depth != 16 {
            return Err(CodecError::invalid_argument("splt", "sample depth must be 8 or 16"));
        }
        let n = self.n_entries as usize;
        let entries = match self.entries.as_deref() {
            Some(entries) => entries,
            None if n == 0 => &[],
            None => return Err(CodecError::invalid_argument("splt", "missing entries")),
        };
        if n > entries.len() {
            return Err(CodecError::invalid_argument("splt", "more entries declared than supplied"));
        }
        let entries = &entries[..n];
        if self.sample_depth == 8
            && entries
                .iter()
                .any(|e| e.red > 255 || e.green > 255 || e.blue > 255 || e.alpha > 255)
        {
            return Err(CodecError::invalid_argument("splt", "8-bit sample out of range"));
        }
        Ok(entries)
    }

    pub fn to_body(&self) -> CodecResult<Vec<u8>> {
        let entries = self.validate()?;
        let mut body = self.name.clone();
        body.push(0);
        body.push(self.sample_depth);
        for e in entries {
            if self.sample_depth == 8 {
                body.extend_from_slice(&[e.red as u8, e.green as u8, e.blue as u8, e.alpha as u8]);
            } else {
                for v in [e.red, e.green, e.blue, e.alpha] {
                    body.extend_from_slice(&v.to_be_bytes());
                }
            }
            body.extend_from_slice(&e.frequency.to_be_bytes());
        }
        Ok(body)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Time {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Time {
    pub fn parse(body: &[u8]) -> CodecResult<Self> {
        if body.len() != 7 {
            return Err(CodecError::malformed_chunk("tIME", "length must be 7"));
        }
        let time = Time {
            year: be16(body, 0),
            month: body[2],
            day: body[3],
            hour: body[4],
            minute: body[5],
            second: body[6],
        };
        time.validate()
            .map_err(|_| CodecError::malformed_chunk("tIME", "field out of range"))?;
        Ok(time)
    }

    pub fn validate(&self) -> CodecResult<()> {
        let ok = (1..=12).contains(&self.month)
            && (1..=31).contains(&self.day)
            && self.hour <= 23
            && self.minute <= 59
            && self.second <= 60;
        if ok {
            Ok(())
        } else {
            Err(CodecError::invalid_argument("time", "field out of range"))
        }
    }

    pub fn to_body(&self) -> Vec<u8> {
        let mut body = self.year.to_be_bytes().to_vec();
        body.extend_from_slice(&[self.month, self.day, self.hour, self.minute, self.second]);
        body
    }
}

/// A chunk the codec does not interpret.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnknownChunk {
    pub chunk_type: [u8; 4],
    pub location: u8,
    pub length: usize,
    pub data: Option<Vec<u8>>,
}

impl UnknownChunk {
    pub fn validate(&self) -> CodecResult<ChunkLocation> {
        if !self.chunk_type.iter().all(u8::is_ascii_alphabetic) {
            return Err(CodecError::invalid_argument("unknown_chunk", "type must be 4 letters"));
        }
        if self.chunk_type[0].is_ascii_uppercase() {
            return Err(CodecError::invalid_argument("unknown_chunk", "critical chunk type"));
        }
        if self.chunk_type[2].is_ascii_lowercase() {
            return Err(CodecError::invalid_argument("unknown_chunk", "reserved bit set"));
        }
        if is_known_chunk(&self.chunk_type) {
            return Err(CodecError::invalid_argument("unknown_chunk", "type is a known chunk"));
        }
        let location = ChunkLocation::from_raw(self.location).ok_or_else(|| {
            CodecError::invalid_argument("unknown_chunk", format!("location {}", self.location))
        })?;
        payload_prefix(self.length, self.data.as_deref(), "unknown_chunk", true)?;
        Ok(location)
    }

    pub fn body(&self) -> &[u8] {
        self.data
            .as_deref()
            .map(|d| &d[..self.length.min(d.len())])
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Offs {
    pub x: i32,
    pub y: i32,
    pub unit_specifier: u8,
}

impl Offs {
    pub fn parse(body: &[u8]) -> CodecResult<Self> {
        if body.len() != 9 {
            return Err(CodecError::malformed_chunk("oFFs", "length must be 9"));
        }
        let offs = Offs {
            x: i32::from_be_bytes([body[0], body[1], body[2], body[3]]),
            y: i32::from_be_bytes([body[4], body[5], body[6], body[7]]),
            unit_specifier: body[8],
        };
        offs.validate()
            .map_err(|_| CodecError::malformed_chunk("oFFs", "unit must be 0 or 1"))?;
        Ok(offs)
    }

    pub fn validate(&self) -> CodecResult<()> {
        if self.unit_specifier > 1 {
            return Err(CodecError::invalid_argument("offs", "unit must be 0 or 1"));
        }
        Ok(())
    }

    pub fn to_body(&self) -> Vec<u8> {
        let mut body = self.x.to_be_bytes().to_vec();
        body.extend_from_slice(&self.y.to_be_bytes());
        body.push(self.unit_specifier);
        body
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exif {
    pub length: usize,
    pub data: Option<Vec<u8>>,
}

impl Exif {
    pub fn parse(body: &[u8]) -> CodecResult<Self> {
        let exif = Exif {
            length: body.len(),
            data: Some(body.to_vec()),
        };
        exif.validate()
            .map_err(|_| CodecError::malformed_chunk("eXIf", "bad TIFF header"))?;
        Ok(exif)
    }

    pub fn validate(&self) -> CodecResult<&[u8]> {
        let data = payload_prefix(self.length, self.data.as_deref(), "exif", false)?;
        if data.len() < 4 || !(data.starts_with(b"MM\0*") || data.starts_with(b"II*\0")) {
            return Err(CodecError::invalid_argument("exif", "missing TIFF byte-order header"));
        }
        Ok(data)
    }
}

/// Check a PNG keyword: 1..=79 printable Latin-1 bytes, no leading, trailing
/// or consecutive spaces.
pub fn check_keyword(keyword: &[u8], name: &'static str) -> CodecResult<()> {
    if keyword.is_empty() || keyword.len() > 79 {
        return Err(CodecError::invalid_argument(name, "keyword must be 1..=79 bytes"));
    }
    if !keyword.iter().all(|&b| (32..=126).contains(&b) || b >= 161) {
        return Err(CodecError::invalid_argument(name, "keyword has non-printable bytes"));
    }
    if keyword[0] == b' ' || keyword[keyword.len() - 1] == b' ' || keyword.windows(2).any(|w| w == b"  ") {
        return Err(CodecError::invalid_argument(name, "keyword has misplaced spaces"));
    }
    Ok(())
}

/// Resolve a declared length against its payload. The declared length must not
/// exceed the payload, and must be non-zero unless `allow_empty`.
fn payload_prefix<'p>(
    length: usize,
    payload: Option<&'p [u8]>,
    name: &'static str,
    allow_empty: bool,
) -> CodecResult<&'p [u8]> {
    match payload {
        None if length == 0 && allow_empty => Ok(&[]),
        None => Err(CodecError::invalid_argument(name, "declared length without payload")),
        Some(_) if length == 0 && !allow_empty => {
            Err(CodecError::invalid_argument(name, "empty payload"))
        }
        Some(data) if length > data.len() => Err(CodecError::invalid_argument(
            name,
            format!("declared length {length} exceeds payload of {} bytes", data.len()),
        )),
        Some(data) => Ok(&data[..length]),
    }
}

pub(crate) fn is_known_chunk(kind: &[u8; 4]) -> bool {
    matches!(
        kind,
        b"IHDR" | b"PLTE" | b"IDAT" | b"IEND" | b"tRNS" | b"cHRM" | b"gAMA" | b"iCCP"
            | b"sBIT" | b"sRGB" | b"tEXt" | b"zTXt" | b"iTXt" | b"bKGD" | b"hIST"
            | b"pHYs" | b"sPLT" | b"tIME" | b"oFFs" | b"eXIf" | b"acTL" | b"fcTL"
            | b"fdAT" | b"cICP" | b"mDCv" | b"cLLi"
    )
}

pub(crate) fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

pub(crate) fn string_to_latin1(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

fn be16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ihdr(color_type: u8, bit_depth: u8) -> Ihdr {
        Ihdr {
            width: 4,
            height: 4,
            bit_depth,
            color_type,
            ..Ihdr::default()
        }
    }

    #[test]
    fn test_ihdr_validation() {
        assert!(ihdr(COLOR_TRUECOLOR, 8).validate().is_ok());
        assert!(ihdr(COLOR_INDEXED, 16).validate().is_err());
        assert!(ihdr(7, 8).validate().is_err());
        let mut bad = ihdr(COLOR_GRAY, 8);
        bad.compression_method = 3;
        assert!(bad.validate().is_err());
        bad = ihdr(COLOR_GRAY, 8);
        bad.width = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_row_and_image_bytes() {
        let h = Ihdr {
            width: 3,
            height: 2,
            bit_depth: 1,
            color_type: COLOR_GRAY,
            ..Ihdr::default()
        };
        assert_eq!(h.row_bytes(3), Some(1));
        assert_eq!(h.image_bytes(), Some(2));
        let h = ihdr(COLOR_TRUECOLOR_ALPHA, 16);
        assert_eq!(h.row_bytes(4), Some(32));
        assert_eq!(h.image_bytes(), Some(128));
    }

    #[test]
    fn test_keyword_rules() {
        assert!(check_keyword(b"Title", "t").is_ok());
        assert!(check_keyword(b"", "t").is_err());
        assert!(check_keyword(&[b'a'; 80], "t").is_err());
        assert!(check_keyword(b" lead", "t").is_err());
        assert!(check_keyword(b"two  spaces", "t").is_err());
        assert!(check_keyword(b"ctl\x01", "t").is_err());
    }

    #[test]
    fn test_declared_length_beyond_payload_is_rejected() {
        let text = Text {
            keyword: b"Comment".to_vec(),
            text_type: TextKind::Text as u8,
            length: 10,
            text: Some(b"short".to_vec()),
            ..Text::default()
        };
        assert!(text.prepare().is_err());

        let exif = Exif {
            length: 64,
            data: Some(b"MM\0*".to_vec()),
        };
        assert!(exif.validate().is_err());
    }

    #[test]
    fn test_text_prepare_latin1() {
        let text = Text {
            keyword: b"Author".to_vec(),
            text_type: TextKind::Ztxt as u8,
            length: 3,
            text: Some(vec![b'a', 0xE9, b'b']),
            ..Text::default()
        };
        let prepared = text.prepare().unwrap();
        assert_eq!(prepared.kind, TextKind::Ztxt);
        assert_eq!(prepared.text, "a\u{e9}b");
        assert_eq!(string_to_latin1(&prepared.text), vec![b'a', 0xE9, b'b']);
    }

    #[test]
    fn test_sbit_bkgd_round_trip_bodies() {
        let sbit = Sbit {
            red_bits: 5,
            green_bits: 6,
            blue_bits: 5,
            alpha_bits: 8,
            ..Sbit::default()
        };
        let body = sbit.to_body(COLOR_TRUECOLOR_ALPHA);
        assert_eq!(Sbit::parse(&body, COLOR_TRUECOLOR_ALPHA).unwrap(), sbit);
        assert!(sbit.validate(&ihdr(COLOR_TRUECOLOR_ALPHA, 8)).is_ok());
        assert!(Sbit::default().validate(&ihdr(COLOR_GRAY, 8)).is_err());

        let bkgd = Bkgd {
            plte_index: 3,
            ..Bkgd::default()
        };
        assert_eq!(Bkgd::parse(&bkgd.to_body(COLOR_INDEXED), COLOR_INDEXED).unwrap(), bkgd);
        assert!(bkgd.validate(&ihdr(COLOR_INDEXED, 8), Some(2)).is_err());
        assert!(bkgd.validate(&ihdr(COLOR_INDEXED, 8), Some(4)).is_ok());
    }

    #[test]
    fn test_iccp_body_round_trip() {
        let iccp = Iccp {
            profile_name: b"sRGB".to_vec(),
            profile_len: 5,
            profile: Some(b"abcdefgh".to_vec()),
        };
        let body = iccp.to_body(Compression::default()).unwrap();
        let parsed = Iccp::parse(&body, 1024).unwrap();
        assert_eq!(parsed.profile_name, b"sRGB");
        assert_eq!(parsed.profile.as_deref(), Some(&b"abcde"[..]));
        assert!(Iccp::parse(&body, 2).is_err());
    }

    #[test]
    fn test_splt_parse_and_validate() {
        let splt = Splt {
            name: b"six colours".to_vec(),
            sample_depth: 16,
            n_entries: 2,
            entries: Some(vec![SpltEntry::default(); 3]),
        };
        let parsed = Splt::parse(&splt.to_body().unwrap()).unwrap();
        assert_eq!(parsed.n_entries, 2);
        let overrun = Splt {
            n_entries: 9,
            ..splt
        };
        assert!(overrun.validate().is_err());
    }

    #[test]
    fn test_empty_splt_has_no_entries() {
        let parsed = Splt::parse(b"pal\0\x08").unwrap();
        assert_eq!(parsed.n_entries, 0);
        assert!(parsed.entries.is_none());
        assert_eq!(parsed.validate().unwrap().len(), 0);
    }

    #[test]
    fn test_unknown_chunk_rules() {
        let mut chunk = UnknownChunk {
            chunk_type: *b"prVt",
            location: 1,
            length: 2,
            data: Some(vec![1, 2, 3]),
        };
        assert_eq!(chunk.validate().unwrap(), ChunkLocation::AfterIhdr);
        assert_eq!(chunk.body(), &[1, 2]);
        chunk.chunk_type = *b"tIME";
        assert!(chunk.validate().is_err());
        chunk.chunk_type = *b"PRVT";
        assert!(chunk.validate().is_err());
        chunk.chunk_type = *b"prVt";
        chunk.location = 0;
        assert!(chunk.validate().is_err());
    }

    #[test]
    fn test_time_and_offs() {
        let time = Time {
            year: 1999,
            month: 12,
            day: 31,
            hour: 23,
            minute: 59,
            second: 59,
        };
        assert_eq!(Time::parse(&time.to_body()).unwrap(), time);
        assert!(Time::default().validate().is_err());
        let offs = Offs {
            x: -5,
            y: 7,
            unit_specifier: 1,
        };
        assert_eq!(Offs::parse(&offs.to_body()).unwrap(), offs);
    }

    #[test]
    fn test_chrm_fixed_point() {
        let chrm = Chrm {
            white_point_x: 0.3127,
            white_point_y: 0.329,
            ..Chrm::default()
        };
        let fixed = chrm.to_fixed().unwrap();
        assert_eq!(fixed.white_point_x, 31270);
        assert!(Chrm {
            red_x: -1.0,
            ..Chrm::default()
        }
        .to_fixed()
        .is_err());
    }
}
