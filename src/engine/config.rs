// src/engine/config.rs
//
// Configuration synthesizer: feature code -> FeatureConfig -> ImageConfig.
//
// Code layout (PngSuite style, e.g. `bgbi4a08`):
//   [0]     feature family
//   [1..3]  family parameters
//   [3]     'i' for Adam7, anything else for non-interlaced
//   [4]     colour type digit
//   [6..8]  bit depth digits

use crate::codecs::records::{TextKind, Time, COLOR_TRUECOLOR};
use crate::engine::common::HarnessRng;
use crate::engine::namer::{FeatureCode, FEATURE_CODE_LEN};
use crate::ops::{DecodeFlags, FilterChoice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Background {
    #[default]
    None,
    Black,
    Gray,
    White,
    Yellow,
}

impl Background {
    fn from_letter(letter: u8) -> Option<Self> {
        match letter {
            b'a' => Some(Background::None),
            b'b' => Some(Background::Black),
            b'g' => Some(Background::Gray),
            b'w' => Some(Background::White),
            b'y' => Some(Background::Yellow),
            _ => None,
        }
    }

    fn from_letter_or_none(letter: u8) -> Self {
        Self::from_letter(letter).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaletteIntent {
    #[default]
    Chunk,
    Suggested8,
    Suggested16,
}

impl PaletteIntent {
    /// Sample depth the suggested-palette variants ask for.
    pub fn splt_depth(self) -> Option<u8> {
        match self {
            PaletteIntent::Chunk => None,
            PaletteIntent::Suggested8 => Some(8),
            PaletteIntent::Suggested16 => Some(16),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextIntent {
    #[default]
    None,
    Plain,
    Compressed,
    InternationalEnglish,
    InternationalFinnish,
    InternationalGreek,
    InternationalHindi,
    InternationalJapanese,
}

impl TextIntent {
    /// Text chunk kind and iTXt language tag the text family names.
    pub fn record_kind(self) -> Option<(TextKind, &'static [u8])> {
        match self {
            TextIntent::None => None,
            TextIntent::Plain => Some((TextKind::Text, b"")),
            TextIntent::Compressed => Some((TextKind::Ztxt, b"")),
            TextIntent::InternationalEnglish => Some((TextKind::Itxt, b"en")),
            TextIntent::InternationalFinnish => Some((TextKind::Itxt, b"fi")),
            TextIntent::InternationalGreek => Some((TextKind::Itxt, b"el")),
            TextIntent::InternationalHindi => Some((TextKind::Itxt, b"hi")),
            TextIntent::InternationalJapanese => Some((TextKind::Itxt, b"ja")),
        }
    }
}

/// One parsed feature family with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureConfig {
    /// Unrecognized family or a code shorter than eight bytes.
    Unrecognized,
    Size { size: u32 },
    Background { color: Background },
    Transparency { transparent: bool, background: Option<Background> },
    Gamma { gamma: f64 },
    Filtering { filter: i32 },
    Palette { palette: PaletteIntent },
    SignificantBits { bits: u8 },
    Histogram { colors: u16 },
    PhysicalPixels { ppu_x: u32, ppu_y: u32, unit_specifier: u8 },
    Text { text: TextIntent },
    Time { year: u16, month: u8, day: u8 },
    ChunkOrdering { order: u8 },
    Compression { level: i32 },
    Corrupted,
    Exif,
}

impl FeatureConfig {
    /// Parse the family part of `code`. `rng` feeds the variants the naming
    /// scheme leaves randomized (`cdu`).
    pub fn parse(code: &FeatureCode, rng: &mut HarnessRng) -> Self {
        if code.len() < FEATURE_CODE_LEN {
            return FeatureConfig::Unrecognized;
        }
        let param = &code.as_bytes()[1..3];
        match code.at(0) {
            b's' => FeatureConfig::Size {
                size: u32::try_from(atoi(param)).unwrap_or_default(),
            },
            b'b' => {
                let color = match (code.at(1), Background::from_letter(code.at(2))) {
                    (b'g', Some(color)) => color,
                    (letter, _) => Background::from_letter_or_none(letter),
                };
                FeatureConfig::Background { color }
            }
            b't' => match param {
                [b'b', letter] => FeatureConfig::Transparency {
                    transparent: true,
                    background: Some(Background::from_letter_or_none(*letter)),
                },
                b"p0" => FeatureConfig::Transparency {
                    transparent: false,
                    background: None,
                },
                b"p1" => FeatureConfig::Transparency {
                    transparent: true,
                    background: Some(Background::None),
                },
                b"m3" => FeatureConfig::Transparency {
                    transparent: true,
                    background: None,
                },
                _ => FeatureConfig::Transparency {
                    transparent: false,
                    background: None,
                },
            },
            b'g' => {
                let mut gamma = atof(param) / 10.0;
                if gamma <= 0.5 {
                    gamma += 0.05;
                }
                FeatureConfig::Gamma { gamma }
            }
            b'f' => {
                let filter = match atoi(param) {
                    99 => 0,
                    other => other,
                };
                FeatureConfig::Filtering { filter }
            }
            b'p' => FeatureConfig::Palette {
                palette: match param {
                    b"s1" => PaletteIntent::Suggested8,
                    b"s2" => PaletteIntent::Suggested16,
                    _ => PaletteIntent::Chunk,
                },
            },
            b'c' => parse_chunk_family(code, rng),
            b'o' => FeatureConfig::ChunkOrdering {
                order: code.at(2).wrapping_sub(b'0'),
            },
            b'z' => FeatureConfig::Compression {
                level: atoi(param),
            },
            b'x' => FeatureConfig::Corrupted,
            b'e' => FeatureConfig::Exif,
            _ => FeatureConfig::Unrecognized,
        }
    }

    pub fn family(&self) -> &'static str {
        match self {
            FeatureConfig::Unrecognized => "unrecognized",
            FeatureConfig::Size { .. } => "size",
            FeatureConfig::Background { .. } => "background",
            FeatureConfig::Transparency { .. } => "transparency",
            FeatureConfig::Gamma { .. } => "gamma",
            FeatureConfig::Filtering { .. } => "filtering",
            FeatureConfig::Palette { .. } => "palette",
            FeatureConfig::SignificantBits { .. } => "significant_bits",
            FeatureConfig::Histogram { .. } => "histogram",
            FeatureConfig::PhysicalPixels { .. } => "physical_pixels",
            FeatureConfig::Text { .. } => "text",
            FeatureConfig::Time { .. } => "time",
            FeatureConfig::ChunkOrdering { .. } => "chunk_ordering",
            FeatureConfig::Compression { .. } => "compression",
            FeatureConfig::Corrupted => "corrupted",
            FeatureConfig::Exif => "exif",
        }
    }
}

fn parse_chunk_family(code: &FeatureCode, rng: &mut HarnessRng) -> FeatureConfig {
    let detail = code.at(2);
    match code.at(1) {
        b's' => FeatureConfig::SignificantBits {
            bits: detail.wrapping_sub(b'0'),
        },
        b'h' => FeatureConfig::Histogram {
            colors: if detail == b'1' { 15 } else { 256 },
        },
        b'd' => {
            let (ppu_x, ppu_y, unit_specifier) = match detail {
                b'f' => (8, 32, 0),
                b'h' => (32, 8, 0),
                b's' => (8, 8, 0),
                b'u' => {
                    let mut draw = |bound| u32::try_from(rng.below(bound)).unwrap_or_default();
                    let (x, y) = (draw(1000), draw(1000));
                    (x, y, u8::try_from(draw(2)).unwrap_or_default())
                }
                _ => (0, 0, 0),
            };
            FeatureConfig::PhysicalPixels {
                ppu_x,
                ppu_y,
                unit_specifier,
            }
        }
        b't' => FeatureConfig::Text {
            text: match detail {
                b'1' => TextIntent::Plain,
                b'z' => TextIntent::Compressed,
                b'e' => TextIntent::InternationalEnglish,
                b'f' => TextIntent::InternationalFinnish,
                b'g' => TextIntent::InternationalGreek,
                b'h' => TextIntent::InternationalHindi,
                b'j' => TextIntent::InternationalJapanese,
                _ => TextIntent::None,
            },
        },
        b'm' => {
            let (year, month, day) = match detail {
                b'7' => (1970, 1, 1),
                b'9' => (1999, 12, 31),
                b'0' => (2000, 1, 1),
                _ => (0, 0, 0),
            };
            FeatureConfig::Time { year, month, day }
        }
        _ => FeatureConfig::Unrecognized,
    }
}

/// One synthesized test scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageConfig {
    pub feature: FeatureConfig,
    pub size: u32,
    pub background: Background,
    pub transparent: bool,
    pub gamma: f64,
    pub filtering: i32,
    pub palette: PaletteIntent,
    pub significant_bits: u8,
    pub histogram_colors: u16,
    pub ppu_x: u32,
    pub ppu_y: u32,
    pub unit_specifier: u8,
    pub text: TextIntent,
    pub time: Time,
    pub compression: i32,
    pub interlace: bool,
    pub color_type: u8,
    pub bit_depth: u8,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            feature: FeatureConfig::Unrecognized,
            size: 32,
            background: Background::None,
            transparent: false,
            gamma: 1.0,
            filtering: 0,
            palette: PaletteIntent::Chunk,
            significant_bits: 0,
            histogram_colors: 0,
            ppu_x: 0,
            ppu_y: 0,
            unit_specifier: 0,
            text: TextIntent::None,
            time: Time::default(),
            compression: 0,
            interlace: false,
            color_type: COLOR_TRUECOLOR,
            bit_depth: 8,
        }
    }
}

impl ImageConfig {
    /// Synthesize the configuration named by `code`.
    ///
    /// Codes shorter than eight bytes give the default configuration. Longer
    /// codes always carry the geometry triple from positions 3..8, even when
    /// the family is unrecognized.
    pub fn from_code(code: &FeatureCode, rng: &mut HarnessRng) -> Self {
        let mut config = ImageConfig::default();
        if code.len() < FEATURE_CODE_LEN {
            return config;
        }
        let feature = FeatureConfig::parse(code, rng);
        match &feature {
            FeatureConfig::Size { size } => config.size = *size,
            FeatureConfig::Background { color } => config.background = *color,
            FeatureConfig::Transparency {
                transparent,
                background,
            } => {
                config.transparent = *transparent;
                if let Some(background) = background {
                    config.background = *background;
                }
            }
            FeatureConfig::Gamma { gamma } => config.gamma = *gamma,
            FeatureConfig::Filtering { filter } => config.filtering = *filter,
            FeatureConfig::Palette { palette } => config.palette = *palette,
            FeatureConfig::SignificantBits { bits } => config.significant_bits = *bits,
            FeatureConfig::Histogram { colors } => config.histogram_colors = *colors,
            FeatureConfig::PhysicalPixels {
                ppu_x,
                ppu_y,
                unit_specifier,
            } => {
                config.ppu_x = *ppu_x;
                config.ppu_y = *ppu_y;
                config.unit_specifier = *unit_specifier;
            }
            FeatureConfig::Text { text } => config.text = *text,
            FeatureConfig::Time { year, month, day } => {
                config.time = Time {
                    year: *year,
                    month: *month,
                    day: *day,
                    ..Time::default()
                }
            }
            FeatureConfig::Compression { level } => config.compression = *level,
            FeatureConfig::ChunkOrdering { .. }
            | FeatureConfig::Unrecognized
            | FeatureConfig::Corrupted
            | FeatureConfig::Exif => {}
        }
        config.feature = feature;
        config.interlace = code.at(3) == b'i';
        config.color_type = u8::try_from(atoi(&code.as_bytes()[4..5])).unwrap_or_default();
        config.bit_depth = u8::try_from(atoi(&code.as_bytes()[6..8])).unwrap_or_default();
        config
    }

    /// Decode flags implied by the feature under test.
    pub fn decode_flags(&self) -> DecodeFlags {
        match self.feature {
            FeatureConfig::Transparency { .. } => DecodeFlags::TRNS,
            FeatureConfig::Gamma { .. } => DecodeFlags::GAMMA,
            FeatureConfig::SignificantBits { .. } => DecodeFlags::USE_SBIT,
            _ => DecodeFlags::empty(),
        }
    }

    /// Filter selection requested by the filtering family, if any.
    pub fn filter_choice(&self) -> Option<FilterChoice> {
        if !matches!(self.feature, FeatureConfig::Filtering { .. }) {
            return None;
        }
        Some(match self.filtering {
            0 => FilterChoice::NONE,
            1 => FilterChoice::SUB,
            2 => FilterChoice::UP,
            3 => FilterChoice::AVG,
            4 => FilterChoice::PAETH,
            _ => FilterChoice::ALL,
        })
    }

    /// Image compression level requested by the compression family, if any.
    pub fn compression_level(&self) -> Option<i32> {
        matches!(self.feature, FeatureConfig::Compression { .. }).then_some(self.compression)
    }
}

/// Leading integer of `bytes`, 0 when there is none.
fn atoi(bytes: &[u8]) -> i32 {
    let (negative, digits) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        Some(b'+') => (false, &bytes[1..]),
        _ => (false, bytes),
    };
    let value = digits
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0i32, |acc, b| acc.saturating_mul(10).saturating_add(i32::from(b - b'0')));
    if negative {
        -value
    } else {
        value
    }
}

/// Leading decimal number of `bytes`, 0.0 when there is none.
fn atof(bytes: &[u8]) -> f64 {
    let end = bytes
        .iter()
        .enumerate()
        .take_while(|&(i, &b)| {
            b.is_ascii_digit() || b == b'.' || (i == 0 && matches!(b, b'-' | b'+'))
        })
        .count();
    std::str::from_utf8(&bytes[..end])
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}
