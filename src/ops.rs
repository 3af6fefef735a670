// src/ops.rs
//
// Vocabulary shared by the codec sessions and the harness: tunable options,
// pixel formats, decode/encode flags and CRC policies.

use bitflags::bitflags;

/// Which side of the codec a context drives. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRole {
    Decoder,
    Encoder,
}

impl ContextRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextRole::Decoder => "decoder",
            ContextRole::Encoder => "encoder",
        }
    }
}

/// The twelve tunables a session exposes through `set_option` / `get_option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecOption {
    KeepUnknownChunks,
    ImgCompressionLevel,
    ImgWindowBits,
    ImgMemLevel,
    ImgCompressionStrategy,
    TextCompressionLevel,
    TextWindowBits,
    TextMemLevel,
    TextCompressionStrategy,
    FilterChoice,
    ChunkCountLimit,
    EncodeToBuffer,
}

impl CodecOption {
    pub const ALL: [CodecOption; 12] = [
        CodecOption::KeepUnknownChunks,
        CodecOption::ImgCompressionLevel,
        CodecOption::ImgWindowBits,
        CodecOption::ImgMemLevel,
        CodecOption::ImgCompressionStrategy,
        CodecOption::TextCompressionLevel,
        CodecOption::TextWindowBits,
        CodecOption::TextMemLevel,
        CodecOption::TextCompressionStrategy,
        CodecOption::FilterChoice,
        CodecOption::ChunkCountLimit,
        CodecOption::EncodeToBuffer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CodecOption::KeepUnknownChunks => "keep_unknown_chunks",
            CodecOption::ImgCompressionLevel => "img_compression_level",
            CodecOption::ImgWindowBits => "img_window_bits",
            CodecOption::ImgMemLevel => "img_mem_level",
            CodecOption::ImgCompressionStrategy => "img_compression_strategy",
            CodecOption::TextCompressionLevel => "text_compression_level",
            CodecOption::TextWindowBits => "text_window_bits",
            CodecOption::TextMemLevel => "text_mem_level",
            CodecOption::TextCompressionStrategy => "text_compression_strategy",
            CodecOption::FilterChoice => "filter_choice",
            CodecOption::ChunkCountLimit => "chunk_count_limit",
            CodecOption::EncodeToBuffer => "encode_to_buffer",
        }
    }
}

/// Pixel layout requested from (or supplied to) the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Native PNG sample layout, exactly as stored.
    Png,
    /// Native samples, big-endian, no transformation.
    Raw,
    /// Palette, low bit depths and tRNS expanded to full channels.
    Expand,
    /// `Expand` plus 16-bit samples stripped to 8 bits.
    Color8,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 4] = [
        PixelFormat::Png,
        PixelFormat::Raw,
        PixelFormat::Expand,
        PixelFormat::Color8,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Png => "png",
            PixelFormat::Raw => "raw",
            PixelFormat::Expand => "expand",
            PixelFormat::Color8 => "color8",
        }
    }

    /// Decoder transformations producing this layout.
    ///
    /// tRNS is folded into alpha by `Expand` and `Color8`; the png binding performs no
    /// gamma correction, so decode flags never change the output layout.
    pub(crate) fn transformations(self) -> png::Transformations {
        match self {
            PixelFormat::Png | PixelFormat::Raw => png::Transformations::IDENTITY,
            PixelFormat::Expand => png::Transformations::EXPAND,
            PixelFormat::Color8 => png::Transformations::EXPAND | png::Transformations::STRIP_16,
        }
    }

    /// Whether the encoder accepts source pixels in this layout.
    pub fn is_encodable(self) -> bool {
        matches!(self, PixelFormat::Png | PixelFormat::Raw)
    }
}

bitflags! {
    /// Decode-time behaviour switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DecodeFlags: u32 {
        const USE_TRNS = 1;
        const USE_GAMA = 1 << 1;
        const USE_SBIT = 1 << 3;
        const TRNS = 1 << 4;
        const GAMMA = 1 << 5;
        const PROGRESSIVE = 1 << 8;
    }
}

impl DecodeFlags {
    /// Individual flags the decode harness samples from.
    pub const CHOICES: [DecodeFlags; 6] = [
        DecodeFlags::USE_TRNS,
        DecodeFlags::USE_GAMA,
        DecodeFlags::USE_SBIT,
        DecodeFlags::TRNS,
        DecodeFlags::GAMMA,
        DecodeFlags::PROGRESSIVE,
    ];
}

bitflags! {
    /// Encode-time behaviour switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EncodeFlags: u32 {
        const PROGRESSIVE = 1;
        const FINALIZE = 1 << 1;
    }
}

bitflags! {
    /// Per-row filter candidates for the encoder's `FilterChoice` option.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FilterChoice: u32 {
        const NONE = 8;
        const SUB = 16;
        const UP = 32;
        const AVG = 64;
        const PAETH = 128;
        const ALL = Self::NONE.bits()
            | Self::SUB.bits()
            | Self::UP.bits()
            | Self::AVG.bits()
            | Self::PAETH.bits();
    }
}

impl FilterChoice {
    /// `0` is a valid choice too: filtering disabled entirely.
    pub const DISABLE: FilterChoice = FilterChoice::empty();

    pub const CHOICES: [FilterChoice; 7] = [
        FilterChoice::DISABLE,
        FilterChoice::NONE,
        FilterChoice::SUB,
        FilterChoice::UP,
        FilterChoice::AVG,
        FilterChoice::PAETH,
        FilterChoice::ALL,
    ];

    pub(crate) fn to_png(self) -> (png::FilterType, png::AdaptiveFilterType) {
        let single = |f: FilterChoice| {
            if f == FilterChoice::SUB {
                Some(png::FilterType::Sub)
            } else if f == FilterChoice::UP {
                Some(png::FilterType::Up)
            } else if f == FilterChoice::AVG {
                Some(png::FilterType::Avg)
            } else if f == FilterChoice::PAETH {
                Some(png::FilterType::Paeth)
            } else if f == FilterChoice::NONE || f.is_empty() {
                Some(png::FilterType::NoFilter)
            } else {
                None
            }
        };
        match single(self) {
            Some(filter) => (filter, png::AdaptiveFilterType::NonAdaptive),
            None => (png::FilterType::Sub, png::AdaptiveFilterType::Adaptive),
        }
    }
}

/// What the decoder does when a chunk's CRC does not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcAction {
    /// Fail the session.
    Error,
    /// Drop the chunk silently (ancillary chunks only).
    Discard,
    /// Ignore the mismatch and use the chunk data.
    Use,
}

/// Where an unknown chunk sits relative to the critical chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkLocation {
    AfterIhdr = 1,
    AfterPlte = 2,
    AfterIdat = 8,
}

impl ChunkLocation {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(ChunkLocation::AfterIhdr),
            2 => Some(ChunkLocation::AfterPlte),
            8 => Some(ChunkLocation::AfterIdat),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_choice_mapping() {
        assert_eq!(
            FilterChoice::DISABLE.to_png(),
            (png::FilterType::NoFilter, png::AdaptiveFilterType::NonAdaptive)
        );
        assert_eq!(
            FilterChoice::PAETH.to_png(),
            (png::FilterType::Paeth, png::AdaptiveFilterType::NonAdaptive)
        );
        assert_eq!(FilterChoice::ALL.to_png().1, png::AdaptiveFilterType::Adaptive);
        assert_eq!(FilterChoice::ALL.bits(), 248);
    }

    #[test]
    fn test_format_transformations() {
        assert!(PixelFormat::Color8
            .transformations()
            .contains(png::Transformations::STRIP_16));
        assert_eq!(
            PixelFormat::Raw.transformations(),
            png::Transformations::IDENTITY
        );
        assert!(PixelFormat::Png.is_encodable());
        assert!(!PixelFormat::Expand.is_encodable());
    }

    #[test]
    fn test_option_names_unique() {
        let mut names: Vec<&str> = CodecOption::ALL.iter().map(|o| o.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 12);
    }

    #[test]
    fn test_chunk_location_raw() {
        assert_eq!(ChunkLocation::from_raw(2), Some(ChunkLocation::AfterPlte));
        assert_eq!(ChunkLocation::from_raw(0), None);
    }
}
