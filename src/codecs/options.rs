// src/codecs/options.rs
//
// Per-session option storage with domain validation.

use crate::codecs::CodecResult;
use crate::error::CodecError;
use crate::ops::{CodecOption, ContextRole, FilterChoice};

pub const DEFAULT_CHUNK_COUNT_LIMIT: i32 = 1000;

#[derive(Debug, Clone)]
pub(crate) struct OptionTable {
    role: ContextRole,
    values: [i32; 12],
}

impl OptionTable {
    pub(crate) fn new(role: ContextRole) -> Self {
        let mut table = Self {
            role,
            values: [0; 12],
        };
        for option in CodecOption::ALL {
            table.values[index(option)] = default_value(option);
        }
        table
    }

    pub(crate) fn set(&mut self, option: CodecOption, value: i32) -> CodecResult<()> {
        if option == CodecOption::EncodeToBuffer && self.role == ContextRole::Decoder {
            return Err(CodecError::context_type("set_option(encode_to_buffer)", self.role.as_str()));
        }
        let valid = match option {
            CodecOption::KeepUnknownChunks | CodecOption::EncodeToBuffer => matches!(value, 0 | 1),
            CodecOption::ImgCompressionLevel | CodecOption::TextCompressionLevel => {
                (-1..=9).contains(&value)
            }
            CodecOption::ImgWindowBits | CodecOption::TextWindowBits => (9..=15).contains(&value),
            CodecOption::ImgMemLevel | CodecOption::TextMemLevel => (1..=9).contains(&value),
            CodecOption::ImgCompressionStrategy | CodecOption::TextCompressionStrategy => {
                (0..=4).contains(&value)
            }
            CodecOption::FilterChoice => u32::try_from(value)
                .ok()
                .and_then(FilterChoice::from_bits)
                .is_some(),
            CodecOption::ChunkCountLimit => value >= 0,
        };
        if !valid {
            return Err(CodecError::invalid_argument(
                option.name(),
                format!("{value} is outside the option's domain"),
            ));
        }
        self.values[index(option)] = value;
        Ok(())
    }

    pub(crate) fn get(&self, option: CodecOption) -> i32 {
        self.values[index(option)]
    }

    pub(crate) fn flag(&self, option: CodecOption) -> bool {
        self.get(option) != 0
    }

    pub(crate) fn filter_choice(&self) -> FilterChoice {
        FilterChoice::from_bits_truncate(self.get(CodecOption::FilterChoice) as u32)
    }

    pub(crate) fn image_compression(&self) -> png::Compression {
        match self.get(CodecOption::ImgCompressionLevel) {
            0..=3 => png::Compression::Fast,
            7..=9 => png::Compression::Best,
            _ => png::Compression::Default,
        }
    }

    pub(crate) fn text_compression(&self) -> flate2::Compression {
        match self.get(CodecOption::TextCompressionLevel) {
            level @ 0..=9 => flate2::Compression::new(level as u32),
            _ => flate2::Compression::default(),
        }
    }

    pub(crate) fn chunk_count_limit(&self) -> usize {
        self.get(CodecOption::ChunkCountLimit).max(0) as usize
    }
}

fn index(option: CodecOption) -> usize {
    CodecOption::ALL
        .iter()
        .position(|o| *o == option)
        .unwrap_or_default()
}

fn default_value(option: CodecOption) -> i32 {
    match option {
        CodecOption::KeepUnknownChunks | CodecOption::EncodeToBuffer => 0,
        CodecOption::ImgCompressionLevel | CodecOption::TextCompressionLevel => -1,
        CodecOption::ImgWindowBits | CodecOption::TextWindowBits => 15,
        CodecOption::ImgMemLevel | CodecOption::TextMemLevel => 8,
        CodecOption::ImgCompressionStrategy => 1,
        CodecOption::TextCompressionStrategy => 0,
        CodecOption::FilterChoice => FilterChoice::ALL.bits() as i32,
        CodecOption::ChunkCountLimit => DEFAULT_CHUNK_COUNT_LIMIT,
    }
}
