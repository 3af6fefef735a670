// src/engine/options.rs
//
// Randomized option chooser: samples (option, value) pairs from each tunable's
// documented domain.

use crate::codecs::CodecResult;
use crate::engine::common::HarnessRng;
use crate::ops::{CodecOption, FilterChoice};
use tracing::debug;

/// Compression levels the chooser draws from, including the "default"
/// sentinel (-1).
pub const COMPRESSION_LEVELS: [i32; 5] = [-1, 0, 1, 2, 9];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionChoice {
    pub option: CodecOption,
    pub value: i32,
}

/// Draw one value for `option`.
///
/// Window bits are drawn from 8..=15 although the codec accepts 9..=15, so the
/// lower edge of the domain keeps getting probed.
pub fn sample_value(option: CodecOption, rng: &mut HarnessRng) -> i32 {
    match option {
        CodecOption::KeepUnknownChunks | CodecOption::EncodeToBuffer => rng.below(2) as i32,
        CodecOption::ImgCompressionLevel | CodecOption::TextCompressionLevel => {
            rng.pick(&COMPRESSION_LEVELS).unwrap_or_default()
        }
        CodecOption::ImgWindowBits | CodecOption::TextWindowBits => rng.below(8) as i32 + 8,
        CodecOption::ImgMemLevel | CodecOption::TextMemLevel => rng.below(9) as i32 + 1,
        CodecOption::ImgCompressionStrategy | CodecOption::TextCompressionStrategy => {
            rng.below(5) as i32
        }
        CodecOption::FilterChoice => rng
            .pick(&FilterChoice::CHOICES)
            .map(|choice| choice.bits() as i32)
            .unwrap_or_default(),
        CodecOption::ChunkCountLimit => rng.below(i32::MAX as u64 + 1) as i32,
    }
}

/// Sample `count` pairs with replacement from all tunables.
pub fn choose_options(rng: &mut HarnessRng, count: usize) -> Vec<OptionChoice> {
    (0..count)
        .filter_map(|_| {
            let option = rng.pick(&CodecOption::ALL)?;
            Some(OptionChoice {
                option,
                value: sample_value(option, rng),
            })
        })
        .collect()
}

/// How many options a session applies: `0..12`.
pub fn random_option_count(rng: &mut HarnessRng) -> usize {
    rng.below_usize(CodecOption::ALL.len())
}

/// Hand every choice to `set`. Rejected values are logged and skipped; the
/// number accepted is returned.
pub fn apply_options(
    choices: &[OptionChoice],
    mut set: impl FnMut(CodecOption, i32) -> CodecResult<()>,
) -> usize {
    choices
        .iter()
        .filter(|choice| match set(choice.option, choice.value) {
            Ok(()) => true,
            Err(error) => {
                debug!(
                    target: "png_harness::codec",
                    option = choice.option.name(),
                    value = choice.value,
                    %error,
                    "set_option rejected"
                );
                false
            }
        })
        .count()
}
