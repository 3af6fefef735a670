// src/engine/firewall.rs
//
// Allocation firewall: the limits handed to the codec and the ceiling on the
// harness's own pixel buffers.

use crate::codecs::records::PNG_U31_MAX;
use crate::error::HarnessError;
use thiserror::Error;

pub const MAX_IMAGE_DIMENSION: u32 = 200_000;
pub const CHUNK_SOFT_LIMIT: usize = 4_000_000;
pub const CHUNK_HARD_LIMIT: usize = 2 * CHUNK_SOFT_LIMIT;
/// Largest image buffer the harness will allocate or hand to the encoder.
pub const MAX_BUFFER_BYTES: usize = 80_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessLimits {
    pub max_width: u32,
    pub max_height: u32,
    pub chunk_soft: usize,
    pub chunk_hard: usize,
    pub max_buffer_bytes: usize,
}

impl Default for HarnessLimits {
    fn default() -> Self {
        Self {
            max_width: MAX_IMAGE_DIMENSION,
            max_height: MAX_IMAGE_DIMENSION,
            chunk_soft: CHUNK_SOFT_LIMIT,
            chunk_hard: CHUNK_HARD_LIMIT,
            max_buffer_bytes: MAX_BUFFER_BYTES,
        }
    }
}

/// Why the harness refused to allocate or pass on a pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferRejection {
    #[error("{stage}: required buffer size is zero")]
    Empty { stage: &'static str },

    #[error("{stage}: {needed} bytes exceed the {limit}-byte ceiling")]
    Ceiling {
        stage: &'static str,
        needed: usize,
        limit: usize,
    },

    #[error("{stage}: {needed} bytes needed but the source holds {available}")]
    SourceTooShort {
        stage: &'static str,
        needed: usize,
        available: usize,
    },
}

impl HarnessLimits {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.max_width > PNG_U31_MAX || self.max_height > PNG_U31_MAX {
            return Err(HarnessError::invalid_config(
                "limits",
                "image dimensions above 2^31-1",
            ));
        }
        if self.chunk_soft > self.chunk_hard {
            return Err(HarnessError::invalid_config(
                "limits",
                format!(
                    "chunk soft limit {} exceeds hard limit {}",
                    self.chunk_soft, self.chunk_hard
                ),
            ));
        }
        Ok(())
    }

    /// Admit a buffer of `needed` bytes, or say why not.
    pub fn enforce_buffer(&self, needed: usize, stage: &'static str) -> Result<(), BufferRejection> {
        if needed == 0 {
            return Err(BufferRejection::Empty { stage });
        }
        if needed > self.max_buffer_bytes {
            return Err(BufferRejection::Ceiling {
                stage,
                needed,
                limit: self.max_buffer_bytes,
            });
        }
        Ok(())
    }

    /// Like [`Self::enforce_buffer`], and the bytes must also fit in `available`.
    pub fn enforce_source(
        &self,
        needed: usize,
        available: usize,
        stage: &'static str,
    ) -> Result<(), BufferRejection> {
        if needed > available {
            return Err(BufferRejection::SourceTooShort {
                stage,
                needed,
                available,
            });
        }
        self.enforce_buffer(needed, stage)
    }
}
