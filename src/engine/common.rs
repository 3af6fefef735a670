// src/engine/common.rs
//
// Common utilities shared across engine modules: the result alias, the
// harness-owned random source and the panic policy around codec calls.

use crate::engine::api::SessionOutcome;
use crate::engine::firewall::BufferRejection;
use crate::error::{CodecError, ContractViolation, HarnessError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::borrow::Cow;
use tracing::debug;

/// Result type of every harness entry point.
pub type EngineResult<T> = std::result::Result<T, HarnessError>;

/// Early exit from a harness phase.
#[derive(Debug)]
pub enum Stop {
    /// The session ends here with a non-fatal outcome.
    Outcome(SessionOutcome),
    /// The codec broke its contract.
    Violation(ContractViolation),
}

impl From<ContractViolation> for Stop {
    fn from(violation: ContractViolation) -> Self {
        Stop::Violation(violation)
    }
}

impl From<BufferRejection> for Stop {
    fn from(rejection: BufferRejection) -> Self {
        debug!(target: "png_harness::firewall", %rejection, "buffer rejected");
        Stop::Outcome(SessionOutcome::BufferRejected(rejection))
    }
}

/// Result of one harness phase.
pub type Step<T> = std::result::Result<T, Stop>;

/// Map a codec error at `stage` to the end of the session.
pub fn rejected(stage: &'static str) -> impl FnOnce(CodecError) -> Stop {
    move |error| {
        debug!(target: "png_harness::codec", stage, code = error.code(), %error, "codec rejected");
        Stop::Outcome(SessionOutcome::CodecRejected { stage, error })
    }
}

/// Run one phase under the panic policy.
pub fn guarded<T>(stage: &'static str, call: impl FnOnce() -> Step<T>) -> Step<T> {
    match run_with_panic_policy(stage, call) {
        Ok(step) => step,
        Err(violation) => Err(Stop::Violation(violation)),
    }
}

/// Fold a finished session into its outcome. Contract violations become errors.
pub fn conclude(step: Step<()>) -> EngineResult<SessionOutcome> {
    match step {
        Ok(()) => Ok(SessionOutcome::Completed),
        Err(Stop::Outcome(outcome)) => Ok(outcome),
        Err(Stop::Violation(violation)) => Err(HarnessError::Contract(violation)),
    }
}

/// Seeded pseudo-random source threaded through synthesis and both harnesses.
///
/// Two generators built from the same seed produce the same run, which is what
/// makes a recorded seed replayable.
#[derive(Debug, Clone)]
pub struct HarnessRng {
    seed: u64,
    inner: StdRng,
}

impl HarnessRng {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            seed,
            inner: StdRng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Uniform value in `0..bound`; 0 when `bound` is 0.
    pub fn below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            0
        } else {
            self.inner.gen_range(0..bound)
        }
    }

    pub fn below_usize(&mut self, bound: usize) -> usize {
        self.below(bound as u64) as usize
    }

    pub fn coin(&mut self) -> bool {
        self.inner.gen_bool(0.5)
    }

    /// True with probability `p`; values outside [0, 1] saturate.
    pub fn chance(&mut self, p: f64) -> bool {
        if p >= 1.0 {
            true
        } else if p <= 0.0 || p.is_nan() {
            false
        } else {
            self.inner.gen_bool(p)
        }
    }

    pub fn pick<T: Copy>(&mut self, items: &[T]) -> Option<T> {
        if items.is_empty() {
            return None;
        }
        Some(items[self.below_usize(items.len())])
    }

    pub fn u8(&mut self) -> u8 {
        self.inner.gen()
    }

    pub fn u16(&mut self) -> u16 {
        self.inner.gen()
    }

    pub fn u32(&mut self) -> u32 {
        self.inner.gen()
    }

    pub fn i32(&mut self) -> i32 {
        self.inner.gen()
    }

    pub fn bytes(&mut self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.inner.fill(out.as_mut_slice());
        out
    }

    /// Random payload of `0..max_len` bytes; an empty draw yields `None`.
    pub fn payload(&mut self, max_len: usize) -> Option<Vec<u8>> {
        match self.below_usize(max_len) {
            0 => None,
            len => Some(self.bytes(len)),
        }
    }
}

/// Run one codec call under the crate's panic policy.
///
/// Without the `fuzzing` feature a panic inside the codec is caught and turned
/// into a contract violation. With it, the panic propagates so the fuzzing
/// engine records the crash.
pub fn run_with_panic_policy<T>(
    stage: &'static str,
    call: impl FnOnce() -> T,
) -> std::result::Result<T, ContractViolation> {
    #[cfg(feature = "fuzzing")]
    {
        let _ = stage;
        Ok(call())
    }
    #[cfg(not(feature = "fuzzing"))]
    {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(call)).map_err(|payload| {
            ContractViolation::CodecPanicked {
                stage,
                message: panic_message(payload.as_ref()),
            }
        })
    }
}

#[cfg_attr(feature = "fuzzing", allow(dead_code))]
fn panic_message(payload: &(dyn std::any::Any + Send)) -> Cow<'static, str> {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        Cow::Borrowed(s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        Cow::Owned(s.clone())
    } else {
        Cow::Borrowed("non-string panic payload")
    }
}
