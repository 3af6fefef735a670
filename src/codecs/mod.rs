// src/codecs/mod.rs
//
// Safe session wrappers around the png crate.
//
// A session is the "context" the harness drives: it owns its transport, its
// options and limits, and every record the codec produced. Dropping a session
// releases all of it exactly once.

pub mod chunks;
pub mod decoder;
pub mod encoder;
pub mod options;
pub mod records;

pub use decoder::PngDecodeSession;
pub use encoder::PngEncodeSession;

use crate::error::CodecError;
use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::rc::Rc;
#[cfg(test)]
use std::cell::Cell;

pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Pull-style read transport: fill as much of the buffer as possible and return
/// the byte count, `Ok(0)` at end of stream.
pub type ReadCallback<'a> = Box<dyn FnMut(&mut [u8]) -> io::Result<usize> + 'a>;

/// Push-style write transport: accept all of `data` or fail.
pub type WriteCallback<'a> = Box<dyn FnMut(&[u8]) -> io::Result<()> + 'a>;

/// Default image limits of a fresh session (2^31 - 1 in each direction).
pub const DEFAULT_IMAGE_LIMIT: u32 = records::PNG_U31_MAX;

/// Name and version of the codec binding, for diagnostics.
pub fn version() -> &'static str {
    concat!("png 0.17 via png-harness ", env!("CARGO_PKG_VERSION"))
}

/// Position and size of the next progressive row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowInfo {
    /// Sequential index over all rows of all passes.
    pub scanline_idx: u32,
    /// Image row this scanline belongs to.
    pub row_num: u32,
    /// Adam7 pass (0 for non-interlaced images).
    pub pass: u8,
    /// Row length in bytes for the session's pixel format.
    pub len: usize,
}

/// Result of asking an encoder for its in-memory output.
///
/// Well-formed results are exactly `(Some(buf), buf.len(), None)` on success and
/// `(None, 0, Some(err))` on failure.
#[derive(Debug)]
pub struct BufferRetrieval {
    pub buffer: Option<Vec<u8>>,
    pub size: usize,
    pub error: Option<CodecError>,
}

impl BufferRetrieval {
    pub(crate) fn failed(error: CodecError) -> Self {
        Self {
            buffer: None,
            size: 0,
            error: Some(error),
        }
    }
}

pub(crate) struct CallbackReader<'a>(pub ReadCallback<'a>);

impl Read for CallbackReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (self.0)(buf)
    }
}

/// Records every byte the decoder pulls from its transport.
pub(crate) struct TeeReader<'a> {
    inner: Box<dyn Read + 'a>,
    seen: Rc<RefCell<Vec<u8>>>,
}

impl<'a> TeeReader<'a> {
    pub fn new(inner: Box<dyn Read + 'a>, seen: Rc<RefCell<Vec<u8>>>) -> Self {
        Self { inner, seen }
    }
}

impl Read for TeeReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.seen.borrow_mut().extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

/// Destination of an encoder session.
pub(crate) enum Sink<'a> {
    Stream(WriteCallback<'a>),
    Buffer(Vec<u8>),
}

impl Write for Sink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Stream(callback) => callback(buf)?,
            Sink::Buffer(out) => out.extend_from_slice(buf),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Row positions in emission order, including Adam7 passes.
#[derive(Debug, Clone)]
pub(crate) struct RowCursor {
    width: u32,
    height: u32,
    interlaced: bool,
    pass: u8,
    line: u32,
    emitted: u32,
}

const ADAM7_START_X: [u32; 7] = [0, 4, 0, 2, 0, 1, 0];
const ADAM7_START_Y: [u32; 7] = [0, 0, 4, 0, 2, 0, 1];
const ADAM7_STEP_X: [u32; 7] = [8, 8, 4, 4, 2, 2, 1];
const ADAM7_STEP_Y: [u32; 7] = [8, 8, 8, 4, 4, 2, 2];

impl RowCursor {
    pub fn new(width: u32, height: u32, interlaced: bool) -> Self {
        Self {
            width,
            height,
            interlaced,
            pass: 0,
            line: 0,
            emitted: 0,
        }
    }

    /// Width in pixels and number of lines of an Adam7 pass.
    pub fn pass_dims(width: u32, height: u32, pass: usize) -> (u32, u32) {
        let span = |size: u32, start: u32, step: u32| {
            if size > start {
                (size - start).div_ceil(step)
            } else {
                0
            }
        };
        (
            span(width, ADAM7_START_X[pass], ADAM7_STEP_X[pass]),
            span(height, ADAM7_START_Y[pass], ADAM7_STEP_Y[pass]),
        )
    }

    /// Next `(scanline_idx, row_num, pass, row_width_px)`, or `None` when done.
    pub fn next_row(&mut self) -> Option<(u32, u32, u8, u32)> {
        if !self.interlaced {
            if self.line >= self.height {
                return None;
            }
            let row = self.line;
            self.line += 1;
            self.emitted += 1;
            return Some((self.emitted - 1, row, 0, self.width));
        }
        while self.pass < 7 {
            let p = usize::from(self.pass);
            let (pw, ph) = Self::pass_dims(self.width, self.height, p);
            if pw == 0 || self.line >= ph {
                self.pass += 1;
                self.line = 0;
                continue;
            }
            let row = ADAM7_START_Y[p] + self.line * ADAM7_STEP_Y[p];
            self.line += 1;
            self.emitted += 1;
            return Some((self.emitted - 1, row, self.pass, pw));
        }
        None
    }
}

/// Spread the pixels of one Adam7 pass row into their columns of a
/// full-width row. Sub-byte pixels are packed most significant bit first.
pub(crate) fn expand_pass_row(
    dest: &mut [u8],
    row: &[u8],
    pass: u8,
    pass_width: u32,
    bits_per_pixel: usize,
) {
    let p = usize::from(pass);
    if p >= 7 {
        return;
    }
    let start = ADAM7_START_X[p] as usize;
    let step = ADAM7_STEP_X[p] as usize;
    let pixels = pass_width as usize;

    if bits_per_pixel >= 8 {
        let bytes = bits_per_pixel / 8;
        for (k, pixel) in row.chunks_exact(bytes).take(pixels).enumerate() {
            let at = (start + k * step) * bytes;
            if let Some(slot) = dest.get_mut(at..at + bytes) {
                slot.copy_from_slice(pixel);
            }
        }
        return;
    }

    let mask = ((1u16 << bits_per_pixel) - 1) as u8;
    for k in 0..pixels {
        let src_bit = k * bits_per_pixel;
        let Some(&src) = row.get(src_bit / 8) else { break };
        let value = (src >> (8 - bits_per_pixel - src_bit % 8)) & mask;
        let dst_bit = (start + k * step) * bits_per_pixel;
        let Some(dst) = dest.get_mut(dst_bit / 8) else { break };
        let shift = 8 - bits_per_pixel - dst_bit % 8;
        *dst = (*dst & !(mask << shift)) | (value << shift);
    }
}

#[cfg(test)]
thread_local! {
    static TRACK_DROPS: Cell<bool> = const { Cell::new(false) };
    static LIVE_DECODERS: Cell<usize> = const { Cell::new(0) };
    static LIVE_ENCODERS: Cell<usize> = const { Cell::new(0) };
    static RELEASED_CONTEXTS: Cell<usize> = const { Cell::new(0) };
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Tracked {
    Decoder,
    Encoder,
}

pub(crate) fn track_created(kind: Tracked) {
    #[cfg(test)]
    TRACK_DROPS.with(|flag| {
        if flag.get() {
            let counter = match kind {
                Tracked::Decoder => &LIVE_DECODERS,
                Tracked::Encoder => &LIVE_ENCODERS,
            };
            counter.with(|c| c.set(c.get() + 1));
        }
    });
    #[cfg(not(test))]
    let _ = kind;
}

pub(crate) fn track_released(kind: Tracked) {
    #[cfg(test)]
    TRACK_DROPS.with(|flag| {
        if flag.get() {
            let counter = match kind {
                Tracked::Decoder => &LIVE_DECODERS,
                Tracked::Encoder => &LIVE_ENCODERS,
            };
            counter.with(|c| c.set(c.get().saturating_sub(1)));
            RELEASED_CONTEXTS.with(|c| c.set(c.get() + 1));
        }
    });
    #[cfg(not(test))]
    let _ = kind;
}

#[cfg(test)]
pub(crate) mod tracking {
    use super::*;

    pub(crate) struct DropTrackingGuard;

    impl Drop for DropTrackingGuard {
        fn drop(&mut self) {
            TRACK_DROPS.with(|t| t.set(false));
        }
    }

    pub(crate) fn enable_drop_tracking() -> DropTrackingGuard {
        TRACK_DROPS.with(|t| t.set(true));
        LIVE_DECODERS.with(|c| c.set(0));
        LIVE_ENCODERS.with(|c| c.set(0));
        RELEASED_CONTEXTS.with(|c| c.set(0));
        DropTrackingGuard
    }

    pub(crate) fn live_decoders() -> usize {
        LIVE_DECODERS.with(|c| c.get())
    }

    pub(crate) fn live_encoders() -> usize {
        LIVE_ENCODERS.with(|c| c.get())
    }

    pub(crate) fn released_contexts() -> usize {
        RELEASED_CONTEXTS.with(|c| c.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_cursor_progressive_order() {
        let mut cursor = RowCursor::new(3, 2, false);
        assert_eq!(cursor.next_row(), Some((0, 0, 0, 3)));
        assert_eq!(cursor.next_row(), Some((1, 1, 0, 3)));
        assert_eq!(cursor.next_row(), None);
    }

    #[test]
    fn test_expand_pass_row_places_pixels_in_their_columns() {
        let mut row = [0u8; 8];
        expand_pass_row(&mut row, &[1], 0, 1, 8);
        expand_pass_row(&mut row, &[2], 1, 1, 8);
        expand_pass_row(&mut row, &[3, 4], 3, 2, 8);
        expand_pass_row(&mut row, &[5, 6, 7, 8], 5, 4, 8);
        assert_eq!(row, [1, 5, 3, 6, 2, 7, 4, 8]);

        // 1-bit pixels: pass 5 fills the odd columns
        let mut packed = [0b1010_1010u8];
        expand_pass_row(&mut packed, &[0b1111_0000], 5, 4, 1);
        assert_eq!(packed, [0b1111_1111]);
    }

    #[test]
    fn test_row_cursor_adam7_skips_empty_passes() {
        // 1x1 image: only pass 0 carries a pixel.
        let mut cursor = RowCursor::new(1, 1, true);
        assert_eq!(cursor.next_row(), Some((0, 0, 0, 1)));
        assert_eq!(cursor.next_row(), None);

        // 8x8 image: 1+1+1+2+2+4+4 rows.
        let mut cursor = RowCursor::new(8, 8, true);
        let rows: Vec<_> = std::iter::from_fn(|| cursor.next_row()).collect();
        assert_eq!(rows.len(), 15);
        assert_eq!(rows[3], (3, 0, 3, 2));
        assert_eq!(rows.last().copied(), Some((14, 7, 6, 8)));
    }

    #[test]
    fn test_sink_buffer_collects_bytes() {
        let mut sink = Sink::Buffer(Vec::new());
        sink.write_all(b"abc").unwrap();
        match sink {
            Sink::Buffer(out) => assert_eq!(out, b"abc"),
            Sink::Stream(_) => unreachable!(),
        }
    }

    #[test]
    fn test_tee_reader_records_consumed_bytes() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut tee = TeeReader::new(Box::new(&b"hello"[..]), Rc::clone(&seen));
        let mut buf = [0u8; 3];
        assert_eq!(tee.read(&mut buf).unwrap(), 3);
        assert_eq!(&*seen.borrow(), b"hel");
    }
}
