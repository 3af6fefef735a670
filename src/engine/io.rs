// src/engine/io.rs
//
// I/O for the harness: input loading and the three codec transports
// (in-memory buffer, callback stream over a cursor, file handle).

use crate::codecs::{ReadCallback, WriteCallback};
use crate::error::HarnessError;
use memmap2::Mmap;
use std::cell::Cell;
use std::fs::File;
use std::io::{self, Seek, Write};
use std::path::Path;
use std::rc::Rc;

/// Raw harness input: memory-mapped from disk or owned bytes handed over by a
/// fuzzing engine.
#[derive(Debug)]
pub enum Source {
    Memory(Vec<u8>),
    Mapped(Mmap),
}

impl Source {
    /// Map the file at `path`. Missing files and empty files are environment
    /// failures; the codec is never reached.
    pub fn open(path: &Path) -> Result<Self, HarnessError> {
        let shown = path.to_string_lossy().to_string();
        if !path.exists() {
            return Err(HarnessError::input_not_found(shown));
        }
        let file = File::open(path).map_err(|e| HarnessError::input_read_failed(shown.clone(), e))?;
        let len = file
            .metadata()
            .map_err(|e| HarnessError::input_read_failed(shown.clone(), e))?
            .len();
        if len == 0 {
            return Err(HarnessError::empty_input(shown));
        }
        // Safety: the input file is not modified while a harness run holds the map.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| HarnessError::input_read_failed(shown, e))?;
        Ok(Source::Mapped(mmap))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Source::Memory(data) => data,
            Source::Mapped(mmap) => mmap.as_ref(),
        }
    }
}

/// Which transport a decode session reads through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeTransport {
    Buffer,
    Stream,
    File,
}

impl DecodeTransport {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeTransport::Buffer => "buffer",
            DecodeTransport::Stream => "stream",
            DecodeTransport::File => "file",
        }
    }
}

/// Read side of the callback transport.
///
/// The codec advances the cursor from inside its callback; the harness keeps a
/// [`TransportState`] handle to inspect it before and after codec calls.
pub struct ReadCursor<'a> {
    data: &'a [u8],
    state: TransportState,
}

/// Shared bookkeeping of a callback transport.
#[derive(Debug, Clone, Default)]
pub struct TransportState {
    position: Rc<Cell<u64>>,
    remaining: Rc<Cell<u64>>,
}

impl TransportState {
    fn new(remaining: u64) -> Self {
        Self {
            position: Rc::new(Cell::new(0)),
            remaining: Rc::new(Cell::new(remaining)),
        }
    }

    /// Bytes moved through the transport so far.
    pub fn position(&self) -> u64 {
        self.position.get()
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.get()
    }

    fn advance(&self, n: u64) {
        self.position.set(self.position.get() + n);
        self.remaining.set(self.remaining.get() - n);
    }
}

impl<'a> ReadCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            state: TransportState::new(data.len() as u64),
        }
    }

    pub fn state(&self) -> TransportState {
        self.state.clone()
    }

    pub fn into_callback(self) -> ReadCallback<'a> {
        let ReadCursor { data, state } = self;
        Box::new(move |dest: &mut [u8]| {
            let start = state.position() as usize;
            let n = dest.len().min(data.len() - start);
            dest[..n].copy_from_slice(&data[start..start + n]);
            state.advance(n as u64);
            Ok::<usize, io::Error>(n)
        })
    }
}

/// Write side of the callback transport: discards bytes while a byte budget
/// lasts, then fails every write with `UnexpectedEof`.
pub struct WriteBudget {
    state: TransportState,
    capture: Option<Rc<std::cell::RefCell<Vec<u8>>>>,
}

impl WriteBudget {
    pub fn new(budget: u64) -> Self {
        Self {
            state: TransportState::new(budget),
            capture: None,
        }
    }

    /// Also keep a copy of the accepted bytes.
    pub fn capturing(budget: u64) -> (Self, Rc<std::cell::RefCell<Vec<u8>>>) {
        let sink = Rc::new(std::cell::RefCell::new(Vec::new()));
        let budget = Self {
            state: TransportState::new(budget),
            capture: Some(Rc::clone(&sink)),
        };
        (budget, sink)
    }

    pub fn state(&self) -> TransportState {
        self.state.clone()
    }

    pub fn into_callback<'a>(self) -> WriteCallback<'a> {
        let WriteBudget { state, capture } = self;
        Box::new(move |data: &[u8]| {
            let len = data.len() as u64;
            if len > state.remaining() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "write budget exhausted",
                ));
            }
            state.advance(len);
            if let Some(sink) = &capture {
                sink.borrow_mut().extend_from_slice(data);
            }
            Ok(())
        })
    }
}

/// Copy `data` into an anonymous temporary file positioned at its start, for
/// the file-handle transport.
pub fn file_transport(data: &[u8]) -> Result<File, HarnessError> {
    let mut file = tempfile::tempfile().map_err(HarnessError::temp_file_failed)?;
    file.write_all(data).map_err(HarnessError::temp_file_failed)?;
    file.rewind().map_err(HarnessError::temp_file_failed)?;
    Ok(file)
}
