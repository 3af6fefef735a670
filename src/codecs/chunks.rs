// src/codecs/chunks.rs
//
// Chunk-level view of a PNG stream.
//
// The png crate parses the chunks it cares about into `png::Info`; everything
// else (sBIT, bKGD, hIST, sPLT, tIME, oFFs, eXIf, the iCCP name and unknown chunks)
// is recovered here by walking the bytes the decoder has consumed so far.

use crate::codecs::records::{
    is_known_chunk, Bkgd, Exif, Hist, Iccp, Offs, Sbit, Splt, Time, UnknownChunk,
};
use crate::codecs::CodecResult;
use crate::error::CodecError;
use crate::ops::{ChunkLocation, CrcAction};
use flate2::Crc;
use tracing::debug;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// CRC-32 over chunk type and body, as stored after every chunk.
pub fn chunk_crc(kind: &[u8; 4], body: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(kind);
    crc.update(body);
    crc.sum()
}

/// Serialise one complete chunk (length, type, body, CRC).
#[cfg(test)]
pub(crate) fn encode_chunk(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 12);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out.extend_from_slice(&chunk_crc(kind, body).to_be_bytes());
    out
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RawChunk<'a> {
    pub kind: [u8; 4],
    pub body: &'a [u8],
    pub crc_ok: bool,
}

impl RawChunk<'_> {
    pub fn is_critical(&self) -> bool {
        self.kind[0].is_ascii_uppercase()
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.kind).into_owned()
    }
}

/// Iterates over the complete chunks of a (possibly truncated) PNG stream.
/// Stops silently at the first incomplete chunk.
pub(crate) struct ChunkWalker<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ChunkWalker<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let pos = if data.starts_with(&PNG_SIGNATURE) {
            PNG_SIGNATURE.len()
        } else {
            data.len()
        };
        Self { data, pos }
    }
}

impl<'a> Iterator for ChunkWalker<'a> {
    type Item = RawChunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let header = self.data.get(self.pos..self.pos + 8)?;
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let kind = [header[4], header[5], header[6], header[7]];
        let body_start = self.pos + 8;
        let body_end = body_start.checked_add(len)?;
        let crc_bytes = self.data.get(body_end..body_end.checked_add(4)?)?;
        let body = &self.data[body_start..body_end];
        let stored = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        self.pos = body_end + 4;
        Some(RawChunk {
            kind,
            body,
            crc_ok: stored == chunk_crc(&kind, body),
        })
    }
}

/// Decoder policy applied while building a [`ChunkDirectory`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScanPolicy {
    pub crc_critical: CrcAction,
    pub crc_ancillary: CrcAction,
    /// Ancillary chunks larger than this are skipped.
    pub chunk_size_limit: usize,
    /// Total bytes of stored ancillary data allowed.
    pub cache_limit: usize,
    pub chunk_count_limit: usize,
    pub keep_unknown: bool,
}

/// Ancillary records recovered from the chunk stream.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChunkDirectory {
    pub color_type: Option<u8>,
    pub iccp: Option<Iccp>,
    pub sbit: Option<Sbit>,
    pub bkgd: Option<Bkgd>,
    pub hist: Option<Hist>,
    pub splt: Vec<Splt>,
    pub time: Option<Time>,
    pub offs: Option<Offs>,
    pub exif: Option<Exif>,
    pub unknown: Vec<UnknownChunk>,
    pub saw_iend: bool,
}

impl ChunkDirectory {
    /// Rebuild the directory from scratch over the bytes seen so far.
    pub fn scan(data: &[u8], policy: &ScanPolicy) -> CodecResult<Self> {
        let mut dir = ChunkDirectory::default();
        let mut seen_plte = false;
        let mut seen_idat = false;
        let mut stored = 0usize;
        let mut cached = 0usize;

        for chunk in ChunkWalker::new(data) {
            if !chunk.crc_ok {
                let action = if chunk.is_critical() {
                    policy.crc_critical
                } else {
                    policy.crc_ancillary
                };
                match action {
                    CrcAction::Error => return Err(CodecError::crc_mismatch(chunk.name())),
                    CrcAction::Discard => {
                        debug!(target: "png_harness::codec", chunk = %chunk.name(), "discarding chunk with bad CRC");
                        continue;
                    }
                    CrcAction::Use => {}
                }
            }

            match &chunk.kind {
                b"IHDR" => {
                    dir.color_type = chunk.body.get(9).copied();
                    continue;
                }
                b"PLTE" => {
                    seen_plte = true;
                    continue;
                }
                b"IDAT" => {
                    seen_idat = true;
                    continue;
                }
                b"IEND" => {
                    dir.saw_iend = true;
                    break;
                }
                _ if chunk.is_critical() => continue,
                _ => {}
            }

            if chunk.body.len() > policy.chunk_size_limit {
                debug!(target: "png_harness::codec", chunk = %chunk.name(), len = chunk.body.len(), "ancillary chunk above soft limit, skipped");
                continue;
            }

            let kept = dir.absorb(&chunk, policy, seen_plte, seen_idat);
            if kept {
                stored += 1;
                cached = cached.saturating_add(chunk.body.len());
                if stored > policy.chunk_count_limit {
                    return Err(CodecError::chunk_limits(format!(
                        "more than {} stored chunks",
                        policy.chunk_count_limit
                    )));
                }
                if cached > policy.cache_limit {
                    return Err(CodecError::chunk_limits(format!(
                        "ancillary data exceeds {} bytes",
                        policy.cache_limit
                    )));
                }
            }
        }
        Ok(dir)
    }

    /// Store one ancillary chunk. Returns whether it was kept.
    fn absorb(&mut self, chunk: &RawChunk<'_>, policy: &ScanPolicy, seen_plte: bool, seen_idat: bool) -> bool {
        let color_type = self.color_type.unwrap_or(u8::MAX);
        let parsed: CodecResult<bool> = match &chunk.kind {
            b"iCCP" if self.iccp.is_none() => {
                Iccp::parse(chunk.body, policy.cache_limit).map(|r| self.iccp = Some(r)).map(|_| true)
            }
            b"sBIT" if self.sbit.is_none() => {
                Sbit::parse(chunk.body, color_type).map(|r| self.sbit = Some(r)).map(|_| true)
            }
            b"bKGD" if self.bkgd.is_none() => {
                Bkgd::parse(chunk.body, color_type).map(|r| self.bkgd = Some(r)).map(|_| true)
            }
            b"hIST" if self.hist.is_none() => {
                Hist::parse(chunk.body).map(|r| self.hist = Some(r)).map(|_| true)
            }
            b"sPLT" => Splt::parse(chunk.body).map(|r| {
                if self.splt.iter().any(|s| s.name == r.name) {
                    false
                } else {
                    self.splt.push(r);
                    true
                }
            }),
            b"tIME" if self.time.is_none() => {
                Time::parse(chunk.body).map(|r| self.time = Some(r)).map(|_| true)
            }
            b"oFFs" if self.offs.is_none() => {
                Offs::parse(chunk.body).map(|r| self.offs = Some(r)).map(|_| true)
            }
            b"eXIf" if self.exif.is_none() => {
                Exif::parse(chunk.body).map(|r| self.exif = Some(r)).map(|_| true)
            }
            kind if is_known_chunk(kind) => Ok(false),
            kind => {
                if policy.keep_unknown {
                    let location = if seen_idat {
                        ChunkLocation::AfterIdat
                    } else if seen_plte {
                        ChunkLocation::AfterPlte
                    } else {
                        ChunkLocation::AfterIhdr
                    };
                    self.unknown.push(UnknownChunk {
                        chunk_type: *kind,
                        location: location as u8,
                        length: chunk.body.len(),
                        data: (!chunk.body.is_empty()).then(|| chunk.body.to_vec()),
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        };
        match parsed {
            Ok(kept) => kept,
            Err(err) => {
                debug!(target: "png_harness::codec", chunk = %chunk.name(), error = %err, "malformed ancillary chunk skipped");
                false
            }
        }
    }
}
