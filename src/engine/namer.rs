// src/engine/namer.rs
//
// Test-vector namer: turns an input identifier into a short feature code.

use std::fmt;

/// Length of a feature code (PngSuite file names carry eight).
pub const FEATURE_CODE_LEN: usize = 8;

/// Marker preceding the original file name in fuzzer corpus entries.
const CORPUS_ORIGIN_MARKER: &[u8] = b"orig:";

/// How an input identifier encodes its feature code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingScheme {
    /// Last path component, e.g. `corpus/bgbi4a08.png`.
    #[default]
    Plain,
    /// Fuzzer queue names: `id:000001,src:000000,op:havoc,orig:bgbi4a08.png`.
    Afl,
}

impl NamingScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            NamingScheme::Plain => "plain",
            NamingScheme::Afl => "afl",
        }
    }
}

/// At most [`FEATURE_CODE_LEN`] bytes taken from an input identifier.
///
/// Shorter identifiers give shorter codes; nothing is padded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FeatureCode {
    bytes: Vec<u8>,
}

impl FeatureCode {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes[..bytes.len().min(FEATURE_CODE_LEN)].to_vec(),
        }
    }

    /// Derive the code for `identifier` under `scheme`. Never fails.
    pub fn derive(identifier: &str, scheme: NamingScheme) -> Self {
        let name = basename(identifier.as_bytes());
        match scheme {
            NamingScheme::Plain => Self::from_bytes(name),
            NamingScheme::Afl => Self::from_bytes(corpus_origin(name)),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte at `index`, or 0 past the end.
    pub fn at(&self, index: usize) -> u8 {
        self.bytes.get(index).copied().unwrap_or(0)
    }
}

impl fmt::Display for FeatureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}

fn basename(path: &[u8]) -> &[u8] {
    let slash = path
        .iter()
        .rposition(|&b| b == b'/')
        .or_else(|| path.iter().rposition(|&b| b == b'\\'));
    match slash {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Whatever follows the third comma, minus the origin marker.
fn corpus_origin(name: &[u8]) -> &[u8] {
    let mut commas = 0;
    let mut start = name.len();
    for (i, &b) in name.iter().enumerate() {
        if b == b',' {
            commas += 1;
            if commas == 3 {
                start = i + 1;
                break;
            }
        }
    }
    let field = &name[start..];
    field
        .strip_prefix(CORPUS_ORIGIN_MARKER)
        .unwrap_or(&field[field.len().min(CORPUS_ORIGIN_MARKER.len())..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_takes_basename_prefix() {
        let code = FeatureCode::derive("/corpus/pngsuite/bgbi4a08.png", NamingScheme::Plain);
        assert_eq!(code.as_bytes(), b"bgbi4a08");
        let code = FeatureCode::derive(r"C:\suite\s05n3p02.png", NamingScheme::Plain);
        assert_eq!(code.as_bytes(), b"s05n3p02");
    }

    #[test]
    fn test_short_names_are_kept_whole() {
        assert_eq!(FeatureCode::derive("ab", NamingScheme::Plain).as_bytes(), b"ab");
        assert!(FeatureCode::derive("", NamingScheme::Plain).is_empty());
        assert!(FeatureCode::derive("dir/", NamingScheme::Plain).is_empty());
    }

    #[test]
    fn test_afl_skips_metadata_fields() {
        let code = FeatureCode::derive(
            "out/queue/id:000012,src:000003,op:havoc,orig:tbbn0g04.png",
            NamingScheme::Afl,
        );
        assert_eq!(code.as_bytes(), b"tbbn0g04");
    }

    #[test]
    fn test_afl_degrades_without_structure() {
        assert!(FeatureCode::derive("plainname", NamingScheme::Afl).is_empty());
        let code = FeatureCode::derive("a,b,c,xyz", NamingScheme::Afl);
        assert!(code.is_empty());
        let code = FeatureCode::derive("a,b,c,12345cs4n2c16", NamingScheme::Afl);
        assert_eq!(code.as_bytes(), b"cs4n2c16");
    }

    #[test]
    fn test_derive_is_idempotent() {
        let a = FeatureCode::derive("x/y/g05n0g16.png", NamingScheme::Plain);
        let b = FeatureCode::derive("x/y/g05n0g16.png", NamingScheme::Plain);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "g05n0g16");
        assert_eq!(a.at(100), 0);
    }
}
