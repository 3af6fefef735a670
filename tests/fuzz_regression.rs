//! Regression tests for inputs that broke harness sessions while fuzzing.
//! Each test is a single small input, run for a handful of seeds so every
//! transport and the progressive path see it.

use flate2::Crc;
use png_harness::{exit_code, run_bytes, HarnessConfig, HarnessMode};

const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

fn encode_chunk(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut crc = Crc::new();
    crc.update(kind);
    crc.update(body);
    let mut out = (body.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out.extend_from_slice(&crc.sum().to_be_bytes());
    out
}

fn ihdr(width: u32, height: u32, bit_depth: u8, color_type: u8, interlace: u8) -> Vec<u8> {
    let mut body = Vec::with_capacity(13);
    body.extend_from_slice(&width.to_be_bytes());
    body.extend_from_slice(&height.to_be_bytes());
    body.extend_from_slice(&[bit_depth, color_type, 0, 0, interlace]);
    encode_chunk(b"IHDR", &body)
}

/// Zlib stream of `len` zero bytes, stored (no compression).
fn stored_zeros(len: usize) -> Vec<u8> {
    let mut out = vec![0x78, 0x01];
    let block = len as u16;
    out.push(1);
    out.extend_from_slice(&block.to_le_bytes());
    out.extend_from_slice(&(!block).to_le_bytes());
    out.extend(std::iter::repeat(0).take(len));
    // adler32 of zeros: a = 1, b = len
    let adler = ((len as u32 % 65521) << 16) | 1;
    out.extend_from_slice(&adler.to_be_bytes());
    out
}

fn png(chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = SIGNATURE.to_vec();
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}

fn assert_no_violation(name: &str, data: &[u8]) {
    for seed in 0..16 {
        let config = HarnessConfig {
            mode: HarnessMode::Read,
            seed: Some(seed),
            ..HarnessConfig::default()
        };
        let result = run_bytes(name, data, &config);
        assert_eq!(exit_code(&result), 0, "{name} seed {seed}: {result:?}");
    }
}

#[test]
fn fuzz_regression_text_without_separator() {
    let data = png(&[
        ihdr(1, 1, 8, 0, 0),
        encode_chunk(b"tEXt", b"no separator here"),
        encode_chunk(b"IDAT", &stored_zeros(2)),
        encode_chunk(b"IEND", &[]),
    ]);
    assert_no_violation("ct0n0g04.png", &data);
}

#[test]
fn fuzz_regression_iccp_without_terminator() {
    let data = png(&[
        ihdr(1, 1, 8, 2, 0),
        encode_chunk(b"iCCP", b"profile-name-without-nul"),
        encode_chunk(b"IDAT", &stored_zeros(4)),
        encode_chunk(b"IEND", &[]),
    ]);
    assert_no_violation("basn2c08.png", &data);
}

#[test]
fn fuzz_regression_bad_ancillary_crc() {
    let mut time = encode_chunk(b"tIME", &[7, 232, 1, 1, 0, 0, 0]);
    let last = time.len() - 1;
    time[last] ^= 0xff;
    let data = png(&[
        ihdr(1, 1, 8, 0, 0),
        time,
        encode_chunk(b"IDAT", &stored_zeros(2)),
        encode_chunk(b"IEND", &[]),
    ]);
    assert_no_violation("cm0n0g04.png", &data);
}

#[test]
fn fuzz_regression_dimensions_over_limits() {
    let data = png(&[
        ihdr(0x7fff_ffff, 0x7fff_ffff, 16, 6, 1),
        encode_chunk(b"IDAT", &stored_zeros(8)),
        encode_chunk(b"IEND", &[]),
    ]);
    assert_no_violation("basi6a16.png", &data);
}

#[test]
fn fuzz_regression_interlaced_short_idat() {
    let data = png(&[
        ihdr(9, 9, 4, 3, 1),
        encode_chunk(b"PLTE", &[0, 0, 0, 255, 255, 255]),
        encode_chunk(b"IDAT", &stored_zeros(3)),
        encode_chunk(b"IEND", &[]),
    ]);
    assert_no_violation("basi3p04.png", &data);
}

#[test]
fn fuzz_regression_empty_private_chunks() {
    let data = png(&[
        ihdr(1, 1, 8, 0, 0),
        encode_chunk(b"prVt", &[]),
        encode_chunk(b"prVu", &[]),
        encode_chunk(b"sPLT", b"pal\0\x08"),
        encode_chunk(b"IDAT", &stored_zeros(2)),
        encode_chunk(b"IEND", &[]),
    ]);
    assert_no_violation("ps1n0g08.png", &data);
}

#[test]
fn fuzz_regression_hist_without_palette() {
    let data = png(&[
        ihdr(2, 1, 8, 2, 0),
        encode_chunk(b"hIST", &[0, 1, 0, 2]),
        encode_chunk(b"IDAT", &stored_zeros(7)),
        encode_chunk(b"IEND", &[]),
    ]);
    assert_no_violation("ch1n3p04.png", &data);
}
