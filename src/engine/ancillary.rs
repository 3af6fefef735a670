// src/engine/ancillary.rs
//
// Harness-owned ancillary records for the encode harness. Every payload
// (text strings, ICC profile, EXIF, unknown-chunk data, suggested palettes)
// lives in one AncillaryRecordSet and is released when the set is dropped,
// whichever way the session ends.

use crate::codecs::records::{
    Bkgd, Chrm, ChrmInt, Exif, Hist, Iccp, Ihdr, Offs, Phys, Plte, PlteEntry, Sbit, Splt,
    SpltEntry, Text, TextKind, Time, Trns, UnknownChunk,
};
use crate::engine::common::HarnessRng;
use crate::engine::config::{Background, FeatureConfig, ImageConfig};

#[cfg(test)]
use std::cell::Cell;

/// Knobs for record synthesis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisSettings {
    /// Chance that each record family is initialised at all.
    pub init_probability: f64,
    /// Chance the header comes from the ImageConfig rather than random values.
    pub header_fidelity: f64,
    /// Upper bound (exclusive) of random string and payload lengths.
    pub max_string_len: usize,
    /// Most text, suggested-palette and unknown-chunk records drawn per family.
    pub max_list_records: usize,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            init_probability: 1.0,
            header_fidelity: 0.9,
            max_string_len: 100,
            max_list_records: 4,
        }
    }
}

/// Keywords, names and profile names are drawn below this length.
const KEYWORD_SPAN: usize = 80;

/// Every record the encode harness hands to the codec.
///
/// Families the synthesis left uninitialised are `None` (or default-valued
/// list entries), so the codec also sees partially specified metadata.
#[derive(Debug, Clone, Default)]
pub struct AncillaryRecordSet {
    pub ihdr: Option<Ihdr>,
    pub plte: Option<Plte>,
    pub trns: Option<Trns>,
    pub chrm: Option<Chrm>,
    pub chrm_int: Option<ChrmInt>,
    pub gama: f64,
    pub gama_int: u32,
    pub iccp: Option<Iccp>,
    pub sbit: Option<Sbit>,
    pub srgb: u8,
    pub text: Vec<Text>,
    pub bkgd: Option<Bkgd>,
    pub hist: Option<Hist>,
    pub phys: Option<Phys>,
    pub splt: Vec<Splt>,
    pub time: Option<Time>,
    pub unknown: Vec<UnknownChunk>,
    pub offs: Option<Offs>,
    pub exif: Option<Exif>,
    pub(crate) _guard: PayloadGuard,
}

impl AncillaryRecordSet {
    pub fn synthesize(
        config: &ImageConfig,
        rng: &mut HarnessRng,
        settings: &SynthesisSettings,
    ) -> Self {
        let max = settings.max_string_len;
        let init = settings.init_probability;
        let list_span = settings.max_list_records.saturating_add(1);
        let mut set = AncillaryRecordSet::default();

        if rng.chance(init) {
            set.ihdr = Some(if rng.chance(settings.header_fidelity) {
                Ihdr {
                    width: config.size,
                    height: config.size,
                    bit_depth: config.bit_depth,
                    color_type: config.color_type,
                    compression_method: 0,
                    filter_method: 0,
                    interlace_method: u8::from(config.interlace),
                }
            } else {
                Ihdr {
                    width: rng.u32(),
                    height: rng.u32(),
                    bit_depth: rng.below(255) as u8,
                    color_type: rng.below(7) as u8,
                    compression_method: rng.below(10) as u8,
                    filter_method: rng.below(10) as u8,
                    interlace_method: rng.below(2) as u8,
                }
            });
        }

        if rng.chance(init) {
            let n = rng.below_usize(max);
            set.plte = Some(Plte {
                entries: (0..n)
                    .map(|_| PlteEntry {
                        red: rng.u8(),
                        green: rng.u8(),
                        blue: rng.u8(),
                        alpha: rng.u8(),
                    })
                    .collect(),
            });
        }

        // The transparency family always gets a tRNS record.
        if rng.chance(init) || config.transparent {
            let gray = rng.u16();
            let red = rng.u16();
            let green = rng.u16();
            let blue = rng.u16();
            let n_type3_entries = rng.u32();
            let alpha_len = rng.below_usize(256);
            set.trns = Some(Trns {
                gray,
                red,
                green,
                blue,
                n_type3_entries,
                type3_alpha: rng.bytes(alpha_len),
            });
        }

        if rng.chance(init) {
            let mut coord = || rng.below(65536) as f64 / 1000.0;
            set.chrm = Some(Chrm {
                white_point_x: coord(),
                white_point_y: coord(),
                red_x: coord(),
                red_y: coord(),
                green_x: coord(),
                green_y: coord(),
                blue_x: coord(),
                blue_y: coord(),
            });
        }

        if rng.chance(init) {
            set.chrm_int = Some(ChrmInt {
                white_point_x: rng.u32(),
                white_point_y: rng.u32(),
                red_x: rng.u32(),
                red_y: rng.u32(),
                green_x: rng.u32(),
                green_y: rng.u32(),
                blue_x: rng.u32(),
                blue_y: rng.u32(),
            });
        }

        if matches!(config.feature, FeatureConfig::Gamma { .. }) {
            set.gama = config.gamma;
            set.gama_int = (config.gamma * 100.0) as u32;
        } else {
            set.gama = rng.below(65536) as f64 / 10000.0;
            set.gama_int = rng.u32();
        }

        if rng.chance(init) {
            let name_len = rng.below_usize(KEYWORD_SPAN);
            let profile_name = rng.bytes(name_len);
            let profile = rng.payload(max);
            set.iccp = Some(Iccp {
                profile_name,
                profile,
                profile_len: rng.below_usize(max),
            });
        }

        if rng.chance(init) {
            set.sbit = Some(if rng.chance(0.9) {
                let bits = config.significant_bits;
                Sbit {
                    grayscale_bits: bits,
                    red_bits: bits,
                    green_bits: bits,
                    blue_bits: bits,
                    alpha_bits: bits,
                }
            } else {
                Sbit {
                    grayscale_bits: rng.u8(),
                    red_bits: rng.u8(),
                    green_bits: rng.u8(),
                    blue_bits: rng.u8(),
                    alpha_bits: rng.u8(),
                }
            });
        }

        set.srgb = rng.below(255) as u8;

        let n_text = rng.below_usize(list_span);
        set.text = if rng.chance(init) {
            let intent = config.text.record_kind();
            (0..n_text).map(|_| random_text(rng, max, intent)).collect()
        } else {
            vec![Text::default(); n_text]
        };

        if rng.chance(init) {
            set.bkgd = Some(background_record(config.background, rng));
        }

        if rng.chance(init) {
            let mut frequency = vec![0u16; 256];
            let live = match config.histogram_colors {
                0 => 256,
                colors => usize::from(colors).min(256),
            };
            for f in frequency.iter_mut().take(live) {
                *f = rng.u16();
            }
            set.hist = Some(Hist { frequency });
        }

        if rng.chance(init) {
            set.phys = Some(match config.feature {
                FeatureConfig::PhysicalPixels { .. } => Phys {
                    ppu_x: config.ppu_x,
                    ppu_y: config.ppu_y,
                    unit_specifier: config.unit_specifier,
                },
                _ => Phys {
                    ppu_x: rng.u32(),
                    ppu_y: rng.u32(),
                    unit_specifier: rng.below(3) as u8,
                },
            });
        }

        let n_splt = rng.below_usize(list_span);
        set.splt = if rng.chance(init) {
            let depth = config.palette.splt_depth();
            (0..n_splt).map(|_| random_splt(rng, max, depth)).collect()
        } else {
            vec![Splt::default(); n_splt]
        };

        if rng.chance(init) {
            let (year, month, day) = match config.feature {
                FeatureConfig::Time { .. } => (config.time.year, config.time.month, config.time.day),
                _ => (rng.u16(), rng.u8(), rng.u8()),
            };
            set.time = Some(Time {
                year,
                month,
                day,
                hour: rng.u8(),
                minute: rng.u8(),
                second: rng.u8(),
            });
        }

        let n_unknown = rng.below_usize(list_span);
        set.unknown = if rng.chance(init) {
            (0..n_unknown).map(|_| random_unknown(rng, max)).collect()
        } else {
            vec![UnknownChunk::default(); n_unknown]
        };

        if rng.chance(init) {
            set.offs = Some(Offs {
                unit_specifier: rng.below(3) as u8,
                x: rng.i32(),
                y: rng.i32(),
            });
        }

        if rng.chance(init) {
            let data = rng.payload(max);
            set.exif = Some(Exif {
                length: rng.below_usize(max),
                data,
            });
        }

        set
    }

    /// Total bytes of harness-allocated variable-length payloads.
    pub fn payload_bytes(&self) -> usize {
        let opt = |v: &Option<Vec<u8>>| v.as_ref().map_or(0, Vec::len);
        let text: usize = self
            .text
            .iter()
            .map(|t| opt(&t.text) + opt(&t.language_tag) + opt(&t.translated_keyword))
            .sum();
        let splt: usize = self
            .splt
            .iter()
            .map(|s| s.entries.as_ref().map_or(0, |e| e.len() * 10))
            .sum();
        let unknown: usize = self.unknown.iter().map(|c| opt(&c.data)).sum();
        text + splt
            + unknown
            + self.iccp.as_ref().map_or(0, |i| opt(&i.profile))
            + self.exif.as_ref().map_or(0, |e| opt(&e.data))
    }
}

fn random_text(rng: &mut HarnessRng, max: usize, intent: Option<(TextKind, &[u8])>) -> Text {
    let keyword_len = rng.below_usize(KEYWORD_SPAN);
    let keyword = rng.bytes(keyword_len);
    let text = rng.payload(max);
    let length = rng.below_usize(max);
    let text_type = rng.below(5) as u8;
    let compression_flag = rng.below(255) as u8;
    let mut language_tag = rng.payload(max);
    let translated_keyword = rng.payload(max);
    let text_type = match intent {
        Some((kind, tag)) => {
            if kind == TextKind::Itxt {
                language_tag = Some(tag.to_vec());
            }
            kind as u8
        }
        None => text_type,
    };
    Text {
        keyword,
        text_type,
        compression_flag,
        language_tag,
        translated_keyword,
        length,
        text,
    }
}

fn random_splt(rng: &mut HarnessRng, max: usize, depth: Option<u8>) -> Splt {
    let name_len = rng.below_usize(KEYWORD_SPAN);
    let name = rng.bytes(name_len);
    let drawn = rng.below(3) as u8 * 8;
    let sample_depth = depth.unwrap_or(drawn);
    let n_entries = rng.below_usize(max);
    let entries = (0..n_entries)
        .map(|_| SpltEntry {
            red: rng.u16(),
            green: rng.u16(),
            blue: rng.u16(),
            alpha: rng.u16(),
            frequency: rng.u16(),
        })
        .collect();
    Splt {
        name,
        sample_depth,
        n_entries: n_entries as u32,
        entries: Some(entries),
    }
}

fn random_unknown(rng: &mut HarnessRng, max: usize) -> UnknownChunk {
    let mut chunk_type = [0u8; 4];
    let type_len = rng.below_usize(4);
    for b in chunk_type.iter_mut().take(type_len) {
        *b = rng.u8();
    }
    let length = rng.below_usize(max);
    let data = rng.payload(max);
    let location = match rng.below(4) {
        3 => 8,
        other => other as u8,
    };
    UnknownChunk {
        chunk_type,
        location,
        length,
        data,
    }
}

fn background_record(background: Background, rng: &mut HarnessRng) -> Bkgd {
    let rgb = |red, green, blue| Bkgd {
        red,
        green,
        blue,
        ..Bkgd::default()
    };
    match background {
        Background::Gray => Bkgd {
            gray: rng.u16(),
            ..Bkgd::default()
        },
        Background::Black => rgb(0, 0, 0),
        Background::White => rgb(255, 255, 255),
        Background::Yellow => rgb(255, 255, 0),
        Background::None if rng.coin() => rgb(rng.u16(), rng.u16(), rng.u16()),
        Background::None if rng.coin() => Bkgd {
            gray: rng.u16(),
            ..Bkgd::default()
        },
        Background::None => Bkgd {
            plte_index: rng.u16(),
            ..Bkgd::default()
        },
    }
}

#[cfg(test)]
thread_local! {
    static LIVE_RECORD_SETS: Cell<usize> = const { Cell::new(0) };
    static RELEASED_RECORD_SETS: Cell<usize> = const { Cell::new(0) };
}

/// Counts record sets in tests so leak checks can assert exactly-once release.
#[derive(Debug)]
pub(crate) struct PayloadGuard;

impl Default for PayloadGuard {
    fn default() -> Self {
        #[cfg(test)]
        LIVE_RECORD_SETS.with(|c| c.set(c.get() + 1));
        PayloadGuard
    }
}

impl Clone for PayloadGuard {
    fn clone(&self) -> Self {
        PayloadGuard::default()
    }
}

impl Drop for PayloadGuard {
    fn drop(&mut self) {
        #[cfg(test)]
        {
            LIVE_RECORD_SETS.with(|c| c.set(c.get().saturating_sub(1)));
            RELEASED_RECORD_SETS.with(|c| c.set(c.get() + 1));
        }
    }
}

#[cfg(test)]
pub(crate) mod tracking {
    use super::*;

    pub(crate) fn reset() {
        LIVE_RECORD_SETS.with(|c| c.set(0));
        RELEASED_RECORD_SETS.with(|c| c.set(0));
    }

    pub(crate) fn live_record_sets() -> usize {
        LIVE_RECORD_SETS.with(|c| c.get())
    }

    pub(crate) fn released_record_sets() -> usize {
        RELEASED_RECORD_SETS.with(|c| c.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::namer::{FeatureCode, NamingScheme};

    fn config(code: &str) -> ImageConfig {
        let mut rng = HarnessRng::from_seed(0);
        ImageConfig::from_code(&FeatureCode::derive(code, NamingScheme::Plain), &mut rng)
    }

    #[test]
    fn test_synthesis_is_seed_deterministic() {
        let c = config("cm7n2c08");
        let a = AncillaryRecordSet::synthesize(&c, &mut HarnessRng::from_seed(9), &Default::default());
        let b = AncillaryRecordSet::synthesize(&c, &mut HarnessRng::from_seed(9), &Default::default());
        assert_eq!(a.ihdr, b.ihdr);
        assert_eq!(a.text, b.text);
        assert_eq!(a.unknown, b.unknown);
        assert_eq!(a.payload_bytes(), b.payload_bytes());
    }

    #[test]
    fn test_zero_probability_leaves_families_uninitialised() {
        let settings = SynthesisSettings {
            init_probability: 0.0,
            ..Default::default()
        };
        let set = AncillaryRecordSet::synthesize(&config("bgbi4a08"), &mut HarnessRng::from_seed(1), &settings);
        assert!(set.ihdr.is_none() && set.plte.is_none() && set.exif.is_none());
        assert!(set.text.iter().all(|t| *t == Text::default()));
        assert_eq!(set.payload_bytes(), 0);
    }

    #[test]
    fn test_config_driven_fields() {
        let settings = SynthesisSettings {
            header_fidelity: 1.0,
            ..Default::default()
        };
        let set = AncillaryRecordSet::synthesize(&config("bgbi4a08"), &mut HarnessRng::from_seed(2), &settings);
        let ihdr = set.ihdr.unwrap();
        assert_eq!((ihdr.width, ihdr.color_type, ihdr.bit_depth, ihdr.interlace_method), (32, 4, 8, 1));
        assert_eq!(set.bkgd, Some(Bkgd::default()));

        let set = AncillaryRecordSet::synthesize(&config("cm9n2c08"), &mut HarnessRng::from_seed(2), &settings);
        let time = set.time.unwrap();
        assert_eq!((time.year, time.month, time.day), (1999, 12, 31));

        let set = AncillaryRecordSet::synthesize(&config("ch1n3p08"), &mut HarnessRng::from_seed(2), &settings);
        let hist = set.hist.unwrap();
        assert!(hist.frequency[15..].iter().all(|f| *f == 0));
    }

    #[test]
    fn test_family_intents_reach_the_records() {
        let settings = SynthesisSettings {
            init_probability: 0.0,
            ..Default::default()
        };
        let set = AncillaryRecordSet::synthesize(&config("tbbn3p08"), &mut HarnessRng::from_seed(5), &settings);
        assert!(set.trns.is_some());

        let settings = SynthesisSettings {
            max_list_records: 8,
            ..Default::default()
        };
        for seed in 0..8 {
            let mut rng = HarnessRng::from_seed(seed);
            let set = AncillaryRecordSet::synthesize(&config("ps2n0g08"), &mut rng, &settings);
            assert!(set.splt.iter().all(|s| s.sample_depth == 16));
            let mut rng = HarnessRng::from_seed(seed);
            let set = AncillaryRecordSet::synthesize(&config("ctgn0g04"), &mut rng, &settings);
            assert!(set
                .text
                .iter()
                .all(|t| t.text_type == TextKind::Itxt as u8 && t.language_tag.as_deref() == Some(&b"el"[..])));
        }
    }

    #[test]
    fn test_record_sets_released_exactly_once() {
        tracking::reset();
        {
            let a = AncillaryRecordSet::synthesize(&config("s05n3p02"), &mut HarnessRng::from_seed(4), &Default::default());
            let _b = a.clone();
            assert_eq!(tracking::live_record_sets(), 2);
        }
        assert_eq!(tracking::live_record_sets(), 0);
        assert_eq!(tracking::released_record_sets(), 2);
    }
}
