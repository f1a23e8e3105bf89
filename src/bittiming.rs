//! SJA1000 bit-timing conversions.
//!
//! The adapter's CAN controller is programmed through the two SJA1000
//! bit-timing registers packed into one 16-bit word
//! (`SJW(2)|BRP(6)|SAM(1)|TSEG2(3)|TSEG1(4)`, each field biased by -1
//! except SAM). Conversions are lossless only on the SJA1000 sub-range at
//! the 8 MHz controller clock.

use std::cmp::Ordering;
use std::fmt::Write as _;

/// CAN controller clock of SJA1000-compatible adapters.
pub const CLOCK_FREQUENCY: u32 = 8_000_000;

/// Predefined bit-rate indexes (CiA 301 style, 0 and negative values).
pub const INDEX_1M: i32 = 0;
pub const INDEX_800K: i32 = -1;
pub const INDEX_500K: i32 = -2;
pub const INDEX_250K: i32 = -3;
pub const INDEX_125K: i32 = -4;
pub const INDEX_100K: i32 = -5;
pub const INDEX_50K: i32 = -6;
pub const INDEX_20K: i32 = -7;
pub const INDEX_10K: i32 = -8;

/// BTR0BTR1 presets for the predefined bit-rates (1 Mbit/s down to
/// 5 kbit/s; sample points 75..87.5%).
const SJA1000_BTR0BTR1: [u16; 10] = [
    0x0014, // 1000 kbps (SP=75.0%, SJW=1)
    0x0016, //  800 kbps (SP=80.0%, SJW=1)
    0x001C, //  500 kbps (SP=87.5%, SJW=1)
    0x011C, //  250 kbps (SP=87.5%, SJW=1)
    0x031C, //  125 kbps (SP=87.5%, SJW=1)
    0x441C, //  100 kbps (SP=87.5%, SJW=2)
    0x491C, //   50 kbps (SP=87.5%, SJW=2)
    0x581C, //   20 kbps (SP=87.5%, SJW=2)
    0x711C, //   10 kbps (SP=87.5%, SJW=2)
    0x7F7F, //    5 kbps (SP=68.0%, SJW=2)
];

/* SJA1000 register field limits */
const BRP_MIN: u16 = 1;
const BRP_MAX: u16 = 64;
const TSEG1_MIN: u16 = 1;
const TSEG1_MAX: u16 = 16;
const TSEG2_MIN: u16 = 1;
const TSEG2_MAX: u16 = 8;
const SJW_MIN: u16 = 1;
const SJW_MAX: u16 = 4;
const SAM_SINGLE: u8 = 0;
const SAM_TRIPLE: u8 = 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BitrateError {
    #[error("invalid or unsupported baudrate")]
    Baudrate,
}

/// Structured nominal bit-rate settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitrate {
    /// Controller clock frequency in Hz
    pub frequency: u32,
    /// Bit-rate prescaler
    pub brp: u16,
    /// Time segment 1 (before the sample point)
    pub tseg1: u16,
    /// Time segment 2 (after the sample point)
    pub tseg2: u16,
    /// Synchronization jump width
    pub sjw: u16,
    /// Number of samples (0 = once, 1 = three times)
    pub sam: u8,
}

/// Transmission rate and sample point derived from a bit-rate setting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusSpeed {
    /// Bus speed in bits per second
    pub speed: f32,
    /// Fraction of the bit time at which the bus is sampled
    pub sample_point: f32,
}

/// A bit-rate given either as a predefined index or as structured
/// register settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitrateSetting {
    Index(i32),
    Timing(Bitrate),
}

impl BitrateSetting {
    /// Resolves the setting to structured form (index lookup if needed).
    pub fn resolve(&self) -> Result<Bitrate, BitrateError> {
        match *self {
            BitrateSetting::Index(index) => index_to_bitrate(index),
            BitrateSetting::Timing(bitrate) => Ok(bitrate),
        }
    }
}

/// Looks up the BTR0BTR1 preset for a predefined bit-rate index.
pub fn index_to_btr(index: i32) -> Result<u16, BitrateError> {
    if index > 0 {
        return Err(BitrateError::Baudrate);
    }
    usize::try_from(-i64::from(index))
        .ok()
        .and_then(|i| SJA1000_BTR0BTR1.get(i))
        .copied()
        .ok_or(BitrateError::Baudrate)
}

/// Converts a predefined bit-rate index into structured settings at the
/// 8 MHz SJA1000 clock.
pub fn index_to_bitrate(index: i32) -> Result<Bitrate, BitrateError> {
    Ok(btr_to_bitrate(index_to_btr(index)?))
}

/// Matches structured settings against the preset table and returns the
/// predefined index, if any.
pub fn bitrate_to_index(bitrate: &Bitrate) -> Result<i32, BitrateError> {
    let btr = bitrate_to_btr(bitrate)?;
    SJA1000_BTR0BTR1
        .iter()
        .position(|&preset| preset == btr)
        .map(|i| -(i as i32))
        .ok_or(BitrateError::Baudrate)
}

/// Unpacks a BTR0BTR1 register word (the +1 bias applies to every field
/// except SAM).
pub fn btr_to_bitrate(btr: u16) -> Bitrate {
    Bitrate {
        frequency: CLOCK_FREQUENCY,
        sjw: ((btr >> 14) & 0x03) + 1,
        brp: ((btr >> 8) & 0x3F) + 1,
        sam: ((btr >> 7) & 0x01) as u8,
        tseg2: ((btr >> 4) & 0x07) + 1,
        tseg1: (btr & 0x0F) + 1,
    }
}

/// Packs structured settings into a BTR0BTR1 register word after checking
/// the SJA1000 field ranges.
pub fn bitrate_to_btr(bitrate: &Bitrate) -> Result<u16, BitrateError> {
    if bitrate.frequency != CLOCK_FREQUENCY {
        return Err(BitrateError::Baudrate);
    }
    if !(SJW_MIN..=SJW_MAX).contains(&bitrate.sjw) {
        return Err(BitrateError::Baudrate);
    }
    if !(BRP_MIN..=BRP_MAX).contains(&bitrate.brp) {
        return Err(BitrateError::Baudrate);
    }
    if bitrate.sam != SAM_SINGLE && bitrate.sam != SAM_TRIPLE {
        return Err(BitrateError::Baudrate);
    }
    if !(TSEG2_MIN..=TSEG2_MAX).contains(&bitrate.tseg2) {
        return Err(BitrateError::Baudrate);
    }
    if !(TSEG1_MIN..=TSEG1_MAX).contains(&bitrate.tseg1) {
        return Err(BitrateError::Baudrate);
    }

    Ok(((bitrate.sjw - 1) << 14)
        | ((bitrate.brp - 1) << 8)
        | (u16::from(bitrate.sam) << 7)
        | ((bitrate.tseg2 - 1) << 4)
        | (bitrate.tseg1 - 1))
}

/// Computes the transmission rate and sample point:
/// `speed = f_clock / (brp * (1 + tseg1 + tseg2))` and
/// `sample_point = (1 + tseg1) / (1 + tseg1 + tseg2)`.
pub fn bitrate_to_speed(bitrate: &Bitrate) -> BusSpeed {
    let time_quanta = 1.0 + f32::from(bitrate.tseg1) + f32::from(bitrate.tseg2);

    BusSpeed {
        speed: if bitrate.brp != 0 {
            bitrate.frequency as f32 / (f32::from(bitrate.brp) * time_quanta)
        } else {
            f32::INFINITY
        },
        sample_point: (1.0 + f32::from(bitrate.tseg1)) / time_quanta,
    }
}

/// Compares two bit-rate settings by transmission rate (integer math with
/// half-up rounding); equal rates compare by sample point when
/// `compare_sp` is set. An unresolvable index counts as rate zero.
pub fn compare(
    bitrate1: &BitrateSetting,
    bitrate2: &BitrateSetting,
    compare_sp: bool,
) -> Ordering {
    let lhs = bitrate1.resolve().ok();
    let rhs = bitrate2.resolve().ok();

    let rate1 = lhs.map_or(0, |b| nominal_rate(&b));
    let rate2 = rhs.map_or(0, |b| nominal_rate(&b));
    match rate1.cmp(&rate2) {
        Ordering::Equal if compare_sp => {
            let sp1 = lhs.map_or(0, |b| nominal_sample_point(&b));
            let sp2 = rhs.map_or(0, |b| nominal_sample_point(&b));
            sp1.cmp(&sp2)
        }
        ordering => ordering,
    }
}

fn nominal_rate(bitrate: &Bitrate) -> u64 {
    if bitrate.brp == 0 {
        return 0;
    }
    let time_quanta = 1 + u64::from(bitrate.tseg1) + u64::from(bitrate.tseg2);
    ((u64::from(bitrate.frequency) * 10) / (u64::from(bitrate.brp) * time_quanta) + 5) / 10
}

fn nominal_sample_point(bitrate: &Bitrate) -> u64 {
    let time_quanta = 1 + u64::from(bitrate.tseg1) + u64::from(bitrate.tseg2);
    (((1 + u64::from(bitrate.tseg1)) * 1000) / time_quanta + 5) / 10
}

/// Parses a comma-separated `key=value` bit-rate string over the keys
/// `f_clock`, `f_clock_mhz`, `nom_brp`, `nom_tseg1`, `nom_tseg2`,
/// `nom_sjw` and `nom_sam`. Each key may appear at most once, values are
/// unsigned decimal integers, blanks around tokens are allowed and missing
/// keys default to zero (`f_clock` itself is mandatory). Returns the
/// settings and whether `nom_sam` was given.
pub fn bitrate_from_string(string: &str) -> Result<(Bitrate, bool), BitrateError> {
    let mut bitrate = Bitrate {
        frequency: 0,
        brp: 0,
        tseg1: 0,
        tseg2: 0,
        sjw: 0,
        sam: 0,
    };
    let mut seen = [false; 7];
    let mut sam_given = false;

    for pair in string.split(',') {
        let (key, value) = pair.split_once('=').ok_or(BitrateError::Baudrate)?;
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BitrateError::Baudrate);
        }
        let number: u64 = value.parse().map_err(|_| BitrateError::Baudrate)?;

        let slot = match key {
            "f_clock" => {
                if number > i32::MAX as u64 {
                    return Err(BitrateError::Baudrate);
                }
                bitrate.frequency = number as u32;
                0
            }
            "f_clock_mhz" => {
                if number > (i32::MAX / 1_000_000) as u64 {
                    return Err(BitrateError::Baudrate);
                }
                bitrate.frequency = (number * 1_000_000) as u32;
                0
            }
            "nom_brp" => {
                bitrate.brp = u16::try_from(number).map_err(|_| BitrateError::Baudrate)?;
                1
            }
            "nom_tseg1" => {
                bitrate.tseg1 = u16::try_from(number).map_err(|_| BitrateError::Baudrate)?;
                2
            }
            "nom_tseg2" => {
                bitrate.tseg2 = u16::try_from(number).map_err(|_| BitrateError::Baudrate)?;
                3
            }
            "nom_sjw" => {
                bitrate.sjw = u16::try_from(number).map_err(|_| BitrateError::Baudrate)?;
                4
            }
            "nom_sam" => {
                bitrate.sam = u8::try_from(number).map_err(|_| BitrateError::Baudrate)?;
                sam_given = true;
                5
            }
            _ => return Err(BitrateError::Baudrate),
        };
        if seen[slot] {
            return Err(BitrateError::Baudrate);
        }
        seen[slot] = true;
    }

    if bitrate.frequency == 0 {
        return Err(BitrateError::Baudrate);
    }
    Ok((bitrate, sam_given))
}

/// Formats structured settings as a `key=value` string in canonical key
/// order; `with_sam` appends the `nom_sam` pair.
pub fn bitrate_to_string(bitrate: &Bitrate, with_sam: bool) -> String {
    let mut string = format!(
        "f_clock={},nom_brp={},nom_tseg1={},nom_tseg2={},nom_sjw={}",
        bitrate.frequency, bitrate.brp, bitrate.tseg1, bitrate.tseg2, bitrate.sjw
    );
    if with_sam {
        let _ = write!(string, ",nom_sam={}", bitrate.sam);
    }
    string
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_table_round_trips_through_pack_unpack() {
        for &preset in &SJA1000_BTR0BTR1 {
            assert_eq!(bitrate_to_btr(&btr_to_bitrate(preset)).unwrap(), preset);
        }
    }

    #[test]
    fn index_250k_is_btr_011c() {
        assert_eq!(index_to_btr(INDEX_250K).unwrap(), 0x011C);
        let bitrate = index_to_bitrate(INDEX_250K).unwrap();
        assert_eq!(bitrate.frequency, CLOCK_FREQUENCY);
        assert_eq!(bitrate.brp, 2);
        assert_eq!(bitrate.tseg1, 13);
        assert_eq!(bitrate.tseg2, 2);
        let speed = bitrate_to_speed(&bitrate);
        assert_eq!(speed.speed, 250_000.0);
        assert_eq!(speed.sample_point, 0.875);
    }

    #[test]
    fn index_round_trips_on_predefined_range() {
        for index in INDEX_10K..=INDEX_1M {
            let bitrate = index_to_bitrate(index).unwrap();
            assert_eq!(bitrate_to_index(&bitrate).unwrap(), index);
        }
    }

    #[test]
    fn invalid_indexes_are_rejected() {
        assert_eq!(index_to_btr(42), Err(BitrateError::Baudrate));
        assert_eq!(index_to_btr(-10), Err(BitrateError::Baudrate));
    }

    #[test]
    fn out_of_range_fields_are_rejected() {
        let mut bitrate = index_to_bitrate(INDEX_500K).unwrap();
        bitrate.brp = 65;
        assert_eq!(bitrate_to_btr(&bitrate), Err(BitrateError::Baudrate));

        let mut bitrate = index_to_bitrate(INDEX_500K).unwrap();
        bitrate.frequency = 16_000_000;
        assert_eq!(bitrate_to_btr(&bitrate), Err(BitrateError::Baudrate));
    }

    #[test]
    fn string_parsing_accepts_blanks_and_defaults() {
        let (bitrate, sam) =
            bitrate_from_string(" f_clock = 8000000 , nom_brp=2, nom_tseg1=13 ,nom_tseg2=2,nom_sjw=1")
                .unwrap();
        assert!(!sam);
        assert_eq!(bitrate_to_btr(&bitrate).unwrap(), 0x011C);
    }

    #[test]
    fn string_parsing_rejects_bad_input() {
        // duplicate key
        assert!(bitrate_from_string("f_clock=8000000,f_clock=8000000").is_err());
        // f_clock and f_clock_mhz name the same key
        assert!(bitrate_from_string("f_clock=8000000,f_clock_mhz=8").is_err());
        // unknown key
        assert!(bitrate_from_string("f_clock=8000000,data_brp=1").is_err());
        // signed / non-decimal values
        assert!(bitrate_from_string("f_clock=-1").is_err());
        assert!(bitrate_from_string("f_clock=0x10").is_err());
        // missing f_clock
        assert!(bitrate_from_string("nom_brp=2").is_err());
    }

    #[test]
    fn string_round_trip_preserves_key_set() {
        let text = "f_clock=8000000,nom_brp=2,nom_tseg1=13,nom_tseg2=2,nom_sjw=1";
        let (bitrate, sam) = bitrate_from_string(text).unwrap();
        assert_eq!(bitrate_to_string(&bitrate, sam), text);

        let with_sam = "f_clock=8000000,nom_brp=2,nom_tseg1=13,nom_tseg2=2,nom_sjw=1,nom_sam=0";
        let (bitrate, sam) = bitrate_from_string(with_sam).unwrap();
        assert!(sam);
        assert_eq!(bitrate_to_string(&bitrate, sam), with_sam);
    }

    #[test]
    fn mhz_shorthand_scales_the_clock() {
        let (bitrate, _) = bitrate_from_string("f_clock_mhz=8,nom_brp=1").unwrap();
        assert_eq!(bitrate.frequency, 8_000_000);
    }

    #[test]
    fn compare_orders_by_rate_then_sample_point() {
        let fast = BitrateSetting::Index(INDEX_1M);
        let slow = BitrateSetting::Index(INDEX_10K);
        assert_eq!(compare(&fast, &slow, false), Ordering::Greater);
        assert_eq!(compare(&slow, &fast, false), Ordering::Less);
        assert_eq!(compare(&fast, &fast, true), Ordering::Equal);

        // same rate, later sample point wins when compare_sp is set
        let a = BitrateSetting::Timing(Bitrate {
            frequency: CLOCK_FREQUENCY,
            brp: 1,
            tseg1: 5,
            tseg2: 2,
            sjw: 1,
            sam: 0,
        });
        let b = BitrateSetting::Timing(Bitrate {
            frequency: CLOCK_FREQUENCY,
            brp: 1,
            tseg1: 6,
            tseg2: 1,
            sjw: 1,
            sam: 0,
        });
        assert_eq!(compare(&a, &b, false), Ordering::Equal);
        assert_eq!(compare(&a, &b, true), Ordering::Less);

        // an invalid index counts as rate zero
        assert_eq!(
            compare(&BitrateSetting::Index(42), &fast, false),
            Ordering::Less
        );
    }

    #[test]
    fn zero_prescaler_yields_infinite_speed() {
        let bitrate = Bitrate {
            frequency: CLOCK_FREQUENCY,
            brp: 0,
            tseg1: 13,
            tseg2: 2,
            sjw: 1,
            sam: 0,
        };
        assert!(bitrate_to_speed(&bitrate).speed.is_infinite());
    }
}
