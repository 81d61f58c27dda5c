//! PCM sample encodings and capability bitmasks.
//!
//! Integer codes match the `MPG123_ENC_*` constants so an embedding caller
//! can pass them through unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sample representation of interleaved PCM frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Float32,
    Float64,
    Signed8,
    Unsigned8,
    Signed16,
    Unsigned16,
    Signed24,
    Unsigned24,
    Signed32,
    Unsigned32,
}

impl Encoding {
    pub const ALL: [Encoding; 10] = [
        Encoding::Float32,
        Encoding::Float64,
        Encoding::Signed8,
        Encoding::Unsigned8,
        Encoding::Signed16,
        Encoding::Unsigned16,
        Encoding::Signed24,
        Encoding::Unsigned24,
        Encoding::Signed32,
        Encoding::Unsigned32,
    ];

    /// The `MPG123_ENC_*` integer for this encoding.
    pub const fn code(self) -> i32 {
        match self {
            Encoding::Float32 => 0x200,
            Encoding::Float64 => 0x400,
            Encoding::Signed8 => 0x082,
            Encoding::Unsigned8 => 0x001,
            Encoding::Signed16 => 0x0d0,
            Encoding::Unsigned16 => 0x060,
            Encoding::Signed24 => 0x5080,
            Encoding::Unsigned24 => 0x6000,
            Encoding::Signed32 => 0x1180,
            Encoding::Unsigned32 => 0x2100,
        }
    }

    /// Inverse of [`Encoding::code`]; `None` for anything outside the known set.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|encoding| encoding.code() == code)
    }

    pub const fn bits(self) -> u32 {
        match self {
            Encoding::Signed8 | Encoding::Unsigned8 => 8,
            Encoding::Signed16 | Encoding::Unsigned16 => 16,
            Encoding::Signed24 | Encoding::Unsigned24 => 24,
            Encoding::Float32 | Encoding::Signed32 | Encoding::Unsigned32 => 32,
            Encoding::Float64 => 64,
        }
    }

    /// Width of one sample of one channel. Never zero.
    pub const fn bytes_per_sample(self) -> usize {
        (self.bits() / 8) as usize
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Encoding::Float32 | Encoding::Float64)
    }

    pub const fn is_signed(self) -> bool {
        !matches!(
            self,
            Encoding::Unsigned8 | Encoding::Unsigned16 | Encoding::Unsigned24 | Encoding::Unsigned32
        )
    }

    /// Resolve a (bit depth, signedness, float) description to an encoding.
    ///
    /// Float formats ignore `signed`. Returns `None` when no encoding matches,
    /// e.g. 12-bit integers or 16-bit floats.
    pub fn from_format(bit_depth: u32, signed: bool, float: bool) -> Option<Self> {
        if float {
            return match bit_depth {
                32 => Some(Encoding::Float32),
                64 => Some(Encoding::Float64),
                _ => None,
            };
        }

        match (bit_depth, signed) {
            (8, true) => Some(Encoding::Signed8),
            (8, false) => Some(Encoding::Unsigned8),
            (16, true) => Some(Encoding::Signed16),
            (16, false) => Some(Encoding::Unsigned16),
            (24, true) => Some(Encoding::Signed24),
            (24, false) => Some(Encoding::Unsigned24),
            (32, true) => Some(Encoding::Signed32),
            (32, false) => Some(Encoding::Unsigned32),
            _ => None,
        }
    }

    /// Constant name as exported to embedding callers.
    pub const fn constant_name(self) -> &'static str {
        match self {
            Encoding::Float32 => "MPG123_ENC_FLOAT_32",
            Encoding::Float64 => "MPG123_ENC_FLOAT_64",
            Encoding::Signed8 => "MPG123_ENC_SIGNED_8",
            Encoding::Unsigned8 => "MPG123_ENC_UNSIGNED_8",
            Encoding::Signed16 => "MPG123_ENC_SIGNED_16",
            Encoding::Unsigned16 => "MPG123_ENC_UNSIGNED_16",
            Encoding::Signed24 => "MPG123_ENC_SIGNED_24",
            Encoding::Unsigned24 => "MPG123_ENC_UNSIGNED_24",
            Encoding::Signed32 => "MPG123_ENC_SIGNED_32",
            Encoding::Unsigned32 => "MPG123_ENC_UNSIGNED_32",
        }
    }

    /// Short name used in configuration files and on the command line.
    pub const fn short_name(self) -> &'static str {
        match self {
            Encoding::Float32 => "f32",
            Encoding::Float64 => "f64",
            Encoding::Signed8 => "s8",
            Encoding::Unsigned8 => "u8",
            Encoding::Signed16 => "s16",
            Encoding::Unsigned16 => "u16",
            Encoding::Signed24 => "s24",
            Encoding::Unsigned24 => "u24",
            Encoding::Signed32 => "s32",
            Encoding::Unsigned32 => "u32",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|encoding| {
                encoding.short_name() == needle
                    || encoding.constant_name().eq_ignore_ascii_case(&needle)
            })
            .ok_or_else(|| format!("unknown encoding '{}'", s))
    }
}

/// Bitmask of encodings, OR-ed together from their `MPG123_ENC_*` codes.
///
/// Mirrors the capability word returned by a backend's format query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingSet(u32);

impl EncodingSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Self::from_encodings(Encoding::ALL)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn from_encodings<I: IntoIterator<Item = Encoding>>(encodings: I) -> Self {
        let mut set = Self::empty();
        for encoding in encodings {
            set.insert(encoding);
        }
        set
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn insert(&mut self, encoding: Encoding) {
        self.0 |= encoding.code() as u32;
    }

    /// Whether `encoding` is playable.
    ///
    /// Codes share bits (signed16 includes the generic 16-bit and signed
    /// flags), so every bit of the code must be present.
    pub fn contains(self, encoding: Encoding) -> bool {
        let code = encoding.code() as u32;
        self.0 & code == code
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Encoding> {
        Encoding::ALL
            .into_iter()
            .filter(move |encoding| self.contains(*encoding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_widths_follow_bit_depth() {
        assert_eq!(Encoding::Float64.bytes_per_sample(), 8);
        assert_eq!(Encoding::Signed24.bytes_per_sample(), 3);
        assert_eq!(Encoding::Unsigned24.bytes_per_sample(), 3);
        assert_eq!(Encoding::Unsigned8.bytes_per_sample(), 1);
        assert!(Encoding::ALL
            .iter()
            .all(|encoding| encoding.bytes_per_sample() > 0));
    }

    #[test]
    fn codes_match_mpg123_constants() {
        assert_eq!(Encoding::Signed16.code(), 0xd0);
        assert_eq!(Encoding::Float32.code(), 0x200);
        assert_eq!(Encoding::Signed24.code(), 0x5080);
        assert_eq!(Encoding::from_code(0x1180), Some(Encoding::Signed32));
        assert_eq!(Encoding::from_code(0x04), None);
        assert_eq!(Encoding::from_code(0), None);
    }

    #[test]
    fn from_format_resolves_defaults() {
        assert_eq!(
            Encoding::from_format(16, true, false),
            Some(Encoding::Signed16)
        );
        assert_eq!(
            Encoding::from_format(8, false, false),
            Some(Encoding::Unsigned8)
        );
        assert_eq!(
            Encoding::from_format(32, false, true),
            Some(Encoding::Float32)
        );
        assert_eq!(Encoding::from_format(12, true, false), None);
        assert_eq!(Encoding::from_format(16, true, true), None);
    }

    #[test]
    fn parses_short_and_constant_names() {
        assert_eq!("s16".parse::<Encoding>(), Ok(Encoding::Signed16));
        assert_eq!(
            "MPG123_ENC_FLOAT_32".parse::<Encoding>(),
            Ok(Encoding::Float32)
        );
        assert!("s12".parse::<Encoding>().is_err());
    }

    #[test]
    fn encoding_set_requires_every_code_bit() {
        let set = EncodingSet::from_encodings([Encoding::Signed16, Encoding::Float32]);
        assert!(set.contains(Encoding::Signed16));
        assert!(set.contains(Encoding::Float32));
        // unsigned16 (0x60) shares the 16-bit flag with signed16 but not bit 0x20
        assert!(!set.contains(Encoding::Unsigned16));
        assert!(!set.contains(Encoding::Signed8));
        assert_eq!(set.iter().count(), 2);
    }

    #[test]
    fn full_set_contains_everything() {
        let set = EncodingSet::all();
        assert!(Encoding::ALL.iter().all(|encoding| set.contains(*encoding)));
        assert!(EncodingSet::empty().is_empty());
    }
}
