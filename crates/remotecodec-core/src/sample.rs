//! Encoded media samples.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Buffer flag bitset carried by every sample.
///
/// Bit values follow the platform buffer-flag convention so they can be passed
/// to a decoding primitive unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleFlags(u32);

impl SampleFlags {
    pub const NONE: Self = Self(0);
    pub const KEY_FRAME: Self = Self(1);
    pub const CODEC_CONFIG: Self = Self(2);
    pub const END_OF_STREAM: Self = Self(4);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for SampleFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for SampleFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

/// One unit of encoded media.
///
/// A sample is immutable once built. It moves between owners (client, the
/// host's queue, the decoder's input slot) rather than being copied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pts_us: i64,
    flags: SampleFlags,
    payload: Option<Vec<u8>>,
}

impl Sample {
    /// Create a sample carrying a payload.
    pub const fn new(payload: Vec<u8>, pts_us: i64, flags: SampleFlags) -> Self {
        Self {
            pts_us,
            flags,
            payload: Some(payload),
        }
    }

    /// Create a flag-only sample (no payload).
    pub const fn flags_only(pts_us: i64, flags: SampleFlags) -> Self {
        Self {
            pts_us,
            flags,
            payload: None,
        }
    }

    /// The canonical end-of-stream sample.
    pub const fn eos() -> Self {
        Self::flags_only(i64::MIN, SampleFlags::END_OF_STREAM)
    }

    /// Presentation timestamp in microseconds.
    pub const fn pts_us(&self) -> i64 {
        self.pts_us
    }

    pub const fn flags(&self) -> SampleFlags {
        self.flags
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Take ownership of the payload bytes.
    pub fn into_payload(self) -> Option<Vec<u8>> {
        self.payload
    }

    /// Payload length in bytes (0 when absent).
    pub fn size(&self) -> usize {
        self.payload.as_ref().map_or(0, Vec::len)
    }

    pub const fn is_eos(&self) -> bool {
        self.flags.contains(SampleFlags::END_OF_STREAM)
    }

    /// Buffer metadata view of this sample. Offset is always 0.
    pub fn info(&self) -> SampleInfo {
        SampleInfo {
            pts_us: self.pts_us,
            size: self.size(),
            flags: self.flags,
        }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_eos() {
            return f.write_str("EOS sample");
        }
        write!(f, "{{ pts={}", self.pts_us)?;
        if let Some(payload) = &self.payload {
            write!(f, ", size={}", payload.len())?;
        }
        write!(f, ", flags={:x} }}", self.flags.bits())
    }
}

/// Metadata describing a buffer handed to or produced by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleInfo {
    pub pts_us: i64,
    pub size: usize,
    pub flags: SampleFlags,
}

impl SampleInfo {
    pub const fn is_eos(&self) -> bool {
        self.flags.contains(SampleFlags::END_OF_STREAM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eos_sample_has_no_payload() {
        let eos = Sample::eos();
        assert!(eos.is_eos());
        assert_eq!(eos.pts_us(), i64::MIN);
        assert!(eos.payload().is_none());
        assert_eq!(eos.size(), 0);
    }

    #[test]
    fn flags_combine() {
        let flags = SampleFlags::KEY_FRAME | SampleFlags::END_OF_STREAM;
        assert!(flags.contains(SampleFlags::KEY_FRAME));
        assert!(flags.contains(SampleFlags::END_OF_STREAM));
        assert!(!flags.contains(SampleFlags::CODEC_CONFIG));
        assert!(!flags.contains(SampleFlags::NONE));
        assert_eq!(flags.bits(), 5);
    }

    #[test]
    fn display_format() {
        let sample = Sample::new(vec![0; 12], 33_000, SampleFlags::KEY_FRAME);
        assert_eq!(sample.to_string(), "{ pts=33000, size=12, flags=1 }");

        let flag_only = Sample::flags_only(7, SampleFlags::CODEC_CONFIG);
        assert_eq!(flag_only.to_string(), "{ pts=7, flags=2 }");

        assert_eq!(Sample::eos().to_string(), "EOS sample");
    }

    #[test]
    fn info_reflects_payload() {
        let sample = Sample::new(vec![1, 2, 3], 66_000, SampleFlags::NONE);
        let info = sample.info();
        assert_eq!(info.pts_us, 66_000);
        assert_eq!(info.size, 3);
        assert!(!info.is_eos());
    }
}
