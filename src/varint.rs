//! Variable-length integer codec, §4.1.
//!
//! heavily inspired by quinn, same as the teacher code this crate grew
//! from. Non-negative integers are encoded in 1, 2, 4 or 8 bytes; the top
//! two bits of the first byte give log2(length) and the remaining 6/14/30/62
//! bits carry the value, big-endian.

use bytes::{Buf, BufMut};

use crate::result::{QuicError, QuicResult};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct VarInt(pub(crate) u64);

impl VarInt {
    pub const MAX: Self = Self((1 << 62) - 1);
    pub const ZERO: Self = Self(0);

    #[inline(always)]
    pub const fn new_u32(value: u32) -> Self {
        Self(value as u64)
    }

    pub fn new_u64(value: u64) -> QuicResult<Self> {
        if value <= Self::MAX.0 {
            Ok(Self(value))
        } else {
            Err(QuicError::malformed("varint value exceeds 2^62-1"))
        }
    }

    /// Saturates to `MAX` instead of failing. Used for values that are
    /// clamped by spec (e.g. stream/connection limits) rather than rejected.
    pub fn saturating_from_u64(value: u64) -> Self {
        Self(value.min(Self::MAX.0))
    }

    #[inline(always)]
    pub const fn into_inner(self) -> u64 {
        self.0
    }

    pub fn as_usize(self) -> QuicResult<usize> {
        usize::try_from(self.0).map_err(|_| QuicError::malformed("varint does not fit in usize"))
    }

    /// Encoded length in bytes: 1, 2, 4, or 8.
    pub fn encoding_size(self) -> usize {
        if self.0 < (1 << 6) {
            1
        } else if self.0 < (1 << 14) {
            2
        } else if self.0 < (1 << 30) {
            4
        } else {
            8
        }
    }

    pub fn encode<B: BufMut>(self, buf: &mut B) {
        let size = self.encoding_size();
        let prefix: u8 = match size {
            1 => 0b00,
            2 => 0b01,
            4 => 0b10,
            8 => 0b11,
            _ => unreachable!("encoding_size only returns 1, 2, 4, or 8"),
        };
        let shift = 8 * (size - 1);
        buf.put_u8((prefix << 6) | ((self.0 >> shift) & 0x3f) as u8);
        for i in (0..size - 1).rev() {
            buf.put_u8(((self.0 >> (8 * i)) & 0xff) as u8);
        }
    }

    /// Decode accepts non-minimal encodings everywhere (§4.1); callers that
    /// need strict minimality (frame-type fields) check `encoding_size`
    /// themselves after decoding.
    pub fn decode<B: Buf>(buf: &mut B) -> QuicResult<Self> {
        if !buf.has_remaining() {
            return Err(QuicError::malformed("varint: no bytes remaining"));
        }
        let first = buf.get_u8();
        let tag = first >> 6;
        let len = 1usize << tag;
        if buf.remaining() < len - 1 {
            return Err(QuicError::malformed("varint: truncated"));
        }
        let mut value = (first & 0x3f) as u64;
        for _ in 0..len - 1 {
            value = (value << 8) | buf.get_u8() as u64;
        }
        Ok(Self(value))
    }
}

impl Default for VarInt {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<u8> for VarInt {
    fn from(value: u8) -> Self {
        Self(value as u64)
    }
}

impl From<u16> for VarInt {
    fn from(value: u16) -> Self {
        Self(value as u64)
    }
}

impl TryFrom<VarInt> for u32 {
    type Error = QuicError;

    fn try_from(value: VarInt) -> Result<Self, Self::Error> {
        u32::try_from(value.0).map_err(|_| QuicError::malformed("varint does not fit in u32"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn round_trip(value: u64) {
        let varint = VarInt::new_u64(value).unwrap();
        let mut buf = BytesMut::new();
        varint.encode(&mut buf);
        let mut cursor = &buf[..];
        let decoded = VarInt::decode(&mut cursor).unwrap();
        assert_eq!(varint, decoded);
        assert!(cursor.is_empty());
    }

    #[test]
    fn round_trips_boundary_values() {
        for value in [
            0,
            1,
            63,
            64,
            16_383,
            16_384,
            1_073_741_823,
            1_073_741_824,
            VarInt::MAX.into_inner(),
        ] {
            round_trip(value);
        }
    }

    #[test]
    fn matches_rfc_examples() {
        // from RFC 9000 appendix A.1
        let mut buf = &[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c][..];
        let decoded = VarInt::decode(&mut buf).unwrap();
        assert_eq!(decoded.into_inner(), 151_288_809_941_952_652);

        let mut buf = &[0x9d, 0x7f, 0x3e, 0x7d][..];
        let decoded = VarInt::decode(&mut buf).unwrap();
        assert_eq!(decoded.into_inner(), 494_878_333);

        let mut buf = &[0x7b, 0xbd][..];
        let decoded = VarInt::decode(&mut buf).unwrap();
        assert_eq!(decoded.into_inner(), 15_293);

        let mut buf = &[0x25][..];
        let decoded = VarInt::decode(&mut buf).unwrap();
        assert_eq!(decoded.into_inner(), 37);
    }

    #[test]
    fn non_minimal_encoding_is_accepted() {
        // 37 minimally encodes as one byte (0x25) but is also valid as a
        // non-minimal 2-byte, 4-byte, or 8-byte encoding.
        let mut two_byte = &[0x40, 0x25][..];
        assert_eq!(VarInt::decode(&mut two_byte).unwrap().into_inner(), 37);

        let mut eight_byte = &[0xc0, 0, 0, 0, 0, 0, 0, 0x25][..];
        assert_eq!(VarInt::decode(&mut eight_byte).unwrap().into_inner(), 37);
    }

    #[test]
    fn rejects_values_above_max() {
        assert!(VarInt::new_u64(1 << 62).is_err());
        assert!(VarInt::new_u64(u64::MAX).is_err());
    }

    #[test]
    fn rejects_truncated_input() {
        let mut buf = &[0xc2, 0x19][..];
        assert!(VarInt::decode(&mut buf).is_err());
    }
}
