//! Stream IDs, §3/§4.5. The low two bits of a 62-bit stream ID encode
//! (initiator, directionality), giving four classes.

use crate::{
    result::{require, QuicError, QuicResult},
    varint::VarInt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directionality {
    Bidi,
    Uni,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(u64);

impl StreamId {
    pub const MAX: u64 = (1 << 62) - 1;

    pub fn new(initiator: Side, dir: Directionality, index: u64) -> QuicResult<Self> {
        require(index <= (Self::MAX >> 2), "stream index too large")?;
        let bit0 = matches!(initiator, Side::Server) as u64;
        let bit1 = matches!(dir, Directionality::Uni) as u64;
        Ok(Self((index << 2) | (bit1 << 1) | bit0))
    }

    pub fn from_varint(value: VarInt) -> Self {
        Self(value.into_inner())
    }

    pub fn to_varint(self) -> VarInt {
        VarInt::new_u64(self.0).expect("stream ids are always <= 2^62-1")
    }

    pub fn initiator(self) -> Side {
        if self.0 & 0b01 == 0 {
            Side::Client
        } else {
            Side::Server
        }
    }

    pub fn directionality(self) -> Directionality {
        if self.0 & 0b10 == 0 {
            Directionality::Bidi
        } else {
            Directionality::Uni
        }
    }

    /// 0-based index within this stream's (initiator, directionality) class.
    pub fn index(self) -> u64 {
        self.0 >> 2
    }

    pub fn initiated_by(self, side: Side) -> bool {
        self.initiator() == side
    }

    pub fn is_bidi(self) -> bool {
        matches!(self.directionality(), Directionality::Bidi)
    }

    /// Whether `local` can ever send data on this stream (it is bidi, or it
    /// was opened by `local` as a uni stream).
    pub fn is_send_allowed(self, local: Side) -> bool {
        self.is_bidi() || self.initiated_by(local)
    }

    /// Whether `local` can ever receive data on this stream.
    pub fn is_recv_allowed(self, local: Side) -> bool {
        self.is_bidi() || !self.initiated_by(local)
    }

    /// The highest stream ID permitted for this (initiator, dir) class when
    /// the peer has advertised `max_streams` streams of that class may be
    /// opened (§3: `max_streams * 4 + initial_id_for_type - 1`).
    pub fn limit(initiator: Side, dir: Directionality, max_streams: u64) -> QuicResult<u64> {
        require(max_streams <= (1u64 << 60), "max_streams exceeds 2^60")?;
        if max_streams == 0 {
            return Ok(0); // caller must check max_streams != 0 before using this as "no streams allowed"
        }
        let first = Self::new(initiator, dir, 0)?.0;
        Ok(first + (max_streams - 1) * 4)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_bits_encode_initiator_and_directionality() {
        let id = StreamId::new(Side::Client, Directionality::Bidi, 0).unwrap();
        assert_eq!(id.to_varint().into_inner(), 0);
        let id = StreamId::new(Side::Server, Directionality::Bidi, 0).unwrap();
        assert_eq!(id.to_varint().into_inner(), 1);
        let id = StreamId::new(Side::Client, Directionality::Uni, 0).unwrap();
        assert_eq!(id.to_varint().into_inner(), 2);
        let id = StreamId::new(Side::Server, Directionality::Uni, 0).unwrap();
        assert_eq!(id.to_varint().into_inner(), 3);
    }

    #[test]
    fn index_round_trips() {
        let id = StreamId::new(Side::Client, Directionality::Bidi, 17).unwrap();
        assert_eq!(id.index(), 17);
        assert_eq!(id.initiator(), Side::Client);
        assert_eq!(id.directionality(), Directionality::Bidi);
    }

    #[test]
    fn send_recv_allowed_reflects_class() {
        let client_uni = StreamId::new(Side::Client, Directionality::Uni, 0).unwrap();
        assert!(client_uni.is_send_allowed(Side::Client));
        assert!(!client_uni.is_recv_allowed(Side::Client));
        assert!(!client_uni.is_send_allowed(Side::Server));
        assert!(client_uni.is_recv_allowed(Side::Server));

        let bidi = StreamId::new(Side::Server, Directionality::Bidi, 0).unwrap();
        assert!(bidi.is_send_allowed(Side::Client));
        assert!(bidi.is_recv_allowed(Side::Client));
    }

    #[test]
    fn limit_matches_spec_formula() {
        // max_streams = 1 => only stream index 0 of that class is allowed.
        let max_id = StreamId::limit(Side::Client, Directionality::Bidi, 1).unwrap();
        assert_eq!(max_id, 0);
        let max_id = StreamId::limit(Side::Client, Directionality::Bidi, 3).unwrap();
        assert_eq!(max_id, 8); // streams 0, 4, 8
    }

    #[test]
    fn rejects_max_streams_over_2_to_60() {
        assert!(StreamId::limit(Side::Client, Directionality::Bidi, (1 << 60) + 1).is_err());
    }
}
