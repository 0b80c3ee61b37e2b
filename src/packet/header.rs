//! Long/short packet header codec, §4.2.
//!
//! Header protection and AEAD are out of scope (§1): the protected
//! type-specific low bits of a long header, and the entirety of a short
//! header beyond the destination connection ID, are opaque here. This
//! codec exposes them as `protected` byte ranges that a crypto collaborator
//! unprotects before the packet-number-space engine can read a packet
//! number out of them.

use bytes::{Buf, BufMut, Bytes};

use crate::{
    connection_id::ConnectionId,
    result::{require, QuicError, QuicResult},
    varint::VarInt,
};

/// Top bit of byte 0: 1 = long header, 0 = short header.
const LONG_HEADER_FORM: u8 = 0b1000_0000;
const FIXED_BIT: u8 = 0b0100_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongPacketType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
}

impl LongPacketType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => LongPacketType::Initial,
            0b01 => LongPacketType::ZeroRtt,
            0b10 => LongPacketType::Handshake,
            _ => LongPacketType::Retry,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            LongPacketType::Initial => 0b00,
            LongPacketType::ZeroRtt => 0b01,
            LongPacketType::Handshake => 0b10,
            LongPacketType::Retry => 0b11,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    Initial {
        version: u32,
        dcid: ConnectionId,
        scid: ConnectionId,
        token: Bytes,
        /// Length of (packet number + payload), still header-protected.
        length: VarInt,
        /// The protected low 4 bits of byte 0 (reserved bits + PN length).
        protected_bits: u8,
    },
    ZeroRtt {
        version: u32,
        dcid: ConnectionId,
        scid: ConnectionId,
        length: VarInt,
        protected_bits: u8,
    },
    Handshake {
        version: u32,
        dcid: ConnectionId,
        scid: ConnectionId,
        length: VarInt,
        protected_bits: u8,
    },
    /// Not AEAD-integrity-protected at this layer (§1); the 16-byte
    /// integrity tag at the end of `retry_token_and_tag` is authenticated
    /// via the handshake's `original_connection_id` confirmation instead.
    Retry {
        version: u32,
        dcid: ConnectionId,
        scid: ConnectionId,
        retry_token_and_tag: Bytes,
    },
    VersionNegotiation {
        dcid: ConnectionId,
        scid: ConnectionId,
        supported_versions: Vec<u32>,
    },
    /// Only the destination connection ID is legible without header
    /// protection; the spin bit, reserved bits, key phase, PN length, and
    /// packet number itself live in `protected`.
    Short {
        dcid: ConnectionId,
        protected: Bytes,
    },
}

impl Header {
    pub fn is_long(&self) -> bool {
        !matches!(self, Header::Short { .. })
    }

    pub fn dcid(&self) -> &ConnectionId {
        match self {
            Header::Initial { dcid, .. }
            | Header::ZeroRtt { dcid, .. }
            | Header::Handshake { dcid, .. }
            | Header::Retry { dcid, .. }
            | Header::VersionNegotiation { dcid, .. } => dcid,
            Header::Short { dcid, .. } => dcid,
        }
    }

    pub fn scid(&self) -> Option<&ConnectionId> {
        match self {
            Header::Initial { scid, .. }
            | Header::ZeroRtt { scid, .. }
            | Header::Handshake { scid, .. }
            | Header::Retry { scid, .. }
            | Header::VersionNegotiation { scid, .. } => Some(scid),
            Header::Short { .. } => None,
        }
    }

    /// Decode one packet header from the front of `buf`. `short_dcid_len`
    /// is the DCID length the endpoint expects on short-header packets,
    /// learned out of band (it is whatever length of CID this endpoint
    /// itself issued, §4.2).
    pub fn decode<B: Buf>(buf: &mut B, short_dcid_len: usize) -> QuicResult<Header> {
        require(buf.has_remaining(), "header: empty datagram")?;
        let first = buf.chunk()[0];

        if first & LONG_HEADER_FORM == 0 {
            return Self::decode_short(buf, short_dcid_len);
        }
        Self::decode_long(buf)
    }

    fn decode_long<B: Buf>(buf: &mut B) -> QuicResult<Header> {
        let first = buf.get_u8();
        if first & FIXED_BIT == 0 {
            return Err(QuicError::malformed("long header: fixed bit is zero"));
        }
        let long_type = LongPacketType::from_bits(first >> 4);
        let protected_bits = first & 0b0000_1111;

        require(buf.remaining() >= 4, "long header: truncated version")?;
        let version = buf.get_u32();

        let dcid = ConnectionId::decode(buf)?;
        let scid = ConnectionId::decode(buf)?;

        if version == 0 {
            let mut supported_versions = Vec::new();
            while buf.remaining() >= 4 {
                supported_versions.push(buf.get_u32());
            }
            require(
                buf.remaining() == 0,
                "version negotiation: trailing bytes that do not form a u32",
            )?;
            return Ok(Header::VersionNegotiation {
                dcid,
                scid,
                supported_versions,
            });
        }

        match long_type {
            LongPacketType::Initial => {
                let token_len = VarInt::decode(buf)?.as_usize()?;
                require(buf.remaining() >= token_len, "initial: truncated token")?;
                let token = buf.copy_to_bytes(token_len);
                let length = VarInt::decode(buf)?;
                Ok(Header::Initial {
                    version,
                    dcid,
                    scid,
                    token,
                    length,
                    protected_bits,
                })
            }
            LongPacketType::ZeroRtt => {
                let length = VarInt::decode(buf)?;
                Ok(Header::ZeroRtt {
                    version,
                    dcid,
                    scid,
                    length,
                    protected_bits,
                })
            }
            LongPacketType::Handshake => {
                let length = VarInt::decode(buf)?;
                Ok(Header::Handshake {
                    version,
                    dcid,
                    scid,
                    length,
                    protected_bits,
                })
            }
            LongPacketType::Retry => {
                let retry_token_and_tag = buf.copy_to_bytes(buf.remaining());
                Ok(Header::Retry {
                    version,
                    dcid,
                    scid,
                    retry_token_and_tag,
                })
            }
        }
    }

    fn decode_short<B: Buf>(buf: &mut B, dcid_len: usize) -> QuicResult<Header> {
        // byte 0's low 7 bits (spin, reserved x2, key phase, pn length)
        // remain protected; we consume it as part of `protected` below.
        require(buf.remaining() >= 1 + dcid_len, "short header: truncated")?;
        let first = buf.chunk()[0];
        if first & FIXED_BIT == 0 {
            return Err(QuicError::malformed("short header: fixed bit is zero"));
        }
        let mut header_bytes = [0u8; 1];
        buf.copy_to_slice(&mut header_bytes);
        let mut dcid_bytes = vec![0u8; dcid_len];
        buf.copy_to_slice(&mut dcid_bytes);
        let dcid = ConnectionId::from_wire(dcid_bytes)?;
        let protected = buf.copy_to_bytes(buf.remaining());
        Ok(Header::Short { dcid, protected })
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Header::Initial {
                version,
                dcid,
                scid,
                token,
                length,
                protected_bits,
            } => {
                buf.put_u8(LONG_HEADER_FORM | FIXED_BIT | (LongPacketType::Initial.to_bits() << 4) | protected_bits);
                buf.put_u32(*version);
                dcid.encode(buf);
                scid.encode(buf);
                VarInt::new_u64(token.len() as u64).unwrap().encode(buf);
                buf.put_slice(token);
                length.encode(buf);
            }
            Header::ZeroRtt {
                version,
                dcid,
                scid,
                length,
                protected_bits,
            } => {
                buf.put_u8(LONG_HEADER_FORM | FIXED_BIT | (LongPacketType::ZeroRtt.to_bits() << 4) | protected_bits);
                buf.put_u32(*version);
                dcid.encode(buf);
                scid.encode(buf);
                length.encode(buf);
            }
            Header::Handshake {
                version,
                dcid,
                scid,
                length,
                protected_bits,
            } => {
                buf.put_u8(LONG_HEADER_FORM | FIXED_BIT | (LongPacketType::Handshake.to_bits() << 4) | protected_bits);
                buf.put_u32(*version);
                dcid.encode(buf);
                scid.encode(buf);
                length.encode(buf);
            }
            Header::Retry {
                version,
                dcid,
                scid,
                retry_token_and_tag,
            } => {
                buf.put_u8(LONG_HEADER_FORM | FIXED_BIT | (LongPacketType::Retry.to_bits() << 4));
                buf.put_u32(*version);
                dcid.encode(buf);
                scid.encode(buf);
                buf.put_slice(retry_token_and_tag);
            }
            Header::VersionNegotiation {
                dcid,
                scid,
                supported_versions,
            } => {
                // the form/fixed bits of a VN packet are unspecified and
                // may be any value on the wire; we set the long-header form
                // bit only, matching common practice.
                buf.put_u8(LONG_HEADER_FORM);
                buf.put_u32(0);
                dcid.encode(buf);
                scid.encode(buf);
                for version in supported_versions {
                    buf.put_u32(*version);
                }
            }
            Header::Short { dcid, protected } => {
                buf.put_u8(FIXED_BIT);
                buf.put_slice(dcid.as_bytes());
                buf.put_slice(protected);
            }
        }
    }
}
