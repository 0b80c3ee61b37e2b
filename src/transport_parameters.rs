//! Transport parameters, §6: a TLV list of (16-bit id, 16-bit length, bytes)
//! exchanged in the crypto handshake extension. Unlike the values carried in
//! frames, TLV ids and lengths are fixed 16-bit fields, not varints.

use bytes::{Buf, BufMut, Bytes};

use crate::{
    connection_id::{ConnectionId, StatelessResetToken},
    result::{require, QuicError, QuicResult},
    stream::id::Side,
    transport_error::TransportErrorCode,
    varint::VarInt,
};

const ID_ORIGINAL_CONNECTION_ID: u16 = 0x00;
const ID_IDLE_TIMEOUT: u16 = 0x01;
const ID_STATELESS_RESET_TOKEN: u16 = 0x02;
const ID_MAX_PACKET_SIZE: u16 = 0x03;
const ID_INITIAL_MAX_DATA: u16 = 0x04;
const ID_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL: u16 = 0x05;
const ID_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE: u16 = 0x06;
const ID_INITIAL_MAX_STREAM_DATA_UNI: u16 = 0x07;
const ID_INITIAL_MAX_STREAMS_BIDI: u16 = 0x08;
const ID_INITIAL_MAX_STREAMS_UNI: u16 = 0x09;
const ID_ACK_DELAY_EXPONENT: u16 = 0x0a;
const ID_MAX_ACK_DELAY: u16 = 0x0b;
const ID_DISABLE_MIGRATION: u16 = 0x0c;
const ID_PREFERRED_ADDRESS: u16 = 0x0d;
const ID_ACTIVE_CONNECTION_ID_LIMIT: u16 = 0x0e;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParameters {
    pub original_connection_id: Option<ConnectionId>,
    pub idle_timeout_ms: u64,
    pub stateless_reset_token: Option<StatelessResetToken>,
    pub max_packet_size: u64,
    pub initial_max_data: u64,
    pub initial_max_stream_data_bidi_local: u64,
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_stream_data_uni: u64,
    pub initial_max_streams_bidi: u64,
    pub initial_max_streams_uni: u64,
    pub ack_delay_exponent: u8,
    pub max_ack_delay_ms: u64,
    pub disable_migration: bool,
    /// Opaque: the spec leaves the struct layout unspecified beyond "server
    /// only"; carried through uninterpreted.
    pub preferred_address: Option<Bytes>,
    pub active_connection_id_limit: u64,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            original_connection_id: None,
            idle_timeout_ms: 0,
            stateless_reset_token: None,
            max_packet_size: 65527,
            initial_max_data: 0,
            initial_max_stream_data_bidi_local: 0,
            initial_max_stream_data_bidi_remote: 0,
            initial_max_stream_data_uni: 0,
            initial_max_streams_bidi: 0,
            initial_max_streams_uni: 0,
            ack_delay_exponent: 3,
            max_ack_delay_ms: 25,
            disable_migration: false,
            preferred_address: None,
            active_connection_id_limit: 0,
        }
    }
}

impl TransportParameters {
    pub fn with_initial_max_data(mut self, value: u64) -> Self {
        self.initial_max_data = value;
        self
    }

    pub fn with_initial_max_streams_bidi(mut self, value: u64) -> Self {
        self.initial_max_streams_bidi = value;
        self
    }

    pub fn with_initial_max_streams_uni(mut self, value: u64) -> Self {
        self.initial_max_streams_uni = value;
        self
    }

    pub fn with_active_connection_id_limit(mut self, value: u64) -> Self {
        self.active_connection_id_limit = value;
        self
    }

    fn validate(&self, sender: Side) -> QuicResult<()> {
        let err = |msg: &str| {
            Err(QuicError::transport(
                TransportErrorCode::TransportParameterError,
                msg.to_string(),
            ))
        };
        if sender == Side::Client
            && (self.original_connection_id.is_some()
                || self.stateless_reset_token.is_some()
                || self.preferred_address.is_some())
        {
            return err("client sent a server-only transport parameter");
        }
        if self.ack_delay_exponent > 20 {
            return err("ack_delay_exponent exceeds 20");
        }
        if self.max_ack_delay_ms >= (1 << 14) {
            return err("max_ack_delay is >= 2^14");
        }
        if self.max_packet_size < 1200 {
            return err("max_packet_size is below the 1200-byte floor");
        }
        Ok(())
    }

    fn put_tlv<B: BufMut>(buf: &mut B, id: u16, value: &[u8]) {
        buf.put_u16(id);
        buf.put_u16(value.len() as u16);
        buf.put_slice(value);
    }

    fn put_varint_tlv<B: BufMut>(buf: &mut B, id: u16, value: u64) {
        let varint = VarInt::new_u64(value).unwrap_or(VarInt::MAX);
        let mut tmp = bytes::BytesMut::new();
        varint.encode(&mut tmp);
        Self::put_tlv(buf, id, &tmp);
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> QuicResult<()> {
        if let Some(cid) = &self.original_connection_id {
            Self::put_tlv(buf, ID_ORIGINAL_CONNECTION_ID, cid.as_bytes());
        }
        if self.idle_timeout_ms != 0 {
            Self::put_varint_tlv(buf, ID_IDLE_TIMEOUT, self.idle_timeout_ms);
        }
        if let Some(token) = &self.stateless_reset_token {
            Self::put_tlv(buf, ID_STATELESS_RESET_TOKEN, token.as_bytes());
        }
        Self::put_varint_tlv(buf, ID_MAX_PACKET_SIZE, self.max_packet_size);
        Self::put_varint_tlv(buf, ID_INITIAL_MAX_DATA, self.initial_max_data);
        Self::put_varint_tlv(
            buf,
            ID_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
            self.initial_max_stream_data_bidi_local,
        );
        Self::put_varint_tlv(
            buf,
            ID_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
            self.initial_max_stream_data_bidi_remote,
        );
        Self::put_varint_tlv(
            buf,
            ID_INITIAL_MAX_STREAM_DATA_UNI,
            self.initial_max_stream_data_uni,
        );
        Self::put_varint_tlv(buf, ID_INITIAL_MAX_STREAMS_BIDI, self.initial_max_streams_bidi);
        Self::put_varint_tlv(buf, ID_INITIAL_MAX_STREAMS_UNI, self.initial_max_streams_uni);
        Self::put_varint_tlv(buf, ID_ACK_DELAY_EXPONENT, self.ack_delay_exponent as u64);
        Self::put_varint_tlv(buf, ID_MAX_ACK_DELAY, self.max_ack_delay_ms);
        if self.disable_migration {
            Self::put_tlv(buf, ID_DISABLE_MIGRATION, &[]);
        }
        if let Some(preferred) = &self.preferred_address {
            Self::put_tlv(buf, ID_PREFERRED_ADDRESS, preferred);
        }
        Self::put_varint_tlv(
            buf,
            ID_ACTIVE_CONNECTION_ID_LIMIT,
            self.active_connection_id_limit,
        );
        Ok(())
    }

    /// Decode the parameter set sent *by* `sender`; validated against the
    /// server-only restriction and the numeric bounds in §6.
    pub fn decode<B: Buf>(buf: &mut B, sender: Side) -> QuicResult<Self> {
        let mut params = Self {
            // defaults that must be explicitly absent rather than zero
            max_packet_size: 65527,
            ack_delay_exponent: 3,
            max_ack_delay_ms: 25,
            ..Self::default()
        };
        let mut seen_ids = std::collections::HashSet::new();

        while buf.has_remaining() {
            require(buf.remaining() >= 4, "transport parameter: truncated TLV header")?;
            let id = buf.get_u16();
            let len = buf.get_u16() as usize;
            require(buf.remaining() >= len, "transport parameter: truncated value")?;
            let value = buf.copy_to_bytes(len);

            if !seen_ids.insert(id) {
                return Err(QuicError::transport(
                    TransportErrorCode::TransportParameterError,
                    "duplicate transport parameter id",
                ));
            }

            match id {
                ID_ORIGINAL_CONNECTION_ID => {
                    params.original_connection_id = Some(ConnectionId::from_wire(value.to_vec())?)
                }
                ID_IDLE_TIMEOUT => params.idle_timeout_ms = decode_varint_value(&value)?,
                ID_STATELESS_RESET_TOKEN => {
                    require(value.len() == 16, "stateless_reset_token must be 16 bytes")?;
                    let mut bytes = [0u8; 16];
                    bytes.copy_from_slice(&value);
                    params.stateless_reset_token = Some(StatelessResetToken::from_bytes(bytes));
                }
                ID_MAX_PACKET_SIZE => params.max_packet_size = decode_varint_value(&value)?,
                ID_INITIAL_MAX_DATA => params.initial_max_data = decode_varint_value(&value)?,
                ID_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => {
                    params.initial_max_stream_data_bidi_local = decode_varint_value(&value)?
                }
                ID_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                    params.initial_max_stream_data_bidi_remote = decode_varint_value(&value)?
                }
                ID_INITIAL_MAX_STREAM_DATA_UNI => {
                    params.initial_max_stream_data_uni = decode_varint_value(&value)?
                }
                ID_INITIAL_MAX_STREAMS_BIDI => {
                    params.initial_max_streams_bidi = decode_varint_value(&value)?
                }
                ID_INITIAL_MAX_STREAMS_UNI => {
                    params.initial_max_streams_uni = decode_varint_value(&value)?
                }
                ID_ACK_DELAY_EXPONENT => {
                    params.ack_delay_exponent = decode_varint_value(&value)? as u8
                }
                ID_MAX_ACK_DELAY => params.max_ack_delay_ms = decode_varint_value(&value)?,
                ID_DISABLE_MIGRATION => params.disable_migration = true,
                ID_PREFERRED_ADDRESS => params.preferred_address = Some(value),
                ID_ACTIVE_CONNECTION_ID_LIMIT => {
                    params.active_connection_id_limit = decode_varint_value(&value)?
                }
                _ => {} // unknown ids are ignored, §6
            }
        }

        params.validate(sender)?;
        Ok(params)
    }
}

fn decode_varint_value(bytes: &Bytes) -> QuicResult<u64> {
    let mut cursor = &bytes[..];
    let value = VarInt::decode(&mut cursor)?.into_inner();
    require(cursor.is_empty(), "transport parameter: trailing bytes after varint")?;
    Ok(value)
}
