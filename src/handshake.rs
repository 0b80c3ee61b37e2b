//! Crypto-handshake collaborator interface, §6, plus the bookkeeping this
//! crate owns around it: per-level CRYPTO stream reassembly, Retry/ODCID
//! matching, and remembered transport parameters for 0-RTT.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::{
    connection_id::ConnectionId,
    packet::PacketNumberSpace,
    result::{require, QuicError, QuicResult},
    transport_error::TransportErrorCode,
    transport_parameters::TransportParameters,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionLevel {
    Initial,
    Handshake,
    ZeroRtt,
    OneRtt,
}

impl EncryptionLevel {
    pub fn packet_number_space(self) -> PacketNumberSpace {
        match self {
            EncryptionLevel::Initial => PacketNumberSpace::Initial,
            EncryptionLevel::Handshake => PacketNumberSpace::Handshake,
            EncryptionLevel::ZeroRtt | EncryptionLevel::OneRtt => PacketNumberSpace::Application,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Initial,
    HandshakeInProgress,
    Confirmed,
}

#[derive(Debug, Clone)]
pub enum CryptoEvent {
    EmitCrypto { level: EncryptionLevel, data: Bytes },
    HandshakeStateChanged(HandshakeState),
    TransportParamsReady(TransportParameters),
}

/// Narrow interface to the TLS 1.3 handshake engine, §6. A real
/// implementation wraps rustls/s2n-tls; the PN-space engine only needs to
/// feed it received CRYPTO bytes and drain events.
pub trait CryptoEngine {
    fn open_level(
        &mut self,
        level: EncryptionLevel,
        rx_key: Vec<u8>,
        tx_key: Vec<u8>,
        hp_rx: Vec<u8>,
        hp_tx: Vec<u8>,
    ) -> QuicResult<()>;

    fn feed_crypto(&mut self, level: EncryptionLevel, data: &[u8]) -> QuicResult<()>;

    fn poll_event(&mut self) -> Option<CryptoEvent>;
}

/// Reassembles CRYPTO frames for one encryption level. Unlike a stream,
/// there is no flow control and no FIN; the only backstop against an
/// unbounded peer is `max_buffered`, §7 (CRYPTO_BUFFER_EXCEEDED).
pub struct CryptoStreamAssembler {
    read_offset: u64,
    chunks: BTreeMap<u64, Bytes>,
    buffered_bytes: u64,
    max_buffered: u64,
}

impl CryptoStreamAssembler {
    pub fn new(max_buffered: u64) -> Self {
        Self {
            read_offset: 0,
            chunks: BTreeMap::new(),
            buffered_bytes: 0,
            max_buffered,
        }
    }

    pub fn on_crypto_frame(&mut self, offset: u64, data: &Bytes) -> QuicResult<()> {
        let end = offset + data.len() as u64;
        if end <= self.read_offset {
            return Ok(()); // fully-duplicate retransmit
        }
        let start = offset.max(self.read_offset);
        let trim = (start - offset) as usize;
        let slice = data.slice(trim..);
        if !self.chunks.contains_key(&start) {
            self.buffered_bytes += slice.len() as u64;
            require(
                self.buffered_bytes <= self.max_buffered,
                "crypto stream buffered more than the configured maximum",
            )
            .map_err(|_| {
                QuicError::transport(
                    TransportErrorCode::CryptoBufferExceeded,
                    "crypto stream exceeded its buffering budget",
                )
            })?;
            self.chunks.insert(start, slice);
        }
        Ok(())
    }

    /// Drain all currently-contiguous bytes starting at `read_offset`.
    pub fn drain_contiguous(&mut self) -> Bytes {
        let mut out = Vec::new();
        while let Some(data) = self.chunks.remove(&self.read_offset) {
            self.buffered_bytes -= data.len() as u64;
            self.read_offset += data.len() as u64;
            out.extend_from_slice(&data);
        }
        Bytes::from(out)
    }
}

/// Tracks the original destination connection ID a client chose for its
/// first Initial, so a later Retry round can be matched against the
/// server's echoed `original_connection_id` transport parameter, §5.2/§6.
pub struct RetryValidator {
    original_destination_connection_id: ConnectionId,
    retry_seen: bool,
}

impl RetryValidator {
    pub fn new(original_destination_connection_id: ConnectionId) -> Self {
        Self {
            original_destination_connection_id,
            retry_seen: false,
        }
    }

    pub fn on_retry_received(&mut self) {
        self.retry_seen = true;
    }

    /// Check the server's transport parameters against the ODCID once the
    /// handshake's transport parameters are ready.
    pub fn check_original_connection_id(
        &self,
        server_params: &TransportParameters,
    ) -> QuicResult<()> {
        if !self.retry_seen {
            return Ok(());
        }
        match &server_params.original_connection_id {
            Some(echoed) if *echoed == self.original_destination_connection_id => Ok(()),
            _ => Err(QuicError::transport(
                TransportErrorCode::TransportParameterError,
                "server did not echo the original destination connection id after Retry",
            )),
        }
    }
}

/// Transport parameters remembered from a previous session, for 0-RTT.
/// Per §4.9, everything except `original_connection_id`, `preferred_address`,
/// `stateless_reset_token`, `ack_delay_exponent`, and
/// `active_connection_id_limit` may be reused by the client while 0-RTT is
/// in flight.
#[derive(Debug, Clone)]
pub struct RememberedParameters {
    pub initial_max_data: u64,
    pub initial_max_stream_data_bidi_local: u64,
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_stream_data_uni: u64,
    pub initial_max_streams_bidi: u64,
    pub initial_max_streams_uni: u64,
}

impl RememberedParameters {
    pub fn from_session(params: &TransportParameters) -> Self {
        Self {
            initial_max_data: params.initial_max_data,
            initial_max_stream_data_bidi_local: params.initial_max_stream_data_bidi_local,
            initial_max_stream_data_bidi_remote: params.initial_max_stream_data_bidi_remote,
            initial_max_stream_data_uni: params.initial_max_stream_data_uni,
            initial_max_streams_bidi: params.initial_max_streams_bidi,
            initial_max_streams_uni: params.initial_max_streams_uni,
        }
    }

    /// The server's new parameters must not shrink any remembered limit
    /// below what 0-RTT data already consumed; `used` reflects actual 0-RTT
    /// usage accounted while the new parameters were still unknown.
    pub fn check_not_shrunk(
        &self,
        new_params: &TransportParameters,
        used_connection_bytes: u64,
        used_streams_bidi: u64,
        used_streams_uni: u64,
    ) -> QuicResult<()> {
        let violation = new_params.initial_max_data < used_connection_bytes
            || new_params.initial_max_streams_bidi < used_streams_bidi
            || new_params.initial_max_streams_uni < used_streams_uni;
        if violation {
            return Err(QuicError::transport(
                TransportErrorCode::ProtocolViolation,
                "server's transport parameters shrank a limit already used by 0-RTT data",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_assembler_delivers_in_order_and_buffers_gaps() {
        let mut asm = CryptoStreamAssembler::new(1024);
        asm.on_crypto_frame(4, &Bytes::from_static(b"world")).unwrap();
        assert_eq!(asm.drain_contiguous(), Bytes::new());
        asm.on_crypto_frame(0, &Bytes::from_static(b"1234")).unwrap();
        assert_eq!(asm.drain_contiguous(), Bytes::from_static(b"1234world"));
    }

    #[test]
    fn crypto_assembler_enforces_buffer_budget() {
        let mut asm = CryptoStreamAssembler::new(4);
        asm.on_crypto_frame(100, &Bytes::from_static(b"12345")).unwrap_err();
    }

    #[test]
    fn retry_validator_requires_matching_odcid_only_after_retry() {
        let odcid = ConnectionId::new(vec![1, 2, 3, 4]).unwrap();
        let validator = RetryValidator::new(odcid.clone());
        let params = TransportParameters::default();
        validator.check_original_connection_id(&params).unwrap();

        let mut validator = validator;
        validator.on_retry_received();
        assert!(validator.check_original_connection_id(&params).is_err());

        let params_with_match = TransportParameters {
            original_connection_id: Some(odcid),
            ..Default::default()
        };
        validator
            .check_original_connection_id(&params_with_match)
            .unwrap();
    }

    #[test]
    fn remembered_parameters_reject_shrinking_used_limits() {
        let prior = TransportParameters {
            initial_max_data: 1000,
            initial_max_streams_bidi: 5,
            ..Default::default()
        };
        let remembered = RememberedParameters::from_session(&prior);
        let shrunk = TransportParameters {
            initial_max_data: 100,
            initial_max_streams_bidi: 5,
            ..Default::default()
        };
        assert!(remembered
            .check_not_shrunk(&shrunk, 500, 2, 0)
            .is_err());
        assert!(remembered.check_not_shrunk(&shrunk, 50, 2, 0).is_ok());
    }
}
