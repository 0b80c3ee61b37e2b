//! Frame codec & dispatch, §4.3.

use bytes::{Buf, BufMut, Bytes};

use crate::{
    ack::AckRanges,
    connection_id::{ConnectionId, StatelessResetToken},
    frame::types::FrameType,
    packet::PacketNumberSpace,
    result::{require, QuicError, QuicResult},
    stream::id::StreamId,
    transport_error::TransportErrorCode,
    varint::VarInt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EcnCounts {
    pub ect0: u64,
    pub ect1: u64,
    pub ecn_ce: u64,
}

/// How a frame's content is handled when the packet carrying it is declared
/// lost, §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransmissionCategory {
    /// Re-queue the byte range for a fresh STREAM/CRYPTO frame.
    IdempotentData,
    /// Re-emit the *current* value, not the lost one.
    LatestState,
    /// Re-emit the same content until acked or moot.
    OncePerEvent,
    /// Re-emit with fresh random payload.
    Volatile,
    /// Never retransmitted via loss detection.
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Padding { len: usize },
    Ping,
    Ack {
        largest_acknowledged: u64,
        ack_delay: VarInt,
        ack_ranges: AckRanges,
        ecn_counts: Option<EcnCounts>,
    },
    ResetStream {
        stream_id: StreamId,
        error_code: u64,
        final_size: u64,
    },
    StopSending {
        stream_id: StreamId,
        error_code: u64,
    },
    Crypto {
        offset: u64,
        data: Bytes,
    },
    NewToken {
        token: Bytes,
    },
    Stream {
        stream_id: StreamId,
        offset: u64,
        fin: bool,
        data: Bytes,
    },
    MaxData {
        maximum_data: u64,
    },
    MaxStreamData {
        stream_id: StreamId,
        maximum_stream_data: u64,
    },
    MaxStreamsBidi {
        maximum_streams: u64,
    },
    MaxStreamsUni {
        maximum_streams: u64,
    },
    DataBlocked {
        maximum_data: u64,
    },
    StreamDataBlocked {
        stream_id: StreamId,
        maximum_stream_data: u64,
    },
    StreamsBlockedBidi {
        maximum_streams: u64,
    },
    StreamsBlockedUni {
        maximum_streams: u64,
    },
    NewConnectionId {
        sequence_number: u64,
        retire_prior_to: u64,
        connection_id: ConnectionId,
        stateless_reset_token: StatelessResetToken,
    },
    RetireConnectionId {
        sequence_number: u64,
    },
    PathChallenge {
        data: [u8; 8],
    },
    PathResponse {
        data: [u8; 8],
    },
    ConnectionCloseTransport {
        error_code: TransportErrorCode,
        frame_type: u64,
        reason: Bytes,
    },
    ConnectionCloseApplication {
        error_code: u64,
        reason: Bytes,
    },
    HandshakeDone,
}

impl Frame {
    /// Any frame other than ACK and PADDING elicits an ack, §4.3/Glossary.
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(self, Frame::Ack { .. } | Frame::Padding { .. })
    }

    /// PATH_CHALLENGE, PATH_RESPONSE, NEW_CONNECTION_ID, PADDING, Glossary.
    pub fn is_probing(&self) -> bool {
        matches!(
            self,
            Frame::PathChallenge { .. }
                | Frame::PathResponse { .. }
                | Frame::NewConnectionId { .. }
                | Frame::Padding { .. }
        )
    }

    pub fn retransmission_category(&self) -> RetransmissionCategory {
        match self {
            Frame::Stream { .. } | Frame::Crypto { .. } => RetransmissionCategory::IdempotentData,
            Frame::MaxData { .. }
            | Frame::MaxStreamData { .. }
            | Frame::MaxStreamsBidi { .. }
            | Frame::MaxStreamsUni { .. }
            | Frame::DataBlocked { .. }
            | Frame::StreamDataBlocked { .. }
            | Frame::StreamsBlockedBidi { .. }
            | Frame::StreamsBlockedUni { .. } => RetransmissionCategory::LatestState,
            Frame::ResetStream { .. }
            | Frame::StopSending { .. }
            | Frame::NewConnectionId { .. }
            | Frame::RetireConnectionId { .. } => RetransmissionCategory::OncePerEvent,
            Frame::PathChallenge { .. } => RetransmissionCategory::Volatile,
            Frame::PathResponse { .. }
            | Frame::Ping
            | Frame::Padding { .. }
            | Frame::Ack { .. }
            | Frame::ConnectionCloseTransport { .. }
            | Frame::ConnectionCloseApplication { .. } => RetransmissionCategory::Never,
            Frame::NewToken { .. } | Frame::HandshakeDone => RetransmissionCategory::OncePerEvent,
        }
    }

    /// Whether this frame type may appear in packets of the given space,
    /// per the §4.3 table. `space` being `Application` covers both 0-RTT
    /// and 1-RTT except where noted (CRYPTO and ACK are 1-RTT only there,
    /// NEW_TOKEN and PATH_* and HANDSHAKE_DONE are 1-RTT only); callers
    /// that need to distinguish 0-RTT from 1-RTT use `allowed_in_0rtt`.
    pub fn allowed_in(&self, space: PacketNumberSpace) -> bool {
        use PacketNumberSpace::*;
        match self {
            Frame::Padding { .. } | Frame::Ping => true,
            Frame::Ack { .. } => matches!(space, Initial | Handshake | Application),
            Frame::Crypto { .. } => matches!(space, Initial | Handshake | Application),
            Frame::ConnectionCloseTransport { .. } => true,
            Frame::ConnectionCloseApplication { .. } => matches!(space, Application),
            _ => matches!(space, Application),
        }
    }

    /// Additional 0-RTT restriction: ACK, CRYPTO, NEW_TOKEN, PATH_RESPONSE,
    /// HANDSHAKE_DONE, and application-level CONNECTION_CLOSE never appear
    /// in a 0-RTT packet (§4.3 table, "0-RTT" column).
    pub fn allowed_in_0rtt(&self) -> bool {
        !matches!(
            self,
            Frame::Ack { .. }
                | Frame::Crypto { .. }
                | Frame::NewToken { .. }
                | Frame::PathResponse { .. }
                | Frame::HandshakeDone
                | Frame::ConnectionCloseApplication { .. }
        )
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Frame::Padding { len } => {
                for _ in 0..*len {
                    buf.put_u8(0);
                }
            }
            Frame::Ping => VarInt::new_u32(FrameType::PING as u32).encode(buf),
            Frame::Ack {
                largest_acknowledged,
                ack_delay,
                ack_ranges,
                ecn_counts,
            } => {
                let type_code = if ecn_counts.is_some() {
                    FrameType::ACK_ECN
                } else {
                    FrameType::ACK
                };
                VarInt::new_u32(type_code as u32).encode(buf);
                VarInt::new_u64(*largest_acknowledged).unwrap().encode(buf);
                ack_delay.encode(buf);
                let (first_ack_range, gaps) = ack_ranges.to_wire_ranges();
                VarInt::new_u64(gaps.len() as u64).unwrap().encode(buf);
                VarInt::new_u64(first_ack_range).unwrap().encode(buf);
                for (gap, len) in gaps {
                    VarInt::new_u64(gap).unwrap().encode(buf);
                    VarInt::new_u64(len).unwrap().encode(buf);
                }
                if let Some(ecn) = ecn_counts {
                    VarInt::new_u64(ecn.ect0).unwrap().encode(buf);
                    VarInt::new_u64(ecn.ect1).unwrap().encode(buf);
                    VarInt::new_u64(ecn.ecn_ce).unwrap().encode(buf);
                }
            }
            Frame::ResetStream {
                stream_id,
                error_code,
                final_size,
            } => {
                VarInt::new_u32(FrameType::RESET_STREAM as u32).encode(buf);
                stream_id.to_varint().encode(buf);
                VarInt::new_u64(*error_code).unwrap().encode(buf);
                VarInt::new_u64(*final_size).unwrap().encode(buf);
            }
            Frame::StopSending {
                stream_id,
                error_code,
            } => {
                VarInt::new_u32(FrameType::STOP_SENDING as u32).encode(buf);
                stream_id.to_varint().encode(buf);
                VarInt::new_u64(*error_code).unwrap().encode(buf);
            }
            Frame::Crypto { offset, data } => {
                VarInt::new_u32(FrameType::CRYPTO as u32).encode(buf);
                VarInt::new_u64(*offset).unwrap().encode(buf);
                VarInt::new_u64(data.len() as u64).unwrap().encode(buf);
                buf.put_slice(data);
            }
            Frame::NewToken { token } => {
                VarInt::new_u32(FrameType::NEW_TOKEN as u32).encode(buf);
                VarInt::new_u64(token.len() as u64).unwrap().encode(buf);
                buf.put_slice(token);
            }
            Frame::Stream {
                stream_id,
                offset,
                fin,
                data,
            } => {
                let off_flag = if *offset != 0 { 0b100 } else { 0 };
                let len_flag = 0b010; // we always send an explicit length
                let fin_flag = if *fin { 0b001 } else { 0 };
                let type_byte = FrameType::STREAM | off_flag | len_flag | fin_flag;
                VarInt::new_u32(type_byte as u32).encode(buf);
                if *offset != 0 {
                    VarInt::new_u64(*offset).unwrap().encode(buf);
                }
                VarInt::new_u64(data.len() as u64).unwrap().encode(buf);
                buf.put_slice(data);
            }
            Frame::MaxData { maximum_data } => {
                VarInt::new_u32(FrameType::MAX_DATA as u32).encode(buf);
                VarInt::new_u64(*maximum_data).unwrap().encode(buf);
            }
            Frame::MaxStreamData {
                stream_id,
                maximum_stream_data,
            } => {
                VarInt::new_u32(FrameType::MAX_STREAM_DATA as u32).encode(buf);
                stream_id.to_varint().encode(buf);
                VarInt::new_u64(*maximum_stream_data).unwrap().encode(buf);
            }
            Frame::MaxStreamsBidi { maximum_streams } => {
                VarInt::new_u32(FrameType::MAX_STREAMS_BIDI as u32).encode(buf);
                VarInt::new_u64(*maximum_streams).unwrap().encode(buf);
            }
            Frame::MaxStreamsUni { maximum_streams } => {
                VarInt::new_u32(FrameType::MAX_STREAMS_UNI as u32).encode(buf);
                VarInt::new_u64(*maximum_streams).unwrap().encode(buf);
            }
            Frame::DataBlocked { maximum_data } => {
                VarInt::new_u32(FrameType::DATA_BLOCKED as u32).encode(buf);
                VarInt::new_u64(*maximum_data).unwrap().encode(buf);
            }
            Frame::StreamDataBlocked {
                stream_id,
                maximum_stream_data,
            } => {
                VarInt::new_u32(FrameType::STREAM_DATA_BLOCKED as u32).encode(buf);
                stream_id.to_varint().encode(buf);
                VarInt::new_u64(*maximum_stream_data).unwrap().encode(buf);
            }
            Frame::StreamsBlockedBidi { maximum_streams } => {
                VarInt::new_u32(FrameType::STREAMS_BLOCKED_BIDI as u32).encode(buf);
                VarInt::new_u64(*maximum_streams).unwrap().encode(buf);
            }
            Frame::StreamsBlockedUni { maximum_streams } => {
                VarInt::new_u32(FrameType::STREAMS_BLOCKED_UNI as u32).encode(buf);
                VarInt::new_u64(*maximum_streams).unwrap().encode(buf);
            }
            Frame::NewConnectionId {
                sequence_number,
                retire_prior_to,
                connection_id,
                stateless_reset_token,
            } => {
                VarInt::new_u32(FrameType::NEW_CONNECTION_ID as u32).encode(buf);
                VarInt::new_u64(*sequence_number).unwrap().encode(buf);
                VarInt::new_u64(*retire_prior_to).unwrap().encode(buf);
                buf.put_u8(connection_id.len() as u8);
                buf.put_slice(connection_id.as_bytes());
                stateless_reset_token.encode(buf);
            }
            Frame::RetireConnectionId { sequence_number } => {
                VarInt::new_u32(FrameType::RETIRE_CONNECTION_ID as u32).encode(buf);
                VarInt::new_u64(*sequence_number).unwrap().encode(buf);
            }
            Frame::PathChallenge { data } => {
                VarInt::new_u32(FrameType::PATH_CHALLENGE as u32).encode(buf);
                buf.put_slice(data);
            }
            Frame::PathResponse { data } => {
                VarInt::new_u32(FrameType::PATH_RESPONSE as u32).encode(buf);
                buf.put_slice(data);
            }
            Frame::ConnectionCloseTransport {
                error_code,
                frame_type,
                reason,
            } => {
                VarInt::new_u32(FrameType::CONNECTION_CLOSE_TRANSPORT as u32).encode(buf);
                error_code.to_varint().encode(buf);
                VarInt::new_u64(*frame_type).unwrap().encode(buf);
                VarInt::new_u64(reason.len() as u64).unwrap().encode(buf);
                buf.put_slice(reason);
            }
            Frame::ConnectionCloseApplication { error_code, reason } => {
                VarInt::new_u32(FrameType::CONNECTION_CLOSE_APPLICATION as u32).encode(buf);
                VarInt::new_u64(*error_code).unwrap().encode(buf);
                VarInt::new_u64(reason.len() as u64).unwrap().encode(buf);
                buf.put_slice(reason);
            }
            Frame::HandshakeDone => {
                VarInt::new_u32(FrameType::HANDSHAKE_DONE as u32).encode(buf);
            }
        }
    }

    pub fn decode<B: Buf>(buf: &mut B) -> QuicResult<Frame> {
        require(buf.has_remaining(), "frame: no bytes remaining")?;
        // PADDING is a run of literal zero bytes, not a varint-prefixed
        // frame; count the run here before falling through to the general
        // varint-typed path.
        if buf.chunk()[0] == FrameType::PADDING as u8 {
            let mut len = 0usize;
            while buf.has_remaining() && buf.chunk()[0] == FrameType::PADDING as u8 {
                buf.advance(1);
                len += 1;
            }
            return Ok(Frame::Padding { len });
        }

        let raw_type = VarInt::decode(buf)?.into_inner();

        if (FrameType::STREAM..=FrameType::STREAM + 0x07).contains(&raw_type) {
            let off_flag = raw_type & 0b100 != 0;
            let len_flag = raw_type & 0b010 != 0;
            let fin_flag = raw_type & 0b001 != 0;
            let stream_id = StreamId::from_varint(VarInt::decode(buf)?);
            let offset = if off_flag { VarInt::decode(buf)?.into_inner() } else { 0 };
            let data = if len_flag {
                let len = VarInt::decode(buf)?.as_usize()?;
                require(buf.remaining() >= len, "stream: truncated data")?;
                buf.copy_to_bytes(len)
            } else {
                buf.copy_to_bytes(buf.remaining())
            };
            require(
                offset.checked_add(data.len() as u64).map_or(false, |end| end <= (1 << 62) - 1),
                "stream: offset + length exceeds 2^62-1",
            )?;
            return Ok(Frame::Stream {
                stream_id,
                offset,
                fin: fin_flag,
                data,
            });
        }

        match raw_type {
            FrameType::PING => Ok(Frame::Ping),
            FrameType::ACK | FrameType::ACK_ECN => {
                let largest_acknowledged = VarInt::decode(buf)?.into_inner();
                let ack_delay = VarInt::decode(buf)?;
                let range_count = VarInt::decode(buf)?.into_inner();
                let first_ack_range = VarInt::decode(buf)?.into_inner();
                let mut gaps = Vec::new();
                for _ in 0..range_count {
                    let gap = VarInt::decode(buf)?.into_inner();
                    let len = VarInt::decode(buf)?.into_inner();
                    gaps.push((gap, len));
                }
                let ack_ranges =
                    AckRanges::from_wire_ranges(largest_acknowledged, first_ack_range, &gaps)
                        .ok_or_else(|| {
                            QuicError::transport_on_frame(
                                TransportErrorCode::FrameEncodingError,
                                raw_type,
                                "ack: computed packet number underflowed",
                            )
                        })?;
                let ecn_counts = if raw_type == FrameType::ACK_ECN {
                    Some(EcnCounts {
                        ect0: VarInt::decode(buf)?.into_inner(),
                        ect1: VarInt::decode(buf)?.into_inner(),
                        ecn_ce: VarInt::decode(buf)?.into_inner(),
                    })
                } else {
                    None
                };
                Ok(Frame::Ack {
                    largest_acknowledged,
                    ack_delay,
                    ack_ranges,
                    ecn_counts,
                })
            }
            FrameType::RESET_STREAM => Ok(Frame::ResetStream {
                stream_id: StreamId::from_varint(VarInt::decode(buf)?),
                error_code: VarInt::decode(buf)?.into_inner(),
                final_size: VarInt::decode(buf)?.into_inner(),
            }),
            FrameType::STOP_SENDING => Ok(Frame::StopSending {
                stream_id: StreamId::from_varint(VarInt::decode(buf)?),
                error_code: VarInt::decode(buf)?.into_inner(),
            }),
            FrameType::CRYPTO => {
                let offset = VarInt::decode(buf)?.into_inner();
                let len = VarInt::decode(buf)?.as_usize()?;
                require(buf.remaining() >= len, "crypto: truncated data")?;
                Ok(Frame::Crypto {
                    offset,
                    data: buf.copy_to_bytes(len),
                })
            }
            FrameType::NEW_TOKEN => {
                let len = VarInt::decode(buf)?.as_usize()?;
                require(len > 0, "new_token: token must not be empty")?;
                require(buf.remaining() >= len, "new_token: truncated")?;
                Ok(Frame::NewToken {
                    token: buf.copy_to_bytes(len),
                })
            }
            FrameType::MAX_DATA => Ok(Frame::MaxData {
                maximum_data: VarInt::decode(buf)?.into_inner(),
            }),
            FrameType::MAX_STREAM_DATA => Ok(Frame::MaxStreamData {
                stream_id: StreamId::from_varint(VarInt::decode(buf)?),
                maximum_stream_data: VarInt::decode(buf)?.into_inner(),
            }),
            FrameType::MAX_STREAMS_BIDI => Ok(Frame::MaxStreamsBidi {
                maximum_streams: Self::decode_stream_limit(buf)?,
            }),
            FrameType::MAX_STREAMS_UNI => Ok(Frame::MaxStreamsUni {
                maximum_streams: Self::decode_stream_limit(buf)?,
            }),
            FrameType::DATA_BLOCKED => Ok(Frame::DataBlocked {
                maximum_data: VarInt::decode(buf)?.into_inner(),
            }),
            FrameType::STREAM_DATA_BLOCKED => Ok(Frame::StreamDataBlocked {
                stream_id: StreamId::from_varint(VarInt::decode(buf)?),
                maximum_stream_data: VarInt::decode(buf)?.into_inner(),
            }),
            FrameType::STREAMS_BLOCKED_BIDI => Ok(Frame::StreamsBlockedBidi {
                maximum_streams: VarInt::decode(buf)?.into_inner(),
            }),
            FrameType::STREAMS_BLOCKED_UNI => Ok(Frame::StreamsBlockedUni {
                maximum_streams: VarInt::decode(buf)?.into_inner(),
            }),
            FrameType::NEW_CONNECTION_ID => {
                let sequence_number = VarInt::decode(buf)?.into_inner();
                let retire_prior_to = VarInt::decode(buf)?.into_inner();
                require(
                    retire_prior_to <= sequence_number,
                    "new_connection_id: retire_prior_to exceeds sequence_number",
                )?;
                require(buf.has_remaining(), "new_connection_id: truncated")?;
                let cid_len = buf.get_u8() as usize;
                require(
                    (1..=20).contains(&cid_len),
                    "new_connection_id: connection id length must be 1-20",
                )?;
                require(buf.remaining() >= cid_len, "new_connection_id: truncated cid")?;
                let mut cid_bytes = vec![0u8; cid_len];
                buf.copy_to_slice(&mut cid_bytes);
                let connection_id = ConnectionId::from_wire(cid_bytes)?;
                let stateless_reset_token = StatelessResetToken::decode(buf)?;
                Ok(Frame::NewConnectionId {
                    sequence_number,
                    retire_prior_to,
                    connection_id,
                    stateless_reset_token,
                })
            }
            FrameType::RETIRE_CONNECTION_ID => Ok(Frame::RetireConnectionId {
                sequence_number: VarInt::decode(buf)?.into_inner(),
            }),
            FrameType::PATH_CHALLENGE => Ok(Frame::PathChallenge {
                data: Self::decode_challenge_data(buf)?,
            }),
            FrameType::PATH_RESPONSE => Ok(Frame::PathResponse {
                data: Self::decode_challenge_data(buf)?,
            }),
            FrameType::CONNECTION_CLOSE_TRANSPORT => {
                let error_code = TransportErrorCode::from_code(VarInt::decode(buf)?.into_inner());
                let frame_type = VarInt::decode(buf)?.into_inner();
                let len = VarInt::decode(buf)?.as_usize()?;
                require(buf.remaining() >= len, "connection_close: truncated reason")?;
                Ok(Frame::ConnectionCloseTransport {
                    error_code,
                    frame_type,
                    reason: buf.copy_to_bytes(len),
                })
            }
            FrameType::CONNECTION_CLOSE_APPLICATION => {
                let error_code = VarInt::decode(buf)?.into_inner();
                let len = VarInt::decode(buf)?.as_usize()?;
                require(buf.remaining() >= len, "connection_close: truncated reason")?;
                Ok(Frame::ConnectionCloseApplication {
                    error_code,
                    reason: buf.copy_to_bytes(len),
                })
            }
            FrameType::HANDSHAKE_DONE => Ok(Frame::HandshakeDone),
            _ => Err(QuicError::transport_on_frame(
                TransportErrorCode::FrameEncodingError,
                raw_type,
                "unknown frame type",
            )),
        }
    }

    fn decode_stream_limit<B: Buf>(buf: &mut B) -> QuicResult<u64> {
        let value = VarInt::decode(buf)?.into_inner();
        require(value <= (1 << 60), "max_streams exceeds 2^60")?;
        Ok(value)
    }

    fn decode_challenge_data<B: Buf>(buf: &mut B) -> QuicResult<[u8; 8]> {
        require(buf.remaining() >= 8, "path challenge/response: truncated")?;
        let mut data = [0u8; 8];
        buf.copy_to_slice(&mut data);
        Ok(data)
    }
}
