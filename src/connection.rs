//! The root `Connection` entity: owns every subsystem and exposes the
//! suspension-point API described in §4.9/§9 — datagram-in (post-decrypt,
//! since AEAD/header-protection are a collaborator's job, §1), application
//! calls, and timer fires. Output is a sequence of per-space frame payloads
//! for the crypto/socket collaborator to protect and ship as datagrams.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use rand::RngCore;
use tracing::{debug, info, warn};

use crate::{
    cid_manager::CidManager,
    config::EndpointConfig,
    connection_id::ConnectionId,
    flow_control::FlowControl,
    frame::Frame,
    handshake::{CryptoStreamAssembler, EncryptionLevel, RetryValidator},
    lifecycle::{CloseReason, Lifecycle, LifecycleState},
    path::{PathId, PathManager},
    pn_space::PacketNumberSpaceEngine,
    recovery::RecoveryController,
    result::{require, QuicError, QuicResult},
    stream::{Directionality, Side, StreamId, StreamManager},
    transport_error::TransportErrorCode,
    transport_parameters::TransportParameters,
};

/// Length of the connection IDs this endpoint hands out via NEW_CONNECTION_ID.
const DEFAULT_LOCAL_CID_LEN: usize = 8;

struct Spaces {
    initial: Option<PacketNumberSpaceEngine>,
    handshake: Option<PacketNumberSpaceEngine>,
    application: PacketNumberSpaceEngine,
}

impl Spaces {
    fn new() -> Self {
        use crate::packet::PacketNumberSpace;
        Self {
            initial: Some(PacketNumberSpaceEngine::new(PacketNumberSpace::Initial)),
            handshake: Some(PacketNumberSpaceEngine::new(PacketNumberSpace::Handshake)),
            application: PacketNumberSpaceEngine::new(PacketNumberSpace::Application),
        }
    }

    fn get_mut(&mut self, space: crate::packet::PacketNumberSpace) -> Option<&mut PacketNumberSpaceEngine> {
        use crate::packet::PacketNumberSpace::*;
        match space {
            Initial => self.initial.as_mut(),
            Handshake => self.handshake.as_mut(),
            Application => Some(&mut self.application),
        }
    }

    /// Initial and Handshake spaces are destroyed once the next level's keys
    /// are available, §4.9.
    fn discard_initial(&mut self) {
        self.initial = None;
    }

    fn discard_handshake(&mut self) {
        self.handshake = None;
    }
}

/// A frame pending transmission in a given space, queued by application
/// calls or internal policy (ack/flow-control/cid/path bookkeeping) until
/// the next `poll_transmit`.
struct PendingFrames {
    initial: Vec<Frame>,
    handshake: Vec<Frame>,
    application: Vec<Frame>,
}

impl PendingFrames {
    fn new() -> Self {
        Self {
            initial: Vec::new(),
            handshake: Vec::new(),
            application: Vec::new(),
        }
    }

    fn queue(&mut self, space: crate::packet::PacketNumberSpace, frame: Frame) {
        use crate::packet::PacketNumberSpace::*;
        match space {
            Initial => self.initial.push(frame),
            Handshake => self.handshake.push(frame),
            Application => self.application.push(frame),
        }
    }

    fn drain(&mut self, space: crate::packet::PacketNumberSpace) -> Vec<Frame> {
        use crate::packet::PacketNumberSpace::*;
        match space {
            Initial => std::mem::take(&mut self.initial),
            Handshake => std::mem::take(&mut self.handshake),
            Application => std::mem::take(&mut self.application),
        }
    }
}

pub struct Connection {
    role: Side,
    config: Arc<EndpointConfig>,
    spaces: Spaces,
    pending: PendingFrames,
    streams: StreamManager,
    connection_flow: FlowControl,
    stream_flow: HashMap<StreamId, FlowControl>,
    cid_manager: CidManager,
    path_manager: PathManager,
    lifecycle: Lifecycle,
    local_params: TransportParameters,
    peer_params: Option<TransportParameters>,
    crypto_assemblers: HashMap<EncryptionLevel, CryptoStreamAssembler>,
    retry_validator: Option<RetryValidator>,
    recovery: Box<dyn RecoveryController + Send>,
    /// Frame content sent per `(space, pn)`, kept until acked or declared
    /// lost. `RecoveryController` only carries a diagnostic label for a sent
    /// packet, so the actual retransmission-category dispatch (§4.4) needs
    /// the frames themselves back here.
    sent_frames: HashMap<(crate::packet::PacketNumberSpace, u64), Vec<Frame>>,
}

impl Connection {
    pub fn new(
        role: Side,
        config: Arc<EndpointConfig>,
        remote_address: SocketAddr,
        local_params: TransportParameters,
        recovery: Box<dyn RecoveryController + Send>,
        now: Instant,
    ) -> Self {
        let peer_initial_limit_bidi = local_params.initial_max_streams_bidi;
        let peer_initial_limit_uni = local_params.initial_max_streams_uni;
        let mut crypto_assemblers = HashMap::new();
        for level in [EncryptionLevel::Initial, EncryptionLevel::Handshake, EncryptionLevel::OneRtt] {
            crypto_assemblers.insert(level, CryptoStreamAssembler::new(config.max_buffered_crypto_bytes));
        }

        // The client isn't amplification-constrained sending to an address it
        // chose itself; only the server's initial path starts unvalidated,
        // §8.1.
        let mut path_manager = PathManager::new(remote_address);
        if role == Side::Client {
            path_manager.active_path_mut().validated = true;
        }

        Self {
            role,
            streams: StreamManager::new(role, peer_initial_limit_bidi, peer_initial_limit_uni),
            connection_flow: FlowControl::new(local_params.initial_max_data, 0),
            stream_flow: HashMap::new(),
            cid_manager: CidManager::new(
                config.static_reset_key,
                local_params.active_connection_id_limit.max(2),
                local_params.active_connection_id_limit.max(2),
            ),
            path_manager,
            lifecycle: Lifecycle::new(
                Duration::from_millis(local_params.idle_timeout_ms.max(1)),
                now,
            ),
            local_params,
            peer_params: None,
            crypto_assemblers,
            retry_validator: None,
            recovery,
            spaces: Spaces::new(),
            pending: PendingFrames::new(),
            sent_frames: HashMap::new(),
            config,
        }
    }

    pub fn role(&self) -> Side {
        self.role
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Where the socket collaborator should address outgoing datagrams: the
    /// active path's remote tuple, which may have changed since construction
    /// if a validated migration has taken place.
    pub fn remote_address(&self) -> SocketAddr {
        self.path_manager.active_path().remote_address
    }

    // ---- application-facing API ----------------------------------------

    pub fn open_stream(&mut self, dir: Directionality) -> QuicResult<StreamId> {
        let id = self.streams.open_local(dir)?;
        self.stream_flow.insert(
            id,
            FlowControl::new(self.local_stream_recv_limit(id), self.peer_stream_send_limit(id)),
        );
        Ok(id)
    }

    pub fn write(&mut self, id: StreamId, data: Bytes) -> QuicResult<()> {
        require(self.lifecycle.state() != LifecycleState::Closed, "connection is closed")?;
        let flow = self
            .stream_flow
            .entry(id)
            .or_insert_with(|| FlowControl::new(self.local_stream_recv_limit(id), self.peer_stream_send_limit(id)));
        let granted = flow.send.reserve(data.len() as u64);
        if let Some(maximum_stream_data) = flow.send.blocked_frame_due() {
            self.pending.queue(
                crate::packet::PacketNumberSpace::Application,
                Frame::StreamDataBlocked {
                    stream_id: id,
                    maximum_stream_data,
                },
            );
        }
        require(granted == data.len() as u64, "write exceeds available stream flow credit")?;
        let connection_granted = self.connection_flow.send.reserve(data.len() as u64);
        if let Some(maximum_data) = self.connection_flow.send.blocked_frame_due() {
            self.pending
                .queue(crate::packet::PacketNumberSpace::Application, Frame::DataBlocked { maximum_data });
        }
        require(
            connection_granted == data.len() as u64,
            "write exceeds available connection flow credit",
        )?;
        let stream = self
            .streams
            .send_mut(id)
            .ok_or_else(|| QuicError::malformed("write on an unknown stream"))?;
        stream.write(data)
    }

    pub fn finish(&mut self, id: StreamId) -> QuicResult<()> {
        let stream = self
            .streams
            .send_mut(id)
            .ok_or_else(|| QuicError::malformed("finish on an unknown stream"))?;
        stream.finish()
    }

    pub fn read(&mut self, id: StreamId, max_len: usize) -> Option<Bytes> {
        self.streams.recv_mut(id)?.read(max_len)
    }

    pub fn reset_stream(&mut self, id: StreamId, error_code: u64) -> QuicResult<()> {
        let stream = self
            .streams
            .send_mut(id)
            .ok_or_else(|| QuicError::malformed("reset on an unknown stream"))?;
        stream.reset(error_code)?;
        self.pending.queue(
            crate::packet::PacketNumberSpace::Application,
            Frame::ResetStream {
                stream_id: id,
                error_code,
                final_size: stream.final_size().unwrap_or(0),
            },
        );
        Ok(())
    }

    pub fn close(&mut self, error_code: u64, reason: String, now: Instant, close_timeout: Duration) {
        self.lifecycle.on_local_close(
            CloseReason::Application {
                code: error_code,
                reason,
            },
            now,
            close_timeout,
        );
        info!(error_code, "connection closed locally");
    }

    // ---- ingress ---------------------------------------------------------

    /// Process a packet's already-decrypted frame list. `space` identifies
    /// which PN space authenticated `pn`; header protection/AEAD removal
    /// happened in the crypto collaborator before this call (§1).
    pub fn on_packet(
        &mut self,
        space: crate::packet::PacketNumberSpace,
        pn: u64,
        frames: &[Frame],
        remote_address: SocketAddr,
        datagram_len: u64,
        ecn_codepoint: crate::socket::EcnCodepoint,
        dcid_sequence: u64,
        now: Instant,
    ) -> QuicResult<()> {
        self.lifecycle.on_packet_processed(now);

        if self.lifecycle.state() == LifecycleState::Closing {
            if self.lifecycle.on_packet_during_closing() {
                self.requeue_close_frame(space);
            }
            return Ok(());
        }
        if self.lifecycle.state() == LifecycleState::Draining {
            return Ok(()); // draining: do not send anything, §4.10
        }

        let (path_id, migrated) = self
            .path_manager
            .on_datagram_received(remote_address, datagram_len)?;
        if migrated {
            info!(?remote_address, "new path observed; challenging it");
            let challenge = self.path_manager.initiate_validation(path_id);
            self.pending.queue(
                crate::packet::PacketNumberSpace::Application,
                Frame::PathChallenge { data: challenge },
            );
        }

        let ack_eliciting = frames.iter().any(Frame::is_ack_eliciting);
        let is_new = self
            .spaces
            .get_mut(space)
            .ok_or_else(|| QuicError::malformed("packet in a discarded packet number space"))?
            .on_packet_received(pn, ack_eliciting, ecn_codepoint);
        if !is_new {
            debug!(pn, "dropping duplicate packet number");
            return Ok(());
        }

        for frame in frames {
            self.on_frame(space, frame, remote_address, dcid_sequence, now)?;
        }
        Ok(())
    }

    fn on_frame(
        &mut self,
        space: crate::packet::PacketNumberSpace,
        frame: &Frame,
        remote_address: SocketAddr,
        dcid_sequence: u64,
        now: Instant,
    ) -> QuicResult<()> {
        match frame {
            Frame::Padding { .. } | Frame::Ping => Ok(()),
            Frame::Ack {
                largest_acknowledged,
                ack_delay,
                ack_ranges,
                ..
            } => {
                let ack_delay = Duration::from_micros(ack_delay.into_inner());
                if let Some(engine) = self.spaces.get_mut(space) {
                    engine.on_ack_frame(
                        self.recovery.as_mut(),
                        *largest_acknowledged,
                        ack_ranges,
                        ack_delay,
                    );
                }
                for acked_pn in ack_ranges.iter_packet_numbers() {
                    self.sent_frames.remove(&(space, acked_pn));
                }
                Ok(())
            }
            Frame::Crypto { offset, data } => {
                let level = match space {
                    crate::packet::PacketNumberSpace::Initial => EncryptionLevel::Initial,
                    crate::packet::PacketNumberSpace::Handshake => EncryptionLevel::Handshake,
                    crate::packet::PacketNumberSpace::Application => EncryptionLevel::OneRtt,
                };
                if let Some(assembler) = self.crypto_assemblers.get_mut(&level) {
                    assembler.on_crypto_frame(*offset, data)?;
                }
                Ok(())
            }
            Frame::Stream {
                stream_id,
                offset,
                fin,
                data,
            } => {
                self.streams.ensure_remote_stream(*stream_id)?;
                self.maybe_queue_max_streams(stream_id.directionality());
                let highest = offset + data.len() as u64;
                let new_bytes = self
                    .streams
                    .recv(*stream_id)
                    .map(|stream| stream.new_bytes_for(*offset, data.len()))
                    .unwrap_or(data.len() as u64);
                self.connection_flow.recv.on_bytes_received_delta(new_bytes)?;
                if let Some(maximum_data) = self.connection_flow.recv.maybe_extend() {
                    self.pending
                        .queue(crate::packet::PacketNumberSpace::Application, Frame::MaxData { maximum_data });
                }
                let flow = self
                    .stream_flow
                    .entry(*stream_id)
                    .or_insert_with(|| FlowControl::new(self.local_stream_recv_limit(*stream_id), 0));
                flow.recv.on_bytes_received(highest)?;
                if let Some(maximum_stream_data) = flow.recv.maybe_extend() {
                    self.pending.queue(
                        crate::packet::PacketNumberSpace::Application,
                        Frame::MaxStreamData {
                            stream_id: *stream_id,
                            maximum_stream_data,
                        },
                    );
                }
                let stream = self
                    .streams
                    .recv_mut(*stream_id)
                    .ok_or_else(|| QuicError::malformed("stream frame for an unopened stream"))?;
                stream.on_stream_frame(*offset, data, *fin)?;
                Ok(())
            }
            Frame::ResetStream {
                stream_id,
                error_code,
                final_size,
            } => {
                self.streams.ensure_remote_stream(*stream_id)?;
                self.maybe_queue_max_streams(stream_id.directionality());
                let previous_highest = self
                    .streams
                    .recv(*stream_id)
                    .map(|stream| stream.highest_received())
                    .unwrap_or(0);
                let delta = final_size.saturating_sub(previous_highest);
                self.connection_flow.recv.on_bytes_received_delta(delta)?;
                if let Some(maximum_data) = self.connection_flow.recv.maybe_extend() {
                    self.pending
                        .queue(crate::packet::PacketNumberSpace::Application, Frame::MaxData { maximum_data });
                }
                let stream = self
                    .streams
                    .recv_mut(*stream_id)
                    .ok_or_else(|| QuicError::malformed("reset_stream for an unopened stream"))?;
                stream.on_reset(*error_code, *final_size)
            }
            Frame::StopSending { stream_id, .. } => {
                self.streams.ensure_remote_stream(*stream_id)?;
                self.maybe_queue_max_streams(stream_id.directionality());
                Ok(()) // surfacing to the application and emitting RESET_STREAM is an app-level policy choice
            }
            Frame::MaxData { maximum_data } => {
                self.connection_flow.send.on_limit_update(*maximum_data);
                Ok(())
            }
            Frame::MaxStreamData {
                stream_id,
                maximum_stream_data,
            } => {
                if let Some(flow) = self.stream_flow.get_mut(stream_id) {
                    flow.send.on_limit_update(*maximum_stream_data);
                }
                Ok(())
            }
            Frame::MaxStreamsBidi { maximum_streams } => {
                self.streams.on_max_streams(Directionality::Bidi, *maximum_streams);
                Ok(())
            }
            Frame::MaxStreamsUni { maximum_streams } => {
                self.streams.on_max_streams(Directionality::Uni, *maximum_streams);
                Ok(())
            }
            Frame::DataBlocked { .. } | Frame::StreamDataBlocked { .. } => Ok(()), // informational
            Frame::StreamsBlockedBidi { .. } | Frame::StreamsBlockedUni { .. } => Ok(()),
            Frame::NewConnectionId {
                sequence_number,
                retire_prior_to,
                connection_id,
                stateless_reset_token,
            } => self.cid_manager.on_new_connection_id(
                *sequence_number,
                *retire_prior_to,
                connection_id.clone(),
                *stateless_reset_token,
            ),
            Frame::RetireConnectionId { sequence_number } => {
                require(*sequence_number != dcid_sequence, "retired the connection id that carried it").map_err(
                    |_| {
                        QuicError::transport(
                            TransportErrorCode::ProtocolViolation,
                            "RETIRE_CONNECTION_ID retired the connection id that carried it",
                        )
                    },
                )?;
                self.cid_manager.on_retire_connection_id(*sequence_number)
            }
            Frame::PathChallenge { data } => {
                self.pending.queue(
                    crate::packet::PacketNumberSpace::Application,
                    Frame::PathResponse { data: *data },
                );
                Ok(())
            }
            Frame::PathResponse { data } => {
                self.path_manager.on_path_response(remote_address, *data);
                let id = self
                    .path_manager
                    .paths()
                    .iter()
                    .position(|p| p.remote_address == remote_address)
                    .map(PathId);
                if let Some(id) = id {
                    if self.path_manager.path(id).validated && id != self.path_manager.active_id() {
                        info!(?remote_address, "path validated; migrating onto it");
                        self.path_manager.migrate_active_to(id);
                    }
                }
                Ok(())
            }
            Frame::ConnectionCloseTransport { error_code, reason, .. } => {
                self.lifecycle.on_remote_close(
                    CloseReason::Transport {
                        code: *error_code,
                        frame_type: None,
                        reason: String::from_utf8_lossy(reason).into_owned(),
                    },
                    now,
                    Duration::from_secs(3), // scaled by 3*PTO by the caller in a full implementation
                );
                warn!(?error_code, "peer closed the connection");
                Ok(())
            }
            Frame::ConnectionCloseApplication { error_code, reason } => {
                self.lifecycle.on_remote_close(
                    CloseReason::Application {
                        code: *error_code,
                        reason: String::from_utf8_lossy(reason).into_owned(),
                    },
                    now,
                    Duration::from_secs(3),
                );
                Ok(())
            }
            Frame::HandshakeDone => {
                self.lifecycle.on_handshake_confirmed();
                self.path_manager.on_handshake_confirmed();
                self.path_manager.active_path_mut().validated = true;
                Ok(())
            }
        }
    }

    /// Raise the stream-count credit we advertise to the peer for `dir` and
    /// queue a MAX_STREAMS frame, if the autotuning policy says one is due
    /// (§4.6), mirroring the MAX_DATA/MAX_STREAM_DATA autotuning above.
    fn maybe_queue_max_streams(&mut self, dir: Directionality) {
        if let Some(maximum_streams) = self.streams.maybe_extend_remote_limit(dir) {
            let frame = match dir {
                Directionality::Bidi => Frame::MaxStreamsBidi { maximum_streams },
                Directionality::Uni => Frame::MaxStreamsUni { maximum_streams },
            };
            self.pending.queue(crate::packet::PacketNumberSpace::Application, frame);
        }
    }

    fn requeue_close_frame(&mut self, space: crate::packet::PacketNumberSpace) {
        if let Some(CloseReason::Application { code, reason }) = self.lifecycle.close_reason().cloned() {
            self.pending.queue(
                space,
                Frame::ConnectionCloseApplication {
                    error_code: code,
                    reason: Bytes::from(reason.into_bytes()),
                },
            );
        } else if let Some(CloseReason::Transport { code, reason, .. }) =
            self.lifecycle.close_reason().cloned()
        {
            self.pending.queue(
                space,
                Frame::ConnectionCloseTransport {
                    error_code: code,
                    frame_type: 0,
                    reason: Bytes::from(reason.into_bytes()),
                },
            );
        }
    }

    // ---- egress ------------------------------------------------------

    /// Build the next packet's frame payload for `space`, if there is
    /// anything worth sending. Returns the packet number assigned and the
    /// encoded frame bytes.
    pub fn poll_transmit(
        &mut self,
        space: crate::packet::PacketNumberSpace,
        now: Instant,
    ) -> QuicResult<Option<(u64, BytesMut)>> {
        let mut frames = self.pending.drain(space);

        if let Some(engine) = self.spaces.get_mut(space) {
            if let Some(ack) = engine.build_ack_frame(Duration::ZERO, self.local_params.ack_delay_exponent) {
                frames.push(ack);
            }
        }

        if space == crate::packet::PacketNumberSpace::Application {
            self.fill_stream_frames(&mut frames);
            self.fill_cid_frames(&mut frames);
        }

        if frames.is_empty() {
            return Ok(None);
        }

        let mut payload = BytesMut::new();
        for frame in &frames {
            frame.encode(&mut payload);
        }

        let path = self.path_manager.active_path_mut();
        if (payload.len() as u64) > path.amplification_budget() {
            debug!("withholding datagram: anti-amplification limit reached on this path");
            for frame in frames {
                if !matches!(frame, Frame::Stream { .. }) {
                    self.pending.queue(space, frame);
                }
            }
            return Ok(None);
        }
        path.on_bytes_sent(payload.len() as u64);

        let ack_eliciting = frames.iter().any(Frame::is_ack_eliciting);
        let engine = self
            .spaces
            .get_mut(space)
            .ok_or_else(|| QuicError::malformed("cannot send in a discarded packet number space"))?;
        let pn = engine.allocate_pn()?;

        let frames_summary = match space {
            crate::packet::PacketNumberSpace::Initial => "initial packet",
            crate::packet::PacketNumberSpace::Handshake => "handshake packet",
            crate::packet::PacketNumberSpace::Application => "application packet",
        };
        engine.record_sent(
            self.recovery.as_mut(),
            pn,
            payload.len(),
            ack_eliciting,
            true,
            now,
            frames_summary,
        );
        self.sent_frames.insert((space, pn), frames);
        if ack_eliciting {
            self.lifecycle.on_ack_eliciting_sent(now);
        }
        Ok(Some((pn, payload)))
    }

    /// The recovery collaborator has declared `(space, pn)` lost. Dispatch
    /// each of its frames by `retransmission_category` (§4.4): idempotent
    /// data needs no action since the send queue only drops bytes once
    /// acked, latest-state frames are re-emitted with their current value
    /// rather than the stale one, once-per-event frames are re-emitted
    /// as-is if still relevant, volatile frames get a fresh payload, and
    /// frames that are never retransmitted are dropped.
    pub fn on_packet_lost(&mut self, space: crate::packet::PacketNumberSpace, pn: u64, _now: Instant) -> QuicResult<()> {
        let Some(frames) = self.sent_frames.remove(&(space, pn)) else {
            return Ok(());
        };
        for frame in &frames {
            self.retransmit_lost_frame(space, frame)?;
        }
        if let Some(engine) = self.spaces.get_mut(space) {
            engine.on_packet_lost(self.recovery.as_mut(), pn, "lost packet");
        }
        Ok(())
    }

    fn retransmit_lost_frame(&mut self, space: crate::packet::PacketNumberSpace, frame: &Frame) -> QuicResult<()> {
        use crate::frame::RetransmissionCategory;
        match frame.retransmission_category() {
            RetransmissionCategory::IdempotentData | RetransmissionCategory::Never => {}
            RetransmissionCategory::LatestState => match frame {
                Frame::MaxData { .. } => {
                    let maximum_data = self.connection_flow.recv.limit();
                    self.pending.queue(space, Frame::MaxData { maximum_data });
                }
                Frame::MaxStreamData { stream_id, .. } => {
                    if let Some(flow) = self.stream_flow.get(stream_id) {
                        let maximum_stream_data = flow.recv.limit();
                        self.pending.queue(
                            space,
                            Frame::MaxStreamData {
                                stream_id: *stream_id,
                                maximum_stream_data,
                            },
                        );
                    }
                }
                Frame::MaxStreamsBidi { .. } => {
                    let maximum_streams = self.streams.remote_limit(Directionality::Bidi);
                    self.pending.queue(space, Frame::MaxStreamsBidi { maximum_streams });
                }
                Frame::MaxStreamsUni { .. } => {
                    let maximum_streams = self.streams.remote_limit(Directionality::Uni);
                    self.pending.queue(space, Frame::MaxStreamsUni { maximum_streams });
                }
                Frame::DataBlocked { .. } => {
                    if let Some(maximum_data) = self.connection_flow.send.blocked_frame_due() {
                        self.pending.queue(space, Frame::DataBlocked { maximum_data });
                    }
                }
                Frame::StreamDataBlocked { stream_id, .. } => {
                    if let Some(flow) = self.stream_flow.get_mut(stream_id) {
                        if let Some(maximum_stream_data) = flow.send.blocked_frame_due() {
                            self.pending.queue(
                                space,
                                Frame::StreamDataBlocked {
                                    stream_id: *stream_id,
                                    maximum_stream_data,
                                },
                            );
                        }
                    }
                }
                Frame::StreamsBlockedBidi { maximum_streams } => {
                    self.pending.queue(
                        space,
                        Frame::StreamsBlockedBidi {
                            maximum_streams: *maximum_streams,
                        },
                    );
                }
                Frame::StreamsBlockedUni { maximum_streams } => {
                    self.pending.queue(
                        space,
                        Frame::StreamsBlockedUni {
                            maximum_streams: *maximum_streams,
                        },
                    );
                }
                _ => {}
            },
            RetransmissionCategory::OncePerEvent => match frame {
                Frame::NewConnectionId { sequence_number, .. } => {
                    if self.cid_manager.local_cid_is_active(*sequence_number) {
                        self.pending.queue(space, frame.clone());
                    }
                }
                _ => self.pending.queue(space, frame.clone()),
            },
            RetransmissionCategory::Volatile => {
                if let Frame::PathChallenge { data } = frame {
                    if let Some(id) = self.path_manager.path_with_pending_challenge(*data) {
                        let fresh = self.path_manager.initiate_validation(id);
                        self.pending.queue(space, Frame::PathChallenge { data: fresh });
                    }
                }
            }
        }
        Ok(())
    }

    /// Keep the peer stocked with connection IDs up to the limit it gave us
    /// via `active_connection_id_limit`, §4.7, and flush any
    /// RETIRE_CONNECTION_ID frames `retire_prior_to` bookkeeping has queued.
    fn fill_cid_frames(&mut self, frames: &mut Vec<Frame>) {
        for sequence_number in self.cid_manager.drain_retires_to_send() {
            frames.push(Frame::RetireConnectionId { sequence_number });
        }

        let target = self.local_params.active_connection_id_limit.max(2) as usize;
        while self.cid_manager.local_cid_count_active() < target {
            let mut bytes = vec![0u8; DEFAULT_LOCAL_CID_LEN];
            rand::thread_rng().fill_bytes(&mut bytes);
            let Ok(issued) = self.cid_manager.issue_local_cid(bytes) else {
                break;
            };
            frames.push(Frame::NewConnectionId {
                sequence_number: issued.sequence_number,
                retire_prior_to: 0,
                connection_id: issued.connection_id,
                stateless_reset_token: issued.stateless_reset_token,
            });
        }
    }

    fn fill_stream_frames(&mut self, frames: &mut Vec<Frame>) {
        for id in self.streams.ids_with_pending_sends() {
            let Some(stream) = self.streams.send(id) else { continue };
            if let Some((offset, data)) = stream.peek_pending(1200) {
                frames.push(Frame::Stream {
                    stream_id: id,
                    offset,
                    fin: false,
                    data,
                });
            }
        }
    }

    // ---- timers --------------------------------------------------------

    pub fn on_timer_fire(&mut self, now: Instant) {
        self.lifecycle.tick(now);
        if self.lifecycle.idle_timeout_expired(now) {
            info!("idle timeout; closing silently");
            self.lifecycle.on_local_close(
                CloseReason::Application {
                    code: 0,
                    reason: "idle timeout".to_string(),
                },
                now,
                Duration::ZERO,
            );
        }
        self.recovery.timer_fire();
    }

    pub fn on_handshake_keys_available(&mut self) {
        self.spaces.discard_initial();
    }

    pub fn on_one_rtt_keys_available(&mut self) {
        self.spaces.discard_handshake();
    }

    pub fn on_peer_transport_parameters(&mut self, params: TransportParameters) -> QuicResult<()> {
        if let Some(validator) = &self.retry_validator {
            validator.check_original_connection_id(&params)?;
        }
        self.connection_flow.send.on_limit_update(params.initial_max_data);
        self.streams
            .on_max_streams(Directionality::Bidi, params.initial_max_streams_bidi);
        self.streams
            .on_max_streams(Directionality::Uni, params.initial_max_streams_uni);
        self.peer_params = Some(params);
        Ok(())
    }

    /// Called by the glue layer once a Retry packet has been observed for
    /// this connection attempt; `check_original_connection_id` will now
    /// require the server to echo `original_destination_connection_id` back.
    pub fn begin_retry_validation(&mut self, original_destination_connection_id: ConnectionId) {
        let mut validator = RetryValidator::new(original_destination_connection_id);
        validator.on_retry_received();
        self.retry_validator = Some(validator);
    }

    /// How much data we will accept on `id`, per §6: a transport parameter's
    /// `_local`/`_remote` suffix is relative to its sender, so our own
    /// locally-initiated streams are governed by our own `_local` value and
    /// peer-initiated ones by our own `_remote` value.
    fn local_stream_recv_limit(&self, id: StreamId) -> u64 {
        if id.is_bidi() {
            if id.initiated_by(self.role) {
                self.local_params.initial_max_stream_data_bidi_local
            } else {
                self.local_params.initial_max_stream_data_bidi_remote
            }
        } else {
            self.local_params.initial_max_stream_data_uni
        }
    }

    /// How much we may send on `id`, per the peer's advertised receive
    /// limit: a stream we initiated is peer-initiated from the peer's own
    /// point of view, so their `_remote` value applies, and vice versa.
    fn peer_stream_send_limit(&self, id: StreamId) -> u64 {
        self.peer_params
            .as_ref()
            .map(|p| {
                if id.is_bidi() {
                    if id.initiated_by(self.role) {
                        p.initial_max_stream_data_bidi_remote
                    } else {
                        p.initial_max_stream_data_bidi_local
                    }
                } else {
                    p.initial_max_stream_data_uni
                }
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::NullRecovery;

    fn test_connection(role: Side) -> Connection {
        let config = EndpointConfig::new([1; 32]).shared();
        let params = TransportParameters::default()
            .with_initial_max_data(10_000)
            .with_initial_max_streams_bidi(4)
            .with_initial_max_streams_uni(4);
        Connection::new(
            role,
            config,
            "127.0.0.1:9000".parse().unwrap(),
            params,
            Box::new(NullRecovery::default()),
            Instant::now(),
        )
    }

    #[test]
    fn open_stream_and_write_then_poll_transmit_emits_stream_frame() {
        let mut conn = test_connection(Side::Client);
        conn.on_peer_transport_parameters(
            TransportParameters::default()
                .with_initial_max_data(10_000)
                .with_initial_max_streams_bidi(4),
        )
        .unwrap();
        let id = conn.open_stream(Directionality::Bidi).unwrap();
        conn.write(id, Bytes::from_static(b"hello")).unwrap();

        let (_, payload) = conn
            .poll_transmit(crate::packet::PacketNumberSpace::Application, Instant::now())
            .unwrap()
            .unwrap();
        assert!(!payload.is_empty());
    }

    #[test]
    fn write_beyond_connection_flow_credit_is_rejected() {
        let mut conn = test_connection(Side::Client);
        conn.connection_flow = FlowControl::new(10_000, 5);
        conn.on_peer_transport_parameters(TransportParameters::default().with_initial_max_streams_bidi(4))
            .unwrap();
        let id = conn.open_stream(Directionality::Bidi).unwrap();
        conn.stream_flow.insert(id, FlowControl::new(10_000, 100));
        assert!(conn.write(id, Bytes::from_static(b"too long for the credit")).is_err());
    }

    #[test]
    fn remote_close_transitions_to_draining() {
        let mut conn = test_connection(Side::Server);
        conn.on_frame(
            crate::packet::PacketNumberSpace::Application,
            &Frame::ConnectionCloseApplication {
                error_code: 0,
                reason: Bytes::new(),
            },
            "127.0.0.1:9000".parse().unwrap(),
            0,
            Instant::now(),
        )
        .unwrap();
        assert_eq!(conn.lifecycle_state(), LifecycleState::Draining);
    }

    #[test]
    fn connection_flow_control_sums_new_bytes_across_streams() {
        let mut conn = test_connection(Side::Server);
        let stream_a = StreamId::new(Side::Client, Directionality::Uni, 0).unwrap();
        let stream_b = StreamId::new(Side::Client, Directionality::Uni, 1).unwrap();
        let addr = "127.0.0.1:9000".parse().unwrap();
        conn.on_frame(
            crate::packet::PacketNumberSpace::Application,
            &Frame::Stream {
                stream_id: stream_a,
                offset: 0,
                fin: false,
                data: Bytes::from_static(b"hello"),
            },
            addr,
            0,
            Instant::now(),
        )
        .unwrap();
        conn.on_frame(
            crate::packet::PacketNumberSpace::Application,
            &Frame::Stream {
                stream_id: stream_b,
                offset: 0,
                fin: false,
                data: Bytes::from_static(b"world!"),
            },
            addr,
            0,
            Instant::now(),
        )
        .unwrap();
        assert_eq!(conn.connection_flow.recv.used(), 11);
    }

    #[test]
    fn reset_stream_charges_final_size_against_connection_flow() {
        let mut conn = test_connection(Side::Server);
        let stream_id = StreamId::new(Side::Client, Directionality::Uni, 0).unwrap();
        conn.on_frame(
            crate::packet::PacketNumberSpace::Application,
            &Frame::ResetStream {
                stream_id,
                error_code: 1,
                final_size: 42,
            },
            "127.0.0.1:9000".parse().unwrap(),
            0,
            Instant::now(),
        )
        .unwrap();
        assert_eq!(conn.connection_flow.recv.used(), 42);
    }

    #[test]
    fn remote_opening_streams_past_half_the_window_raises_remote_credit() {
        let mut conn = test_connection(Side::Server);
        let stream_id = StreamId::new(Side::Client, Directionality::Uni, 2).unwrap();
        conn.on_frame(
            crate::packet::PacketNumberSpace::Application,
            &Frame::Stream {
                stream_id,
                offset: 0,
                fin: false,
                data: Bytes::from_static(b"hi"),
            },
            "127.0.0.1:9000".parse().unwrap(),
            0,
            Instant::now(),
        )
        .unwrap();
        assert!(conn
            .pending
            .application
            .iter()
            .any(|f| matches!(f, Frame::MaxStreamsUni { .. })));
    }

    #[test]
    fn retire_connection_id_naming_the_carrying_dcid_is_protocol_violation() {
        let mut conn = test_connection(Side::Server);
        let err = conn
            .on_frame(
                crate::packet::PacketNumberSpace::Application,
                &Frame::RetireConnectionId { sequence_number: 3 },
                "127.0.0.1:9000".parse().unwrap(),
                3,
                Instant::now(),
            )
            .unwrap_err();
        assert_eq!(err.transport_code(), Some(TransportErrorCode::ProtocolViolation));
    }

    #[test]
    fn lost_max_data_is_retransmitted_with_current_limit_not_stale_one() {
        let mut conn = test_connection(Side::Server);
        conn.connection_flow.recv = crate::flow_control::RecvWindow::new(100);
        conn.connection_flow.recv.on_bytes_received_delta(80).unwrap();
        let stale = Frame::MaxData { maximum_data: 999 };
        conn.sent_frames.insert((crate::packet::PacketNumberSpace::Application, 0), vec![stale]);
        conn.on_packet_lost(crate::packet::PacketNumberSpace::Application, 0, Instant::now())
            .unwrap();
        let current_limit = conn.connection_flow.recv.limit();
        assert!(conn.pending.application.iter().any(|f| matches!(
            f,
            Frame::MaxData { maximum_data } if *maximum_data == current_limit
        )));
    }

    #[test]
    fn handshake_done_confirms_the_handshake() {
        let mut conn = test_connection(Side::Client);
        conn.on_frame(
            crate::packet::PacketNumberSpace::Application,
            &Frame::HandshakeDone,
            "127.0.0.1:9000".parse().unwrap(),
            0,
            Instant::now(),
        )
        .unwrap();
        assert_eq!(conn.lifecycle_state(), LifecycleState::Established);
    }
}
