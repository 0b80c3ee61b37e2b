//! Packet-number-space engine, §3/§4.4: per-space send-side PN allocation,
//! receive-side duplicate suppression and ACK-range bookkeeping, and the
//! glue that feeds the `RecoveryController` collaborator.

use std::time::{Duration, Instant};

use crate::{
    ack::AckRanges,
    frame::{EcnCounts, Frame},
    packet::{PacketNumberSpace, PACKET_NUMBER_MAX},
    recovery::{FramesSummary, RecoveryController},
    result::{QuicError, QuicResult},
    socket::EcnCodepoint,
};

pub struct PacketNumberSpaceEngine {
    space: PacketNumberSpace,
    next_send_pn: u64,
    largest_acked_by_peer: Option<u64>,
    received: AckRanges,
    largest_received: Option<u64>,
    ack_eliciting_since_last_ack_sent: bool,
    ecn_counts: EcnCounts,
}

impl PacketNumberSpaceEngine {
    pub fn new(space: PacketNumberSpace) -> Self {
        Self {
            space,
            next_send_pn: 0,
            largest_acked_by_peer: None,
            received: AckRanges::new(),
            largest_received: None,
            ack_eliciting_since_last_ack_sent: false,
            ecn_counts: EcnCounts::default(),
        }
    }

    pub fn space(&self) -> PacketNumberSpace {
        self.space
    }

    /// Allocate the next packet number for a packet about to be sent. The
    /// boundary case of reaching 2^62-1 is reported as an error; the caller
    /// must close the connection without a CONNECTION_CLOSE (§8).
    pub fn allocate_pn(&mut self) -> QuicResult<u64> {
        if self.next_send_pn > PACKET_NUMBER_MAX {
            return Err(QuicError::malformed(
                "packet number space exhausted; connection must close silently",
            ));
        }
        let pn = self.next_send_pn;
        self.next_send_pn += 1;
        Ok(pn)
    }

    pub fn largest_acked_by_peer(&self) -> Option<u64> {
        self.largest_acked_by_peer
    }

    pub fn record_sent(
        &mut self,
        recovery: &mut dyn RecoveryController,
        pn: u64,
        size: usize,
        ack_eliciting: bool,
        in_flight: bool,
        sent_time: Instant,
        frames_summary: FramesSummary,
    ) {
        recovery.on_packet_sent(
            self.space,
            pn,
            size,
            ack_eliciting,
            in_flight,
            sent_time,
            frames_summary,
        );
    }

    /// Ingest a validated, authenticated packet number. Returns `false` if
    /// this is a duplicate (caller discards the packet without further
    /// processing, §7). ECN counts are tallied only for newly-seen packet
    /// numbers, matching how `received` itself dedups, §13.4.2.
    pub fn on_packet_received(&mut self, pn: u64, ack_eliciting: bool, ecn_codepoint: EcnCodepoint) -> bool {
        if self.received.contains(pn) {
            return false;
        }
        self.received.insert(pn);
        self.largest_received = Some(self.largest_received.map_or(pn, |l| l.max(pn)));
        if ack_eliciting {
            self.ack_eliciting_since_last_ack_sent = true;
        }
        match ecn_codepoint {
            EcnCodepoint::Ect0 => self.ecn_counts.ect0 += 1,
            EcnCodepoint::Ect1 => self.ecn_counts.ect1 += 1,
            EcnCodepoint::Ce => self.ecn_counts.ecn_ce += 1,
            EcnCodepoint::NotEct => {}
        }
        true
    }

    pub fn ack_is_due(&self) -> bool {
        self.ack_eliciting_since_last_ack_sent
    }

    /// Build the ACK frame to send, if one is due.
    pub fn build_ack_frame(&mut self, ack_delay: Duration, ack_delay_exponent: u8) -> Option<Frame> {
        let largest = self.received.largest()?;
        let scaled_delay = if self.space == PacketNumberSpace::Application {
            (ack_delay.as_micros() as u64) >> ack_delay_exponent
        } else {
            0
        };
        self.ack_eliciting_since_last_ack_sent = false;
        let ecn_counts = (self.ecn_counts != EcnCounts::default()).then_some(self.ecn_counts);
        Some(Frame::Ack {
            largest_acknowledged: largest,
            ack_delay: crate::varint::VarInt::saturating_from_u64(scaled_delay),
            ack_ranges: self.received.clone(),
            ecn_counts,
        })
    }

    /// Process an incoming ACK frame: confirm acked packet numbers with the
    /// recovery collaborator and prune our own received-PN bookkeeping once
    /// the peer has confirmed seeing our acks up to a point (not tracked
    /// further here; pruning of `received` is driven by the caller once it
    /// independently knows which of its own ACKs were itself acked).
    pub fn on_ack_frame(
        &mut self,
        recovery: &mut dyn RecoveryController,
        largest_acknowledged: u64,
        ack_ranges: &AckRanges,
        ack_delay: Duration,
    ) {
        self.largest_acked_by_peer = Some(
            self.largest_acked_by_peer
                .map_or(largest_acknowledged, |l| l.max(largest_acknowledged)),
        );
        recovery.on_ack_received(self.space, ack_ranges, ack_delay);
    }

    pub fn on_packet_lost(
        &mut self,
        recovery: &mut dyn RecoveryController,
        pn: u64,
        frames_summary: FramesSummary,
    ) {
        recovery.on_packet_lost(self.space, pn, frames_summary);
    }

    /// Once the peer's ACK confirms it has seen packet numbers up through
    /// `confirmed_up_to` of ours, prune our receive-range bookkeeping that
    /// is no longer needed to build future ACKs (§4.3).
    pub fn prune_confirmed(&mut self, confirmed_up_to: u64) {
        self.received.prune_confirmed(confirmed_up_to);
    }
}

/// Whether `frame` elicits an immediate ACK-only response being forbidden:
/// an ACK-only packet must never itself be answered with an ACK-only packet
/// (§4.3 ACK generation policy). `PacketSpaceClass`/`FrameType` imports kept
/// for symmetry with the frame module's dispatch helpers.
pub fn is_ack_only(frames: &[Frame]) -> bool {
    frames.iter().all(|f| matches!(f, Frame::Ack { .. } | Frame::Padding { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::NullRecovery;

    #[test]
    fn allocate_pn_is_monotonic() {
        let mut engine = PacketNumberSpaceEngine::new(PacketNumberSpace::Application);
        assert_eq!(engine.allocate_pn().unwrap(), 0);
        assert_eq!(engine.allocate_pn().unwrap(), 1);
        assert_eq!(engine.allocate_pn().unwrap(), 2);
    }

    #[test]
    fn allocate_pn_fails_at_exhaustion() {
        let mut engine = PacketNumberSpaceEngine::new(PacketNumberSpace::Application);
        engine.next_send_pn = PACKET_NUMBER_MAX + 1;
        assert!(engine.allocate_pn().is_err());
    }

    #[test]
    fn duplicate_packet_numbers_are_rejected_silently() {
        let mut engine = PacketNumberSpaceEngine::new(PacketNumberSpace::Initial);
        assert!(engine.on_packet_received(5, true, EcnCodepoint::NotEct));
        assert!(!engine.on_packet_received(5, true, EcnCodepoint::NotEct));
    }

    #[test]
    fn ack_frame_is_built_only_after_ack_eliciting_arrival() {
        let mut engine = PacketNumberSpaceEngine::new(PacketNumberSpace::Initial);
        assert!(engine.build_ack_frame(Duration::ZERO, 3).is_none());
        engine.on_packet_received(0, true, EcnCodepoint::NotEct);
        let frame = engine.build_ack_frame(Duration::ZERO, 3).unwrap();
        match frame {
            Frame::Ack {
                largest_acknowledged,
                ecn_counts,
                ..
            } => {
                assert_eq!(largest_acknowledged, 0);
                assert_eq!(ecn_counts, None);
            }
            _ => panic!("expected an ack frame"),
        }
    }

    #[test]
    fn ack_frame_reports_ecn_counts_once_any_are_observed() {
        let mut engine = PacketNumberSpaceEngine::new(PacketNumberSpace::Application);
        engine.on_packet_received(0, true, EcnCodepoint::Ect0);
        engine.on_packet_received(1, true, EcnCodepoint::Ce);
        let frame = engine.build_ack_frame(Duration::ZERO, 3).unwrap();
        match frame {
            Frame::Ack { ecn_counts, .. } => {
                assert_eq!(
                    ecn_counts,
                    Some(EcnCounts {
                        ect0: 1,
                        ect1: 0,
                        ecn_ce: 1,
                    })
                );
            }
            _ => panic!("expected an ack frame"),
        }
    }

    #[test]
    fn on_ack_frame_forwards_to_recovery_collaborator() {
        let mut engine = PacketNumberSpaceEngine::new(PacketNumberSpace::Application);
        let mut recovery = NullRecovery::default();
        let mut ranges = AckRanges::new();
        ranges.insert(0);
        engine.on_ack_frame(&mut recovery, 0, &ranges, Duration::ZERO);
        assert_eq!(recovery.acked_count, 1);
        assert_eq!(engine.largest_acked_by_peer(), Some(0));
    }
}
