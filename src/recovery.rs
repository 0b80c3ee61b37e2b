//! Loss-detection/congestion-control collaborator interface, §6. The core
//! engine in `pn_space.rs` only needs to notify this trait of sent/acked/
//! lost packets and ask it when to next wake up; it has no opinion on which
//! congestion-control algorithm is behind it.

use std::time::{Duration, Instant};

use crate::{ack::AckRanges, packet::PacketNumberSpace};

/// A terse human-readable summary of a packet's frame contents, used only
/// for logging/diagnostics by the recovery collaborator.
pub type FramesSummary = &'static str;

pub trait RecoveryController {
    fn on_packet_sent(
        &mut self,
        space: PacketNumberSpace,
        pn: u64,
        size: usize,
        ack_eliciting: bool,
        in_flight: bool,
        sent_time: Instant,
        frames_summary: FramesSummary,
    );

    fn on_ack_received(&mut self, space: PacketNumberSpace, ranges: &AckRanges, ack_delay: Duration);

    fn on_packet_lost(&mut self, space: PacketNumberSpace, pn: u64, frames_summary: FramesSummary);

    /// When the caller should next call `timer_fire`, if ever.
    fn timer_query(&self) -> Option<Instant>;

    fn timer_fire(&mut self);
}

/// A no-op recovery collaborator used by tests that only need the PN-space
/// engine's own bookkeeping to run, without a real congestion controller.
#[derive(Default)]
pub struct NullRecovery {
    pub sent_count: u64,
    pub acked_count: u64,
    pub lost_count: u64,
}

impl RecoveryController for NullRecovery {
    fn on_packet_sent(
        &mut self,
        _space: PacketNumberSpace,
        _pn: u64,
        _size: usize,
        _ack_eliciting: bool,
        _in_flight: bool,
        _sent_time: Instant,
        _frames_summary: FramesSummary,
    ) {
        self.sent_count += 1;
    }

    fn on_ack_received(&mut self, _space: PacketNumberSpace, ranges: &AckRanges, _ack_delay: Duration) {
        self.acked_count += ranges.iter_packet_numbers().count() as u64;
    }

    fn on_packet_lost(&mut self, _space: PacketNumberSpace, _pn: u64, _frames_summary: FramesSummary) {
        self.lost_count += 1;
    }

    fn timer_query(&self) -> Option<Instant> {
        None
    }

    fn timer_fire(&mut self) {}
}
