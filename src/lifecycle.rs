//! Connection lifecycle, §4.10: handshake progress, idle timeout, close,
//! draining, and stateless reset.

use std::time::{Duration, Instant};

use rand::RngCore;

use crate::{connection_id::StatelessResetToken, transport_error::TransportErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Handshaking,
    Established,
    Closing,
    Draining,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Transport {
        code: TransportErrorCode,
        frame_type: Option<u64>,
        reason: String,
    },
    Application {
        code: u64,
        reason: String,
    },
}

/// Drives the Closing-state CONNECTION_CLOSE re-emission policy: emit again
/// only after progressively more incoming packets have arrived, so a
/// sustained attack can't make the closing endpoint re-emit on every packet.
struct ClosingRateLimiter {
    packets_since_last_emit: u64,
    next_threshold: u64,
}

impl ClosingRateLimiter {
    fn new() -> Self {
        Self {
            packets_since_last_emit: 0,
            next_threshold: 1,
        }
    }

    fn on_packet_received(&mut self) -> bool {
        self.packets_since_last_emit += 1;
        if self.packets_since_last_emit >= self.next_threshold {
            self.packets_since_last_emit = 0;
            self.next_threshold = self.next_threshold.saturating_mul(2);
            true
        } else {
            false
        }
    }
}

pub struct Lifecycle {
    state: LifecycleState,
    idle_timeout: Duration,
    last_activity: Instant,
    close_deadline: Option<Instant>,
    close_reason: Option<CloseReason>,
    rate_limiter: ClosingRateLimiter,
}

impl Lifecycle {
    pub fn new(idle_timeout: Duration, now: Instant) -> Self {
        Self {
            state: LifecycleState::Handshaking,
            idle_timeout,
            last_activity: now,
            close_deadline: None,
            close_reason: None,
            rate_limiter: ClosingRateLimiter::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    pub fn on_handshake_confirmed(&mut self) {
        if self.state == LifecycleState::Handshaking {
            self.state = LifecycleState::Established;
        }
    }

    /// Update `idle_timeout` to the effective value once both endpoints'
    /// advertised timeouts and 3*PTO are known, §4.10.
    pub fn set_effective_idle_timeout(&mut self, idle_timeout: Duration) {
        self.idle_timeout = idle_timeout;
    }

    pub fn on_packet_processed(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn on_ack_eliciting_sent(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn idle_timeout_expired(&self, now: Instant) -> bool {
        matches!(self.state, LifecycleState::Handshaking | LifecycleState::Established)
            && now.duration_since(self.last_activity) >= self.idle_timeout
    }

    /// Local application/core decided to close the connection.
    pub fn on_local_close(&mut self, reason: CloseReason, now: Instant, close_timeout: Duration) {
        if matches!(self.state, LifecycleState::Closing | LifecycleState::Draining | LifecycleState::Closed) {
            return;
        }
        self.state = LifecycleState::Closing;
        self.close_reason = Some(reason);
        self.close_deadline = Some(now + close_timeout);
    }

    /// A CONNECTION_CLOSE arrived from the peer.
    pub fn on_remote_close(&mut self, reason: CloseReason, now: Instant, close_timeout: Duration) {
        if self.state == LifecycleState::Closed {
            return;
        }
        self.state = LifecycleState::Draining;
        self.close_reason = Some(reason);
        self.close_deadline = Some(now + close_timeout);
    }

    pub fn on_valid_stateless_reset(&mut self, now: Instant, close_timeout: Duration) {
        if self.state == LifecycleState::Closed {
            return;
        }
        self.state = LifecycleState::Draining;
        self.close_deadline = Some(now + close_timeout);
    }

    /// While Closing, called for each further incoming packet; returns
    /// `true` if CONNECTION_CLOSE should be re-emitted now.
    pub fn on_packet_during_closing(&mut self) -> bool {
        if self.state != LifecycleState::Closing {
            return false;
        }
        self.rate_limiter.on_packet_received()
    }

    /// Advance Closing/Draining to Closed once the close timer elapses.
    pub fn tick(&mut self, now: Instant) {
        if let Some(deadline) = self.close_deadline {
            if matches!(self.state, LifecycleState::Closing | LifecycleState::Draining) && now >= deadline {
                self.state = LifecycleState::Closed;
            }
        }
    }
}

/// Minimum size of a stateless reset, chosen to be strictly smaller than any
/// packet likely to trigger one while staying hard to distinguish from a
/// short-header packet, §4.10.
pub const STATELESS_RESET_MIN_LEN: usize = 21;

/// Build a stateless reset datagram no larger than `max_len` (which must be
/// strictly smaller than the triggering packet to avoid an amplification
/// loop). Returns `None` if `max_len` is below the minimum size.
pub fn build_stateless_reset(token: &StatelessResetToken, max_len: usize) -> Option<Vec<u8>> {
    if max_len < STATELESS_RESET_MIN_LEN {
        return None;
    }
    let mut datagram = vec![0u8; max_len];
    rand::thread_rng().fill_bytes(&mut datagram);
    // top two bits 0b01 mimics a short-header packet with the fixed bit set.
    datagram[0] = (datagram[0] & 0x3f) | 0x40;
    let token_start = max_len - 16;
    datagram[token_start..].copy_from_slice(token.as_bytes());
    Some(datagram)
}

/// Whether `datagram`'s trailing 16 bytes match one of the tokens this
/// endpoint has issued, indicating it is a stateless reset rather than a
/// packet this connection failed to associate or decrypt.
pub fn detect_stateless_reset(datagram: &[u8], known_tokens: &[StatelessResetToken]) -> bool {
    if datagram.len() < STATELESS_RESET_MIN_LEN {
        return false;
    }
    let trailing = &datagram[datagram.len() - 16..];
    known_tokens.iter().any(|t| t.as_bytes() == trailing)
}
