//! Flow control, §4.6: connection- and stream-level credit ledgers, with
//! autotuning of receive windows and once-per-event BLOCKED emission.

use crate::result::{QuicError, QuicResult};
use crate::transport_error::TransportErrorCode;

/// Credit this endpoint extends to the peer for sending to us.
pub struct RecvWindow {
    /// Limit most recently communicated to the peer (MAX_DATA/MAX_STREAM_DATA).
    limit: u64,
    /// Highest byte offset received so far.
    used: u64,
    /// Half of this, additional headroom, triggers sending an updated limit.
    window: u64,
}

impl RecvWindow {
    pub fn new(initial_limit: u64) -> Self {
        Self {
            limit: initial_limit,
            used: 0,
            window: initial_limit,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    /// Record that the peer has now sent up to byte offset `highest`
    /// (cumulative, not incremental). Errors if this exceeds the limit we
    /// advertised, per §4.6 / RFC 9000 FlowControlError.
    pub fn on_bytes_received(&mut self, highest: u64) -> QuicResult<()> {
        if highest > self.limit {
            return Err(QuicError::transport(
                TransportErrorCode::FlowControlError,
                "peer sent beyond the advertised flow control limit",
            ));
        }
        self.used = self.used.max(highest);
        Ok(())
    }

    /// Record an additional `new_bytes` consumed against this ledger, on top
    /// of whatever is already `used`. Unlike `on_bytes_received`, which takes
    /// a cumulative high-water mark from a single source, this accumulates
    /// deltas from multiple sources (e.g. every stream in a connection) so
    /// that the aggregate is actually bounded by `limit`.
    pub fn on_bytes_received_delta(&mut self, new_bytes: u64) -> QuicResult<()> {
        let total = self.used + new_bytes;
        if total > self.limit {
            return Err(QuicError::transport(
                TransportErrorCode::FlowControlError,
                "peer sent beyond the advertised flow control limit",
            ));
        }
        self.used = total;
        Ok(())
    }

    /// Autotuning policy: once the peer has used more than half the current
    /// window, extend the limit by another full window. Returns the new
    /// limit to announce, if one is due.
    pub fn maybe_extend(&mut self) -> Option<u64> {
        if self.used > self.limit.saturating_sub(self.window / 2) {
            self.limit += self.window;
            Some(self.limit)
        } else {
            None
        }
    }
}

/// Credit the peer has extended to us for sending to them.
pub struct SendWindow {
    /// Limit most recently communicated by the peer.
    limit: u64,
    /// Bytes already sent (cumulative).
    used: u64,
    /// Whether a *_BLOCKED frame has already been queued for the current
    /// limit (§4.4 once-per-event: don't re-send until the limit changes).
    blocked_pending: bool,
}

impl SendWindow {
    pub fn new(initial_limit: u64) -> Self {
        Self {
            limit: initial_limit,
            used: 0,
            blocked_pending: false,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn available(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    /// The peer raised our limit (latest-state: only move forward).
    pub fn on_limit_update(&mut self, new_limit: u64) {
        if new_limit > self.limit {
            self.limit = new_limit;
            self.blocked_pending = false;
        }
    }

    /// Reserve up to `want` bytes of send credit, returning how much was
    /// actually granted (may be less, or zero if no credit remains).
    pub fn reserve(&mut self, want: u64) -> u64 {
        let granted = want.min(self.available());
        self.used += granted;
        granted
    }

    /// Whether a BLOCKED frame carrying `self.limit` should be queued now
    /// (credit exhausted and we haven't already told the peer at this limit).
    pub fn blocked_frame_due(&mut self) -> Option<u64> {
        if self.available() == 0 && !self.blocked_pending {
            self.blocked_pending = true;
            Some(self.limit)
        } else {
            None
        }
    }
}

pub struct FlowControl {
    pub recv: RecvWindow,
    pub send: SendWindow,
}

impl FlowControl {
    pub fn new(local_recv_limit: u64, peer_send_limit: u64) -> Self {
        Self {
            recv: RecvWindow::new(local_recv_limit),
            send: SendWindow::new(peer_send_limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recv_window_rejects_overrun() {
        let mut recv = RecvWindow::new(100);
        recv.on_bytes_received(100).unwrap();
        assert!(recv.on_bytes_received(101).is_err());
    }

    #[test]
    fn recv_window_extends_past_halfway() {
        let mut recv = RecvWindow::new(100);
        recv.on_bytes_received(60).unwrap();
        let extended = recv.maybe_extend();
        assert_eq!(extended, Some(200));
        assert_eq!(recv.limit(), 200);
        assert!(recv.maybe_extend().is_none());
    }

    #[test]
    fn send_window_blocked_is_reported_once_per_limit() {
        let mut send = SendWindow::new(10);
        assert_eq!(send.reserve(10), 10);
        assert_eq!(send.blocked_frame_due(), Some(10));
        assert_eq!(send.blocked_frame_due(), None);
        send.on_limit_update(20);
        assert_eq!(send.blocked_frame_due(), Some(20));
    }

    #[test]
    fn send_window_limit_only_moves_forward() {
        let mut send = SendWindow::new(50);
        send.on_limit_update(10);
        assert_eq!(send.limit(), 50);
        send.on_limit_update(100);
        assert_eq!(send.limit(), 100);
    }
}
