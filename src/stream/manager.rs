//! Stream multiplexer, §4.5: implicit stream opening, per-class count
//! limits, and send/recv state lookup for the connection's frame handlers.

use std::collections::HashMap;

use crate::{
    result::{require, QuicError, QuicResult},
    stream::{
        id::{Directionality, Side, StreamId},
        recv::RecvStream,
        send::SendStream,
    },
    transport_error::TransportErrorCode,
};

#[derive(Default)]
struct ClassCounters {
    /// Highest index opened so far by the remote peer, if any.
    highest_remote_opened: Option<u64>,
    /// Next index this endpoint will use when opening locally.
    next_local_index: u64,
    /// Limit the peer has told us (max index we may open = this - 1), §3.
    local_limit: u64,
    /// Limit we have told the peer (enforced against remote opens).
    remote_limit: u64,
    /// Window used to autotune `remote_limit`, mirroring `RecvWindow`'s
    /// half-window extension policy (§4.6).
    remote_limit_window: u64,
}

pub struct StreamManager {
    local: Side,
    bidi: ClassCounters,
    uni: ClassCounters,
    send_streams: HashMap<StreamId, SendStream>,
    recv_streams: HashMap<StreamId, RecvStream>,
}

impl StreamManager {
    pub fn new(local: Side, initial_remote_limit_bidi: u64, initial_remote_limit_uni: u64) -> Self {
        Self {
            local,
            bidi: ClassCounters {
                remote_limit: initial_remote_limit_bidi,
                remote_limit_window: initial_remote_limit_bidi,
                ..Default::default()
            },
            uni: ClassCounters {
                remote_limit: initial_remote_limit_uni,
                remote_limit_window: initial_remote_limit_uni,
                ..Default::default()
            },
            send_streams: HashMap::new(),
            recv_streams: HashMap::new(),
        }
    }

    fn class_mut(&mut self, dir: Directionality) -> &mut ClassCounters {
        match dir {
            Directionality::Bidi => &mut self.bidi,
            Directionality::Uni => &mut self.uni,
        }
    }

    fn class(&self, dir: Directionality) -> &ClassCounters {
        match dir {
            Directionality::Bidi => &self.bidi,
            Directionality::Uni => &self.uni,
        }
    }

    /// Peer raised MAX_STREAMS for `dir`; only take effect if it is higher
    /// than what we already know (§4.4 latest-state category).
    pub fn on_max_streams(&mut self, dir: Directionality, limit: u64) {
        let class = self.class_mut(dir);
        class.local_limit = class.local_limit.max(limit);
    }

    pub fn streams_available(&self, dir: Directionality) -> u64 {
        let class = self.class(dir);
        class.local_limit.saturating_sub(class.next_local_index)
    }

    /// The stream-count limit we currently advertise to the peer for `dir`.
    pub fn remote_limit(&self, dir: Directionality) -> u64 {
        self.class(dir).remote_limit
    }

    /// Autotuning policy for the credit we extend to the peer, mirroring
    /// `RecvWindow::maybe_extend` (§4.6): once the peer has opened within
    /// half of the advertised count, raise the limit by another window.
    /// Returns the new limit to announce via MAX_STREAMS, if one is due.
    pub fn maybe_extend_remote_limit(&mut self, dir: Directionality) -> Option<u64> {
        let class = self.class_mut(dir);
        let opened = class.highest_remote_opened.map(|h| h + 1).unwrap_or(0);
        if class.remote_limit_window == 0 {
            return None;
        }
        if opened > class.remote_limit.saturating_sub(class.remote_limit_window / 2) {
            class.remote_limit += class.remote_limit_window;
            Some(class.remote_limit)
        } else {
            None
        }
    }

    /// Open a new stream initiated by this endpoint.
    pub fn open_local(&mut self, dir: Directionality) -> QuicResult<StreamId> {
        require(
            self.streams_available(dir) > 0,
            "no stream credit available; caller must wait for MAX_STREAMS",
        )?;
        let class = self.class_mut(dir);
        let index = class.next_local_index;
        class.next_local_index += 1;
        let id = StreamId::new(self.local, dir, index)?;
        self.send_streams.insert(id, SendStream::new());
        if dir == Directionality::Bidi {
            self.recv_streams.insert(id, RecvStream::new());
        }
        Ok(id)
    }

    /// Called before processing any frame that references a stream ID. If
    /// the ID belongs to the peer and is new, implicitly opens it and every
    /// lower-indexed not-yet-seen stream of the same class, per RFC 9000
    /// §2.1. Enforces the remote stream-count limit we advertised.
    pub fn ensure_remote_stream(&mut self, id: StreamId) -> QuicResult<()> {
        if id.initiated_by(self.local) {
            // a locally-initiated stream ID referenced by the peer must
            // already exist (e.g. in a MAX_STREAM_DATA from them about our
            // stream); nothing to implicitly open.
            require(
                self.send_streams.contains_key(&id) || self.recv_streams.contains_key(&id),
                "reference to a locally-initiated stream that was never opened",
            )?;
            return Ok(());
        }

        let dir = id.directionality();
        let index = id.index();
        let class = self.class(dir);
        if let Some(highest) = class.highest_remote_opened {
            if index <= highest {
                return Ok(());
            }
        }
        require(
            index < class.remote_limit,
            "peer exceeded the advertised stream limit",
        )
        .map_err(|_| {
            QuicError::transport(
                TransportErrorCode::StreamLimitError,
                "peer opened more streams than advertised",
            )
        })?;

        let start = class.highest_remote_opened.map(|h| h + 1).unwrap_or(0);
        for opened_index in start..=index {
            let stream_id = StreamId::new(id.initiator(), dir, opened_index)?;
            self.recv_streams.insert(stream_id, RecvStream::new());
            if dir == Directionality::Bidi {
                self.send_streams.insert(stream_id, SendStream::new());
            }
        }
        self.class_mut(dir).highest_remote_opened = Some(index);
        Ok(())
    }

    pub fn send_mut(&mut self, id: StreamId) -> Option<&mut SendStream> {
        self.send_streams.get_mut(&id)
    }

    pub fn recv_mut(&mut self, id: StreamId) -> Option<&mut RecvStream> {
        self.recv_streams.get_mut(&id)
    }

    pub fn send(&self, id: StreamId) -> Option<&SendStream> {
        self.send_streams.get(&id)
    }

    pub fn recv(&self, id: StreamId) -> Option<&RecvStream> {
        self.recv_streams.get(&id)
    }

    pub fn ids_with_pending_sends(&self) -> Vec<StreamId> {
        self.send_streams
            .iter()
            .filter(|(_, s)| s.has_pending())
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_local_respects_credit() {
        let mut mgr = StreamManager::new(Side::Client, 1, 0);
        let first = mgr.open_local(Directionality::Bidi).unwrap();
        assert_eq!(first.index(), 0);
        assert!(mgr.open_local(Directionality::Bidi).is_err());
    }

    #[test]
    fn on_max_streams_raises_credit() {
        let mut mgr = StreamManager::new(Side::Client, 1, 0);
        mgr.open_local(Directionality::Bidi).unwrap();
        mgr.on_max_streams(Directionality::Bidi, 3);
        assert_eq!(mgr.streams_available(Directionality::Bidi), 2);
    }

    #[test]
    fn ensure_remote_stream_implicitly_opens_lower_indices() {
        let mut mgr = StreamManager::new(Side::Client, 0, 0);
        let remote_id = StreamId::new(Side::Server, Directionality::Uni, 2).unwrap();
        mgr.on_max_streams(Directionality::Uni, 0); // no-op, limit stays on remote side
        // the limit the *local* endpoint advertised to the peer is `remote_limit`
        // passed at construction (0 here), so this should fail the credit check:
        assert!(mgr.ensure_remote_stream(remote_id).is_err());

        let mut mgr = StreamManager::new(Side::Client, 0, 10);
        mgr.ensure_remote_stream(remote_id).unwrap();
        for idx in 0..=2 {
            let id = StreamId::new(Side::Server, Directionality::Uni, idx).unwrap();
            assert!(mgr.recv(id).is_some());
        }
    }

    #[test]
    fn reference_to_unopened_local_stream_is_rejected() {
        let mut mgr = StreamManager::new(Side::Client, 5, 5);
        let id = StreamId::new(Side::Client, Directionality::Bidi, 0).unwrap();
        assert!(mgr.ensure_remote_stream(id).is_err());
    }
}
