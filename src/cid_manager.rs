//! Connection-ID lifecycle, §4.7: local CIDs this endpoint hands out
//! (sequence-numbered, each with a stateless-reset token) and the peer's
//! CID pool this endpoint picks a destination from, including
//! `retire_prior_to` bookkeeping.

use std::collections::VecDeque;

use crate::{
    connection_id::{ConnectionId, StatelessResetToken},
    result::{require, QuicError, QuicResult},
    transport_error::TransportErrorCode,
};

#[derive(Debug, Clone)]
pub struct LocalCid {
    pub sequence_number: u64,
    pub connection_id: ConnectionId,
    pub stateless_reset_token: StatelessResetToken,
    pub retired: bool,
}

#[derive(Debug, Clone)]
pub struct PeerCid {
    pub sequence_number: u64,
    pub connection_id: ConnectionId,
    pub stateless_reset_token: StatelessResetToken,
}

pub struct CidManager {
    static_reset_key: [u8; 32],
    next_local_seq: u64,
    /// How many local CIDs the peer told us (via `active_connection_id_limit`)
    /// it will track; we must not have more than this many un-retired.
    peer_active_limit: u64,
    local_cids: Vec<LocalCid>,
    /// How many peer CIDs *we* committed to track, via our own
    /// `active_connection_id_limit` transport parameter.
    local_active_limit: u64,
    peer_cids: VecDeque<PeerCid>,
    highest_retire_prior_to_seen: u64,
    retires_to_send: Vec<u64>,
}

impl CidManager {
    pub fn new(static_reset_key: [u8; 32], peer_active_limit: u64, local_active_limit: u64) -> Self {
        Self {
            static_reset_key,
            next_local_seq: 0,
            peer_active_limit,
            local_cids: Vec::new(),
            local_active_limit,
            peer_cids: VecDeque::new(),
            highest_retire_prior_to_seen: 0,
            retires_to_send: Vec::new(),
        }
    }

    pub fn local_cid_count_active(&self) -> usize {
        self.local_cids.iter().filter(|c| !c.retired).count()
    }

    /// Whether sequence number `sequence_number` names a local CID we issued
    /// and have not since retired.
    pub fn local_cid_is_active(&self, sequence_number: u64) -> bool {
        self.local_cids
            .iter()
            .any(|c| c.sequence_number == sequence_number && !c.retired)
    }

    /// Issue a new local connection ID, if the peer's active_connection_id_limit
    /// leaves room for one more outstanding.
    pub fn issue_local_cid(&mut self, bytes: Vec<u8>) -> QuicResult<LocalCid> {
        require(
            (self.local_cid_count_active() as u64) < self.peer_active_limit,
            "peer's active_connection_id_limit leaves no room for another local cid",
        )?;
        let connection_id = ConnectionId::new(bytes)?;
        let stateless_reset_token =
            StatelessResetToken::derive(&self.static_reset_key, &connection_id);
        let entry = LocalCid {
            sequence_number: self.next_local_seq,
            connection_id,
            stateless_reset_token,
            retired: false,
        };
        self.next_local_seq += 1;
        self.local_cids.push(entry.clone());
        Ok(entry)
    }

    /// The peer retired one of our local CIDs via RETIRE_CONNECTION_ID.
    pub fn on_retire_connection_id(&mut self, sequence_number: u64) -> QuicResult<()> {
        let entry = self
            .local_cids
            .iter_mut()
            .find(|c| c.sequence_number == sequence_number)
            .ok_or_else(|| {
                QuicError::transport(
                    TransportErrorCode::ProtocolViolation,
                    "retired a connection id sequence number we never issued",
                )
            })?;
        entry.retired = true;
        Ok(())
    }

    /// A NEW_CONNECTION_ID frame arrived from the peer.
    pub fn on_new_connection_id(
        &mut self,
        sequence_number: u64,
        retire_prior_to: u64,
        connection_id: ConnectionId,
        stateless_reset_token: StatelessResetToken,
    ) -> QuicResult<()> {
        if self
            .peer_cids
            .iter()
            .any(|c| c.sequence_number == sequence_number)
        {
            return Ok(()); // duplicate NEW_CONNECTION_ID, idempotent
        }
        require(retire_prior_to <= sequence_number, "retire_prior_to exceeds its own sequence number").map_err(
            |_| {
                QuicError::transport(
                    TransportErrorCode::ProtocolViolation,
                    "NEW_CONNECTION_ID retire_prior_to exceeds its own sequence number",
                )
            },
        )?;
        require(
            (self.peer_cids.len() as u64) < self.local_active_limit,
            "exceeded our own active_connection_id_limit",
        )
        .map_err(|_| {
            QuicError::transport(
                TransportErrorCode::ConnectionIdLimitError,
                "peer issued more connection ids than our active_connection_id_limit",
            )
        })?;

        self.peer_cids.push_back(PeerCid {
            sequence_number,
            connection_id,
            stateless_reset_token,
        });

        if retire_prior_to > self.highest_retire_prior_to_seen {
            self.highest_retire_prior_to_seen = retire_prior_to;
            for cid in self.peer_cids.iter() {
                if cid.sequence_number < retire_prior_to
                    && !self.retires_to_send.contains(&cid.sequence_number)
                {
                    self.retires_to_send.push(cid.sequence_number);
                }
            }
            self.peer_cids
                .retain(|c| c.sequence_number >= retire_prior_to);
        }
        Ok(())
    }

    /// Sequence numbers for which a RETIRE_CONNECTION_ID frame is now due.
    pub fn drain_retires_to_send(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.retires_to_send)
    }

    /// The peer CID currently selected as the destination for outgoing
    /// packets on the primary path.
    pub fn current_peer_cid(&self) -> Option<&PeerCid> {
        self.peer_cids.front()
    }

    /// Rotate to the next peer CID, e.g. for a deliberate migration;
    /// retires the one being abandoned.
    pub fn rotate_peer_cid(&mut self) -> Option<PeerCid> {
        let retiring = self.peer_cids.pop_front()?;
        self.retires_to_send.push(retiring.sequence_number);
        Some(retiring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_local_cid_respects_peer_limit() {
        let mut mgr = CidManager::new([1; 32], 2, 4);
        mgr.issue_local_cid(vec![1, 1, 1, 1]).unwrap();
        mgr.issue_local_cid(vec![2, 2, 2, 2]).unwrap();
        assert!(mgr.issue_local_cid(vec![3, 3, 3, 3]).is_err());
    }

    #[test]
    fn retiring_a_local_cid_frees_capacity() {
        let mut mgr = CidManager::new([1; 32], 1, 4);
        let first = mgr.issue_local_cid(vec![1, 1, 1, 1]).unwrap();
        assert!(mgr.issue_local_cid(vec![2, 2, 2, 2]).is_err());
        mgr.on_retire_connection_id(first.sequence_number).unwrap();
        mgr.issue_local_cid(vec![2, 2, 2, 2]).unwrap();
    }

    #[test]
    fn new_connection_id_with_retire_prior_to_schedules_retires() {
        let mut mgr = CidManager::new([1; 32], 4, 4);
        for seq in 0..3 {
            mgr.on_new_connection_id(
                seq,
                0,
                ConnectionId::new(vec![seq as u8 + 1; 4]).unwrap(),
                StatelessResetToken::from_bytes([seq as u8; 16]),
            )
            .unwrap();
        }
        mgr.on_new_connection_id(
            3,
            2,
            ConnectionId::new(vec![9; 4]).unwrap(),
            StatelessResetToken::from_bytes([9; 16]),
        )
        .unwrap();
        let mut retires = mgr.drain_retires_to_send();
        retires.sort();
        assert_eq!(retires, vec![0, 1]);
        assert_eq!(mgr.current_peer_cid().unwrap().sequence_number, 2);
    }

    #[test]
    fn retire_prior_to_beyond_its_own_sequence_number_is_protocol_violation() {
        let mut mgr = CidManager::new([1; 32], 4, 4);
        let err = mgr
            .on_new_connection_id(
                1,
                2,
                ConnectionId::new(vec![1; 4]).unwrap(),
                StatelessResetToken::from_bytes([0; 16]),
            )
            .unwrap_err();
        assert_eq!(err.transport_code(), Some(TransportErrorCode::ProtocolViolation));
    }

    #[test]
    fn exceeding_local_active_limit_is_connection_id_limit_error() {
        let mut mgr = CidManager::new([1; 32], 4, 1);
        mgr.on_new_connection_id(
            0,
            0,
            ConnectionId::new(vec![1; 4]).unwrap(),
            StatelessResetToken::from_bytes([0; 16]),
        )
        .unwrap();
        let err = mgr
            .on_new_connection_id(
                1,
                0,
                ConnectionId::new(vec![2; 4]).unwrap(),
                StatelessResetToken::from_bytes([1; 16]),
            )
            .unwrap_err();
        assert_eq!(
            err.transport_code(),
            Some(TransportErrorCode::ConnectionIdLimitError)
        );
    }
}
