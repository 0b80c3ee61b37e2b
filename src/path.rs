//! Path management, §4.8: one entry per (local, remote) address pair this
//! connection has observed, path validation via PATH_CHALLENGE/RESPONSE,
//! and the anti-amplification limit that applies until a path validates.
//!
//! Grounded on the shape of a typical path manager: a small table of paths
//! plus an index naming the active one, rather than a single mutable
//! "current path" field, so a migration in flight doesn't lose track of the
//! path being migrated away from.

use std::net::SocketAddr;
use std::time::Duration;

use rand::RngCore;

use crate::result::{require, QuicError, QuicResult};
use crate::transport_error::TransportErrorCode;

/// Until a path is validated, an endpoint may send at most this many times
/// what it has received on that path, §4.8.
const ANTI_AMPLIFICATION_FACTOR: u64 = 3;

pub struct Path {
    pub remote_address: SocketAddr,
    pub validated: bool,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pending_challenge: Option<[u8; 8]>,
    /// Round-trip estimate used to size the path-validation timeout;
    /// `None` until at least one sample exists, per §4.8.
    pub rtt_estimate: Option<Duration>,
}

impl Path {
    fn new(remote_address: SocketAddr) -> Self {
        Self {
            remote_address,
            validated: false,
            bytes_received: 0,
            bytes_sent: 0,
            pending_challenge: None,
            rtt_estimate: None,
        }
    }

    /// Bytes this endpoint may still send on this path before it must stop
    /// and wait for more to arrive, per the anti-amplification limit.
    pub fn amplification_budget(&self) -> u64 {
        if self.validated {
            u64::MAX
        } else {
            (self.bytes_received * ANTI_AMPLIFICATION_FACTOR).saturating_sub(self.bytes_sent)
        }
    }

    pub fn on_bytes_sent(&mut self, len: u64) {
        self.bytes_sent += len;
    }

    pub fn on_bytes_received(&mut self, len: u64) {
        self.bytes_received += len;
    }
}

pub struct PathManager {
    paths: Vec<Path>,
    active: usize,
    handshake_confirmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathId(pub usize);

impl PathManager {
    pub fn new(initial_remote_address: SocketAddr) -> Self {
        Self {
            paths: vec![Path::new(initial_remote_address)],
            active: 0,
            handshake_confirmed: false,
        }
    }

    pub fn on_handshake_confirmed(&mut self) {
        self.handshake_confirmed = true;
    }

    pub fn active_path(&self) -> &Path {
        &self.paths[self.active]
    }

    pub fn active_path_mut(&mut self) -> &mut Path {
        &mut self.paths[self.active]
    }

    pub fn active_id(&self) -> PathId {
        PathId(self.active)
    }

    pub fn path(&self, id: PathId) -> &Path {
        &self.paths[id.0]
    }

    fn find(&self, remote_address: SocketAddr) -> Option<PathId> {
        self.paths
            .iter()
            .position(|p| p.remote_address == remote_address)
            .map(PathId)
    }

    /// A datagram of `len` bytes arrived from `remote_address`. Returns the
    /// path it belongs to and whether this introduces a new path (i.e. a
    /// migration, deliberate or NAT-rebinding).
    ///
    /// Migration before the handshake is confirmed is a protocol violation,
    /// §4.8.
    pub fn on_datagram_received(
        &mut self,
        remote_address: SocketAddr,
        len: u64,
    ) -> QuicResult<(PathId, bool)> {
        if let Some(id) = self.find(remote_address) {
            self.paths[id.0].on_bytes_received(len);
            return Ok((id, false));
        }

        require(self.handshake_confirmed, "migration before handshake confirmed")
            .map_err(|_| {
                QuicError::transport(
                    TransportErrorCode::ProtocolViolation,
                    "peer migrated before the handshake was confirmed",
                )
            })?;

        let mut path = Path::new(remote_address);
        path.on_bytes_received(len);
        self.paths.push(path);
        let id = PathId(self.paths.len() - 1);
        Ok((id, true))
    }

    /// Begin validating `id`'s path, returning the PATH_CHALLENGE payload
    /// to send.
    pub fn initiate_validation(&mut self, id: PathId) -> [u8; 8] {
        let mut data = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut data);
        self.paths[id.0].pending_challenge = Some(data);
        data
    }

    /// A PATH_RESPONSE arrived; mark the matching path validated. Per §4.8
    /// the response data must exactly echo an outstanding challenge on that
    /// same path; a response that matches no pending challenge is ignored
    /// rather than treated as an error, since it may be a stale duplicate.
    pub fn on_path_response(&mut self, remote_address: SocketAddr, data: [u8; 8]) {
        if let Some(id) = self.find(remote_address) {
            if self.paths[id.0].pending_challenge == Some(data) {
                self.paths[id.0].validated = true;
                self.paths[id.0].pending_challenge = None;
            }
        }
    }

    /// Switch the active path to `id`, e.g. once it is validated and chosen
    /// to replace the current path after a migration.
    pub fn migrate_active_to(&mut self, id: PathId) {
        self.active = id.0;
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    /// The path, if any, that has an outstanding PATH_CHALLENGE with this
    /// exact payload, for re-deriving which path a lost challenge belonged
    /// to on retransmission.
    pub fn path_with_pending_challenge(&self, data: [u8; 8]) -> Option<PathId> {
        self.paths
            .iter()
            .position(|p| p.pending_challenge == Some(data))
            .map(PathId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn migration_before_handshake_confirmed_is_protocol_violation() {
        let mut mgr = PathManager::new(addr(1));
        assert!(mgr.on_datagram_received(addr(2), 100).is_err());
    }

    #[test]
    fn migration_after_confirmed_creates_a_new_unvalidated_path() {
        let mut mgr = PathManager::new(addr(1));
        mgr.on_handshake_confirmed();
        let (id, migrated) = mgr.on_datagram_received(addr(2), 100).unwrap();
        assert!(migrated);
        assert!(!mgr.path(id).validated);
        assert_eq!(mgr.path(id).amplification_budget(), 300);
    }

    #[test]
    fn path_response_must_match_outstanding_challenge_on_same_path() {
        let mut mgr = PathManager::new(addr(1));
        mgr.on_handshake_confirmed();
        let (id, _) = mgr.on_datagram_received(addr(2), 10).unwrap();
        let challenge = mgr.initiate_validation(id);
        mgr.on_path_response(addr(2), [0xff; 8]);
        assert!(!mgr.path(id).validated);
        mgr.on_path_response(addr(2), challenge);
        assert!(mgr.path(id).validated);
    }

    #[test]
    fn validated_path_has_no_amplification_limit() {
        let mut mgr = PathManager::new(addr(1));
        mgr.active_path_mut().validated = true;
        assert_eq!(mgr.active_path().amplification_budget(), u64::MAX);
    }

    #[test]
    fn unvalidated_path_enforces_3x_factor() {
        let mgr_path = {
            let mut mgr = PathManager::new(addr(1));
            mgr.active_path_mut().on_bytes_received(50);
            mgr.active_path_mut().on_bytes_sent(140);
            mgr.active_path().amplification_budget()
        };
        assert_eq!(mgr_path, 10);
    }
}
