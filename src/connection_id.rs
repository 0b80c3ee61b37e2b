//! Connection IDs and stateless-reset tokens, §3/§4.7.

use bytes::{Buf, BufMut};

use crate::result::{require, QuicError, QuicResult};

pub const MAX_CID_LEN: usize = 20;
pub const RESET_TOKEN_LEN: usize = 16;

/// Opaque routing bytes, 0 or 4-20 bytes long (version 1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ConnectionId(Vec<u8>);

impl ConnectionId {
    pub fn new(bytes: Vec<u8>) -> QuicResult<Self> {
        require(
            bytes.is_empty() || (4..=MAX_CID_LEN).contains(&bytes.len()),
            "connection id must be 0 or 4-20 bytes",
        )?;
        Ok(Self(bytes))
    }

    /// Accepts any length <= 20; used while parsing a long header where a
    /// too-long CID means "drop the packet", not "reject this type".
    pub fn from_wire(bytes: Vec<u8>) -> QuicResult<Self> {
        require(bytes.len() <= MAX_CID_LEN, "connection id exceeds 20 bytes")?;
        Ok(Self(bytes))
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.0.len() as u8);
        buf.put_slice(&self.0);
    }

    pub fn decode<B: Buf>(buf: &mut B) -> QuicResult<Self> {
        let len = buf.get_u8() as usize;
        if buf.remaining() < len {
            return Err(QuicError::malformed("connection id: truncated"));
        }
        let mut bytes = vec![0u8; len];
        buf.copy_to_slice(&mut bytes);
        Self::from_wire(bytes)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// 16-byte token bound to one connection ID, carried in NEW_CONNECTION_ID
/// or the `stateless_reset_token` transport parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatelessResetToken([u8; RESET_TOKEN_LEN]);

impl StatelessResetToken {
    pub const ZEROED: Self = Self([0; RESET_TOKEN_LEN]);

    pub fn from_bytes(bytes: [u8; RESET_TOKEN_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; RESET_TOKEN_LEN] {
        &self.0
    }

    /// Recommended deterministic scheme of §4.7:
    /// `token = truncate16(MAC(static_key, cid_bytes))`. `static_key` is the
    /// single process-wide secret described in §9; it must not be rotated
    /// while any CID issued under it might still be live at a peer.
    pub fn derive(static_key: &[u8; 32], cid: &ConnectionId) -> Self {
        let mac = blake3::keyed_hash(static_key, cid.as_bytes());
        let mut token = [0u8; RESET_TOKEN_LEN];
        token.copy_from_slice(&mac.as_bytes()[..RESET_TOKEN_LEN]);
        Self(token)
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&self.0);
    }

    pub fn decode<B: Buf>(buf: &mut B) -> QuicResult<Self> {
        if buf.remaining() < RESET_TOKEN_LEN {
            return Err(QuicError::malformed("stateless reset token: truncated"));
        }
        let mut bytes = [0u8; RESET_TOKEN_LEN];
        buf.copy_to_slice(&mut bytes);
        Ok(Self(bytes))
    }
}
