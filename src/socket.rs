//! Datagram socket collaborator interface, §6.

use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;

use crate::result::QuicResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcnCodepoint {
    NotEct,
    Ect0,
    Ect1,
    Ce,
}

pub trait Socket {
    fn send(
        &mut self,
        datagram: &[u8],
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        ecn_codepoint: EcnCodepoint,
    ) -> QuicResult<()>;

    fn receive(
        &mut self,
    ) -> QuicResult<Option<(Bytes, SocketAddr, SocketAddr, EcnCodepoint, Instant)>>;
}
