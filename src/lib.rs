//! A QUIC version 1 connection engine: packet/frame codec, per-space packet
//! number tracking, stream multiplexing, flow control, connection-ID
//! management, path validation/migration, and connection lifecycle.
//!
//! AEAD and header protection are out of scope (§1 Non-goals): the crate
//! operates on already-decrypted frame lists on ingress and hands back
//! plaintext frame-encoded payloads on egress, leaving packet protection and
//! socket I/O to a crypto/socket collaborator. See [`handshake::CryptoEngine`],
//! [`recovery::RecoveryController`], and [`socket::Socket`] for the narrow
//! interfaces those collaborators implement.

#[macro_use]
mod macros;

pub mod ack;
pub mod cid_manager;
pub mod config;
pub mod connection;
pub mod connection_id;
pub mod flow_control;
pub mod frame;
pub mod handshake;
pub mod lifecycle;
pub mod packet;
pub mod path;
pub mod pn_space;
pub mod recovery;
pub mod result;
pub mod socket;
pub mod stream;
pub mod transport_error;
pub mod test_support;
pub mod transport_parameters;
pub mod varint;

pub use config::EndpointConfig;
pub use connection::Connection;
pub use result::{QuicError, QuicResult};
