//! Shared scaffolding for the end-to-end scenario tests: two `Connection`s
//! driven against each other through an in-memory "datagram channel"
//! standing in for the socket layer. No real AEAD/crypto runs here; each
//! side's `poll_transmit` output is decoded straight back into frames and
//! handed to the peer's `on_packet`, exercising the codec and the core
//! bookkeeping without a TLS stack.

use std::net::SocketAddr;
use std::time::Instant;

use mini_quic::connection::Connection;
use mini_quic::config::EndpointConfig;
use mini_quic::frame::Frame;
use mini_quic::packet::PacketNumberSpace;
use mini_quic::recovery::NullRecovery;
use mini_quic::result::QuicResult;
use mini_quic::socket::EcnCodepoint;
use mini_quic::stream::Side;
use mini_quic::transport_parameters::TransportParameters;

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Transport parameters with symmetric per-stream and connection-level
/// flow-control limits, for scenarios that don't care about asymmetry.
pub fn generous_params() -> TransportParameters {
    TransportParameters {
        initial_max_data: 100_000,
        initial_max_stream_data_bidi_local: 10_000,
        initial_max_stream_data_bidi_remote: 10_000,
        initial_max_stream_data_uni: 10_000,
        initial_max_streams_bidi: 4,
        initial_max_streams_uni: 4,
        ..TransportParameters::default()
    }
}

pub fn connection(role: Side, remote: SocketAddr, params: TransportParameters) -> Connection {
    let config = EndpointConfig::new([9; 32]).shared();
    Connection::new(role, config, remote, params, Box::new(NullRecovery::default()), Instant::now())
}

/// Decode every frame out of a packet payload produced by `poll_transmit`.
pub fn decode_frames(mut payload: &[u8]) -> QuicResult<Vec<Frame>> {
    let mut frames = Vec::new();
    while !payload.is_empty() {
        frames.push(Frame::decode(&mut payload)?);
    }
    Ok(frames)
}

/// Drain everything `sender` has pending for `space` and deliver it to
/// `receiver` as a single packet. Returns `false` if there was nothing to
/// send.
pub fn relay(
    sender: &mut Connection,
    receiver: &mut Connection,
    space: PacketNumberSpace,
    from: SocketAddr,
    now: Instant,
) -> QuicResult<bool> {
    let Some((pn, payload)) = sender.poll_transmit(space, now)? else {
        return Ok(false);
    };
    let frames = decode_frames(&payload)?;
    receiver.on_packet(space, pn, &frames, from, payload.len() as u64, EcnCodepoint::NotEct, 0, now)?;
    Ok(true)
}
