//! End-to-end scenario 4: once established, the client rebinds to a new
//! local address (simulated by sending from a new socket tuple). The server
//! treats the first datagram from that tuple as a possible migration,
//! challenges it, and only switches its active path once the matching
//! PATH_RESPONSE arrives.

mod common;

use std::time::Instant;

use common::{addr, connection, decode_frames, generous_params};
use mini_quic::frame::Frame;
use mini_quic::packet::PacketNumberSpace;
use mini_quic::socket::EcnCodepoint;
use mini_quic::stream::Side;

#[test]
fn migration_requires_validation_before_the_path_switches() {
    let now = Instant::now();
    let client_addr = addr(1);
    let client_new_addr = addr(3);
    let server_addr = addr(2);

    let mut client = connection(Side::Client, server_addr, generous_params());
    let mut server = connection(Side::Server, client_addr, generous_params());

    client.on_peer_transport_parameters(generous_params()).unwrap();
    server.on_peer_transport_parameters(generous_params()).unwrap();

    let handshake_done = [Frame::HandshakeDone];
    server
        .on_packet(PacketNumberSpace::Application, 999, &handshake_done, client_addr, 32, EcnCodepoint::NotEct, 0, now)
        .unwrap();
    client
        .on_packet(PacketNumberSpace::Application, 999, &handshake_done, server_addr, 32, EcnCodepoint::NotEct, 0, now)
        .unwrap();

    assert_eq!(server.remote_address(), client_addr);

    // A non-probing datagram arrives from a new tuple: the server treats it
    // as a migration in progress and challenges it rather than switching
    // over immediately.
    server
        .on_packet(
            PacketNumberSpace::Application,
            1,
            &[Frame::Ping],
            client_new_addr,
            32,
            EcnCodepoint::NotEct,
            0,
            now,
        )
        .unwrap();
    assert_eq!(server.remote_address(), client_addr);

    let (pn, payload) = server.poll_transmit(PacketNumberSpace::Application, now).unwrap().unwrap();
    let frames = decode_frames(&payload).unwrap();
    let challenge = frames
        .iter()
        .find_map(|f| match f {
            Frame::PathChallenge { data } => Some(*data),
            _ => None,
        })
        .expect("server queues a PATH_CHALLENGE for the new path");

    client
        .on_packet(
            PacketNumberSpace::Application,
            pn + 1,
            &frames,
            server_addr,
            payload.len() as u64,
            EcnCodepoint::NotEct,
            0,
            now,
        )
        .unwrap();

    let response = [Frame::PathResponse { data: challenge }];
    server
        .on_packet(
            PacketNumberSpace::Application,
            2,
            &response,
            client_new_addr,
            32,
            EcnCodepoint::NotEct,
            0,
            now,
        )
        .unwrap();

    assert_eq!(server.remote_address(), client_new_addr);
}
