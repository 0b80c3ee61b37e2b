//! End-to-end scenario 6: idle close. With no packets exchanged for the
//! negotiated idle timeout, both sides silently transition straight to
//! Closed, with nothing queued for the wire.

mod common;

use std::time::{Duration, Instant};

use common::{addr, connection, generous_params};
use mini_quic::lifecycle::LifecycleState;
use mini_quic::packet::PacketNumberSpace;
use mini_quic::stream::Side;
use mini_quic::transport_parameters::TransportParameters;

#[test]
fn idle_endpoints_close_silently_after_the_negotiated_timeout() {
    let now = Instant::now();
    let client_addr = addr(1);
    let server_addr = addr(2);
    let params = TransportParameters {
        idle_timeout_ms: 30_000,
        ..generous_params()
    };

    let mut client = connection(Side::Client, server_addr, params.clone());
    let mut server = connection(Side::Server, client_addr, params);

    assert_eq!(client.lifecycle_state(), LifecycleState::Handshaking);
    assert_eq!(server.lifecycle_state(), LifecycleState::Handshaking);

    let after_idle = now + Duration::from_secs(30);

    // The close deadline (set to `after_idle` itself, a zero close timeout
    // for a silent idle close) is only reached on a later tick, so the
    // first timer fire only starts closing.
    client.on_timer_fire(after_idle);
    server.on_timer_fire(after_idle);
    assert_eq!(client.lifecycle_state(), LifecycleState::Closing);
    assert_eq!(server.lifecycle_state(), LifecycleState::Closing);

    client.on_timer_fire(after_idle);
    server.on_timer_fire(after_idle);
    assert_eq!(client.lifecycle_state(), LifecycleState::Closed);
    assert_eq!(server.lifecycle_state(), LifecycleState::Closed);

    assert!(client
        .poll_transmit(PacketNumberSpace::Application, after_idle)
        .unwrap()
        .is_none());
    assert!(server
        .poll_transmit(PacketNumberSpace::Application, after_idle)
        .unwrap()
        .is_none());
}
