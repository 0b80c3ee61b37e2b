//! End-to-end scenario 3: a stream-level flow-control violation. The client
//! fills its advertised send credit, blocks, is granted more credit by an
//! autotuned MAX_STREAM_DATA update, and sends again. Then a peer that
//! ignores the limit the client advertised for its own receive direction is
//! rejected with FLOW_CONTROL_ERROR.

mod common;

use std::time::Instant;

use bytes::Bytes;
use common::{addr, connection, generous_params, relay};
use mini_quic::frame::Frame;
use mini_quic::packet::PacketNumberSpace;
use mini_quic::socket::EcnCodepoint;
use mini_quic::stream::{Directionality, Side};
use mini_quic::transport_error::TransportErrorCode;
use mini_quic::transport_parameters::TransportParameters;

#[test]
fn blocked_stream_unblocks_on_credit_update_then_overrun_is_rejected() {
    let now = Instant::now();
    let client_addr = addr(1);
    let server_addr = addr(2);

    let client_params = TransportParameters {
        initial_max_stream_data_bidi_local: 150,
        ..generous_params()
    };
    let server_params = TransportParameters {
        initial_max_stream_data_bidi_remote: 100,
        ..generous_params()
    };

    let mut client = connection(Side::Client, server_addr, client_params.clone());
    let mut server = connection(Side::Server, client_addr, server_params.clone());

    client.on_peer_transport_parameters(server_params).unwrap();
    server.on_peer_transport_parameters(client_params).unwrap();

    let stream = client.open_stream(Directionality::Bidi).unwrap();

    client.write(stream, Bytes::from(vec![0u8; 100])).unwrap();
    assert!(client.write(stream, Bytes::from_static(b"x")).is_err());

    assert!(relay(&mut client, &mut server, PacketNumberSpace::Application, client_addr, now).unwrap());
    assert!(relay(&mut server, &mut client, PacketNumberSpace::Application, server_addr, now).unwrap());

    client.write(stream, Bytes::from(vec![0u8; 50])).unwrap();

    let overrun = [Frame::Stream {
        stream_id: stream,
        offset: 200,
        fin: false,
        data: Bytes::from(vec![0u8; 10]),
    }];
    let err = client
        .on_packet(PacketNumberSpace::Application, 1, &overrun, server_addr, 64, EcnCodepoint::NotEct, 0, now)
        .unwrap_err();
    assert_eq!(err.transport_code(), Some(TransportErrorCode::FlowControlError));
}
