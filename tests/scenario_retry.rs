//! End-to-end scenario 2: Retry-based address validation. The glue layer
//! (packet-header parsing, out of this crate's scope) hands the client's
//! original destination connection ID to `begin_retry_validation` once a
//! Retry packet is observed; the connection then requires the server to
//! echo it back in `original_connection_id` before the handshake may
//! proceed.

mod common;

use std::time::Instant;

use common::{addr, connection, generous_params};
use mini_quic::connection_id::ConnectionId;
use mini_quic::stream::Side;
use mini_quic::transport_error::TransportErrorCode;
use mini_quic::transport_parameters::TransportParameters;

#[test]
fn server_must_echo_the_original_destination_connection_id_after_retry() {
    let now = Instant::now();
    let server_addr = addr(2);
    let original_dcid = ConnectionId::new(vec![0xAA; 8]).unwrap();

    let mut client = connection(Side::Client, server_addr, generous_params());
    client.begin_retry_validation(original_dcid.clone());

    let params_missing_odcid = generous_params();
    let err = client.on_peer_transport_parameters(params_missing_odcid).unwrap_err();
    assert_eq!(err.transport_code(), Some(TransportErrorCode::TransportParameterError));

    let params_wrong_odcid = TransportParameters {
        original_connection_id: Some(ConnectionId::new(vec![0xBB; 8]).unwrap()),
        ..generous_params()
    };
    let mut client = connection(Side::Client, server_addr, generous_params());
    client.begin_retry_validation(original_dcid.clone());
    let err = client.on_peer_transport_parameters(params_wrong_odcid).unwrap_err();
    assert_eq!(err.transport_code(), Some(TransportErrorCode::TransportParameterError));

    let mut client = connection(Side::Client, server_addr, generous_params());
    client.begin_retry_validation(original_dcid.clone());
    let params_matching_odcid = TransportParameters {
        original_connection_id: Some(original_dcid),
        ..generous_params()
    };
    client.on_peer_transport_parameters(params_matching_odcid).unwrap();
}
