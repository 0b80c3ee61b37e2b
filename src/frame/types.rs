//! Frame type codepoints, §4.3. STREAM (0x08-0x0f) and ACK (0x02-0x03) are
//! base values with low bits carrying flags; see `frame.rs` for how those
//! flags are folded in and out of the type byte.

crate::frame_types! {
    PADDING = 0x00,
    PING = 0x01,
    ACK = 0x02,
    ACK_ECN = 0x03,
    RESET_STREAM = 0x04,
    STOP_SENDING = 0x05,
    CRYPTO = 0x06,
    NEW_TOKEN = 0x07,
    STREAM = 0x08,
    MAX_DATA = 0x10,
    MAX_STREAM_DATA = 0x11,
    MAX_STREAMS_BIDI = 0x12,
    MAX_STREAMS_UNI = 0x13,
    DATA_BLOCKED = 0x14,
    STREAM_DATA_BLOCKED = 0x15,
    STREAMS_BLOCKED_BIDI = 0x16,
    STREAMS_BLOCKED_UNI = 0x17,
    NEW_CONNECTION_ID = 0x18,
    RETIRE_CONNECTION_ID = 0x19,
    PATH_CHALLENGE = 0x1a,
    PATH_RESPONSE = 0x1b,
    CONNECTION_CLOSE_TRANSPORT = 0x1c,
    CONNECTION_CLOSE_APPLICATION = 0x1d,
    HANDSHAKE_DONE = 0x1e,
}

/// Which packet types (by encryption level) a frame type is permitted in,
/// per the §4.3 table. `Header::packet_type_allows` in `frame.rs` consults
/// this when dispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketSpaceClass {
    /// Initial and Handshake spaces (PADDING, PING, ACK, CRYPTO, CONNECTION_CLOSE).
    CryptoOnly,
    /// Application data space only (0-RTT and 1-RTT).
    ApplicationOnly,
    /// Permitted everywhere.
    Any,
    /// CONNECTION_CLOSE(transport) only: everywhere; CONNECTION_CLOSE(app): 0-RTT/1-RTT only.
    CloseTransport,
    CloseApplication,
}
