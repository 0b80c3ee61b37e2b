//! Splitting a coalesced UDP datagram into its component QUIC packets, §4.2.
//!
//! A datagram may carry multiple packets of ascending encryption level, each
//! protected long-header packet announcing its own length so the next
//! packet's header can be found; a short-header packet, if present, is
//! always last and consumes the rest of the datagram. Senders must not mix
//! connections in one datagram; this module only concerns itself with
//! finding packet boundaries, not connection routing.

use bytes::{Buf, Bytes};

use crate::{
    packet::header::Header,
    result::{require, QuicResult},
};

/// Split `datagram` into the byte ranges (header bytes included) of each
/// contained packet, in order. Each failing-to-parse remainder aborts
/// further splitting (we can no longer find packet boundaries), but the
/// packets already recovered are still returned for independent processing
/// per §4.2 ("a failing decrypt on one does not prevent processing of
/// subsequent packets" — that independence is about decryption, which
/// happens downstream of this split).
pub fn split_coalesced(datagram: Bytes, short_dcid_len: usize) -> QuicResult<Vec<Bytes>> {
    let mut offset = 0usize;
    let mut packets = Vec::new();

    while offset < datagram.len() {
        let remaining = datagram.slice(offset..);
        let mut cursor = remaining.clone();
        let before = cursor.remaining();
        let header = Header::decode(&mut cursor, short_dcid_len)?;
        let header_len = before - cursor.remaining();

        let packet_len = match &header {
            Header::Initial { length, .. }
            | Header::ZeroRtt { length, .. }
            | Header::Handshake { length, .. } => header_len + length.as_usize()?,
            Header::Retry { .. } | Header::VersionNegotiation { .. } | Header::Short { .. } => {
                remaining.len()
            }
        };

        require(
            packet_len > 0 && packet_len <= remaining.len(),
            "coalesced packet length exceeds remaining datagram",
        )?;

        packets.push(datagram.slice(offset..offset + packet_len));
        offset += packet_len;
    }

    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connection_id::ConnectionId, varint::VarInt};
    use bytes::{BufMut, BytesMut};

    fn cid(bytes: &[u8]) -> ConnectionId {
        ConnectionId::new(bytes.to_vec()).unwrap()
    }

    #[test]
    fn splits_initial_coalesced_with_handshake() {
        let mut datagram = BytesMut::new();

        let initial = Header::Initial {
            version: 1,
            dcid: cid(&[1, 2, 3, 4]),
            scid: cid(&[5, 6, 7, 8]),
            token: Bytes::new(),
            length: VarInt::new_u32(4),
            protected_bits: 0,
        };
        initial.encode(&mut datagram);
        datagram.put_slice(&[0xaa; 4]); // fake PN + payload

        let handshake = Header::Handshake {
            version: 1,
            dcid: cid(&[1, 2, 3, 4]),
            scid: cid(&[5, 6, 7, 8]),
            length: VarInt::new_u32(3),
            protected_bits: 0,
        };
        handshake.encode(&mut datagram);
        datagram.put_slice(&[0xbb; 3]);

        let packets = split_coalesced(datagram.freeze(), 8).unwrap();
        assert_eq!(packets.len(), 2);

        let mut first = packets[0].clone();
        let decoded_first = Header::decode(&mut first, 8).unwrap();
        assert!(matches!(decoded_first, Header::Initial { .. }));

        let mut second = packets[1].clone();
        let decoded_second = Header::decode(&mut second, 8).unwrap();
        assert!(matches!(decoded_second, Header::Handshake { .. }));
    }

    #[test]
    fn short_header_consumes_the_rest_of_the_datagram() {
        let mut datagram = BytesMut::new();
        let short = Header::Short {
            dcid: cid(&[1, 2, 3, 4]),
            protected: Bytes::from(vec![0xcc; 10]),
        };
        short.encode(&mut datagram);

        let packets = split_coalesced(datagram.freeze(), 4).unwrap();
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn truncated_length_field_fails_the_split() {
        let mut datagram = BytesMut::new();
        let initial = Header::Initial {
            version: 1,
            dcid: cid(&[1, 2, 3, 4]),
            scid: cid(&[5, 6, 7, 8]),
            token: Bytes::new(),
            length: VarInt::new_u32(100),
            protected_bits: 0,
        };
        initial.encode(&mut datagram);
        datagram.put_slice(&[0xaa; 4]); // much shorter than the announced length

        assert!(split_coalesced(datagram.freeze(), 8).is_err());
    }
}
