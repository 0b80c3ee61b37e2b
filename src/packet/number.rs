//! Packet numbers and packet-number-space identity, §3/§4.2.

use crate::result::{require, QuicResult};

/// The three independent packet-number spaces, §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PacketNumberSpace {
    Initial,
    Handshake,
    /// Shared between 0-RTT and 1-RTT packets, §4.9.
    Application,
}

impl PacketNumberSpace {
    pub const ALL: [PacketNumberSpace; 3] = [
        PacketNumberSpace::Initial,
        PacketNumberSpace::Handshake,
        PacketNumberSpace::Application,
    ];
}

/// A full, untruncated packet number. Must never exceed 2^62-1 (§3); the
/// caller is responsible for terminating the connection without a
/// CONNECTION_CLOSE when incrementing would overflow that bound.
pub const PACKET_NUMBER_MAX: u64 = (1 << 62) - 1;

/// How many bytes of a packet number are carried on the wire (1-4, §4.2).
/// The sender picks this so the encodable range exceeds twice the
/// outstanding-unacknowledged range.
pub fn packet_number_len(full_pn: u64, largest_acked: Option<u64>) -> QuicResult<u8> {
    let unacked_range = match largest_acked {
        Some(acked) => full_pn.saturating_sub(acked),
        None => full_pn + 1,
    };
    // encodable range for b bytes is 2^(8b); need it to exceed 2 * unacked_range.
    let needed = unacked_range.saturating_mul(2).saturating_add(1);
    let len = if needed <= 1 << 8 {
        1
    } else if needed <= 1 << 16 {
        2
    } else if needed <= 1 << 24 {
        3
    } else {
        4
    };
    require(full_pn <= PACKET_NUMBER_MAX, "packet number exceeds 2^62-1")?;
    Ok(len)
}

/// Truncate a full packet number to its low `len` bytes for wire encoding.
pub fn truncate(full_pn: u64, len: u8) -> u64 {
    let bits = 8 * len as u32;
    full_pn & ((1u64 << bits) - 1)
}

/// Packet-number recovery, §4.2: reconstruct the full packet number from a
/// truncated value, given the largest successfully-authenticated PN seen so
/// far in this space.
pub fn expand(truncated: u64, len: u8, largest_received: Option<u64>) -> u64 {
    let bits = 8 * len as u32;
    let window = 1u64 << bits;
    let half = window / 2;
    let expected = largest_received.map(|pn| pn + 1).unwrap_or(0);
    let candidate = (expected & !(window - 1)) | truncated;

    if candidate + half <= expected {
        // candidate is too far behind to be a plausible successor; the
        // "real" value must be one window higher.
        match candidate.checked_add(window) {
            Some(bumped) if bumped <= PACKET_NUMBER_MAX => bumped,
            _ => candidate,
        }
    } else if candidate > expected + half && candidate >= window {
        candidate - window
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_recovers_pn_within_half_window() {
        // classic RFC 9000 appendix A.3 example: largest received 0xa82f30ea,
        // truncated 2-byte value 0x9b32 expands to 0xa82f9b32.
        let largest = 0xa82f_30ea;
        let full = expand(0x9b32, 2, Some(largest));
        assert_eq!(full, 0xa82f_9b32);
    }

    #[test]
    fn truncate_then_expand_round_trips_for_plausible_sequences() {
        let mut largest: Option<u64> = None;
        for full_pn in [0u64, 1, 2, 100, 101, 4096, 4097, 1_000_000] {
            let len = packet_number_len(full_pn, largest).unwrap();
            let truncated = truncate(full_pn, len);
            let recovered = expand(truncated, len, largest);
            assert_eq!(recovered, full_pn, "pn={} len={}", full_pn, len);
            largest = Some(full_pn);
        }
    }

    #[test]
    fn first_packet_in_a_space_expands_from_truncated_zero() {
        assert_eq!(expand(0, 1, None), 0);
    }
}
