//! ACK ranges: the descending-order contiguous ack/gap spans carried in an
//! ACK frame (§4.3) and the in-memory structure the PN-space engine tracks
//! received packet numbers with (§4.4).

use std::collections::BTreeSet;

/// An inclusive range of acknowledged packet numbers, `smallest..=largest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRange {
    pub smallest: u64,
    pub largest: u64,
}

impl AckRange {
    pub fn len(&self) -> u64 {
        self.largest - self.smallest + 1
    }
}

/// A set of disjoint, non-adjacent packet-number ranges, stored smallest
/// range last (so `ranges.last()` is the lowest range and `ranges[0]` the
/// highest), matching the wire order of an ACK frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckRanges {
    ranges: Vec<AckRange>,
}

impl AckRanges {
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn largest(&self) -> Option<u64> {
        self.ranges.first().map(|r| r.largest)
    }

    pub fn ranges(&self) -> &[AckRange] {
        &self.ranges
    }

    pub fn contains(&self, pn: u64) -> bool {
        self.ranges
            .iter()
            .any(|r| pn >= r.smallest && pn <= r.largest)
    }

    /// Record a newly-received packet number, merging it into an existing
    /// range or inserting a new one. Ranges are kept sorted descending and
    /// coalesced when they become adjacent.
    pub fn insert(&mut self, pn: u64) {
        if self.contains(pn) {
            return;
        }
        let idx = self
            .ranges
            .iter()
            .position(|r| pn > r.largest)
            .unwrap_or(self.ranges.len());
        self.ranges.insert(
            idx,
            AckRange {
                smallest: pn,
                largest: pn,
            },
        );
        self.coalesce_around(idx);
    }

    fn coalesce_around(&mut self, idx: usize) {
        // merge with the range above (lower index, larger values)
        if idx > 0 && self.ranges[idx - 1].smallest == self.ranges[idx].largest + 1 {
            self.ranges[idx].largest = self.ranges[idx - 1].largest;
            self.ranges.remove(idx - 1);
            let idx = idx - 1;
            self.coalesce_around(idx);
            return;
        }
        // merge with the range below (higher index, smaller values)
        if idx + 1 < self.ranges.len() && self.ranges[idx].smallest == self.ranges[idx + 1].largest + 1 {
            self.ranges[idx].smallest = self.ranges[idx + 1].smallest;
            self.ranges.remove(idx + 1);
        }
    }

    /// Prune ranges once their acknowledgment by the peer is confirmed
    /// (§4.3: "retain and re-emit ack ranges until confirmed acknowledged;
    /// once confirmed, prune ranges to bound ACK-frame size"). Keeps only
    /// ranges whose largest PN is greater than `confirmed_up_to`.
    pub fn prune_confirmed(&mut self, confirmed_up_to: u64) {
        self.ranges.retain_mut(|range| {
            if range.largest <= confirmed_up_to {
                false
            } else {
                if range.smallest <= confirmed_up_to {
                    range.smallest = confirmed_up_to + 1;
                }
                true
            }
        });
    }

    /// Encode as (first_ack_range, [(gap, ack_range_len)]) in the wire's
    /// descending order, given the largest acknowledged PN is
    /// `self.largest()`.
    pub fn to_wire_ranges(&self) -> (u64, Vec<(u64, u64)>) {
        if self.ranges.is_empty() {
            return (0, Vec::new());
        }
        let first_ack_range = self.ranges[0].len() - 1;
        let mut rest = Vec::with_capacity(self.ranges.len().saturating_sub(1));
        for pair in self.ranges.windows(2) {
            let higher = pair[0];
            let lower = pair[1];
            let gap = higher.smallest - lower.largest - 2;
            let ack_range_len = lower.len() - 1;
            rest.push((gap, ack_range_len));
        }
        (first_ack_range, rest)
    }

    /// Reconstruct ranges from the wire's (largest, first_ack_range, gaps).
    pub fn from_wire_ranges(
        largest: u64,
        first_ack_range: u64,
        gaps: &[(u64, u64)],
    ) -> Option<Self> {
        let mut ranges = Vec::with_capacity(gaps.len() + 1);
        let mut smallest = largest.checked_sub(first_ack_range)?;
        ranges.push(AckRange { smallest, largest });

        let mut largest = smallest;
        for &(gap, ack_range_len) in gaps {
            // largest of next range = previous smallest - gap - 2
            largest = largest.checked_sub(gap)?.checked_sub(2)?;
            smallest = largest.checked_sub(ack_range_len)?;
            ranges.push(AckRange { smallest, largest });
            largest = smallest;
        }

        Some(Self { ranges })
    }

    pub fn iter_packet_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges
            .iter()
            .flat_map(|r| (r.smallest..=r.largest).collect::<BTreeSet<_>>())
    }
}
