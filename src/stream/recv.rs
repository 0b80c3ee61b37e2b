//! Receive-side stream state machine, RFC 9000 §3.2 / this crate's §4.5.
//!
//! `Recv -> (SizeKnown) -> DataRecvd -> DataRead`, or `Recv -> ResetRecvd ->
//! ResetRead`. Out-of-order STREAM frames are reassembled in `chunks` keyed
//! by start offset; `read_offset` is the contiguous prefix already handed
//! to the application.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::{
    result::{require, QuicError, QuicResult},
    transport_error::TransportErrorCode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    Recv,
    DataRecvd,
    DataRead,
    ResetRecvd,
    ResetRead,
}

pub struct RecvStream {
    state: RecvState,
    read_offset: u64,
    highest_received: u64,
    final_size: Option<u64>,
    chunks: BTreeMap<u64, Bytes>,
    reset_error_code: Option<u64>,
}

impl RecvStream {
    pub fn new() -> Self {
        Self {
            state: RecvState::Recv,
            read_offset: 0,
            highest_received: 0,
            final_size: None,
            chunks: BTreeMap::new(),
            reset_error_code: None,
        }
    }

    pub fn state(&self) -> RecvState {
        self.state
    }

    pub fn highest_received(&self) -> u64 {
        self.highest_received
    }

    /// Newly-received byte count a STREAM frame at `offset` of `data_len`
    /// bytes would contribute, without admitting it. Lets a caller charge
    /// connection-level flow control before committing the frame via
    /// `on_stream_frame`.
    pub fn new_bytes_for(&self, offset: u64, data_len: usize) -> u64 {
        let end = offset + data_len as u64;
        end.saturating_sub(self.highest_received.max(offset)).min(data_len as u64)
    }

    pub fn final_size(&self) -> Option<u64> {
        self.final_size
    }

    /// Ingest a STREAM frame's payload. Returns the number of newly-received
    /// bytes (for flow-control credit bookkeeping); overlapping retransmits
    /// contribute 0.
    pub fn on_stream_frame(&mut self, offset: u64, data: &Bytes, fin: bool) -> QuicResult<u64> {
        require(
            !matches!(self.state, RecvState::ResetRecvd | RecvState::ResetRead),
            "stream data received after reset",
        )?;
        let end = offset + data.len() as u64;
        self.check_final_size_consistency(end, fin)?;

        let new_bytes = end.saturating_sub(self.highest_received.max(offset)).min(data.len() as u64);
        self.highest_received = self.highest_received.max(end);

        if end > self.read_offset {
            let start = offset.max(self.read_offset);
            let trim = (start - offset) as usize;
            if trim < data.len() {
                self.chunks.insert(start, data.slice(trim..));
                self.merge_overlaps();
            }
        }

        if fin {
            self.final_size = Some(end);
        }
        if let Some(final_size) = self.final_size {
            if self.read_offset >= final_size {
                self.state = RecvState::DataRecvd;
            }
        }
        Ok(new_bytes)
    }

    fn check_final_size_consistency(&mut self, end: u64, fin: bool) -> QuicResult<()> {
        if let Some(final_size) = self.final_size {
            if end > final_size || (fin && end != final_size) {
                return Err(QuicError::transport(
                    TransportErrorCode::FinalSizeError,
                    "stream data extends past a previously-signaled final size",
                ));
            }
        }
        Ok(())
    }

    /// Clip chunks that overlap an already-admitted earlier chunk, so the
    /// map always holds disjoint, offset-ascending ranges.
    fn merge_overlaps(&mut self) {
        let mut merged: BTreeMap<u64, Bytes> = BTreeMap::new();
        let mut next_free = self.read_offset;
        for (&start, data) in self.chunks.iter() {
            let clipped_start = start.max(next_free);
            let trim = (clipped_start - start) as usize;
            if trim >= data.len() {
                continue;
            }
            let clipped = data.slice(trim..);
            next_free = clipped_start + clipped.len() as u64;
            merged.insert(clipped_start, clipped);
        }
        self.chunks = merged;
    }

    /// Deliver up to `max_len` contiguous bytes to the application.
    pub fn read(&mut self, max_len: usize) -> Option<Bytes> {
        let (&start, data) = self.chunks.iter().next()?;
        if start != self.read_offset {
            return None;
        }
        let take = max_len.min(data.len());
        let out = data.slice(0..take);
        if take == data.len() {
            self.chunks.remove(&start);
        } else {
            let remainder = data.slice(take..);
            self.chunks.remove(&start);
            self.chunks.insert(start + take as u64, remainder);
        }
        self.read_offset += take as u64;
        if let Some(final_size) = self.final_size {
            if self.read_offset >= final_size && self.state == RecvState::DataRecvd {
                self.state = RecvState::DataRead;
            }
        }
        Some(out)
    }

    pub fn on_reset(&mut self, error_code: u64, final_size: u64) -> QuicResult<()> {
        self.check_final_size_consistency(final_size, true)?;
        self.reset_error_code = Some(error_code);
        self.final_size = Some(final_size);
        self.highest_received = self.highest_received.max(final_size);
        self.state = RecvState::ResetRecvd;
        self.chunks.clear();
        Ok(())
    }

    pub fn on_reset_delivered(&mut self) {
        if self.state == RecvState::ResetRecvd {
            self.state = RecvState::ResetRead;
        }
    }

    pub fn reset_error_code(&self) -> Option<u64> {
        self.reset_error_code
    }
}

impl Default for RecvStream {
    fn default() -> Self {
        Self::new()
    }
}
