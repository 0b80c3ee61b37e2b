//! Send-side stream state machine, RFC 9000 §3.1 / this crate's §4.5.
//!
//! `Ready -> Send -> DataSent -> DataRecvd`, or `(Ready|Send) -> ResetSent ->
//! ResetRecvd`. Queued bytes are handed out to the packetizer in offset
//! order and retired once the PN-space engine reports them acked.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::result::{require, QuicResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Ready,
    Send,
    DataSent,
    DataRecvd,
    ResetSent,
    ResetRecvd,
}

struct Chunk {
    offset: u64,
    data: Bytes,
}

pub struct SendStream {
    state: SendState,
    /// Total bytes ever queued via `write`/`finish`.
    write_offset: u64,
    /// Prefix of `write_offset` confirmed acked by the peer.
    acked_offset: u64,
    final_size: Option<u64>,
    /// Unacked bytes, in ascending offset order; may contain gaps already
    /// acked and pruned from the front.
    queue: VecDeque<Chunk>,
    reset_error_code: Option<u64>,
}

impl SendStream {
    pub fn new() -> Self {
        Self {
            state: SendState::Ready,
            write_offset: 0,
            acked_offset: 0,
            final_size: None,
            queue: VecDeque::new(),
            reset_error_code: None,
        }
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn final_size(&self) -> Option<u64> {
        self.final_size
    }

    /// Queue `data` for transmission. Fails if the stream has already been
    /// finished or reset, per the state diagram.
    pub fn write(&mut self, data: Bytes) -> QuicResult<()> {
        require(
            matches!(self.state, SendState::Ready | SendState::Send),
            "write after stream finished or reset",
        )?;
        if data.is_empty() {
            return Ok(());
        }
        self.state = SendState::Send;
        let offset = self.write_offset;
        self.write_offset += data.len() as u64;
        self.queue.push_back(Chunk { offset, data });
        Ok(())
    }

    /// Mark the stream finished; `write_offset` becomes the final size.
    pub fn finish(&mut self) -> QuicResult<()> {
        require(
            matches!(self.state, SendState::Ready | SendState::Send),
            "finish after stream already finished or reset",
        )?;
        self.final_size = Some(self.write_offset);
        self.state = SendState::Send; // -> DataSent once the FIN frame ships
        Ok(())
    }

    /// The FIN itself has been placed in an outgoing packet.
    pub fn on_fin_sent(&mut self) {
        if self.final_size.is_some() && self.queue.is_empty() {
            self.state = SendState::DataSent;
        }
    }

    pub fn reset(&mut self, error_code: u64) -> QuicResult<()> {
        require(
            !matches!(self.state, SendState::ResetSent | SendState::ResetRecvd),
            "reset after stream already reset",
        )?;
        self.final_size.get_or_insert(self.write_offset);
        self.reset_error_code = Some(error_code);
        self.state = SendState::ResetSent;
        self.queue.clear();
        Ok(())
    }

    pub fn on_reset_acked(&mut self) {
        if self.state == SendState::ResetSent {
            self.state = SendState::ResetRecvd;
        }
    }

    pub fn reset_error_code(&self) -> Option<u64> {
        self.reset_error_code
    }

    /// Next chunk of unacked data, up to `max_len` bytes, to place in an
    /// outgoing STREAM frame, without removing it from the retransmission
    /// queue (removal happens on ack, §4.4 idempotent-data category).
    pub fn peek_pending(&self, max_len: usize) -> Option<(u64, Bytes)> {
        let chunk = self.queue.front()?;
        let len = max_len.min(chunk.data.len());
        Some((chunk.offset, chunk.data.slice(0..len)))
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty() || (self.final_size.is_some() && self.state == SendState::Send)
    }

    /// Record that `[offset, offset+len)` has been acknowledged, trimming or
    /// dropping queue entries as appropriate.
    pub fn on_data_acked(&mut self, offset: u64, len: u64) {
        if len == 0 {
            return;
        }
        let end = offset + len;
        while let Some(front) = self.queue.front_mut() {
            let front_end = front.offset + front.data.len() as u64;
            if front_end <= offset {
                break;
            }
            if front.offset >= end {
                break;
            }
            // the acked range fully covers this chunk
            if offset <= front.offset && end >= front_end {
                self.queue.pop_front();
                continue;
            }
            // partial ack of the front of this chunk
            if offset <= front.offset {
                let trim = (end - front.offset) as usize;
                front.offset += trim as u64;
                front.data = front.data.slice(trim..);
            }
            break;
        }
        if offset <= self.acked_offset && end > self.acked_offset {
            self.acked_offset = end;
        } else if self.queue.is_empty() {
            self.acked_offset = self.acked_offset.max(end);
        }
        if let Some(final_size) = self.final_size {
            if self.acked_offset >= final_size && self.queue.is_empty() {
                self.state = SendState::DataRecvd;
            }
        }
    }
}

impl Default for SendStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_finish_then_full_ack_reaches_data_recvd() {
        let mut stream = SendStream::new();
        stream.write(Bytes::from_static(b"hello")).unwrap();
        stream.finish().unwrap();
        assert_eq!(stream.final_size(), Some(5));
        stream.on_data_acked(0, 5);
        stream.on_fin_sent();
        assert_eq!(stream.state(), SendState::DataRecvd);
    }

    #[test]
    fn partial_ack_trims_front_of_queue() {
        let mut stream = SendStream::new();
        stream.write(Bytes::from_static(b"hello world")).unwrap();
        stream.on_data_acked(0, 6);
        let (offset, data) = stream.peek_pending(100).unwrap();
        assert_eq!(offset, 6);
        assert_eq!(&data[..], b"world");
    }

    #[test]
    fn write_after_finish_is_rejected() {
        let mut stream = SendStream::new();
        stream.finish().unwrap();
        assert!(stream.write(Bytes::from_static(b"oops")).is_err());
    }

    #[test]
    fn reset_clears_pending_queue_and_fixes_final_size() {
        let mut stream = SendStream::new();
        stream.write(Bytes::from_static(b"partial")).unwrap();
        stream.reset(4).unwrap();
        assert_eq!(stream.final_size(), Some(7));
        assert!(!stream.has_pending());
        assert_eq!(stream.state(), SendState::ResetSent);
        stream.on_reset_acked();
        assert_eq!(stream.state(), SendState::ResetRecvd);
    }

    #[test]
    fn double_reset_is_rejected_once_acked() {
        let mut stream = SendStream::new();
        stream.reset(1).unwrap();
        stream.on_reset_acked();
        assert!(stream.reset(2).is_err());
    }
}
