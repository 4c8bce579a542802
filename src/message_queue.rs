//! Strict FIFO of complete OpenFlow frames.
//!
//! The send queue additionally remembers how much of its head frame the socket
//! has already accepted, so a partial write resumes where it stopped.

use std::collections::VecDeque;

use bytes::Bytes;

/// Ordered buffer of frames waiting to be written to, or dispatched from, the
/// secure channel.
#[derive(Debug, Default)]
pub struct MessageQueue {
    frames: VecDeque<Bytes>,
    /// Bytes of the head frame already written.
    head_offset: usize,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued frames, including a partially written head.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Append a frame at the tail.
    pub fn enqueue(&mut self, frame: Bytes) {
        self.frames.push_back(frame);
    }

    /// Remove and return the head frame.
    ///
    /// Never used on a queue with a partially written head; the send path
    /// only advances through `consume`.
    pub fn dequeue(&mut self) -> Option<Bytes> {
        self.head_offset = 0;
        self.frames.pop_front()
    }

    /// The unwritten remainder of the head frame.
    pub fn pending(&self) -> Option<&[u8]> {
        self.frames.front().map(|f| &f[self.head_offset..])
    }

    /// Record that `n` bytes of the head frame reached the socket. Pops the
    /// head once it has been written completely.
    pub fn consume(&mut self, n: usize) {
        let Some(head) = self.frames.front() else {
            return;
        };
        self.head_offset += n;
        if self.head_offset >= head.len() {
            self.frames.pop_front();
            self.head_offset = 0;
        }
    }

    /// Total bytes still to be written or dispatched.
    pub fn pending_bytes(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum::<usize>() - self.head_offset
    }
}
