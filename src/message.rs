//! Byte collections with efficient operations for protocols.
//!
//! This module primarily implements the [`Message`] collection.

use std::collections::VecDeque;
use std::fmt::{self, Display};

mod chunk;
pub use chunk::Chunk;

/// A byte collection with efficient operations for implementing protocols.
///
/// When writing a networking protocol, it is standard to prepend headers,
/// cut segments out of a stream of queued bytes, and keep sent data around
/// until it is acknowledged. These operations should avoid copying wherever
/// possible. A message is a sequence of [`Chunk`]s whose backing allocations
/// are shared, so prepending, appending, and taking a prefix are all cheap.
#[derive(Debug, Clone, Default)]
pub struct Message {
    chunks: VecDeque<Chunk>,
    len: usize,
}

impl Message {
    /// Creates a new message with the given body content.
    pub fn new(body: impl Into<Chunk>) -> Self {
        let body = body.into();
        let len = body.len();
        let mut chunks = VecDeque::new();
        if len > 0 {
            chunks.push_back(body);
        }
        Self { chunks, len }
    }

    /// The number of bytes in the message.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the message contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Prepends the given header to the message.
    pub fn prepend(&mut self, header: impl Into<Chunk>) {
        let header = header.into();
        if header.is_empty() {
            return;
        }
        self.len += header.len();
        self.chunks.push_front(header);
    }

    /// Appends another message to the end of this one.
    pub fn append(&mut self, other: Message) {
        self.len += other.len;
        self.chunks.extend(other.chunks);
    }

    /// Removes and returns the first `count` bytes of the message. If the
    /// message is shorter than `count`, the whole message is taken. The
    /// backing chunks are shared with the returned message, not copied.
    pub fn take(&mut self, count: usize) -> Message {
        let count = count.min(self.len);
        let mut taken = Message::default();
        while taken.len < count {
            let mut chunk = self
                .chunks
                .pop_front()
                .expect("chunk list shorter than recorded length");
            let need = count - taken.len;
            if chunk.len() > need {
                let rest = chunk.split_off(need);
                self.chunks.push_front(rest);
            }
            taken.len += chunk.len();
            self.len -= chunk.len();
            taken.chunks.push_back(chunk);
        }
        taken
    }

    /// Iterates over the bytes of the message.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.as_slice().iter().copied())
    }

    /// Copies the message out into a contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.iter().collect()
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl Eq for Message {}

impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.iter().enumerate() {
            if i == 16 {
                return write!(f, "..");
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_and_iterate() {
        let mut message = Message::new(b"Body");
        message.prepend(b"Header");
        assert_eq!(message.len(), 10);
        assert!(message.iter().eq(b"HeaderBody".iter().cloned()));
    }

    #[test]
    fn take_splits_chunks() {
        let mut message = Message::new(b"Hello, ");
        message.append(Message::new(b"world!"));
        let taken = message.take(9);
        assert_eq!(taken.to_vec(), b"Hello, wo");
        assert_eq!(message.to_vec(), b"rld!");
        assert_eq!(message.len(), 4);
    }

    #[test]
    fn take_past_the_end() {
        let mut message = Message::new(b"short");
        let taken = message.take(100);
        assert_eq!(taken.to_vec(), b"short");
        assert!(message.is_empty());
    }

    #[test]
    fn empty_messages_carry_no_chunks() {
        let mut message = Message::new(b"");
        message.prepend(b"");
        assert!(message.is_empty());
        assert_eq!(message.iter().count(), 0);
    }
}
