use std::ops::Range;
use std::sync::Arc;

// A chunk is a window into an `Arc<[u8]>`. Splitting one for segmentation
// or holding one on the retransmission queue shares the allocation instead
// of copying it. The From impls let Message constructors accept a variety
// of byte sources.

/// A piece of a [Message](super::Message): a view over shared, immutable
/// bytes.
#[derive(Debug, Clone)]
pub struct Chunk {
    bytes: Arc<[u8]>,
    range: Range<usize>,
}

impl Chunk {
    /// Returns a new chunk spanning all of the given bytes.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        let range = 0..bytes.len();
        Self { bytes, range }
    }

    /// The viewed bytes as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[self.range.clone()]
    }

    /// The number of bytes in the chunk.
    pub fn len(&self) -> usize {
        self.range.len()
    }

    /// Whether the chunk views no bytes.
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Splits the chunk in two at the given index. `self` keeps the first
    /// `at` bytes and the remainder is returned. Both halves keep viewing
    /// the same allocation.
    pub fn split_off(&mut self, at: usize) -> Chunk {
        assert!(at <= self.len());
        let split = self.range.start + at;
        let rest = Chunk {
            bytes: self.bytes.clone(),
            range: split..self.range.end,
        };
        self.range.end = split;
        rest
    }
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Chunk {}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for Chunk {
    fn from(slice: &[u8]) -> Self {
        Self::new(slice)
    }
}

impl<const N: usize> From<&[u8; N]> for Chunk {
    fn from(array: &[u8; N]) -> Self {
        Self::new(array.as_slice())
    }
}

impl From<&str> for Chunk {
    fn from(string: &str) -> Self {
        Self::new(string.as_bytes())
    }
}
