//! Append-only receive buffer with record boundary detection.
//!
//! Bytes read from the transport accumulate here until a complete record is
//! available. A record ends at the first blank line (`"\n\n"`) or at a single
//! record-separator byte (`0x1E`); a separator at the very start of the buffer
//! introduces the record rather than terminating an empty one.
//!
//! Capacity only grows. Consuming a record shifts the unconsumed tail to the
//! front once and keeps the allocation for the next read.

use std::collections::TryReserveError;

use thiserror::Error;

/// Record-separator control byte that delimits streamed records.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Errors raised while growing the buffer.
#[derive(Debug, Error)]
pub enum BufferError {
    /// The allocator refused to grow the backing store.
    #[error("failed to grow receive buffer to {requested} bytes: {source}")]
    Allocation {
        /// Capacity that was requested.
        requested: usize,
        /// Allocation failure reported by the standard library.
        #[source]
        source: TryReserveError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Boundary {
    /// First byte of the record payload.
    start: usize,
    /// One past the last byte of the record payload.
    end: usize,
    /// Bytes to drop from the front once the record is consumed.
    consumed: usize,
}

/// Growable byte buffer that frames streamed records.
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    bytes: Vec<u8>,
}

impl ReceiveBuffer {
    /// Creates an empty buffer without allocating.
    #[must_use]
    pub const fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Size of the backing store.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    /// The buffered bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Grows the backing store to hold at least `capacity` bytes.
    ///
    /// Does nothing when the current capacity already suffices.
    pub fn ensure_capacity(&mut self, capacity: usize) -> Result<(), BufferError> {
        if capacity <= self.bytes.capacity() {
            return Ok(());
        }
        let additional = capacity - self.bytes.len();
        self.bytes
            .try_reserve(additional)
            .map_err(|source| BufferError::Allocation {
                requested: capacity,
                source,
            })
    }

    /// Copies `data` onto the end of the buffer.
    pub fn append(&mut self, data: &[u8]) -> Result<(), BufferError> {
        self.ensure_capacity(self.bytes.len() + data.len())?;
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    /// Whether a complete record is buffered.
    #[must_use]
    pub fn has_complete_record(&self) -> bool {
        find_boundary(&self.bytes).is_some()
    }

    /// Borrows the first complete record, excluding its boundary marker.
    #[must_use]
    pub fn extract_record(&self) -> Option<&[u8]> {
        find_boundary(&self.bytes).and_then(|boundary| self.bytes.get(boundary.start..boundary.end))
    }

    /// Drops the first complete record and its boundary marker.
    ///
    /// Does nothing when no complete record is buffered.
    pub fn consume_record(&mut self) {
        if let Some(boundary) = find_boundary(&self.bytes) {
            self.discard_front(boundary.consumed);
        }
    }

    /// Extracts and consumes the first complete record.
    pub fn take_record(&mut self) -> Option<Vec<u8>> {
        let record = self.extract_record()?.to_vec();
        self.consume_record();
        Some(record)
    }

    /// Drops the first `count` bytes, keeping the allocation.
    pub fn discard_front(&mut self, count: usize) {
        if count >= self.bytes.len() {
            self.bytes.clear();
        } else {
            self.bytes.drain(..count);
        }
    }

    /// Empties the buffer without releasing capacity.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

fn find_boundary(bytes: &[u8]) -> Option<Boundary> {
    let start = usize::from(bytes.first() == Some(&RECORD_SEPARATOR));
    let body = bytes.get(start..)?;
    body.iter()
        .enumerate()
        .find_map(|(offset, byte)| match *byte {
            RECORD_SEPARATOR => Some(Boundary {
                start,
                end: start + offset,
                consumed: start + offset + 1,
            }),
            b'\n' if body.get(offset + 1) == Some(&b'\n') => Some(Boundary {
                start,
                end: start + offset,
                consumed: start + offset + 2,
            }),
            _ => None,
        })
}
