//! Growable byte buffer with a hard capacity ceiling.
//!
//! Every per-connection buffer in the server (request head, request body,
//! WebSocket frame accumulation, fragment reassembly) is a [`ByteBuf`]: a
//! plain `Vec<u8>` with a doubling growth policy capped at a configured
//! ceiling, so a misbehaving peer can never make a connection allocate more
//! than its limits allow.

use crate::errors::Error;

/// Owned byte buffer bounded by a hard ceiling.
///
/// Growth on append follows `new_capacity = max(capacity * 2, needed)`,
/// clamped to the ceiling. An append that would exceed the ceiling fails
/// with [`Error::OutOfCapacity`] and leaves the buffer untouched.
#[derive(Debug)]
pub(crate) struct ByteBuf {
    data: Vec<u8>,
    ceiling: usize,
    label: &'static str,
}

impl ByteBuf {
    pub(crate) fn with_ceiling(initial: usize, ceiling: usize, label: &'static str) -> Self {
        Self {
            data: Vec::with_capacity(initial.min(ceiling)),
            ceiling,
            label,
        }
    }

    /// Appends `bytes`, growing if needed. Fails without mutating when the
    /// result would exceed the ceiling.
    pub(crate) fn append(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let needed = self.data.len() + bytes.len();
        if needed > self.ceiling {
            return Err(Error::OutOfCapacity(self.label));
        }
        if needed > self.data.capacity() {
            let target = (self.data.capacity() * 2).max(needed).min(self.ceiling);
            self.data.reserve_exact(target - self.data.len());
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Pre-grows the buffer so that `n` more bytes fit without reallocation.
    pub(crate) fn reserve(&mut self, n: usize) -> Result<(), Error> {
        let needed = self.data.len() + n;
        if needed > self.ceiling {
            return Err(Error::OutOfCapacity(self.label));
        }
        if needed > self.data.capacity() {
            self.data.reserve_exact(needed - self.data.len());
        }
        Ok(())
    }

    /// Zeroes the length but keeps the allocation; used between keep-alive
    /// exchanges.
    pub(crate) fn reset(&mut self) {
        self.data.clear();
    }

    /// Removes the first `n` bytes, shifting the remainder to the front.
    pub(crate) fn consume(&mut self, n: usize) {
        self.data.drain(..n);
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Hands the accumulated bytes out and leaves an empty buffer behind.
    pub(crate) fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }
}

impl AsRef<[u8]> for ByteBuf {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
