//! Fixed-capacity debug log ring for the `DUMP_DEBUG` command.
//!
//! Debug messages are appended byte by byte at a write cursor. When the
//! cursor reaches capacity it resets to zero and the wrap flag is set; from
//! then on new bytes overwrite the oldest ones. Memory usage is bounded at
//! `capacity` bytes regardless of log volume.
//!
//! # Ordering
//!
//! Before the first wrap the chronological contents are `[0, cursor)`.
//! After it they are `[cursor, capacity)` followed by `[0, cursor)`.
//! [`DebugRing::segments`] returns those two slices separately so the dump
//! path can write them without copying.

use crate::constants::DUMP_SIZE;

/// Overwrite-on-wrap byte ring.
pub struct DebugRing {
    buf: Box<[u8]>,
    point: usize,
    wrapped: bool,
}

impl std::fmt::Debug for DebugRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugRing")
            .field("capacity", &self.buf.len())
            .field("point", &self.point)
            .field("wrapped", &self.wrapped)
            .finish()
    }
}

impl DebugRing {
    /// Create a ring with the given byte capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "DebugRing capacity must be > 0");
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            point: 0,
            wrapped: false,
        }
    }

    /// Create a ring with [`DUMP_SIZE`] (1 MiB).
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(DUMP_SIZE)
    }

    /// Append `data` at the cursor, wrapping to offset 0 at capacity.
    pub fn append(&mut self, data: &[u8]) {
        for &byte in data {
            self.buf[self.point] = byte;
            self.point += 1;
            if self.point == self.buf.len() {
                self.point = 0;
                self.wrapped = true;
            }
        }
    }

    /// The chronological contents as `(older, newer)` slices.
    ///
    /// `older` is empty until the ring has wrapped.
    #[must_use]
    pub fn segments(&self) -> (&[u8], &[u8]) {
        if self.wrapped {
            (&self.buf[self.point..], &self.buf[..self.point])
        } else {
            (&[], &self.buf[..self.point])
        }
    }

    /// Contiguous copy of the contents, oldest byte first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        let (older, newer) = self.segments();
        let mut v = Vec::with_capacity(older.len() + newer.len());
        v.extend_from_slice(older);
        v.extend_from_slice(newer);
        v
    }

    /// Current write offset.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.point
    }

    /// True once the ring has wrapped at least once.
    #[must_use]
    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }

    /// Configured capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
