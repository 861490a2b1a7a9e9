//! Bump-pointer placement inside pre-reserved device heaps.
//!
//! The context reserves a handful of large heaps up front and carves
//! resources out of them with a monotonically advancing offset. There is no
//! per-resource free: placements live as long as the heap, which keeps
//! allocation a constant-time pointer bump with no fragmentation to manage.

use tracing::debug;

use crate::device::RawHeap;
use crate::error::{RhiError, RhiResult};

/// One pre-reserved heap and its bump cursor.
pub struct HeapAllocator {
    raw: RawHeap,
    name: &'static str,
    capacity: u64,
    offset: u64,
}

impl HeapAllocator {
    pub fn new(raw: RawHeap, name: &'static str, capacity: u64) -> Self {
        Self {
            raw,
            name,
            capacity,
            offset: 0,
        }
    }

    /// Reserves `size` bytes aligned to `alignment` and returns the byte
    /// offset of the placement within the heap.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::HeapExhausted`] if the aligned placement would
    /// run past the heap's capacity. The cursor is left untouched in that
    /// case.
    pub fn place(&mut self, size: u64, alignment: u64) -> RhiResult<u64> {
        debug_assert!(alignment.is_power_of_two());
        let start = self.offset.next_multiple_of(alignment);
        let end = start.checked_add(size).ok_or(RhiError::HeapExhausted {
            heap: self.name,
            requested: size,
            offset: start,
            capacity: self.capacity,
        })?;
        if end > self.capacity {
            return Err(RhiError::HeapExhausted {
                heap: self.name,
                requested: size,
                offset: start,
                capacity: self.capacity,
            });
        }
        self.offset = end;
        debug!(
            heap = self.name,
            offset = start,
            size,
            "placed resource in heap"
        );
        Ok(start)
    }

    /// The underlying device heap.
    #[inline]
    pub fn raw(&self) -> RawHeap {
        self.raw
    }

    /// Bytes consumed so far, including alignment padding.
    #[inline]
    pub fn used(&self) -> u64 {
        self.offset
    }

    /// Total byte capacity.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap(capacity: u64) -> HeapAllocator {
        HeapAllocator::new(RawHeap(0), "test", capacity)
    }

    #[test]
    fn test_offsets_are_monotonic() {
        let mut h = heap(1024);
        let a = h.place(100, 1).unwrap();
        let b = h.place(100, 1).unwrap();
        let c = h.place(100, 1).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 100);
        assert_eq!(c, 200);
        assert_eq!(h.used(), 300);
    }

    #[test]
    fn test_placement_respects_alignment() {
        let mut h = heap(1 << 20);
        h.place(10, 1).unwrap();
        let b = h.place(64, 256).unwrap();
        assert_eq!(b % 256, 0);
        assert_eq!(b, 256);
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let mut h = heap(128);
        h.place(100, 1).unwrap();
        let err = h.place(64, 1).unwrap_err();
        match err {
            RhiError::HeapExhausted {
                requested,
                capacity,
                ..
            } => {
                assert_eq!(requested, 64);
                assert_eq!(capacity, 128);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // A failed placement must not move the cursor.
        assert_eq!(h.used(), 100);
        h.place(28, 1).unwrap();
    }

    #[test]
    fn test_alignment_padding_counts_against_capacity() {
        let mut h = heap(256);
        h.place(1, 1).unwrap();
        // Aligning to 256 pushes the cursor to capacity, nothing fits after.
        assert!(h.place(1, 256).is_err());
    }

    #[test]
    fn test_exact_fit() {
        let mut h = heap(64);
        assert_eq!(h.place(64, 1).unwrap(), 0);
        assert!(h.place(1, 1).is_err());
    }
}
