//! Descriptor slot allocation with LIFO recycling.
//!
//! A descriptor heap is a contiguous array of fixed-stride slots with a CPU
//! base address and, for shader-visible heaps, a GPU base address. Slots are
//! handed out from a rising cursor; freed slots go onto a stack and are
//! reused before the cursor advances further.

use tracing::trace;

use crate::error::{RhiError, RhiResult};

/// One allocated descriptor: matching CPU and GPU addresses for a slot.
///
/// For non-shader-visible heaps the GPU address mirrors the CPU address so
/// the two halves still agree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub cpu: u64,
    pub gpu: u64,
}

/// Base addresses and stride of one descriptor heap, reported by the device.
#[derive(Clone, Copy, Debug)]
pub struct DescriptorHeapInfo {
    pub cpu_base: u64,
    pub gpu_base: u64,
    pub stride: u64,
    pub capacity: u32,
}

/// Slot allocator over one descriptor heap.
pub struct DescriptorAllocator {
    name: &'static str,
    cpu_base: u64,
    gpu_base: u64,
    stride: u64,
    capacity: u32,
    /// Next never-used slot.
    cursor: u32,
    /// Freed slots, reused most-recent-first.
    free_slots: Vec<u32>,
}

impl DescriptorAllocator {
    pub fn new(name: &'static str, info: DescriptorHeapInfo) -> Self {
        Self {
            name,
            cpu_base: info.cpu_base,
            gpu_base: info.gpu_base,
            stride: info.stride,
            capacity: info.capacity,
            cursor: 0,
            free_slots: Vec::new(),
        }
    }

    /// Hands out one slot, preferring the most recently freed one.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DescriptorHeapFull`] when no freed slot is
    /// available and the cursor has reached capacity.
    pub fn allocate(&mut self) -> RhiResult<Descriptor> {
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                if self.cursor >= self.capacity {
                    return Err(RhiError::DescriptorHeapFull(self.name));
                }
                let slot = self.cursor;
                self.cursor += 1;
                slot
            }
        };
        trace!(heap = self.name, slot, "allocated descriptor");
        Ok(self.at(slot))
    }

    /// Returns the freed slot to the allocator.
    ///
    /// The slot index is recomputed independently from the CPU and the GPU
    /// address; if the two disagree the descriptor was corrupted somewhere
    /// and the free is rejected. Descriptors from a different heap, slots
    /// past the cursor and slots already on the free stack are rejected as
    /// not live.
    pub fn free(&mut self, descriptor: Descriptor) -> RhiResult<()> {
        let not_live = || RhiError::DescriptorNotLive {
            heap: self.name,
            cpu: descriptor.cpu,
        };
        let cpu_slot = descriptor
            .cpu
            .checked_sub(self.cpu_base)
            .map(|off| (off / self.stride) as u32)
            .ok_or_else(not_live)?;
        let gpu_slot = descriptor
            .gpu
            .checked_sub(self.gpu_base)
            .map(|off| (off / self.stride) as u32)
            .ok_or_else(not_live)?;
        if cpu_slot != gpu_slot {
            return Err(RhiError::DescriptorMismatch {
                cpu: cpu_slot,
                gpu: gpu_slot,
            });
        }
        if cpu_slot >= self.cursor || self.free_slots.contains(&cpu_slot) {
            return Err(not_live());
        }
        trace!(heap = self.name, slot = cpu_slot, "freed descriptor");
        self.free_slots.push(cpu_slot);
        Ok(())
    }

    /// The descriptor for a given slot index.
    pub fn at(&self, slot: u32) -> Descriptor {
        Descriptor {
            cpu: self.cpu_base + slot as u64 * self.stride,
            gpu: self.gpu_base + slot as u64 * self.stride,
        }
    }

    /// Recovers the slot index of a descriptor from its CPU address.
    #[inline]
    pub fn slot_of(&self, descriptor: Descriptor) -> u32 {
        ((descriptor.cpu - self.cpu_base) / self.stride) as u32
    }

    /// Slots currently live (allocated and not freed).
    #[inline]
    pub fn live(&self) -> u32 {
        self.cursor - self.free_slots.len() as u32
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(capacity: u32) -> DescriptorAllocator {
        DescriptorAllocator::new(
            "test",
            DescriptorHeapInfo {
                cpu_base: 0x1000,
                gpu_base: 0x8000,
                stride: 32,
                capacity,
            },
        )
    }

    #[test]
    fn test_slots_rise_from_zero() {
        let mut a = allocator(8);
        for slot in 0..4 {
            let d = a.allocate().unwrap();
            assert_eq!(a.slot_of(d), slot);
            assert_eq!(d.cpu, 0x1000 + slot as u64 * 32);
            assert_eq!(d.gpu, 0x8000 + slot as u64 * 32);
        }
        assert_eq!(a.live(), 4);
    }

    #[test]
    fn test_free_then_allocate_reuses_lifo() {
        let mut a = allocator(8);
        let d0 = a.allocate().unwrap();
        let d1 = a.allocate().unwrap();
        let _d2 = a.allocate().unwrap();
        a.free(d0).unwrap();
        a.free(d1).unwrap();
        // Most recently freed comes back first.
        let reused = a.allocate().unwrap();
        assert_eq!(a.slot_of(reused), 1);
        let reused = a.allocate().unwrap();
        assert_eq!(a.slot_of(reused), 0);
        // Stack drained, cursor resumes.
        let fresh = a.allocate().unwrap();
        assert_eq!(a.slot_of(fresh), 3);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut a = allocator(2);
        a.allocate().unwrap();
        let d = a.allocate().unwrap();
        assert!(matches!(
            a.allocate(),
            Err(RhiError::DescriptorHeapFull("test"))
        ));
        // Freeing makes room again.
        a.free(d).unwrap();
        let reused = a.allocate().unwrap();
        assert_eq!(a.slot_of(reused), 1);
    }

    #[test]
    fn test_mismatched_free_is_rejected() {
        let mut a = allocator(8);
        let d = a.allocate().unwrap();
        let corrupt = Descriptor {
            cpu: d.cpu,
            gpu: d.gpu + 32,
        };
        assert!(matches!(
            a.free(corrupt),
            Err(RhiError::DescriptorMismatch { cpu: 0, gpu: 1 })
        ));
    }

    #[test]
    fn test_free_from_another_heap_is_rejected() {
        let mut a = allocator(8);
        a.allocate().unwrap();
        // Addresses below this heap's bases must not underflow into a slot.
        let foreign = Descriptor {
            cpu: 0x10,
            gpu: 0x20,
        };
        assert!(matches!(
            a.free(foreign),
            Err(RhiError::DescriptorNotLive { heap: "test", .. })
        ));
    }

    #[test]
    fn test_free_of_dead_slots_is_rejected() {
        let mut a = allocator(8);
        let d = a.allocate().unwrap();
        a.free(d).unwrap();
        // Double free.
        assert!(matches!(
            a.free(d),
            Err(RhiError::DescriptorNotLive { heap: "test", .. })
        ));
        // Slot the cursor never reached.
        let unallocated = a.at(5);
        assert!(matches!(
            a.free(unallocated),
            Err(RhiError::DescriptorNotLive { heap: "test", .. })
        ));
    }
}
