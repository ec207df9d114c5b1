//! Bump allocator over the shared heap's free offset.
//!
//! The allocator state itself lives in shared memory (`heap_info`), so this
//! type is loaded from the published values, advanced, and written back by
//! the caller while the allocation spinlock is held.

pub struct BumpAllocator {
    next: u32,
    end: u32,
    allocated: u32,
}

impl BumpAllocator {
    pub const fn new(free_offset: u32, remaining: u32) -> Self {
        Self {
            next: free_offset,
            end: free_offset.saturating_add(remaining),
            allocated: 0,
        }
    }

    pub fn alloc_aligned(&mut self, size: u32, align: u32) -> Option<u32> {
        let aligned = self.next.checked_add(align - 1)? & !(align - 1);
        let new_next = aligned.checked_add(size)?;

        if new_next > self.end {
            return None;
        }

        self.next = new_next;
        self.allocated += size;
        Some(aligned)
    }

    /// Allocate with the heap's 8-byte granularity.
    pub fn alloc(&mut self, size: u32) -> Option<u32> {
        self.alloc_aligned(size, 8)
    }

    /// Offset the next allocation starts from.
    pub fn free_offset(&self) -> u32 {
        self.next
    }

    pub fn remaining(&self) -> u32 {
        self.end - self.next
    }

    pub fn allocated(&self) -> u32 {
        self.allocated
    }
}

/// Round `size` up to the heap granularity.
#[inline]
pub const fn align8(size: u32) -> u32 {
    (size + 7) & !7
}
