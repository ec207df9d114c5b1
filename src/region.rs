//! Bounds-checked view of the shared memory region.
//!
//! Every shared structure (heap TOC, half-channel descriptors, SMSM words)
//! is addressed by byte offset into a [`SharedRegion`]. Word accessors go
//! through atomics because the other processor mutates the same memory at
//! any time; values are stored little-endian regardless of host order.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::error::{Result, SmdError};

/// A contiguous region of shared memory addressed by offset.
#[derive(Clone, Copy)]
pub struct SharedRegion {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: all access goes through atomics or explicitly bounds-checked copies;
// the region is shared with remote processors anyway.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create a region from a raw pointer and length.
    ///
    /// # Safety
    ///
    /// - `base` must be valid for reads and writes of `len` bytes
    /// - the memory must stay mapped for as long as any copy of the region lives
    pub unsafe fn from_raw(base: *mut u8, len: usize) -> Result<Self> {
        let base = NonNull::new(base).ok_or(SmdError::InvalidArgument("null region base"))?;
        if base.as_ptr() as usize % 8 != 0 {
            return Err(SmdError::Misaligned { offset: 0 });
        }
        Ok(Self { base, len })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Fail unless `[offset, offset + len)` lies inside the region.
    #[inline]
    pub fn check(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(SmdError::OutOfBounds { offset, len }),
        }
    }

    /// A view of `[offset, offset + len)` as its own region.
    pub fn subregion(&self, offset: usize, len: usize) -> Result<Self> {
        self.check(offset, len)?;
        if offset % 8 != 0 {
            return Err(SmdError::Misaligned { offset });
        }
        // SAFETY: bounds checked above, base is non-null.
        let base = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) };
        Ok(Self { base, len })
    }

    fn word(&self, offset: usize) -> Result<&AtomicU32> {
        self.check(offset, 4)?;
        if offset % 4 != 0 {
            return Err(SmdError::Misaligned { offset });
        }
        // SAFETY: in bounds and 4-byte aligned (base is 8-byte aligned).
        Ok(unsafe { &*(self.base.as_ptr().add(offset) as *const AtomicU32) })
    }

    fn byte(&self, offset: usize) -> Result<&AtomicU8> {
        self.check(offset, 1)?;
        // SAFETY: in bounds.
        Ok(unsafe { &*(self.base.as_ptr().add(offset) as *const AtomicU8) })
    }

    /// Load a little-endian word with acquire ordering.
    #[inline]
    pub fn load_u32(&self, offset: usize) -> Result<u32> {
        Ok(u32::from_le(self.word(offset)?.load(Ordering::Acquire)))
    }

    /// Store a little-endian word with release ordering.
    #[inline]
    pub fn store_u32(&self, offset: usize, value: u32) -> Result<()> {
        self.word(offset)?.store(value.to_le(), Ordering::Release);
        Ok(())
    }

    /// Compare-and-set a little-endian word. The inner result carries the
    /// value that was observed.
    pub fn compare_exchange_u32(
        &self,
        offset: usize,
        current: u32,
        new: u32,
    ) -> Result<core::result::Result<u32, u32>> {
        let word = self.word(offset)?;
        Ok(word
            .compare_exchange(current.to_le(), new.to_le(), Ordering::AcqRel, Ordering::Acquire)
            .map(u32::from_le)
            .map_err(u32::from_le))
    }

    /// Atomic read-modify-write. Returns `(old, new)`.
    pub fn update_u32(&self, offset: usize, mut f: impl FnMut(u32) -> u32) -> Result<(u32, u32)> {
        let word = self.word(offset)?;
        let mut raw = word.load(Ordering::Acquire);
        loop {
            let old = u32::from_le(raw);
            let new = f(old);
            match word.compare_exchange_weak(raw, new.to_le(), Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok((old, new)),
                Err(seen) => raw = seen,
            }
        }
    }

    #[inline]
    pub fn load_u8(&self, offset: usize) -> Result<u8> {
        Ok(self.byte(offset)?.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store_u8(&self, offset: usize, value: u8) -> Result<()> {
        self.byte(offset)?.store(value, Ordering::Release);
        Ok(())
    }

    /// Copy `buf.len()` bytes out of the region.
    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check(offset, buf.len())?;
        // SAFETY: bounds checked; `buf` cannot alias shared memory we hand out.
        unsafe {
            core::ptr::copy_nonoverlapping(self.base.as_ptr().add(offset), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    /// Copy `data` into the region.
    pub fn write_bytes(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.check(offset, data.len())?;
        // SAFETY: bounds checked.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), self.base.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    pub fn fill(&self, offset: usize, len: usize, value: u8) -> Result<()> {
        self.check(offset, len)?;
        // SAFETY: bounds checked.
        unsafe { core::ptr::write_bytes(self.base.as_ptr().add(offset), value, len) };
        Ok(())
    }
}

impl core::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(feature = "alloc")]
mod heap {
    use super::SharedRegion;
    use crate::error::{Result, SmdError};
    use alloc::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
    use core::ptr::NonNull;

    /// Heap-backed region for tests and host-side simulation.
    pub struct HeapRegion {
        base: NonNull<u8>,
        len: usize,
        layout: Layout,
    }

    impl HeapRegion {
        /// Allocate a zeroed region aligned to 64 bytes.
        pub fn new_zeroed(len: usize) -> Result<Self> {
            let layout = Layout::from_size_align(len.max(1), 64)
                .map_err(|_| SmdError::InvalidArgument("heap region too large"))?;
            // SAFETY: layout has non-zero size.
            let ptr = unsafe { alloc_zeroed(layout) };
            let Some(base) = NonNull::new(ptr) else {
                handle_alloc_error(layout);
            };
            Ok(Self { base, len, layout })
        }

        /// Region view of this allocation. Copies must not outlive `self`.
        #[inline]
        pub fn region(&self) -> SharedRegion {
            SharedRegion { base: self.base, len: self.len }
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.len
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.len == 0
        }
    }

    impl Drop for HeapRegion {
        fn drop(&mut self) {
            // SAFETY: allocated in `new_zeroed` with the same layout.
            unsafe { dealloc(self.base.as_ptr(), self.layout) };
        }
    }

    unsafe impl Send for HeapRegion {}
    unsafe impl Sync for HeapRegion {}
}

#[cfg(feature = "alloc")]
pub use heap::HeapRegion;
