//! Shared heap: item directory (TOC) and boot-lifetime allocation.
//!
//! Layout at offset 0 of the region:
//!
//! ```text
//! 0x000  proc_comm[4]        16 bytes each, reserved
//! 0x040  version[32]         smem << 16 | proc_comm
//! 0x0C0  heap_info           initialized, free_offset, heap_remaining, reserved
//! 0x0D0  heap_toc[512]       allocated, offset, size, reserved
//! ....   heap data           8-byte granular, bump allocated
//! ```
//!
//! Items are never freed. A TOC entry is published by writing `offset` and
//! `size` first and `allocated = 1` last, so lock-free readers either see a
//! complete entry or `NotFound`.

use log::{debug, warn};

use super::allocator::{align8, BumpAllocator};
use crate::error::{Result, SmdError};
use crate::platform::{
    Host, SMEM_NUM_ITEMS, SMEM_NUM_SPINLOCKS, SMEM_NUM_VERSIONS, SMEM_SPINLOCK_ARRAY,
    SPINLOCK_SMEM_ALLOC,
};
use crate::region::SharedRegion;
use crate::sync::RemoteSpinLock;

const VERSION_OFFSET: usize = 0x40;
const HEAP_INFO_OFFSET: usize = 0xC0;
const HEAP_INITIALIZED: usize = HEAP_INFO_OFFSET;
const HEAP_FREE_OFFSET: usize = HEAP_INFO_OFFSET + 4;
const HEAP_REMAINING: usize = HEAP_INFO_OFFSET + 8;
const TOC_OFFSET: usize = 0xD0;
const TOC_ENTRY_SIZE: usize = 16;

const TOC_ALLOCATED: usize = 0;
const TOC_OFFSET_FIELD: usize = 4;
const TOC_SIZE: usize = 8;

/// Bytes occupied by the fixed header and TOC.
pub const SMEM_HEADER_SIZE: usize = TOC_OFFSET + SMEM_NUM_ITEMS * TOC_ENTRY_SIZE;

/// Value of `heap_info.initialized` once the heap is usable.
pub const SMEM_HEAP_INITIALIZED: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapInfo {
    pub initialized: u32,
    pub free_offset: u32,
    pub heap_remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TocEntry {
    pub item: u32,
    pub offset: u32,
    pub size: u32,
}

/// Handle on the shared heap of one region, as seen by `host`.
#[derive(Debug, Clone)]
pub struct SharedHeap {
    region: SharedRegion,
    host: Host,
    alloc_lock: RemoteSpinLock,
}

impl SharedHeap {
    /// Initialize a fresh heap. Only the processor that owns the region at
    /// boot may call this; it zeroes the whole region.
    pub fn format(region: SharedRegion, host: Host) -> Result<Self> {
        let len = u32::try_from(region.len())
            .map_err(|_| SmdError::InvalidArgument("region larger than 4 GiB"))?;
        let header_end = align8(SMEM_HEADER_SIZE as u32);
        if len <= header_end {
            return Err(SmdError::InvalidArgument("region too small for smem header"));
        }

        region.fill(0, region.len(), 0)?;
        region.store_u32(HEAP_FREE_OFFSET, header_end)?;
        region.store_u32(HEAP_REMAINING, len - header_end)?;

        // Fixed items exist before anyone can contend for the lock.
        Self::alloc_unlocked(&region, SMEM_SPINLOCK_ARRAY, (SMEM_NUM_SPINLOCKS * 4) as u32)?;

        region.store_u32(HEAP_INITIALIZED, SMEM_HEAP_INITIALIZED)?;
        debug!(
            "smem: formatted {} bytes, heap at {:#x} ({})",
            len,
            header_end,
            host.name()
        );
        Self::attach(region, host)
    }

    /// Attach to a heap formatted by another processor.
    ///
    /// Returns `NotFound` while the owner has not finished formatting.
    pub fn attach(region: SharedRegion, host: Host) -> Result<Self> {
        region.check(0, SMEM_HEADER_SIZE)?;
        if region.load_u32(HEAP_INITIALIZED)? != SMEM_HEAP_INITIALIZED {
            return Err(SmdError::NotFound);
        }
        let (locks, size) = Self::lookup(&region, SMEM_SPINLOCK_ARRAY)?;
        if (size as usize) < SMEM_NUM_SPINLOCKS * 4 {
            return Err(SmdError::Corrupt("spinlock array too small"));
        }
        let alloc_lock = RemoteSpinLock::new(region, locks as usize + SPINLOCK_SMEM_ALLOC * 4)?;
        Ok(Self { region, host, alloc_lock })
    }

    #[inline]
    pub fn region(&self) -> SharedRegion {
        self.region
    }

    #[inline]
    pub fn host(&self) -> Host {
        self.host
    }

    /// Allocate `item` or return the existing allocation. Idempotent.
    pub fn alloc(&self, item: u32, size: u32) -> Result<u32> {
        let _guard = self.alloc_lock.lock(self.host)?;
        Self::alloc_unlocked(&self.region, item, size)
    }

    /// Look up a published item whose size must match `expected_size`.
    pub fn find(&self, item: u32, expected_size: u32) -> Result<u32> {
        let expected = rounded(expected_size)?;
        let (offset, size) = Self::lookup(&self.region, item)?;
        if size != expected {
            warn!("smem: find({}, {}): wrong size {}", item, expected_size, size);
            return Err(SmdError::SizeMismatch { item, expected, found: size });
        }
        Ok(offset)
    }

    /// Look up a published item without checking its size.
    pub fn get_entry(&self, item: u32) -> Result<(u32, u32)> {
        Self::lookup(&self.region, item)
    }

    /// Region view of a published item.
    pub fn item_region(&self, item: u32) -> Result<SharedRegion> {
        let (offset, size) = self.get_entry(item)?;
        self.region.subregion(offset as usize, size as usize)
    }

    /// Allocate (or reuse) `item` and return its region.
    pub fn alloc_region(&self, item: u32, size: u32) -> Result<SharedRegion> {
        let offset = self.alloc(item, size)?;
        self.region.subregion(offset as usize, rounded(size)? as usize)
    }

    /// Find `item` with the expected size and return its region.
    pub fn find_region(&self, item: u32, expected_size: u32) -> Result<SharedRegion> {
        let offset = self.find(item, expected_size)?;
        self.region.subregion(offset as usize, rounded(expected_size)? as usize)
    }

    pub fn info(&self) -> Result<HeapInfo> {
        Ok(HeapInfo {
            initialized: self.region.load_u32(HEAP_INITIALIZED)?,
            free_offset: self.region.load_u32(HEAP_FREE_OFFSET)?,
            heap_remaining: self.region.load_u32(HEAP_REMAINING)?,
        })
    }

    /// Published TOC entries in item order.
    pub fn toc(&self) -> impl Iterator<Item = TocEntry> + '_ {
        (0..SMEM_NUM_ITEMS as u32).filter_map(move |item| {
            Self::lookup(&self.region, item)
                .ok()
                .map(|(offset, size)| TocEntry { item, offset, size })
        })
    }

    /// Header version word `n` (`smem << 16 | proc_comm`).
    pub fn smem_version(&self, n: usize) -> Result<u32> {
        if n >= SMEM_NUM_VERSIONS {
            return Err(SmdError::InvalidArgument("version index"));
        }
        self.region.load_u32(VERSION_OFFSET + n * 4)
    }

    pub fn set_smem_version(&self, n: usize, version: u32) -> Result<()> {
        if n >= SMEM_NUM_VERSIONS {
            return Err(SmdError::InvalidArgument("version index"));
        }
        self.region.store_u32(VERSION_OFFSET + n * 4, version)
    }

    /// Cross-processor lock word `index` of the spinlock array.
    pub fn remote_lock(&self, index: usize) -> Result<RemoteSpinLock> {
        if index >= SMEM_NUM_SPINLOCKS {
            return Err(SmdError::InvalidArgument("spinlock index"));
        }
        let (locks, _) = Self::lookup(&self.region, SMEM_SPINLOCK_ARRAY)?;
        RemoteSpinLock::new(self.region, locks as usize + index * 4)
    }

    fn toc_entry(item: u32) -> Result<usize> {
        if item as usize >= SMEM_NUM_ITEMS {
            return Err(SmdError::InvalidArgument("smem item id out of range"));
        }
        Ok(TOC_OFFSET + item as usize * TOC_ENTRY_SIZE)
    }

    fn lookup(region: &SharedRegion, item: u32) -> Result<(u32, u32)> {
        let entry = Self::toc_entry(item)?;
        if region.load_u32(entry + TOC_ALLOCATED)? == 0 {
            return Err(SmdError::NotFound);
        }
        let offset = region.load_u32(entry + TOC_OFFSET_FIELD)?;
        let size = region.load_u32(entry + TOC_SIZE)?;
        if (offset as usize) < SMEM_HEADER_SIZE || region.check(offset as usize, size as usize).is_err() {
            warn!("smem: item {} published out of range ({:#x}+{:#x})", item, offset, size);
            return Err(SmdError::Corrupt("toc entry outside heap"));
        }
        Ok((offset, size))
    }

    fn alloc_unlocked(region: &SharedRegion, item: u32, size: u32) -> Result<u32> {
        if size == 0 {
            return Err(SmdError::InvalidArgument("zero-sized smem item"));
        }
        let size = rounded(size)?;
        match Self::lookup(region, item) {
            Ok((offset, found)) if found == size => return Ok(offset),
            Ok((_, found)) => {
                warn!("smem: alloc({}, {}): already allocated with size {}", item, size, found);
                return Err(SmdError::SizeMismatch { item, expected: size, found });
            }
            Err(SmdError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let free = region.load_u32(HEAP_FREE_OFFSET)?;
        let remaining = region.load_u32(HEAP_REMAINING)?;
        let mut bump = BumpAllocator::new(free, remaining);
        let offset = bump
            .alloc(size)
            .ok_or(SmdError::HeapExhausted { requested: size, remaining })?;
        region.check(offset as usize, size as usize)?;

        let entry = Self::toc_entry(item)?;
        region.store_u32(entry + TOC_OFFSET_FIELD, offset)?;
        region.store_u32(entry + TOC_SIZE, size)?;
        region.store_u32(entry + TOC_ALLOCATED, 1)?;
        region.store_u32(HEAP_FREE_OFFSET, bump.free_offset())?;
        region.store_u32(HEAP_REMAINING, bump.remaining())?;

        debug!("smem: item {} allocated at {:#x} size {:#x}", item, offset, size);
        Ok(offset)
    }
}

fn rounded(size: u32) -> Result<u32> {
    if size > u32::MAX - 7 {
        return Err(SmdError::InvalidArgument("smem item too large"));
    }
    Ok(align8(size))
}
