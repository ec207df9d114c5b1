//! Shared memory heap: header layout, item directory and allocation.

pub mod allocator;
pub mod heap;

pub use allocator::BumpAllocator;
pub use heap::{HeapInfo, SharedHeap, TocEntry, SMEM_HEADER_SIZE};
