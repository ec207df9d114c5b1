//! Local and cross-processor locks.
//!
//! [`SpinLock`] serializes callers on this processor. [`RemoteSpinLock`]
//! lives in the shared spinlock-array item and is honoured by every
//! processor that maps the region; it protects heap allocation and the
//! channel allocation table.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::Result;
use crate::platform::Host;
use crate::region::SharedRegion;

pub struct SpinLock<T> {
    next_ticket: AtomicU32,
    now_serving: AtomicU32,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    ticket: u32,
}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        while self.now_serving.load(Ordering::Acquire) != ticket {
            core::hint::spin_loop();
        }
        SpinLockGuard { lock: self, ticket }
    }
}

impl<T> core::ops::Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> core::ops::DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock
            .now_serving
            .store(self.ticket.wrapping_add(1), Ordering::Release);
        #[cfg(target_arch = "aarch64")]
        unsafe { core::arch::asm!("sev", options(nostack, nomem)) };
    }
}

/// A lock word in shared memory. Free is 0; held is the owner's
/// [`Host::lock_token`].
#[derive(Debug, Clone, Copy)]
pub struct RemoteSpinLock {
    region: SharedRegion,
    offset: usize,
}

pub struct RemoteSpinLockGuard {
    lock: RemoteSpinLock,
}

impl RemoteSpinLock {
    /// Wrap the lock word at `offset`. The word must be 4-byte aligned.
    pub fn new(region: SharedRegion, offset: usize) -> Result<Self> {
        region.load_u32(offset)?;
        Ok(Self { region, offset })
    }

    /// Spin until the lock word is claimed for `host`.
    pub fn lock(&self, host: Host) -> Result<RemoteSpinLockGuard> {
        loop {
            if let Some(guard) = self.try_lock(host)? {
                return Ok(guard);
            }
            core::hint::spin_loop();
        }
    }

    pub fn try_lock(&self, host: Host) -> Result<Option<RemoteSpinLockGuard>> {
        match self.region.compare_exchange_u32(self.offset, 0, host.lock_token())? {
            Ok(_) => Ok(Some(RemoteSpinLockGuard { lock: *self })),
            Err(_) => Ok(None),
        }
    }

    /// Current owner token, 0 when free.
    pub fn owner(&self) -> Result<u32> {
        self.region.load_u32(self.offset)
    }
}

impl Drop for RemoteSpinLockGuard {
    fn drop(&mut self) {
        // The word was validated when the lock was built.
        let _ = self.lock.region.store_u32(self.lock.offset, 0);
        #[cfg(target_arch = "aarch64")]
        unsafe { core::arch::asm!("sev", options(nostack, nomem)) };
    }
}
