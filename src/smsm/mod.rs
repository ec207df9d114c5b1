//! Shared memory state machine: one 32-bit state word per entry,
//! replicated in shared memory, with change notification.
//!
//! Bits carry no meaning here. The layer guarantees atomic updates,
//! exactly one callback per watched change, and a signal to every remote
//! processor whose interrupt mask covers a changed bit.

pub mod callbacks;
pub mod selftest;

pub use callbacks::{
    CallbackRegistry, CallbackToken, DeregisterOutcome, RegisterOutcome, StateCallback,
    MAX_CALLBACKS,
};

use log::{debug, trace};

use crate::doorbell::Doorbell;
use crate::error::Result;
use crate::intr_mux::IntrMux;
use crate::platform::{
    Host, SMEM_SMSM_CPU_INTR_MASK, SMEM_SMSM_SHARED_STATE, SMSM_NUM_ENTRIES, SMSM_NUM_HOSTS,
};
use crate::region::SharedRegion;
use crate::smem::SharedHeap;
use crate::sync::SpinLock;

use callbacks::check_entry;

pub const SMSM_STATE_SIZE: u32 = (SMSM_NUM_ENTRIES * 4) as u32;
pub const SMSM_INTR_MASK_SIZE: u32 = (SMSM_NUM_ENTRIES * SMSM_NUM_HOSTS * 4) as u32;

#[inline]
fn mask_offset(entry: usize, host: Host) -> usize {
    (entry * SMSM_NUM_HOSTS + host.index()) * 4
}

pub struct Smsm<D: Doorbell> {
    states: SharedRegion,
    intr_mask: SharedRegion,
    mux: IntrMux,
    doorbell: D,
    host: Host,
    registry: SpinLock<CallbackRegistry>,
    /// Entry values as of the last dispatch.
    last_seen: SpinLock<[u32; SMSM_NUM_ENTRIES]>,
}

impl<D: Doorbell> Smsm<D> {
    /// Attach to (or create) the state and interrupt mask items. This
    /// host's interrupt mask column starts cleared.
    pub fn new(heap: &SharedHeap, doorbell: D) -> Result<Self> {
        let states = heap.alloc_region(SMEM_SMSM_SHARED_STATE, SMSM_STATE_SIZE)?;
        let intr_mask = heap.alloc_region(SMEM_SMSM_CPU_INTR_MASK, SMSM_INTR_MASK_SIZE)?;
        let mux = IntrMux::new(heap)?;
        let host = heap.host();

        let mut seen = [0u32; SMSM_NUM_ENTRIES];
        for (entry, v) in seen.iter_mut().enumerate() {
            intr_mask.store_u32(mask_offset(entry, host), 0)?;
            *v = states.load_u32(entry * 4)?;
        }
        debug!("smsm: {} attached", host.name());

        Ok(Self {
            states,
            intr_mask,
            mux,
            doorbell,
            host,
            registry: SpinLock::new(CallbackRegistry::new()),
            last_seen: SpinLock::new(seen),
        })
    }

    #[inline]
    pub fn host(&self) -> Host {
        self.host
    }

    pub fn state(&self, entry: usize) -> Result<u32> {
        check_entry(entry)?;
        self.states.load_u32(entry * 4)
    }

    pub fn states(&self) -> Result<[u32; SMSM_NUM_ENTRIES]> {
        let mut out = [0u32; SMSM_NUM_ENTRIES];
        for (entry, v) in out.iter_mut().enumerate() {
            *v = self.states.load_u32(entry * 4)?;
        }
        Ok(out)
    }

    /// `new = (old & !clear) | set`, then notify local callbacks and
    /// remote processors. Returns `(old, new)`.
    pub fn change_state(&self, entry: usize, clear: u32, set: u32) -> Result<(u32, u32)> {
        check_entry(entry)?;
        let (old, new, dispatch) = {
            let mut seen = self.last_seen.lock();
            let (old, new) = self.states.update_u32(entry * 4, |v| (v & !clear) | set)?;
            seen[entry] = new;
            (old, new, self.registry.lock().select(entry, old ^ new))
        };
        let delta = old ^ new;
        trace!("smsm: entry {} {:#010x} -> {:#010x}", entry, old, new);

        dispatch.run(old, new);
        if delta != 0 {
            self.notify_remote(entry, delta)?;
        }
        Ok((old, new))
    }

    /// Watch `mask` bits of `entry`. Also widens this host's interrupt
    /// mask so remote changes to those bits interrupt us.
    pub fn register(
        &self,
        entry: usize,
        mask: u32,
        handler: StateCallback,
        data: usize,
    ) -> Result<(RegisterOutcome, CallbackToken)> {
        let mut registry = self.registry.lock();
        let out = registry.register(entry, mask, handler, data)?;
        let union = registry.mask_union(entry);
        self.intr_mask
            .update_u32(mask_offset(entry, self.host), |m| m | union)?;
        Ok(out)
    }

    pub fn deregister(
        &self,
        entry: usize,
        mask: u32,
        handler: StateCallback,
        data: usize,
    ) -> Result<DeregisterOutcome> {
        check_entry(entry)?;
        let mut registry = self.registry.lock();
        let out = registry.deregister(entry, mask, handler, data);
        if out != DeregisterOutcome::NotFound {
            self.narrow_intr_mask(&registry, entry, mask)?;
        }
        Ok(out)
    }

    pub fn deregister_token(&self, token: CallbackToken, mask: u32) -> Result<DeregisterOutcome> {
        let mut registry = self.registry.lock();
        let entry = match registry.token_entry(token) {
            Some(entry) => entry,
            None => return Ok(DeregisterOutcome::NotFound),
        };
        let out = registry.deregister_token(token, mask);
        self.narrow_intr_mask(&registry, entry, mask)?;
        Ok(out)
    }

    /// Number of live registrations.
    pub fn registrations(&self) -> usize {
        self.registry.lock().len()
    }

    /// Interrupt entry point: the mux does not say which entry changed,
    /// so compare every entry with the last dispatched value. Returns the
    /// number of entries that changed.
    pub fn handle_interrupt(&self) -> Result<usize> {
        let mut changed = 0;
        for entry in 0..SMSM_NUM_ENTRIES {
            let (old, new, dispatch) = {
                let mut seen = self.last_seen.lock();
                let new = self.states.load_u32(entry * 4)?;
                let old = core::mem::replace(&mut seen[entry], new);
                if old == new {
                    continue;
                }
                (old, new, self.registry.lock().select(entry, old ^ new))
            };
            changed += 1;
            trace!("smsm: remote entry {} {:#010x} -> {:#010x}", entry, old, new);
            dispatch.run(old, new);
        }
        Ok(changed)
    }

    /// Adjust the bits of `entry` this host wants to be interrupted for.
    pub fn set_intr_mask(&self, entry: usize, clear: u32, set: u32) -> Result<u32> {
        check_entry(entry)?;
        let (_, new) = self
            .intr_mask
            .update_u32(mask_offset(entry, self.host), |m| (m & !clear) | set)?;
        Ok(new)
    }

    pub fn intr_mask(&self, entry: usize, host: Host) -> Result<u32> {
        check_entry(entry)?;
        self.intr_mask.load_u32(mask_offset(entry, host))
    }

    /// Interrupt mux counters.
    pub fn intr_mux(&self) -> &IntrMux {
        &self.mux
    }

    /// Drop the deregistered bits of `mask` that no record still watches.
    fn narrow_intr_mask(&self, registry: &CallbackRegistry, entry: usize, mask: u32) -> Result<()> {
        let unwatched = mask & !registry.mask_union(entry);
        if unwatched != 0 {
            let (_, now) = self
                .intr_mask
                .update_u32(mask_offset(entry, self.host), |m| m & !unwatched)?;
            debug!("smsm: entry {} intr mask narrowed to {:#010x}", entry, now);
        }
        Ok(())
    }

    fn notify_remote(&self, entry: usize, delta: u32) -> Result<()> {
        for host in Host::ALL {
            if host == self.host {
                continue;
            }
            if self.intr_mask.load_u32(mask_offset(entry, host))? & delta != 0 {
                self.mux.signal(host, &self.doorbell)?;
            }
        }
        Ok(())
    }
}
