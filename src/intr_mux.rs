//! Interrupt mux: many logical wake reasons share one interrupt per pair
//! of processors.
//!
//! Each ordered (source, target) pair owns a counter in the
//! `SMEM_SMD_SMSM_INTR_MUX` item. The source bumps it before ringing the
//! doorbell. The counter tells a receiver *that* it was signalled, never
//! *why*, so receivers re-scan everything they watch.

use crate::doorbell::Doorbell;
use crate::error::{Result, SmdError};
use crate::platform::{Host, SMEM_SMD_SMSM_INTR_MUX, SMSM_NUM_HOSTS, SMSM_NUM_INTR_MUX};
use crate::region::SharedRegion;
use crate::smem::SharedHeap;

/// Counter slot for signals from `src` to `dst`.
pub fn mux_slot(src: Host, dst: Host) -> Result<usize> {
    if src == dst {
        return Err(SmdError::InvalidArgument("host cannot signal itself"));
    }
    let (s, d) = (src.index(), dst.index());
    let slot = s * (SMSM_NUM_HOSTS - 1) + if d < s { d } else { d - 1 };
    debug_assert!(slot < SMSM_NUM_INTR_MUX);
    Ok(slot)
}

#[derive(Clone, Copy)]
pub struct IntrMux {
    counters: SharedRegion,
    host: Host,
}

impl IntrMux {
    /// Allocate (or attach to) the mux counters.
    pub fn new(heap: &SharedHeap) -> Result<Self> {
        let counters = heap.alloc_region(SMEM_SMD_SMSM_INTR_MUX, (SMSM_NUM_INTR_MUX * 4) as u32)?;
        Ok(Self { counters, host: heap.host() })
    }

    /// Bump the (local, target) counter and raise the interrupt.
    pub fn signal<D: Doorbell + ?Sized>(&self, target: Host, doorbell: &D) -> Result<()> {
        let slot = mux_slot(self.host, target)?;
        self.counters.update_u32(slot * 4, |v| v.wrapping_add(1))?;
        doorbell.ring(target);
        Ok(())
    }

    /// Signals sent from `src` to `dst` so far.
    pub fn count(&self, src: Host, dst: Host) -> Result<u32> {
        self.counters.load_u32(mux_slot(src, dst)? * 4)
    }

    /// Raw counter values.
    pub fn values(&self) -> Result<[u32; SMSM_NUM_INTR_MUX]> {
        let mut out = [0u32; SMSM_NUM_INTR_MUX];
        for (n, v) in out.iter_mut().enumerate() {
            *v = self.counters.load_u32(n * 4)?;
        }
        Ok(out)
    }
}
