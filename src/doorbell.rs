//! Out-of-band notification between processors.
//!
//! The core never touches interrupt hardware. It calls
//! [`Doorbell::ring`] after every state-affecting write and expects the
//! platform to eventually run the target's interrupt handler, which
//! re-scans channel and mailbox state.

use crate::platform::Host;

/// Raises the inter-processor interrupt towards `target`.
pub trait Doorbell: Send + Sync {
    fn ring(&self, target: Host);
}

impl<T: Doorbell + ?Sized> Doorbell for &T {
    fn ring(&self, target: Host) {
        (**self).ring(target)
    }
}

#[cfg(feature = "alloc")]
impl<T: Doorbell + ?Sized> Doorbell for alloc::sync::Arc<T> {
    fn ring(&self, target: Host) {
        (**self).ring(target)
    }
}

/// Drops every signal. Peers must poll.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDoorbell;

impl Doorbell for NullDoorbell {
    fn ring(&self, _target: Host) {}
}

/// Forwards to a platform hook, e.g. a write to an IPC register.
#[derive(Clone, Copy)]
pub struct FnDoorbell(pub fn(Host));

impl Doorbell for FnDoorbell {
    fn ring(&self, target: Host) {
        (self.0)(target)
    }
}

#[cfg(feature = "std")]
mod line {
    use core::time::Duration;

    use parking_lot::{Condvar, Mutex};

    use super::Doorbell;
    use crate::platform::{Host, SMSM_NUM_HOSTS};

    /// One host's interrupt line: counts pending signals and wakes waiters.
    #[derive(Default)]
    pub struct InterruptLine {
        pending: Mutex<u32>,
        cond: Condvar,
    }

    impl InterruptLine {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn notify(&self) {
            let mut pending = self.pending.lock();
            *pending = pending.saturating_add(1);
            self.cond.notify_all();
        }

        /// Wait until at least one signal is pending or `timeout` elapses.
        /// Consumes all pending signals; returns whether any were seen.
        pub fn wait_for_signal(&self, timeout: Duration) -> bool {
            let mut pending = self.pending.lock();
            self.cond.wait_while_for(&mut pending, |p| *p == 0, timeout);
            let fired = *pending > 0;
            *pending = 0;
            fired
        }

        /// Consume pending signals without blocking.
        pub fn take(&self) -> u32 {
            core::mem::take(&mut *self.pending.lock())
        }
    }

    /// Interrupt lines for every host sharing a simulated region.
    pub struct DoorbellHub {
        lines: [InterruptLine; SMSM_NUM_HOSTS],
    }

    impl DoorbellHub {
        pub fn new() -> Self {
            Self {
                lines: core::array::from_fn(|_| InterruptLine::new()),
            }
        }

        pub fn line(&self, host: Host) -> &InterruptLine {
            &self.lines[host.index()]
        }
    }

    impl Default for DoorbellHub {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Doorbell for DoorbellHub {
        fn ring(&self, target: Host) {
            self.line(target).notify();
        }
    }
}

#[cfg(feature = "std")]
pub use line::{DoorbellHub, InterruptLine};
