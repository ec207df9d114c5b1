//! Shared memory IPC between the application processor and its
//! co-processors: the shared heap, SMD byte/packet channels and the SMSM
//! state mailbox.
//!
//! Every component is built on an explicitly passed [`SharedRegion`]; the
//! platform supplies the region and a [`Doorbell`] that raises the
//! inter-processor interrupt.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod config;
pub mod console;
pub mod diag;
pub mod doorbell;
pub mod dtb;
pub mod error;
pub mod intr_mux;
pub mod platform;
pub mod region;
pub mod smd;
pub mod smem;
pub mod smsm;
pub mod sync;

// Note: println! macro is exported at the crate root via #[macro_export]
// It can be used as: use smd::println;

pub use config::SmdConfig;
pub use doorbell::{Doorbell, FnDoorbell, NullDoorbell};
#[cfg(feature = "std")]
pub use doorbell::{DoorbellHub, InterruptLine};
pub use error::{Result, SmdError};
pub use intr_mux::IntrMux;
pub use platform::{Edge, Host, XferType};
pub use region::SharedRegion;
#[cfg(feature = "alloc")]
pub use region::HeapRegion;
pub use smd::{Smd, SmdChannel};
pub use smem::SharedHeap;
pub use smsm::Smsm;
