//! Error taxonomy shared by every SMD/SMSM component.

/// Errors returned by the shared-memory core.
///
/// Every variant is `Copy` so errors can be returned from paths that hold
/// spinlocks without allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SmdError {
    /// Shared item, channel or registration is absent (may not be published yet).
    #[error("not found")]
    NotFound,
    /// Operation attempted outside the channel state machine.
    #[error("protocol order violation: {0}")]
    ProtocolOrder(&'static str),
    /// Request larger than the buffer can ever hold.
    #[error("request of {requested} bytes exceeds capacity {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },
    /// No free slot in the channel allocation table.
    #[error("channel allocation table exhausted")]
    SlotExhausted,
    /// Shared heap has no room for the item.
    #[error("shared heap exhausted: requested {requested}, remaining {remaining}")]
    HeapExhausted { requested: u32, remaining: u32 },
    /// Item already allocated with a different size.
    #[error("item {item}: expected size {expected}, found {found}")]
    SizeMismatch { item: u32, expected: u32, found: u32 },
    /// Access outside the shared region.
    #[error("access at {offset:#x}+{len} out of bounds")]
    OutOfBounds { offset: usize, len: usize },
    /// Word access at an unaligned offset.
    #[error("misaligned access at {offset:#x}")]
    Misaligned { offset: usize },
    /// Peer-controlled data failed validation.
    #[error("corrupt shared data: {0}")]
    Corrupt(&'static str),
    /// Caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Callback registry has no free slot.
    #[error("callback registry full")]
    RegistryFull,
}

pub type Result<T> = core::result::Result<T, SmdError>;
