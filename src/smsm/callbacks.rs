//! State-change callback registrations.
//!
//! A fixed table of (entry, mask, handler, data) records. Records are
//! matched on `(entry, handler, data)`: registering again merges the mask,
//! deregistering removes bits and drops the record once its mask is empty.

use crate::error::{Result, SmdError};
use crate::platform::SMSM_NUM_ENTRIES;

/// Maximum number of live registrations per processor.
pub const MAX_CALLBACKS: usize = 16;

/// Invoked as `handler(data, old_state, new_state)`.
pub type StateCallback = fn(usize, u32, u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RegisterOutcome {
    /// A new record was created.
    Added = 0,
    /// The mask was merged into an existing record.
    Merged = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DeregisterOutcome {
    NotFound = 0,
    /// Bits were removed; the record still watches others.
    MaskCleared = 1,
    Removed = 2,
}

impl RegisterOutcome {
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl DeregisterOutcome {
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// Identifies one registration record for exact-match deregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackToken {
    slot: usize,
    generation: u32,
}

#[derive(Clone, Copy)]
struct Registration {
    entry: usize,
    mask: u32,
    handler: StateCallback,
    data: usize,
    generation: u32,
}

impl Registration {
    fn matches(&self, entry: usize, handler: StateCallback, data: usize) -> bool {
        self.entry == entry && self.handler as usize == handler as usize && self.data == data
    }
}

/// Handlers selected for one state change, invoked after the registry
/// lock is dropped.
pub struct Dispatch {
    calls: [Option<(StateCallback, usize)>; MAX_CALLBACKS],
}

impl Dispatch {
    pub fn is_empty(&self) -> bool {
        self.calls.iter().all(Option::is_none)
    }

    pub fn len(&self) -> usize {
        self.calls.iter().flatten().count()
    }

    /// Call every selected handler once.
    pub fn run(&self, old: u32, new: u32) {
        for (handler, data) in self.calls.iter().flatten() {
            handler(*data, old, new);
        }
    }
}

pub struct CallbackRegistry {
    slots: [Option<Registration>; MAX_CALLBACKS],
    generation: u32,
}

impl CallbackRegistry {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_CALLBACKS],
            generation: 0,
        }
    }

    pub fn register(
        &mut self,
        entry: usize,
        mask: u32,
        handler: StateCallback,
        data: usize,
    ) -> Result<(RegisterOutcome, CallbackToken)> {
        check_entry(entry)?;
        if mask == 0 {
            return Err(SmdError::InvalidArgument("empty callback mask"));
        }

        if let Some(slot) = self.find(entry, handler, data) {
            let Some(reg) = self.slots[slot].as_mut() else {
                return Err(SmdError::NotFound);
            };
            reg.mask |= mask;
            let token = CallbackToken { slot, generation: reg.generation };
            return Ok((RegisterOutcome::Merged, token));
        }

        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(SmdError::RegistryFull)?;
        self.generation = self.generation.wrapping_add(1);
        self.slots[slot] = Some(Registration {
            entry,
            mask,
            handler,
            data,
            generation: self.generation,
        });
        Ok((RegisterOutcome::Added, CallbackToken { slot, generation: self.generation }))
    }

    pub fn deregister(
        &mut self,
        entry: usize,
        mask: u32,
        handler: StateCallback,
        data: usize,
    ) -> DeregisterOutcome {
        match self.find(entry, handler, data) {
            Some(slot) => self.clear_bits(slot, mask),
            None => DeregisterOutcome::NotFound,
        }
    }

    pub fn deregister_token(&mut self, token: CallbackToken, mask: u32) -> DeregisterOutcome {
        match self.slots.get(token.slot) {
            Some(Some(reg)) if reg.generation == token.generation => self.clear_bits(token.slot, mask),
            _ => DeregisterOutcome::NotFound,
        }
    }

    /// State entry of the record `token` names, if it is still live.
    pub fn token_entry(&self, token: CallbackToken) -> Option<usize> {
        match self.slots.get(token.slot) {
            Some(Some(reg)) if reg.generation == token.generation => Some(reg.entry),
            _ => None,
        }
    }

    /// Union of the masks registered on `entry`.
    pub fn mask_union(&self, entry: usize) -> u32 {
        self.slots
            .iter()
            .flatten()
            .filter(|r| r.entry == entry)
            .fold(0, |acc, r| acc | r.mask)
    }

    /// Handlers on `entry` watching any bit of `delta`.
    pub fn select(&self, entry: usize, delta: u32) -> Dispatch {
        let mut calls = [None; MAX_CALLBACKS];
        for (call, reg) in calls.iter_mut().zip(self.slots.iter()) {
            if let Some(reg) = reg {
                if reg.entry == entry && reg.mask & delta != 0 {
                    *call = Some((reg.handler, reg.data));
                }
            }
        }
        Dispatch { calls }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find(&self, entry: usize, handler: StateCallback, data: usize) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|r| r.matches(entry, handler, data)))
    }

    fn clear_bits(&mut self, slot: usize, mask: u32) -> DeregisterOutcome {
        let Some(reg) = self.slots[slot].as_mut() else {
            return DeregisterOutcome::NotFound;
        };
        reg.mask &= !mask;
        if reg.mask == 0 {
            self.slots[slot] = None;
            return DeregisterOutcome::Removed;
        }
        DeregisterOutcome::MaskCleared
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn check_entry(entry: usize) -> Result<()> {
    if entry >= SMSM_NUM_ENTRIES {
        return Err(SmdError::InvalidArgument("smsm entry out of range"));
    }
    Ok(())
}
