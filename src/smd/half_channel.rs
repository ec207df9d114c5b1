//! Half-channel descriptor: one direction of an SMD channel.
//!
//! Wire layout (20 bytes, little-endian):
//!
//! ```text
//! 0   state            u32
//! 4   fDSR fCTS fCD fRI fHEAD fTAIL fSTATE fBLOCKREADINTR   (one byte each)
//! 12  tail             u32   written by the consumer
//! 16  head             u32   written by the producer
//! ```

use bitflags::bitflags;

use crate::error::{Result, SmdError};
use crate::region::SharedRegion;

pub const HALF_CHANNEL_SIZE: usize = 20;

const STATE: usize = 0;
const FLAGS: usize = 4;
const TAIL: usize = 12;
const HEAD: usize = 16;

/// Channel state as published in a half-channel descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChannelState {
    Closed = 0,
    Opening = 1,
    Opened = 2,
    Flushing = 3,
    Closing = 4,
    Reset = 5,
    ResetOpening = 6,
}

impl ChannelState {
    pub fn from_raw(raw: u32) -> Result<Self> {
        Ok(match raw {
            0 => ChannelState::Closed,
            1 => ChannelState::Opening,
            2 => ChannelState::Opened,
            3 => ChannelState::Flushing,
            4 => ChannelState::Closing,
            5 => ChannelState::Reset,
            6 => ChannelState::ResetOpening,
            _ => return Err(SmdError::Corrupt("unknown channel state")),
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            ChannelState::Closed => "CLOSED",
            ChannelState::Opening => "OPENING",
            ChannelState::Opened => "OPENED",
            ChannelState::Flushing => "FLUSHING",
            ChannelState::Closing => "CLOSING",
            ChannelState::Reset => "RESET",
            ChannelState::ResetOpening => "ROPENING",
        }
    }
}

/// Per-byte flags of a half-channel, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Flag {
    Dsr = 0,
    Cts = 1,
    Cd = 2,
    Ri = 3,
    Head = 4,
    Tail = 5,
    State = 6,
    BlockReadIntr = 7,
}

impl Flag {
    pub const ALL: [Flag; 8] = [
        Flag::Dsr,
        Flag::Cts,
        Flag::Cd,
        Flag::Ri,
        Flag::Head,
        Flag::Tail,
        Flag::State,
        Flag::BlockReadIntr,
    ];

    const fn signal(self) -> Signals {
        Signals::from_bits_truncate(1 << self as usize)
    }
}

bitflags! {
    /// Snapshot of the eight flag bytes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Signals: u8 {
        const DSR = 1 << 0;
        const CTS = 1 << 1;
        const CD = 1 << 2;
        const RI = 1 << 3;
        const HEAD = 1 << 4;
        const TAIL = 1 << 5;
        const STATE = 1 << 6;
        const BLOCK_READ_INTR = 1 << 7;
    }
}

/// Accessor for one descriptor at a fixed offset of a channel item.
#[derive(Clone, Copy)]
pub struct HalfChannel {
    region: SharedRegion,
    offset: usize,
}

impl HalfChannel {
    pub fn new(region: SharedRegion, offset: usize) -> Result<Self> {
        region.check(offset, HALF_CHANNEL_SIZE)?;
        if offset % 4 != 0 {
            return Err(SmdError::Misaligned { offset });
        }
        Ok(Self { region, offset })
    }

    #[inline]
    pub fn raw_state(&self) -> Result<u32> {
        self.region.load_u32(self.offset + STATE)
    }

    pub fn state(&self) -> Result<ChannelState> {
        ChannelState::from_raw(self.raw_state()?)
    }

    pub fn set_state(&self, state: ChannelState) -> Result<()> {
        self.region.store_u32(self.offset + STATE, state as u32)
    }

    pub fn flag(&self, flag: Flag) -> Result<bool> {
        Ok(self.region.load_u8(self.offset + FLAGS + flag as usize)? != 0)
    }

    pub fn set_flag(&self, flag: Flag, on: bool) -> Result<()> {
        self.region.store_u8(self.offset + FLAGS + flag as usize, on as u8)
    }

    /// Read and clear a signalling flag. Returns whether it was set.
    pub fn take_flag(&self, flag: Flag) -> Result<bool> {
        if self.flag(flag)? {
            self.set_flag(flag, false)?;
            return Ok(true);
        }
        Ok(false)
    }

    #[inline]
    pub fn head(&self) -> Result<u32> {
        self.region.load_u32(self.offset + HEAD)
    }

    #[inline]
    pub fn set_head(&self, head: u32) -> Result<()> {
        self.region.store_u32(self.offset + HEAD, head)
    }

    #[inline]
    pub fn tail(&self) -> Result<u32> {
        self.region.load_u32(self.offset + TAIL)
    }

    #[inline]
    pub fn set_tail(&self, tail: u32) -> Result<()> {
        self.region.store_u32(self.offset + TAIL, tail)
    }

    pub fn signals(&self) -> Result<Signals> {
        let mut out = Signals::empty();
        for flag in Flag::ALL {
            if self.flag(flag)? {
                out |= flag.signal();
            }
        }
        Ok(out)
    }

    pub fn snapshot(&self) -> Result<HalfChannelSnapshot> {
        Ok(HalfChannelSnapshot {
            state: self.raw_state()?,
            signals: self.signals()?,
            tail: self.tail()?,
            head: self.head()?,
        })
    }
}

/// Point-in-time copy of a descriptor, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalfChannelSnapshot {
    /// Raw state word; may hold values outside [`ChannelState`] on a corrupt peer.
    pub state: u32,
    pub signals: Signals,
    pub tail: u32,
    pub head: u32,
}

impl HalfChannelSnapshot {
    pub fn state_name(&self) -> &'static str {
        ChannelState::from_raw(self.state).map_or("UNKNOWN", ChannelState::name)
    }
}
