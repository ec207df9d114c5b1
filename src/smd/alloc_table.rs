//! Channel allocation table: 64 named slots binding a channel name to a
//! channel id.
//!
//! Element layout (32 bytes):
//!
//! ```text
//! 0   name[20]     NUL padded
//! 20  cid          u32
//! 24  type         edge | xfer << 8
//! 28  ref_count    u32, 0 means free
//! ```

use core::fmt;

use log::{debug, info, warn};

use crate::error::{Result, SmdError};
use crate::platform::{
    smd_channel_type, smd_type, smd_xfer_type, Edge, Host, XferType, SMD_CHANNELS,
    SMD_MAX_CH_NAME_LEN, SMEM_CHANNEL_ALLOC_TBL, SPINLOCK_ALLOC_TBL,
};
use crate::region::SharedRegion;
use crate::smem::SharedHeap;
use crate::sync::RemoteSpinLock;

const ENTRY_SIZE: usize = 32;
const NAME: usize = 0;
const CID: usize = 20;
const TYPE: usize = 24;
const REF_COUNT: usize = 28;

/// Size of the table item in the shared heap.
pub const ALLOC_TABLE_SIZE: u32 = (SMD_CHANNELS * ENTRY_SIZE) as u32;

/// A channel name as stored in the table: 1 to 19 bytes, NUL padded.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ChannelName([u8; SMD_MAX_CH_NAME_LEN]);

impl ChannelName {
    pub fn new(name: &str) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() >= SMD_MAX_CH_NAME_LEN {
            return Err(SmdError::InvalidArgument("channel name must be 1..=19 bytes"));
        }
        if bytes.contains(&0) {
            return Err(SmdError::InvalidArgument("channel name contains NUL"));
        }
        let mut raw = [0u8; SMD_MAX_CH_NAME_LEN];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(raw))
    }

    fn from_raw(raw: [u8; SMD_MAX_CH_NAME_LEN]) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(self.0.len());
        &self.0[..end]
    }

    /// The name as text; a peer may write bytes that are not UTF-8.
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(self.as_bytes()).unwrap_or("?")
    }
}

impl fmt::Debug for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one table element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocEntry {
    pub index: usize,
    pub name: ChannelName,
    pub cid: u32,
    pub ch_type: u32,
    pub xfer_type: u32,
    pub ref_count: u32,
}

impl AllocEntry {
    #[inline]
    pub fn is_free(&self) -> bool {
        self.ref_count == 0
    }
}

#[derive(Clone, Copy)]
pub struct AllocTable {
    region: SharedRegion,
    lock: RemoteSpinLock,
    host: Host,
}

impl AllocTable {
    pub fn new(heap: &SharedHeap) -> Result<Self> {
        let region = heap.alloc_region(SMEM_CHANNEL_ALLOC_TBL, ALLOC_TABLE_SIZE)?;
        let lock = heap.remote_lock(SPINLOCK_ALLOC_TBL)?;
        Ok(Self { region, lock, host: heap.host() })
    }

    /// Bind `name` to a channel id, creating the entry if needed. A live
    /// entry is only joined with the edge and transfer type it was created
    /// with.
    pub fn lookup_or_create(&self, name: &ChannelName, edge: Edge, xfer: XferType) -> Result<u32> {
        let _guard = self.lock.lock(self.host)?;

        if let Some(index) = self.find_live(name)? {
            let recorded = self.region.load_u32(entry(index) + TYPE)?;
            if recorded != smd_type(edge, xfer) {
                warn!(
                    "smd: '{}' is ch{} with type {:#x}, asked for {:?}/{:?}",
                    name, index, recorded, edge, xfer
                );
                return Err(SmdError::InvalidArgument("channel exists with another edge or transfer type"));
            }
            let (_, refs) = self.region.update_u32(entry(index) + REF_COUNT, |r| r.wrapping_add(1))?;
            debug!("smd: {} ref {} on ch{}", name, refs, index);
            return self.region.load_u32(entry(index) + CID);
        }

        for index in 0..SMD_CHANNELS {
            let base = entry(index);
            if self.region.compare_exchange_u32(base + REF_COUNT, 0, 1)?.is_err() {
                continue;
            }
            self.region.write_bytes(base + NAME, &name.0)?;
            self.region.store_u32(base + CID, index as u32)?;
            self.region.store_u32(base + TYPE, smd_type(edge, xfer))?;
            info!("smd: allocated ch{} '{}' ({:?}, {:?})", index, name, edge, xfer);
            return Ok(index as u32);
        }
        Err(SmdError::SlotExhausted)
    }

    /// Drop one reference. Returns the remaining count; at zero the slot is
    /// reusable.
    pub fn release(&self, cid: u32) -> Result<u32> {
        let index = check_cid(cid)?;
        let base = entry(index);
        let _guard = self.lock.lock(self.host)?;

        let refs = self.region.load_u32(base + REF_COUNT)?;
        if refs == 0 {
            return Err(SmdError::ProtocolOrder("release of a free channel slot"));
        }
        if refs == 1 {
            self.region.fill(base + NAME, SMD_MAX_CH_NAME_LEN, 0)?;
            self.region.store_u32(base + TYPE, 0)?;
            debug!("smd: ch{} released", index);
        }
        self.region.store_u32(base + REF_COUNT, refs - 1)?;
        Ok(refs - 1)
    }

    /// Channel id bound to `name`, if any live entry has it.
    pub fn lookup(&self, name: &ChannelName) -> Result<Option<u32>> {
        match self.find_live(name)? {
            Some(index) => Ok(Some(self.region.load_u32(entry(index) + CID)?)),
            None => Ok(None),
        }
    }

    pub fn entry(&self, cid: u32) -> Result<AllocEntry> {
        self.read_entry(check_cid(cid)?)
    }

    pub fn entries(&self) -> impl Iterator<Item = Result<AllocEntry>> + '_ {
        (0..SMD_CHANNELS).map(move |index| self.read_entry(index))
    }

    /// Edge and transfer type recorded for a live entry.
    pub fn channel_kind(&self, cid: u32) -> Result<(Edge, XferType)> {
        let e = self.entry(cid)?;
        if e.is_free() {
            return Err(SmdError::NotFound);
        }
        Ok((Edge::from_raw(e.ch_type)?, XferType::from_raw(e.xfer_type)?))
    }

    fn find_live(&self, name: &ChannelName) -> Result<Option<usize>> {
        for index in 0..SMD_CHANNELS {
            let e = self.read_entry(index)?;
            if !e.is_free() && e.name == *name {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    fn read_entry(&self, index: usize) -> Result<AllocEntry> {
        let base = entry(index);
        let mut raw = [0u8; SMD_MAX_CH_NAME_LEN];
        self.region.read_bytes(base + NAME, &mut raw)?;
        let ty = self.region.load_u32(base + TYPE)?;
        Ok(AllocEntry {
            index,
            name: ChannelName::from_raw(raw),
            cid: self.region.load_u32(base + CID)?,
            ch_type: smd_channel_type(ty),
            xfer_type: smd_xfer_type(ty),
            ref_count: self.region.load_u32(base + REF_COUNT)?,
        })
    }
}

#[inline]
fn entry(index: usize) -> usize {
    index * ENTRY_SIZE
}

fn check_cid(cid: u32) -> Result<usize> {
    let index = cid as usize;
    if index >= SMD_CHANNELS {
        return Err(SmdError::InvalidArgument("channel id out of range"));
    }
    Ok(index)
}
