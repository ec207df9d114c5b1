//! Shared memory driver: named, bidirectional channels between two
//! processors.
//!
//! A channel is bound to an id by the [`AllocTable`]. Its two
//! half-channel descriptors and data FIFOs live in shared heap items keyed
//! by that id, in one of two layouts chosen from the SMD version table.

pub mod alloc_table;
pub mod channel;
pub mod half_channel;
pub mod ring;

pub use alloc_table::{AllocEntry, AllocTable, ChannelName};
pub use channel::{ChannelEvents, ModemSignals, SmdChannel};
pub use half_channel::{ChannelState, Flag, HalfChannel, HalfChannelSnapshot, Signals};
pub use ring::{Fifo, Ring};

use log::{debug, info};

use crate::config::SmdConfig;
use crate::doorbell::Doorbell;
use crate::error::{Result, SmdError};
use crate::intr_mux::IntrMux;
use crate::platform::{
    Edge, Host, XferType, SMD_BUF_SIZE, SMD_CHANNELS, SMEM_NUM_VERSIONS, SMEM_SMD_BASE_ID,
    SMEM_SMD_FIFO_BASE_ID, SMEM_VERSION_SMD, VERSION_DSPS, VERSION_MODEM, VERSION_QDSP6,
};
use crate::region::SharedRegion;
use crate::smem::SharedHeap;

use half_channel::HALF_CHANNEL_SIZE;

/// Size of the SMD version table item.
pub const SMD_VERSION_TABLE_SIZE: u32 = (SMEM_NUM_VERSIONS * 4) as u32;

/// Channel item size with data colocated after each descriptor.
pub const LEGACY_ITEM_SIZE: u32 = 2 * (HALF_CHANNEL_SIZE as u32 + SMD_BUF_SIZE);
/// Channel item size when the FIFOs live in their own item.
pub const SHARED_ITEM_SIZE: u32 = 2 * HALF_CHANNEL_SIZE as u32;

/// Where a channel keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `half0, data0, half1, data1` in one item of fixed size.
    Legacy,
    /// Both descriptors in one item, both FIFOs in a second item.
    SeparateFifo,
}

/// Raw view of one channel's descriptors, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub cid: u32,
    pub layout: Layout,
    pub half0: HalfChannelSnapshot,
    pub half1: HalfChannelSnapshot,
    pub fifo_size: u32,
}

/// One processor's SMD instance.
pub struct Smd<D: Doorbell> {
    heap: SharedHeap,
    table: AllocTable,
    mux: IntrMux,
    doorbell: D,
    config: SmdConfig,
}

impl<D: Doorbell> Smd<D> {
    /// Attach to the shared tables and publish this host's protocol version.
    pub fn new(heap: SharedHeap, config: SmdConfig, doorbell: D) -> Result<Self> {
        config.validate()?;
        if heap.host() != config.host {
            return Err(SmdError::InvalidArgument("heap and config disagree on host"));
        }
        let table = AllocTable::new(&heap)?;
        let mux = IntrMux::new(&heap)?;
        let versions = heap.alloc_region(SMEM_VERSION_SMD, SMD_VERSION_TABLE_SIZE)?;
        versions.store_u32(config.host.version_index() * 4, config.protocol_version)?;
        info!(
            "smd: {} up, protocol {:#010x}",
            config.host.name(),
            config.protocol_version
        );
        Ok(Self { heap, table, mux, doorbell, config })
    }

    #[inline]
    pub fn host(&self) -> Host {
        self.config.host
    }

    #[inline]
    pub fn config(&self) -> &SmdConfig {
        &self.config
    }

    #[inline]
    pub fn heap(&self) -> &SharedHeap {
        &self.heap
    }

    #[inline]
    pub fn alloc_table(&self) -> &AllocTable {
        &self.table
    }

    #[inline]
    pub fn intr_mux(&self) -> &IntrMux {
        &self.mux
    }

    #[inline]
    pub fn doorbell(&self) -> &D {
        &self.doorbell
    }

    /// Bump the mux counter towards `target` and ring its doorbell.
    pub fn signal(&self, target: Host) -> Result<()> {
        self.mux.signal(target, &self.doorbell)
    }

    /// SMD version table entry `index`, 0 while unpublished.
    pub fn version(&self, index: usize) -> Result<u32> {
        if index >= SMEM_NUM_VERSIONS {
            return Err(SmdError::InvalidArgument("version index"));
        }
        match self.heap.item_region(SMEM_VERSION_SMD) {
            Ok(table) => table.load_u32(index * 4),
            Err(SmdError::NotFound) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Layout new channels get: separate FIFOs once any remote processor
    /// advertises major version 1 or later.
    pub fn layout(&self) -> Result<Layout> {
        for index in [VERSION_MODEM, VERSION_QDSP6, VERSION_DSPS] {
            if self.version(index)? >> 16 >= 1 {
                return Ok(Layout::SeparateFifo);
            }
        }
        Ok(Layout::Legacy)
    }

    /// Open (or join) the channel `name` on `edge`.
    pub fn open(&self, name: &str, edge: Edge, xfer: XferType) -> Result<SmdChannel<'_, D>> {
        let name = ChannelName::new(name)?;
        let peer = edge.peer_of(self.host())?;
        let cid = self.table.lookup_or_create(&name, edge, xfer)?;

        let ring = match self.build_ring(cid, edge) {
            Ok(ring) => ring,
            Err(e) => {
                self.table.release(cid)?;
                return Err(e);
            }
        };
        SmdChannel::open(self, cid, name, xfer, peer, ring)
    }

    /// Descriptors of channel `cid`, or `NotFound` if its item does not
    /// exist yet.
    pub fn channel_snapshot(&self, cid: u32) -> Result<ChannelSnapshot> {
        channel_snapshot(&self.heap, cid)
    }

    fn build_ring(&self, cid: u32, edge: Edge) -> Result<Ring> {
        let (region, layout, fifo_size) = match channel_item(&self.heap, cid) {
            Ok(found) => found,
            Err(SmdError::NotFound) => self.create_channel_item(cid)?,
            Err(e) => return Err(e),
        };
        let (h0, h1) = half_offsets(layout);
        let half0 = HalfChannel::new(region, h0)?;
        let half1 = HalfChannel::new(region, h1)?;

        let (fifo0, fifo1) = match layout {
            Layout::Legacy => (
                Fifo::new(region, h0 + HALF_CHANNEL_SIZE, fifo_size)?,
                Fifo::new(region, h1 + HALF_CHANNEL_SIZE, fifo_size)?,
            ),
            Layout::SeparateFifo => {
                let data = self.heap.item_region(SMEM_SMD_FIFO_BASE_ID + cid)?;
                (
                    Fifo::new(data, 0, fifo_size)?,
                    Fifo::new(data, fifo_size as usize, fifo_size)?,
                )
            }
        };

        // The first host of an edge sends on half 0.
        if self.host() == edge.hosts().0 {
            Ring::new(half0, half1, fifo0, fifo1)
        } else {
            Ring::new(half1, half0, fifo1, fifo0)
        }
    }

    fn create_channel_item(&self, cid: u32) -> Result<(SharedRegion, Layout, u32)> {
        let layout = self.layout()?;
        let (region, fifo_size) = match layout {
            Layout::Legacy => (
                self.heap.alloc_region(SMEM_SMD_BASE_ID + cid, LEGACY_ITEM_SIZE)?,
                SMD_BUF_SIZE,
            ),
            Layout::SeparateFifo => {
                // FIFOs first so a peer that sees the descriptors also finds them.
                let fifo_size = self.config.fifo_size;
                let both = fifo_size
                    .checked_mul(2)
                    .ok_or(SmdError::InvalidArgument("fifo size overflows the item"))?;
                self.heap.alloc(SMEM_SMD_FIFO_BASE_ID + cid, both)?;
                (
                    self.heap.alloc_region(SMEM_SMD_BASE_ID + cid, SHARED_ITEM_SIZE)?,
                    fifo_size,
                )
            }
        };
        debug!("smd: ch{} item created ({:?}, fifo {:#x})", cid, layout, fifo_size);
        Ok((region, layout, fifo_size))
    }
}

/// Descriptors of channel `cid` read straight from the heap, or
/// `NotFound` if its item does not exist yet.
pub fn channel_snapshot(heap: &SharedHeap, cid: u32) -> Result<ChannelSnapshot> {
    let (region, layout, fifo_size) = channel_item(heap, cid)?;
    let (h0, h1) = half_offsets(layout);
    Ok(ChannelSnapshot {
        cid,
        layout,
        half0: HalfChannel::new(region, h0)?.snapshot()?,
        half1: HalfChannel::new(region, h1)?.snapshot()?,
        fifo_size,
    })
}

/// Snapshots of every channel whose item exists.
pub fn channel_snapshots(heap: &SharedHeap) -> impl Iterator<Item = ChannelSnapshot> + '_ {
    (0..SMD_CHANNELS as u32).filter_map(move |cid| channel_snapshot(heap, cid).ok())
}

/// Existing channel item, with its layout inferred from the item size.
fn channel_item(heap: &SharedHeap, cid: u32) -> Result<(SharedRegion, Layout, u32)> {
    check_cid(cid)?;
    let region = heap.item_region(SMEM_SMD_BASE_ID + cid)?;
    match region.len() as u32 {
        LEGACY_ITEM_SIZE => Ok((region, Layout::Legacy, SMD_BUF_SIZE)),
        SHARED_ITEM_SIZE => {
            let (_, fifo_bytes) = heap.get_entry(SMEM_SMD_FIFO_BASE_ID + cid)?;
            let fifo_size = fifo_bytes / 2;
            if !fifo_size.is_power_of_two() {
                return Err(SmdError::Corrupt("channel fifo size not a power of two"));
            }
            Ok((region, Layout::SeparateFifo, fifo_size))
        }
        _ => Err(SmdError::Corrupt("channel item has unexpected size")),
    }
}

fn half_offsets(layout: Layout) -> (usize, usize) {
    match layout {
        Layout::Legacy => (0, HALF_CHANNEL_SIZE + SMD_BUF_SIZE as usize),
        Layout::SeparateFifo => (0, HALF_CHANNEL_SIZE),
    }
}

fn check_cid(cid: u32) -> Result<()> {
    if cid as usize >= SMD_CHANNELS {
        return Err(SmdError::InvalidArgument("channel id out of range"));
    }
    Ok(())
}
