//! Text dumps of shared state, one function per view.
//!
//! Every dump only reads shared memory and writes into a
//! `core::fmt::Write`, so it can back a debug file, a console command or a
//! test assertion alike. Items that do not exist yet are skipped.

use core::fmt::{self, Write};

use crate::error::{Result, SmdError};
use crate::intr_mux::IntrMux;
use crate::platform::{
    Host, SMEM_CHANNEL_ALLOC_TBL, SMEM_DIAG_ERR_MESSAGE, SMEM_NUM_VERSIONS, SMEM_SMD_SMSM_INTR_MUX,
    SMEM_SMSM_CPU_INTR_MASK, SMEM_SMSM_SHARED_STATE, SMEM_VERSION_SMD, SMSM_NUM_ENTRIES,
    SMSM_NUM_HOSTS,
};
use crate::region::SharedRegion;
use crate::smd::{self, AllocTable, HalfChannelSnapshot, Signals};
use crate::smem::SharedHeap;

/// Errors while dumping: either reading shared memory or the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DumpError {
    #[error(transparent)]
    Smd(#[from] SmdError),
    #[error("formatter error")]
    Fmt,
}

impl From<fmt::Error> for DumpError {
    fn from(_: fmt::Error) -> Self {
        DumpError::Fmt
    }
}

pub type DumpResult = core::result::Result<(), DumpError>;

/// Item region, or `None` while the item is unpublished.
fn optional_item(heap: &SharedHeap, item: u32) -> Result<Option<SharedRegion>> {
    match heap.item_region(item) {
        Ok(region) => Ok(Some(region)),
        Err(SmdError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

fn flag_chars(signals: Signals, letters: &[u8; 8]) -> [char; 8] {
    let bits = [
        Signals::DSR,
        Signals::CTS,
        Signals::CD,
        Signals::RI,
        Signals::HEAD,
        Signals::TAIL,
        Signals::STATE,
        Signals::BLOCK_READ_INTR,
    ];
    let mut out = ['?'; 8];
    for ((c, bit), letter) in out.iter_mut().zip(bits).zip(letters) {
        *c = if signals.contains(bit) {
            letter.to_ascii_uppercase() as char
        } else {
            *letter as char
        };
    }
    out
}

fn write_half<W: Write>(out: &mut W, half: &HalfChannelSnapshot, letters: &[u8; 8]) -> fmt::Result {
    write!(out, " {:>8}({:04}/{:04}) ", half.state_name(), half.tail, half.head)?;
    for c in flag_chars(half.signals, letters) {
        out.write_char(c)?;
    }
    Ok(())
}

/// `chNN: STATE(tail/head) flags <-> STATE(tail/head) flags : size` for
/// every channel whose item exists.
pub fn dump_channels<W: Write>(heap: &SharedHeap, out: &mut W) -> DumpResult {
    for ch in smd::channel_snapshots(heap) {
        write!(out, "ch{:02}:", ch.cid)?;
        write_half(out, &ch.half0, b"dcciwrsb")?;
        out.write_str(" <->")?;
        write_half(out, &ch.half1, b"drciwrsb")?;
        writeln!(out, " : {:5x}", ch.fifo_size)?;
    }
    Ok(())
}

/// Heap bookkeeping followed by every published TOC entry.
pub fn dump_heap<W: Write>(heap: &SharedHeap, out: &mut W) -> DumpResult {
    let info = heap.info()?;
    writeln!(
        out,
        "heap: init={} free={} remain={}",
        info.initialized, info.free_offset, info.heap_remaining
    )?;
    for entry in heap.toc() {
        writeln!(out, "{:04}: offset {:08x} size {:08x}", entry.item, entry.offset, entry.size)?;
    }
    Ok(())
}

pub fn dump_alloc_table<W: Write>(table: &AllocTable, out: &mut W) -> DumpResult {
    for entry in table.entries() {
        let e = entry?;
        writeln!(
            out,
            "name={} cid={} ch type={} xfer type={} ref_count={}",
            e.name, e.cid, e.ch_type, e.xfer_type, e.ref_count
        )?;
    }
    Ok(())
}

pub fn dump_smsm_state<W: Write>(heap: &SharedHeap, out: &mut W) -> DumpResult {
    let Some(states) = optional_item(heap, SMEM_SMSM_SHARED_STATE)? else {
        return Ok(());
    };
    for n in 0..SMSM_NUM_ENTRIES {
        writeln!(out, "entry {}: 0x{:08x}", n, states.load_u32(n * 4)?)?;
    }
    Ok(())
}

pub fn dump_intr_mask<W: Write>(heap: &SharedHeap, out: &mut W) -> DumpResult {
    let Some(masks) = optional_item(heap, SMEM_SMSM_CPU_INTR_MASK)? else {
        return Ok(());
    };
    for m in 0..SMSM_NUM_ENTRIES {
        write!(out, "entry {}:", m)?;
        for host in Host::ALL {
            let value = masks.load_u32((m * SMSM_NUM_HOSTS + host.index()) * 4)?;
            write!(out, "   host {}: 0x{:08x}", host.index(), value)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

pub fn dump_intr_mux<W: Write>(heap: &SharedHeap, out: &mut W) -> DumpResult {
    if optional_item(heap, SMEM_SMD_SMSM_INTR_MUX)?.is_none() {
        return Ok(());
    }
    let values = IntrMux::new(heap)?.values()?;
    for (n, v) in values.iter().enumerate() {
        writeln!(out, "entry {}: {}", n, v)?;
    }
    Ok(())
}

/// Header version words, `smem << 16 | proc_comm`.
pub fn dump_smem_versions<W: Write>(heap: &SharedHeap, out: &mut W) -> DumpResult {
    for n in 0..SMEM_NUM_VERSIONS {
        let version = heap.smem_version(n)?;
        writeln!(
            out,
            "entry {}: smem = {}  proc_comm = {}",
            n,
            version >> 16,
            version & 0xffff
        )?;
    }
    Ok(())
}

pub fn dump_smd_versions<W: Write>(heap: &SharedHeap, out: &mut W) -> DumpResult {
    let Some(versions) = optional_item(heap, SMEM_VERSION_SMD)? else {
        return Ok(());
    };
    for n in 0..SMEM_NUM_VERSIONS {
        let version = versions.load_u32(n * 4)?;
        writeln!(out, "entry {}: {}.{}", n, version >> 16, version & 0xffff)?;
    }
    Ok(())
}

/// The modem's last error message, a NUL-terminated string.
pub fn dump_diag_message<W: Write>(heap: &SharedHeap, out: &mut W) -> DumpResult {
    let Some(msg) = optional_item(heap, SMEM_DIAG_ERR_MESSAGE)? else {
        return Ok(());
    };
    out.write_str("diag: '")?;
    for n in 0..msg.len() {
        let b = msg.load_u8(n)?;
        if b == 0 {
            break;
        }
        out.write_char(if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })?;
    }
    out.write_str("'\n")?;
    Ok(())
}

/// Every view, each under a `== name ==` heading.
pub fn dump_all<W: Write>(heap: &SharedHeap, out: &mut W) -> DumpResult {
    writeln!(out, "== ch ==")?;
    dump_channels(heap, out)?;
    writeln!(out, "== mem ==")?;
    dump_heap(heap, out)?;
    writeln!(out, "== tbl ==")?;
    if optional_item(heap, SMEM_CHANNEL_ALLOC_TBL)?.is_some() {
        dump_alloc_table(&AllocTable::new(heap)?, out)?;
    }
    writeln!(out, "== state ==")?;
    dump_smsm_state(heap, out)?;
    writeln!(out, "== intr_mask ==")?;
    dump_intr_mask(heap, out)?;
    writeln!(out, "== intr_mux ==")?;
    dump_intr_mux(heap, out)?;
    writeln!(out, "== version ==")?;
    dump_smem_versions(heap, out)?;
    writeln!(out, "== smd_version ==")?;
    dump_smd_versions(heap, out)?;
    writeln!(out, "== diag ==")?;
    dump_diag_message(heap, out)?;
    Ok(())
}
