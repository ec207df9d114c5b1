//! Shared memory discovery from a flattened device tree.
//!
//! The boot loader describes the shared RAM either as a node compatible
//! with `qcom,smem` or as a `/reserved-memory/smem@...` carve-out. The
//! `fdt` crate parses the blob in place, so this works before any heap
//! exists.

use log::{debug, warn};

use crate::error::{Result, SmdError};

const FDT_MAGIC: u32 = 0xD00D_FEED;

/// Physical placement of the shared memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmemRegionInfo {
    pub base: u64,
    pub size: u64,
}

/// Locate the shared memory region in a device tree blob.
pub fn find_smem_region(blob: &[u8]) -> Result<SmemRegionInfo> {
    let fdt = fdt::Fdt::new(blob).map_err(|e| {
        warn!("dtb: invalid blob: {:?}", e);
        SmdError::InvalidArgument("invalid device tree blob")
    })?;
    parse(&fdt)
}

/// Same as [`find_smem_region`] for a blob handed over by address.
///
/// # Safety
///
/// `addr` must point to readable memory holding at least a complete FDT
/// header and, if the magic matches, the whole blob it describes.
pub unsafe fn find_smem_region_at(addr: *const u8) -> Result<SmemRegionInfo> {
    if addr.is_null() {
        return Err(SmdError::InvalidArgument("null device tree address"));
    }
    let magic = core::ptr::read_unaligned(addr as *const u32);
    if u32::from_be(magic) != FDT_MAGIC {
        return Err(SmdError::InvalidArgument("invalid device tree blob"));
    }
    let fdt = fdt::Fdt::from_ptr(addr)
        .map_err(|_| SmdError::InvalidArgument("invalid device tree blob"))?;
    parse(&fdt)
}

fn parse(fdt: &fdt::Fdt<'_>) -> Result<SmemRegionInfo> {
    // 1. Dedicated smem node
    if let Some(node) = fdt.find_compatible(&["qcom,smem"]) {
        if let Some(info) = first_reg(&node) {
            debug!("dtb: smem at {:#x} size {:#x} ({})", info.base, info.size, node.name);
            return Ok(info);
        }
    }

    // 2. Reserved memory carve-out
    if let Some(reserved) = fdt.find_node("/reserved-memory") {
        for child in reserved.children() {
            if !child.name.starts_with("smem") {
                continue;
            }
            if let Some(info) = first_reg(&child) {
                debug!("dtb: smem carve-out {} at {:#x} size {:#x}", child.name, info.base, info.size);
                return Ok(info);
            }
        }
    }

    Err(SmdError::NotFound)
}

fn first_reg(node: &fdt::node::FdtNode<'_, '_>) -> Option<SmemRegionInfo> {
    let reg = node.reg()?.next()?;
    let size = reg.size? as u64;
    if size == 0 {
        return None;
    }
    Some(SmemRegionInfo {
        base: reg.starting_address as u64,
        size,
    })
}
