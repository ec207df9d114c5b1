//! Platform constants and processor identities (MSM 7x2x-class SoC).
//!
//! All shared-memory item ids, table sizes and host numbering live here so
//! they can be changed in one place when targeting a different SoC.

use crate::error::{Result, SmdError};

// ── Shared memory header ─────────────────────────────────────────────
pub const SMEM_NUM_ITEMS: usize = 512;
pub const SMEM_NUM_VERSIONS: usize = 32;
/// Number of cross-processor spinlock words in the spinlock array item.
pub const SMEM_NUM_SPINLOCKS: usize = 8;

// ── Shared memory item ids ───────────────────────────────────────────
pub const SMEM_PROC_COMM: u32 = 0;
pub const SMEM_HEAP_INFO: u32 = 1;
pub const SMEM_ALLOCATION_TABLE: u32 = 2;
pub const SMEM_VERSION_INFO: u32 = 3;
pub const SMEM_DIAG_ERR_MESSAGE: u32 = 6;
pub const SMEM_SPINLOCK_ARRAY: u32 = 7;
pub const SMEM_CHANNEL_ALLOC_TBL: u32 = 13;
pub const SMEM_SMD_BASE_ID: u32 = 14;
pub const SMEM_SMSM_SHARED_STATE: u32 = 85;
pub const SMEM_SMSM_INT_INFO: u32 = 86;
pub const SMEM_SLEEP_POWER_COLLAPSE_DISABLED: u32 = 89;
pub const SMEM_VERSION_SMD: u32 = 107;
pub const SMEM_SMD_SMSM_INTR_MUX: u32 = 206;
pub const SMEM_SMSM_CPU_INTR_MASK: u32 = 207;
pub const SMEM_SMD_FIFO_BASE_ID: u32 = 212;

// ── Spinlock assignments ─────────────────────────────────────────────
pub const SPINLOCK_SMEM_ALLOC: usize = 0;
pub const SPINLOCK_ALLOC_TBL: usize = 1;

// ── SMD ──────────────────────────────────────────────────────────────
pub const SMD_CHANNELS: usize = 64;
/// Per-direction buffer size of the legacy colocated layout.
pub const SMD_BUF_SIZE: u32 = 8192;
pub const SMD_MIN_FIFO: u32 = 1024;
/// Both directions of a separate-FIFO channel live in one heap item.
pub const SMD_MAX_FIFO: u32 = 1 << 30;
pub const SMD_MAX_CH_NAME_LEN: usize = 20;
/// Packet-mode header: payload length followed by four reserved words.
pub const SMD_HEADER_SIZE: usize = 20;
/// Default protocol version advertised in the SMD version table (v1.0).
pub const SMD_PROTOCOL_VERSION: u32 = 0x0001_0000;

// SMD version table indices.
pub const VERSION_QDSP6: usize = 4;
pub const VERSION_APPS_SBL: usize = 6;
pub const VERSION_MODEM_SBL: usize = 7;
pub const VERSION_APPS: usize = 8;
pub const VERSION_MODEM: usize = 9;
pub const VERSION_DSPS: usize = 10;

// ── SMSM ─────────────────────────────────────────────────────────────
pub const SMSM_NUM_ENTRIES: usize = 8;
pub const SMSM_NUM_HOSTS: usize = 3;
pub const SMSM_NUM_INTR_MUX: usize = 8;

pub const SMSM_APPS_STATE: usize = 0;
pub const SMSM_MODEM_STATE: usize = 1;
pub const SMSM_Q6_STATE: usize = 2;
pub const SMSM_APPS_DEM: usize = 3;
pub const SMSM_MODEM_DEM: usize = 4;
pub const SMSM_Q6_DEM: usize = 5;
pub const SMSM_POWER_MASTER_DEM: usize = 6;
pub const SMSM_TIME_MASTER_DEM: usize = 7;

pub const SMSM_INIT: u32 = 0x0000_0001;
pub const SMSM_OSENTERED: u32 = 0x0000_0002;
pub const SMSM_SMDWAIT: u32 = 0x0000_0004;
pub const SMSM_SMDINIT: u32 = 0x0000_0008;
pub const SMSM_RPCWAIT: u32 = 0x0000_0010;
pub const SMSM_RPCINIT: u32 = 0x0000_0020;
pub const SMSM_RESET: u32 = 0x0000_0040;
pub const SMSM_RSA: u32 = 0x0000_0080;
pub const SMSM_RUN: u32 = 0x0000_0100;
pub const SMSM_PWRC: u32 = 0x0000_0200;
pub const SMSM_TIMEWAIT: u32 = 0x0000_0400;
pub const SMSM_TIMEINIT: u32 = 0x0000_0800;
pub const SMSM_PWRC_EARLY_EXIT: u32 = 0x0000_1000;
pub const SMSM_WFPI: u32 = 0x0000_2000;
pub const SMSM_SLEEP: u32 = 0x0000_4000;
pub const SMSM_SLEEPEXIT: u32 = 0x0000_8000;
pub const SMSM_OEMSBL_RELEASE: u32 = 0x0001_0000;
pub const SMSM_APPS_REBOOT: u32 = 0x0002_0000;
pub const SMSM_SYSTEM_POWER_DOWN: u32 = 0x0004_0000;
pub const SMSM_SYSTEM_REBOOT: u32 = 0x0008_0000;
pub const SMSM_SYSTEM_DOWNLOAD: u32 = 0x0010_0000;
pub const SMSM_PWRC_SUSPEND: u32 = 0x0020_0000;
pub const SMSM_APPS_SHUTDOWN: u32 = 0x0040_0000;
pub const SMSM_SMD_LOOPBACK: u32 = 0x0080_0000;
pub const SMSM_RUN_QUIET: u32 = 0x0100_0000;
pub const SMSM_MODEM_WAIT: u32 = 0x0200_0000;
pub const SMSM_MODEM_BREAK: u32 = 0x0400_0000;
pub const SMSM_MODEM_CONTINUE: u32 = 0x0800_0000;
pub const SMSM_UNKNOWN: u32 = 0x8000_0000;

/// A processor sharing the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Host {
    Apps = 0,
    Modem = 1,
    Q6 = 2,
}

impl Host {
    pub const ALL: [Host; SMSM_NUM_HOSTS] = [Host::Apps, Host::Modem, Host::Q6];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(SmdError::InvalidArgument("unknown host"))
    }

    /// SMSM entry holding this host's state word.
    pub const fn state_entry(self) -> usize {
        match self {
            Host::Apps => SMSM_APPS_STATE,
            Host::Modem => SMSM_MODEM_STATE,
            Host::Q6 => SMSM_Q6_STATE,
        }
    }

    /// Slot of this host in the SMD version table.
    pub const fn version_index(self) -> usize {
        match self {
            Host::Apps => VERSION_APPS,
            Host::Modem => VERSION_MODEM,
            Host::Q6 => VERSION_QDSP6,
        }
    }

    /// Value a host writes into a remote spinlock word it owns.
    #[inline]
    pub const fn lock_token(self) -> u32 {
        self as u32 + 1
    }

    pub const fn name(self) -> &'static str {
        match self {
            Host::Apps => "apps",
            Host::Modem => "modem",
            Host::Q6 => "q6",
        }
    }
}

/// The pair of processors a channel connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Edge {
    AppsModem = 0,
    AppsQdsp = 1,
    ModemQdsp = 2,
}

impl Edge {
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(Edge::AppsModem),
            1 => Ok(Edge::AppsQdsp),
            2 => Ok(Edge::ModemQdsp),
            _ => Err(SmdError::Corrupt("unknown channel edge")),
        }
    }

    /// Endpoints of the edge. The first host sends on half-channel 0.
    pub const fn hosts(self) -> (Host, Host) {
        match self {
            Edge::AppsModem => (Host::Apps, Host::Modem),
            Edge::AppsQdsp => (Host::Apps, Host::Q6),
            Edge::ModemQdsp => (Host::Modem, Host::Q6),
        }
    }

    /// The other end of the edge as seen from `host`.
    pub fn peer_of(self, host: Host) -> Result<Host> {
        let (a, b) = self.hosts();
        if host == a {
            Ok(b)
        } else if host == b {
            Ok(a)
        } else {
            Err(SmdError::InvalidArgument("host is not an endpoint of this edge"))
        }
    }
}

/// Transfer mode of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum XferType {
    Stream = 1,
    Packet = 2,
}

impl XferType {
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            1 => Ok(XferType::Stream),
            2 => Ok(XferType::Packet),
            _ => Err(SmdError::Corrupt("unknown transfer type")),
        }
    }
}

/// Pack edge and transfer type into the allocation table `type` field.
#[inline]
pub const fn smd_type(edge: Edge, xfer: XferType) -> u32 {
    (edge as u32 & 0xFF) | ((xfer as u32 & 0xF) << 8)
}

#[inline]
pub const fn smd_channel_type(raw: u32) -> u32 {
    raw & 0x0000_00FF
}

#[inline]
pub const fn smd_xfer_type(raw: u32) -> u32 {
    (raw & 0x0000_0F00) >> 8
}
