//! Per-processor configuration.

use crate::error::{Result, SmdError};
use crate::platform::{Host, SMD_BUF_SIZE, SMD_MAX_FIFO, SMD_MIN_FIFO, SMD_PROTOCOL_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmdConfig {
    /// The processor this instance runs on.
    pub host: Host,
    /// Value published in this host's slot of the SMD version table.
    /// `major << 16 | minor`; major 1 selects separate FIFOs.
    pub protocol_version: u32,
    /// Per-direction FIFO size for channels created with separate FIFOs.
    pub fifo_size: u32,
}

impl SmdConfig {
    pub const fn new(host: Host) -> Self {
        Self {
            host,
            protocol_version: SMD_PROTOCOL_VERSION,
            fifo_size: SMD_BUF_SIZE,
        }
    }

    pub const fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    pub const fn with_fifo_size(mut self, size: u32) -> Self {
        self.fifo_size = size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.fifo_size.is_power_of_two() {
            return Err(SmdError::InvalidArgument("fifo size must be a power of two"));
        }
        if self.fifo_size < SMD_MIN_FIFO {
            return Err(SmdError::InvalidArgument("fifo size below minimum"));
        }
        if self.fifo_size > SMD_MAX_FIFO {
            return Err(SmdError::InvalidArgument("fifo size above maximum"));
        }
        Ok(())
    }
}
