use std::fmt;

use crate::config::BSIZE;
use crate::errors::DiskError;

/// Identifies one block on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    pub dev: u32,
    pub blockno: u32,
}

impl BlockId {
    pub const fn new(dev: u32, blockno: u32) -> Self {
        BlockId { dev, blockno }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "dev={} blockno={}", self.dev, self.blockno)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Disk to buffer.
    Read,
    /// Buffer to disk.
    Write,
}

/// The driver side of the buffer cache: moves one block between a buffer and
/// the device, blocking the caller until the transfer is complete.
pub trait BlockDevice: Send + Sync {
    fn transfer(
        &self,
        block: BlockId,
        data: &mut [u8; BSIZE],
        kind: TransferKind,
    ) -> Result<(), DiskError>;
}

/// Byte offset of a block inside a disk image.
pub(crate) fn block_to_file_offset(blockno: u32) -> u64 {
    blockno as u64 * BSIZE as u64
}
