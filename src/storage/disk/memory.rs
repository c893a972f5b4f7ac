use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use super::device::{BlockDevice, BlockId, TransferKind};
use crate::config::BSIZE;
use crate::errors::DiskError;

/// A RAM-backed device that serves any device number. Blocks that were never
/// written read back as zeros.
///
/// It counts transfers so callers can tell cache hits from disk reads, and it
/// can be slowed down to widen race windows.
pub struct MemDisk {
    blocks: Mutex<HashMap<BlockId, Box<[u8; BSIZE]>>>,
    latency: Option<Duration>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemDisk {
    pub fn new() -> Self {
        MemDisk {
            blocks: Mutex::new(HashMap::new()),
            latency: None,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Every transfer sleeps for `latency` before completing.
    pub fn with_latency(latency: Duration) -> Self {
        MemDisk {
            latency: Some(latency),
            ..MemDisk::new()
        }
    }

    /// Writes a block directly, bypassing the transfer counters.
    pub fn store(&self, block: BlockId, data: &[u8; BSIZE]) {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(block, Box::new(*data));
    }

    /// Current on-disk contents of a block, if it was ever written.
    pub fn load(&self, block: BlockId) -> Option<[u8; BSIZE]> {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&block)
            .map(|data| **data)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Default for MemDisk {
    fn default() -> Self {
        MemDisk::new()
    }
}

impl BlockDevice for MemDisk {
    fn transfer(
        &self,
        block: BlockId,
        data: &mut [u8; BSIZE],
        kind: TransferKind,
    ) -> Result<(), DiskError> {
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }

        let mut blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        match kind {
            TransferKind::Read => {
                self.reads.fetch_add(1, Ordering::SeqCst);
                match blocks.get(&block) {
                    Some(stored) => data.copy_from_slice(&stored[..]),
                    None => data.fill(0),
                }
            }
            TransferKind::Write => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                blocks.insert(block, Box::new(*data));
            }
        }
        log::trace!("memdisk: {kind:?} {block}");
        Ok(())
    }
}
