use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::BSIZE;
use crate::macros::fatal;
use crate::storage::disk::BlockId;
use crate::sync::SleepLock;

/// The lowest timestamp: a released slot is the first one to be recycled.
pub(super) const OLDEST: u64 = 0;

/// Bookkeeping of one slot, guarded by the bucket lock.
struct SlotMeta {
    /// The block the slot holds, or last held. `None` until first used.
    block: Option<BlockId>,
    refcnt: u32,
    timestamp: u64,
}

pub(super) struct Slot {
    /// Whether the content reflects the block on disk. Only cleared while the
    /// slot has no references, so nobody holds or waits on `content` then.
    pub(super) valid: AtomicBool,
    pub(super) content: SleepLock<[u8; BSIZE]>,
}

pub(super) enum Lookup {
    /// The block was already cached in this slot.
    Hit(usize),
    /// An unreferenced slot was taken over for the block.
    Recycled { index: usize, evicted: Option<BlockId> },
    /// Every slot of the bucket is referenced.
    Exhausted,
}

/// A shard of the buffer cache with its own lock and its own slots.
pub(super) struct Bucket {
    meta: Mutex<Box<[SlotMeta]>>,
    slots: Box<[Slot]>,
}

impl Bucket {
    pub(super) fn new(nslots: usize) -> Self {
        let meta = (0..nslots)
            .map(|_| SlotMeta {
                block: None,
                refcnt: 0,
                timestamp: OLDEST,
            })
            .collect();
        let slots = (0..nslots)
            .map(|_| Slot {
                valid: AtomicBool::new(false),
                content: SleepLock::new("buffer", [0u8; BSIZE]),
            })
            .collect();

        Bucket {
            meta: Mutex::new(meta),
            slots,
        }
    }

    pub(super) fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    /// Finds the slot for `block` and takes a reference on it, recycling the
    /// unreferenced slot with the oldest timestamp if the block is not cached.
    /// Ties go to the lowest index. Hit detection and recycling happen in one
    /// pass under the bucket lock.
    pub(super) fn lookup(&self, block: BlockId, now: u64) -> Lookup {
        let mut meta = self.lock();

        let mut oldest: Option<(usize, u64)> = None;
        for (index, slot) in meta.iter_mut().enumerate() {
            if slot.block == Some(block) {
                slot.refcnt += 1;
                slot.timestamp = now;
                return Lookup::Hit(index);
            }
            if slot.refcnt == 0 && oldest.map_or(true, |(_, ts)| slot.timestamp < ts) {
                oldest = Some((index, slot.timestamp));
            }
        }

        let Some((index, _)) = oldest else {
            return Lookup::Exhausted;
        };

        let slot = &mut meta[index];
        let evicted = slot.block.replace(block);
        slot.refcnt = 1;
        slot.timestamp = now;
        self.slots[index].valid.store(false, Ordering::Release);

        Lookup::Recycled { index, evicted }
    }

    /// Drops one reference. The last one resets the timestamp to the oldest
    /// value, so the slot becomes the bucket's preferred eviction candidate.
    /// Returns the references left.
    pub(super) fn release(&self, index: usize) -> u32 {
        let mut meta = self.lock();
        let slot = &mut meta[index];
        if slot.refcnt == 0 {
            let block = slot.block;
            drop(meta);
            fatal!("brelse: buffer for {block:?} has no references");
        }
        slot.refcnt -= 1;
        if slot.refcnt == 0 {
            slot.timestamp = OLDEST;
        }
        slot.refcnt
    }

    pub(super) fn pin(&self, index: usize, block: BlockId) {
        let mut meta = self.lock();
        let slot = &mut meta[index];
        if slot.block != Some(block) || slot.refcnt == 0 {
            drop(meta);
            fatal!("bpin: slot {index} does not hold a referenced {block}");
        }
        slot.refcnt += 1;
    }

    /// Drops a pin. Unlike `release` this leaves the timestamp alone.
    pub(super) fn unpin(&self, index: usize, block: BlockId) {
        let mut meta = self.lock();
        let slot = &mut meta[index];
        if slot.block != Some(block) || slot.refcnt == 0 {
            drop(meta);
            fatal!("bunpin: slot {index} does not hold a referenced {block}");
        }
        slot.refcnt -= 1;
    }

    pub(super) fn ref_count(&self, block: BlockId) -> Option<u32> {
        self.lock()
            .iter()
            .find(|slot| slot.block == Some(block))
            .map(|slot| slot.refcnt)
    }

    #[cfg(test)]
    pub(super) fn timestamp(&self, index: usize) -> u64 {
        self.lock()[index].timestamp
    }

    fn lock(&self) -> MutexGuard<'_, Box<[SlotMeta]>> {
        self.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
