use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use super::bucket::{Bucket, Lookup, Slot};
use super::buf::{Buf, BufPin, SlotId};
use super::clock::Clock;
use crate::config::CacheConfig;
use crate::macros::fatal;
use crate::storage::disk::{BlockDevice, BlockId, TransferKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub disk_reads: u64,
    pub disk_writes: u64,
}

/// Cached copies of disk blocks, and the synchronization point for every
/// access to a block.
///
/// # Design principles
///
/// - The pool is split into buckets by `blockno % buckets`. A bucket has its
///   own lock and its own slots and never borrows capacity from another one.
/// - Bucket locks guard only slot bookkeeping and are dropped before anything
///   that can block. Buffer content is guarded by a per-slot sleep lock, held
///   by at most one thread at a time.
/// - A slot can be recycled only when nobody references it. Among those, the
///   one with the oldest timestamp goes first. Releasing the last reference
///   resets the timestamp to the oldest value, so the most recently released
///   buffer is recycled first. Pins do not reset it when dropped.
///
/// # Usage
///
/// - [`read`](Self::read) returns a locked buffer with the block's content.
/// - After changing the content, [`write`](Self::write) it to disk.
/// - [`release`](Self::release) (or drop) the buffer as soon as possible; no
///   other thread can use the block until then.
pub struct BufferCache {
    config: CacheConfig,
    buckets: Box<[Bucket]>,
    /// The device driver moving blocks in and out of buffers.
    disk: Arc<dyn BlockDevice>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    disk_reads: AtomicU64,
    disk_writes: AtomicU64,
}

impl BufferCache {
    pub fn new(config: CacheConfig, disk: Arc<dyn BlockDevice>, clock: Arc<dyn Clock>) -> Self {
        let buckets = (0..config.buckets)
            .map(|_| Bucket::new(config.slots_per_bucket))
            .collect();

        log::info!(
            "buffer cache ready: {} buffers in {} buckets of {}",
            config.capacity(),
            config.buckets,
            config.slots_per_bucket
        );

        BufferCache {
            config,
            buckets,
            disk,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            disk_reads: AtomicU64::new(0),
            disk_writes: AtomicU64::new(0),
        }
    }

    /// Returns a locked buffer holding the current content of the block.
    /// Blocks while another thread holds the same buffer.
    pub fn read(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let block = BlockId::new(dev, blockno);
        let mut buf = self.get(block);
        if !buf.is_valid() {
            self.disk_reads.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.disk.transfer(block, buf.data_mut(), TransferKind::Read) {
                fatal!("bread: reading {block} failed: {e}");
            }
            self.slot(buf.slot()).valid.store(true, Ordering::Release);
        }
        buf
    }

    /// Writes the buffer's content to disk. The caller must hold the buffer.
    pub fn write(&self, buf: &mut Buf<'_>) {
        self.check_owner(buf, "bwrite");
        if !buf.holding() {
            fatal!("bwrite: {} content lock not held", buf.block());
        }

        let block = buf.block();
        self.disk_writes.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.disk.transfer(block, buf.data_mut(), TransferKind::Write) {
            fatal!("bwrite: writing {block} failed: {e}");
        }
    }

    /// Unlocks the buffer and drops the caller's reference to it.
    pub fn release(&self, buf: Buf<'_>) {
        self.check_owner(&buf, "brelse");
        drop(buf);
    }

    /// Takes an extra reference on the buffer's slot, so it keeps its block
    /// across release and re-read cycles without blocking other readers.
    pub fn pin(&self, buf: &Buf<'_>) -> BufPin {
        self.check_owner(buf, "bpin");
        let slot = buf.slot();
        self.buckets[slot.bucket].pin(slot.index, buf.block());
        BufPin {
            slot,
            block: buf.block(),
        }
    }

    pub fn unpin(&self, pin: BufPin) {
        self.buckets[pin.slot.bucket].unpin(pin.slot.index, pin.block);
    }

    /// Number of references on the slot caching the block, if any.
    pub fn ref_count(&self, block: BlockId) -> Option<u32> {
        self.buckets[self.bucket_of(block)].ref_count(block)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            disk_reads: self.disk_reads.load(Ordering::Relaxed),
            disk_writes: self.disk_writes.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    pub(super) fn slot(&self, id: SlotId) -> &Slot {
        self.buckets[id.bucket].slot(id.index)
    }

    /// Unlocks a buffer and drops its reference. Called when a [`Buf`] goes
    /// away.
    pub(super) fn release_slot(&self, id: SlotId, block: BlockId) {
        let slot = self.slot(id);
        if !slot.content.holding() {
            // Unwinding out of a failed lock check on a foreign thread. The
            // lock and the reference still belong to the holder.
            if thread::panicking() {
                return;
            }
            fatal!("brelse: {block} content lock not held");
        }

        slot.content.release();
        let left = self.buckets[id.bucket].release(id.index);
        log::trace!("brelse: {block} has {left} references left");
    }

    fn bucket_of(&self, block: BlockId) -> usize {
        block.blockno as usize % self.buckets.len()
    }

    /// Looks the block up in its bucket, recycling a slot if it is not cached.
    /// In either case returns the buffer locked.
    fn get(&self, block: BlockId) -> Buf<'_> {
        let bucket = self.bucket_of(block);
        let index = match self.buckets[bucket].lookup(block, self.clock.now()) {
            Lookup::Hit(index) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                log::trace!("bget: {block} cached in slot {index} of bucket {bucket}");
                index
            }
            Lookup::Recycled { index, evicted } => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                match evicted {
                    Some(old) => log::debug!(
                        "bget: evicting {old} from slot {index} of bucket {bucket} for {block}"
                    ),
                    None => log::debug!("bget: slot {index} of bucket {bucket} now holds {block}"),
                }
                index
            }
            Lookup::Exhausted => fatal!("bget: no buffers left in bucket {bucket} for {block}"),
        };

        let slot = SlotId { bucket, index };
        self.slot(slot).content.acquire();
        Buf::new(self, slot, block)
    }

    fn check_owner(&self, buf: &Buf<'_>, op: &str) {
        if !std::ptr::eq(buf.cache(), self) {
            fatal!("{op}: {} belongs to another buffer cache", buf.block());
        }
    }
}
