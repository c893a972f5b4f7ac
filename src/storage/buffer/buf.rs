use std::sync::atomic::Ordering;

use super::cache::BufferCache;
use crate::config::BSIZE;
use crate::macros::fatal;
use crate::storage::disk::BlockId;

/// Location of a buffer slot inside the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    pub bucket: usize,
    pub index: usize,
}

/// A referenced buffer whose content lock is held by the thread that read it.
///
/// Dropping the handle releases it, exactly like [`BufferCache::release`].
pub struct Buf<'a> {
    cache: &'a BufferCache,
    slot: SlotId,
    block: BlockId,
}

/// Keeps a buffer slot from being recycled after its [`Buf`] is released.
/// Must be handed back through [`BufferCache::unpin`].
#[must_use = "a pin that is never unpinned keeps its slot forever"]
#[derive(Debug, PartialEq, Eq)]
pub struct BufPin {
    pub(super) slot: SlotId,
    pub(super) block: BlockId,
}

impl<'a> Buf<'a> {
    pub(super) fn new(cache: &'a BufferCache, slot: SlotId, block: BlockId) -> Self {
        Buf { cache, slot, block }
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub(super) fn cache(&self) -> &'a BufferCache {
        self.cache
    }

    /// Whether the content has been loaded from disk.
    pub fn is_valid(&self) -> bool {
        self.cache.slot(self.slot).valid.load(Ordering::Acquire)
    }

    /// Whether the calling thread holds this buffer's content lock.
    pub fn holding(&self) -> bool {
        self.cache.slot(self.slot).content.holding()
    }

    pub fn data(&self) -> &[u8; BSIZE] {
        let content = &self.cache.slot(self.slot).content;
        if !content.holding() {
            fatal!("buffer {}: content lock not held", self.block);
        }
        // SAFETY: the calling thread holds the content lock and this handle is
        // the only one owning it; the borrow cannot outlive `self`.
        unsafe { &*content.data_ptr() }
    }

    pub fn data_mut(&mut self) -> &mut [u8; BSIZE] {
        let content = &self.cache.slot(self.slot).content;
        if !content.holding() {
            fatal!("buffer {}: content lock not held", self.block);
        }
        // SAFETY: as in `data`, and `&mut self` rules out other borrows of the
        // content through this handle.
        unsafe { &mut *content.data_ptr() }
    }
}

impl Drop for Buf<'_> {
    fn drop(&mut self) {
        self.cache.release_slot(self.slot, self.block);
    }
}

impl std::fmt::Debug for Buf<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buf")
            .field("block", &self.block)
            .field("slot", &self.slot)
            .finish()
    }
}
