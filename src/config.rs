use crate::macros::static_assert;

pub const CARGO_PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// The size (in bytes) of a physical page frame.
pub const PAGE_SIZE: usize = 4096;

/// The size (in bytes) of a disk block held by one buffer.
pub const BSIZE: usize = 1024;

/// Number of independent buckets the buffer cache is sharded into.
/// A block lives in bucket `blockno % NBUCKETS`.
pub const NBUCKETS: usize = 5;

/// Number of buffer slots in each bucket. The total cache capacity is
/// `NBUCKETS * NBUF` blocks, but a bucket never borrows slots from another one.
pub const NBUF: usize = 30;

/// First physical address of RAM; the kernel image is loaded here.
pub const KERNBASE: u64 = 0x8000_0000;

/// One past the last physical address managed by the page allocator.
pub const PHYSTOP: u64 = KERNBASE + 128 * 1024 * 1024;

/// Device number of the root disk.
pub const ROOTDEV: u32 = 1;

/// Byte written over every page handed out by the allocator.
pub const JUNK_ON_ALLOC: u8 = 5;

/// Byte written over every page returned to the allocator.
pub const JUNK_ON_FREE: u8 = 1;

/// Whether pages are filled with junk on allocate/free by default.
pub const SCRIBBLE_PAGES: bool = cfg!(debug_assertions);

static_assert!(PAGE_SIZE.is_power_of_two());
static_assert!(BSIZE % 512 == 0, "blocks must be a whole number of sectors");
static_assert!(NBUCKETS > 0 && NBUF > 0);
static_assert!(KERNBASE % PAGE_SIZE as u64 == 0);
static_assert!(JUNK_ON_ALLOC != JUNK_ON_FREE);

/// The physical memory the page allocator is responsible for.
///
/// Frames are indexed from `kernel_base`, but only the ones in
/// `[page_round_up(kernel_end), memory_top)` are ever put on the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    pub kernel_base: u64,
    pub kernel_end: u64,
    pub memory_top: u64,
}

impl MemoryLayout {
    pub fn new(kernel_base: u64, kernel_end: u64, memory_top: u64) -> Self {
        assert!(
            kernel_base % PAGE_SIZE as u64 == 0,
            "kernel base {kernel_base:#x} is not page aligned"
        );
        assert!(
            kernel_base <= kernel_end && kernel_end <= memory_top,
            "invalid memory layout: base={kernel_base:#x} end={kernel_end:#x} top={memory_top:#x}"
        );
        MemoryLayout {
            kernel_base,
            kernel_end,
            memory_top,
        }
    }

    /// Size of the frame index space, kernel image included.
    pub fn npages(&self) -> usize {
        ((self.memory_top - self.kernel_base) / PAGE_SIZE as u64) as usize
    }
}

impl Default for MemoryLayout {
    /// The QEMU `virt` machine layout with a 1 MiB kernel image.
    fn default() -> Self {
        MemoryLayout::new(KERNBASE, KERNBASE + 0x10_0000, PHYSTOP)
    }
}

/// Shape of the buffer cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub buckets: usize,
    pub slots_per_bucket: usize,
}

impl CacheConfig {
    pub fn new(buckets: usize, slots_per_bucket: usize) -> Self {
        assert!(buckets > 0, "buffer cache needs at least one bucket");
        assert!(slots_per_bucket > 0, "buckets need at least one slot");
        CacheConfig {
            buckets,
            slots_per_bucket,
        }
    }

    /// Total number of blocks the cache can hold.
    pub fn capacity(&self) -> usize {
        self.buckets * self.slots_per_bucket
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig::new(NBUCKETS, NBUF)
    }
}
