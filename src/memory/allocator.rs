use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::addr::PhysAddr;
use crate::config::{MemoryLayout, JUNK_ON_ALLOC, JUNK_ON_FREE, PAGE_SIZE, SCRIBBLE_PAGES};
use crate::errors::AllocError;
use crate::macros::fatal;

/// Dense index of a frame, counted from the base of physical memory.
pub type FrameIndex = usize;

struct FreeList {
    /// The most recently freed frame is handed out first.
    frames: Vec<FrameIndex>,
    /// `on_list[i]` is true iff frame `i` is in `frames`.
    on_list: Box<[bool]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    /// Pages above the kernel image, whether free or not.
    pub total_pages: usize,
    pub free_pages: usize,
}

/// Hands out whole 4096-byte physical pages and tracks how many owners each
/// allocated page has.
///
/// # Design principles
///
/// - A frame's reference count is 0 iff the frame sits on the free list.
/// - The free list is guarded by a short lock that is never held across
///   anything slow. Reference counts of allocated frames are atomics and can be
///   bumped by any owner without taking it.
/// - Handing out or returning a page overwrites it with junk (when scribbling
///   is on) so stale readers see garbage instead of plausible data.
pub struct PageAllocator {
    layout: MemoryLayout,
    /// Index of the first frame above the kernel image.
    first_frame: FrameIndex,
    /// Contents of the frames in `first_frame..npages`.
    frames: Box<[RwLock<Box<[u8]>>]>,
    ref_counts: Box<[AtomicU32]>,
    free_list: Mutex<FreeList>,
    scribble: bool,
}

impl PageAllocator {
    /// Builds the allocator and puts every page between the end of the kernel
    /// and the top of memory on the free list.
    pub fn new(layout: MemoryLayout) -> Self {
        PageAllocator::with_scribbling(layout, SCRIBBLE_PAGES)
    }

    pub fn with_scribbling(layout: MemoryLayout, scribble: bool) -> Self {
        let npages = layout.npages();
        let start = PhysAddr::new(layout.kernel_end).page_round_up();
        let first_frame =
            ((start.as_u64().min(layout.memory_top) - layout.kernel_base) / PAGE_SIZE as u64)
                as usize;
        let first_frame = first_frame.min(npages);

        let frames = (first_frame..npages)
            .map(|_| RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice()))
            .collect();
        let ref_counts = (0..npages).map(|_| AtomicU32::new(0)).collect();

        let allocator = PageAllocator {
            layout,
            first_frame,
            frames,
            ref_counts,
            free_list: Mutex::new(FreeList {
                frames: Vec::with_capacity(npages - first_frame),
                on_list: vec![false; npages].into_boxed_slice(),
            }),
            scribble,
        };

        for idx in first_frame..npages {
            allocator.free(allocator.frame_addr(idx));
        }

        log::info!(
            "page allocator ready: {} pages in [{}, {:#x}), scribbling {}",
            npages - first_frame,
            start,
            layout.memory_top,
            if scribble { "on" } else { "off" },
        );
        allocator
    }

    /// Takes one page off the free list. The page comes back with a reference
    /// count of 1, owned by the caller.
    pub fn allocate(&self) -> Result<PhysAddr, AllocError> {
        let mut free_list = self.free_list.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(idx) = free_list.frames.pop() else {
            drop(free_list);
            log::warn!("kalloc: out of physical memory");
            return Err(AllocError::OutOfMemory);
        };
        free_list.on_list[idx] = false;
        self.ref_counts[idx].store(1, Ordering::Release);
        drop(free_list);

        if self.scribble {
            self.fill(idx, JUNK_ON_ALLOC);
        }

        let pa = self.frame_addr(idx);
        log::trace!("kalloc: handed out page {pa}");
        Ok(pa)
    }

    /// Returns a page to the free list.
    ///
    /// Normally only reached through [`unpin`](Self::unpin) once the last
    /// owner lets go. The address must be page aligned and lie between the end
    /// of the kernel and the top of memory, and the page must have no owners.
    pub fn free(&self, pa: PhysAddr) {
        if !pa.is_page_aligned()
            || pa.as_u64() < self.layout.kernel_end
            || pa.as_u64() >= self.layout.memory_top
        {
            fatal!("kfree: bad page address {pa}");
        }

        let idx = self.frame_index(pa);

        // `allocate` sets the count under this lock, so both checks and the
        // scribble must happen under it too.
        let mut free_list = self.free_list.lock().unwrap_or_else(PoisonError::into_inner);
        let count = self.ref_counts[idx].load(Ordering::Acquire);
        if count != 0 {
            drop(free_list);
            fatal!("kfree: page {pa} still has {count} references");
        }
        if free_list.on_list[idx] {
            drop(free_list);
            fatal!("kfree: double free of page {pa}");
        }

        if self.scribble {
            self.fill(idx, JUNK_ON_FREE);
        }
        free_list.on_list[idx] = true;
        free_list.frames.push(idx);
    }

    /// Adds an owner to an allocated page. `pa` may point anywhere inside it.
    pub fn pin(&self, pa: PhysAddr) {
        let idx = self.frame_index(pa);
        let pinned = self.ref_counts[idx].fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
            if c == 0 {
                None
            } else {
                c.checked_add(1)
            }
        });

        match pinned {
            Ok(_) => {}
            Err(0) => fatal!("pin: page {} is not allocated", pa.page_round_down()),
            Err(_) => fatal!("pin: reference count of page {} overflowed", pa.page_round_down()),
        }
    }

    /// Drops an owner of a page, freeing it when the last one goes away.
    pub fn unpin(&self, pa: PhysAddr) {
        let idx = self.frame_index(pa);
        let unpinned = self.ref_counts[idx].fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
            c.checked_sub(1)
        });

        match unpinned {
            Ok(1) => self.free(self.frame_addr(idx)),
            Ok(_) => {}
            Err(_) => fatal!("unpin: page {} is not referenced", pa.page_round_down()),
        }
    }

    pub fn count(&self, pa: PhysAddr) -> u32 {
        self.ref_counts[self.frame_index(pa)].load(Ordering::Acquire)
    }

    pub fn is_referenced(&self, pa: PhysAddr) -> bool {
        self.count(pa) > 0
    }

    /// True when the caller is the page's only owner and may write to it in
    /// place instead of copying it first.
    pub fn is_exclusively_owned(&self, pa: PhysAddr) -> bool {
        self.count(pa) == 1
    }

    /// Read access to the contents of the page containing `pa`.
    pub fn page(&self, pa: PhysAddr) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.page_data(self.frame_index(pa))
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access to the contents of the page containing `pa`.
    pub fn page_mut(&self, pa: PhysAddr) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.page_data(self.frame_index(pa))
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> MemoryStats {
        let free_list = self.free_list.lock().unwrap_or_else(PoisonError::into_inner);
        MemoryStats {
            total_pages: self.frames.len(),
            free_pages: free_list.frames.len(),
        }
    }

    pub fn layout(&self) -> MemoryLayout {
        self.layout
    }

    fn frame_index(&self, pa: PhysAddr) -> FrameIndex {
        let base = pa.page_round_down().as_u64();
        if base < self.layout.kernel_base {
            fatal!("invalid page {pa}: below physical memory");
        }
        let idx = ((base - self.layout.kernel_base) / PAGE_SIZE as u64) as usize;
        if idx >= self.ref_counts.len() {
            fatal!("invalid page {pa}: above physical memory");
        }
        idx
    }

    fn frame_addr(&self, idx: FrameIndex) -> PhysAddr {
        PhysAddr::new(self.layout.kernel_base + (idx * PAGE_SIZE) as u64)
    }

    fn page_data(&self, idx: FrameIndex) -> &RwLock<Box<[u8]>> {
        match idx.checked_sub(self.first_frame) {
            Some(offset) => &self.frames[offset],
            None => fatal!("page {} belongs to the kernel image", self.frame_addr(idx)),
        }
    }

    fn fill(&self, idx: FrameIndex, junk: u8) {
        self.page_data(idx)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fill(junk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KERNBASE;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;
    use std::panic::{self, AssertUnwindSafe};
    use std::thread;

    const NPAGES: u64 = 16;

    /// 16 frames, the kernel image covers the first two and a half.
    fn small_layout() -> MemoryLayout {
        MemoryLayout::new(
            KERNBASE,
            KERNBASE + 2 * PAGE_SIZE as u64 + 0x800,
            KERNBASE + NPAGES * PAGE_SIZE as u64,
        )
    }

    fn page_at(n: u64) -> PhysAddr {
        PhysAddr::new(KERNBASE + n * PAGE_SIZE as u64)
    }

    fn assert_free_list_consistent(allocator: &PageAllocator) {
        let free_list = allocator.free_list.lock().unwrap();
        for idx in allocator.first_frame..allocator.ref_counts.len() {
            let count = allocator.ref_counts[idx].load(Ordering::SeqCst);
            assert_eq!(
                free_list.on_list[idx],
                count == 0,
                "frame {idx} has count {count} but on_list={}",
                free_list.on_list[idx]
            );
        }
        let unique: HashSet<_> = free_list.frames.iter().collect();
        assert_eq!(unique.len(), free_list.frames.len(), "frame listed twice");
    }

    #[test]
    fn test_init_frees_every_page_above_kernel() {
        let allocator = PageAllocator::with_scribbling(small_layout(), true);

        let stats = allocator.stats();
        assert_eq!(stats.total_pages, 13);
        assert_eq!(stats.free_pages, 13);
        assert_free_list_consistent(&allocator);

        // Kernel frames are indexable but never handed out.
        assert_eq!(allocator.count(page_at(0)), 0);
        let mut handed_out = HashSet::new();
        while let Ok(pa) = allocator.allocate() {
            assert!(pa >= page_at(3), "{pa} overlaps the kernel image");
            assert!(pa < page_at(NPAGES));
            handed_out.insert(pa);
        }
        assert_eq!(handed_out.len(), 13);
    }

    #[test]
    fn test_allocate_hands_out_exclusive_junk_filled_page() {
        let allocator = PageAllocator::with_scribbling(small_layout(), true);

        let pa = allocator.allocate().unwrap();
        assert!(pa.is_page_aligned());
        assert_eq!(allocator.count(pa), 1);
        assert!(allocator.is_referenced(pa));
        assert!(allocator.is_exclusively_owned(pa));
        assert!(allocator.page(pa).iter().all(|&b| b == JUNK_ON_ALLOC));
        assert_eq!(allocator.stats().free_pages, 12);
    }

    #[test]
    fn test_free_fills_page_with_junk() {
        let allocator = PageAllocator::with_scribbling(small_layout(), true);

        let pa = allocator.allocate().unwrap();
        allocator.page_mut(pa).fill(0xAB);
        allocator.unpin(pa);

        assert_eq!(allocator.count(pa), 0);
        assert!(allocator.page(pa).iter().all(|&b| b == JUNK_ON_FREE));
        assert_free_list_consistent(&allocator);
    }

    #[test]
    fn test_no_scribbling_leaves_contents_alone() {
        let allocator = PageAllocator::with_scribbling(small_layout(), false);

        let pa = allocator.allocate().unwrap();
        assert!(allocator.page(pa).iter().all(|&b| b == 0));
        allocator.page_mut(pa)[0] = 42;
        allocator.unpin(pa);

        let again = allocator.allocate().unwrap();
        assert_eq!(again, pa, "the free list is LIFO");
        assert_eq!(allocator.page(again)[0], 42);
    }

    #[test]
    fn test_out_of_memory_is_recoverable() {
        let allocator = PageAllocator::with_scribbling(small_layout(), false);

        let pages: Vec<_> = std::iter::from_fn(|| allocator.allocate().ok()).collect();
        assert_eq!(pages.len(), 13);
        assert_eq!(allocator.allocate(), Err(AllocError::OutOfMemory));
        assert_eq!(allocator.stats().free_pages, 0);

        allocator.unpin(pages[4]);
        assert_eq!(allocator.allocate(), Ok(pages[4]));
    }

    #[test]
    fn test_shared_page_freed_by_last_owner() {
        let allocator = PageAllocator::with_scribbling(small_layout(), true);

        let a = allocator.allocate().unwrap();
        assert_eq!(allocator.count(a), 1);

        allocator.pin(a);
        assert_eq!(allocator.count(a), 2);
        assert!(!allocator.is_exclusively_owned(a));

        allocator.unpin(a);
        assert_eq!(allocator.count(a), 1);
        assert_eq!(allocator.stats().free_pages, 12);

        allocator.unpin(a);
        assert_eq!(allocator.count(a), 0);
        assert!(!allocator.is_referenced(a));
        assert_eq!(allocator.stats().free_pages, 13);
        assert_free_list_consistent(&allocator);

        let b = allocator.allocate().unwrap();
        assert_eq!(b, a);
        assert!(allocator.page(b).iter().all(|&b| b == JUNK_ON_ALLOC));
    }

    #[test]
    fn test_pin_accepts_interior_address() {
        let allocator = PageAllocator::with_scribbling(small_layout(), false);

        let pa = allocator.allocate().unwrap();
        allocator.pin(pa.offset(123));
        assert_eq!(allocator.count(pa.offset(4095)), 2);
        allocator.unpin(pa.offset(8));
        allocator.unpin(pa);
        assert_eq!(allocator.count(pa), 0);
    }

    #[test]
    #[should_panic(expected = "kfree: bad page address")]
    fn test_free_unaligned_is_fatal() {
        let allocator = PageAllocator::with_scribbling(small_layout(), false);
        let pa = allocator.allocate().unwrap();
        allocator.free(pa.offset(8));
    }

    #[test]
    #[should_panic(expected = "kfree: bad page address")]
    fn test_free_kernel_page_is_fatal() {
        let allocator = PageAllocator::with_scribbling(small_layout(), false);
        allocator.free(page_at(1));
    }

    #[test]
    #[should_panic(expected = "kfree: bad page address")]
    fn test_free_above_memory_is_fatal() {
        let allocator = PageAllocator::with_scribbling(small_layout(), false);
        allocator.free(page_at(NPAGES));
    }

    #[test]
    #[should_panic(expected = "still has 1 references")]
    fn test_free_referenced_page_is_fatal() {
        let allocator = PageAllocator::with_scribbling(small_layout(), false);
        let pa = allocator.allocate().unwrap();
        allocator.free(pa);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_is_fatal() {
        let allocator = PageAllocator::with_scribbling(small_layout(), false);
        let pa = allocator.allocate().unwrap();
        allocator.unpin(pa);
        allocator.free(pa);
    }

    #[test]
    #[should_panic(expected = "is not referenced")]
    fn test_unpin_free_page_is_fatal() {
        let allocator = PageAllocator::with_scribbling(small_layout(), false);
        allocator.unpin(page_at(5));
    }

    #[test]
    #[should_panic(expected = "is not allocated")]
    fn test_pin_free_page_is_fatal() {
        let allocator = PageAllocator::with_scribbling(small_layout(), false);
        allocator.pin(page_at(5));
    }

    #[test]
    #[should_panic(expected = "above physical memory")]
    fn test_count_out_of_range_is_fatal() {
        let allocator = PageAllocator::with_scribbling(small_layout(), false);
        allocator.count(page_at(NPAGES + 3));
    }

    #[test]
    #[should_panic(expected = "below physical memory")]
    fn test_pin_below_memory_is_fatal() {
        let allocator = PageAllocator::with_scribbling(small_layout(), false);
        allocator.pin(PhysAddr::new(KERNBASE - 1));
    }

    #[test]
    fn test_stale_free_racing_allocate_is_always_rejected() {
        // A single frame above the kernel image.
        let layout = MemoryLayout::new(
            KERNBASE,
            KERNBASE + PAGE_SIZE as u64,
            KERNBASE + 2 * PAGE_SIZE as u64,
        );
        let allocator = PageAllocator::with_scribbling(layout, true);
        let x = page_at(1);

        for i in 0..2000 {
            let stale_free = thread::scope(|s| {
                let freeing = s.spawn(|| {
                    panic::catch_unwind(AssertUnwindSafe(|| allocator.free(x))).is_ok()
                });
                for _ in 0..(i % 200) {
                    std::hint::spin_loop();
                }
                assert_eq!(allocator.allocate(), Ok(x));
                allocator.page_mut(x).fill(0x42);
                freeing.join().unwrap()
            });

            assert!(!stale_free, "round {i}: free accepted a page on the free list or in use");
            assert_eq!(allocator.count(x), 1);
            assert_eq!(allocator.allocate(), Err(AllocError::OutOfMemory));
            assert!(allocator.page(x).iter().all(|&b| b == 0x42));
            allocator.unpin(x);
            assert_free_list_consistent(&allocator);
        }
    }

    #[test]
    fn test_concurrent_allocate_and_release() {
        const THREADS: u64 = 8;
        const ROUNDS: usize = 500;

        let allocator = PageAllocator::with_scribbling(small_layout(), true);

        thread::scope(|s| {
            for t in 0..THREADS {
                let allocator = &allocator;
                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(t);
                    let mut held = Vec::new();
                    for _ in 0..ROUNDS {
                        if held.len() < 3 && rng.random_bool(0.6) {
                            // Running out is expected with 8 threads and 13 pages.
                            if let Ok(pa) = allocator.allocate() {
                                allocator.page_mut(pa).fill(t as u8 + 0x10);
                                held.push(pa);
                            }
                        } else if let Some(pa) = held.pop() {
                            // Nobody else may have been handed our page.
                            assert!(allocator.page(pa).iter().all(|&b| b == t as u8 + 0x10));
                            allocator.pin(pa);
                            allocator.unpin(pa);
                            assert_eq!(allocator.count(pa), 1);
                            allocator.unpin(pa);
                        }
                    }
                    for pa in held {
                        allocator.unpin(pa);
                    }
                });
            }
        });

        assert_eq!(allocator.stats().free_pages, 13);
        assert_free_list_consistent(&allocator);
    }
}
