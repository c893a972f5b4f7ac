use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::config::{CacheConfig, MemoryLayout, ROOTDEV};
use crate::memory::PageAllocator;
use crate::storage::buffer::{BufferCache, Clock, Ticks};
use crate::storage::disk::{BlockDevice, DiskScheduler};

/// The resource managers every other subsystem is built on. Constructed once
/// at boot and passed around by reference.
pub struct Kernel {
    /// The disk image backing the root device. None if the disk is not a file.
    image: Option<String>,
    pages: PageAllocator,
    bcache: BufferCache,
}

impl Kernel {
    pub fn boot(
        layout: MemoryLayout,
        cache: CacheConfig,
        disk: Arc<dyn BlockDevice>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        log::info!("booting: {:#x}..{:#x}", layout.kernel_base, layout.memory_top);
        Kernel {
            image: None,
            pages: PageAllocator::new(layout),
            bcache: BufferCache::new(cache, disk, clock),
        }
    }

    /// Boots with the root device served from a disk image file, created if
    /// missing.
    pub fn from_image(
        layout: MemoryLayout,
        cache: CacheConfig,
        path: impl AsRef<Path>,
    ) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let disk = Arc::new(DiskScheduler::new(ROOTDEV, file));
        let mut kernel = Kernel::boot(layout, cache, disk, Arc::new(Ticks::new()));
        kernel.image = Some(path.display().to_string());
        Ok(kernel)
    }

    pub fn pages(&self) -> &PageAllocator {
        &self.pages
    }

    pub fn bcache(&self) -> &BufferCache {
        &self.bcache
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }
}
