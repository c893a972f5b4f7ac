pub mod config;
mod errors;
mod macros;

pub use errors::{AllocError, DiskError};

pub mod shared {
    pub mod logger;
}

pub mod sync {
    mod sleeplock;

    pub use sleeplock::SleepLock;
}

pub mod memory {
    mod addr;
    mod allocator;

    pub use addr::PhysAddr;
    pub use allocator::{FrameIndex, MemoryStats, PageAllocator};
}

pub mod storage {
    pub mod disk {
        mod device;
        mod memory;
        mod scheduler;

        pub use device::{BlockDevice, BlockId, TransferKind};
        pub use memory::MemDisk;
        pub use scheduler::{DiskScheduler, ScheduleResult};
    }

    pub mod buffer {
        mod bucket;
        mod buf;
        mod cache;
        mod clock;

        pub use buf::{Buf, BufPin, SlotId};
        pub use cache::{BufferCache, CacheStats};
        pub use clock::{Clock, Ticks};
    }
}

pub mod kernel {
    mod boot;

    pub use boot::Kernel;
}
