use std::process::ExitCode;

use memblk::config::{CacheConfig, MemoryLayout, ROOTDEV};
use memblk::kernel::Kernel;
use memblk::shared::logger::setup_logger;

/// Boots on a disk image and touches both resource managers once.
///
/// Usage: `memblk <disk image>`
fn main() -> ExitCode {
    setup_logger();

    let Some(image) = std::env::args().nth(1) else {
        eprintln!("usage: memblk <disk image>");
        return ExitCode::FAILURE;
    };

    match boot(&image) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("boot on {image} failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn boot(image: &str) -> std::io::Result<()> {
    let kernel = Kernel::from_image(MemoryLayout::default(), CacheConfig::default(), image)?;

    let page = kernel.pages().allocate()?;
    log::info!("first free page at {page}, {:?}", kernel.pages().stats());
    kernel.pages().unpin(page);

    // Block 1 holds the superblock on an xv6 file system image.
    let sb = kernel.bcache().read(ROOTDEV, 1);
    log::info!("superblock head: {:02x?}", &sb.data()[..16]);
    kernel.bcache().release(sb);

    log::info!("{:?}", kernel.bcache().stats());
    Ok(())
}
