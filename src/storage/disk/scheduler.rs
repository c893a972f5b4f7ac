use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use oneshot::{OneshotChannelReceiver, OneshotChannelSender};

use super::device::{block_to_file_offset, BlockDevice, BlockId, TransferKind};
use crate::config::BSIZE;
use crate::errors::DiskError;

/// A completed request hands the block buffer back to the caller.
pub type ScheduleResult = Result<Box<[u8; BSIZE]>, DiskError>;

enum QueueRequest {
    Read {
        blockno: u32,
        buffer: Box<[u8; BSIZE]>,
        channel: OneshotChannelSender<ScheduleResult>,
    },
    Write {
        blockno: u32,
        data: Box<[u8; BSIZE]>,
        channel: OneshotChannelSender<ScheduleResult>,
    },
    Shutdown,
}

struct RequestQueue {
    requests: Mutex<VecDeque<QueueRequest>>,
    available: Condvar,
}

/// Serves one device backed by a disk image. Requests are queued and carried
/// out in order by a dedicated worker thread; each caller blocks on a oneshot
/// channel until its request completes.
pub struct DiskScheduler {
    dev: u32,
    queue: Arc<RequestQueue>,
    handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new<R>(dev: u32, mut image: R) -> Self
    where
        R: Read + Write + Seek + Send + 'static,
    {
        let queue = Arc::new(RequestQueue {
            requests: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        });
        let moved_queue = queue.clone();

        let handle = std::thread::spawn(move || {
            let queue = moved_queue;

            loop {
                let request = {
                    let mut requests = queue
                        .requests
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    loop {
                        match requests.pop_front() {
                            Some(request) => break request,
                            None => {
                                requests = queue
                                    .available
                                    .wait(requests)
                                    .unwrap_or_else(PoisonError::into_inner)
                            }
                        }
                    }
                };

                match request {
                    QueueRequest::Read {
                        blockno,
                        mut buffer,
                        channel,
                    } => {
                        log::trace!("disk {dev}: reading blockno={blockno}");
                        let result = read_block(&mut image, blockno, &mut buffer).map(|_| buffer);
                        channel.send(result);
                    }
                    QueueRequest::Write {
                        blockno,
                        data,
                        channel,
                    } => {
                        log::trace!("disk {dev}: writing blockno={blockno}");
                        let result = write_block(&mut image, blockno, &data).map(|_| data);
                        channel.send(result);
                    }
                    QueueRequest::Shutdown => {
                        log::debug!("disk {dev}: scheduler shutting down");
                        if let Err(e) = image.flush() {
                            log::error!("disk {dev}: flush failed: {e}");
                        }
                        return;
                    }
                }
            }
        });

        DiskScheduler {
            dev,
            queue,
            handle: Some(handle),
        }
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn schedule_read(&self, blockno: u32) -> OneshotChannelReceiver<ScheduleResult> {
        let (tx, rx) = oneshot::channel::<ScheduleResult>();
        self.push(QueueRequest::Read {
            blockno,
            buffer: Box::new([0u8; BSIZE]),
            channel: tx,
        });
        rx
    }

    pub fn schedule_write(
        &self,
        blockno: u32,
        data: Box<[u8; BSIZE]>,
    ) -> OneshotChannelReceiver<ScheduleResult> {
        let (tx, rx) = oneshot::channel::<ScheduleResult>();
        self.push(QueueRequest::Write {
            blockno,
            data,
            channel: tx,
        });
        rx
    }

    /// A request pushed after the worker died is dropped along with its
    /// sender, so the caller's receiver reports the scheduler as gone.
    fn push(&self, request: QueueRequest) {
        if self.handle.as_ref().map_or(true, |h| h.is_finished()) {
            log::error!("disk {}: scheduler thread has finished", self.dev);
            return;
        }
        self.queue
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(request);
        self.queue.available.notify_one();
    }
}

impl BlockDevice for DiskScheduler {
    fn transfer(
        &self,
        block: BlockId,
        data: &mut [u8; BSIZE],
        kind: TransferKind,
    ) -> Result<(), DiskError> {
        if block.dev != self.dev {
            return Err(DiskError::NoSuchDevice(block.dev));
        }

        match kind {
            TransferKind::Read => {
                let buffer = self.schedule_read(block.blockno).recv()??;
                data.copy_from_slice(&buffer[..]);
            }
            TransferKind::Write => {
                self.schedule_write(block.blockno, Box::new(*data)).recv()??;
            }
        }
        Ok(())
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.push(QueueRequest::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("disk {}: scheduler thread panicked", self.dev);
            }
        }
    }
}

/// Reads past the end of the image are not errors: the missing part of the
/// block reads as zeros.
fn read_block<R: Read + Seek>(
    image: &mut R,
    blockno: u32,
    buffer: &mut [u8; BSIZE],
) -> Result<(), DiskError> {
    image.seek(SeekFrom::Start(block_to_file_offset(blockno)))?;

    let mut filled = 0;
    while filled < BSIZE {
        match image.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    buffer[filled..].fill(0);
    Ok(())
}

fn write_block<R: Write + Seek>(
    image: &mut R,
    blockno: u32,
    data: &[u8; BSIZE],
) -> Result<(), DiskError> {
    image.seek(SeekFrom::Start(block_to_file_offset(blockno)))?;
    image.write_all(data)?;
    Ok(())
}
