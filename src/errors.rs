use std::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The free list is empty.
    OutOfMemory,
}

#[derive(Debug)]
pub enum DiskError {
    IOError(std::io::Error),
    /// The transport does not serve the requested device.
    NoSuchDevice(u32),
    /// The worker thread serving the device went away before answering.
    SchedulerGone,
}

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocError::OutOfMemory => write!(f, "Out of physical memory"),
        }
    }
}

impl std::fmt::Display for DiskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiskError::IOError(err) => write!(f, "IO error: {}", err),
            DiskError::NoSuchDevice(dev) => write!(f, "No such device: {}", dev),
            DiskError::SchedulerGone => write!(f, "Disk scheduler is not running"),
        }
    }
}

impl std::convert::From<std::io::Error> for DiskError {
    fn from(err: std::io::Error) -> Self {
        DiskError::IOError(err)
    }
}

impl std::convert::From<oneshot::ReceiveError> for DiskError {
    fn from(_: oneshot::ReceiveError) -> Self {
        DiskError::SchedulerGone
    }
}

impl std::convert::From<AllocError> for std::io::Error {
    fn from(err: AllocError) -> Self {
        std::io::Error::new(std::io::ErrorKind::OutOfMemory, err)
    }
}

impl Error for AllocError {}

impl Error for DiskError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DiskError::IOError(err) => Some(err),
            _ => None,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_memory_converts_to_io_error() {
        let err = std::io::Error::from(AllocError::OutOfMemory);
        assert_eq!(err.kind(), std::io::ErrorKind::OutOfMemory);
        assert_eq!(err.to_string(), "Out of physical memory");
    }
}
