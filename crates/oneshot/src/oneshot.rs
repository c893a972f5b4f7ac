use std::sync::{Arc, Condvar, Mutex, PoisonError};

use crate::errors::ReceiveError;

enum Slot<T> {
    Empty,
    Full(T),
    /// The sender went away without sending.
    Closed,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    condvar: Condvar,
}

/// Sending half of a single-use channel. Dropping it unsent wakes the
/// receiver with [`ReceiveError::Closed`].
pub struct OneshotChannelSender<T> {
    shared: Option<Arc<Shared<T>>>,
}

pub struct OneshotChannelReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> OneshotChannelSender<T> {
    /// Stores the value and wakes the receiver. If the receiver is gone the
    /// value is dropped together with the channel.
    pub fn send(mut self, data: T) {
        if let Some(shared) = self.shared.take() {
            let mut slot = shared.slot.lock().unwrap_or_else(PoisonError::into_inner);
            *slot = Slot::Full(data);
            shared.condvar.notify_one();
        }
    }
}

impl<T> Drop for OneshotChannelSender<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            let mut slot = shared.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Slot::Empty = *slot {
                *slot = Slot::Closed;
            }
            shared.condvar.notify_one();
        }
    }
}

impl<T> OneshotChannelReceiver<T> {
    /// Blocks until the sender either sends or is dropped.
    pub fn recv(self) -> Result<T, ReceiveError> {
        let mut slot = self
            .shared
            .slot
            .lock()
            .map_err(|err| ReceiveError::Other(err.to_string()))?;

        while let Slot::Empty = *slot {
            slot = self
                .shared
                .condvar
                .wait(slot)
                .map_err(|err| ReceiveError::Other(err.to_string()))?;
        }

        match std::mem::replace(&mut *slot, Slot::Closed) {
            Slot::Full(data) => Ok(data),
            Slot::Closed => Err(ReceiveError::Closed),
            Slot::Empty => unreachable!("woke up on an empty slot"),
        }
    }
}

pub fn channel<T>() -> (OneshotChannelSender<T>, OneshotChannelReceiver<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::Empty),
        condvar: Condvar::new(),
    });

    (
        OneshotChannelSender {
            shared: Some(shared.clone()),
        },
        OneshotChannelReceiver { shared },
    )
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    #[test]
    fn test_oneshot_two_threads() {
        let (tx, rx) = channel::<u64>();

        thread::spawn(move || {
            tx.send(69);
        });

        let data = match rx.recv() {
            Ok(num) => num,
            Err(_) => unreachable!(),
        };
        assert_eq!(data, 69);
    }

    #[test]
    fn test_oneshot_sender_dropped() {
        let (tx, rx) = channel::<u64>();

        thread::spawn(move || {
            drop(tx);
        });

        assert_eq!(rx.recv(), Err(ReceiveError::Closed));
    }

    #[test]
    fn test_oneshot_send_before_recv() {
        let (tx, rx) = channel::<&'static str>();
        tx.send("done");
        assert_eq!(rx.recv(), Ok("done"));
    }
}
