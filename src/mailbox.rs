//! Bounded typed mailboxes.
//!
//! Producers never block indefinitely: a send that cannot complete within
//! its timeout drops the event and bumps a counter.

use core::sync::atomic::{AtomicUsize, Ordering};
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::{Channel, TrySendError},
};
use embassy_time::{Duration, with_timeout};

use crate::{error::Error, registry::MailboxId};

/// Sized for the worst burst between two processing passes.
pub const MAILBOX_CAPACITY: usize = 10;

pub struct Mailbox<T, const N: usize = MAILBOX_CAPACITY> {
    id: MailboxId,
    channel: Channel<CriticalSectionRawMutex, T, N>,
    dropped: AtomicUsize,
}

impl<T, const N: usize> Mailbox<T, N> {
    pub const fn new(id: MailboxId) -> Self {
        Self {
            id,
            channel: Channel::new(),
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> MailboxId {
        self.id
    }

    /// Queues `event`, waiting at most `timeout` for space.
    pub async fn send(&self, event: T, timeout: Duration) -> Result<(), Error> {
        match with_timeout(timeout, self.channel.send(event)).await {
            Ok(()) => Ok(()),
            Err(_timeout) => Err(self.record_drop()),
        }
    }

    /// Queues `event` only if there is space right now.
    pub fn try_send(&self, event: T) -> Result<(), Error> {
        match self.channel.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_event)) => Err(self.record_drop()),
        }
    }

    /// Waits at most `timeout` for an event.
    pub async fn receive(&self, timeout: Duration) -> Option<T> {
        with_timeout(timeout, self.channel.receive()).await.ok()
    }

    pub fn try_receive(&self) -> Option<T> {
        self.channel.try_receive().ok()
    }

    pub fn has_pending(&self) -> bool {
        !self.channel.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.channel.len()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of events dropped because the mailbox was full.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self) -> Error {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        Error::MailboxFull(self.id)
    }
}
