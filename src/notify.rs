//! Per-task notification bits, for timer and interrupt driven wakeups.
//!
//! Bits set between two waits coalesce into a single wakeup, so consumers
//! must test every bit they recognize.

use core::ops::{BitOr, BitOrAssign};
use core::sync::atomic::{AtomicU32, Ordering};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::{Duration, Instant, with_deadline};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotifyBits(pub u32);

impl NotifyBits {
    pub const NONE: NotifyBits = NotifyBits(0);
    pub const ALL: NotifyBits = NotifyBits(u32::MAX);

    pub const fn contains(self, other: NotifyBits) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Bits of `self` not present in `recognized`.
    pub const fn without(self, recognized: NotifyBits) -> NotifyBits {
        NotifyBits(self.0 & !recognized.0)
    }
}

impl BitOr for NotifyBits {
    type Output = NotifyBits;

    fn bitor(self, rhs: NotifyBits) -> NotifyBits {
        NotifyBits(self.0 | rhs.0)
    }
}

impl BitOrAssign for NotifyBits {
    fn bitor_assign(&mut self, rhs: NotifyBits) {
        self.0 |= rhs.0;
    }
}

/// Bits recognized by the control task.
pub mod control {
    use super::NotifyBits;

    /// Sampling timer elapsed, a fresh measurement can be read.
    pub const MEASUREMENT_READY: NotifyBits = NotifyBits(1 << 0);
    /// Control timer elapsed, run one PID step.
    pub const CONTROL_TICK: NotifyBits = NotifyBits(1 << 1);
    pub const ALL: NotifyBits = NotifyBits(MEASUREMENT_READY.0 | CONTROL_TICK.0);
}

/// Bits recognized by the packet task.
pub mod packet {
    use super::NotifyBits;

    /// A complete frame was received from the host link.
    pub const RX_COMPLETE: NotifyBits = NotifyBits(1 << 0);
    pub const ALL: NotifyBits = RX_COMPLETE;
}

/// One task's notification word.
pub struct Notifier {
    pending: AtomicU32,
    wake: Signal<CriticalSectionRawMutex, ()>,
}

impl Notifier {
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
            wake: Signal::new(),
        }
    }

    /// Sets `bits` and wakes the owning task.
    pub fn notify(&self, bits: NotifyBits) {
        self.pending.fetch_or(bits.0, Ordering::AcqRel);
        self.wake.signal(());
    }

    /// A handle restricted to non-blocking notification, for interrupt handlers.
    pub fn isr_handle(&self) -> IsrNotifier<'_> {
        IsrNotifier { notifier: self }
    }

    /// Pending bits, without clearing them.
    pub fn peek(&self) -> NotifyBits {
        NotifyBits(self.pending.load(Ordering::Acquire))
    }

    /// Waits until any bit in `mask` is set or `timeout` elapses, then
    /// atomically clears and returns the set bits in `mask`.
    pub async fn wait(&self, mask: NotifyBits, timeout: Duration) -> Option<NotifyBits> {
        let deadline = Instant::now() + timeout;
        loop {
            let taken = self.take(mask);
            if !taken.is_empty() {
                return Some(taken);
            }
            if with_deadline(deadline, self.wake.wait()).await.is_err() {
                let taken = self.take(mask);
                return (!taken.is_empty()).then_some(taken);
            }
        }
    }

    fn take(&self, mask: NotifyBits) -> NotifyBits {
        let previous = self.pending.fetch_and(!mask.0, Ordering::AcqRel);
        NotifyBits(previous & mask.0)
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt-context side of a [`Notifier`]: it can only set bits and never blocks.
#[derive(Clone, Copy)]
pub struct IsrNotifier<'a> {
    notifier: &'a Notifier,
}

impl IsrNotifier<'_> {
    pub fn notify_from_isr(&self, bits: NotifyBits) {
        self.notifier.notify(bits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn coalesced_bits_are_delivered_together() {
        let notifier = Notifier::new();
        notifier.notify(control::CONTROL_TICK);
        notifier.isr_handle().notify_from_isr(control::MEASUREMENT_READY);

        let bits = block_on(notifier.wait(control::ALL, Duration::from_millis(10)));
        assert_eq!(bits, Some(control::ALL));
        assert!(notifier.peek().is_empty());
    }

    #[test]
    fn bits_outside_the_mask_stay_pending() {
        let notifier = Notifier::new();
        notifier.notify(NotifyBits(1 << 4) | control::CONTROL_TICK);

        let bits = block_on(notifier.wait(control::ALL, Duration::from_millis(10)));
        assert_eq!(bits, Some(control::CONTROL_TICK));
        assert_eq!(notifier.peek(), NotifyBits(1 << 4));
    }

    #[test]
    fn wait_times_out_without_bits() {
        let notifier = Notifier::new();
        let start = Instant::now();
        let bits = block_on(notifier.wait(control::ALL, Duration::from_millis(20)));
        assert_eq!(bits, None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn stale_wakeup_without_bits_keeps_waiting() {
        let notifier = Notifier::new();
        // Wakes the signal but sets nothing the waiter recognizes.
        notifier.notify(NotifyBits::NONE);
        let bits = block_on(notifier.wait(control::ALL, Duration::from_millis(10)));
        assert_eq!(bits, None);
    }

    #[test]
    fn without_reports_unrecognized_bits() {
        let bits = control::ALL | NotifyBits(1 << 7);
        assert_eq!(bits.without(control::ALL), NotifyBits(1 << 7));
        assert!(bits.contains(control::MEASUREMENT_READY));
    }
}
