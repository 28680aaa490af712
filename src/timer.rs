//! A periodic timer on top of embassy-time.
//!
//! [`SoftTimer::run`] stands in for the timer interrupt: while the timer is
//! armed it raises its notification bits once per period.

use alloc::boxed::Box;
use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};
use embassy_futures::select::{Either, select};
use embassy_sync::{
    blocking_mutex::{Mutex, raw::CriticalSectionRawMutex},
    signal::Signal,
};
use embassy_time::{Duration, Timer};

use crate::{
    error::Error,
    hal::PeriodicTimer,
    notify::{IsrNotifier, NotifyBits},
};

pub type SharedTimer = &'static SoftTimer;

pub struct SoftTimer {
    period: Mutex<CriticalSectionRawMutex, Cell<Duration>>,
    armed: AtomicBool,
    rearm: Signal<CriticalSectionRawMutex, ()>,
}

impl SoftTimer {
    pub const fn new(period: Duration) -> Self {
        Self {
            period: Mutex::new(Cell::new(period)),
            armed: AtomicBool::new(false),
            rearm: Signal::new(),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub fn period(&self) -> Duration {
        self.period.lock(|period| period.get())
    }

    /// Raises `bits` on `notifier` every period while armed.
    pub async fn run(&self, notifier: IsrNotifier<'_>, bits: NotifyBits) {
        loop {
            if !self.is_armed() {
                self.rearm.wait().await;
                continue;
            }

            // A start, stop or period change restarts the wait.
            match select(Timer::after(self.period()), self.rearm.wait()).await {
                Either::First(()) => {
                    if self.is_armed() {
                        notifier.notify_from_isr(bits);
                    }
                }
                Either::Second(()) => {}
            }
        }
    }
}

impl PeriodicTimer for SharedTimer {
    fn start(&mut self) -> Result<(), Error> {
        self.armed.store(true, Ordering::Release);
        self.rearm.signal(());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        self.armed.store(false, Ordering::Release);
        self.rearm.signal(());
        Ok(())
    }

    fn set_period(&mut self, period: Duration) -> Result<(), Error> {
        if period == Duration::from_ticks(0) {
            return Err(Error::Fail);
        }
        self.period.lock(|current| current.set(period));
        self.rearm.signal(());
        Ok(())
    }
}

/// Creates a stopped timer with the given period.
pub fn init(period: Duration) -> SharedTimer {
    Box::leak(Box::new(SoftTimer::new(period)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Notifier, control};
    use embassy_futures::{block_on, select::select};

    #[test]
    fn notifies_only_while_armed() {
        let timer = init(Duration::from_millis(5));
        let notifier = Notifier::new();

        block_on(async {
            let run = timer.run(notifier.isr_handle(), control::CONTROL_TICK);
            let check = async {
                let mut timer = timer;
                Timer::after(Duration::from_millis(20)).await;
                assert!(notifier.peek().is_empty());

                timer.start().unwrap();
                let bits = notifier
                    .wait(control::ALL, Duration::from_millis(200))
                    .await;
                assert_eq!(bits, Some(control::CONTROL_TICK));

                timer.stop().unwrap();
                // Let an in-flight period drain.
                Timer::after(Duration::from_millis(10)).await;
                let _ = notifier.wait(control::ALL, Duration::from_millis(1)).await;
                Timer::after(Duration::from_millis(20)).await;
                assert!(notifier.peek().is_empty());
            };
            select(run, check).await;
        });
    }

    #[test]
    fn rejects_zero_period() {
        let mut timer = init(Duration::from_millis(5));
        assert_eq!(timer.set_period(Duration::from_ticks(0)), Err(Error::Fail));
        timer.set_period(Duration::from_millis(250)).unwrap();
        assert_eq!(timer.period(), Duration::from_millis(250));
        assert!(!timer.is_armed());
    }
}
