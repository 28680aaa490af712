pub mod control;
pub mod display;
pub mod host_link;
pub mod packet;
pub mod system;

pub use control::ControlManager;
pub use display::DisplayManager;
pub use host_link::host_receiver;
pub use packet::PacketManager;
pub use system::SystemManager;

use alloc::format;
use embassy_time::{Duration, Timer};

use crate::{error::Error, memlog::SharedLogger};

/// A per-subsystem state machine, driven by [`run`].
#[allow(async_fn_in_trait)]
pub trait Manager {
    /// Prefix for this manager's log records.
    const NAME: &'static str;

    /// Wires collaborators and announces readiness. Called once.
    async fn initialize(&mut self) -> Result<(), Error>;

    /// One pass: pending notifications first, then every queued event.
    async fn process(&mut self) -> Result<(), Error>;
}

/// Task body shared by every manager. Never returns.
pub async fn run<M: Manager>(mut manager: M, log: SharedLogger, pass_delay: Duration) {
    // Retry bring-up until the collaborators answer.
    while let Err(error) = manager.initialize().await {
        log.error(format!("{}: initialize failed: {error}", M::NAME)).await;
        Timer::after(pass_delay).await;
    }
    log.info(format!("{}: initialized", M::NAME)).await;

    loop {
        match manager.process().await {
            Ok(()) => {}
            // A repeated start or stop leaves the state as it was.
            Err(error) if error.is_idempotency_guard() => {
                log.debug(format!("{}: {error}", M::NAME)).await;
            }
            Err(error) => log.warn(format!("{}: {error}", M::NAME)).await,
        }
        Timer::after(pass_delay).await;
    }
}
