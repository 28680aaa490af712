//! The coordinator.
//!
//! Turns `Ready` announcements into `Start` commands, tracks which
//! subsystems run, and fans reference and measurement updates out to the
//! running ones. Each destination has its own dedup cache holding the last
//! value actually delivered to it.

use alloc::format;

use crate::{
    config::TaskTiming,
    error::Error,
    event::{ControlEvent, DisplayEvent, Measurement, Origin, PacketEvent, Reference, SystemEvent},
    notify::NotifyBits,
    registry::{SharedResources, TaskId},
};

use super::Manager;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunningSet {
    pub control: bool,
    pub display: bool,
    pub packet: bool,
}

impl RunningSet {
    fn flag_mut(&mut self, origin: Origin) -> &mut bool {
        match origin {
            Origin::Control => &mut self.control,
            Origin::Display => &mut self.display,
            Origin::Packet => &mut self.packet,
        }
    }
}

#[derive(Debug, Default)]
struct SentCache {
    control_reference: Option<Reference>,
    display_reference: Option<Reference>,
    display_measure: Option<Measurement>,
    packet_measure: Option<Measurement>,
}

impl SentCache {
    fn forget(&mut self, origin: Origin) {
        match origin {
            Origin::Control => self.control_reference = None,
            Origin::Display => {
                self.display_reference = None;
                self.display_measure = None;
            }
            Origin::Packet => self.packet_measure = None,
        }
    }
}

fn reference_changed(last: &Option<Reference>, new: &Reference) -> bool {
    !last.is_some_and(|last| last.bit_eq(new))
}

fn measure_changed(last: &Option<Measurement>, new: &Measurement) -> bool {
    !last.is_some_and(|last| last.bit_eq(new))
}

pub struct SystemManager {
    resources: SharedResources,
    timing: TaskTiming,
    running: RunningSet,
    sent: SentCache,
}

impl SystemManager {
    pub fn new(resources: SharedResources, timing: TaskTiming) -> Self {
        Self {
            resources,
            timing,
            running: RunningSet::default(),
            sent: SentCache::default(),
        }
    }

    pub fn running(&self) -> RunningSet {
        self.running
    }

    async fn handle_notify(&mut self, bits: NotifyBits) -> Result<(), Error> {
        // The coordinator has no timers or interrupts.
        self.resources
            .log
            .warn(format!("system: unexpected notification {:#x}", bits.0))
            .await;
        Err(Error::UnknownNotify)
    }

    async fn handle_event(&mut self, event: SystemEvent) -> Result<(), Error> {
        match event {
            SystemEvent::Ready { origin } => self.handle_ready(origin).await,
            SystemEvent::Started { origin } => self.handle_started(origin).await,
            SystemEvent::Stopped { origin } => self.handle_stopped(origin).await,
            SystemEvent::Reference(reference) => self.handle_reference(reference).await,
            SystemEvent::Measure(measure) => self.handle_measure(measure).await,
        }
    }

    async fn handle_ready(&mut self, origin: Origin) -> Result<(), Error> {
        self.resources
            .log
            .debug(format!("system: {origin:?} ready, starting it"))
            .await;

        let timeout = self.timing.mailbox_timeout();
        match origin {
            Origin::Control => self.resources.control.send(ControlEvent::Start, timeout).await,
            Origin::Display => self.resources.display.send(DisplayEvent::Start, timeout).await,
            Origin::Packet => self.resources.packet.send(PacketEvent::Start, timeout).await,
        }
    }

    async fn handle_started(&mut self, origin: Origin) -> Result<(), Error> {
        self.resources.log.info(format!("system: {origin:?} started")).await;
        *self.running.flag_mut(origin) = true;
        // A restarted subsystem gets the next update even if it repeats.
        self.sent.forget(origin);
        Ok(())
    }

    async fn handle_stopped(&mut self, origin: Origin) -> Result<(), Error> {
        self.resources.log.info(format!("system: {origin:?} stopped")).await;
        *self.running.flag_mut(origin) = false;
        Ok(())
    }

    async fn handle_reference(&mut self, reference: Reference) -> Result<(), Error> {
        self.resources
            .log
            .debug(format!(
                "system: reference {:.2} C, {:.2} s",
                reference.temperature, reference.sampling_period
            ))
            .await;
        let timeout = self.timing.mailbox_timeout();

        if self.running.control && reference_changed(&self.sent.control_reference, &reference) {
            self.resources
                .control
                .send(ControlEvent::Reference(reference), timeout)
                .await?;
            self.sent.control_reference = Some(reference);
        }

        if self.running.display && reference_changed(&self.sent.display_reference, &reference) {
            self.resources
                .display
                .send(DisplayEvent::Reference(reference), timeout)
                .await?;
            self.sent.display_reference = Some(reference);
        }

        Ok(())
    }

    async fn handle_measure(&mut self, measure: Measurement) -> Result<(), Error> {
        self.resources
            .log
            .trace(format!("system: measure {:.2} C", measure.temperature))
            .await;
        let timeout = self.timing.mailbox_timeout();

        if self.running.display && measure_changed(&self.sent.display_measure, &measure) {
            self.resources
                .display
                .send(DisplayEvent::Measure(measure), timeout)
                .await?;
            self.sent.display_measure = Some(measure);
        }

        if self.running.packet && measure_changed(&self.sent.packet_measure, &measure) {
            self.resources
                .packet
                .send(PacketEvent::Measure(measure), timeout)
                .await?;
            self.sent.packet_measure = Some(measure);
        }

        Ok(())
    }
}

impl Manager for SystemManager {
    const NAME: &'static str = "system";

    async fn initialize(&mut self) -> Result<(), Error> {
        self.resources.log.debug("system: waiting for subsystems").await;
        Ok(())
    }

    async fn process(&mut self) -> Result<(), Error> {
        let resources = self.resources;
        if let Some(bits) = resources
            .notifier(TaskId::System)
            .wait(NotifyBits::ALL, self.timing.notify_timeout())
            .await
        {
            self.handle_notify(bits).await?;
        }

        while resources.system.has_pending() {
            if let Some(event) = resources.system.receive(self.timing.mailbox_timeout()).await {
                self.handle_event(event).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memlog::Level, registry};
    use embassy_futures::block_on;

    const REFERENCE: Reference = Reference {
        temperature: 22.5,
        sampling_period: 0.5,
    };

    fn manager() -> SystemManager {
        let resources = registry::init(1000, Level::Trace);
        SystemManager::new(resources, TaskTiming::default())
    }

    fn deliver(manager: &mut SystemManager, events: &[SystemEvent]) -> Result<(), Error> {
        for event in events {
            manager.resources.system.try_send(*event).unwrap();
        }
        block_on(manager.process())
    }

    #[test]
    fn ready_starts_only_that_origin() {
        let mut manager = manager();
        deliver(&mut manager, &[SystemEvent::Ready { origin: Origin::Display }]).unwrap();

        let resources = manager.resources;
        assert_eq!(resources.display.try_receive(), Some(DisplayEvent::Start));
        assert!(!resources.control.has_pending());
        assert!(!resources.packet.has_pending());
        // Ready alone doesn't count as running.
        assert_eq!(manager.running(), RunningSet::default());
    }

    #[test]
    fn lifecycle_flags_follow_announcements() {
        let mut manager = manager();
        deliver(
            &mut manager,
            &[
                SystemEvent::Started { origin: Origin::Control },
                SystemEvent::Started { origin: Origin::Packet },
                SystemEvent::Stopped { origin: Origin::Control },
            ],
        )
        .unwrap();
        assert_eq!(
            manager.running(),
            RunningSet {
                control: false,
                display: false,
                packet: true,
            }
        );
    }

    #[test]
    fn identical_references_fan_out_once() {
        let mut manager = manager();
        deliver(
            &mut manager,
            &[
                SystemEvent::Started { origin: Origin::Control },
                SystemEvent::Started { origin: Origin::Display },
                SystemEvent::Reference(REFERENCE),
                SystemEvent::Reference(REFERENCE),
            ],
        )
        .unwrap();

        let resources = manager.resources;
        assert_eq!(resources.control.depth(), 1);
        assert_eq!(resources.display.depth(), 1);
        assert_eq!(resources.control.try_receive(), Some(ControlEvent::Reference(REFERENCE)));
        assert_eq!(resources.display.try_receive(), Some(DisplayEvent::Reference(REFERENCE)));
    }

    #[test]
    fn measure_waits_for_display_to_start() {
        let mut manager = manager();
        let zero = Measurement::default();

        deliver(&mut manager, &[SystemEvent::Measure(zero)]).unwrap();
        assert!(!manager.resources.display.has_pending());

        // The same zero value is delivered once the display runs.
        deliver(
            &mut manager,
            &[
                SystemEvent::Started { origin: Origin::Display },
                SystemEvent::Measure(zero),
            ],
        )
        .unwrap();
        assert_eq!(manager.resources.display.try_receive(), Some(DisplayEvent::Measure(zero)));
        assert!(!manager.resources.packet.has_pending());
    }

    #[test]
    fn restart_refreshes_subsystem() {
        let mut manager = manager();
        let measure = Measurement {
            temperature: 21.0,
            ..Default::default()
        };
        deliver(
            &mut manager,
            &[
                SystemEvent::Started { origin: Origin::Packet },
                SystemEvent::Measure(measure),
                SystemEvent::Stopped { origin: Origin::Packet },
                SystemEvent::Started { origin: Origin::Packet },
                SystemEvent::Measure(measure),
            ],
        )
        .unwrap();
        assert_eq!(manager.resources.packet.depth(), 2);
    }

    #[test]
    fn late_subscriber_is_not_deduplicated_against_others() {
        let mut manager = manager();
        deliver(
            &mut manager,
            &[
                SystemEvent::Started { origin: Origin::Control },
                SystemEvent::Reference(REFERENCE),
                SystemEvent::Started { origin: Origin::Display },
                SystemEvent::Reference(REFERENCE),
            ],
        )
        .unwrap();
        assert_eq!(manager.resources.control.depth(), 1);
        assert_eq!(manager.resources.display.depth(), 1);
    }

    #[test]
    fn full_mailbox_aborts_the_pass() {
        let mut manager = manager();
        let resources = manager.resources;
        for _ in 0..resources.control.capacity() {
            resources.control.try_send(ControlEvent::Stop).unwrap();
        }

        let result = deliver(
            &mut manager,
            &[
                SystemEvent::Ready { origin: Origin::Control },
                SystemEvent::Ready { origin: Origin::Display },
            ],
        );
        assert_eq!(result, Err(Error::MailboxFull(crate::registry::MailboxId::Control)));
        assert_eq!(resources.dropped(crate::registry::MailboxId::Control), 1);
        // The rest of the backlog waits for the next pass.
        assert_eq!(resources.system.depth(), 1);
        block_on(manager.process()).unwrap();
        assert_eq!(resources.display.try_receive(), Some(DisplayEvent::Start));
    }

    #[test]
    fn any_notification_is_unknown() {
        let mut manager = manager();
        manager
            .resources
            .notifier(TaskId::System)
            .notify(NotifyBits(1));
        assert_eq!(block_on(manager.process()), Err(Error::UnknownNotify));
    }
}
