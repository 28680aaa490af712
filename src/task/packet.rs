//! Bridge between the control system and the host.
//!
//! Outbound measurements are written straight to the link. Inbound frames
//! arrive through the `host_rx` mailbox, filled by
//! [`host_receiver`](super::host_link::host_receiver).

use alloc::format;
use embassy_time::with_timeout;
use embedded_io_async::Write;

use crate::{
    codec::{HostCommand, HostReport},
    config::{PacketConfig, TaskTiming},
    error::Error,
    event::{Measurement, Origin, PacketEvent, SystemEvent},
    notify::{NotifyBits, packet},
    registry::{SharedResources, TaskId},
    state::RunState,
};

use super::{Manager, host_link::MAX_FRAME_LEN};

pub struct PacketManager<W> {
    resources: SharedResources,
    timing: TaskTiming,
    config: PacketConfig,
    link: W,
    state: RunState,
}

impl<W: Write> PacketManager<W> {
    pub fn new(
        resources: SharedResources,
        timing: TaskTiming,
        config: PacketConfig,
        link: W,
    ) -> Self {
        Self {
            resources,
            timing,
            config,
            link,
            state: RunState::default(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn link(&self) -> &W {
        &self.link
    }

    async fn announce(&self, event: SystemEvent) -> Result<(), Error> {
        self.resources
            .system
            .send(event, self.timing.mailbox_timeout())
            .await
    }

    async fn handle_notify(&mut self, bits: NotifyBits) -> Result<(), Error> {
        if bits.contains(packet::RX_COMPLETE) {
            self.handle_rx_complete().await?;
        }
        if !bits.without(packet::ALL).is_empty() {
            return Err(Error::UnknownNotify);
        }
        Ok(())
    }

    /// Decodes every queued host frame, reporting the first failure.
    async fn handle_rx_complete(&mut self) -> Result<(), Error> {
        let mut result = Ok(());

        while let Some(frame) = self.resources.host_rx.try_receive() {
            let command = match self.config.framing.decode::<HostCommand>(&frame) {
                Ok(command) => command,
                Err(error) => {
                    self.resources
                        .log
                        .warn(format!("packet: bad host frame: {error}"))
                        .await;
                    result = result.and(Err(Error::Codec(error)));
                    continue;
                }
            };

            let HostCommand::Reference(reference) = command;
            if !self.state.is_running() {
                self.resources
                    .log
                    .debug("packet: not running, host reference dropped")
                    .await;
                continue;
            }

            self.resources
                .log
                .debug(format!(
                    "packet: host reference {:.2} C, {:.2} s",
                    reference.temperature, reference.sampling_period
                ))
                .await;
            if let Err(error) = self.announce(SystemEvent::Reference(reference)).await {
                result = result.and(Err(error));
            }
        }

        result
    }

    async fn handle_event(&mut self, event: PacketEvent) -> Result<(), Error> {
        match event {
            PacketEvent::Start => self.handle_start().await,
            PacketEvent::Stop => self.handle_stop().await,
            PacketEvent::Measure(measurement) => self.handle_measure(measurement).await,
        }
    }

    async fn handle_start(&mut self) -> Result<(), Error> {
        self.resources.log.debug("packet: start").await;
        self.state.check_start()?;
        self.announce(SystemEvent::Started {
            origin: Origin::Packet,
        })
        .await?;
        self.state.set_running();
        Ok(())
    }

    async fn handle_stop(&mut self) -> Result<(), Error> {
        self.resources.log.debug("packet: stop").await;
        self.state.check_stop()?;
        self.announce(SystemEvent::Stopped {
            origin: Origin::Packet,
        })
        .await?;
        self.state.set_stopped();
        Ok(())
    }

    async fn handle_measure(&mut self, measurement: Measurement) -> Result<(), Error> {
        if !self.state.is_running() {
            return Ok(());
        }

        let mut buffer = [0u8; MAX_FRAME_LEN];
        let len = self
            .config
            .framing
            .encode(&HostReport::Measure(measurement), &mut buffer)?;

        let written = with_timeout(self.config.write_timeout(), async {
            self.link.write_all(&buffer[..len]).await?;
            self.link.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                self.resources.log.warn("packet: host link write failed").await;
                Err(Error::Fail)
            }
            Err(_timeout) => {
                self.resources.log.warn("packet: host link not draining").await;
                Err(Error::Timeout)
            }
        }
    }
}

impl<W: Write> Manager for PacketManager<W> {
    const NAME: &'static str = "packet";

    async fn initialize(&mut self) -> Result<(), Error> {
        self.announce(SystemEvent::Ready {
            origin: Origin::Packet,
        })
        .await
    }

    async fn process(&mut self) -> Result<(), Error> {
        let resources = self.resources;
        if let Some(bits) = resources
            .notifier(TaskId::Packet)
            .wait(NotifyBits::ALL, self.timing.notify_timeout())
            .await
        {
            self.handle_notify(bits).await?;
        }

        while resources.packet.has_pending() {
            if let Some(event) = resources.packet.receive(self.timing.mailbox_timeout()).await {
                self.handle_event(event).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::Framing,
        error::CodecError,
        event::Reference,
        memlog::Level,
        registry,
        task::host_link::Frame,
    };
    use alloc::vec::Vec;
    use embassy_futures::block_on;
    use embassy_time::Instant;
    use embedded_io_async::{ErrorKind, ErrorType};

    #[derive(Default)]
    struct RecordingLink {
        written: Vec<u8>,
        broken: bool,
        stalled: bool,
    }

    impl ErrorType for RecordingLink {
        type Error = ErrorKind;
    }

    impl Write for RecordingLink {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            if self.broken {
                return Err(ErrorKind::BrokenPipe);
            }
            if self.stalled {
                return core::future::pending().await;
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    const MEASUREMENT: Measurement = Measurement {
        temperature: 21.5,
        pressure: 0.0,
        humidity: 0.0,
    };

    fn manager(framing: Framing) -> PacketManager<RecordingLink> {
        let resources = registry::init(2000, Level::Trace);
        let config = PacketConfig {
            framing,
            write_ms: 20,
            ..Default::default()
        };
        PacketManager::new(resources, TaskTiming::default(), config, RecordingLink::default())
    }

    fn send(manager: &mut PacketManager<RecordingLink>, event: PacketEvent) -> Result<(), Error> {
        manager.resources.packet.try_send(event).unwrap();
        block_on(manager.process())
    }

    fn receive(manager: &mut PacketManager<RecordingLink>, frames: &[&[u8]]) -> Result<(), Error> {
        for bytes in frames {
            let frame = Frame::from_slice(bytes).unwrap();
            manager.resources.host_rx.try_send(frame).unwrap();
        }
        manager
            .resources
            .notifier(TaskId::Packet)
            .notify(packet::RX_COMPLETE);
        block_on(manager.process())
    }

    fn started(framing: Framing) -> PacketManager<RecordingLink> {
        let mut manager = manager(framing);
        block_on(manager.initialize()).unwrap();
        send(&mut manager, PacketEvent::Start).unwrap();
        let system = &manager.resources.system;
        assert_eq!(system.try_receive(), Some(SystemEvent::Ready { origin: Origin::Packet }));
        assert_eq!(system.try_receive(), Some(SystemEvent::Started { origin: Origin::Packet }));
        manager
    }

    #[test]
    fn measurement_is_written_as_json_line() {
        let mut manager = started(Framing::Json);
        send(&mut manager, PacketEvent::Measure(MEASUREMENT)).unwrap();
        assert_eq!(
            core::str::from_utf8(&manager.link().written).unwrap(),
            "{\"packet_type\":0,\"packet_payload\":{\"temperature\":21.5,\"pressure\":0.0,\"humidity\":0.0}}\n"
        );
    }

    #[test]
    fn measurement_is_written_as_binary_frame() {
        let mut manager = started(Framing::Binary);
        send(&mut manager, PacketEvent::Measure(MEASUREMENT)).unwrap();
        let written = &manager.link().written;
        assert_eq!(written.len(), 16);
        assert_eq!(&written[4..8], &21.5f32.to_be_bytes());
    }

    #[test]
    fn measurement_while_stopped_is_not_sent() {
        let mut manager = manager(Framing::Json);
        send(&mut manager, PacketEvent::Measure(MEASUREMENT)).unwrap();
        assert!(manager.link().written.is_empty());
    }

    #[test]
    fn write_failure_is_reported() {
        let mut manager = started(Framing::Json);
        manager.link.broken = true;
        assert_eq!(send(&mut manager, PacketEvent::Measure(MEASUREMENT)), Err(Error::Fail));
        assert!(manager.state().is_running());
    }

    #[test]
    fn stalled_link_times_out_instead_of_blocking() {
        let mut manager = started(Framing::Json);
        manager.link.stalled = true;
        let started_at = Instant::now();
        assert_eq!(send(&mut manager, PacketEvent::Measure(MEASUREMENT)), Err(Error::Timeout));
        assert!(started_at.elapsed() >= manager.config.write_timeout());
        assert!(manager.link().written.is_empty());

        // The next measurement goes out once the host drains again.
        manager.link.stalled = false;
        send(&mut manager, PacketEvent::Measure(MEASUREMENT)).unwrap();
        assert!(!manager.link().written.is_empty());
    }

    #[test]
    fn host_reference_is_forwarded_when_running() {
        let mut manager = started(Framing::Json);
        receive(
            &mut manager,
            &[b"{\"packet_type\":0,\"packet_payload\":{\"temperature\":22.5,\"sampling_time\":0.5}}\r"],
        )
        .unwrap();
        assert_eq!(
            manager.resources.system.try_receive(),
            Some(SystemEvent::Reference(Reference {
                temperature: 22.5,
                sampling_period: 0.5,
            }))
        );
    }

    #[test]
    fn host_reference_is_dropped_when_stopped() {
        let mut manager = manager(Framing::Json);
        receive(
            &mut manager,
            &[b"{\"packet_type\":0,\"packet_payload\":{\"temperature\":22.5,\"sampling_time\":0.5}}"],
        )
        .unwrap();
        assert!(!manager.resources.system.has_pending());
        assert!(!manager.resources.host_rx.has_pending());
    }

    #[test]
    fn bad_frame_does_not_hide_later_ones() {
        let mut manager = started(Framing::Json);
        let result = receive(
            &mut manager,
            &[
                b"{\"packet_type\":3,\"packet_payload\":{}}",
                b"{\"packet_type\":0,\"packet_payload\":{\"temperature\":19.0,\"sampling_time\":1.0}}",
            ],
        );
        assert_eq!(result, Err(Error::Codec(CodecError::UnknownPacketType(3))));
        assert!(matches!(
            manager.resources.system.try_receive(),
            Some(SystemEvent::Reference(_))
        ));
    }

    #[test]
    fn lifecycle_is_guarded() {
        let mut manager = started(Framing::Json);
        assert_eq!(send(&mut manager, PacketEvent::Start), Err(Error::AlreadyRunning));
        send(&mut manager, PacketEvent::Stop).unwrap();
        assert_eq!(send(&mut manager, PacketEvent::Stop), Err(Error::NotRunning));
        assert_eq!(
            manager.resources.system.try_receive(),
            Some(SystemEvent::Stopped { origin: Origin::Packet })
        );
    }
}
