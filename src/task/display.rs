//! Renders the current reference and measurement.
//!
//! Drawing is best effort: a failed render is logged and the pass goes on.

use alloc::format;

use crate::{
    config::{DisplayConfig, TaskTiming},
    error::Error,
    event::{DisplayEvent, Measurement, Origin, Reference, SystemEvent},
    hal::DisplayDevice,
    notify::NotifyBits,
    registry::{SharedResources, TaskId},
    state::RunState,
};

use super::Manager;

const ROW_REFERENCE: u16 = 0;
const ROW_SAMPLING: u16 = 1;
const ROW_TEMPERATURE: u16 = 3;
const ROW_HUMIDITY: u16 = 4;
const ROW_PRESSURE: u16 = 5;

pub struct DisplayManager<D> {
    resources: SharedResources,
    timing: TaskTiming,
    config: DisplayConfig,
    device: D,
    reference: Reference,
    measurement: Measurement,
    state: RunState,
}

impl<D: DisplayDevice> DisplayManager<D> {
    pub fn new(
        resources: SharedResources,
        timing: TaskTiming,
        config: DisplayConfig,
        device: D,
    ) -> Self {
        Self {
            resources,
            timing,
            config,
            device,
            reference: Reference::default(),
            measurement: Measurement::default(),
            state: RunState::default(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    async fn announce(&self, event: SystemEvent) -> Result<(), Error> {
        self.resources
            .system
            .send(event, self.timing.mailbox_timeout())
            .await
    }

    async fn handle_event(&mut self, event: DisplayEvent) -> Result<(), Error> {
        match event {
            DisplayEvent::Start => self.handle_start().await,
            DisplayEvent::Stop => self.handle_stop().await,
            DisplayEvent::Reference(reference) => {
                self.reference = reference;
                self.refresh().await;
                Ok(())
            }
            DisplayEvent::Measure(measurement) => {
                self.measurement = measurement;
                self.refresh().await;
                Ok(())
            }
        }
    }

    async fn handle_start(&mut self) -> Result<(), Error> {
        self.resources.log.debug("display: start").await;
        self.state.check_start()?;
        self.announce(SystemEvent::Started {
            origin: Origin::Display,
        })
        .await?;
        self.state.set_running();
        self.refresh().await;
        Ok(())
    }

    async fn handle_stop(&mut self) -> Result<(), Error> {
        self.resources.log.debug("display: stop").await;
        self.state.check_stop()?;
        self.announce(SystemEvent::Stopped {
            origin: Origin::Display,
        })
        .await?;
        self.state.set_stopped();
        Ok(())
    }

    async fn refresh(&mut self) {
        if !self.state.is_running() {
            return;
        }
        if let Err(error) = self.render() {
            self.resources
                .log
                .warn(format!("display: render failed: {error}"))
                .await;
        }
    }

    fn render(&mut self) -> Result<(), Error> {
        let reference = self.reference;
        let measurement = self.measurement;
        let device = &mut self.device;

        device.draw_formatted(
            0,
            ROW_REFERENCE,
            format_args!("REF  {:7.2} C", reference.temperature),
        )?;
        device.draw_formatted(
            0,
            ROW_SAMPLING,
            format_args!("DT   {:7.2} s", reference.sampling_period),
        )?;
        device.draw_formatted(
            0,
            ROW_TEMPERATURE,
            format_args!("TEMP {:7.2} C", measurement.temperature),
        )?;
        device.draw_formatted(
            0,
            ROW_HUMIDITY,
            format_args!("HUM  {:7.2} %", measurement.humidity),
        )?;
        device.draw_formatted(
            0,
            ROW_PRESSURE,
            format_args!("PRES {:7.2} hPa", measurement.pressure),
        )?;
        device.present()
    }
}

impl<D: DisplayDevice> Manager for DisplayManager<D> {
    const NAME: &'static str = "display";

    async fn initialize(&mut self) -> Result<(), Error> {
        self.device.initialize(&self.config)?;
        self.announce(SystemEvent::Ready {
            origin: Origin::Display,
        })
        .await
    }

    async fn process(&mut self) -> Result<(), Error> {
        let resources = self.resources;
        if let Some(bits) = resources
            .notifier(TaskId::Display)
            .wait(NotifyBits::ALL, self.timing.notify_timeout())
            .await
        {
            resources
                .log
                .warn(format!("display: unexpected notification {:#x}", bits.0))
                .await;
            return Err(Error::UnknownNotify);
        }

        while resources.display.has_pending() {
            if let Some(event) = resources.display.receive(self.timing.mailbox_timeout()).await {
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
        hal::{DisplayPanel, FrameBufferDisplay},
        memlog::Level,
        registry,
    };
    use embassy_futures::block_on;
    use ratatui_core::buffer::Buffer;

    #[derive(Default)]
    struct Panel {
        flushes: usize,
        broken: bool,
    }

    impl DisplayPanel for Panel {
        fn flush(&mut self, _frame: &Buffer) -> Result<(), Error> {
            if self.broken {
                return Err(Error::Fail);
            }
            self.flushes += 1;
            Ok(())
        }
    }

    fn manager(config: DisplayConfig) -> DisplayManager<FrameBufferDisplay<Panel>> {
        let resources = registry::init(2000, Level::Trace);
        let mut manager = DisplayManager::new(
            resources,
            TaskTiming::default(),
            config,
            FrameBufferDisplay::new(Panel::default()),
        );
        block_on(manager.initialize()).unwrap();
        manager
    }

    fn send(
        manager: &mut DisplayManager<FrameBufferDisplay<Panel>>,
        event: DisplayEvent,
    ) -> Result<(), Error> {
        manager.resources.display.try_send(event).unwrap();
        block_on(manager.process())
    }

    #[test]
    fn renders_reference_and_measurement() {
        let mut manager = manager(DisplayConfig::default());
        send(&mut manager, DisplayEvent::Start).unwrap();
        send(
            &mut manager,
            DisplayEvent::Reference(Reference {
                temperature: 22.5,
                sampling_period: 0.5,
            }),
        )
        .unwrap();
        send(
            &mut manager,
            DisplayEvent::Measure(Measurement {
                temperature: 21.25,
                humidity: 40.0,
                pressure: 1013.0,
            }),
        )
        .unwrap();

        let device = manager.device();
        assert_eq!(device.row_text(0).trim_end(), "REF    22.50 C");
        assert_eq!(device.row_text(1).trim_end(), "DT      0.50 s");
        assert_eq!(device.row_text(2).trim_end(), "");
        assert_eq!(device.row_text(3).trim_end(), "TEMP   21.25 C");
        assert_eq!(device.row_text(4).trim_end(), "HUM    40.00 %");
        assert_eq!(device.row_text(5).trim_end(), "PRES 1013.00 hPa");
        // Initialize, start and two updates.
        assert_eq!(device.panel().flushes, 4);
    }

    #[test]
    fn lifecycle_is_announced_and_guarded() {
        let mut manager = manager(DisplayConfig::default());
        let system = &manager.resources.system;
        assert_eq!(system.try_receive(), Some(SystemEvent::Ready { origin: Origin::Display }));

        send(&mut manager, DisplayEvent::Start).unwrap();
        assert_eq!(send(&mut manager, DisplayEvent::Start), Err(Error::AlreadyRunning));
        send(&mut manager, DisplayEvent::Stop).unwrap();
        assert_eq!(send(&mut manager, DisplayEvent::Stop), Err(Error::NotRunning));

        let system = &manager.resources.system;
        assert_eq!(system.try_receive(), Some(SystemEvent::Started { origin: Origin::Display }));
        assert_eq!(system.try_receive(), Some(SystemEvent::Stopped { origin: Origin::Display }));
        assert_eq!(system.try_receive(), None);
    }

    #[test]
    fn render_failures_are_not_propagated() {
        // Too short for the measurement rows.
        let mut manager = manager(DisplayConfig { width: 21, height: 2 });
        send(&mut manager, DisplayEvent::Start).unwrap();
        send(&mut manager, DisplayEvent::Measure(Measurement::default())).unwrap();
        assert!(manager.state().is_running());
        assert!(block_on(manager.resources.log.count(Level::Warn)) >= 2);
    }

    #[test]
    fn updates_while_stopped_are_kept_not_drawn() {
        let mut manager = manager(DisplayConfig::default());
        send(
            &mut manager,
            DisplayEvent::Reference(Reference {
                temperature: 30.0,
                sampling_period: 1.0,
            }),
        )
        .unwrap();
        assert_eq!(manager.device().panel().flushes, 1);

        send(&mut manager, DisplayEvent::Start).unwrap();
        assert_eq!(manager.device().row_text(0).trim_end(), "REF    30.00 C");
    }
}
