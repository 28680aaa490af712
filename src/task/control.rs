//! Sensor sampling and the closed control loop.
//!
//! Two timers feed this task: the sampling timer raises
//! [`control::MEASUREMENT_READY`], the control timer raises
//! [`control::CONTROL_TICK`]. When both arrive in one wakeup the sample is
//! taken first so the PID step sees the freshest value.

use alloc::format;
use embassy_time::Duration;
use pid::Pid;

use crate::{
    config::{ControlParams, ReferenceDedup, SAMPLING_PERIOD_RANGE, TaskTiming},
    error::Error,
    event::{ControlEvent, Measurement, Origin, Reference, SystemEvent},
    hal::{Actuator, PeriodicTimer, TemperatureSensor},
    notify::{NotifyBits, control},
    registry::{SharedResources, TaskId},
    state::RunState,
};

use super::Manager;

struct ControlStep {
    error: f32,
    output: f32,
    drive: u32,
}

pub struct ControlManager<S, A, T> {
    resources: SharedResources,
    timing: TaskTiming,
    params: ControlParams,
    sensor: S,
    actuator: A,
    sampling_timer: T,
    control_timer: T,
    pid: Pid<f32>,
    reference: Reference,
    measurement: Measurement,
    faulted: bool,
    state: RunState,
}

impl<S, A, T> ControlManager<S, A, T>
where
    S: TemperatureSensor,
    A: Actuator,
    T: PeriodicTimer,
{
    /// Panics if `params` is inconsistent.
    pub fn new(
        resources: SharedResources,
        timing: TaskTiming,
        params: ControlParams,
        sensor: S,
        actuator: A,
        sampling_timer: T,
        control_timer: T,
    ) -> Self {
        params.validate();
        let reference = Reference {
            temperature: 0.0,
            sampling_period: params.sampling_period,
        };

        Self {
            resources,
            timing,
            params,
            sensor,
            actuator,
            sampling_timer,
            control_timer,
            pid: build_pid(&params, reference.temperature),
            reference,
            measurement: Measurement::default(),
            faulted: false,
            state: RunState::default(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Set while the last control step failed and the output is held at zero.
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn reference(&self) -> Reference {
        self.reference
    }

    pub fn measurement(&self) -> Measurement {
        self.measurement
    }

    async fn announce(&self, event: SystemEvent) -> Result<(), Error> {
        self.resources
            .system
            .send(event, self.timing.mailbox_timeout())
            .await
    }

    async fn handle_notify(&mut self, bits: NotifyBits) -> Result<(), Error> {
        if bits.contains(control::MEASUREMENT_READY) {
            self.handle_measurement_ready().await?;
        }
        if bits.contains(control::CONTROL_TICK) {
            self.handle_control_tick().await?;
        }
        if !bits.without(control::ALL).is_empty() {
            return Err(Error::UnknownNotify);
        }
        Ok(())
    }

    async fn handle_measurement_ready(&mut self) -> Result<(), Error> {
        // A period may have elapsed just before the timers were disarmed.
        if !self.state.is_running() {
            return Ok(());
        }

        let temperature = match self.sensor.read_scaled_temperature() {
            Ok(temperature) => temperature,
            Err(error) => {
                self.resources.log.warn("control: temperature read failed").await;
                return Err(error);
            }
        };

        // The sensor only reports temperature.
        self.measurement = Measurement {
            temperature,
            humidity: 0.0,
            pressure: 0.0,
        };
        self.announce(SystemEvent::Measure(self.measurement)).await
    }

    async fn handle_control_tick(&mut self) -> Result<(), Error> {
        if !self.state.is_running() {
            return Ok(());
        }

        let applied = match self.control_step() {
            Some(step) => {
                self.resources
                    .log
                    .trace(format!(
                        "control: ref {:.2} meas {:.2} err {:.2} out {:.2} drive {}",
                        self.reference.temperature,
                        self.measurement.temperature,
                        step.error,
                        step.output,
                        step.drive
                    ))
                    .await;
                self.apply_drive(step.drive)
            }
            None => Err(Error::Fail),
        };

        match applied {
            Ok(false) => Ok(()),
            Ok(true) => {
                self.resources.log.info("control: fault cleared").await;
                Ok(())
            }
            Err(error) => {
                self.enter_fault().await;
                Err(error)
            }
        }
    }

    /// One PID step. `None` when the output can't be trusted.
    fn control_step(&mut self) -> Option<ControlStep> {
        let error = self.reference.temperature - self.measurement.temperature;
        if !error.is_finite() {
            return None;
        }

        let output = self
            .pid
            .next_control_output(self.measurement.temperature)
            .output;
        if !output.is_finite() {
            self.pid.reset_integral_term();
            return None;
        }

        Some(ControlStep {
            error,
            output,
            drive: drive_level(output, &self.params),
        })
    }

    /// Returns true when this drive clears a latched fault.
    fn apply_drive(&mut self, drive: u32) -> Result<bool, Error> {
        self.actuator.set_drive_level(drive)?;
        if !self.faulted {
            return Ok(false);
        }
        self.actuator.start()?;
        self.faulted = false;
        Ok(true)
    }

    /// Holds the output at zero until a control step succeeds again.
    async fn enter_fault(&mut self) {
        if !self.faulted {
            self.resources.log.warn("control: control step failed, output held at zero").await;
        }
        self.faulted = true;
        let zeroed = self.actuator.set_drive_level(0);
        let stopped = self.actuator.stop();
        if zeroed.is_err() || stopped.is_err() {
            self.resources.log.error("control: actuator unresponsive").await;
        }
    }

    async fn handle_event(&mut self, event: ControlEvent) -> Result<(), Error> {
        match event {
            ControlEvent::Start => self.handle_start().await,
            ControlEvent::Stop => self.handle_stop().await,
            ControlEvent::Reference(reference) => self.handle_reference(reference).await,
        }
    }

    async fn handle_start(&mut self) -> Result<(), Error> {
        self.resources.log.debug("control: start").await;
        self.state.check_start()?;

        self.control_timer.start()?;
        self.sampling_timer.start()?;
        self.actuator.set_drive_level(0)?;
        self.actuator.start()?;
        self.pid.reset_integral_term();
        self.faulted = false;

        self.announce(SystemEvent::Started {
            origin: Origin::Control,
        })
        .await?;
        self.state.set_running();
        Ok(())
    }

    async fn handle_stop(&mut self) -> Result<(), Error> {
        self.resources.log.debug("control: stop").await;
        self.state.check_stop()?;

        self.control_timer.stop()?;
        self.sampling_timer.stop()?;
        self.actuator.set_drive_level(0)?;
        self.actuator.stop()?;

        self.announce(SystemEvent::Stopped {
            origin: Origin::Control,
        })
        .await?;
        self.state.set_stopped();
        Ok(())
    }

    async fn handle_reference(&mut self, reference: Reference) -> Result<(), Error> {
        self.resources
            .log
            .debug(format!(
                "control: reference {:.2} C, {:.2} s",
                reference.temperature, reference.sampling_period
            ))
            .await;

        let same_temperature =
            reference.temperature.to_bits() == self.reference.temperature.to_bits();
        let same_period =
            reference.sampling_period.to_bits() == self.reference.sampling_period.to_bits();
        let unchanged = match self.params.reference_dedup {
            ReferenceDedup::BothFieldsMatch => same_temperature && same_period,
            ReferenceDedup::EitherFieldMatches => same_temperature || same_period,
        };
        if unchanged {
            return Ok(());
        }

        if !same_period {
            if !SAMPLING_PERIOD_RANGE.contains(&reference.sampling_period) {
                self.resources
                    .log
                    .warn(format!(
                        "control: sampling period {:.3} s out of range",
                        reference.sampling_period
                    ))
                    .await;
                return Err(Error::Fail);
            }
            self.sampling_timer
                .set_period(seconds_to_duration(reference.sampling_period))?;
        }

        self.pid.setpoint(reference.temperature);
        self.reference = reference;
        Ok(())
    }
}

impl<S, A, T> Manager for ControlManager<S, A, T>
where
    S: TemperatureSensor,
    A: Actuator,
    T: PeriodicTimer,
{
    const NAME: &'static str = "control";

    async fn initialize(&mut self) -> Result<(), Error> {
        // The loop still runs on a missing sensor; every read then fails.
        if let Err(error) = self.sensor.initialize() {
            self.resources
                .log
                .warn(format!("control: sensor initialize failed: {error}"))
                .await;
        }

        self.sampling_timer
            .set_period(seconds_to_duration(self.params.sampling_period))?;
        self.control_timer.set_period(self.params.control_period())?;

        self.announce(SystemEvent::Ready {
            origin: Origin::Control,
        })
        .await
    }

    async fn process(&mut self) -> Result<(), Error> {
        let resources = self.resources;
        if let Some(bits) = resources
            .notifier(TaskId::Control)
            .wait(NotifyBits::ALL, self.timing.notify_timeout())
            .await
        {
            self.handle_notify(bits).await?;
        }

        while resources.control.has_pending() {
            if let Some(event) = resources.control.receive(self.timing.mailbox_timeout()).await {
                self.handle_event(event).await?;
            }
        }
        Ok(())
    }
}

fn build_pid(params: &ControlParams, setpoint: f32) -> Pid<f32> {
    let dt = params.control_period;
    let output_limit = params.max_temp.abs().max(params.min_temp.abs());

    let mut pid = Pid::new(setpoint, output_limit);
    pid.p(params.kp, output_limit)
        .i(params.ki * dt, params.integral_limit)
        .d(params.kd / dt, output_limit);
    pid
}

fn seconds_to_duration(seconds: f32) -> Duration {
    Duration::from_millis((seconds * 1000.0) as u64)
}

/// Maps a control output onto the actuator range.
///
/// The output is clamped to `[min_temp, max_temp]` before scaling, and the
/// result clamped again before the cast, so rounding can't leave the range.
pub fn drive_level(output: f32, params: &ControlParams) -> u32 {
    let clamped = output.clamp(params.min_temp, params.max_temp);
    let ratio = (clamped - params.min_temp) / (params.max_temp - params.min_temp);
    let drive = params.min_drive + ratio * (params.max_drive - params.min_drive);
    drive.clamp(params.min_drive, params.max_drive) as u32
}
