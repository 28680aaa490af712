//! Static configuration, fixed at bring-up.
//!
//! Everything has a default matching the reference board; a JSON document
//! can override any subset of it.

use core::ops::RangeInclusive;
use embassy_time::Duration;
use serde::Deserialize;

use crate::codec::Framing;

/// Accepted measurement sampling periods, in seconds.
pub const SAMPLING_PERIOD_RANGE: RangeInclusive<f32> = 0.1..=1.0;

/// Shortest control period, in seconds. Timers run at millisecond resolution.
pub const MIN_CONTROL_PERIOD: f32 = 0.001;

/// How the control task decides a reference event repeats the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceDedup {
    /// Skip only when setpoint and sampling period are both unchanged.
    BothFieldsMatch,
    /// Skip when either field is unchanged.
    EitherFieldMatches,
}

pub const DEFAULT_REFERENCE_DEDUP: ReferenceDedup = ReferenceDedup::BothFieldsMatch;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TaskTiming {
    /// Bound on every intra-system mailbox send and receive.
    pub mailbox_timeout_ms: u64,
    /// Bound on each notification wait.
    pub notify_timeout_ms: u64,
    /// Voluntary delay at the end of each processing pass.
    pub pass_delay_ms: u64,
}

impl TaskTiming {
    pub fn mailbox_timeout(&self) -> Duration {
        Duration::from_millis(self.mailbox_timeout_ms)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }

    pub fn pass_delay(&self) -> Duration {
        Duration::from_millis(self.pass_delay_ms)
    }
}

impl Default for TaskTiming {
    fn default() -> Self {
        Self {
            mailbox_timeout_ms: 10,
            notify_timeout_ms: 10,
            pass_delay_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControlParams {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Bound on the accumulated integral term.
    pub integral_limit: f32,
    /// Control output range, mapped onto the drive range.
    pub min_temp: f32,
    pub max_temp: f32,
    pub min_drive: f32,
    pub max_drive: f32,
    /// Seconds between two PID steps.
    pub control_period: f32,
    /// Initial seconds between two measurements.
    pub sampling_period: f32,
    pub reference_dedup: ReferenceDedup,
}

impl ControlParams {
    /// Panics on a configuration the control loop can't run with.
    pub fn validate(&self) {
        assert!(self.min_temp < self.max_temp, "min_temp must be below max_temp");
        assert!(self.min_drive <= self.max_drive, "min_drive must not exceed max_drive");
        assert!(self.min_drive >= 0.0, "drive levels are unsigned");
        assert!(
            SAMPLING_PERIOD_RANGE.contains(&self.sampling_period),
            "sampling_period out of range"
        );
        assert!(
            self.control_period.is_finite() && self.control_period >= MIN_CONTROL_PERIOD,
            "control_period must be at least 1 ms"
        );
    }

    pub fn control_period(&self) -> Duration {
        Duration::from_millis((self.control_period * 1000.0) as u64)
    }
}

impl Default for ControlParams {
    fn default() -> Self {
        Self {
            kp: 10.0,
            ki: 0.5,
            kd: 1.0,
            integral_limit: 100.0,
            min_temp: 30.0,
            max_temp: 100.0,
            min_drive: 0.0,
            max_drive: 1000.0,
            control_period: 1.0,
            sampling_period: 1.0,
            reference_dedup: DEFAULT_REFERENCE_DEDUP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Framebuffer size in character cells.
    pub width: u16,
    pub height: u16,
}

impl Default for DisplayConfig {
    /// A 128x128 panel with a 5x7 font.
    fn default() -> Self {
        Self {
            width: 21,
            height: 16,
        }
    }
}

/// Host link receive timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReceiveTimeouts {
    // Timeout for the first byte of a frame. Nothing arriving is normal for an idle host.
    pub overall_ms: u64,
    // Shorter timeout once a frame has started, so a stalled sender can't hold the frame open.
    pub inter_byte_ms: u64,
}

impl ReceiveTimeouts {
    pub fn overall(&self) -> Duration {
        Duration::from_millis(self.overall_ms)
    }

    pub fn inter_byte(&self) -> Duration {
        Duration::from_millis(self.inter_byte_ms)
    }
}

impl Default for ReceiveTimeouts {
    fn default() -> Self {
        Self {
            overall_ms: 2000,
            inter_byte_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PacketConfig {
    pub framing: Framing,
    pub receive: ReceiveTimeouts,
    /// Bound on writing and flushing one outbound frame.
    pub write_ms: u64,
}

impl PacketConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            framing: Framing::default(),
            receive: ReceiveTimeouts::default(),
            write_ms: 500,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ThermostatConfig {
    pub timing: TaskTiming,
    pub control: ControlParams,
    pub display: DisplayConfig,
    pub packet: PacketConfig,
}

impl ThermostatConfig {
    /// Parses a JSON document, falling back to defaults for missing fields.
    pub fn from_json(json: &[u8]) -> Result<Self, serde_json_core::de::Error> {
        let (config, _consumed) = serde_json_core::from_slice::<ThermostatConfig>(json)?;
        Ok(config)
    }
}
