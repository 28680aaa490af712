//! Event families carried by the mailboxes, one per mailbox.

use serde::{Deserialize, Serialize};

/// Subsystem that emitted a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Control,
    Display,
    Packet,
}

/// Setpoint and measurement sampling period, in degrees Celsius and seconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub temperature: f32,
    #[serde(rename = "sampling_time")]
    pub sampling_period: f32,
}

impl Reference {
    /// Bit-level equality, so `NaN` and `-0.0` compare by representation.
    pub fn bit_eq(&self, other: &Reference) -> bool {
        self.temperature.to_bits() == other.temperature.to_bits()
            && self.sampling_period.to_bits() == other.sampling_period.to_bits()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub temperature: f32,
    pub pressure: f32,
    pub humidity: f32,
}

impl Measurement {
    pub fn bit_eq(&self, other: &Measurement) -> bool {
        self.temperature.to_bits() == other.temperature.to_bits()
            && self.humidity.to_bits() == other.humidity.to_bits()
            && self.pressure.to_bits() == other.pressure.to_bits()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SystemEvent {
    Ready { origin: Origin },
    Started { origin: Origin },
    Stopped { origin: Origin },
    Reference(Reference),
    Measure(Measurement),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    Start,
    Stop,
    Reference(Reference),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisplayEvent {
    Start,
    Stop,
    Reference(Reference),
    Measure(Measurement),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PacketEvent {
    Start,
    Stop,
    Measure(Measurement),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_eq_distinguishes_signed_zero() {
        let a = Reference {
            temperature: 0.0,
            sampling_period: 0.5,
        };
        let b = Reference {
            temperature: -0.0,
            sampling_period: 0.5,
        };
        assert_eq!(a, b);
        assert!(!a.bit_eq(&b));
        assert!(a.bit_eq(&a));
    }

    #[test]
    fn bit_eq_matches_identical_nan() {
        let m = Measurement {
            temperature: f32::NAN,
            ..Default::default()
        };
        assert_ne!(m, m);
        assert!(m.bit_eq(&m));
    }
}
