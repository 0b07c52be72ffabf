//! Bus-level enums and adapter capability flags

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of address bits walked by a search
pub const ADDRESS_BITS: u8 = 64;

/// Last-discrepancy value a search step returns when no device answered.
///
/// Any value above [`ADDRESS_BITS`] carries the same meaning.
pub const NO_DEVICE: u8 = ADDRESS_BITS + 1;

/// Match ROM command, followed by the 8 address bytes
pub const MATCH_ROM: u8 = 0x55;

/// Outcome of a bus reset pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetResult {
    /// No device answered with a presence pulse
    NoPresence,
    /// At least one device is present
    Presence,
    /// A device is present and signalling an alarm
    AlarmPresence,
    /// The bus is shorted
    Short,
}

impl ResetResult {
    /// Whether a device answered the reset
    pub fn is_present(self) -> bool {
        matches!(self, Self::Presence | Self::AlarmPresence)
    }
}

/// Search opcode broadcast at the start of a search step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchCommand {
    /// Every device takes part
    Normal,
    /// Only devices in an alarm condition take part
    Alarm,
}

impl SearchCommand {
    pub fn opcode(self) -> u8 {
        match self {
            Self::Normal => 0xF0,
            Self::Alarm => 0xEC,
        }
    }

    pub fn for_alarm(alarm_only: bool) -> Self {
        if alarm_only {
            Self::Alarm
        } else {
            Self::Normal
        }
    }
}

/// Bus communication speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speed {
    #[default]
    Regular,
    Flex,
    Overdrive,
    Hyperdrive,
}

/// When a power or program pulse change takes effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerCondition {
    /// Immediately
    Now,
    /// After the next bit is transferred
    AfterNextBit,
    /// After the next byte is transferred
    AfterNextByte,
}

/// How long strong power (or a program pulse) is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerDuration {
    HalfSecond,
    OneSecond,
    TwoSeconds,
    FourSeconds,
    SmartDone,
    Infinite,
    CurrentDetect,
    /// Standard EPROM programming pulse length
    Eprom,
}

/// A single optional adapter feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Overdrive,
    Hyperdrive,
    FlexSpeed,
    PowerDelivery,
    ProgramPulse,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Overdrive => "overdrive speed",
            Self::Hyperdrive => "hyperdrive speed",
            Self::FlexSpeed => "flexible speed",
            Self::PowerDelivery => "strong power delivery",
            Self::ProgramPulse => "program pulse delivery",
        };
        f.write_str(name)
    }
}

/// Static capability flags of an adapter type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub overdrive: bool,
    pub hyperdrive: bool,
    pub flex_speed: bool,
    pub power_delivery: bool,
    pub program_pulse: bool,
}

impl Capabilities {
    /// Every optional feature enabled
    pub const fn all() -> Self {
        Self {
            overdrive: true,
            hyperdrive: true,
            flex_speed: true,
            power_delivery: true,
            program_pulse: true,
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Overdrive => self.overdrive,
            Capability::Hyperdrive => self.hyperdrive,
            Capability::FlexSpeed => self.flex_speed,
            Capability::PowerDelivery => self.power_delivery,
            Capability::ProgramPulse => self.program_pulse,
        }
    }

    /// Capability a speed change requires, if any
    pub fn required_for_speed(speed: Speed) -> Option<Capability> {
        match speed {
            Speed::Regular => None,
            Speed::Flex => Some(Capability::FlexSpeed),
            Speed::Overdrive => Some(Capability::Overdrive),
            Speed::Hyperdrive => Some(Capability::Hyperdrive),
        }
    }
}
