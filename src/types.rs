//! Controller data model, session states and events.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::*;
use crate::error::{FailureKind, PumpError, Result};

/// Operation codes shared by requests and their replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Ping,
    ReadCounters,
    WriteCounters,
    ReadParameters,
    WriteParameters,
    SingleCycle,
}

impl Opcode {
    pub const ALL: [Opcode; 6] = [
        Opcode::Ping,
        Opcode::ReadCounters,
        Opcode::WriteCounters,
        Opcode::ReadParameters,
        Opcode::WriteParameters,
        Opcode::SingleCycle,
    ];

    /// Raw opcode byte
    pub fn code(self) -> u8 {
        match self {
            Opcode::Ping => 0x55,
            Opcode::ReadCounters => 0x20,
            Opcode::WriteCounters => 0x2F,
            Opcode::ReadParameters => 0x30,
            Opcode::WriteParameters => 0x3F,
            Opcode::SingleCycle => 0x40,
        }
    }

    /// Opcode as it appears on the wire (two upper-case hex characters)
    pub fn hex(self) -> String {
        format!("{:02X}", self.code())
    }

    /// Look up an opcode by its numeric code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.code() == code)
    }
}

/// Lifetime counters kept by the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Total number of cycles run
    pub cycles: u32,
    /// Total operating time (s)
    pub time: u32,
}

/// Where the controller takes its cycle time from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimingSource {
    /// Cycle time is `tw`
    Configured,
    /// Cycle time is set by the onboard resistor, `tw` is ignored
    OnboardResistor,
}

impl TimingSource {
    /// Raw `ct` byte for this source
    pub fn ct(self) -> u8 {
        match self {
            TimingSource::Configured => CT_CONFIGURED,
            TimingSource::OnboardResistor => CT_ONBOARD_RESISTOR,
        }
    }
}

/// Operating parameters of the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters {
    /// Motor current limit (mA)
    pub cpm: u16,
    /// Pump test time (ms)
    pub tp: u16,
    /// Pause between cycles (ms)
    pub tbc: u16,
    /// Time between pump tests (s)
    pub tbtp: u16,
    /// Timing source flag, see [`TimingSource`]
    pub ct: u8,
    /// Cycle time when `ct` is [`CT_CONFIGURED`] (ms)
    pub tw: u16,
}

impl Parameters {
    /// Decoded `ct`, or `None` for a value the controller does not define.
    pub fn timing_source(&self) -> Option<TimingSource> {
        match self.ct {
            CT_CONFIGURED => Some(TimingSource::Configured),
            CT_ONBOARD_RESISTOR => Some(TimingSource::OnboardResistor),
            _ => None,
        }
    }

    /// Check every field against the range the controller accepts.
    pub fn validate(&self) -> Result<()> {
        check_range("tp", self.tp as u32, 0, TP_MAX_MS as u32)?;
        check_range("tbc", self.tbc as u32, 0, TBC_MAX_MS as u32)?;
        check_range("tbtp", self.tbtp as u32, 0, TBTP_MAX_S as u32)?;

        match self.timing_source() {
            Some(TimingSource::Configured) => {
                check_range("tw", self.tw as u32, TW_MIN_MS as u32, TW_MAX_MS as u32)
            }
            Some(TimingSource::OnboardResistor) => Ok(()),
            None => Err(PumpError::OutOfRange {
                field: "ct",
                value: self.ct as u32,
                min: CT_ONBOARD_RESISTOR as u32,
                max: CT_CONFIGURED as u32,
            }),
        }
    }
}

fn check_range(field: &'static str, value: u32, min: u32, max: u32) -> Result<()> {
    if value < min || value > max {
        return Err(PumpError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Values measured during a single cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasuredCharacteristics {
    /// Board supply voltage (0.01 V units)
    pub voltage: u16,
    /// Pump current during the cycle (0.01 A units)
    pub current: u16,
}

impl MeasuredCharacteristics {
    /// Supply voltage in volts
    pub fn volts(&self) -> f64 {
        self.voltage as f64 * 0.01
    }

    /// Pump current in amperes
    pub fn amps(&self) -> f64 {
        self.current as f64 * 0.01
    }
}

/// Session lifecycle states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Initial,
    Connecting,
    ReadingCounters,
    ReadingParameters,
    Ready,
    WritingCounters,
    WritingParameters,
    LaunchingCycle,
}

/// Outcome of one worker operation, or an asynchronous port fault
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEvent {
    DeviceFound { port: String },
    DeviceNotFound,
    ReadCountersSuccess(Counters),
    ReadCountersError(FailureKind),
    WriteCountersSuccess,
    WriteCountersError(FailureKind),
    ReadParametersSuccess(Parameters),
    ReadParametersError(FailureKind),
    WriteParametersSuccess,
    WriteParametersError(FailureKind),
    LaunchCycleSuccess(MeasuredCharacteristics),
    LaunchCycleError(FailureKind),
    Disconnected,
}

/// Why the session gave up and returned to [`SessionState::Initial`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FatalReason {
    DeviceNotFound,
    CountersReadFailed,
    ParametersReadFailed,
    Disconnected,
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FatalReason::DeviceNotFound => "device not found",
            FatalReason::CountersReadFailed => "counters read failed",
            FatalReason::ParametersReadFailed => "parameters read failed",
            FatalReason::Disconnected => "disconnected",
        };
        f.write_str(text)
    }
}

/// Operations that can fail without ending the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    WriteCounters,
    WriteParameters,
    LaunchCycle,
}

/// Notifications published by the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Raw outcome as reported by the worker
    Device(DeviceEvent),
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// Pipeline restarting from discovery
    Retrying { attempt: u32, max: u32 },
    /// Pipeline finished; both snapshots are fresh
    Ready {
        counters: Counters,
        parameters: Parameters,
    },
    /// A write was acknowledged; values are being re-read
    WriteSucceeded(Operation),
    CycleCompleted(MeasuredCharacteristics),
    /// Write or cycle failed; the session stays usable
    OperationFailed {
        operation: Operation,
        kind: FailureKind,
    },
    Fatal(FatalReason),
}

/// Latest validated copies of everything read from the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub counters: Counters,
    pub parameters: Parameters,
    pub characteristics: MeasuredCharacteristics,
}

/// Format a second count as `1d 2h 3m 4s`, leaving out leading zero units
pub fn format_seconds(total: u32) -> String {
    let seconds = total % 60;
    let minutes = total / 60 % 60;
    let hours = total / 3600 % 24;
    let days = total / 86_400;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{}d ", days));
    }
    if hours > 0 {
        out.push_str(&format!("{}h ", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m ", minutes));
    }
    out.push_str(&format!("{}s", seconds));
    out
}
