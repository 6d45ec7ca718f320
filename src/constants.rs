//! Protocol constants for pump controller communication.
//!
//! This module defines the wire markers and framing pieces, the
//! serial port configuration, timing parameters and parameter limits.

/// Marker that opens every frame sent by the host
pub const REQUEST_MARKER: &str = "@";

/// Marker that opens every frame sent back by the controller
pub const REPLY_MARKER: &str = "$";

/// Frame terminator
pub const TERMINATOR: &str = "\r\n";

/// Number of hex characters in the trailing checksum
pub const CHECKSUM_LEN: usize = 2;

/// Number of hex characters in the opcode
pub const OPCODE_LEN: usize = 2;

/// CRC-8 generator polynomial
pub const CRC8_POLYNOMIAL: u8 = 0x31;

/// CRC-8 initial value
pub const CRC8_INIT: u8 = 0xFF;

/// Baud rate (115200 bps)
pub const BAUD_RATE: u32 = 115_200;

/// Data bits configuration
pub const DATA_BITS: serialport::DataBits = serialport::DataBits::Eight;

/// Parity configuration
pub const PARITY: serialport::Parity = serialport::Parity::None;

/// Stop bits configuration
pub const STOP_BITS: serialport::StopBits = serialport::StopBits::One;

/// Flow control configuration
pub const FLOW_CONTROL: serialport::FlowControl = serialport::FlowControl::None;

/// Time allowed for a written frame to leave the port, in milliseconds
pub const WRITE_TIMEOUT_MS: u64 = 2000;

/// Time allowed for the first reply bytes to arrive, in milliseconds
pub const REPLY_TIMEOUT_MS: u64 = 2000;

/// Failed discovery or read attempts tolerated before giving up
pub const MAX_RETRIES: u32 = 2;

/// Delay before each outcome is processed, so an operator can follow along
pub const PACE_DELAY_MS: u64 = 200;

/// How often an idle worker checks that the port is still alive
pub const HEALTH_INTERVAL_MS: u64 = 500;

/// Largest reply the transport will buffer from a single exchange
pub const MAX_REPLY_LEN: usize = 256;

/// Session events kept for the caller; the oldest go first once full
pub const EVENT_BACKLOG: usize = 256;

/// Trace lines kept for the caller; new lines are dropped once full
pub const TRACE_BACKLOG: usize = 1024;

/// `ct` value: cycle time comes from the configured `tw`
pub const CT_CONFIGURED: u8 = 0xFF;

/// `ct` value: cycle time comes from the onboard resistor
pub const CT_ONBOARD_RESISTOR: u8 = 0x00;

/// Upper bound for the pump test time `tp` (ms)
pub const TP_MAX_MS: u16 = 10_000;

/// Upper bound for the pause between cycles `tbc` (ms)
pub const TBC_MAX_MS: u16 = 60_000;

/// Upper bound for the time between pump tests `tbtp` (s)
pub const TBTP_MAX_S: u16 = 28_800;

/// Lower bound for the configured cycle time `tw` (ms)
pub const TW_MIN_MS: u16 = 40;

/// Upper bound for the configured cycle time `tw` (ms)
pub const TW_MAX_MS: u16 = 600;
