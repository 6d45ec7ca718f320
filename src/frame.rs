//! Frame building, extraction and checksum validation.
//!
//! A frame is `marker + opcode + body + checksum + CRLF`, all ASCII-hex and
//! upper-case. The checksum is a CRC-8 over the *decoded* opcode and body
//! bytes, not over their hex characters.
//!
//! The extraction helpers never fail hard: malformed or short input yields
//! an empty string, which [`validate`] and callers treat as a failed check.

use crate::constants::*;
use crate::error::{PumpError, Result};
use crate::types::Opcode;

/// Fold one byte into a running CRC-8 (poly 0x31, MSB first).
fn crc8_step(crc: u8, byte: u8) -> u8 {
    let mut crc = crc ^ byte;
    for _ in 0..8 {
        crc = if crc & 0x80 != 0 {
            (crc << 1) ^ CRC8_POLYNOMIAL
        } else {
            crc << 1
        };
    }
    crc
}

/// CRC-8 with polynomial 0x31 and initial value 0xFF.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(CRC8_INIT, |crc, &b| crc8_step(crc, b))
}

/// Checksum of a hex string, as two upper-case hex characters.
///
/// Returns `None` when `hex_text` is not valid hex.
pub fn checksum_hex(hex_text: &str) -> Option<String> {
    let bytes = hex::decode(hex_text).ok()?;
    Some(format!("{:02X}", crc8(&bytes)))
}

fn build(marker: &str, opcode: Opcode, body: &[u8]) -> String {
    let mut raw = Vec::with_capacity(body.len() + 1);
    raw.push(opcode.code());
    raw.extend_from_slice(body);
    let crc = crc8(&raw);

    let mut frame = String::with_capacity(marker.len() + raw.len() * 2 + 4);
    frame.push_str(marker);
    frame.push_str(&hex::encode_upper(&raw));
    frame.push_str(&format!("{:02X}", crc));
    frame.push_str(TERMINATOR);
    frame
}

/// Build a host request frame for `opcode` carrying `body`.
pub fn build_request(opcode: Opcode, body: &[u8]) -> String {
    build(REQUEST_MARKER, opcode, body)
}

/// Build a controller reply frame. Used by device simulators and tests.
pub fn build_reply(opcode: Opcode, body: &[u8]) -> String {
    build(REPLY_MARKER, opcode, body)
}

/// Handshake frame.
///
/// The controller expects the ping without a checksum and only its reply
/// prefix is inspected.
pub fn ping() -> String {
    format!("{}{}{}", REQUEST_MARKER, Opcode::Ping.hex(), TERMINATOR)
}

/// Slice `raw` from `start` up to the checksum, or empty when too short.
fn slice_before_checksum(raw: &str, start: usize) -> &str {
    let tail = TERMINATOR.len() + CHECKSUM_LEN;
    match raw.len().checked_sub(start + tail) {
        Some(len) if len > 0 => raw.get(start..start + len).unwrap_or(""),
        _ => "",
    }
}

/// Opcode and body, the checksum scope.
pub fn extract_body(raw: &str) -> &str {
    slice_before_checksum(raw, REQUEST_MARKER.len())
}

/// Body only, the application payload.
pub fn extract_payload(raw: &str) -> &str {
    slice_before_checksum(raw, REQUEST_MARKER.len() + OPCODE_LEN)
}

/// The two checksum characters before the terminator.
pub fn extract_checksum(raw: &str) -> &str {
    let body = extract_body(raw);
    if body.is_empty() {
        return "";
    }
    let start = REQUEST_MARKER.len() + body.len();
    raw.get(start..start + CHECKSUM_LEN).unwrap_or("")
}

/// True when the embedded checksum matches the recomputed one.
pub fn validate(raw: &str) -> bool {
    let crc = extract_checksum(raw);
    let body = extract_body(raw);
    if crc.is_empty() || body.is_empty() {
        return false;
    }
    match checksum_hex(body) {
        Some(calc) => calc.eq_ignore_ascii_case(crc),
        None => false,
    }
}

/// Check that `raw` is a valid reply to `opcode` and return its payload.
///
/// The payload is empty for replies that carry no data.
pub fn check_reply(raw: &str, opcode: Opcode) -> Result<&str> {
    let expected = format!("{}{}", REPLY_MARKER, opcode.hex());
    let prefix = raw.get(..expected.len()).unwrap_or("");
    if !prefix.eq_ignore_ascii_case(&expected) {
        return Err(PumpError::FrameValidation {
            expected,
            actual: raw.to_string(),
        });
    }
    if !validate(raw) {
        return Err(PumpError::ChecksumMismatch);
    }
    Ok(extract_payload(raw))
}

/// True when a handshake reply came back from the controller.
pub fn is_ping_reply(raw: &str) -> bool {
    let expected = format!("{}{}", REPLY_MARKER, Opcode::Ping.hex());
    raw.starts_with(&expected)
}
