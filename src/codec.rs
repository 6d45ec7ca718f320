//! Fixed-width little-endian payload codecs.
//!
//! Every message type has an exact wire width. Fields are laid out in
//! declaration order, each as its little-endian bytes, and the whole thing
//! travels as upper-case hex inside a frame.

use crate::error::{PumpError, Result};
use crate::types::{Counters, MeasuredCharacteristics, Parameters};

/// A message body with a fixed binary width.
pub trait Payload: Sized + Default {
    /// Exact number of raw bytes on the wire
    const WIDTH: usize;

    /// Raw little-endian bytes, exactly `WIDTH` long.
    fn to_bytes(&self) -> Vec<u8>;

    /// Rebuild from raw bytes. Missing trailing bytes read as zero and extra
    /// ones are ignored; [`Payload::try_decode`] is the checked entry point.
    fn from_bytes(raw: &[u8]) -> Self;

    /// Upper-case hex form used inside frames.
    fn encode(&self) -> String {
        hex::encode_upper(self.to_bytes())
    }

    /// Strict decode: wrong width or bad hex is an error.
    fn try_decode(payload: &str) -> Result<Self> {
        let raw = hex::decode(payload).map_err(|_| PumpError::PayloadLength {
            expected: Self::WIDTH,
            actual: payload.len() / 2,
        })?;
        if raw.len() != Self::WIDTH {
            return Err(PumpError::PayloadLength {
                expected: Self::WIDTH,
                actual: raw.len(),
            });
        }
        Ok(Self::from_bytes(&raw))
    }

    /// Lenient decode: anything but an exact-width payload becomes the
    /// zero-valued structure.
    fn decode(payload: &str) -> Self {
        Self::try_decode(payload).unwrap_or_default()
    }
}

/// Cursor over a raw payload that hands out little-endian fields.
struct Fields<'a> {
    raw: &'a [u8],
}

impl<'a> Fields<'a> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        let n = N.min(self.raw.len());
        out[..n].copy_from_slice(&self.raw[..n]);
        self.raw = &self.raw[n..];
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }
}

impl Payload for Counters {
    const WIDTH: usize = 8;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIDTH);
        out.extend_from_slice(&self.cycles.to_le_bytes());
        out.extend_from_slice(&self.time.to_le_bytes());
        out
    }

    fn from_bytes(raw: &[u8]) -> Self {
        let mut f = Fields { raw };
        Counters {
            cycles: f.u32(),
            time: f.u32(),
        }
    }
}

impl Payload for Parameters {
    const WIDTH: usize = 11;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIDTH);
        out.extend_from_slice(&self.cpm.to_le_bytes());
        out.extend_from_slice(&self.tp.to_le_bytes());
        out.extend_from_slice(&self.tbc.to_le_bytes());
        out.extend_from_slice(&self.tbtp.to_le_bytes());
        out.push(self.ct);
        out.extend_from_slice(&self.tw.to_le_bytes());
        out
    }

    fn from_bytes(raw: &[u8]) -> Self {
        let mut f = Fields { raw };
        Parameters {
            cpm: f.u16(),
            tp: f.u16(),
            tbc: f.u16(),
            tbtp: f.u16(),
            ct: f.u8(),
            tw: f.u16(),
        }
    }
}

impl Payload for MeasuredCharacteristics {
    const WIDTH: usize = 4;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIDTH);
        out.extend_from_slice(&self.voltage.to_le_bytes());
        out.extend_from_slice(&self.current.to_le_bytes());
        out
    }

    fn from_bytes(raw: &[u8]) -> Self {
        let mut f = Fields { raw };
        MeasuredCharacteristics {
            voltage: f.u16(),
            current: f.u16(),
        }
    }
}
