//! In-memory controller used by the integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use pump_protocol::frame;
use pump_protocol::{
    Counters, MeasuredCharacteristics, Opcode, Parameters, Payload, PumpError, Result, Tracer,
    Transport,
};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

/// Ways the simulated controller can misbehave on one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Timeout,
    BadChecksum,
    WrongOpcode,
    ShortPayload,
    Unplug,
}

#[derive(Debug, Default)]
pub struct Device {
    pub counters: Counters,
    pub parameters: Parameters,
    pub characteristics: MeasuredCharacteristics,
    /// Discoveries that will find nothing before the controller shows up
    pub hidden_for: usize,
    pub faults: VecDeque<(Opcode, Fault)>,
    /// Fail the next idle health probe
    pub unplug_when_idle: bool,
    /// Every request frame received, in order
    pub received: Vec<String>,
}

/// Shared handle so a test can inspect and script the device while a
/// session owns the transport.
pub type DeviceHandle = Arc<Mutex<Device>>;

pub struct Simulator {
    device: DeviceHandle,
    open: bool,
}

impl Simulator {
    pub fn new(device: Device) -> (Self, DeviceHandle) {
        let handle = Arc::new(Mutex::new(device));
        (
            Simulator {
                device: handle.clone(),
                open: false,
            },
            handle,
        )
    }
}

pub fn sample_device() -> Device {
    Device {
        counters: Counters {
            cycles: 12_345,
            time: 98_765,
        },
        parameters: Parameters {
            cpm: 1500,
            tp: 2500,
            tbc: 40_000,
            tbtp: 7200,
            ct: 0xFF,
            tw: 250,
        },
        characteristics: MeasuredCharacteristics {
            voltage: 1210,
            current: 95,
        },
        ..Device::default()
    }
}

fn corrupt_checksum(mut reply: String) -> String {
    let at = reply.len() - 3;
    let swapped = if &reply[at..at + 1] == "0" { "1" } else { "0" };
    reply.replace_range(at..at + 1, swapped);
    reply
}

impl Transport for Simulator {
    fn discover(&mut self, tracer: &Tracer) -> Result<String> {
        let mut device = self.device.lock();
        if device.hidden_for > 0 {
            device.hidden_for -= 1;
            tracer.info("error : sim0");
            return Err(PumpError::TransportOpen { tried: 1 });
        }
        self.open = true;
        Ok("sim0".to_string())
    }

    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        if !self.open {
            return Err(PumpError::NotConnected);
        }
        let text = String::from_utf8_lossy(request).into_owned();
        let mut device = self.device.lock();
        device.received.push(text.clone());

        assert!(text.starts_with('@'), "not a request: {:?}", text);
        assert!(frame::validate(&text), "bad request checksum: {:?}", text);
        let code = u8::from_str_radix(&text[1..3], 16).expect("opcode");
        let opcode = Opcode::from_code(code).expect("known opcode");

        let fault = match device.faults.front() {
            Some((op, fault)) if *op == opcode => {
                let fault = *fault;
                device.faults.pop_front();
                Some(fault)
            }
            _ => None,
        };

        let mut body = match opcode {
            Opcode::Ping => Vec::new(),
            Opcode::ReadCounters => device.counters.to_bytes(),
            Opcode::WriteCounters => {
                device.counters = Counters::try_decode(frame::extract_payload(&text))?;
                Vec::new()
            }
            Opcode::ReadParameters => device.parameters.to_bytes(),
            Opcode::WriteParameters => {
                device.parameters = Parameters::try_decode(frame::extract_payload(&text))?;
                Vec::new()
            }
            Opcode::SingleCycle => {
                device.counters.cycles += 1;
                device.characteristics.to_bytes()
            }
        };

        let reply = match fault {
            None => frame::build_reply(opcode, &body),
            Some(Fault::Timeout) => return Err(PumpError::ExchangeTimeout { stage: "reply" }),
            Some(Fault::Unplug) => {
                self.open = false;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged").into());
            }
            Some(Fault::BadChecksum) => corrupt_checksum(frame::build_reply(opcode, &body)),
            Some(Fault::WrongOpcode) => frame::build_reply(Opcode::Ping, &body),
            Some(Fault::ShortPayload) => {
                body.pop();
                frame::build_reply(opcode, &body)
            }
        };
        Ok(reply.into_bytes())
    }

    fn probe(&mut self) -> Result<()> {
        let mut device = self.device.lock();
        if self.open && device.unplug_when_idle {
            device.unplug_when_idle = false;
            self.open = false;
            return Err(io::Error::new(io::ErrorKind::NotConnected, "unplugged").into());
        }
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn port_name(&self) -> Option<&str> {
        if self.open {
            Some("sim0")
        } else {
            None
        }
    }
}
