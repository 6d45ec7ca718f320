//! Serial link to the controller.

use serialport::{ClearBuffer, SerialPort, SerialPortInfo};
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::config::SessionConfig;
use crate::constants::*;
use crate::error::{PumpError, Result};
use crate::frame;
use crate::trace::Tracer;
use crate::types::Opcode;

/// A point-to-point link to one controller.
///
/// The worker owns exactly one transport and never calls it from more than
/// one thread.
pub trait Transport: Send {
    /// Find a controller and keep its port open. Returns the port name.
    fn discover(&mut self, tracer: &Tracer) -> Result<String>;

    /// Write one frame and return the raw reply bytes.
    fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>>;

    /// Check an idle port for faults such as an unplugged adapter.
    fn probe(&mut self) -> Result<()>;

    /// Release the port. Safe to call when nothing is open.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn port_name(&self) -> Option<&str>;
}

/// [`Transport`] over a real serial port
pub struct SerialTransport {
    config: SessionConfig,
    port: Option<Box<dyn SerialPort>>,
    name: Option<String>,
}

impl SerialTransport {
    /// Closed transport; nothing is opened until discovery
    pub fn new(config: SessionConfig) -> Self {
        SerialTransport {
            config,
            port: None,
            name: None,
        }
    }

    /// List available serial ports
    pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
        Ok(serialport::available_ports()?)
    }

    fn candidates(&self, tracer: &Tracer) -> Result<Vec<String>> {
        if !self.config.ports.is_empty() {
            return Ok(self.config.ports.clone());
        }

        let ports = Self::list_ports()?;
        tracer.info("Available devices:");
        for port in &ports {
            tracer.info(format!("{} {:?}", port.port_name, port.port_type));
        }
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    fn open(&self, name: &str) -> Result<Box<dyn SerialPort>> {
        let port = serialport::new(name, self.config.baud_rate)
            .data_bits(DATA_BITS)
            .parity(PARITY)
            .stop_bits(STOP_BITS)
            .flow_control(FLOW_CONTROL)
            .timeout(self.config.reply_timeout())
            .open()?;
        Ok(port)
    }

    /// Open `name` and ping it. The port is dropped (closed) on any failure.
    fn try_port(&self, name: &str, tracer: &Tracer) -> Result<Box<dyn SerialPort>> {
        tracer.info(format!("Try open -> {}", name));
        let mut port = self.open(name)?;

        let ping = frame::ping();
        tracer.out(ping.as_bytes());
        let raw = round_trip(
            &mut *port,
            ping.as_bytes(),
            self.config.write_timeout(),
            self.config.reply_timeout(),
        )?;
        tracer.incoming(&raw);

        let text = String::from_utf8_lossy(&raw);
        if !frame::is_ping_reply(&text) {
            return Err(PumpError::FrameValidation {
                expected: format!("{}{}", REPLY_MARKER, Opcode::Ping.hex()),
                actual: text.into_owned(),
            });
        }
        Ok(port)
    }
}

impl Transport for SerialTransport {
    fn discover(&mut self, tracer: &Tracer) -> Result<String> {
        if let Some(name) = &self.name {
            return Ok(name.clone());
        }

        let candidates = self.candidates(tracer)?;
        for name in &candidates {
            match self.try_port(name, tracer) {
                Ok(port) => {
                    tracer.info(format!("ok : {}", name));
                    log::info!("controller found on {}", name);
                    self.port = Some(port);
                    self.name = Some(name.clone());
                    return Ok(name.clone());
                }
                Err(e) => {
                    tracer.info(format!("error : {} ({})", name, e));
                }
            }
        }

        Err(PumpError::TransportOpen {
            tried: candidates.len(),
        })
    }

    fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        let port = self.port.as_mut().ok_or(PumpError::NotConnected)?;
        let result = round_trip(
            &mut **port,
            frame,
            self.config.write_timeout(),
            self.config.reply_timeout(),
        );
        if let Err(e) = &result {
            if e.is_port_fault() {
                self.close();
            }
        }
        result
    }

    fn probe(&mut self) -> Result<()> {
        if let Some(port) = self.port.as_ref() {
            port.bytes_to_read()?;
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(name) = self.name.take() {
            log::debug!("closing {}", name);
        }
        self.port = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn port_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

fn timed_out(e: io::Error, stage: &'static str) -> PumpError {
    if e.kind() == io::ErrorKind::TimedOut {
        PumpError::ExchangeTimeout { stage }
    } else {
        PumpError::Io(e)
    }
}

/// Write `frame`, wait for it to drain, then wait for a reply.
///
/// The reply is whatever arrived by the time the first read returns, plus
/// anything already buffered behind it. Frames split across slower reads
/// are not reassembled.
fn round_trip(
    port: &mut dyn SerialPort,
    frame: &[u8],
    write_timeout: Duration,
    reply_timeout: Duration,
) -> Result<Vec<u8>> {
    port.clear(ClearBuffer::Input)?;

    port.set_timeout(write_timeout)?;
    port.write_all(frame).map_err(|e| timed_out(e, "write"))?;
    port.flush().map_err(|e| timed_out(e, "write"))?;

    port.set_timeout(reply_timeout)?;
    let mut reply = vec![0u8; MAX_REPLY_LEN];
    let n = port.read(&mut reply).map_err(|e| timed_out(e, "reply"))?;
    if n == 0 {
        return Err(PumpError::ExchangeTimeout { stage: "reply" });
    }
    reply.truncate(n);

    while reply.len() < MAX_REPLY_LEN {
        let pending = port.bytes_to_read()? as usize;
        if pending == 0 {
            break;
        }
        let mut more = vec![0u8; pending.min(MAX_REPLY_LEN - reply.len())];
        let n = port.read(&mut more).map_err(|e| timed_out(e, "reply"))?;
        reply.extend_from_slice(&more[..n]);
    }

    Ok(reply)
}
