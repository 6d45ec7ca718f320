//! Dedicated thread that owns the [`Transport`].
//!
//! Each exchange can block for two full timeouts, so all port I/O happens
//! here. Requests arrive one at a time over a channel and every request
//! produces exactly one [`Outcome::Completed`]. Port faults noticed while
//! idle, or in the middle of an exchange, produce [`Outcome::Disconnected`]
//! stamped with the last request the worker had taken.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::codec::Payload;
use crate::error::{PumpError, Result};
use crate::frame;
use crate::session::Shared;
use crate::trace::Tracer;
use crate::transport::Transport;
use crate::types::{Counters, DeviceEvent, MeasuredCharacteristics, Opcode, Parameters};

/// Operations the worker can perform
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    FindDevice,
    ReadCounters,
    WriteCounters(Counters),
    ReadParameters,
    WriteParameters(Parameters),
    LaunchCycle,
}

#[derive(Debug)]
pub(crate) enum Message {
    Request { seq: u64, command: Command },
    Shutdown,
}

#[derive(Debug)]
pub(crate) enum Outcome {
    Completed { seq: u64, event: DeviceEvent },
    /// `seq` is the request in flight, or the last one finished when idle.
    Disconnected { seq: u64 },
}

pub(crate) struct Worker {
    transport: Box<dyn Transport>,
    tracer: Tracer,
    shared: Arc<Shared>,
    outcomes: Sender<Outcome>,
    health_interval: Duration,
    last_seq: u64,
}

impl Worker {
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        tracer: Tracer,
        shared: Arc<Shared>,
        outcomes: Sender<Outcome>,
        health_interval: Duration,
    ) -> Self {
        Worker {
            transport,
            tracer,
            shared,
            outcomes,
            health_interval,
            last_seq: 0,
        }
    }

    pub(crate) fn spawn(self, requests: Receiver<Message>) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("pump-transport".to_string())
            .spawn(move || self.run(requests))?;
        Ok(handle)
    }

    fn run(mut self, requests: Receiver<Message>) {
        loop {
            match requests.recv_timeout(self.health_interval) {
                Ok(Message::Request { seq, command }) => {
                    log::debug!("request #{}: {:?}", seq, command);
                    self.last_seq = seq;
                    let event = self.perform(command);
                    self.sync_connected();
                    if self.outcomes.send(Outcome::Completed { seq, event }).is_err() {
                        break;
                    }
                }
                Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if !self.check_health() {
                        break;
                    }
                }
            }
        }

        self.transport.close();
        self.sync_connected();
        log::debug!("transport worker stopped");
    }

    fn sync_connected(&self) {
        self.shared
            .connected
            .store(self.transport.is_open(), Ordering::SeqCst);
    }

    /// Probe an idle port. Returns false once nobody listens for outcomes.
    fn check_health(&mut self) -> bool {
        if !self.transport.is_open() {
            return true;
        }
        match self.transport.probe() {
            Ok(()) => true,
            Err(e) => self.port_fault(&e),
        }
    }

    fn port_fault(&mut self, error: &PumpError) -> bool {
        self.tracer.info(format!("serial-port error : {}", error));
        log::warn!("port fault: {}", error);
        self.transport.close();
        self.sync_connected();
        self.outcomes
            .send(Outcome::Disconnected { seq: self.last_seq })
            .is_ok()
    }

    fn perform(&mut self, command: Command) -> DeviceEvent {
        match command {
            Command::FindDevice => self.find_device(),
            Command::ReadCounters => match self.read::<Counters>(Opcode::ReadCounters) {
                Ok(counters) => DeviceEvent::ReadCountersSuccess(counters),
                Err(e) => DeviceEvent::ReadCountersError(e.kind()),
            },
            Command::WriteCounters(counters) => {
                match self.transact(Opcode::WriteCounters, &counters.to_bytes()) {
                    Ok(_) => DeviceEvent::WriteCountersSuccess,
                    Err(e) => DeviceEvent::WriteCountersError(e.kind()),
                }
            }
            Command::ReadParameters => match self.read::<Parameters>(Opcode::ReadParameters) {
                Ok(parameters) => DeviceEvent::ReadParametersSuccess(parameters),
                Err(e) => DeviceEvent::ReadParametersError(e.kind()),
            },
            Command::WriteParameters(parameters) => {
                match self.transact(Opcode::WriteParameters, &parameters.to_bytes()) {
                    Ok(_) => DeviceEvent::WriteParametersSuccess,
                    Err(e) => DeviceEvent::WriteParametersError(e.kind()),
                }
            }
            Command::LaunchCycle => {
                match self.read::<MeasuredCharacteristics>(Opcode::SingleCycle) {
                    Ok(values) => DeviceEvent::LaunchCycleSuccess(values),
                    Err(e) => DeviceEvent::LaunchCycleError(e.kind()),
                }
            }
        }
    }

    fn find_device(&mut self) -> DeviceEvent {
        if let Some(name) = self.transport.port_name() {
            log::debug!("already connected to {}", name);
            return DeviceEvent::DeviceFound {
                port: name.to_string(),
            };
        }
        match self.transport.discover(&self.tracer) {
            Ok(port) => DeviceEvent::DeviceFound { port },
            Err(e) => {
                log::warn!("discovery failed: {}", e);
                self.transport.close();
                DeviceEvent::DeviceNotFound
            }
        }
    }

    fn read<T: Payload>(&mut self, opcode: Opcode) -> Result<T> {
        let payload = self.transact(opcode, &[])?;
        let decoded = T::try_decode(&payload);
        if decoded.is_err() {
            self.transport.close();
        }
        decoded
    }

    /// One exchange. Any failure closes the transport.
    fn transact(&mut self, opcode: Opcode, body: &[u8]) -> Result<String> {
        let result = self.exchange(opcode, body);
        if let Err(e) = &result {
            log::warn!("{:?} exchange failed: {}", opcode, e);
            if e.is_port_fault() {
                // Disconnected goes out before this request's outcome.
                let _ = self.port_fault(e);
            }
            self.transport.close();
        }
        result
    }

    fn exchange(&mut self, opcode: Opcode, body: &[u8]) -> Result<String> {
        if !self.transport.is_open() {
            return Err(PumpError::NotConnected);
        }

        let request = frame::build_request(opcode, body);
        self.tracer.out(request.as_bytes());
        let raw = self.transport.exchange(request.as_bytes())?;
        self.tracer.incoming(&raw);

        let text = String::from_utf8(raw).map_err(|e| PumpError::FrameValidation {
            expected: format!("ASCII reply to {}", opcode.hex()),
            actual: String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })?;
        let payload = frame::check_reply(&text, opcode)?;
        Ok(payload.to_string())
    }
}
