//! Device session: the state machine that sequences worker operations.
//!
//! The session lives on the caller's thread. Commands are checked against the
//! current state, handed to the worker as a single request, and the session
//! moves on only when that request's outcome comes back through [`Session::poll`],
//! [`Session::wait`] or [`Session::settle`].
//!
//! ```text
//! Initial -connect-> Connecting -found-> ReadingCounters -ok-> ReadingParameters -ok-> Ready
//!                        ^  |                  |                      |
//!                        +--+---- retry -------+----------------------+
//!
//! Ready -write-> Writing* -ok-> ReadingCounters      Ready -launch-> LaunchingCycle -> Ready
//!                         -err-> Ready
//! ```
//!
//! Read failures restart the whole pipeline from discovery, up to the retry
//! limit. Write and cycle failures are never retried: the device may already
//! have applied them.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::SessionConfig;
use crate::constants::{EVENT_BACKLOG, TRACE_BACKLOG};
use crate::error::{FailureKind, PumpError, Result};
use crate::trace::{TraceLine, Tracer};
use crate::transport::{SerialTransport, Transport};
use crate::types::*;
use crate::worker::{Command, Message, Outcome, Worker};

/// State shared between the session, the worker and snapshot readers.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) snapshot: Mutex<Snapshot>,
    pub(crate) connected: AtomicBool,
}

/// Read-only view of the latest snapshots, usable from any thread.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    shared: Arc<Shared>,
}

impl SnapshotReader {
    /// Latest counters, parameters and cycle measurements
    pub fn snapshot(&self) -> Snapshot {
        *self.shared.snapshot.lock()
    }

    /// Counters from the last successful read
    pub fn counters(&self) -> Counters {
        self.shared.snapshot.lock().counters
    }

    /// Parameters from the last successful read
    pub fn parameters(&self) -> Parameters {
        self.shared.snapshot.lock().parameters
    }

    /// Measurements from the last completed cycle
    pub fn characteristics(&self) -> MeasuredCharacteristics {
        self.shared.snapshot.lock().characteristics
    }

    /// Whether the worker currently holds an open port
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

/// Session with one pump controller
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    retries: u32,
    next_seq: u64,
    pending: Option<u64>,
    requests: Option<Sender<Message>>,
    outcomes: Receiver<Outcome>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    traces_rx: Receiver<TraceLine>,
    tracer: Tracer,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    /// Create a session that talks to a real serial port.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let transport = SerialTransport::new(config.clone());
        Self::with_transport(Box::new(transport), config)
    }

    /// Create a session over any [`Transport`].
    pub fn with_transport(transport: Box<dyn Transport>, config: SessionConfig) -> Result<Self> {
        let (requests_tx, requests_rx) = crossbeam_channel::unbounded();
        let (outcomes_tx, outcomes_rx) = crossbeam_channel::unbounded();
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_BACKLOG);
        let (traces_tx, traces_rx) = crossbeam_channel::bounded(TRACE_BACKLOG);

        let tracer = Tracer::new(traces_tx);
        let shared = Arc::new(Shared::default());
        let worker = Worker::new(
            transport,
            tracer.clone(),
            shared.clone(),
            outcomes_tx,
            config.health_interval(),
        )
        .spawn(requests_rx)?;

        Ok(Session {
            config,
            state: SessionState::Initial,
            retries: 0,
            next_seq: 0,
            pending: None,
            requests: Some(requests_tx),
            outcomes: outcomes_rx,
            events_tx,
            events_rx,
            traces_rx,
            tracer,
            shared,
            worker: Some(worker),
        })
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Start the connect pipeline.
    ///
    /// Accepted in `Initial`, and in `Ready` once an earlier failure has
    /// closed the port.
    pub fn connect(&mut self) -> Result<()> {
        let reconnect = self.state == SessionState::Ready && !self.is_connected();
        if self.state != SessionState::Initial && !reconnect {
            return Err(self.rejected("connect"));
        }
        self.retries = 0;
        self.issue(SessionState::Connecting, Command::FindDevice)
    }

    /// Re-read counters, then parameters.
    pub fn read_counters(&mut self) -> Result<()> {
        self.require_ready("read counters")?;
        self.issue(SessionState::ReadingCounters, Command::ReadCounters)
    }

    /// Re-read parameters only.
    pub fn read_parameters(&mut self) -> Result<()> {
        self.require_ready("read parameters")?;
        self.issue(SessionState::ReadingParameters, Command::ReadParameters)
    }

    /// Overwrite the lifetime counters, then read everything back.
    pub fn write_counters(&mut self, counters: Counters) -> Result<()> {
        self.require_ready("write counters")?;
        self.issue(
            SessionState::WritingCounters,
            Command::WriteCounters(counters),
        )
    }

    /// Write parameters after checking them against the controller's limits.
    pub fn write_parameters(&mut self, parameters: Parameters) -> Result<()> {
        self.require_ready("write parameters")?;
        parameters.validate()?;
        self.issue(
            SessionState::WritingParameters,
            Command::WriteParameters(parameters),
        )
    }

    /// Run one pump cycle and record the measured voltage and current.
    pub fn launch_cycle(&mut self) -> Result<()> {
        self.require_ready("launch cycle")?;
        self.issue(SessionState::LaunchingCycle, Command::LaunchCycle)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Current state of the session
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Failed attempts counted against the current pipeline.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// True while a request is waiting for its outcome.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Counters from the last successful read
    pub fn counters(&self) -> Counters {
        self.shared.snapshot.lock().counters
    }

    /// Parameters from the last successful read
    pub fn parameters(&self) -> Parameters {
        self.shared.snapshot.lock().parameters
    }

    /// Measurements from the last completed cycle
    pub fn characteristics(&self) -> MeasuredCharacteristics {
        self.shared.snapshot.lock().characteristics
    }

    /// Latest counters, parameters and cycle measurements
    pub fn snapshot(&self) -> Snapshot {
        *self.shared.snapshot.lock()
    }

    /// Whether the worker currently holds an open port
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Snapshot handle for other threads
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            shared: self.shared.clone(),
        }
    }

    /// Session notifications, in the order they happened.
    ///
    /// At most [`EVENT_BACKLOG`] undrained events are kept, newest last.
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }

    /// Wire trace, one line per frame plus discovery notes.
    ///
    /// Lines past [`TRACE_BACKLOG`] undrained ones are dropped.
    pub fn traces(&self) -> Receiver<TraceLine> {
        self.traces_rx.clone()
    }

    // ------------------------------------------------------------------------
    // Driving
    // ------------------------------------------------------------------------

    /// Handle every outcome that has already arrived. Never blocks on I/O.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(outcome) = self.outcomes.try_recv() {
            self.process(outcome);
            handled += 1;
        }
        handled
    }

    /// Wait up to `timeout` for one outcome and handle it.
    ///
    /// Returns `Ok(false)` on timeout.
    pub fn wait(&mut self, timeout: Duration) -> Result<bool> {
        match self.outcomes.recv_timeout(timeout) {
            Ok(outcome) => {
                self.process(outcome);
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(PumpError::WorkerStopped),
        }
    }

    /// Drive the session until nothing is pending, or `timeout` passes.
    ///
    /// Returns the state reached, normally `Ready` or `Initial`.
    pub fn settle(&mut self, timeout: Duration) -> Result<SessionState> {
        let deadline = Instant::now() + timeout;
        self.poll();
        while self.pending.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.wait(remaining)? {
                break;
            }
        }
        Ok(self.state)
    }

    /// Stop the worker after it finishes any exchange in flight, then close
    /// the port. Commands fail with `WorkerStopped` afterwards.
    pub fn shutdown(&mut self) {
        if let Some(requests) = self.requests.take() {
            let _ = requests.send(Message::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("transport worker panicked");
            }
        }
        self.pending = None;
    }

    // ------------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------------

    fn rejected(&self, command: &'static str) -> PumpError {
        PumpError::InvalidState {
            state: self.state,
            command,
        }
    }

    fn require_ready(&self, command: &'static str) -> Result<()> {
        if self.state != SessionState::Ready || self.pending.is_some() {
            return Err(self.rejected(command));
        }
        Ok(())
    }

    /// Send `command` and enter `next`. At most one request is outstanding.
    fn issue(&mut self, next: SessionState, command: Command) -> Result<()> {
        let requests = self.requests.as_ref().ok_or(PumpError::WorkerStopped)?;
        self.next_seq += 1;
        let seq = self.next_seq;
        requests
            .send(Message::Request { seq, command })
            .map_err(|_| PumpError::WorkerStopped)?;
        self.pending = Some(seq);
        self.transition(next);
        Ok(())
    }

    /// Like [`Session::issue`], for follow-ups issued from an outcome.
    fn advance(&mut self, next: SessionState, command: Command) {
        if let Err(e) = self.issue(next, command) {
            log::error!("cannot continue: {}", e);
            self.fail(FatalReason::Disconnected);
        }
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        log::info!("session {:?} -> {:?}", from, to);
        self.state = to;
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn emit(&self, mut event: SessionEvent) {
        while let Err(TrySendError::Full(back)) = self.events_tx.try_send(event) {
            let _ = self.events_rx.try_recv();
            event = back;
        }
    }

    fn fail(&mut self, reason: FatalReason) {
        self.retries = 0;
        self.pending = None;
        self.transition(SessionState::Initial);
        self.tracer.info(format!("fatal : {}", reason));
        self.emit(SessionEvent::Fatal(reason));
    }

    /// Restart the pipeline from discovery, or give up.
    fn retry_or_fail(&mut self, reason: FatalReason) {
        if self.retries < self.config.max_retries {
            self.retries += 1;
            log::warn!(
                "{}; retry {}/{}",
                reason,
                self.retries,
                self.config.max_retries
            );
            self.tracer.info(format!("Retry connect #{}", self.retries));
            self.emit(SessionEvent::Retrying {
                attempt: self.retries,
                max: self.config.max_retries,
            });
            // Re-entering Connecting from Connecting emits no state change.
            self.advance(SessionState::Connecting, Command::FindDevice);
        } else {
            self.fail(reason);
        }
    }

    fn operation_failed(&mut self, operation: Operation, kind: FailureKind) {
        log::warn!("{:?} failed: {:?}", operation, kind);
        self.transition(SessionState::Ready);
        self.emit(SessionEvent::OperationFailed { operation, kind });
    }

    fn process(&mut self, outcome: Outcome) {
        let pace = self.config.pace_delay();
        if !pace.is_zero() {
            thread::sleep(pace);
        }

        match outcome {
            Outcome::Disconnected { seq } => {
                if seq < self.next_seq {
                    log::debug!("dropping disconnect older than request #{}", self.next_seq);
                    return;
                }
                self.emit(SessionEvent::Device(DeviceEvent::Disconnected));
                if self.state != SessionState::Initial {
                    self.fail(FatalReason::Disconnected);
                }
            }
            Outcome::Completed { seq, event } => {
                if self.pending != Some(seq) {
                    log::debug!("dropping stale outcome #{}: {:?}", seq, event);
                    return;
                }
                self.pending = None;
                self.emit(SessionEvent::Device(event.clone()));
                self.on_event(event);
            }
        }
    }

    fn on_event(&mut self, event: DeviceEvent) {
        use DeviceEvent as E;
        use SessionState as S;

        match (self.state, event) {
            (S::Connecting, E::DeviceFound { .. }) => {
                self.retries = 0;
                self.advance(S::ReadingCounters, Command::ReadCounters);
            }
            (S::Connecting, E::DeviceNotFound) => {
                self.retry_or_fail(FatalReason::DeviceNotFound);
            }

            (S::ReadingCounters, E::ReadCountersSuccess(counters)) => {
                self.retries = 0;
                self.shared.snapshot.lock().counters = counters;
                self.advance(S::ReadingParameters, Command::ReadParameters);
            }
            (S::ReadingCounters, E::ReadCountersError(_)) => {
                self.retry_or_fail(FatalReason::CountersReadFailed);
            }

            (S::ReadingParameters, E::ReadParametersSuccess(parameters)) => {
                self.retries = 0;
                let counters = {
                    let mut snapshot = self.shared.snapshot.lock();
                    snapshot.parameters = parameters;
                    snapshot.counters
                };
                self.transition(S::Ready);
                self.emit(SessionEvent::Ready {
                    counters,
                    parameters,
                });
            }
            (S::ReadingParameters, E::ReadParametersError(_)) => {
                self.retry_or_fail(FatalReason::ParametersReadFailed);
            }

            (S::WritingCounters, E::WriteCountersSuccess) => {
                self.emit(SessionEvent::WriteSucceeded(Operation::WriteCounters));
                self.advance(S::ReadingCounters, Command::ReadCounters);
            }
            (S::WritingCounters, E::WriteCountersError(kind)) => {
                self.operation_failed(Operation::WriteCounters, kind);
            }

            (S::WritingParameters, E::WriteParametersSuccess) => {
                self.emit(SessionEvent::WriteSucceeded(Operation::WriteParameters));
                self.advance(S::ReadingCounters, Command::ReadCounters);
            }
            (S::WritingParameters, E::WriteParametersError(kind)) => {
                self.operation_failed(Operation::WriteParameters, kind);
            }

            (S::LaunchingCycle, E::LaunchCycleSuccess(values)) => {
                self.shared.snapshot.lock().characteristics = values;
                self.transition(S::Ready);
                self.emit(SessionEvent::CycleCompleted(values));
            }
            (S::LaunchingCycle, E::LaunchCycleError(kind)) => {
                self.operation_failed(Operation::LaunchCycle, kind);
            }

            (state, event) => {
                log::warn!("ignoring {:?} in {:?}", event, state);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
