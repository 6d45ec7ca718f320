mod common;

use common::{sample_device, Device, DeviceHandle, Fault, Simulator};
use pump_protocol::{
    Counters, DeviceEvent, FailureKind, FatalReason, MeasuredCharacteristics, Opcode, Operation,
    Parameters, PumpError, Session, SessionConfig, SessionEvent, SessionState,
};
use pump_protocol::constants::{EVENT_BACKLOG, TRACE_BACKLOG};
use std::thread;
use std::time::{Duration, Instant};

const SETTLE: Duration = Duration::from_secs(5);

fn config() -> SessionConfig {
    SessionConfig::default()
        .with_pace(Duration::ZERO)
        .with_health_interval(Duration::from_millis(20))
}

fn start(device: Device) -> (Session, DeviceHandle) {
    let (sim, handle) = Simulator::new(device);
    let session = Session::with_transport(Box::new(sim), config()).unwrap();
    (session, handle)
}

fn connected(device: Device) -> (Session, DeviceHandle) {
    let (mut session, handle) = start(device);
    session.connect().unwrap();
    assert_eq!(session.settle(SETTLE).unwrap(), SessionState::Ready);
    session.events().try_iter().for_each(drop);
    (session, handle)
}

fn states(events: &[SessionEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

#[test]
fn connect_pipeline_reaches_ready() {
    let (mut session, device) = start(sample_device());
    session.connect().unwrap();
    assert_eq!(session.settle(SETTLE).unwrap(), SessionState::Ready);

    let expected = device.lock();
    assert_eq!(session.counters(), expected.counters);
    assert_eq!(session.parameters(), expected.parameters);
    assert!(session.is_connected());

    let events: Vec<_> = session.events().try_iter().collect();
    assert_eq!(
        states(&events),
        [
            SessionState::Connecting,
            SessionState::ReadingCounters,
            SessionState::ReadingParameters,
            SessionState::Ready,
        ]
    );
    assert!(events.contains(&SessionEvent::Device(DeviceEvent::DeviceFound {
        port: "sim0".to_string()
    })));
    assert!(events.contains(&SessionEvent::Ready {
        counters: expected.counters,
        parameters: expected.parameters,
    }));
}

#[test]
fn trace_records_every_frame() {
    let (session, _device) = connected(sample_device());
    let lines: Vec<String> = session.traces().try_iter().map(|l| l.to_string()).collect();

    let read_counters = pump_protocol::frame::build_request(Opcode::ReadCounters, &[]);
    assert!(lines.contains(&format!("out > {}", read_counters.trim_end())));
    assert!(lines.iter().any(|l| l.starts_with("in  < $20")));
    assert!(lines.iter().any(|l| l.starts_with("in  < $30")));
}

#[test]
fn write_counters_rereads_from_device() {
    let (mut session, device) = connected(sample_device());
    let written = Counters {
        cycles: 10,
        time: 500,
    };
    session.write_counters(written).unwrap();
    assert_eq!(session.state(), SessionState::WritingCounters);
    assert_eq!(session.settle(SETTLE).unwrap(), SessionState::Ready);

    assert_eq!(device.lock().counters, written);
    assert_eq!(session.counters(), written);

    let events: Vec<_> = session.events().try_iter().collect();
    assert_eq!(
        states(&events),
        [
            SessionState::WritingCounters,
            SessionState::ReadingCounters,
            SessionState::ReadingParameters,
            SessionState::Ready,
        ]
    );
    assert!(events.contains(&SessionEvent::WriteSucceeded(Operation::WriteCounters)));
}

#[test]
fn write_parameters_round_trips_through_device() {
    let (mut session, device) = connected(sample_device());
    let params = Parameters {
        cpm: 2000,
        tp: 1000,
        tbc: 5000,
        tbtp: 600,
        ct: 0x00,
        tw: 0,
    };
    session.write_parameters(params).unwrap();
    assert_eq!(session.settle(SETTLE).unwrap(), SessionState::Ready);
    assert_eq!(device.lock().parameters, params);
    assert_eq!(session.parameters(), params);
}

#[test]
fn launch_cycle_reports_measurements() {
    let (mut session, device) = connected(sample_device());
    session.launch_cycle().unwrap();
    assert_eq!(session.settle(SETTLE).unwrap(), SessionState::Ready);

    let expected = device.lock().characteristics;
    assert_eq!(session.characteristics(), expected);
    assert!(session
        .events()
        .try_iter()
        .any(|e| e == SessionEvent::CycleCompleted(expected)));
}

#[test]
fn unplug_during_cycle_forces_initial() {
    let (mut session, device) = connected(sample_device());
    device
        .lock()
        .faults
        .push_back((Opcode::SingleCycle, Fault::Unplug));

    session.launch_cycle().unwrap();
    // Disconnected, then the stale cycle outcome.
    session.wait(SETTLE).unwrap();
    assert_eq!(session.state(), SessionState::Initial);
    session.settle(SETTLE).unwrap();
    session.poll();

    assert_eq!(session.state(), SessionState::Initial);
    assert!(!session.is_connected());
    assert_eq!(session.characteristics(), MeasuredCharacteristics::default());
    let events: Vec<_> = session.events().try_iter().collect();
    assert!(events.contains(&SessionEvent::Fatal(FatalReason::Disconnected)));
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::CycleCompleted(_))));
}

#[test]
fn idle_unplug_is_detected() {
    let (mut session, device) = connected(sample_device());
    device.lock().unplug_when_idle = true;

    assert!(session.wait(SETTLE).unwrap());
    assert_eq!(session.state(), SessionState::Initial);
    assert!(!session.is_connected());
    assert!(session
        .events()
        .try_iter()
        .any(|e| e == SessionEvent::Fatal(FatalReason::Disconnected)));
}

#[test]
fn reconnect_right_after_idle_unplug_reaches_ready() {
    let (mut session, device) = connected(sample_device());
    device.lock().unplug_when_idle = true;

    // Let the worker notice, but leave its report unread.
    let deadline = Instant::now() + SETTLE;
    while session.is_connected() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(!session.is_connected());
    assert_eq!(session.state(), SessionState::Ready);

    session.connect().unwrap();
    assert_eq!(session.settle(SETTLE).unwrap(), SessionState::Ready);
    session.poll();
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.is_connected());
    assert!(!session
        .events()
        .try_iter()
        .any(|e| matches!(e, SessionEvent::Fatal(_))));
}

#[test]
fn undrained_events_and_traces_stay_bounded() {
    let (mut session, _device) = connected(sample_device());
    for _ in 0..600 {
        session.launch_cycle().unwrap();
        assert_eq!(session.settle(SETTLE).unwrap(), SessionState::Ready);
    }

    assert_eq!(session.events().len(), EVENT_BACKLOG);
    assert_eq!(session.traces().len(), TRACE_BACKLOG);
    let last = session.events().try_iter().last();
    assert!(matches!(last, Some(SessionEvent::CycleCompleted(_))));
}

#[test]
fn discovery_retries_then_succeeds() {
    let (mut session, _device) = start(Device {
        hidden_for: 2,
        ..sample_device()
    });
    session.connect().unwrap();
    assert_eq!(session.settle(SETTLE).unwrap(), SessionState::Ready);

    let retries: Vec<u32> = session
        .events()
        .try_iter()
        .filter_map(|e| match e {
            SessionEvent::Retrying { attempt, .. } => Some(attempt),
            _ => None,
        })
        .collect();
    assert_eq!(retries, [1, 2]);
}

#[test]
fn discovery_gives_up_after_three_attempts() {
    let (mut session, _device) = start(Device {
        hidden_for: 3,
        ..sample_device()
    });
    session.connect().unwrap();
    assert_eq!(session.settle(SETTLE).unwrap(), SessionState::Initial);
    assert!(session
        .events()
        .try_iter()
        .any(|e| e == SessionEvent::Fatal(FatalReason::DeviceNotFound)));

    // A fresh connect starts over with a full retry budget.
    session.connect().unwrap();
    assert_eq!(session.settle(SETTLE).unwrap(), SessionState::Ready);
}

#[test]
fn corrupted_read_reconnects_and_recovers() {
    let (mut session, device) = start(sample_device());
    device
        .lock()
        .faults
        .push_back((Opcode::ReadCounters, Fault::BadChecksum));

    session.connect().unwrap();
    assert_eq!(session.settle(SETTLE).unwrap(), SessionState::Ready);
    assert_eq!(session.counters(), device.lock().counters);

    let events: Vec<_> = session.events().try_iter().collect();
    assert!(events.contains(&SessionEvent::Device(DeviceEvent::ReadCountersError(
        FailureKind::ChecksumMismatch
    ))));
    assert!(events.contains(&SessionEvent::Retrying { attempt: 1, max: 2 }));
}

#[test]
fn short_payload_is_a_read_failure() {
    let (sim, device) = Simulator::new(sample_device());
    let mut session =
        Session::with_transport(Box::new(sim), config().with_max_retries(0)).unwrap();
    device
        .lock()
        .faults
        .push_back((Opcode::ReadParameters, Fault::ShortPayload));

    session.connect().unwrap();
    assert_eq!(session.settle(SETTLE).unwrap(), SessionState::Initial);
    assert_eq!(session.parameters(), Parameters::default());

    let events: Vec<_> = session.events().try_iter().collect();
    assert!(events.contains(&SessionEvent::Device(DeviceEvent::ReadParametersError(
        FailureKind::PayloadLength
    ))));
    assert!(events.contains(&SessionEvent::Fatal(FatalReason::ParametersReadFailed)));
}

#[test]
fn failed_write_is_not_retried() {
    let (mut session, device) = connected(sample_device());
    device
        .lock()
        .faults
        .push_back((Opcode::WriteCounters, Fault::WrongOpcode));
    let sent_before = device.lock().received.len();

    session
        .write_counters(Counters {
            cycles: 1,
            time: 1,
        })
        .unwrap();
    assert_eq!(session.settle(SETTLE).unwrap(), SessionState::Ready);
    assert_eq!(device.lock().received.len(), sent_before + 1);
    assert!(session.events().try_iter().any(|e| e
        == SessionEvent::OperationFailed {
            operation: Operation::WriteCounters,
            kind: FailureKind::FrameValidation,
        }));

    // The failure closed the port; connect is allowed again from Ready.
    assert!(!session.is_connected());
    session.connect().unwrap();
    assert_eq!(session.settle(SETTLE).unwrap(), SessionState::Ready);
    assert!(session.is_connected());
}

#[test]
fn timeout_on_cycle_keeps_session_ready() {
    let (mut session, device) = connected(sample_device());
    device
        .lock()
        .faults
        .push_back((Opcode::SingleCycle, Fault::Timeout));

    session.launch_cycle().unwrap();
    assert_eq!(session.settle(SETTLE).unwrap(), SessionState::Ready);
    assert!(session.events().try_iter().any(|e| e
        == SessionEvent::OperationFailed {
            operation: Operation::LaunchCycle,
            kind: FailureKind::ExchangeTimeout,
        }));
}

#[test]
fn snapshots_readable_from_another_thread() {
    let (session, device) = connected(sample_device());
    let reader = session.reader();
    let expected = device.lock().counters;

    let seen = std::thread::spawn(move || (reader.counters(), reader.is_connected()))
        .join()
        .unwrap();
    assert_eq!(seen, (expected, true));
}

#[test]
fn shutdown_closes_the_port() {
    let (mut session, _device) = connected(sample_device());
    let reader = session.reader();
    session.shutdown();
    assert!(!reader.is_connected());
    assert!(matches!(
        session.launch_cycle(),
        Err(PumpError::WorkerStopped)
    ));
}
