//! Interactive Console Example
//!
//! This example drives a pump controller from the terminal:
//! - Discovers the controller on any serial port (or the ones given)
//! - Shows the counters and parameters read from the device
//! - Writes counters or parameters and launches single cycles
//! - Prints the wire trace
//!
//! Usage:
//!   cargo run --example console                        # Scan every port
//!   cargo run --example console -- /dev/ttyUSB0        # Try only these ports
//!   cargo run --example console -- --config pump.json  # Load a JSON config
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=debug cargo run --example console

use inquire::{Confirm, CustomType, Select};
use log::{error, info};
use pump_protocol::constants::{CT_CONFIGURED, CT_ONBOARD_RESISTOR};
use pump_protocol::{
    format_seconds, Counters, Parameters, Result, Session, SessionConfig, SessionEvent,
    SessionState,
};
use std::time::Duration;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

fn load_config() -> Result<SessionConfig> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [flag, path] = args.as_slice() {
        if flag == "--config" {
            let text = std::fs::read_to_string(path)?;
            return SessionConfig::from_json_str(&text);
        }
    }
    Ok(SessionConfig::default().with_ports(args))
}

fn prompt<T>(message: &str, current: T) -> Result<T>
where
    T: Clone + std::str::FromStr + ToString,
{
    CustomType::<T>::new(message)
        .with_default(current)
        .with_error_message("Please type a valid number")
        .prompt()
        .map_err(cancelled)
}

fn cancelled(e: inquire::InquireError) -> pump_protocol::PumpError {
    std::io::Error::new(std::io::ErrorKind::Other, format!("Input cancelled: {}", e)).into()
}

fn edit_counters(current: Counters) -> Result<Counters> {
    Ok(Counters {
        cycles: prompt("Cycles:", current.cycles)?,
        time: prompt("Operating time (s):", current.time)?,
    })
}

fn edit_parameters(current: Parameters) -> Result<Parameters> {
    let onboard = Confirm::new("Take cycle time from the onboard resistor?")
        .with_default(current.ct == CT_ONBOARD_RESISTOR)
        .prompt()
        .map_err(cancelled)?;

    let mut next = Parameters {
        cpm: prompt("Motor current limit (mA):", current.cpm)?,
        tp: prompt("Pump test time (ms):", current.tp)?,
        tbc: prompt("Pause between cycles (ms):", current.tbc)?,
        tbtp: prompt("Time between pump tests (s):", current.tbtp)?,
        ct: if onboard { CT_ONBOARD_RESISTOR } else { CT_CONFIGURED },
        tw: current.tw,
    };
    if !onboard {
        next.tw = prompt("Cycle time (ms):", current.tw)?;
    }
    Ok(next)
}

fn print_status(session: &Session) {
    let snapshot = session.snapshot();
    info!("Cycles: {}", snapshot.counters.cycles);
    info!("Operating time: {}", format_seconds(snapshot.counters.time));
    match serde_json::to_string_pretty(&snapshot.parameters) {
        Ok(json) => info!("Parameters: {}", json),
        Err(e) => error!("Cannot format parameters: {}", e),
    }
}

fn report(session: &mut Session) -> Result<SessionState> {
    let state = session.settle(SETTLE_TIMEOUT)?;
    for line in session.traces().try_iter() {
        println!("{}", line);
    }
    for event in session.events().try_iter() {
        match event {
            SessionEvent::Retrying { attempt, max } => info!("Retrying ({}/{})...", attempt, max),
            SessionEvent::WriteSucceeded(op) => info!("{:?}: success", op),
            SessionEvent::CycleCompleted(values) => info!(
                "Cycle done. Pump current = {:.2} A, supply voltage = {:.2} V",
                values.amps(),
                values.volts()
            ),
            SessionEvent::OperationFailed { operation, kind } => {
                error!("{:?} failed: {:?}", operation, kind)
            }
            SessionEvent::Fatal(reason) => error!("Session stopped: {}", reason),
            _ => {}
        }
    }
    Ok(state)
}

fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG is not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut session = Session::new(load_config()?)?;

    loop {
        let options = match (session.state(), session.is_connected()) {
            (SessionState::Ready, true) => vec![
                "Refresh",
                "Launch single cycle",
                "Write parameters",
                "Write counters",
                "Quit",
            ],
            (SessionState::Ready, false) => vec!["Reconnect", "Quit"],
            _ => vec!["Connect", "Quit"],
        };
        let choice = Select::new("Action:", options)
            .prompt()
            .map_err(cancelled)?;

        let issued = match choice {
            "Connect" | "Reconnect" => session.connect(),
            "Refresh" => session.read_counters(),
            "Launch single cycle" => session.launch_cycle(),
            "Write parameters" => edit_parameters(session.parameters())
                .and_then(|p| session.write_parameters(p)),
            "Write counters" => {
                edit_counters(session.counters()).and_then(|c| session.write_counters(c))
            }
            _ => break,
        };
        if let Err(e) = issued {
            error!("{}", e);
            continue;
        }

        if report(&mut session)? == SessionState::Ready {
            print_status(&session);
        }
    }

    session.shutdown();
    Ok(())
}
