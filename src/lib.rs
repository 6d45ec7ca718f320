//! # Pump Protocol Library
//!
//! A Rust library for driving a pump cycle controller over its serial link.
//! The controller speaks a small ASCII-hex protocol: every frame carries a
//! two-digit opcode, a little-endian body and a CRC-8, and every request is
//! answered by exactly one reply.
//!
//! ## Features
//!
//! - Port discovery by handshake (115200-8-N-1)
//! - Read and write the lifetime counters and operating parameters
//! - Launch a single cycle and read back the measured supply voltage and current
//! - A session state machine with bounded reconnect-and-retry on read failures
//! - All port I/O on a worker thread; snapshots readable from any thread
//! - A wire trace for diagnostics
//!
//! ## Example
//!
//! ```no_run
//! use pump_protocol::{Session, SessionConfig, SessionState};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = Session::new(SessionConfig::default())?;
//!     session.connect()?;
//!     if session.settle(Duration::from_secs(30))? == SessionState::Ready {
//!         println!("Cycles: {}", session.counters().cycles);
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod frame;
pub mod session;
pub mod trace;
pub mod transport;
pub mod types;
mod worker;

pub use codec::Payload;
pub use config::SessionConfig;
pub use error::{FailureKind, PumpError, Result};
pub use session::{Session, SnapshotReader};
pub use trace::{Direction, TraceLine, Tracer};
pub use transport::{SerialTransport, Transport};
pub use types::*;
