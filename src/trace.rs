//! Human-readable wire trace.

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which way a trace line travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Out,
    In,
    Info,
}

/// One line of the diagnostic trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceLine {
    pub at: DateTime<Utc>,
    pub direction: Direction,
    pub text: String,
}

impl fmt::Display for TraceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.text.trim_end_matches(['\r', '\n']);
        match self.direction {
            Direction::Out => write!(f, "out > {}", text),
            Direction::In => write!(f, "in  < {}", text),
            Direction::Info => f.write_str(text),
        }
    }
}

/// Cloneable trace sink.
///
/// Every line is mirrored to `log::debug!`. Lines are dropped silently when
/// the channel is full or nobody listens on it.
#[derive(Debug, Clone, Default)]
pub struct Tracer {
    tx: Option<Sender<TraceLine>>,
}

impl Tracer {
    /// A tracer that logs and forwards to `tx`.
    pub fn new(tx: Sender<TraceLine>) -> Self {
        Tracer { tx: Some(tx) }
    }

    /// A tracer that only logs.
    pub fn silent() -> Self {
        Tracer { tx: None }
    }

    fn emit(&self, direction: Direction, text: String) {
        let line = TraceLine {
            at: Utc::now(),
            direction,
            text,
        };
        log::debug!("{}", line);
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(line);
        }
    }

    /// Record a frame sent to the device.
    pub fn out(&self, raw: &[u8]) {
        self.emit(Direction::Out, String::from_utf8_lossy(raw).into_owned());
    }

    /// Record bytes received from the device.
    pub fn incoming(&self, raw: &[u8]) {
        self.emit(Direction::In, String::from_utf8_lossy(raw).into_owned());
    }

    /// Record a free-form note.
    pub fn info(&self, text: impl Into<String>) {
        self.emit(Direction::Info, text.into());
    }
}
