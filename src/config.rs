//! Session and transport configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::*;
use crate::error::{PumpError, Result};

/// Tunables for the serial link and the session.
///
/// Everything defaults to the controller's fixed protocol settings, so an
/// empty JSON object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Ports to try, in order. Empty means enumerate every available port.
    pub ports: Vec<String>,
    pub baud_rate: u32,
    pub write_timeout_ms: u64,
    pub reply_timeout_ms: u64,
    pub max_retries: u32,
    /// Delay before each outcome is handled; zero disables pacing.
    pub pace_delay_ms: u64,
    pub health_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            ports: Vec::new(),
            baud_rate: BAUD_RATE,
            write_timeout_ms: WRITE_TIMEOUT_MS,
            reply_timeout_ms: REPLY_TIMEOUT_MS,
            max_retries: MAX_RETRIES,
            pace_delay_ms: PACE_DELAY_MS,
            health_interval_ms: HEALTH_INTERVAL_MS,
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: SessionConfig =
            serde_json::from_str(text).map_err(|e| PumpError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(PumpError::Config("baud_rate must be non-zero".to_string()));
        }
        if self.write_timeout_ms == 0 || self.reply_timeout_ms == 0 {
            return Err(PumpError::Config("timeouts must be non-zero".to_string()));
        }
        if self.health_interval_ms == 0 {
            return Err(PumpError::Config(
                "health_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Only try these ports, in order, instead of enumerating.
    pub fn with_ports(mut self, ports: Vec<String>) -> Self {
        self.ports = ports;
        self
    }

    /// Delay applied before each outcome is handled
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace_delay_ms = pace.as_millis() as u64;
        self
    }

    /// Reconnect attempts allowed after a failed read
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// How often an idle port is probed
    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Write timeout as a `Duration`
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Reply timeout as a `Duration`
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Pacing delay as a `Duration`
    pub fn pace_delay(&self) -> Duration {
        Duration::from_millis(self.pace_delay_ms)
    }

    /// Health probe interval as a `Duration`
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_defaults() {
        let config = SessionConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.reply_timeout(), Duration::from_millis(2000));
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn explicit_ports() {
        let config =
            SessionConfig::from_json_str(r#"{"ports": ["/dev/ttyUSB0"], "pace_delay_ms": 0}"#)
                .unwrap();
        assert_eq!(config.ports, ["/dev/ttyUSB0"]);
        assert_eq!(config.pace_delay(), Duration::ZERO);
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = SessionConfig::from_json_str(r#"{"reply_timeout_ms": 0}"#).unwrap_err();
        assert!(matches!(err, PumpError::Config(_)));
    }

    #[test]
    fn malformed_json_rejected() {
        assert!(matches!(
            SessionConfig::from_json_str("{ports"),
            Err(PumpError::Config(_))
        ));
    }
}
