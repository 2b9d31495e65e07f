//! Daemon configuration
//!
//! Loaded from a TOML file; every field has a default so a missing or partial
//! file still yields a runnable configuration. Command-line flags override
//! individual fields at startup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{GridError, Result};
use crate::transfer::TransferFunction;

/// Default serial device path (stable udev name)
pub const DEFAULT_DEVICE: &str = "/dev/GridPlus0";

/// Default thermal sensor name
pub const DEFAULT_SENSOR: &str = "CPU Temperature";

/// Where log lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Human-readable stream on stderr
    Stderr,
    /// System log facility (journal-friendly stderr format)
    Syslog,
}

impl FromStr for LogTarget {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stderr" => Ok(LogTarget::Stderr),
            "syslog" => Ok(LogTarget::Syslog),
            other => Err(GridError::Config(format!("unknown logger '{other}'"))),
        }
    }
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogTarget::Stderr => write!(f, "stderr"),
            LogTarget::Syslog => write!(f, "syslog"),
        }
    }
}

/// Complete daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Serial device path of the fan controller
    pub device: String,
    /// Name of the thermal sensor to regulate against
    pub sensor: String,
    /// Log sink selection
    pub logger: LogTarget,
    /// Temperature-to-duty mapping
    pub transfer: TransferFunction,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            sensor: DEFAULT_SENSOR.to_string(),
            logger: LogTarget::Stderr,
            transfer: TransferFunction::default(),
        }
    }
}

impl DaemonConfig {
    /// Parse a configuration from TOML content.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GridError::Config(e.to_string()))
    }

    /// Check the configuration invariants.
    pub fn validate(&self) -> Result<()> {
        if self.device.is_empty() {
            return Err(GridError::Config("device path must not be empty".to_string()));
        }
        if self.sensor.is_empty() {
            return Err(GridError::Config("sensor name must not be empty".to_string()));
        }
        self.transfer.validate()
    }
}
