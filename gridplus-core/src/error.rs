//! Error types for the Grid+ daemon

use thiserror::Error;

/// Core error type for Grid+ operations
#[derive(Error, Debug)]
pub enum GridError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serial port errors (open, write, read)
    #[error("Serial port error: {0}")]
    Serial(String),

    /// A per-call read deadline expired
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Unexpected bytes on the wire (bad reply prefix, wrong ack)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Thermal sensor enumeration or read errors
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Parsing errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Grid+ operations
pub type Result<T> = std::result::Result<T, GridError>;

impl From<toml::de::Error> for GridError {
    fn from(err: toml::de::Error) -> Self {
        GridError::Config(err.to_string())
    }
}

impl GridError {
    /// Whether the error is an expired read deadline rather than a hard
    /// failure. Probing reads (the handshake) treat timeouts as expected.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GridError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_distinguished_from_serial() {
        assert!(GridError::Timeout("read".to_string()).is_timeout());
        assert!(!GridError::Serial("read".to_string()).is_timeout());
    }

    #[test]
    fn display_includes_detail() {
        let err = GridError::Protocol("unexpected data".to_string());
        assert_eq!(err.to_string(), "Protocol error: unexpected data");
    }
}
