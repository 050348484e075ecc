// pmnode Agent - Host-side control loop for pmnode
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Startup errors
//!
//! Only failures before the control loop starts are fatal. Once running,
//! every fault is handled inside the loop.

use pmnode::ConfigError;
use thiserror::Error;

/// Result type alias for agent startup
pub type Result<T> = std::result::Result<T, AgentError>;

/// Fatal agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    /// Node configuration rejected
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Serial port could not be opened
    #[error("Serial port {path}: {source}")]
    Serial {
        path: String,
        #[source]
        source: serialport::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: AgentError = ConfigError::Missing("broker.host").into();
        assert!(err.to_string().contains("broker.host"));
    }

    #[test]
    fn test_serial_error_names_port() {
        let err = AgentError::Serial {
            path: "/dev/ttyUSB0".to_string(),
            source: serialport::Error::new(serialport::ErrorKind::NoDevice, "gone"),
        };
        assert!(err.to_string().starts_with("Serial port /dev/ttyUSB0"));
    }
}
