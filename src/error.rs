// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for pmnode
//!
//! Every fallible step inside the node reports one of these. The public
//! operations of the connectivity manager, the frame decoder and the throttle
//! turn them into a log record and a `false`/`None` result, so nothing here
//! ever escapes the control loop.

use thiserror::Error;

/// Result type alias for pmnode operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Main error type for pmnode operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    /// Sensor framing error
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Link or session transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Payload serialization error
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    /// GPS sentence error
    #[error("Sentence error: {0}")]
    Sentence(#[from] SentenceError),
}

/// Errors while validating a sensor frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough bytes accumulated for a complete frame
    #[error("Buffer too short: need at least {needed} bytes, got {available}")]
    BufferTooShort { needed: usize, available: usize },

    /// Header bytes do not match the sensor magic
    #[error("Invalid header: {found:02x?}")]
    InvalidHeader { found: [u8; 3] },

    /// Bytes do not sum to zero
    #[error("Invalid checksum: expected 0, got {sum}")]
    InvalidChecksum { sum: u8 },

    /// Frame buffer filled up before a frame was completed
    #[error("Frame buffer overflow at {capacity} bytes")]
    Overflow { capacity: usize },
}

/// Errors while parsing a GPS sentence
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SentenceError {
    /// Checksum in the sentence does not match its content
    #[error("Checksum mismatch: sentence says {expected:02X}, computed {actual:02X}")]
    Checksum { expected: u8, actual: u8 },

    /// Sentence is structurally broken
    #[error("Malformed sentence: {0}")]
    Malformed(&'static str),

    /// Sentence type carries no position
    #[error("Unsupported sentence type: {0}")]
    Unsupported(String),
}

/// Errors from the link layer or the pub/sub session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Link layer is not up
    #[error("Link down")]
    LinkDown,

    /// Link layer join failed
    #[error("Link join failed: {0}")]
    LinkJoin(String),

    /// Broker refused or never answered the session handshake
    #[error("Session refused: {0}")]
    SessionRefused(String),

    /// Operation needs an established session
    #[error("Session not connected")]
    NotConnected,

    /// Write did not complete in time
    #[error("Write timeout after {timeout_ms}ms")]
    WriteTimeout { timeout_ms: u64 },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors in the node configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required value is missing
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    /// Value is present but unusable
    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors while building a published payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Number cannot be represented in JSON
    #[error("Non-finite value for {field}")]
    NonFinite { field: &'static str },

    /// Serializer failure
    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for PayloadError {
    fn from(err: serde_json::Error) -> Self {
        PayloadError::Json(err.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                TransportError::WriteTimeout { timeout_ms: 0 }
            }
            _ => TransportError::Io(err.to_string()),
        }
    }
}
