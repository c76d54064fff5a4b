//! Unified error handling for homeagent
//!
//! This crate provides a single error type used across all homeagent components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using AgentError
pub type Result<T> = std::result::Result<T, AgentError>;

/// Unified error type for all homeagent operations
#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // GPIO Errors
    // ============================================================================
    #[error("Invalid pin: {0}")]
    InvalidPin(String),

    #[error("Failed to write GPIO pin {pin}: {reason}")]
    GpioWrite {
        pin: u8,
        reason: String,
    },

    #[error("Failed to read GPIO pin {pin}: {reason}")]
    GpioRead {
        pin: u8,
        reason: String,
    },

    // ============================================================================
    // Sensor Errors
    // ============================================================================
    /// The three causes (missing file, missing marker, bad number) are
    /// deliberately folded into one message.
    #[error("failed to read sensor temperature")]
    OneWireRead,

    #[error("Failed to read DHT sensor on pin {pin}: {reason}")]
    DhtRead {
        pin: u8,
        reason: String,
    },

    // ============================================================================
    // Smart Switch / HTTP Errors
    // ============================================================================
    #[error("HTTP transport error talking to {host}: {reason}")]
    Http {
        host: String,
        reason: String,
    },

    #[error("Unexpected response from {host}: {reason}")]
    BadResponse {
        host: String,
        reason: String,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },
}

impl AgentError {
    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid config error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an HTTP transport error
    pub fn http(host: impl Into<String>, reason: impl ToString) -> Self {
        Self::Http {
            host: host.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors raised before any bytes came back from a remote peer
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http { .. })
    }
}
