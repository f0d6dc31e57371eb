//! Error types for the SocketCAN bridge.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The CAN device failed to open. Fatal at startup: no bridge is
    /// constructed and the process exits with a non-zero status.
    #[error("CAN device '{device}' unavailable: {source}")]
    DeviceUnavailable {
        device: String,
        #[source]
        source: std::io::Error,
    },

    /// A frame could not be mapped to the hardware representation.
    #[error("Invalid CAN frame: {0}")]
    Frame(String),

    /// Writing a frame to the bus failed.
    #[error("CAN write failed: {0}")]
    Write(#[source] std::io::Error),

    /// Zenoh session or publish error.
    #[error("Zenoh error: {0}")]
    Zenoh(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BridgeError {
    /// Create a frame-mapping error.
    pub fn frame(msg: impl Into<String>) -> Self {
        Self::Frame(msg.into())
    }
}

impl From<zenoh::Error> for BridgeError {
    fn from(err: zenoh::Error) -> Self {
        Self::Zenoh(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
