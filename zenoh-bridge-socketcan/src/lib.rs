//! Zenoh bridge for SocketCAN interfaces.
//!
//! This bridge connects a Linux SocketCAN device to Zenoh in both directions
//! and periodically publishes a diagnostic summary of the link health.
//!
//! # Key Expressions
//!
//! ```text
//! <key_prefix>/rx/<id>          - frames received from the bus (hex id)
//! <key_prefix>/tx/**            - frames to transmit on the bus
//! <key_prefix>/@/diagnostics    - periodic health summary
//! <key_prefix>/@/status         - bridge lifecycle status
//! ```
//!
//! Frame payloads are [`canbridge_common::FrameMessage`] values encoded as
//! JSON or CBOR; inbound payload format is auto-detected.

pub mod bridge;
pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod supervisor;

pub use bridge::{CanToZenoh, ZenohToCan};
pub use config::CanBridgeConfig;
pub use diagnostics::{DiagnosticSummary, DiagnosticsSink, Severity, ZenohDiagnostics};
pub use driver::ThreadedCanInterface;
pub use error::{BridgeError, Result};
pub use supervisor::{BridgeMonitor, Supervisor};
