//! Diagnostic summaries published on every health-check tick.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zenoh::Session;

use crate::error::{BridgeError, Result};

/// Message carried by summaries once the CAN connection has failed.
pub const DISCONNECTED_MESSAGE: &str = "CAN disconnected";

/// Severity of a diagnostic summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Error,
}

/// One health-check tick's view of the bridge.
///
/// The counters are cumulative totals sampled from the bridges at tick time,
/// not per-tick deltas; consumers that want rates must difference successive
/// summaries themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticSummary {
    /// Unix epoch milliseconds when the tick ran.
    pub timestamp: i64,
    /// Total frames written to the bus so far.
    pub writes_observed: u64,
    /// Total frames read from the bus so far.
    pub reads_observed: u64,
    /// Sticky connection state; never recovers within one process run.
    pub connected: bool,
    /// Overall severity.
    pub severity: Severity,
    /// Human-readable status message.
    pub message: String,
}

impl DiagnosticSummary {
    /// Build a summary from the tick's snapshot values.
    pub fn new(writes_observed: u64, reads_observed: u64, connected: bool) -> Self {
        let (severity, message) = if connected {
            (Severity::Ok, "OK")
        } else {
            (Severity::Error, DISCONNECTED_MESSAGE)
        };

        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            writes_observed,
            reads_observed,
            connected,
            severity,
            message: message.to_string(),
        }
    }
}

/// Sink the supervisor publishes summaries to, once per tick.
///
/// A failing sink must not abort the health-check loop; the supervisor logs
/// the error and carries on.
pub trait DiagnosticsSink {
    fn publish(&self, summary: &DiagnosticSummary) -> impl Future<Output = Result<()>> + Send;
}

/// Zenoh-backed diagnostics sink.
///
/// Publishes JSON summaries to `{key_prefix}/@/diagnostics`.
pub struct ZenohDiagnostics {
    session: Arc<Session>,
    key: String,
}

impl ZenohDiagnostics {
    /// Create a sink publishing under the given key prefix.
    pub fn new(session: Arc<Session>, key_prefix: &str) -> Self {
        Self {
            session,
            key: format!("{key_prefix}/@/diagnostics"),
        }
    }

    /// The full key expression summaries are published to.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl DiagnosticsSink for ZenohDiagnostics {
    async fn publish(&self, summary: &DiagnosticSummary) -> Result<()> {
        let payload = serde_json::to_vec(summary)?;
        self.session
            .put(&self.key, payload)
            .await
            .map_err(BridgeError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_connected() {
        let summary = DiagnosticSummary::new(5, 2, true);

        assert_eq!(summary.writes_observed, 5);
        assert_eq!(summary.reads_observed, 2);
        assert!(summary.connected);
        assert_eq!(summary.severity, Severity::Ok);
        assert_eq!(summary.message, "OK");
        assert!(summary.timestamp > 0);
    }

    #[test]
    fn test_summary_disconnected() {
        let summary = DiagnosticSummary::new(0, 0, false);

        assert_eq!(summary.severity, Severity::Error);
        assert_eq!(summary.message, DISCONNECTED_MESSAGE);
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        let summary = DiagnosticSummary::new(1, 1, true);
        let json = serde_json::to_string(&summary).unwrap();

        assert!(json.contains("\"severity\":\"ok\""));
        assert!(json.contains("\"writes_observed\":1"));
    }
}
