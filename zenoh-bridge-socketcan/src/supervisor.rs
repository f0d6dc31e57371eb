//! Bridge supervisor.
//!
//! The supervisor owns the two bridges for the lifetime of the process, runs
//! the periodic health-check cycle over their counters and error flags, and
//! governs the teardown order on shutdown: both bridge workers are stopped
//! and awaited strictly before the hardware interface is shut down.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::diagnostics::{DiagnosticSummary, DiagnosticsSink};

/// Counter and error-flag surface a bridge exposes to the supervisor.
///
/// Both calls must be non-blocking snapshot reads: the health-check tick
/// never waits on bridge internals, it reports whatever was last observed.
pub trait BridgeMonitor {
    /// Cumulative number of frames this bridge has moved. Monotonically
    /// non-decreasing.
    fn frame_count(&self) -> u64;

    /// Whether this bridge has observed a connection error.
    fn connection_error(&self) -> bool;

    /// Stop the bridge and wait for its worker to terminate.
    ///
    /// After this resolves the bridge performs no further activity against
    /// the hardware interface or the session.
    fn stop(self) -> impl Future<Output = ()> + Send;
}

/// Supervisor state: the two bridges plus the sticky connection flag.
///
/// `connected` starts `true` and transitions to `false` the first time either
/// bridge reports an error; it never transitions back within one process run,
/// even if the bridge's flag later clears.
pub struct Supervisor<O, I> {
    outbound: O,
    inbound: I,
    connected: bool,
}

impl<O: BridgeMonitor, I: BridgeMonitor> Supervisor<O, I> {
    /// Take ownership of the two bridges. Initial state is connected.
    pub fn new(outbound: O, inbound: I) -> Self {
        Self {
            outbound,
            inbound,
            connected: true,
        }
    }

    /// Current sticky connection state.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Run one health-check tick.
    ///
    /// The two counters are independent snapshots, not an atomic pair; one
    /// may reflect a slightly later instant than the other.
    pub fn tick(&mut self) -> DiagnosticSummary {
        let writes = self.outbound.frame_count();
        let reads = self.inbound.frame_count();

        if self.outbound.connection_error() || self.inbound.connection_error() {
            if self.connected {
                tracing::error!("CAN connection lost");
            }
            self.connected = false;
        }

        DiagnosticSummary::new(writes, reads, self.connected)
    }

    /// Run the health-check cycle until `shutdown` resolves.
    ///
    /// Ticks fire every `period`, starting one period after entry. Sink
    /// failures are logged and never abort the loop. When the shutdown
    /// future resolves the loop exits with no tick in flight; missed ticks
    /// are not retried. Returns the supervisor so the caller can drive the
    /// ordered teardown.
    pub async fn run<S, F>(mut self, period: Duration, sink: S, shutdown: F) -> Self
    where
        S: DiagnosticsSink,
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    let summary = self.tick();
                    if let Err(e) = sink.publish(&summary).await {
                        tracing::warn!(error = %e, "Failed to publish diagnostics");
                    }
                }
            }
        }

        self
    }

    /// Stop both bridges, then release the hardware.
    ///
    /// Each bridge is stopped and awaited until its worker has terminated;
    /// only then is `release_hardware` invoked, so no bridge can touch the
    /// hardware interface once its shutdown begins. The caller passes the
    /// hardware shutdown there and guarantees it runs exactly once.
    pub async fn shutdown(self, release_hardware: impl FnOnce()) {
        let Self {
            outbound, inbound, ..
        } = self;

        outbound.stop().await;
        inbound.stop().await;

        release_hardware();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DISCONNECTED_MESSAGE, Severity};
    use crate::error::BridgeError;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    /// Monitor backed by shared atomics the test mutates between ticks.
    #[derive(Clone, Default)]
    struct SharedMonitor {
        count: Arc<AtomicU64>,
        error: Arc<AtomicBool>,
    }

    impl SharedMonitor {
        fn set(&self, count: u64, error: bool) {
            self.count.store(count, Ordering::Relaxed);
            self.error.store(error, Ordering::Relaxed);
        }
    }

    impl BridgeMonitor for SharedMonitor {
        fn frame_count(&self) -> u64 {
            self.count.load(Ordering::Relaxed)
        }

        fn connection_error(&self) -> bool {
            self.error.load(Ordering::Relaxed)
        }

        async fn stop(self) {}
    }

    #[test]
    fn test_initial_tick_is_ok() {
        let outbound = SharedMonitor::default();
        let inbound = SharedMonitor::default();
        let mut supervisor = Supervisor::new(outbound, inbound);

        let summary = supervisor.tick();

        assert_eq!(summary.writes_observed, 0);
        assert_eq!(summary.reads_observed, 0);
        assert!(summary.connected);
        assert_eq!(summary.severity, Severity::Ok);
    }

    #[test]
    fn test_counter_snapshots_in_order() {
        let outbound = SharedMonitor::default();
        let inbound = SharedMonitor::default();
        let mut supervisor = Supervisor::new(outbound.clone(), inbound.clone());

        let writes = [0u64, 3, 3, 7];
        let reads = [0u64, 1, 4, 4];

        for (w, r) in writes.iter().zip(reads.iter()) {
            outbound.set(*w, false);
            inbound.set(*r, false);

            let summary = supervisor.tick();
            assert_eq!(summary.writes_observed, *w);
            assert_eq!(summary.reads_observed, *r);
        }
    }

    #[test]
    fn test_disconnect_is_sticky() {
        let outbound = SharedMonitor::default();
        let inbound = SharedMonitor::default();
        let mut supervisor = Supervisor::new(outbound.clone(), inbound.clone());

        assert!(supervisor.tick().connected);

        // Inbound reports an error for a single tick
        inbound.set(0, true);
        let summary = supervisor.tick();
        assert!(!summary.connected);
        assert_eq!(summary.severity, Severity::Error);
        assert_eq!(summary.message, DISCONNECTED_MESSAGE);

        // Flag clears, but the state must never revert
        inbound.set(0, false);
        for _ in 0..3 {
            let summary = supervisor.tick();
            assert!(!summary.connected);
            assert_eq!(summary.severity, Severity::Error);
        }
        assert!(!supervisor.is_connected());
    }

    #[test]
    fn test_scenario_error_flag_transient() {
        let outbound = SharedMonitor::default();
        let inbound = SharedMonitor::default();
        let mut supervisor = Supervisor::new(outbound.clone(), inbound.clone());

        // t=1s: both counters zero, state OK
        let summary = supervisor.tick();
        assert_eq!(summary.writes_observed, 0);
        assert_eq!(summary.reads_observed, 0);
        assert_eq!(summary.severity, Severity::Ok);

        // t=2s: write count 5, read count 2, outbound error raised
        outbound.set(5, true);
        inbound.set(2, false);
        let summary = supervisor.tick();
        assert_eq!(summary.writes_observed, 5);
        assert_eq!(summary.reads_observed, 2);
        assert_eq!(summary.severity, Severity::Error);
        assert_eq!(summary.message, DISCONNECTED_MESSAGE);

        // t=3s: error flag cleared, summary must still report the fault
        outbound.set(5, false);
        let summary = supervisor.tick();
        assert_eq!(summary.severity, Severity::Error);
    }

    /// Monitor whose reads take a while before returning.
    struct SlowMonitor {
        count: u64,
        delay: Duration,
    }

    impl BridgeMonitor for SlowMonitor {
        fn frame_count(&self) -> u64 {
            std::thread::sleep(self.delay);
            self.count
        }

        fn connection_error(&self) -> bool {
            false
        }

        async fn stop(self) {}
    }

    #[test]
    fn test_tick_completes_with_slow_monitor() {
        let outbound = SlowMonitor {
            count: 9,
            delay: Duration::from_millis(50),
        };
        let inbound = SlowMonitor {
            count: 4,
            delay: Duration::from_millis(50),
        };
        let mut supervisor = Supervisor::new(outbound, inbound);

        let summary = supervisor.tick();
        assert_eq!(summary.writes_observed, 9);
        assert_eq!(summary.reads_observed, 4);
        assert!(summary.connected);
    }

    /// Monitor that records its own drop, for teardown-order checks.
    struct DropRecorder {
        label: &'static str,
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    impl BridgeMonitor for DropRecorder {
        fn frame_count(&self) -> u64 {
            0
        }

        fn connection_error(&self) -> bool {
            false
        }

        async fn stop(self) {}
    }

    impl Drop for DropRecorder {
        fn drop(&mut self) {
            self.events.lock().unwrap().push(self.label);
        }
    }

    #[tokio::test]
    async fn test_shutdown_releases_bridges_before_hardware() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let supervisor = Supervisor::new(
            DropRecorder {
                label: "outbound released",
                events: events.clone(),
            },
            DropRecorder {
                label: "inbound released",
                events: events.clone(),
            },
        );

        let hw_events = events.clone();
        supervisor
            .shutdown(move || {
                hw_events.lock().unwrap().push("hardware shutdown");
            })
            .await;

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                "outbound released",
                "inbound released",
                "hardware shutdown"
            ]
        );
    }

    /// Guard dropped when the worker task's future is torn down.
    struct TaskGuard {
        label: &'static str,
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Drop for TaskGuard {
        fn drop(&mut self) {
            self.events.lock().unwrap().push(self.label);
        }
    }

    /// Monitor backed by a real worker task, stopped the way the bridges
    /// stop theirs: abort, then await the join handle.
    struct TaskMonitor {
        task: Option<tokio::task::JoinHandle<()>>,
    }

    impl TaskMonitor {
        fn spawn(label: &'static str, events: &Arc<Mutex<Vec<&'static str>>>) -> Self {
            let guard = TaskGuard {
                label,
                events: events.clone(),
            };
            let task = tokio::spawn(async move {
                let _guard = guard;
                std::future::pending::<()>().await;
            });
            Self { task: Some(task) }
        }
    }

    impl BridgeMonitor for TaskMonitor {
        fn frame_count(&self) -> u64 {
            0
        }

        fn connection_error(&self) -> bool {
            false
        }

        async fn stop(mut self) {
            if let Some(task) = self.task.take() {
                task.abort();
                let _ = task.await;
            }
        }
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_worker_tasks() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let supervisor = Supervisor::new(
            TaskMonitor::spawn("outbound task ended", &events),
            TaskMonitor::spawn("inbound task ended", &events),
        );

        let hw_events = events.clone();
        supervisor
            .shutdown(move || {
                hw_events.lock().unwrap().push("hardware shutdown");
            })
            .await;

        // Both workers must have fully terminated before the hardware
        // release ran.
        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                "outbound task ended",
                "inbound task ended",
                "hardware shutdown"
            ]
        );
    }

    /// Sink that records every summary it is handed.
    #[derive(Clone, Default)]
    struct RecordingSink {
        summaries: Arc<Mutex<Vec<DiagnosticSummary>>>,
    }

    impl DiagnosticsSink for RecordingSink {
        async fn publish(&self, summary: &DiagnosticSummary) -> crate::error::Result<()> {
            self.summaries.lock().unwrap().push(summary.clone());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_each_period() {
        let outbound = SharedMonitor::default();
        let inbound = SharedMonitor::default();
        let supervisor = Supervisor::new(outbound.clone(), inbound.clone());

        let sink = RecordingSink::default();
        let summaries = sink.summaries.clone();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(supervisor.run(Duration::from_secs(1), sink, async {
            let _ = stop_rx.await;
        }));

        outbound.set(5, false);
        inbound.set(2, false);
        tokio::time::sleep(Duration::from_millis(3500)).await;

        stop_tx.send(()).unwrap();
        let supervisor = handle.await.unwrap();

        let summaries = summaries.lock().unwrap();
        assert_eq!(summaries.len(), 3);
        assert!(summaries.iter().all(|s| s.writes_observed == 5));
        assert!(summaries.iter().all(|s| s.reads_observed == 2));
        assert!(supervisor.is_connected());
    }

    /// Sink that always fails.
    #[derive(Clone, Default)]
    struct FailingSink {
        attempts: Arc<AtomicU64>,
    }

    impl DiagnosticsSink for FailingSink {
        async fn publish(&self, _summary: &DiagnosticSummary) -> crate::error::Result<()> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            Err(BridgeError::Zenoh("sink down".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_does_not_stop_the_loop() {
        let supervisor = Supervisor::new(SharedMonitor::default(), SharedMonitor::default());

        let sink = FailingSink::default();
        let attempts = sink.attempts.clone();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(supervisor.run(Duration::from_secs(1), sink, async {
            let _ = stop_rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(2500)).await;

        stop_tx.send(()).unwrap();
        let supervisor = handle.await.unwrap();

        assert_eq!(attempts.load(Ordering::Relaxed), 2);
        assert!(supervisor.is_connected());
    }
}
