//! The two unidirectional bridges.
//!
//! [`CanToZenoh`] republishes frames received from the bus; [`ZenohToCan`]
//! transmits frames published by other Zenoh participants. Each bridge runs
//! as its own task from the moment it is started and exposes the counter and
//! connection-error flag the supervisor samples on every health-check tick.
//! Stopping a bridge aborts its task and waits for it to terminate, so once
//! `stop` resolves the bridge holds nothing against the hardware interface.
//! Dropping a bridge without stopping it still requests the abort.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use zenoh::Session;
use zenoh::handlers::FifoChannelHandler;
use zenoh::pubsub::Subscriber;
use zenoh::sample::Sample;

use canbridge_common::frame::FrameMessage;
use canbridge_common::serialization::{Format, decode_auto, encode};

use crate::driver::ThreadedCanInterface;
use crate::error::{BridgeError, Result};
use crate::supervisor::BridgeMonitor;

/// Bus-to-messaging bridge: publishes received CAN frames to Zenoh.
///
/// Frames go to `{key_prefix}/rx/{id:08X}`.
pub struct CanToZenoh {
    read_count: Arc<AtomicU64>,
    local_error: Arc<AtomicBool>,
    hardware_error: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl CanToZenoh {
    /// Start the bridge against the given hardware interface.
    pub fn start(
        session: Arc<Session>,
        key_prefix: &str,
        driver: &Arc<ThreadedCanInterface>,
        format: Format,
    ) -> Self {
        let read_count = Arc::new(AtomicU64::new(0));
        let local_error = Arc::new(AtomicBool::new(false));
        let hardware_error = driver.error_flag();
        let frames = driver.frames();
        let prefix = key_prefix.to_string();

        let task = tokio::spawn(run_can_to_zenoh(
            session,
            prefix,
            frames,
            format,
            read_count.clone(),
            local_error.clone(),
        ));

        Self {
            read_count,
            local_error,
            hardware_error,
            task: Some(task),
        }
    }
}

impl BridgeMonitor for CanToZenoh {
    fn frame_count(&self) -> u64 {
        self.read_count.load(Ordering::Relaxed)
    }

    fn connection_error(&self) -> bool {
        self.local_error.load(Ordering::Relaxed) || self.hardware_error.load(Ordering::Relaxed)
    }

    async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for CanToZenoh {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

async fn run_can_to_zenoh(
    session: Arc<Session>,
    prefix: String,
    mut frames: broadcast::Receiver<FrameMessage>,
    format: Format,
    read_count: Arc<AtomicU64>,
    error_flag: Arc<AtomicBool>,
) {
    loop {
        match frames.recv().await {
            Ok(frame) => {
                read_count.fetch_add(1, Ordering::Relaxed);

                let key = format!("{}/rx/{:08X}", prefix, frame.id);
                match encode(&frame, format) {
                    Ok(payload) => {
                        if let Err(e) = session.put(&key, payload).await {
                            tracing::warn!(key = %key, error = %e, "Failed to publish frame");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode frame");
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Frame consumer lagging, frames dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                error_flag.store(true, Ordering::Relaxed);
                break;
            }
        }
    }
}

/// Messaging-to-bus bridge: transmits Zenoh-published frames on the CAN bus.
///
/// Subscribes to `{key_prefix}/tx/**` and accepts JSON or CBOR payloads.
pub struct ZenohToCan {
    write_count: Arc<AtomicU64>,
    local_error: Arc<AtomicBool>,
    hardware_error: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl ZenohToCan {
    /// Declare the subscriber and start the bridge.
    ///
    /// Declaration happens before the task is spawned so that a broken
    /// session surfaces at startup rather than silently inside the worker.
    pub async fn start(
        session: Arc<Session>,
        key_prefix: &str,
        driver: Arc<ThreadedCanInterface>,
    ) -> Result<Self> {
        let selector = format!("{}/tx/**", key_prefix);
        let subscriber = session
            .declare_subscriber(&selector)
            .await
            .map_err(BridgeError::from)?;

        tracing::info!(selector = %selector, "Subscribed for frames to transmit");

        let write_count = Arc::new(AtomicU64::new(0));
        let local_error = Arc::new(AtomicBool::new(false));
        let hardware_error = driver.error_flag();

        let task = tokio::spawn(run_zenoh_to_can(
            subscriber,
            driver,
            write_count.clone(),
            local_error.clone(),
        ));

        Ok(Self {
            write_count,
            local_error,
            hardware_error,
            task: Some(task),
        })
    }
}

impl BridgeMonitor for ZenohToCan {
    fn frame_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    fn connection_error(&self) -> bool {
        self.local_error.load(Ordering::Relaxed) || self.hardware_error.load(Ordering::Relaxed)
    }

    async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for ZenohToCan {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

async fn run_zenoh_to_can(
    subscriber: Subscriber<FifoChannelHandler<Sample>>,
    driver: Arc<ThreadedCanInterface>,
    write_count: Arc<AtomicU64>,
    error_flag: Arc<AtomicBool>,
) {
    loop {
        match subscriber.recv_async().await {
            Ok(sample) => {
                let payload = sample.payload().to_bytes();
                match decode_auto::<FrameMessage>(&payload) {
                    Ok(frame) => match driver.send(&frame) {
                        Ok(()) => {
                            write_count.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(BridgeError::Frame(reason)) => {
                            // Malformed frames from remote publishers are not
                            // a hardware fault.
                            tracing::warn!(
                                key = %sample.key_expr(),
                                reason = %reason,
                                "Dropping invalid frame"
                            );
                        }
                        Err(e) => {
                            error_flag.store(true, Ordering::Relaxed);
                            tracing::warn!(
                                key = %sample.key_expr(),
                                error = %e,
                                "Failed to write frame to CAN"
                            );
                        }
                    },
                    Err(e) => {
                        tracing::warn!(
                            key = %sample.key_expr(),
                            error = %e,
                            "Failed to decode frame message"
                        );
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Subscriber channel closed");
                error_flag.store(true, Ordering::Relaxed);
                break;
            }
        }
    }
}
