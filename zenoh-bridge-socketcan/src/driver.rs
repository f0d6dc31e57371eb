//! Threaded SocketCAN hardware interface.
//!
//! [`ThreadedCanInterface`] owns the SocketCAN sockets and a background
//! reader thread that services the physical bus. Received frames are fanned
//! out through a broadcast channel; writes go through [`ThreadedCanInterface::send`].
//! The interface is shared between the two bridges behind an `Arc`, and the
//! supervisor teardown path calls [`ThreadedCanInterface::shutdown`] exactly
//! once, after the bridges have been released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use socketcan::{
    CanFrame, CanRemoteFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket, SocketOptions,
    StandardId,
};
use tokio::sync::broadcast;

use canbridge_common::frame::{FrameMessage, current_timestamp_millis};

use crate::error::{BridgeError, Result};

/// Capacity of the received-frame fan-out channel.
const FRAME_CHANNEL_CAPACITY: usize = 1024;

/// Default read timeout for the reader thread.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// CAN hardware interface backed by a background reader thread.
#[derive(Debug)]
pub struct ThreadedCanInterface {
    device: String,
    tx_socket: Mutex<CanSocket>,
    frame_tx: broadcast::Sender<FrameMessage>,
    stop: Arc<AtomicBool>,
    connection_error: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadedCanInterface {
    /// Open the named SocketCAN device and start the reader thread.
    ///
    /// `settings` is the opaque map from the configuration source. The
    /// interface applies the keys it recognizes (`read_timeout_ms`) and
    /// ignores the rest.
    ///
    /// Failure to open the device is fatal to the caller: no bridge may be
    /// constructed against a handle that never existed.
    pub fn open(
        device: &str,
        loopback: bool,
        settings: &HashMap<String, serde_json::Value>,
    ) -> Result<Self> {
        let read_timeout = read_timeout_from(settings);
        for key in settings.keys() {
            if key != "read_timeout_ms" {
                tracing::debug!(key = %key, "Ignoring unrecognized CAN setting");
            }
        }

        let open_err = |e: std::io::Error| BridgeError::DeviceUnavailable {
            device: device.to_string(),
            source: e,
        };

        let tx_socket = CanSocket::open(device).map_err(open_err)?;
        tx_socket.set_loopback(loopback).map_err(open_err)?;

        let rx_socket = CanSocket::open(device).map_err(open_err)?;

        let (frame_tx, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let connection_error = Arc::new(AtomicBool::new(false));

        let reader = {
            let frames = frame_tx.clone();
            let stop = stop.clone();
            let error_flag = connection_error.clone();
            let device = device.to_string();
            std::thread::Builder::new()
                .name(format!("can-reader-{device}"))
                .spawn(move || {
                    reader_loop(&device, &rx_socket, read_timeout, &frames, &stop, &error_flag)
                })
                .map_err(open_err)?
        };

        Ok(Self {
            device: device.to_string(),
            tx_socket: Mutex::new(tx_socket),
            frame_tx,
            stop,
            connection_error,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// The device name this interface is bound to.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Subscribe to frames received from the bus.
    pub fn frames(&self) -> broadcast::Receiver<FrameMessage> {
        self.frame_tx.subscribe()
    }

    /// Transmit a frame on the bus.
    pub fn send(&self, message: &FrameMessage) -> Result<()> {
        let frame = message_to_frame(message)?;
        let socket = self.tx_socket.lock().unwrap();
        socket.write_frame(&frame).map_err(|e| {
            self.connection_error.store(true, Ordering::Relaxed);
            BridgeError::Write(e)
        })
    }

    /// Whether the hardware connection has failed.
    pub fn connection_error(&self) -> bool {
        self.connection_error.load(Ordering::Relaxed)
    }

    /// Shared error flag, cloned into the bridge monitors.
    pub(crate) fn error_flag(&self) -> Arc<AtomicBool> {
        self.connection_error.clone()
    }

    /// Stop the reader thread and release the bus.
    ///
    /// Safe as the last action before process exit. The supervisor guarantees
    /// this is called once, after both bridges have been dropped.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.lock().unwrap().take() {
            if handle.join().is_err() {
                tracing::warn!(device = %self.device, "CAN reader thread panicked");
            }
            tracing::info!(device = %self.device, "CAN interface shut down");
        }
    }
}

/// Extract the reader timeout from the opaque settings map.
fn read_timeout_from(settings: &HashMap<String, serde_json::Value>) -> Duration {
    settings
        .get("read_timeout_ms")
        .and_then(|v| v.as_u64())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_READ_TIMEOUT)
}

/// Blocking read loop run on the background thread.
///
/// The read timeout bounds how long shutdown waits for the thread to notice
/// the stop flag.
fn reader_loop(
    device: &str,
    socket: &CanSocket,
    read_timeout: Duration,
    frames: &broadcast::Sender<FrameMessage>,
    stop: &AtomicBool,
    error_flag: &AtomicBool,
) {
    tracing::debug!(device = %device, "CAN reader thread started");

    while !stop.load(Ordering::Relaxed) {
        match socket.read_frame_timeout(read_timeout) {
            Ok(frame) => {
                // No receivers yet is not an error; the frame is simply dropped.
                let _ = frames.send(frame_to_message(&frame));
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                tracing::error!(device = %device, error = %e, "CAN read failed, stopping reader");
                error_flag.store(true, Ordering::Relaxed);
                break;
            }
        }
    }

    tracing::debug!(device = %device, "CAN reader thread stopped");
}

/// Convert a hardware frame into the bus-neutral message form.
pub(crate) fn frame_to_message(frame: &CanFrame) -> FrameMessage {
    let (id, extended) = match frame.id() {
        Id::Standard(id) => (u32::from(id.as_raw()), false),
        Id::Extended(id) => (id.as_raw(), true),
    };

    FrameMessage {
        timestamp: current_timestamp_millis(),
        id,
        extended,
        rtr: frame.is_remote_frame(),
        error_frame: matches!(frame, CanFrame::Error(_)),
        data: frame.data().to_vec(),
    }
}

/// Convert a bus-neutral message into a hardware frame.
pub(crate) fn message_to_frame(message: &FrameMessage) -> Result<CanFrame> {
    if !message.is_valid_data_len() {
        return Err(BridgeError::frame(format!(
            "payload of {} bytes exceeds classic CAN limit",
            message.data.len()
        )));
    }

    let id: Id = if message.extended {
        ExtendedId::new(message.id)
            .ok_or_else(|| {
                BridgeError::frame(format!("extended id {:#x} out of range", message.id))
            })?
            .into()
    } else {
        u16::try_from(message.id)
            .ok()
            .and_then(StandardId::new)
            .ok_or_else(|| {
                BridgeError::frame(format!("standard id {:#x} out of range", message.id))
            })?
            .into()
    };

    if message.rtr {
        CanRemoteFrame::new_remote(id, message.data.len())
            .map(CanFrame::from)
            .ok_or_else(|| BridgeError::frame("invalid remote frame"))
    } else {
        CanFrame::new(id, &message.data)
            .ok_or_else(|| BridgeError::frame("invalid data frame"))
    }
}
