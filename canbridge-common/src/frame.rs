use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum payload length of a classic CAN data frame.
pub const MAX_FRAME_DATA_LEN: usize = 8;

/// A CAN frame as carried over the messaging bus.
///
/// This is the bus-neutral representation published and consumed by the
/// bridges; it deliberately carries no SocketCAN-specific types so that
/// subscribers on other platforms can decode it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMessage {
    /// Unix epoch milliseconds when the frame was observed.
    pub timestamp: i64,

    /// CAN identifier (11-bit standard or 29-bit extended).
    pub id: u32,

    /// Whether the identifier is a 29-bit extended id.
    #[serde(default)]
    pub extended: bool,

    /// Remote transmission request frame (no payload on the wire).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rtr: bool,

    /// Error frame reported by the controller.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error_frame: bool,

    /// Frame payload (0..=8 bytes for classic CAN).
    #[serde(default)]
    pub data: Vec<u8>,
}

impl FrameMessage {
    /// Create a standard-id data frame with the current timestamp.
    pub fn new(id: u32, data: Vec<u8>) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            id,
            extended: false,
            rtr: false,
            error_frame: false,
            data,
        }
    }

    /// Create an extended-id data frame with the current timestamp.
    pub fn new_extended(id: u32, data: Vec<u8>) -> Self {
        Self {
            extended: true,
            ..Self::new(id, data)
        }
    }

    /// Mark this frame as a remote transmission request.
    pub fn with_rtr(mut self) -> Self {
        self.rtr = true;
        self
    }

    /// Whether the payload length is valid for a classic CAN data frame.
    pub fn is_valid_data_len(&self) -> bool {
        self.data.len() <= MAX_FRAME_DATA_LEN
    }

    /// Whether the identifier fits the addressing mode.
    ///
    /// Standard ids are 11 bits, extended ids 29 bits.
    pub fn is_valid_id(&self) -> bool {
        if self.extended {
            self.id <= 0x1FFF_FFFF
        } else {
            self.id <= 0x7FF
        }
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch (should never happen in practice).
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
