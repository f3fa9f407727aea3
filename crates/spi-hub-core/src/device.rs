//! A single device on a bus's daisy chain.

use spi_hub_proto::ipc_frame::DeviceInfo;
use spi_hub_proto::spi_frame::DEFAULT_RESPONSE_LEN;

use crate::queue::DeviceQueue;

/// One device in a bus's declared chain.
#[derive(Debug)]
pub struct Device {
    /// 1..N, unique within the owning bus. 0 is reserved on the wire for
    /// "broadcast / no specific target" and is never a device's own id.
    pub id: u8,
    pub info: DeviceInfo,
    pub queue: DeviceQueue,
    /// The response length this device last advertised for its next frame.
    /// `None` until the device has answered at least once.
    pub next_msg_len: Option<u16>,
}

impl Device {
    pub fn new(id: u8, info: DeviceInfo) -> Self {
        Self {
            id,
            info,
            queue: DeviceQueue::new(),
            next_msg_len: None,
        }
    }

    /// Response length to advertise for the next transaction addressed to
    /// this device: its last-known value, or the default before it has
    /// ever answered.
    pub fn expected_response_len(&self) -> u16 {
        self.next_msg_len.unwrap_or(DEFAULT_RESPONSE_LEN)
    }
}
