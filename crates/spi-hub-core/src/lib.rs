//! Bus and device model for the SPI hub broker.
//!
//! Holds the in-memory shape the service loop operates on — buses, their
//! ordered device chains, per-device transmit queues — without knowing
//! anything about the transport (that's `spi-hub-linux-spi`) or the
//! scheduling algorithm that drives it (that's `spi-hub-broker::service`).

pub mod bus;
pub mod chain;
pub mod device;
pub mod error;
pub mod queue;
pub mod transceiver;

pub use bus::{Bus, IrqDescriptor};
pub use chain::{DeclaredDevice, DECLARED_CHAIN};
pub use device::Device;
pub use error::TransceiverError;
pub use queue::{DeviceQueue, QueueEntry};
pub use transceiver::SpiTransceiver;
