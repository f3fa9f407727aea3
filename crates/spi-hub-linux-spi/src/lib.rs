//! Linux spidev transceiver backend.
//!
//! Implements `spi_hub_core::SpiTransceiver` against `/dev/spidevX.Y`
//! character devices via the standard `spi_ioc_transfer` ioctl. The
//! transfer is a single full-duplex exchange whose `tx_buf` and `rx_buf`
//! point at the same in-place buffer, matching the shared wire buffer used
//! for a daisy-chain transaction.

pub mod device;
pub mod error;

pub use device::{LinuxSpi, DEFAULT_SPEED_HZ};
pub use error::{LinuxSpiError, Result};
