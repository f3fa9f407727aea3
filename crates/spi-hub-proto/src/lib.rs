//! Wire framing for the SPI hub broker.
//!
//! This crate has no knowledge of buses, devices, or queues — it only
//! encodes and decodes the two byte-level protocols the broker speaks:
//!
//! - [`spi_frame`]: the asymmetric request/response buffer shared on the
//!   SPI wire itself.
//! - [`ipc_frame`]: the version-2 protocol carried over the broker's local
//!   socket (`spi-hub-broker::ipc` supplies the length-delimited transport
//!   framing around these bytes).

pub mod error;
pub mod ipc_frame;
pub mod spi_frame;

pub use error::{IpcFrameError, SpiFrameError};
