//! GPIO interrupt wiring for the SPI hub broker.
//!
//! Requests a line on a `gpiocdev` character device and watches it for
//! edges, calling back into the broker on each one.

pub mod error;
pub mod watcher;

pub use error::{LinuxGpioError, Result};
pub use watcher::IrqWatcher;
