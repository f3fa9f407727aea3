//! Error types owned by the bus/device model crate.

use thiserror::Error;

/// Error surfaced by a [`crate::transceiver::SpiTransceiver`] implementation.
/// The concrete I/O failure lives behind `source`; the transceiver crate
/// (`spi-hub-linux-spi`) attaches its own richer error type there.
#[derive(Debug, Error)]
#[error("SPI transceive failed: {source}")]
pub struct TransceiverError {
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransceiverError {
    pub fn new(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }
}
