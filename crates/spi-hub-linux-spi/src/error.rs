//! Error types for the Linux spidev transceiver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinuxSpiError {
    #[error("failed to open {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set SPI mode to {mode}: {source}")]
    SetModeFailed {
        mode: u8,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set bits per word to {bits}: {source}")]
    SetBitsPerWordFailed {
        bits: u8,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set clock speed to {speed} Hz: {source}")]
    SetSpeedFailed {
        speed: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("SPI transceive failed: {0}")]
    TransferFailed(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinuxSpiError>;
