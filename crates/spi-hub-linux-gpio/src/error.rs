//! Error types for GPIO interrupt wiring.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinuxGpioError {
    #[error("failed to request GPIO line {line} on '{path}': {source}")]
    LineRequestFailed {
        path: String,
        line: u32,
        #[source]
        source: gpiocdev::Error,
    },

    #[error("failed to read edge event: {0}")]
    EdgeEventFailed(#[source] gpiocdev::Error),
}

pub type Result<T> = std::result::Result<T, LinuxGpioError>;
