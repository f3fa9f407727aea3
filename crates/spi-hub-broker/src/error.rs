//! Top-level error surface returned by the orchestrator's startup steps.

use thiserror::Error;

use crate::config::ConfigError;
use crate::identity::IdentityError;
use spi_hub_core::error::TransceiverError;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open bus {path}: {source}")]
    BusOpen {
        path: String,
        #[source]
        source: TransceiverError,
    },

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("failed to bind IPC socket at {path}: {source}")]
    IpcBind {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no bus devices found: pass a bus path, configure /etc/spi-hub.json, or ensure /dev/spi* exists")]
    NoBusesFound,

    #[error("service loop re-entered more than {0} times in one invocation; aborting")]
    RunawayService(u32),
}
