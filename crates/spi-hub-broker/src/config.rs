//! Trivial JSON configuration file: a typed mapping of `/etc/spi-hub.json`.
//!
//! Reading a missing file is not an error here — the orchestrator falls
//! back to enumerating `/dev/spi*` — but a present, malformed file is
//! fatal, so the two cases are distinct [`ConfigError`] variants.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use spi_hub_core::bus::IrqDescriptor;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/spi-hub.json";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub buses: Vec<BusConfig>,
}

#[derive(Debug, Deserialize)]
pub struct BusConfig {
    pub path: String,
    #[serde(default = "default_speed")]
    pub speed: u32,
    #[serde(rename = "irqPin", default)]
    pub irq_pin: Option<u32>,
    #[serde(rename = "irqActive", default = "default_irq_active")]
    pub irq_active: String,
}

fn default_speed() -> u32 {
    spi_hub_linux_spi::DEFAULT_SPEED_HZ
}

fn default_irq_active() -> String {
    "high".to_string()
}

impl BusConfig {
    /// The interrupt descriptor this bus config implies, if `irq_pin` is set.
    pub fn irq_descriptor(&self) -> Option<IrqDescriptor> {
        self.irq_pin.map(|pin| IrqDescriptor {
            pin,
            active_low: self.irq_active.eq_ignore_ascii_case("low"),
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Load `path` if it exists. Returns `Ok(None)` when the file is simply
/// absent (not fatal — the orchestrator falls back to device enumeration);
/// a present-but-malformed file is a [`ConfigError::Malformed`].
pub fn load(path: &Path) -> Result<Option<Config>, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source: e,
            })
        }
    };

    let config: Config = serde_json::from_str(&text).map_err(|e| ConfigError::Malformed {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(config))
}
