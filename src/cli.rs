//! CLI argument parsing: kept thin, still `clap`-driven.

use std::path::PathBuf;

use clap::Parser;

use spi_hub_broker::orchestrator::{DEFAULT_I2C_ADDR, DEFAULT_I2C_PATH, DEFAULT_SOCKET_PATH};

/// `broker [bus_path …]` — see `orchestrator::resolve_buses` for the full startup resolution
/// order (positional args, then `--config`, then `/dev/spi*` enumeration).
#[derive(Parser)]
#[command(name = "spi-hub-broker")]
#[command(author, version, about = "SPI daisy-chain broker", long_about = None)]
pub struct Cli {
    /// Bus device nodes to open, overriding both the config file and
    /// `/dev/spi*` enumeration. Zero arguments falls back to those.
    pub bus_paths: Vec<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to the JSON config file consulted when no bus paths are given
    /// on the command line.
    #[arg(long, default_value = spi_hub_broker::config::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Local stream socket path clients connect to.
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    pub socket: String,

    /// I²C device node the identity EEPROM is read from.
    #[arg(long, default_value = DEFAULT_I2C_PATH)]
    pub i2c_path: String,

    /// I²C address of the identity EEPROM.
    #[arg(long, default_value_t = DEFAULT_I2C_ADDR, value_parser = parse_i2c_addr)]
    pub i2c_addr: u16,
}

fn parse_i2c_addr(s: &str) -> Result<u16, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse::<u16>().map_err(|e| e.to_string())
    }
}

impl Cli {
    pub fn into_startup_options(self) -> spi_hub_broker::orchestrator::StartupOptions {
        spi_hub_broker::orchestrator::StartupOptions {
            bus_paths: self.bus_paths,
            config_path: self.config,
            socket_path: self.socket,
            i2c_path: self.i2c_path,
            i2c_addr: self.i2c_addr,
        }
    }
}
