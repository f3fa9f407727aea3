//! spi-hub-broker — arbitrates a single physical SPI bus between multiple
//! unprivileged local processes.
//!
//! Owns every `/dev/spi*` bus node the host exposes, polls the attached
//! daisy-chain of microcontrollers, and fans messages in and out over a
//! local stream socket. See `spi_hub_broker::orchestrator` for the startup
//! sequence and `spi_hub_broker::service` for the polling scheduler.

mod cli;

use clap::Parser;
use cli::Cli;
use spi_hub_broker::orchestrator;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.verbose {
        0 => {}
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let opts = cli.into_startup_options();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("spi-hub-broker: failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    let local = tokio::task::LocalSet::new();
    let result = local.block_on(&runtime, orchestrator::run(opts));

    if let Err(e) = result {
        log::error!("spi-hub-broker: {e}");
        std::process::exit(1);
    }
}
