//! Service loop, IPC server, and startup orchestration for the SPI hub
//! broker.
//!
//! `spi-hub-core` and `spi-hub-proto` hold the data model and the wire
//! codecs respectively; this crate is where they get driven — the bus
//! service loop, the IPC server that feeds it, and the orchestrator that
//! brings both up at startup.

pub mod broker;
pub mod config;
pub mod error;
pub mod identity;
pub mod ipc;
pub mod orchestrator;
pub mod service;

pub use broker::Broker;
pub use error::BrokerError;
pub use orchestrator::StartupOptions;
