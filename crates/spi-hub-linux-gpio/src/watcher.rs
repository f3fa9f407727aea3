//! Edge-triggered interrupt wiring.
//!
//! A bus's optional interrupt pin is watched on a plain blocking thread —
//! not a tokio task — because `gpiocdev`'s edge-event read blocks the
//! calling thread on the underlying character device fd. The handler itself
//! does as little as possible: record "service needed" and
//! return. It never touches device queues directly; it only wakes the
//! service loop, which owns them.

use crate::error::{LinuxGpioError, Result};

use gpiocdev::line::EdgeDetection;
use gpiocdev::request::{Config, Request};

use std::thread::JoinHandle;

/// A running interrupt watcher. Dropping this does not stop the background
/// thread — the broker watches its bus interrupts for the process lifetime.
pub struct IrqWatcher {
    _handle: JoinHandle<()>,
}

impl IrqWatcher {
    /// Request `line` on `chip_path` for edge detection and spawn a thread
    /// that calls `on_interrupt` once per qualifying edge.
    ///
    /// Edge direction: rising unless `active_low`, in which
    /// case falling.
    pub fn spawn<F>(chip_path: &str, line: u32, active_low: bool, on_interrupt: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let edge = if active_low {
            EdgeDetection::FallingEdge
        } else {
            EdgeDetection::RisingEdge
        };

        let mut config = Config::default();
        config.with_line(line).with_edge_detection(edge);

        let request = Request::from_config(config)
            .on_chip(chip_path)
            .with_consumer("spi-hub")
            .request()
            .map_err(|source| LinuxGpioError::LineRequestFailed {
                path: chip_path.to_string(),
                line,
                source,
            })?;

        log::info!("spi-hub: watching irq on {chip_path} line {line} ({edge:?})");

        let chip_path = chip_path.to_string();
        let handle = std::thread::spawn(move || loop {
            match request.read_edge_event() {
                Ok(_event) => on_interrupt(),
                Err(source) => {
                    let err = LinuxGpioError::EdgeEventFailed(source);
                    log::error!("spi-hub: irq watcher on {chip_path} line {line} stopped: {err}");
                    break;
                }
            }
        });

        Ok(Self { _handle: handle })
    }
}
