//! The trait a bus's SPI transceiver implements.
//!
//! Draws a seam between the chip-command layer and the hardware backend:
//! this crate never opens a device node or issues an ioctl, it only calls
//! through this trait. The real implementation lives in
//! `spi-hub-linux-spi`; tests use an in-memory fake that implements the
//! same trait instead of a real device.

use crate::error::TransceiverError;

/// A full-duplex, fixed-length exchange on one SPI bus.
///
/// `buf` is written by the caller before the call and is overwritten
/// in place with whatever was shifted in on the same clocks — there is no
/// separate read buffer; a daisy-chain transaction carries both the
/// host's request and the previous transaction's staged response in the
/// same bytes.
pub trait SpiTransceiver: Send {
    fn transceive(&mut self, buf: &mut [u8]) -> Result<(), TransceiverError>;
}
