//! Linux spidev transceiver implementation.
//!
//! Opens a `/dev/spidevX.Y` character device and performs one
//! `SPI_IOC_MESSAGE` ioctl per exchange, with a single transfer whose
//! `tx_buf` and `rx_buf` point at the same buffer — a true full-duplex
//! shift rather than the write-then-read pair a half-duplex flash
//! programmer would use.

use crate::error::{LinuxSpiError, Result};

use spi_hub_core::error::TransceiverError;
use spi_hub_core::transceiver::SpiTransceiver;

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;

/// Default SPI clock speed in Hz.
pub const DEFAULT_SPEED_HZ: u32 = 1_000_000;

mod ioctl {
    use nix::ioctl_write_ptr;

    const SPI_IOC_MAGIC: u8 = b'k';
    const SPI_IOC_TYPE_MODE: u8 = 1;
    const SPI_IOC_TYPE_BITS_PER_WORD: u8 = 3;
    const SPI_IOC_TYPE_MAX_SPEED_HZ: u8 = 4;

    ioctl_write_ptr!(spi_ioc_wr_mode, SPI_IOC_MAGIC, SPI_IOC_TYPE_MODE, u8);
    ioctl_write_ptr!(
        spi_ioc_wr_bits_per_word,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_BITS_PER_WORD,
        u8
    );
    ioctl_write_ptr!(
        spi_ioc_wr_max_speed_hz,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_MAX_SPEED_HZ,
        u32
    );

    /// Size of `struct spi_ioc_transfer` on 64-bit systems.
    pub const SPI_IOC_TRANSFER_SIZE: usize = 32;

    /// `SPI_IOC_MESSAGE(n) = _IOW(SPI_IOC_MAGIC, 0, char[n * sizeof(struct spi_ioc_transfer)])`.
    pub fn spi_ioc_message(n: u8) -> libc::c_ulong {
        let size = (n as usize) * SPI_IOC_TRANSFER_SIZE;
        ((1u32 << 30) | ((size as u32) << 16) | ((SPI_IOC_MAGIC as u32) << 8)) as libc::c_ulong
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone)]
struct SpiIocTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    word_delay_usecs: u8,
    _pad: u8,
}

/// A Linux spidev-backed SPI transceiver for one bus.
pub struct LinuxSpi {
    file: File,
    speed_hz: u32,
}

impl LinuxSpi {
    /// Open `path` and configure it at `speed_hz` / mode 0, 8 bits per word.
    pub fn open(path: &str, speed_hz: u32) -> Result<Self> {
        log::debug!("spi-hub: opening bus device {path}");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| LinuxSpiError::OpenFailed {
                path: path.to_string(),
                source: e,
            })?;
        let fd = file.as_raw_fd();

        let mode: u8 = 0;
        unsafe {
            ioctl::spi_ioc_wr_mode(fd, &mode).map_err(|e| LinuxSpiError::SetModeFailed {
                mode,
                source: std::io::Error::from_raw_os_error(e as i32),
            })?;
        }

        let bits: u8 = 8;
        unsafe {
            ioctl::spi_ioc_wr_bits_per_word(fd, &bits).map_err(|e| {
                LinuxSpiError::SetBitsPerWordFailed {
                    bits,
                    source: std::io::Error::from_raw_os_error(e as i32),
                }
            })?;
        }

        unsafe {
            ioctl::spi_ioc_wr_max_speed_hz(fd, &speed_hz).map_err(|e| {
                LinuxSpiError::SetSpeedFailed {
                    speed: speed_hz,
                    source: std::io::Error::from_raw_os_error(e as i32),
                }
            })?;
        }

        log::info!("spi-hub: opened {path} at {} kHz", speed_hz / 1000);

        Ok(Self { file, speed_hz })
    }

    fn full_duplex_transfer(&mut self, buf: &mut [u8]) -> Result<()> {
        let fd = self.file.as_raw_fd();

        let transfer = SpiIocTransfer {
            tx_buf: buf.as_ptr() as u64,
            rx_buf: buf.as_mut_ptr() as u64,
            len: buf.len() as u32,
            speed_hz: self.speed_hz,
            delay_usecs: 0,
            bits_per_word: 8,
            cs_change: 0,
            tx_nbits: 0,
            rx_nbits: 0,
            word_delay_usecs: 0,
            _pad: 0,
        };

        let ioctl_num = ioctl::spi_ioc_message(1);
        let ret = unsafe { libc::ioctl(fd, ioctl_num, &transfer as *const SpiIocTransfer) };
        if ret < 0 {
            return Err(LinuxSpiError::TransferFailed(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl SpiTransceiver for LinuxSpi {
    fn transceive(&mut self, buf: &mut [u8]) -> std::result::Result<(), TransceiverError> {
        self.full_duplex_transfer(buf).map_err(TransceiverError::new)
    }
}
