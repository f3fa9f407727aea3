//! I²C EEPROM identity read: serial number and access code.
//!
//! Deliberately thin — this is an input the device-list frame embeds, not
//! something the broker interprets — but it is a real ioctl-driven read of
//! `/dev/i2c-N`, not a stub.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;

use thiserror::Error;

const I2C_SLAVE: libc::c_ulong = 0x0703;

/// EEPROM register offset where the serial number starts.
const SERIAL_NUMBER_OFFSET: u8 = 0x00;
const SERIAL_NUMBER_LEN: usize = 16;
/// EEPROM register offset where the access code starts.
const ACCESS_CODE_OFFSET: u8 = 0x10;
const ACCESS_CODE_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub serial_number: String,
    pub access_code: String,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to select i2c address 0x{addr:02x} on {path}: {source}")]
    SelectAddress {
        path: String,
        addr: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("i2c read/write on {path} failed: {source}")]
    Transfer {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn read_at(path: &str, addr: u16, offset: u8, len: usize) -> Result<Vec<u8>, IdentityError> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| IdentityError::Open {
            path: path.to_string(),
            source,
        })?;

    let fd = file.as_raw_fd();
    let ret = unsafe { libc::ioctl(fd, I2C_SLAVE, addr as libc::c_ulong) };
    if ret < 0 {
        return Err(IdentityError::SelectAddress {
            path: path.to_string(),
            addr,
            source: std::io::Error::last_os_error(),
        });
    }

    file.write_all(&[offset]).map_err(|source| IdentityError::Transfer {
        path: path.to_string(),
        source,
    })?;

    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).map_err(|source| IdentityError::Transfer {
        path: path.to_string(),
        source,
    })?;
    Ok(buf)
}

/// Read the serial number and access code from the EEPROM at `path`
/// (typically `/dev/i2c-1`) address `addr`. Both values are returned as
/// hex strings; failure aborts startup.
pub fn read_serial_number_and_access_code(path: &str, addr: u16) -> Result<IdentityRecord, IdentityError> {
    let serial_bytes = read_at(path, addr, SERIAL_NUMBER_OFFSET, SERIAL_NUMBER_LEN)?;
    let access_bytes = read_at(path, addr, ACCESS_CODE_OFFSET, ACCESS_CODE_LEN)?;
    Ok(IdentityRecord {
        serial_number: hex(&serial_bytes),
        access_code: hex(&access_bytes),
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_encodes_bytes_lowercase() {
        assert_eq!(hex(&[0x0a, 0xff, 0x00]), "0aff00");
    }

    #[test]
    fn missing_device_is_an_open_error() {
        let err = read_serial_number_and_access_code("/dev/i2c-nonexistent", 0x50).unwrap_err();
        assert!(matches!(err, IdentityError::Open { .. }));
    }
}
