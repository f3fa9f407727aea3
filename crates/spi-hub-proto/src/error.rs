//! Decode error types shared by the SPI wire frame and the IPC frame codecs.

use thiserror::Error;

/// Errors that can occur while decoding a buffer exchanged over the SPI bus.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum SpiFrameError {
    /// The buffer is shorter than the fixed header it claims to carry.
    #[error("buffer too short to hold a frame header")]
    MsgTooShort,
    /// The declared payload length runs past the end of the buffer.
    #[error("declared payload length exceeds the bytes available")]
    MessageTruncated,
    /// The command byte is neither a known request nor response command.
    #[error("unrecognized command byte {0:#04x}")]
    InvalidCommand(u8),
}

/// Errors that can occur while decoding an IPC frame from a connected client.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum IpcFrameError {
    /// Fewer bytes than the 2-byte `{version, command}` header.
    #[error("IPC frame shorter than the header")]
    MsgTooShort,
    /// `version` field was not 2.
    #[error("unsupported IPC protocol version {0}")]
    UnsupportedVersion(u8),
    /// `command` field was not one this direction understands.
    #[error("unexpected IPC command byte {0:#04x}")]
    UnexpectedCommand(u8),
    /// The declared sub-record count runs past the end of the buffer.
    #[error("messages-to-devices frame truncated while reading sub-record {0}")]
    Truncated(u16),
    /// A sub-record's preamble byte did not match the expected `0xA3`.
    #[error("sub-record {0} has a bad preamble byte {1:#04x}")]
    BadPreamble(u16, u8),
}
