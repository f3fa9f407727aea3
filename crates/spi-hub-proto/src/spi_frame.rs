//! Codec for the full-duplex buffer exchanged on the SPI wire.
//!
//! A single buffer carries two asymmetric frames at once: the host's
//! request is shifted out starting at byte 0 while the device's
//! previously-staged response is shifted in on the same clocks. Callers
//! build a [`RequestFrame`], `encode` it against an expected response
//! length to get the buffer to exchange, then `decode` a [`ResponseFrame`]
//! out of whatever came back on the same buffer.

use crate::error::SpiFrameError;

/// Fixed header length of a request frame, before the payload.
pub const REQUEST_HEADER_LEN: usize = 6;
/// Fixed header length of a response frame, before the payload. Byte 0 is
/// the bus turnaround slot and is not part of the header fields below it.
pub const RESPONSE_HEADER_LEN: usize = 9;
/// Response length advertised by a device that has never answered yet.
pub const DEFAULT_RESPONSE_LEN: u16 = 40;

/// The `command` field of a request frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCommand {
    /// No message to deliver; this is a pure selection/poll transaction.
    None,
    /// Deliver `payload` to the target device.
    MessageToDevice,
}

impl RequestCommand {
    fn to_byte(self) -> u8 {
        match self {
            RequestCommand::None => 0,
            RequestCommand::MessageToDevice => 1,
        }
    }

    fn from_byte(b: u8) -> Result<Self, SpiFrameError> {
        match b {
            0 => Ok(RequestCommand::None),
            1 => Ok(RequestCommand::MessageToDevice),
            other => Err(SpiFrameError::InvalidCommand(other)),
        }
    }
}

/// The `command` field of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCommand {
    /// The device has nothing to say this transaction.
    None,
    /// `payload` carries an unsolicited message from the device.
    MessageFromDevice,
}

impl ResponseCommand {
    fn to_byte(self) -> u8 {
        match self {
            ResponseCommand::None => 0,
            ResponseCommand::MessageFromDevice => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self, SpiFrameError> {
        match b {
            0 => Ok(ResponseCommand::None),
            2 => Ok(ResponseCommand::MessageFromDevice),
            other => Err(SpiFrameError::InvalidCommand(other)),
        }
    }
}

/// A request the bus service loop writes into the low end of the shared
/// transceive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    /// Device this transaction addresses; 0 means selection-only.
    pub target_device_id: u8,
    /// Device that should prime a response for the *next* transaction.
    pub next_device_id: u8,
    pub command: RequestCommand,
    pub channel_id: u8,
    pub payload: Vec<u8>,
}

impl RequestFrame {
    /// Bytes the host must write for this request, not counting any
    /// trailing padding needed to cover the expected response.
    pub fn tx_required(&self) -> usize {
        REQUEST_HEADER_LEN + self.payload.len()
    }

    /// Encode this request into a full-duplex buffer sized to cover both
    /// the request itself and `expected_response_len` bytes of response
    /// (0 meaning "no response length advertised yet").
    pub fn encode(&self, expected_response_len: u16) -> Vec<u8> {
        let tx_required = self.tx_required();
        let rx_required = if expected_response_len > 0 {
            RESPONSE_HEADER_LEN + expected_response_len as usize
        } else {
            0
        };
        let mut buf = vec![0u8; tx_required.max(rx_required)];

        buf[0] = self.target_device_id;
        buf[1] = self.next_device_id;
        buf[2] = self.command.to_byte();
        buf[3] = self.channel_id;
        buf[4..6].copy_from_slice(&(self.payload.len() as u16).to_le_bytes());
        buf[6..6 + self.payload.len()].copy_from_slice(&self.payload);

        buf
    }

    /// Decode a request back out of a buffer written by [`encode`]. Used by
    /// property tests to round-trip requests; the live service loop never
    /// needs to decode its own requests.
    pub fn decode(buf: &[u8]) -> Result<Self, SpiFrameError> {
        if buf.len() < REQUEST_HEADER_LEN {
            return Err(SpiFrameError::MsgTooShort);
        }
        let payload_len = u16::from_le_bytes([buf[4], buf[5]]) as usize;
        let payload_end = REQUEST_HEADER_LEN + payload_len;
        if buf.len() < payload_end {
            return Err(SpiFrameError::MessageTruncated);
        }
        Ok(RequestFrame {
            target_device_id: buf[0],
            next_device_id: buf[1],
            command: RequestCommand::from_byte(buf[2])?,
            channel_id: buf[3],
            payload: buf[REQUEST_HEADER_LEN..payload_end].to_vec(),
        })
    }
}

/// A response decoded out of the high end of a full-duplex buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Device that produced this response.
    pub device_id: u8,
    /// Number of messages still queued on the device.
    pub queued_count: u8,
    /// Response length the device advertises for its *next* frame.
    pub next_msg_len: u16,
    pub command: ResponseCommand,
    pub channel_id: u8,
    /// Present only when the declared payload length is non-zero.
    pub payload: Option<Vec<u8>>,
}

impl ResponseFrame {
    /// Decode a response out of the buffer read back from the bus. Byte 0
    /// (the turnaround slot) is ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, SpiFrameError> {
        if buf.len() < RESPONSE_HEADER_LEN {
            return Err(SpiFrameError::MsgTooShort);
        }
        let payload_len = u16::from_le_bytes([buf[7], buf[8]]) as usize;
        let payload_end = RESPONSE_HEADER_LEN + payload_len;
        if buf.len() < payload_end {
            return Err(SpiFrameError::MessageTruncated);
        }
        let payload = if payload_len == 0 {
            None
        } else {
            Some(buf[RESPONSE_HEADER_LEN..payload_end].to_vec())
        };
        Ok(ResponseFrame {
            device_id: buf[1],
            queued_count: buf[2],
            next_msg_len: u16::from_le_bytes([buf[3], buf[4]]),
            command: ResponseCommand::from_byte(buf[5])?,
            channel_id: buf[6],
            payload,
        })
    }

    /// Encode a synthetic response, for tests that stage a fake device
    /// answer into the rx half of a transceive buffer. `buf` is zero-filled
    /// and resized to at least [`RESPONSE_HEADER_LEN`] plus the payload.
    pub fn encode_into(&self, buf: &mut [u8]) {
        let payload = self.payload.as_deref().unwrap_or(&[]);
        buf[1] = self.device_id;
        buf[2] = self.queued_count;
        buf[3..5].copy_from_slice(&self.next_msg_len.to_le_bytes());
        buf[5] = self.command.to_byte();
        buf[6] = self.channel_id;
        buf[7..9].copy_from_slice(&(payload.len() as u16).to_le_bytes());
        buf[9..9 + payload.len()].copy_from_slice(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_encode_decode() {
        let req = RequestFrame {
            target_device_id: 1,
            next_device_id: 2,
            command: RequestCommand::MessageToDevice,
            channel_id: 4,
            payload: b"hello".to_vec(),
        };
        let buf = req.encode(0);
        assert_eq!(buf.len(), req.tx_required());
        let decoded = RequestFrame::decode(&buf).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn request_buffer_is_padded_to_cover_expected_response() {
        let req = RequestFrame {
            target_device_id: 1,
            next_device_id: 2,
            command: RequestCommand::None,
            channel_id: 0,
            payload: vec![],
        };
        let buf = req.encode(40);
        assert_eq!(buf.len(), RESPONSE_HEADER_LEN + 40);
    }

    #[test]
    fn response_round_trips_through_encode_into_decode() {
        let resp = ResponseFrame {
            device_id: 3,
            queued_count: 0,
            next_msg_len: 40,
            command: ResponseCommand::MessageFromDevice,
            channel_id: 7,
            payload: Some(b"world".to_vec()),
        };
        let mut buf = vec![0u8; RESPONSE_HEADER_LEN + 5];
        resp.encode_into(&mut buf);
        let decoded = ResponseFrame::decode(&buf).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn response_with_zero_payload_decodes_to_none() {
        let resp = ResponseFrame {
            device_id: 1,
            queued_count: 0,
            next_msg_len: 40,
            command: ResponseCommand::None,
            channel_id: 0,
            payload: None,
        };
        let mut buf = vec![0u8; RESPONSE_HEADER_LEN];
        resp.encode_into(&mut buf);
        let decoded = ResponseFrame::decode(&buf).unwrap();
        assert_eq!(decoded.payload, None);
    }

    #[test]
    fn short_buffer_is_msg_too_short() {
        let buf = [0u8; 4];
        assert_eq!(ResponseFrame::decode(&buf), Err(SpiFrameError::MsgTooShort));
        assert_eq!(RequestFrame::decode(&buf), Err(SpiFrameError::MsgTooShort));
    }

    #[test]
    fn declared_payload_longer_than_buffer_is_truncated() {
        let mut buf = vec![0u8; RESPONSE_HEADER_LEN];
        buf[7..9].copy_from_slice(&100u16.to_le_bytes());
        assert_eq!(
            ResponseFrame::decode(&buf),
            Err(SpiFrameError::MessageTruncated)
        );
    }

    #[test]
    fn invalid_command_byte_is_rejected() {
        let mut buf = vec![0u8; RESPONSE_HEADER_LEN];
        buf[5] = 9;
        assert_eq!(
            ResponseFrame::decode(&buf),
            Err(SpiFrameError::InvalidCommand(9))
        );
    }
}
