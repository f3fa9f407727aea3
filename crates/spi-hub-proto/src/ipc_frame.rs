//! Codec for the IPC protocol exchanged over the broker's local socket
//! (protocol version 2).
//!
//! Transport-level framing (turning a byte stream into discrete messages)
//! is not this module's concern — see [`spi_hub_proto`][crate] crate docs
//! and `spi-hub-broker::ipc` for the `tokio_util` length-delimited codec
//! that supplies it. This module only encodes and decodes the bytes of one
//! already-delimited frame.

use serde::{Deserialize, Serialize};

use crate::error::IpcFrameError;

/// Only protocol version this broker speaks.
pub const IPC_VERSION: u8 = 2;
/// Validation byte at the start of every inbound sub-record.
pub const PREAMBLE: u8 = 0xA3;

/// IPC command bytes (second byte of every frame header).
pub mod command {
    /// Client → broker: a batch of messages addressed to devices.
    pub const MESSAGES_TO_DEVICES: u8 = 1;
    /// Broker → client: one unsolicited message from a device.
    pub const MESSAGE_FROM_DEVICE: u8 = 2;
    /// Broker → client: the bootstrap device-list document.
    pub const DEVICES_LIST: u8 = 100;
}

/// The `{version, command}` header common to every IPC frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcHeader {
    pub version: u8,
    pub command: u8,
}

impl IpcHeader {
    fn decode(buf: &[u8]) -> Result<Self, IpcFrameError> {
        if buf.len() < 2 {
            return Err(IpcFrameError::MsgTooShort);
        }
        Ok(IpcHeader {
            version: buf[0],
            command: buf[1],
        })
    }
}

/// One parsed sub-record of an inbound "messages to devices" frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSubRecord {
    pub bus_id: u8,
    pub device_id: u8,
    pub channel_id: u8,
    pub dedupe_id: u16,
    pub payload: Vec<u8>,
}

const SUB_RECORD_HEADER_LEN: usize = 8; // preamble + bus + device + channel + dedupe(2) + len(2)

/// Streaming parser over an inbound "messages to devices" IPC frame.
///
/// Yields one `Result` per declared sub-record. A malformed sub-record
/// yields `Err` and ends iteration immediately — sub-records
/// already yielded as `Ok` before the failing one are unaffected; it is the
/// caller's job to have already enqueued them before asking for the next
/// item.
pub struct InboundFrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
    remaining: u16,
    index: u16,
}

impl<'a> InboundFrameReader<'a> {
    /// Validate the frame header and prepare to iterate its sub-records.
    pub fn new(buf: &'a [u8]) -> Result<Self, IpcFrameError> {
        let header = IpcHeader::decode(buf)?;
        if header.version != IPC_VERSION {
            return Err(IpcFrameError::UnsupportedVersion(header.version));
        }
        if header.command != command::MESSAGES_TO_DEVICES {
            return Err(IpcFrameError::UnexpectedCommand(header.command));
        }
        if buf.len() < 4 {
            return Err(IpcFrameError::MsgTooShort);
        }
        let count = u16::from_le_bytes([buf[2], buf[3]]);
        Ok(InboundFrameReader {
            buf,
            pos: 4,
            remaining: count,
            index: 0,
        })
    }
}

impl<'a> Iterator for InboundFrameReader<'a> {
    type Item = Result<InboundSubRecord, IpcFrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.index;

        if self.buf.len() < self.pos + SUB_RECORD_HEADER_LEN {
            self.remaining = 0;
            return Some(Err(IpcFrameError::Truncated(index)));
        }

        let preamble = self.buf[self.pos];
        if preamble != PREAMBLE {
            self.remaining = 0;
            return Some(Err(IpcFrameError::BadPreamble(index, preamble)));
        }

        let bus_id = self.buf[self.pos + 1];
        let device_id = self.buf[self.pos + 2];
        let channel_id = self.buf[self.pos + 3];
        let dedupe_id = u16::from_le_bytes([self.buf[self.pos + 4], self.buf[self.pos + 5]]);
        let payload_len = u16::from_le_bytes([self.buf[self.pos + 6], self.buf[self.pos + 7]]) as usize;

        let payload_start = self.pos + SUB_RECORD_HEADER_LEN;
        let payload_end = payload_start + payload_len;
        if self.buf.len() < payload_end {
            self.remaining = 0;
            return Some(Err(IpcFrameError::Truncated(index)));
        }

        self.pos = payload_end;
        self.remaining -= 1;
        self.index += 1;

        Some(Ok(InboundSubRecord {
            bus_id,
            device_id,
            channel_id,
            dedupe_id,
            payload: self.buf[payload_start..payload_end].to_vec(),
        }))
    }
}

/// Encode a "message from device" outbound frame. The dedupe-id field is
/// unused in this direction and is always written as 0.
pub fn encode_message_from_device(bus_id: u8, device_id: u8, channel_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + 5 + payload.len());
    buf.push(IPC_VERSION);
    buf.push(command::MESSAGE_FROM_DEVICE);
    buf.push(bus_id);
    buf.push(device_id);
    buf.push(channel_id);
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// One entry of the devices-list bootstrap document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceListEntry {
    #[serde(rename = "busId")]
    pub bus_id: u8,
    #[serde(rename = "deviceId")]
    pub device_id: u8,
    #[serde(rename = "deviceInfo")]
    pub device_info: DeviceInfo,
}

/// Opaque descriptive info about a device, embedded verbatim in the
/// devices-list document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub model: String,
    pub version: String,
}

/// The devices-list bootstrap document (command 100).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DevicesListDoc {
    pub devices: Vec<DeviceListEntry>,
    #[serde(rename = "serialNumber")]
    pub serial_number: String,
    #[serde(rename = "accessCode")]
    pub access_code: String,
}

/// Encode the devices-list document as a complete IPC frame.
pub fn encode_devices_list(doc: &DevicesListDoc) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = vec![IPC_VERSION, command::DEVICES_LIST];
    buf.extend_from_slice(&serde_json::to_vec(doc)?);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub_record_bytes(bus: u8, device: u8, channel: u8, dedupe: u16, payload: &[u8]) -> Vec<u8> {
        let mut v = vec![PREAMBLE, bus, device, channel];
        v.extend_from_slice(&dedupe.to_le_bytes());
        v.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        v.extend_from_slice(payload);
        v
    }

    fn batch_frame(records: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = vec![IPC_VERSION, command::MESSAGES_TO_DEVICES];
        buf.extend_from_slice(&(records.len() as u16).to_le_bytes());
        for r in records {
            buf.extend_from_slice(r);
        }
        buf
    }

    #[test]
    fn decodes_all_valid_sub_records_in_order() {
        let records = vec![
            sub_record_bytes(1, 1, 4, 0, b"a"),
            sub_record_bytes(1, 2, 5, 7, b"bb"),
        ];
        let frame = batch_frame(&records);
        let parsed: Vec<_> = InboundFrameReader::new(&frame)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].device_id, 1);
        assert_eq!(parsed[0].payload, b"a");
        assert_eq!(parsed[1].dedupe_id, 7);
        assert_eq!(parsed[1].payload, b"bb");
    }

    #[test]
    fn bad_preamble_in_second_record_aborts_after_first() {
        let mut bad = sub_record_bytes(1, 2, 0, 0, b"x");
        bad[0] = 0x00;
        let records = vec![sub_record_bytes(1, 1, 0, 0, b"ok"), bad, sub_record_bytes(1, 3, 0, 0, b"unreached")];
        let frame = batch_frame(&records);
        let mut reader = InboundFrameReader::new(&frame).unwrap();

        let first = reader.next().unwrap();
        assert!(first.is_ok());
        assert_eq!(first.unwrap().payload, b"ok");

        let second = reader.next().unwrap();
        assert_eq!(second, Err(IpcFrameError::BadPreamble(1, 0x00)));

        assert!(reader.next().is_none());
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut frame = batch_frame(&[]);
        frame[0] = 1;
        assert_eq!(
            InboundFrameReader::new(&frame).err(),
            Some(IpcFrameError::UnsupportedVersion(1))
        );
    }

    #[test]
    fn rejects_wrong_command_for_inbound() {
        let mut frame = batch_frame(&[]);
        frame[1] = command::MESSAGE_FROM_DEVICE;
        assert_eq!(
            InboundFrameReader::new(&frame).err(),
            Some(IpcFrameError::UnexpectedCommand(command::MESSAGE_FROM_DEVICE))
        );
    }

    #[test]
    fn message_from_device_has_no_length_prefix_and_runs_to_end() {
        let frame = encode_message_from_device(1, 2, 3, b"payload");
        assert_eq!(frame[0], IPC_VERSION);
        assert_eq!(frame[1], command::MESSAGE_FROM_DEVICE);
        assert_eq!(&frame[2..5], &[1, 2, 3]);
        assert_eq!(&frame[5..7], &0u16.to_le_bytes());
        assert_eq!(&frame[7..], b"payload");
    }

    #[test]
    fn devices_list_round_trips_through_json() {
        let doc = DevicesListDoc {
            devices: vec![DeviceListEntry {
                bus_id: 0,
                device_id: 1,
                device_info: DeviceInfo {
                    model: "iron-pi-cm8".into(),
                    version: "1".into(),
                },
            }],
            serial_number: "SN123".into(),
            access_code: "AC456".into(),
        };
        let frame = encode_devices_list(&doc).unwrap();
        assert_eq!(frame[0], IPC_VERSION);
        assert_eq!(frame[1], command::DEVICES_LIST);
        let parsed: DevicesListDoc = serde_json::from_slice(&frame[2..]).unwrap();
        assert_eq!(parsed, doc);
    }
}
