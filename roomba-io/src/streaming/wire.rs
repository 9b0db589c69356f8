//! Wire format serialization
//!
//! # Framing
//!
//! Every TCP message and every UDP datagram is length-prefixed:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ Payload (variable)       │
//! │ Big-endian u32   │ JSON or Postcard binary  │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! Payloads larger than [`MAX_MESSAGE_SIZE`] are rejected and close the
//! connection. A payload that fails to deserialize is answered with an
//! error reply; the connection stays open.

use crate::error::{Error, Result};
use crate::streaming::messages::{CommandMessage, CommandReply, Message};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Largest accepted payload (1 MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Length prefix size
pub const FRAME_HEADER_LEN: usize = 4;

/// Supported wire formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Binary format using postcard - fast and compact
    Postcard,
    /// JSON format - human-readable for debugging
    #[default]
    Json,
}

/// Serializer that can handle both formats
#[derive(Debug, Clone, Copy)]
pub struct Serializer {
    format: WireFormat,
}

impl Serializer {
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self.format {
            WireFormat::Postcard => {
                postcard::to_allocvec(value).map_err(|e| Error::Serialization(e.to_string()))
            }
            WireFormat::Json => {
                serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
            }
        }
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self.format {
            WireFormat::Postcard => {
                postcard::from_bytes(bytes).map_err(|e| Error::Serialization(e.to_string()))
            }
            WireFormat::Json => {
                serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
            }
        }
    }

    /// Serialize an outbound message
    pub fn serialize(&self, msg: &Message) -> Result<Vec<u8>> {
        self.encode(msg)
    }

    pub fn deserialize(&self, bytes: &[u8]) -> Result<Message> {
        self.decode(bytes)
    }

    pub fn serialize_command(&self, cmd: &CommandMessage) -> Result<Vec<u8>> {
        self.encode(cmd)
    }

    pub fn deserialize_command(&self, bytes: &[u8]) -> Result<CommandMessage> {
        self.decode(bytes)
    }

    pub fn serialize_reply(&self, reply: &CommandReply) -> Result<Vec<u8>> {
        self.encode(reply)
    }

    pub fn deserialize_reply(&self, bytes: &[u8]) -> Result<CommandReply> {
        self.decode(bytes)
    }
}

/// Write `payload` with its length prefix into `buffer`
///
/// The buffer is cleared first so callers can reuse it across messages.
pub fn frame_into(payload: &[u8], buffer: &mut Vec<u8>) -> Result<()> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(Error::Serialization(format!(
            "Message too large: {} bytes",
            payload.len()
        )));
    }
    buffer.clear();
    buffer.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buffer.extend_from_slice(payload);
    Ok(())
}

/// Split one frame off the front of `bytes`
///
/// Returns the payload, or `None` if the frame is incomplete.
pub fn unframe(bytes: &[u8]) -> Result<Option<&[u8]>> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::Serialization(format!("Message too large: {} bytes", len)));
    }
    Ok(bytes.get(FRAME_HEADER_LEN..FRAME_HEADER_LEN + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ChassisSample, IoSample};
    use crate::protocol::SensorRecord;
    use crate::scan::ScanMapper;

    fn sample_messages() -> Vec<Message> {
        let mut record = SensorRecord::idle();
        record.bumps_wheeldrops = 0x01;
        let scan = ScanMapper::with_defaults().unwrap().map_to_scan_points(&record);
        record.timestamp_us = 1_100_000;
        record.distance_mm = 25;
        record.angle = 10;
        let chassis = ChassisSample::from_record(&record, Some(1_000_000), Some(2));
        vec![
            Message::Scan(scan),
            Message::Io(IoSample::from_record(&record)),
            Message::Chassis(chassis),
        ]
    }

    #[test]
    fn test_messages_survive_both_formats() {
        for format in [WireFormat::Json, WireFormat::Postcard] {
            let serializer = Serializer::new(format);
            for msg in sample_messages() {
                let bytes = serializer.serialize(&msg).unwrap();
                assert_eq!(serializer.deserialize(&bytes).unwrap(), msg);
            }
        }
    }

    #[test]
    fn test_commands_survive_postcard() {
        let serializer = Serializer::new(WireFormat::Postcard);
        let cmd = CommandMessage::PlayNote {
            slot: 2,
            note: 72,
            duration: 32,
        };
        let bytes = serializer.serialize_command(&cmd).unwrap();
        assert_eq!(serializer.deserialize_command(&bytes).unwrap(), cmd);
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        let serializer = Serializer::new(WireFormat::Json);
        assert!(matches!(
            serializer.deserialize_command(b"{not json"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_framing() {
        let mut buffer = Vec::new();
        frame_into(b"hello", &mut buffer).unwrap();
        assert_eq!(&buffer[..4], &[0, 0, 0, 5]);
        assert_eq!(unframe(&buffer).unwrap(), Some(&b"hello"[..]));
        assert_eq!(unframe(&buffer[..6]).unwrap(), None);
        assert_eq!(unframe(&buffer[..2]).unwrap(), None);

        let oversized = ((MAX_MESSAGE_SIZE + 1) as u32).to_be_bytes();
        assert!(unframe(&oversized).is_err());
    }
}
