//! Packet trace model and ingestion.
//!
//! The analysis core consumes a chronological sequence of overheard mesh
//! packets. This module defines the record layout, the command-flag
//! vocabulary, CSV trace parsing, and the in-memory trace store the
//! periodic analysis batches snapshot from.

pub mod log_parser;
pub mod store;
pub mod timestamp;

pub use log_parser::{parse_record_line, parse_trace_file};
pub use store::TraceStore;
pub use timestamp::{parse_timestamp, TimestampParseError, TraceTime};

use serde::{Deserialize, Serialize};

/// Command flag carried by every mesh packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flag {
    Set,
    Get,
    Resp,
    Ack,
    Dr,
    Na,
    /// Tag not in the known vocabulary; kept so the record still
    /// participates in joins.
    Unknown,
}

impl Flag {
    /// Parse one of the literal trace tags (`[SET]`, `[GET]`, ...).
    pub fn from_tag(tag: &str) -> Flag {
        match tag.trim() {
            "[SET]" => Flag::Set,
            "[GET]" => Flag::Get,
            "[RESP]" => Flag::Resp,
            "[ACK]" => Flag::Ack,
            "[DR]" => Flag::Dr,
            "[NA]" => Flag::Na,
            _ => Flag::Unknown,
        }
    }

    /// True for the request flags a destination must answer with a
    /// version bump.
    pub fn is_request(self) -> bool {
        matches!(self, Flag::Set | Flag::Get)
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Flag::Set => "[SET]",
            Flag::Get => "[GET]",
            Flag::Resp => "[RESP]",
            Flag::Ack => "[ACK]",
            Flag::Dr => "[DR]",
            Flag::Na => "[NA]",
            Flag::Unknown => "[Unknown]",
        };
        write!(f, "{}", tag)
    }
}

/// Identity of a logical mesh message: the same (index, version, payload)
/// triple heard from different transmitters is the same message relayed.
pub type MessageKey = (u16, u32, Option<Vec<u8>>);

/// A single overheard packet, immutable once logged.
///
/// Ordering is by `timestamp`; ties are broken by position in the trace
/// (arrival order), which every consumer preserves by iterating in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRecord {
    /// Seconds since the start of the wrapping hour.
    pub timestamp: TraceTime,
    /// Transmitting physical address, colon-separated hex form.
    pub mac: String,
    /// Raw command word as logged, e.g. "[0056]".
    pub command: String,
    pub flag: Flag,
    /// Logical channel the message concerns, generally the originating
    /// device's own address for status traffic.
    pub index: u16,
    /// Payload bytes; `None` is the no-payload sentinel and is a
    /// first-class join key value.
    pub payload: Option<Vec<u8>>,
    /// Monotonic per-index sequence number.
    pub version: u32,
    pub channel: Option<String>,
}

impl PacketRecord {
    /// Join key shared by all copies of the same logical message.
    pub fn message_key(&self) -> MessageKey {
        (self.index, self.version, self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_tags_round_trip() {
        for tag in ["[SET]", "[GET]", "[RESP]", "[ACK]", "[DR]", "[NA]"] {
            let flag = Flag::from_tag(tag);
            assert_ne!(flag, Flag::Unknown);
            assert_eq!(flag.to_string(), tag);
        }
        assert_eq!(Flag::from_tag("[XYZ]"), Flag::Unknown);
    }

    #[test]
    fn test_request_flags() {
        assert!(Flag::Set.is_request());
        assert!(Flag::Get.is_request());
        assert!(!Flag::Resp.is_request());
        assert!(!Flag::Ack.is_request());
    }

    #[test]
    fn test_message_key_distinguishes_payload() {
        let base = PacketRecord {
            timestamp: 1.0,
            mac: "AA:BB".into(),
            command: "[0056]".into(),
            flag: Flag::Resp,
            index: 3,
            payload: Some(vec![0x01]),
            version: 7,
            channel: None,
        };
        let mut no_payload = base.clone();
        no_payload.payload = None;
        assert_ne!(base.message_key(), no_payload.message_key());
    }
}
