//! Protocol decoders
//!
//! Every supported protocol family maps to one decoder function through a
//! table built once at first use. A decoder receives a base packet (node and
//! protocol already set) plus the protocol's message: the `frame` object of a
//! `ZIA33` line, the value under the protocol key of a `ZIA--` JSON document,
//! or the text of a `ZIA--` control line.

mod control;
mod cover;
mod detector;
mod measure;
mod switch;

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use super::packet::DecodedPacket;
use super::ProtocolError;

/// Signature shared by all protocol decoders
pub type DecodeFn = fn(DecodedPacket, &Value) -> Result<DecodedPacket, ProtocolError>;

/// Mapping from protocol name to decoder
#[derive(Clone, Default)]
pub struct DecoderTable {
    decoders: HashMap<String, DecodeFn>,
}

impl fmt::Debug for DecoderTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderTable")
            .field("protocols", &self.protocols())
            .finish()
    }
}

impl DecoderTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in protocol family
    pub fn builtin() -> Self {
        let mut table = Self::new();

        table.register("WELCOME", control::decode_welcome);
        table.register("Status", control::decode_status);
        table.register("RECEIVED", control::decode_traffic);
        table.register("REPEATED", control::decode_traffic);
        table.register("systemStatus", control::decode_system_status);
        table.register("radioStatus", control::decode_radio_status);

        for protocol in switch::PROTOCOLS {
            table.register(protocol, switch::decode);
        }
        for protocol in detector::PROTOCOLS {
            table.register(protocol, detector::decode);
        }
        for protocol in cover::PROTOCOLS {
            table.register(protocol, cover::decode);
        }
        for protocol in measure::PROTOCOLS {
            table.register(protocol, measure::decode);
        }

        table
    }

    /// Add or replace the decoder for a protocol
    pub fn register(&mut self, protocol: &str, decoder: DecodeFn) {
        self.decoders.insert(protocol.to_string(), decoder);
    }

    /// Resolve the decoder for a protocol
    pub fn lookup(&self, protocol: &str) -> Result<DecodeFn, ProtocolError> {
        self.decoders
            .get(protocol)
            .copied()
            .ok_or_else(|| ProtocolError::UnsupportedProtocol(protocol.to_string()))
    }

    /// Whether a decoder exists for the protocol
    pub fn supports(&self, protocol: &str) -> bool {
        self.decoders.contains_key(protocol)
    }

    /// Registered protocol names, sorted
    pub fn protocols(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Shared table of built-in decoders
pub fn table() -> &'static DecoderTable {
    static TABLE: OnceLock<DecoderTable> = OnceLock::new();
    TABLE.get_or_init(DecoderTable::builtin)
}

/// The `infos` object of a radio frame
fn infos(frame: &Value) -> Result<&Map<String, Value>, ProtocolError> {
    frame
        .get("infos")
        .and_then(Value::as_object)
        .ok_or_else(|| ProtocolError::MalformedFrame("frame has no infos object".to_string()))
}

/// A scalar member rendered as text; numbers are accepted as well as strings
fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A required scalar member
fn required(map: &Map<String, Value>, key: &str) -> Result<String, ProtocolError> {
    text(map, key).ok_or_else(|| ProtocolError::MalformedFrame(format!("missing '{}'", key)))
}

/// A numeric member, accepting decimal or `0x` hexadecimal strings
fn number(map: &Map<String, Value>, key: &str) -> Option<u64> {
    let raw = text(map, key)?;
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_contents() {
        let table = table();
        for protocol in ["WELCOME", "Status", "X10", "VISONIC", "RTS", "OREGON", "OWL"] {
            assert!(table.supports(protocol), "missing decoder for {protocol}");
        }
        assert!(!table.supports("ACME"));
    }

    #[test]
    fn test_unsupported_lookup_is_typed() {
        match DecoderTable::new().lookup("X10") {
            Err(ProtocolError::UnsupportedProtocol(name)) => assert_eq!(name, "X10"),
            other => panic!("expected UnsupportedProtocol, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_number_accepts_hex() {
        let map = serde_json::json!({"a": "0x1A", "b": "26", "c": 26, "d": "zz"});
        let map = map.as_object().unwrap();
        assert_eq!(number(map, "a"), Some(26));
        assert_eq!(number(map, "b"), Some(26));
        assert_eq!(number(map, "c"), Some(26));
        assert_eq!(number(map, "d"), None);
        assert_eq!(number(map, "missing"), None);
    }
}
