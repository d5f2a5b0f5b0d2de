//! Frame codec
//!
//! Turns received lines into decoded packets and packets into events, and
//! builds outgoing command lines.
//!
//! Line formats:
//! - `ZIA--<text>`: banner, status and traffic reports, or a JSON document
//!   whose top-level keys name the decoder of each value
//! - `ZIA33<json>`: a radio frame, decoder named by
//!   `frame.header.protocolMeaning`
//! - `ZIA++<COMMAND> <PROTOCOL> ID <id>` / `ZIA++<COMMAND> <PROTOCOL> <address>`:
//!   outgoing commands

use serde_json::Value;
use tracing::{debug, error};

use super::commands::OutgoingCommand;
use super::decoders::{self, DecoderTable};
use super::event::DeviceEvent;
use super::fields;
use super::packet::{DecodedPacket, Node};
use super::{ProtocolError, COMMAND_PREFIX, CONTROL_HEADER, JSON_HEADER, PACKET_ID_SEP};

/// Identity part used when an element does not name its protocol
const UNKNOWN_PROTOCOL: &str = "unknown";

/// Check whether a line starts with one of the known headers
pub fn is_recognized_frame(line: &str) -> bool {
    line.starts_with(CONTROL_HEADER) || line.starts_with(JSON_HEADER)
}

/// Check whether a line is a control-channel reply (acknowledges a command)
pub fn is_acknowledgement(line: &str) -> bool {
    line.starts_with(CONTROL_HEADER)
}

/// Fixed text prefixes of control lines and the decoder handling each
fn control_protocol(body: &str) -> Option<&'static str> {
    if body.starts_with("Welcome") {
        Some("WELCOME")
    } else if body.starts_with(CONTROL_HEADER) {
        Some("Status")
    } else if body.starts_with("RECEIVED") {
        Some("RECEIVED")
    } else if body.starts_with("REPEATED") {
        Some("REPEATED")
    } else {
        None
    }
}

/// Decode a line with the built-in decoder table
pub fn decode(line: &str) -> Vec<DecodedPacket> {
    decode_with(decoders::table(), line)
}

/// Decode a line with an explicit decoder table
///
/// Never fails: unknown protocols, malformed JSON and decoder errors are
/// logged per frame (or per top-level key) and skipped.
pub fn decode_with(table: &DecoderTable, line: &str) -> Vec<DecodedPacket> {
    let line = line.trim();
    let mut packets = Vec::new();
    debug!(line, "Packet");

    if let Some(body) = line.strip_prefix(CONTROL_HEADER) {
        if let Some(protocol) = control_protocol(body) {
            let message = Value::String(body.to_string());
            packets.extend(run_decoder(table, protocol, &message, line));
            return packets;
        }

        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(document)) => {
                for (protocol, message) in &document {
                    packets.extend(run_decoder(table, protocol, message, line));
                }
            }
            Ok(_) => error!(line, "Control document is not a JSON object"),
            Err(err) => error!(line, %err, "Malformed control document"),
        }
    } else if let Some(body) = line.strip_prefix(JSON_HEADER) {
        match radio_frame(body) {
            Ok((protocol, frame)) => packets.extend(run_decoder(table, &protocol, &frame, line)),
            Err(err) => error!(line, %err, "Malformed radio frame"),
        }
    } else {
        debug!(line, "Unrecognized line");
    }

    packets
}

/// Extract `frame` and its `header.protocolMeaning` from a `ZIA33` body
fn radio_frame(body: &str) -> Result<(String, Value), ProtocolError> {
    let mut document: Value = serde_json::from_str(body)?;
    let frame = document
        .get_mut("frame")
        .map(Value::take)
        .ok_or_else(|| ProtocolError::MalformedFrame("no frame object".to_string()))?;
    let protocol = frame
        .pointer("/header/protocolMeaning")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ProtocolError::MalformedFrame("no header.protocolMeaning".to_string()))?
        .to_string();
    Ok((protocol, frame))
}

fn run_decoder(
    table: &DecoderTable,
    protocol: &str,
    message: &Value,
    line: &str,
) -> Option<DecodedPacket> {
    let base = DecodedPacket::new(Node::Gateway).with_protocol(protocol);
    match table.lookup(protocol).and_then(|decode| decode(base, message)) {
        Ok(packet) => Some(packet),
        Err(ProtocolError::UnsupportedProtocol(_)) => {
            error!(protocol, line, "Protocol not implemented");
            None
        }
        Err(err) => {
            error!(protocol, line, %err, "Failed to decode frame");
            None
        }
    }
}

/// Build the outgoing line for a device command
///
/// Command and protocol are uppercased; the device id is preferred over the
/// address. A command with neither is a caller error.
pub fn encode(command: &OutgoingCommand) -> Result<String, ProtocolError> {
    let verb = command.command.to_uppercase();
    let protocol = command.protocol.to_uppercase();

    if let Some(id) = command.device_id.as_deref().filter(|id| !id.is_empty()) {
        return Ok(format!("{}{} {} ID {}", COMMAND_PREFIX, verb, protocol, id));
    }
    if let Some(address) = command.device_address.as_deref().filter(|a| !a.is_empty()) {
        return Ok(format!("{}{} {} {}", COMMAND_PREFIX, verb, protocol, address));
    }
    Err(ProtocolError::MissingTarget(protocol))
}

/// Join non-empty identity parts with the separator
fn join_id(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(PACKET_ID_SEP)
}

/// Lazily expand a packet into events
///
/// One event per known semantic field (identity
/// `<packet identity>_<field>_<field>`), then one per composite element
/// (identity `<packet identity>_<element protocol>_<element key>`). A forced
/// identity on the packet replaces every derived one.
pub fn extract_events(packet: &DecodedPacket) -> impl Iterator<Item = DeviceEvent> + '_ {
    let packet_id = packet.identity_key();
    let element_packet_id = packet_id.clone();

    let field_events = packet.fields.iter().filter_map(move |(abbrev, value)| {
        let name = fields::full_name(abbrev)?;
        let id = packet
            .force_id
            .clone()
            .unwrap_or_else(|| join_id(&[&packet_id, name, name]));
        Some(DeviceEvent::new(
            packet.platform,
            id,
            packet.protocol.clone(),
            name,
            value.clone(),
            packet.units.get(abbrev.as_str()).cloned(),
        ))
    });

    let element_events = packet.elements.iter().map(move |(key, element)| {
        let element_protocol = element.protocol.as_deref().unwrap_or(UNKNOWN_PROTOCOL);
        let id = packet
            .force_id
            .clone()
            .unwrap_or_else(|| join_id(&[&element_packet_id, element_protocol, key]));
        DeviceEvent::new(
            element.platform,
            id,
            element.protocol.clone(),
            key.as_str(),
            element.value.clone(),
            element.unit.clone(),
        )
    });

    field_events.chain(element_events)
}
