//! Control channel decoders
//!
//! `ZIA--` lines carry the firmware banner, command echoes, traffic reports
//! and the JSON documents answering `STATUS JSON`.

use serde_json::Value;

use crate::protocol::event::Platform;
use crate::protocol::packet::{DecodedPacket, Element, FieldValue};
use crate::protocol::ProtocolError;
use super::text;

/// Identity under which gateway-level packets are reported
const GATEWAY_ID: &str = "rfplayer";

/// Identity of command echoes and status replies
const CONTROL_ID: &str = "ZIA";

fn message_text(message: &Value) -> Result<&str, ProtocolError> {
    message
        .as_str()
        .map(str::trim)
        .ok_or_else(|| ProtocolError::MalformedFrame("control line is not text".to_string()))
}

/// `Welcome to Ziblue Dongle RFPLAYER (...)`
pub(super) fn decode_welcome(
    base: DecodedPacket,
    message: &Value,
) -> Result<DecodedPacket, ProtocolError> {
    let banner = message_text(message)?;
    let mut packet = base.with_force_id(GATEWAY_ID);
    packet.set_field("info", banner);
    Ok(packet)
}

/// Plain-text status replies and command echoes
pub(super) fn decode_status(
    base: DecodedPacket,
    message: &Value,
) -> Result<DecodedPacket, ProtocolError> {
    let status = message_text(message)?;
    let status = status.trim_start_matches(crate::protocol::CONTROL_HEADER).trim();
    let mut packet = base.with_force_id(CONTROL_ID);
    packet.set_field("dbg", status);
    Ok(packet)
}

/// `RECEIVED ...` / `REPEATED ...` traffic reports
pub(super) fn decode_traffic(
    base: DecodedPacket,
    message: &Value,
) -> Result<DecodedPacket, ProtocolError> {
    let report = message_text(message)?;
    let mut packet = base.with_force_id(CONTROL_ID);
    packet.set_field("dbg", report);
    Ok(packet)
}

/// Convert a `{"n": name, "v": value, "unit": unit}` list into elements
fn insert_items(
    packet: &mut DecodedPacket,
    protocol: &str,
    items: &[Value],
    key_prefix: Option<&str>,
) {
    for item in items.iter().filter_map(Value::as_object) {
        let (Some(name), Some(value)) = (text(item, "n"), text(item, "v")) else {
            continue;
        };
        let key = match key_prefix {
            Some(prefix) => format!("{}_{}", prefix, name),
            None => name,
        };
        let element = Element::new(FieldValue::measurement(&value))
            .protocol(protocol)
            .platform(Platform::Sensor)
            .unit(text(item, "unit"));
        packet.insert_element(key, element);
    }
}

/// `{"systemStatus": {"info": [...]}}`
pub(super) fn decode_system_status(
    base: DecodedPacket,
    message: &Value,
) -> Result<DecodedPacket, ProtocolError> {
    let protocol = base.protocol.clone().unwrap_or_else(|| "systemStatus".to_string());
    let items = message
        .get("info")
        .and_then(Value::as_array)
        .ok_or_else(|| ProtocolError::MalformedFrame("systemStatus has no info list".to_string()))?;

    let mut packet = base.with_id(GATEWAY_ID);
    insert_items(&mut packet, &protocol, items, None);
    Ok(packet)
}

/// `{"radioStatus": {"band": [{"i": [...]}, ...]}}`
pub(super) fn decode_radio_status(
    base: DecodedPacket,
    message: &Value,
) -> Result<DecodedPacket, ProtocolError> {
    let protocol = base.protocol.clone().unwrap_or_else(|| "radioStatus".to_string());
    let bands = message
        .get("band")
        .and_then(Value::as_array)
        .ok_or_else(|| ProtocolError::MalformedFrame("radioStatus has no band list".to_string()))?;

    let mut packet = base.with_id(GATEWAY_ID);
    for (index, band) in bands.iter().enumerate() {
        let Some(items) = band.get("i").and_then(Value::as_array) else {
            continue;
        };
        // bands are labelled by their frequency when the firmware reports it
        let label = items
            .iter()
            .filter_map(Value::as_object)
            .find(|item| text(item, "n").as_deref() == Some("Frequency"))
            .and_then(|item| text(item, "v"))
            .unwrap_or_else(|| index.to_string());
        insert_items(&mut packet, &protocol, items, Some(&label));
    }
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::Node;
    use serde_json::json;

    fn base(protocol: &str) -> DecodedPacket {
        DecodedPacket::new(Node::Gateway).with_protocol(protocol)
    }

    #[test]
    fn test_welcome_banner() {
        let message = Value::String("Welcome to Ziblue Dongle RFPLAYER (RFP1000)".into());
        let packet = decode_welcome(base("WELCOME"), &message).unwrap();
        assert_eq!(packet.force_id.as_deref(), Some("rfplayer"));
        assert_eq!(
            packet.fields.get("info"),
            Some(&FieldValue::from("Welcome to Ziblue Dongle RFPLAYER (RFP1000)"))
        );
        assert_eq!(packet.platform, None);
    }

    #[test]
    fn test_status_strips_repeated_header() {
        let message = Value::String("ZIA--FORMAT JSON".into());
        let packet = decode_status(base("Status"), &message).unwrap();
        assert_eq!(packet.fields.get("dbg"), Some(&FieldValue::from("FORMAT JSON")));
    }

    #[test]
    fn test_json_message_rejected_by_text_decoder() {
        assert!(decode_traffic(base("RECEIVED"), &json!({"a": 1})).is_err());
    }

    #[test]
    fn test_system_status_elements() {
        let message = json!({"info": [
            {"n": "Version", "v": "1.34"},
            {"n": "Temperature", "v": "37", "unit": "C"},
            {"v": "orphan"}
        ]});
        let packet = decode_system_status(base("systemStatus"), &message).unwrap();
        assert_eq!(packet.id.as_deref(), Some("rfplayer"));
        assert_eq!(packet.elements.len(), 2);
        let temperature = &packet.elements["Temperature"];
        assert_eq!(temperature.value, FieldValue::Number(37.0));
        assert_eq!(temperature.unit.as_deref(), Some("C"));
        assert_eq!(temperature.platform, Some(Platform::Sensor));
    }

    #[test]
    fn test_radio_status_bands_labelled_by_frequency() {
        let message = json!({"band": [
            {"i": [{"n": "Frequency", "v": "433920", "unit": "Khz"}, {"n": "Selectivity", "v": "0"}]},
            {"i": [{"n": "Frequency", "v": "868350", "unit": "Khz"}]}
        ]});
        let packet = decode_radio_status(base("radioStatus"), &message).unwrap();
        assert!(packet.elements.contains_key("433920_Selectivity"));
        assert!(packet.elements.contains_key("868350_Frequency"));
        assert_eq!(packet.elements.len(), 3);
    }
}
