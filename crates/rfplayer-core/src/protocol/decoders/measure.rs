//! Measurement families (weather stations, energy meters)
//!
//! Each frame reports a list of measures; every measure becomes one element
//! of a composite packet.

use serde_json::Value;

use crate::protocol::event::Platform;
use crate::protocol::packet::{DecodedPacket, Element, FieldValue};
use crate::protocol::ProtocolError;
use super::{infos, text};

pub(super) const PROTOCOLS: &[&str] = &["OREGON", "OWL"];

pub(super) fn decode(base: DecodedPacket, frame: &Value) -> Result<DecodedPacket, ProtocolError> {
    let infos = infos(frame)?;
    let id = text(infos, "adr_channel")
        .or_else(|| text(infos, "id"))
        .or_else(|| text(infos, "adr"))
        .ok_or_else(|| ProtocolError::MalformedFrame("missing sensor address".to_string()))?;
    let measures = infos
        .get("measures")
        .and_then(Value::as_array)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ProtocolError::MalformedFrame("frame has no measures".to_string()))?;

    let protocol = base.protocol.clone();
    let mut packet = base.with_id(id).with_platform(Platform::Sensor);
    if let Some(low) = text(infos, "lowBatt") {
        packet.set_field("batl", low == "1");
    }

    for measure in measures.iter().filter_map(Value::as_object) {
        let (Some(kind), Some(value)) = (text(measure, "type"), text(measure, "value")) else {
            continue;
        };
        let mut element = Element::new(FieldValue::measurement(&value))
            .platform(Platform::Sensor)
            .unit(text(measure, "unit"));
        element.protocol = protocol.clone();
        packet.insert_element(kind, element);
    }
    Ok(packet)
}
