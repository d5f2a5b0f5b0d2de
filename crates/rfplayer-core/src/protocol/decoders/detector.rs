//! Detector families (door/window contacts, motion detectors)
//!
//! The qualifier is a bit field: tamper, alarm, low battery, supervision.

use serde_json::Value;

use crate::protocol::event::Platform;
use crate::protocol::fields::detector_status;
use crate::protocol::packet::DecodedPacket;
use crate::protocol::ProtocolError;
use super::{infos, number, required};

pub(super) const PROTOCOLS: &[&str] = &["VISONIC", "X2D"];

const TAMPER: u64 = 0x01;
const ALARM: u64 = 0x02;
const LOW_BATTERY: u64 = 0x04;
const SUPERVISION: u64 = 0x08;

pub(super) fn decode(base: DecodedPacket, frame: &Value) -> Result<DecodedPacket, ProtocolError> {
    let infos = infos(frame)?;
    let id = required(infos, "id")?;
    let qualifier = number(infos, "qualifier")
        .ok_or_else(|| ProtocolError::MalformedFrame("missing detector qualifier".to_string()))?;

    let mut packet = base.with_id(id).with_platform(Platform::Sensor);
    let code = qualifier.to_string();
    match detector_status(&code) {
        Some(status) => packet.set_field("sta", status),
        None => packet.set_field("sta", code),
    }
    packet.set_field("tmr", qualifier & TAMPER != 0);
    packet.set_field("alm", qualifier & ALARM != 0);
    packet.set_field("batl", qualifier & LOW_BATTERY != 0);
    packet.set_field("sup", qualifier & SUPERVISION != 0);
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::{FieldValue, Node};
    use serde_json::json;

    fn decode_qualifier(qualifier: &str) -> DecodedPacket {
        let frame = json!({"infos": {"subType": "0", "id": "2888689920", "qualifier": qualifier}});
        decode(DecodedPacket::new(Node::Gateway).with_protocol("VISONIC"), &frame).unwrap()
    }

    #[test]
    fn test_open_contact() {
        let packet = decode_qualifier("2");
        assert_eq!(packet.fields.get("sta"), Some(&FieldValue::from("open")));
        assert_eq!(packet.fields.get("alm"), Some(&FieldValue::Bool(true)));
        assert_eq!(packet.fields.get("tmr"), Some(&FieldValue::Bool(false)));
        assert_eq!(packet.platform, Some(Platform::Sensor));
    }

    #[test]
    fn test_unmapped_qualifier_kept_raw() {
        let packet = decode_qualifier("5");
        assert_eq!(packet.fields.get("sta"), Some(&FieldValue::from("5")));
        assert_eq!(packet.fields.get("tmr"), Some(&FieldValue::Bool(true)));
        assert_eq!(packet.fields.get("batl"), Some(&FieldValue::Bool(true)));
    }

    #[test]
    fn test_missing_qualifier() {
        let frame = json!({"infos": {"id": "1"}});
        assert!(decode(DecodedPacket::new(Node::Gateway), &frame).is_err());
    }
}
