//! On/off command families
//!
//! Remotes and wall switches whose frames report a command verb for a device
//! id, e.g. `{"subType":"0","id":"3","subTypeMeaning":"OFF","idMeaning":"A4"}`.

use serde_json::Value;

use crate::protocol::event::Platform;
use crate::protocol::packet::DecodedPacket;
use crate::protocol::ProtocolError;
use super::{infos, required, text};

pub(super) const PROTOCOLS: &[&str] = &["X10", "DOMIA", "CHACON", "KD101", "BLYSS", "PARROT", "FS20"];

pub(super) fn decode(base: DecodedPacket, frame: &Value) -> Result<DecodedPacket, ProtocolError> {
    let infos = infos(frame)?;
    let id = required(infos, "id")?;
    let command = text(infos, "subTypeMeaning")
        .or_else(|| text(infos, "subType"))
        .ok_or_else(|| ProtocolError::MalformedFrame("missing command sub-type".to_string()))?;

    let mut packet = base.with_id(id).with_platform(Platform::Command);
    packet.address = text(infos, "idMeaning");
    packet.set_field("cmd", command);
    Ok(packet)
}
