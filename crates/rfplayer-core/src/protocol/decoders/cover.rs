//! Cover families (RTS shutters and portals)

use serde_json::Value;

use crate::protocol::event::Platform;
use crate::protocol::fields::{rts_element, rts_status};
use crate::protocol::packet::DecodedPacket;
use crate::protocol::ProtocolError;
use super::{infos, required, text};

pub(super) const PROTOCOLS: &[&str] = &["RTS"];

pub(super) fn decode(base: DecodedPacket, frame: &Value) -> Result<DecodedPacket, ProtocolError> {
    let infos = infos(frame)?;
    let id = required(infos, "id")?;
    let qualifier = required(infos, "qualifier")?;

    let mut packet = base.with_id(id).with_platform(Platform::Cover);
    if let Some(sub_type) = text(infos, "subType") {
        let element = rts_element(&sub_type).map(str::to_string).unwrap_or(sub_type);
        packet.switch = Some(element);
    }

    let action = rts_status(&qualifier)
        .map(str::to_string)
        .or_else(|| text(infos, "qualifierMeaning"))
        .unwrap_or(qualifier);
    packet.set_field("cov", action);
    Ok(packet)
}
