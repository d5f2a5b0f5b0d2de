//! Device identity keys
//!
//! A device is named by `(protocol, id, switch)`, serialized as the non-empty
//! parts joined with [`PACKET_ID_SEP`]. A few legacy key shapes decode to fixed
//! or derived identities; those are one-directional aliases.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{ProtocolError, PACKET_ID_SEP};

/// Compound key naming a physical device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Protocol family name
    pub protocol: String,
    /// Device id within the protocol
    pub id: Option<String>,
    /// Sub-switch, channel or element kind
    pub switch: Option<String>,
    /// Address recovered from a legacy `chacon` key; never serialized
    pub address: Option<String>,
}

impl DeviceIdentity {
    /// Identity with a protocol and an id
    pub fn new(protocol: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            id: Some(id.into()),
            switch: None,
            address: None,
        }
    }

    /// Set the sub-switch
    pub fn with_switch(mut self, switch: impl Into<String>) -> Self {
        self.switch = Some(switch.into());
        self
    }

    fn protocol_only(protocol: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            id: None,
            switch: None,
            address: None,
        }
    }

    /// Join protocol, id and switch, skipping absent or empty parts
    pub fn serialize(&self) -> String {
        [
            Some(self.protocol.as_str()),
            self.id.as_deref(),
            self.switch.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(PACKET_ID_SEP)
    }

    /// Parse a serialized key, applying the legacy aliases first
    pub fn deserialize(key: &str) -> Result<Self, ProtocolError> {
        if key == "rfplayer" {
            return Ok(Self::protocol_only("unknown"));
        }

        if key == "ZIA" {
            return Ok(Self::protocol_only("ZIA++"));
        }

        if key.to_ascii_lowercase().starts_with("chacon") {
            let address = key
                .split(PACKET_ID_SEP)
                .nth(1)
                .filter(|a| !a.is_empty())
                .ok_or_else(|| ProtocolError::MalformedIdentity(key.to_string()))?;
            return Ok(Self {
                protocol: "chacon".to_string(),
                id: None,
                switch: None,
                address: Some(address.to_string()),
            });
        }

        if let Some(rest) = key.strip_prefix("dooya_v4") {
            let id = rest
                .trim_start_matches(PACKET_ID_SEP)
                .split(PACKET_ID_SEP)
                .next()
                .filter(|id| !id.is_empty())
                .ok_or_else(|| ProtocolError::MalformedIdentity(key.to_string()))?;
            return Ok(Self {
                protocol: "dooya_v4".to_string(),
                id: Some(id.to_string()),
                switch: Some(id.to_string()),
                address: None,
            });
        }

        let parts: Vec<&str> = key.split(PACKET_ID_SEP).collect();
        if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(ProtocolError::MalformedIdentity(key.to_string()));
        }

        Ok(Self {
            protocol: parts[0].to_string(),
            id: Some(parts[1].to_string()),
            switch: parts.get(2).map(|s| s.to_string()),
            address: None,
        })
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl FromStr for DeviceIdentity {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::deserialize(s)
    }
}
