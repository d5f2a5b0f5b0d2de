//! Decoded packets
//!
//! A `DecodedPacket` is the transient result of running one protocol decoder
//! over one frame. Semantic fields are keyed by their abbreviation (see
//! [`fields`](super::fields)); event extraction expands them to full names.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::event::Platform;
use super::identity::DeviceIdentity;

/// Packet source identification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Node {
    /// Frame emitted by a master device
    Master,
    /// Echo of a frame the gateway itself transmitted
    Echo,
    /// Frame originating from the gateway
    Gateway,
}

impl Node {
    /// Numeric code used by the transceiver for this source
    pub fn code(&self) -> &'static str {
        match self {
            Node::Master => "10",
            Node::Echo => "11",
            Node::Gateway => "20",
        }
    }

    /// Resolve a numeric source code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "10" => Some(Node::Master),
            "11" => Some(Node::Echo),
            "20" => Some(Node::Gateway),
            _ => None,
        }
    }
}

/// A single field value carried by a packet or event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Flag, e.g. low battery
    Bool(bool),
    /// Numeric measurement
    Number(f64),
    /// Anything else, kept verbatim
    Text(String),
}

impl FieldValue {
    /// Convert a scalar JSON value; objects, arrays and null yield `None`
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(FieldValue::Bool(*b)),
            Value::Number(n) => n.as_f64().map(FieldValue::Number),
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            _ => None,
        }
    }

    /// Parse a measurement string, keeping it as text when it is not numeric
    pub fn measurement(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.trim_start_matches('+').parse::<f64>() {
            Ok(n) if n.is_finite() => FieldValue::Number(n),
            _ => FieldValue::Text(trimmed.to_string()),
        }
    }

    /// Borrow the text content, if this is a text value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// One member of a multi-sensor composite frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Protocol family the element reports under
    pub protocol: Option<String>,
    /// Platform the element belongs to
    pub platform: Option<Platform>,
    /// Measured value
    pub value: FieldValue,
    /// Unit of the measured value
    pub unit: Option<String>,
}

impl Element {
    /// Element reporting `value`
    pub fn new(value: impl Into<FieldValue>) -> Self {
        Self {
            protocol: None,
            platform: None,
            value: value.into(),
            unit: None,
        }
    }

    /// Set the element's protocol
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Set the element's platform
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Set the unit; empty units are ignored
    pub fn unit(mut self, unit: Option<String>) -> Self {
        self.unit = unit.filter(|u| !u.is_empty());
        self
    }
}

/// Structured result of decoding one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedPacket {
    /// Origin of the frame
    pub node: Node,
    /// Device protocol family name, when resolvable
    pub protocol: Option<String>,
    /// Device id
    pub id: Option<String>,
    /// Sub-switch / channel of the device
    pub switch: Option<String>,
    /// Device address, for protocols addressed rather than identified
    pub address: Option<String>,
    /// Platform events from this packet belong to
    pub platform: Option<Platform>,
    /// Identity that overrides the derived one for every event of the packet
    pub force_id: Option<String>,
    /// Semantic fields keyed by abbreviation
    pub fields: BTreeMap<String, FieldValue>,
    /// Units keyed by field abbreviation
    pub units: BTreeMap<String, String>,
    /// Composite members keyed by element name
    pub elements: BTreeMap<String, Element>,
}

impl DecodedPacket {
    /// Create an empty packet for the given source
    pub fn new(node: Node) -> Self {
        Self {
            node,
            protocol: None,
            id: None,
            switch: None,
            address: None,
            platform: None,
            force_id: None,
            fields: BTreeMap::new(),
            units: BTreeMap::new(),
            elements: BTreeMap::new(),
        }
    }

    /// Set the protocol family name
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Set the device id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the sub-switch
    pub fn with_switch(mut self, switch: impl Into<String>) -> Self {
        self.switch = Some(switch.into());
        self
    }

    /// Set the platform of the packet's events
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Name every event of the packet after `id`
    pub fn with_force_id(mut self, id: impl Into<String>) -> Self {
        self.force_id = Some(id.into());
        self
    }

    /// Set a semantic field by abbreviation
    pub fn set_field(&mut self, abbrev: &str, value: impl Into<FieldValue>) {
        self.fields.insert(abbrev.to_string(), value.into());
    }

    /// Set the unit of a semantic field
    pub fn set_unit(&mut self, abbrev: &str, unit: impl Into<String>) {
        let unit = unit.into();
        if !unit.is_empty() {
            self.units.insert(abbrev.to_string(), unit);
        }
    }

    /// Add a composite member
    pub fn insert_element(&mut self, key: impl Into<String>, element: Element) {
        self.elements.insert(key.into(), element);
    }

    /// Device identity carried by this packet
    ///
    /// The address stays on the packet; it is not part of the key.
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            protocol: self.protocol.clone().unwrap_or_default(),
            id: self.id.clone(),
            switch: self.switch.clone(),
            address: None,
        }
    }

    /// Serialized identity key (`protocol_id_switch`, absent parts skipped)
    pub fn identity_key(&self) -> String {
        self.identity().serialize()
    }
}
