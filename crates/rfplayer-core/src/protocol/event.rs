//! Device events
//!
//! The unit the rest of the gateway acts on. One variant per platform, each
//! carrying only the fields meaningful for it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::packet::FieldValue;

/// Consumer category of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Measurements and detectors
    Sensor,
    /// Remotes and switches
    Command,
    /// Shutters and portals
    Cover,
}

impl Platform {
    /// All routable platforms
    pub const ALL: [Platform; 3] = [Platform::Sensor, Platform::Command, Platform::Cover];

    /// Lowercase name used in event ids
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Sensor => "sensor",
            Platform::Command => "command",
            Platform::Cover => "cover",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sensor" => Ok(Platform::Sensor),
            "command" | "switch" => Ok(Platform::Command),
            "cover" => Ok(Platform::Cover),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}

/// A decoded, routable event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum DeviceEvent {
    /// A measurement or detector state
    Sensor {
        /// Event id
        id: String,
        /// Radio protocol
        protocol: Option<String>,
        /// Full field name
        field: String,
        /// Reported value
        value: FieldValue,
        /// Unit of `value`
        unit: Option<String>,
    },
    /// A button press or on/off command seen on air
    Command {
        /// Event id
        id: String,
        /// Radio protocol
        protocol: Option<String>,
        /// Full field name
        field: String,
        /// Reported value
        value: FieldValue,
    },
    /// A cover (shutter, portal) action
    Cover {
        /// Event id
        id: String,
        /// Radio protocol
        protocol: Option<String>,
        /// Full field name
        field: String,
        /// Reported value
        value: FieldValue,
    },
    /// Traffic with no consumer platform (version strings, status replies)
    Unclassified {
        /// Event id
        id: String,
        /// Radio protocol
        protocol: Option<String>,
        /// Full field name
        field: String,
        /// Reported value
        value: FieldValue,
        /// Unit of `value`
        unit: Option<String>,
    },
}

impl DeviceEvent {
    /// Build the variant matching `platform`; units are kept only where meaningful
    pub fn new(
        platform: Option<Platform>,
        id: String,
        protocol: Option<String>,
        field: impl Into<String>,
        value: FieldValue,
        unit: Option<String>,
    ) -> Self {
        let field = field.into();
        match platform {
            Some(Platform::Sensor) => DeviceEvent::Sensor {
                id,
                protocol,
                field,
                value,
                unit,
            },
            Some(Platform::Command) => DeviceEvent::Command {
                id,
                protocol,
                field,
                value,
            },
            Some(Platform::Cover) => DeviceEvent::Cover {
                id,
                protocol,
                field,
                value,
            },
            None => DeviceEvent::Unclassified {
                id,
                protocol,
                field,
                value,
                unit,
            },
        }
    }

    /// Platform, `None` for unclassified traffic
    pub fn platform(&self) -> Option<Platform> {
        match self {
            DeviceEvent::Sensor { .. } => Some(Platform::Sensor),
            DeviceEvent::Command { .. } => Some(Platform::Command),
            DeviceEvent::Cover { .. } => Some(Platform::Cover),
            DeviceEvent::Unclassified { .. } => None,
        }
    }

    /// Event id consumers are bound to
    pub fn id(&self) -> &str {
        match self {
            DeviceEvent::Sensor { id, .. }
            | DeviceEvent::Command { id, .. }
            | DeviceEvent::Cover { id, .. }
            | DeviceEvent::Unclassified { id, .. } => id,
        }
    }

    /// Radio protocol, when known
    pub fn protocol(&self) -> Option<&str> {
        match self {
            DeviceEvent::Sensor { protocol, .. }
            | DeviceEvent::Command { protocol, .. }
            | DeviceEvent::Cover { protocol, .. }
            | DeviceEvent::Unclassified { protocol, .. } => protocol.as_deref(),
        }
    }

    /// Full semantic field name the event reports
    pub fn field(&self) -> &str {
        match self {
            DeviceEvent::Sensor { field, .. }
            | DeviceEvent::Command { field, .. }
            | DeviceEvent::Cover { field, .. }
            | DeviceEvent::Unclassified { field, .. } => field,
        }
    }

    /// Reported value
    pub fn value(&self) -> &FieldValue {
        match self {
            DeviceEvent::Sensor { value, .. }
            | DeviceEvent::Command { value, .. }
            | DeviceEvent::Cover { value, .. }
            | DeviceEvent::Unclassified { value, .. } => value,
        }
    }

    /// Unit of the value; only sensor and unclassified events carry one
    pub fn unit(&self) -> Option<&str> {
        match self {
            DeviceEvent::Sensor { unit, .. } | DeviceEvent::Unclassified { unit, .. } => {
                unit.as_deref()
            }
            DeviceEvent::Command { .. } | DeviceEvent::Cover { .. } => None,
        }
    }
}
