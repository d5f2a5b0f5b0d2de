//! Protocol commands
//!
//! Outgoing device commands and the initialization batch sent to the
//! transceiver right after every (re)connection.

use serde::{Deserialize, Serialize};

use super::COMMAND_PREFIX;

/// A control command addressed to one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingCommand {
    /// Protocol family (e.g. "X10", "RTS")
    pub protocol: String,
    /// Command verb (e.g. "ON", "OFF", "DIM")
    pub command: String,
    /// Device id, preferred over the address when both are set
    pub device_id: Option<String>,
    /// Device address (e.g. "A1" for X10)
    pub device_address: Option<String>,
}

impl OutgoingCommand {
    /// Command verb for a device of `protocol`; the target is set separately
    pub fn new(protocol: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            command: command.into(),
            device_id: None,
            device_address: None,
        }
    }

    /// Target a device by id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.device_id = Some(id.into());
        self
    }

    /// Target a device by house/unit address
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.device_address = Some(address.into());
        self
    }

    /// Id or address, whichever targets the device
    pub fn target(&self) -> Option<&str> {
        self.device_id
            .as_deref()
            .or(self.device_address.as_deref())
            .filter(|t| !t.is_empty())
    }
}

/// Radio options driving the initialization batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioOptions {
    /// Output format requested from the transceiver
    pub format: String,
    /// Protocols excluded from reception
    pub receiver_disable: Option<Vec<String>>,
    /// Protocols excluded from repetition
    pub repeater_disable: Option<Vec<String>>,
    /// Protocols with tracing enabled
    pub trace: Option<Vec<String>>,
    /// Low band frequency (kHz)
    pub freq_l: u32,
    /// High band frequency (kHz)
    pub freq_h: u32,
    /// Low band selectivity
    pub selectivity_l: u32,
    /// High band selectivity
    pub selectivity_h: u32,
    /// Low band sensitivity
    pub sensitivity_l: u32,
    /// High band sensitivity
    pub sensitivity_h: u32,
    /// Low band DSP trigger level
    pub dsptrigger_l: u32,
    /// High band DSP trigger level
    pub dsptrigger_h: u32,
    /// Low band RFLink trigger level
    pub rflinktrigger_l: u32,
    /// High band RFLink trigger level
    pub rflinktrigger_h: u32,
    /// Enable the RFLink decoding layer
    pub rflink: bool,
    /// Listen-before-talk threshold
    pub lbt: u32,
    /// Blink the activity LED
    pub ledactivity: bool,
}

impl Default for RadioOptions {
    fn default() -> Self {
        Self {
            format: "JSON".to_string(),
            receiver_disable: None,
            repeater_disable: None,
            trace: None,
            freq_l: 433920,
            freq_h: 868350,
            selectivity_l: 0,
            selectivity_h: 0,
            sensitivity_l: 4,
            sensitivity_h: 4,
            dsptrigger_l: 8,
            dsptrigger_h: 6,
            rflinktrigger_l: 10,
            rflinktrigger_h: 18,
            rflink: true,
            lbt: 16,
            ledactivity: true,
        }
    }
}

/// Append ` <marker> p1 p2 ...` to a filter command when a list is configured
fn filter_command(base: &str, marker: char, list: Option<&[String]>) -> String {
    let mut command = base.to_string();
    if let Some(list) = list {
        command.push(' ');
        command.push(marker);
        for protocol in list {
            command.push(' ');
            command.push_str(protocol);
        }
    }
    command
}

/// The fixed command batch issued after every connection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InitCommands {
    options: RadioOptions,
}

impl InitCommands {
    /// Batch for the given radio options
    pub fn new(options: RadioOptions) -> Self {
        Self { options }
    }

    /// Commands without the `ZIA++` prefix, in transmission order
    pub fn commands(&self) -> Vec<String> {
        let o = &self.options;
        vec![
            format!("FORMAT {}", o.format),
            filter_command("RECEIVER + *", '-', o.receiver_disable.as_deref()),
            filter_command("REPEATER + *", '-', o.repeater_disable.as_deref()),
            filter_command("TRACE - *", '+', o.trace.as_deref()),
            format!("FREQ L {}", o.freq_l),
            format!("FREQ H {}", o.freq_h),
            format!("SELECTIVITY L {}", o.selectivity_l),
            format!("SELECTIVITY H {}", o.selectivity_h),
            format!("SENSITIVITY L {}", o.sensitivity_l),
            format!("SENSITIVITY H {}", o.sensitivity_h),
            format!("DSPTRIGGER L {}", o.dsptrigger_l),
            format!("DSPTRIGGER H {}", o.dsptrigger_h),
            format!("RFLINKTRIGGER L {}", o.rflinktrigger_l),
            format!("RFLINKTRIGGER H {}", o.rflinktrigger_h),
            format!("RFLINK {}", u8::from(o.rflink)),
            format!("LBT {}", o.lbt),
            format!("LEDACTIVITY {}", u8::from(o.ledactivity)),
            "STATUS JSON".to_string(),
        ]
    }

    /// Wire lines, each prefixed with `ZIA++`
    pub fn lines(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .map(|c| format!("{}{}", COMMAND_PREFIX, c))
            .collect()
    }
}
