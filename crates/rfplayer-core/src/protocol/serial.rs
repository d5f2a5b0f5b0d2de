//! Serial port discovery
//!
//! Lists candidate ports for the transceiver. The dongle enumerates as a USB
//! serial adapter (FTDI), so USB ports are listed first.

use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;

/// FTDI vendor id used by the transceiver's USB bridge
const FTDI_VID: u16 = 0x0403;

/// An available serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Port name (e.g. "/dev/ttyUSB0" or "COM3")
    pub name: String,
    /// USB vendor id
    pub vid: Option<u16>,
    /// USB product id
    pub pid: Option<u16>,
    /// USB manufacturer string
    pub manufacturer: Option<String>,
    /// USB product string
    pub product: Option<String>,
    /// USB serial number
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// Whether the port sits behind the USB bridge the transceiver ships with
    pub fn is_probable_transceiver(&self) -> bool {
        self.vid == Some(FTDI_VID)
            || self
                .product
                .as_deref()
                .is_some_and(|p| p.to_ascii_lowercase().contains("rfplayer"))
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
                serial_number: usb.serial_number,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Ordering: ttyUSB* numerically, then ttyACM* numerically, then the rest by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        return (0, rest.parse().unwrap_or(usize::MAX), basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        return (1, rest.parse().unwrap_or(usize::MAX), basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List available serial ports in a deterministic order
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let port = PortInfo::from(info);
        ports.entry(port.name.clone()).or_insert(port);
    }

    // udev may lag behind the device nodes
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyUSB") || fname.starts_with("ttyACM") {
                    let full = format!("/dev/{}", fname);
                    ports
                        .entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut ports: Vec<PortInfo> = ports.into_values().collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_list_ports_does_not_panic() {
        for port in list_ports() {
            assert!(!port.name.is_empty());
        }
    }

    #[test]
    fn test_port_sorting() {
        let mut ports: Vec<PortInfo> = [
            "/dev/ttyACM0",
            "/dev/ttyUSB10",
            "/dev/ttyS0",
            "/dev/ttyUSB1",
            "/dev/ttyUSB0",
        ]
        .into_iter()
        .map(|n| PortInfo::bare(n.to_string()))
        .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();
        assert_eq!(
            ordered,
            vec![
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyUSB10",
                "/dev/ttyACM0",
                "/dev/ttyS0",
            ]
        );
    }

    #[test]
    fn test_probable_transceiver() {
        let mut port = PortInfo::bare("/dev/ttyUSB0".into());
        assert!(!port.is_probable_transceiver());
        port.vid = Some(0x0403);
        assert!(port.is_probable_transceiver());

        let mut port = PortInfo::bare("COM4".into());
        port.product = Some("RFPlayer RFP1000".into());
        assert!(port.is_probable_transceiver());
    }
}
