//! Serial port auto-discovery for the heater link.
//!
//! The heater controller usually appears as a bound RFCOMM device node
//! (`/dev/rfcomm*` after `rfcomm bind <n> <bdaddr>`). For bench work over a
//! wired connection it shows up behind one of the common USB-to-UART
//! bridges:
//! - CH340/CH341 (VID: 0x1A86)
//! - CP210x (VID: 0x10C4)
//! - FTDI (VID: 0x0403)
//!
//! Auto-detection prefers RFCOMM nodes over USB bridges, since the normal
//! deployment of the controller is the Bluetooth SPP module.

use crate::error::{Error, Result};
use log::{debug, info, trace};

/// Transport classification for a discovered serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Bluetooth RFCOMM device node (SPP link to the heater).
    Rfcomm,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232/FT2232 USB-to-Serial converter.
    Ftdi,
    /// Unknown device.
    Unknown,
}

impl LinkKind {
    /// Classify a port by its USB VID (RFCOMM nodes have none).
    #[must_use]
    pub fn from_vid(vid: u16) -> Self {
        match vid {
            0x1A86 => Self::Ch340,
            0x10C4 => Self::Cp210x,
            0x0403 => Self::Ftdi,
            _ => Self::Unknown,
        }
    }

    /// Get a human-readable name for the transport.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rfcomm => "Bluetooth RFCOMM",
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected transport type.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Detected serial port information.
#[derive(Debug, Clone)]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/rfcomm0" or "COM5").
    pub name: String,
    /// Transport classification.
    pub kind: LinkKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Check if this port plausibly carries the heater link.
    pub fn is_likely_heater(&self) -> bool {
        self.kind.is_known()
    }
}

/// Detect all available serial ports with transport information.
pub fn detect_ports() -> Vec<DetectedPort> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut detected = DetectedPort {
                    name: port_info.port_name.clone(),
                    kind: LinkKind::Unknown,
                    vid: None,
                    pid: None,
                    manufacturer: None,
                    product: None,
                    serial: None,
                };

                if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                    detected.vid = Some(usb_info.vid);
                    detected.pid = Some(usb_info.pid);
                    detected.manufacturer = usb_info.manufacturer;
                    detected.product = usb_info.product;
                    detected.serial = usb_info.serial_number;
                    detected.kind = LinkKind::from_vid(usb_info.vid);

                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, kind: {:?})",
                        port_info.port_name, usb_info.vid, usb_info.pid, detected.kind
                    );
                } else if detected.name.contains("rfcomm") {
                    detected.kind = LinkKind::Rfcomm;
                    trace!("Found RFCOMM port: {}", port_info.port_name);
                }

                result.push(detected);
            }
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
        },
    }

    result
}

/// Detect ports that plausibly carry the heater link.
pub fn detect_heater_ports() -> Vec<DetectedPort> {
    detect_ports()
        .into_iter()
        .filter(DetectedPort::is_likely_heater)
        .collect()
}

/// Auto-detect a single heater port.
///
/// RFCOMM nodes win over USB-UART bridges; an arbitrary port is the last
/// resort.
pub fn auto_detect_port() -> Result<DetectedPort> {
    let ports = detect_ports();

    if let Some(port) = ports.iter().find(|p| p.kind == LinkKind::Rfcomm) {
        info!("Auto-detected Bluetooth RFCOMM link: {}", port.name);
        return Ok(port.clone());
    }

    if let Some(port) = ports.iter().find(|p| p.kind.is_known()) {
        info!(
            "Auto-detected {} USB-UART bridge: {}",
            port.kind.name(),
            port.name
        );
        return Ok(port.clone());
    }

    if let Some(port) = ports.into_iter().next() {
        info!("Using first available port: {}", port.name);
        return Ok(port);
    }

    Err(Error::NotConnected)
}

/// Find a port by name pattern.
pub fn find_port_by_pattern(pattern: &str) -> Result<DetectedPort> {
    let ports = detect_ports();

    ports
        .into_iter()
        .find(|p| p.name.contains(pattern))
        .ok_or(Error::NotConnected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_kind_from_vid() {
        assert_eq!(LinkKind::from_vid(0x1A86), LinkKind::Ch340);
        assert_eq!(LinkKind::from_vid(0x10C4), LinkKind::Cp210x);
        assert_eq!(LinkKind::from_vid(0x0403), LinkKind::Ftdi);
        assert_eq!(LinkKind::from_vid(0x0000), LinkKind::Unknown);
    }

    #[test]
    fn test_link_kind_is_known() {
        assert!(LinkKind::Rfcomm.is_known());
        assert!(LinkKind::Ch340.is_known());
        assert!(LinkKind::Cp210x.is_known());
        assert!(LinkKind::Ftdi.is_known());
        assert!(!LinkKind::Unknown.is_known());
    }

    #[test]
    fn test_detect_ports_does_not_panic() {
        // Just make sure it doesn't panic
        let _ = detect_ports();
    }
}
