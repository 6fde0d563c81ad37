//! Classification of inbound lines.
//!
//! Mirrors the firmware's message conventions: a handful of prefixed status
//! messages, scan markers, and everything else treated as telemetry.

use crate::protocol::settings::{
    CURRENT_SETTINGS_PREFIX, Settings, WIFI_STATUS_PREFIX, WifiNetwork, WifiStatus,
};
use crate::protocol::telemetry::TelemetryFrame;

/// Wire prefix of a firmware version response.
pub const FIRMWARE_VERSION_PREFIX: &str = "FIRMWARE_VERSION:";

/// One inbound line, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Full settings dump (`CURRENT_SETTINGS:`).
    Settings(Settings),
    /// A settings write was accepted (`SETTINGS_OK`).
    SettingsOk,
    /// A settings write was rejected (`SETTINGS_ERROR`).
    SettingsError,
    /// Device-side debug chatter (`DEBUG:`), payload preserved.
    Debug(String),
    /// Wi-Fi connection state (`WIFI_STATUS:`).
    WifiStatus(WifiStatus),
    /// Wi-Fi scan is starting (`WIFI_SCAN_START`).
    WifiScanStart,
    /// One scanned access point (`SSID: ..., RSSI: ...`).
    WifiNetwork(WifiNetwork),
    /// Wi-Fi scan finished (`WIFI_SCAN_END`).
    WifiScanEnd,
    /// Firmware version response (`FIRMWARE_VERSION:`), payload preserved.
    FirmwareVersion(String),
    /// Anything else: free-form telemetry, possibly with labelled fields.
    Telemetry {
        /// The raw line as received.
        raw: String,
        /// Fields extracted from it (may be empty).
        frame: TelemetryFrame,
    },
}

impl DeviceEvent {
    /// Classify one trimmed inbound line.
    #[must_use]
    pub fn classify(line: &str) -> Self {
        if line.starts_with(CURRENT_SETTINGS_PREFIX) {
            // Prefix checked above, parse cannot fail on it
            if let Ok(settings) = Settings::parse(line) {
                return Self::Settings(settings);
            }
        }
        if line == "SETTINGS_OK" {
            return Self::SettingsOk;
        }
        if line == "SETTINGS_ERROR" {
            return Self::SettingsError;
        }
        if let Some(payload) = line.strip_prefix("DEBUG:") {
            return Self::Debug(payload.trim().to_string());
        }
        if line.starts_with(WIFI_STATUS_PREFIX) {
            if let Ok(status) = WifiStatus::parse(line) {
                return Self::WifiStatus(status);
            }
        }
        if line == "WIFI_SCAN_START" {
            return Self::WifiScanStart;
        }
        if line == "WIFI_SCAN_END" {
            return Self::WifiScanEnd;
        }
        if let Some(net) = WifiNetwork::parse(line) {
            return Self::WifiNetwork(net);
        }
        if let Some(version) = line.strip_prefix(FIRMWARE_VERSION_PREFIX) {
            return Self::FirmwareVersion(version.trim().to_string());
        }

        Self::Telemetry {
            raw: line.to_string(),
            frame: TelemetryFrame::parse(line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::settings::SettingValue;

    #[test]
    fn test_classify_settings_dump() {
        match DeviceEvent::classify("CURRENT_SETTINGS:fanMax=85") {
            DeviceEvent::Settings(s) => {
                assert_eq!(s.get("fanMax"), Some(&SettingValue::Int(85)));
            },
            other => panic!("expected Settings, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_acks_and_debug() {
        assert_eq!(DeviceEvent::classify("SETTINGS_OK"), DeviceEvent::SettingsOk);
        assert_eq!(
            DeviceEvent::classify("SETTINGS_ERROR"),
            DeviceEvent::SettingsError
        );
        assert_eq!(
            DeviceEvent::classify("DEBUG: glow plug on"),
            DeviceEvent::Debug("glow plug on".to_string())
        );
    }

    #[test]
    fn test_classify_wifi_messages() {
        assert_eq!(
            DeviceEvent::classify("WIFI_SCAN_START"),
            DeviceEvent::WifiScanStart
        );
        assert_eq!(
            DeviceEvent::classify("WIFI_SCAN_END"),
            DeviceEvent::WifiScanEnd
        );
        match DeviceEvent::classify("SSID: shed, RSSI: -70") {
            DeviceEvent::WifiNetwork(net) => {
                assert_eq!(net.ssid, "shed");
                assert_eq!(net.rssi, -70);
            },
            other => panic!("expected WifiNetwork, got {other:?}"),
        }
        match DeviceEvent::classify("WIFI_STATUS:state=idle") {
            DeviceEvent::WifiStatus(status) => assert_eq!(status.get("state"), Some("idle")),
            other => panic!("expected WifiStatus, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_firmware_version() {
        assert_eq!(
            DeviceEvent::classify("FIRMWARE_VERSION: 3.2.1"),
            DeviceEvent::FirmwareVersion("3.2.1".to_string())
        );
    }

    #[test]
    fn test_everything_else_is_telemetry() {
        match DeviceEvent::classify("ETmp: 120 St: 2") {
            DeviceEvent::Telemetry { raw, frame } => {
                assert_eq!(raw, "ETmp: 120 St: 2");
                assert_eq!(frame.exhaust_temp.as_deref(), Some("120"));
            },
            other => panic!("expected Telemetry, got {other:?}"),
        }
    }
}
