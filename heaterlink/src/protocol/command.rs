//! Typed commands and their wire representation.

use std::fmt;

/// A command understood by the heater controller firmware.
///
/// Each variant renders to exactly one wire line (without the trailing
/// newline, which the link layer appends).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Request the full settings dump (`CURRENT_SETTINGS:` response).
    GetSettings,
    /// Request the firmware version string.
    GetFirmwareVersion,
    /// Toggle the heater on/off (long-press equivalent).
    Enter,
    /// Run the fuel pump for priming.
    Prime,
    /// Clear a latched fault code.
    ClearFault,
    /// Raise the temperature/power setpoint.
    Up,
    /// Lower the temperature/power setpoint.
    Down,
    /// Write one setting (`SET:key=value`).
    Set {
        /// Setting key as shown in `CURRENT_SETTINGS:`.
        key: String,
        /// New value, already rendered as text.
        value: String,
    },
    /// Restore all settings to firmware defaults.
    ResetSettings,
    /// Query the device's Wi-Fi connection state.
    GetWifiStatus,
    /// Start an access point scan on the device.
    ScanWifi,
    /// Join an access point.
    ConnectWifi {
        /// Network name.
        ssid: String,
        /// Network password (may be empty for open networks).
        password: String,
    },
    /// Forget stored Wi-Fi credentials.
    ResetWifi,
    /// Reboot the ESP8266 controller.
    RebootEsp,
    /// Begin a firmware transfer.
    StartOta,
    /// Mark the end of the firmware image.
    EndOta,
    /// Apply the received firmware image.
    ApplyOta,
    /// Abort an in-flight firmware transfer.
    CancelOta,
}

impl Command {
    /// Render the wire line for this command.
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self {
            Self::GetSettings => "GET_SETTINGS".to_string(),
            Self::GetFirmwareVersion => "GET_FIRMWARE_VERSION".to_string(),
            Self::Enter => "ENTER".to_string(),
            Self::Prime => "FP".to_string(),
            Self::ClearFault => "CF".to_string(),
            Self::Up => "UP".to_string(),
            Self::Down => "DOWN".to_string(),
            Self::Set { key, value } => format!("SET:{key}={value}"),
            Self::ResetSettings => "RESET_SETTINGS".to_string(),
            Self::GetWifiStatus => "GET_WIFI_STATUS".to_string(),
            Self::ScanWifi => "SCAN_WIFI".to_string(),
            Self::ConnectWifi { ssid, password } => format!("CONNECT_WIFI:{ssid},{password}"),
            Self::ResetWifi => "RESET_WIFI".to_string(),
            Self::RebootEsp => "REBOOT_ESP".to_string(),
            Self::StartOta => "START_OTA".to_string(),
            Self::EndOta => "END_OTA".to_string(),
            Self::ApplyOta => "APPLY_OTA".to_string(),
            Self::CancelOta => "CANCEL_OTA".to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands_render_verbatim() {
        assert_eq!(Command::GetSettings.to_wire(), "GET_SETTINGS");
        assert_eq!(Command::Prime.to_wire(), "FP");
        assert_eq!(Command::ClearFault.to_wire(), "CF");
        assert_eq!(Command::RebootEsp.to_wire(), "REBOOT_ESP");
        assert_eq!(Command::CancelOta.to_wire(), "CANCEL_OTA");
    }

    #[test]
    fn test_set_renders_key_value() {
        let cmd = Command::Set {
            key: "pumpHz".to_string(),
            value: "2.5".to_string(),
        };
        assert_eq!(cmd.to_wire(), "SET:pumpHz=2.5");
    }

    #[test]
    fn test_connect_wifi_renders_ssid_and_password() {
        let cmd = Command::ConnectWifi {
            ssid: "garage".to_string(),
            password: "hunter2".to_string(),
        };
        assert_eq!(cmd.to_wire(), "CONNECT_WIFI:garage,hunter2");
    }

    #[test]
    fn test_display_matches_wire() {
        assert_eq!(Command::StartOta.to_string(), "START_OTA");
    }
}
