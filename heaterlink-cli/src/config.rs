//! Configuration file support for heaterlink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (HEATERLINK_*)
//! 3. Local config file (./heaterlink.toml)
//! 4. Global config file (~/.config/heaterlink/config.toml)

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Device connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Preferred serial port (e.g., "/dev/rfcomm0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
    /// Known USB devices for auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// OTA transfer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OtaSection {
    /// Per-phase response timeout in seconds (default: 15).
    pub response_timeout_secs: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Device connection configuration.
    #[serde(default)]
    pub device: DeviceConfig,
    /// OTA transfer configuration.
    #[serde(default)]
    pub ota: OtaSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global_config) = Self::load_from_file(&global_path) {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global_config);
                }
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new("heaterlink.toml")) {
            debug!("Loaded local config from heaterlink.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "heaterlink").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.device.port.is_some() {
            self.device.port = other.device.port;
        }
        if other.device.baud.is_some() {
            self.device.baud = other.device.baud;
        }
        self.device.usb_device.extend(other.device.usb_device);

        if other.ota.response_timeout_secs.is_some() {
            self.ota.response_timeout_secs = other.ota.response_timeout_secs;
        }
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };

        // Don't add duplicates
        if self.device.usb_device.contains(&device) {
            return Ok(());
        }

        // Save next to an existing local config, otherwise globally
        let path = if Path::new("heaterlink.toml").exists() {
            PathBuf::from("heaterlink.toml")
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from("heaterlink.toml")
        };

        self.device.usb_device.push(device);

        let content = toml::to_string_pretty(&self)?;
        fs::write(&path, content)?;
        info!("Saved USB device to {}", path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.device.port.is_none());
        assert!(config.device.baud.is_none());
        assert!(config.device.usb_device.is_empty());
        assert!(config.ota.response_timeout_secs.is_none());
    }

    // ---- UsbDevice ----

    #[test]
    fn test_usb_device_matches() {
        let device = UsbDevice {
            vid: 0x1A86,
            pid: 0x7523,
        };
        assert!(device.matches(0x1A86, 0x7523));
        assert!(!device.matches(0x1A86, 0x7522));
        assert!(!device.matches(0x10C4, 0x7523));
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_port_and_baud() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.device.port = Some("/dev/rfcomm0".to_string());
        other.device.baud = Some(115200);

        base.merge(other);

        assert_eq!(base.device.port.as_deref(), Some("/dev/rfcomm0"));
        assert_eq!(base.device.baud, Some(115200));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.device.port = Some("/dev/rfcomm0".to_string());
        base.ota.response_timeout_secs = Some(30);

        let other = Config::default(); // all None
        base.merge(other);

        assert_eq!(base.device.port.as_deref(), Some("/dev/rfcomm0"));
        assert_eq!(base.ota.response_timeout_secs, Some(30));
    }

    #[test]
    fn test_config_merge_usb_devices_extend() {
        let mut base = Config::default();
        base.device.usb_device.push(UsbDevice {
            vid: 0x1A86,
            pid: 0x7523,
        });

        let mut other = Config::default();
        other.device.usb_device.push(UsbDevice {
            vid: 0x10C4,
            pid: 0xEA60,
        });

        base.merge(other);
        assert_eq!(base.device.usb_device.len(), 2);
    }

    // ---- TOML serialization/deserialization ----

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[device]
port = "/dev/rfcomm0"
baud = 9600

[[device.usb_device]]
vid = 6790
pid = 29987

[ota]
response_timeout_secs = 20
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.device.port.as_deref(), Some("/dev/rfcomm0"));
        assert_eq!(config.device.baud, Some(9600));
        assert_eq!(config.device.usb_device.len(), 1);
        assert_eq!(config.device.usb_device[0].vid, 6790);
        assert_eq!(config.ota.response_timeout_secs, Some(20));
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.device.port.is_none());
        assert!(config.device.usb_device.is_empty());
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let mut config = Config::default();
        config.device.port = Some("COM3".to_string());
        config.device.baud = Some(38400);
        config.ota.response_timeout_secs = Some(25);
        config.device.usb_device.push(UsbDevice {
            vid: 0x1A86,
            pid: 0x7523,
        });

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(deserialized.device.port.as_deref(), Some("COM3"));
        assert_eq!(deserialized.device.baud, Some(38400));
        assert_eq!(deserialized.ota.response_timeout_secs, Some(25));
        assert_eq!(deserialized.device.usb_device.len(), 1);
    }

    // ---- load_from_path ----

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_config.toml");
        fs::write(
            &path,
            r#"
[device]
port = "/dev/rfcomm1"
[ota]
response_timeout_secs = 45
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.device.port.as_deref(), Some("/dev/rfcomm1"));
        assert_eq!(config.ota.response_timeout_secs, Some(45));
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        // Should return default
        assert!(config.device.port.is_none());
    }

    // ---- global paths ----

    #[test]
    fn test_global_config_path_is_some() {
        // On most systems this should return Some
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_str().unwrap().contains("heaterlink"));
            assert!(p.to_str().unwrap().ends_with("config.toml"));
        }
    }
}
