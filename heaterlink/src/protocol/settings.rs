//! Settings and Wi-Fi response parsing.
//!
//! Settings travel as one line, `CURRENT_SETTINGS:` followed by
//! comma-separated `key=value` pairs. Values are untyped on the wire; they
//! are decoded as integer, float or text in that order, matching how the
//! firmware prints them. Wi-Fi status uses the same `key=value` shape under
//! the `WIFI_STATUS:` prefix, and scan results arrive one network per line as
//! `SSID: <name>, RSSI: <dbm>`.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Wire prefix of a settings dump line.
pub const CURRENT_SETTINGS_PREFIX: &str = "CURRENT_SETTINGS:";
/// Wire prefix of a Wi-Fi status line.
pub const WIFI_STATUS_PREFIX: &str = "WIFI_STATUS:";

static RE_SCAN_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"SSID: ([^,]+), RSSI: (-?\d+)").expect("hand-written pattern must compile")
});

/// A single decoded setting value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum SettingValue {
    /// Whole number.
    Int(i64),
    /// Decimal number (the wire token contained a `.`).
    Float(f64),
    /// Anything that did not parse as a number.
    Text(String),
}

impl SettingValue {
    /// Decode a raw wire token.
    ///
    /// Tokens with a decimal point are tried as floats, others as integers;
    /// anything else stays text.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.contains('.') {
            if let Ok(f) = raw.parse::<f64>() {
                return Self::Float(f);
            }
        } else if let Ok(i) = raw.parse::<i64>() {
            return Self::Int(i);
        }
        Self::Text(raw.to_string())
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// An ordered settings dump as reported by the controller.
///
/// Order is preserved so a dump can be displayed the way the firmware sent
/// it.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Settings {
    entries: Vec<(String, SettingValue)>,
}

impl Settings {
    /// Parse a `CURRENT_SETTINGS:` line.
    ///
    /// Returns an error when the prefix is missing; pairs without `=` are
    /// skipped like the firmware's occasional trailing garbage.
    pub fn parse(line: &str) -> Result<Self> {
        let payload = line
            .strip_prefix(CURRENT_SETTINGS_PREFIX)
            .ok_or_else(|| Error::Protocol(format!("not a settings dump: {line}")))?;
        Ok(Self::parse_pairs(payload))
    }

    fn parse_pairs(payload: &str) -> Self {
        let mut entries = Vec::new();
        for pair in payload.split(',') {
            if let Some((key, value)) = pair.split_once('=') {
                let key = key.trim();
                if !key.is_empty() {
                    entries.push((key.to_string(), SettingValue::parse(value)));
                }
            }
        }
        Self { entries }
    }

    /// Look up a setting by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Iterate entries in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of settings in the dump.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dump carried no settings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decoded `WIFI_STATUS:` line.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WifiStatus {
    fields: Vec<(String, String)>,
}

impl WifiStatus {
    /// Parse a `WIFI_STATUS:` line.
    pub fn parse(line: &str) -> Result<Self> {
        let payload = line
            .strip_prefix(WIFI_STATUS_PREFIX)
            .ok_or_else(|| Error::Protocol(format!("not a wifi status: {line}")))?;

        let mut fields = Vec::new();
        for pair in payload.split(',') {
            if let Some((key, value)) = pair.split_once('=') {
                fields.push((key.trim().to_string(), value.trim().to_string()));
            }
        }
        Ok(Self { fields })
    }

    /// Look up a field by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate fields in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One access point reported during a Wi-Fi scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WifiNetwork {
    /// Network name.
    pub ssid: String,
    /// Signal strength in dBm.
    pub rssi: i32,
}

impl WifiNetwork {
    /// Parse one `SSID: <name>, RSSI: <dbm>` scan line. Returns `None` for
    /// lines that are not scan results.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let caps = RE_SCAN_LINE.captures(line)?;
        let ssid = caps.get(1)?.as_str().trim().to_string();
        let rssi = caps.get(2)?.as_str().parse().ok()?;
        Some(Self { ssid, rssi })
    }
}
