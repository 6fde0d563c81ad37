//! Device protocol: command rendering and response parsing.
//!
//! The controller firmware speaks a plain-text line protocol. Outbound
//! commands are single uppercase words, optionally with a `:`-separated
//! payload. Inbound lines are either prefixed status messages
//! (`CURRENT_SETTINGS:`, `WIFI_STATUS:`, `DEBUG:`, ...) or free-form
//! telemetry with labelled fields scattered through the line.

pub mod command;
pub mod event;
pub mod settings;
pub mod telemetry;

pub use command::Command;
pub use event::DeviceEvent;
pub use settings::{SettingValue, Settings, WifiNetwork, WifiStatus};
pub use telemetry::{PowerState, TelemetryFrame};
