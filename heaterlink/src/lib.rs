//! # heaterlink
//!
//! A library for talking to DIY diesel-heater ("Webasto-style") ESP8266
//! controllers over their Bluetooth SPP serial link.
//!
//! The controller speaks a newline-delimited text protocol. This crate
//! provides:
//!
//! - a serial port abstraction (`/dev/rfcomm*` nodes or USB-UART bridges)
//! - a line-framed link with a background reader thread
//! - typed commands and parsers for telemetry, settings and Wi-Fi responses
//! - the OTA firmware transfer state machine
//!
//! ## Features
//!
//! - `serde`: serialization support for parsed protocol types
//!
//! ## Example
//!
//! ```rust,no_run
//! use heaterlink::{Command, DeviceEvent, HeaterLink, LinkEvent, SerialConfig};
//!
//! fn main() -> heaterlink::Result<()> {
//!     let config = SerialConfig::new("/dev/rfcomm0", 9600);
//!     let (mut link, events) = HeaterLink::connect(&config)?;
//!
//!     link.send_command(&Command::GetSettings)?;
//!     for event in events {
//!         match event {
//!             LinkEvent::Line(line) => match DeviceEvent::classify(&line) {
//!                 DeviceEvent::Settings(settings) => {
//!                     for (key, value) in settings.iter() {
//!                         println!("{key} = {value}");
//!                     }
//!                     break;
//!                 },
//!                 _ => {},
//!             },
//!             LinkEvent::Disconnected(reason) => {
//!                 eprintln!("link lost: {reason}");
//!                 break;
//!             },
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod link;
pub mod ota;
pub mod port;
pub mod protocol;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupt_requested() -> bool {
    INTERRUPT_CHECKER.get().is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
pub use {
    error::{Error, Result},
    link::{HeaterLink, LinkEvent, OTA_QUEUE_DEPTH},
    ota::{FirmwareImage, OTA_CHUNK_SIZE, OtaConfig},
    port::{
        DEFAULT_BAUD, NativePort, NativePortEnumerator, Port, PortEnumerator, PortInfo,
        SerialConfig,
        detect::{DetectedPort, LinkKind, auto_detect_port, detect_heater_ports, detect_ports},
    },
    protocol::{
        Command, DeviceEvent, PowerState, SettingValue, Settings, TelemetryFrame, WifiNetwork,
        WifiStatus,
    },
};
