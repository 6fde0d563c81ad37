//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod control;
pub(crate) mod flash;
pub(crate) mod monitor;
pub(crate) mod settings;
pub(crate) mod wifi;

use std::time::Duration;

/// Default deadline for one command/response round-trip.
pub(crate) const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
