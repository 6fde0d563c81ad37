//! Heater control, version query and reboot commands.

use anyhow::{Context, Result};
use console::style;
use heaterlink::{Command, DeviceEvent};

use crate::commands::RESPONSE_TIMEOUT;
use crate::config::Config;
use crate::{Cli, ControlAction, open_link, wait_for_event};

impl ControlAction {
    fn command(self) -> Command {
        match self {
            Self::Enter => Command::Enter,
            Self::Prime => Command::Prime,
            Self::ClearFault => Command::ClearFault,
            Self::Up => Command::Up,
            Self::Down => Command::Down,
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::Enter => "power toggle",
            Self::Prime => "fuel priming",
            Self::ClearFault => "fault clear",
            Self::Up => "setpoint up",
            Self::Down => "setpoint down",
        }
    }
}

/// Send one control command. The firmware does not acknowledge these; the
/// effect shows up in the telemetry stream.
pub(crate) fn cmd_control(cli: &Cli, config: &mut Config, action: ControlAction) -> Result<()> {
    let (mut link, _events) = open_link(cli, config)?;

    link.send_command(&action.command())
        .context("failed to send control command")?;

    if !cli.quiet {
        eprintln!(
            "{} Sent {} command ({})",
            style("✓").green(),
            action.description(),
            action.command()
        );
    }

    link.disconnect()?;
    Ok(())
}

/// Query the controller firmware version.
pub(crate) fn cmd_version(cli: &Cli, config: &mut Config) -> Result<()> {
    let (mut link, events) = open_link(cli, config)?;

    link.send_command(&Command::GetFirmwareVersion)
        .context("failed to send version query")?;

    let version = wait_for_event(&events, RESPONSE_TIMEOUT, |line| {
        match DeviceEvent::classify(line) {
            DeviceEvent::FirmwareVersion(v) => Some(v),
            _ => None,
        }
    })?;

    println!("{version}");

    link.disconnect()?;
    Ok(())
}

/// Reboot the controller. No response is expected; the link goes down as the
/// ESP8266 restarts.
pub(crate) fn cmd_reboot(cli: &Cli, config: &mut Config) -> Result<()> {
    let (mut link, _events) = open_link(cli, config)?;

    link.send_command(&Command::RebootEsp)
        .context("failed to send reboot command")?;

    if !cli.quiet {
        eprintln!("{} Reboot command sent, device is restarting", style("🔄").cyan());
    }

    link.disconnect()?;
    Ok(())
}
