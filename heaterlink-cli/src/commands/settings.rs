//! Settings get/set/reset command implementations.

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use heaterlink::{Command, DeviceEvent, SettingValue, Settings};

use crate::commands::RESPONSE_TIMEOUT;
use crate::config::Config;
use crate::{Cli, CliError, SettingsAction, open_link, wait_for_event};

pub(crate) fn cmd_settings(cli: &Cli, config: &mut Config, action: &SettingsAction) -> Result<()> {
    match action {
        SettingsAction::Get { json } => cmd_get(cli, config, *json),
        SettingsAction::Set { pairs } => cmd_set(cli, config, pairs),
        SettingsAction::Reset { yes } => cmd_reset(cli, config, *yes),
    }
}

fn fetch_settings(cli: &Cli, config: &mut Config) -> Result<Settings> {
    let (mut link, events) = open_link(cli, config)?;

    link.send_command(&Command::GetSettings)
        .context("failed to request settings")?;

    let settings = wait_for_event(&events, RESPONSE_TIMEOUT, |line| {
        match DeviceEvent::classify(line) {
            DeviceEvent::Settings(s) => Some(s),
            _ => None,
        }
    })?;

    link.disconnect()?;
    Ok(settings)
}

fn cmd_get(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let settings = fetch_settings(cli, config)?;

    if json {
        let map: serde_json::Map<String, serde_json::Value> = settings
            .iter()
            .map(|(key, value)| {
                let v = match value {
                    SettingValue::Int(i) => serde_json::json!(i),
                    SettingValue::Float(f) => serde_json::json!(f),
                    SettingValue::Text(s) => serde_json::json!(s),
                };
                (key.to_string(), v)
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&map).unwrap_or_else(|_| "{}".to_string())
        );
        return Ok(());
    }

    if settings.is_empty() {
        eprintln!("{} The device reported no settings", style("⚠").yellow());
        return Ok(());
    }

    let width = settings.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in settings.iter() {
        println!("{key:width$}  {value}");
    }
    Ok(())
}

/// Split a `key=value` argument, rejecting malformed input as a usage error.
fn parse_pair(pair: &str) -> Result<(&str, &str)> {
    pair.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| CliError::Usage(format!("invalid setting '{pair}', expected KEY=VALUE")).into())
}

fn cmd_set(cli: &Cli, config: &mut Config, pairs: &[String]) -> Result<()> {
    // Validate everything before touching the device
    let parsed: Vec<(&str, &str)> = pairs
        .iter()
        .map(|p| parse_pair(p))
        .collect::<Result<_>>()?;

    let (mut link, events) = open_link(cli, config)?;

    for (key, value) in parsed {
        link.send_command(&Command::Set {
            key: key.to_string(),
            value: value.to_string(),
        })
        .with_context(|| format!("failed to send setting {key}"))?;

        let accepted = wait_for_event(&events, RESPONSE_TIMEOUT, |line| {
            match DeviceEvent::classify(line) {
                DeviceEvent::SettingsOk => Some(true),
                DeviceEvent::SettingsError => Some(false),
                _ => None,
            }
        })?;

        if accepted {
            if !cli.quiet {
                eprintln!("{} {key} = {value}", style("✓").green());
            }
        } else {
            link.disconnect()?;
            anyhow::bail!("the device rejected {key}={value}");
        }
    }

    link.disconnect()?;
    Ok(())
}

fn cmd_reset(cli: &Cli, config: &mut Config, yes: bool) -> Result<()> {
    if !yes {
        if cli.non_interactive {
            return Err(CliError::Usage(
                "settings reset requires --yes in non-interactive mode".to_string(),
            )
            .into());
        }
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Restore ALL settings to firmware defaults?")
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirmed {
            return Err(CliError::Cancelled("settings reset cancelled".to_string()).into());
        }
    }

    let (mut link, events) = open_link(cli, config)?;

    link.send_command(&Command::ResetSettings)
        .context("failed to send settings reset")?;

    // Firmware acknowledges with SETTINGS_OK or a fresh dump
    wait_for_event(&events, RESPONSE_TIMEOUT, |line| {
        match DeviceEvent::classify(line) {
            DeviceEvent::SettingsOk | DeviceEvent::Settings(_) => Some(()),
            _ => None,
        }
    })?;

    if !cli.quiet {
        eprintln!("{} Settings restored to defaults", style("✓").green());
    }

    link.disconnect()?;
    Ok(())
}
