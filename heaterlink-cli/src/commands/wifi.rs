//! Device Wi-Fi management commands.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Password, theme::ColorfulTheme};
use heaterlink::{Command, DeviceEvent, LinkEvent, WifiNetwork};

use crate::commands::RESPONSE_TIMEOUT;
use crate::config::Config;
use crate::{Cli, CliError, WifiAction, open_link, wait_for_event, was_interrupted};

/// Scans are slow on the ESP8266; give them more room than a plain command.
const SCAN_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn cmd_wifi(cli: &Cli, config: &mut Config, action: &WifiAction) -> Result<()> {
    match action {
        WifiAction::Status { json } => cmd_status(cli, config, *json),
        WifiAction::Scan { json } => cmd_scan(cli, config, *json),
        WifiAction::Connect { ssid, password } => {
            cmd_connect(cli, config, ssid, password.as_deref())
        },
        WifiAction::Reset => cmd_reset(cli, config),
    }
}

fn cmd_status(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let (mut link, events) = open_link(cli, config)?;

    link.send_command(&Command::GetWifiStatus)
        .context("failed to request Wi-Fi status")?;

    let status = wait_for_event(&events, RESPONSE_TIMEOUT, |line| {
        match DeviceEvent::classify(line) {
            DeviceEvent::WifiStatus(s) => Some(s),
            _ => None,
        }
    })?;

    if json {
        let map: serde_json::Map<String, serde_json::Value> = status
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::json!(v)))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&map).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        for (key, value) in status.iter() {
            println!("{key}: {value}");
        }
    }

    link.disconnect()?;
    Ok(())
}

fn cmd_scan(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let (mut link, events) = open_link(cli, config)?;

    if !cli.quiet {
        eprintln!("{} Scanning for access points...", style("📶").cyan());
    }

    link.send_command(&Command::ScanWifi)
        .context("failed to start Wi-Fi scan")?;

    // Collect SSID lines until the end marker or the deadline; the start
    // marker is informational only.
    let mut networks: Vec<WifiNetwork> = Vec::new();
    let deadline = Instant::now() + SCAN_TIMEOUT;
    let mut ended = false;

    while !ended && Instant::now() < deadline {
        if was_interrupted() {
            link.disconnect()?;
            return Err(CliError::Cancelled("scan interrupted".to_string()).into());
        }

        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(LinkEvent::Line(line)) => match DeviceEvent::classify(&line) {
                DeviceEvent::WifiNetwork(net) => networks.push(net),
                DeviceEvent::WifiScanEnd => ended = true,
                _ => {},
            },
            Ok(LinkEvent::Disconnected(reason)) => {
                anyhow::bail!("connection lost during scan: {reason}");
            },
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {},
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                anyhow::bail!("connection closed during scan");
            },
        }
    }

    link.disconnect()?;

    if !ended && networks.is_empty() {
        anyhow::bail!(
            "no scan results within {:.0}s",
            SCAN_TIMEOUT.as_secs_f64()
        );
    }

    // Strongest signal first
    networks.sort_by_key(|n| -n.rssi);

    if json {
        let list: Vec<serde_json::Value> = networks
            .iter()
            .map(|n| serde_json::json!({ "ssid": n.ssid, "rssi": n.rssi }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&list).unwrap_or_else(|_| "[]".to_string())
        );
    } else if networks.is_empty() {
        eprintln!("{} No access points found", style("⚠").yellow());
    } else {
        for net in &networks {
            println!("{:>4} dBm  {}", net.rssi, net.ssid);
        }
    }

    Ok(())
}

fn cmd_connect(
    cli: &Cli,
    config: &mut Config,
    ssid: &str,
    password: Option<&str>,
) -> Result<()> {
    let password = match password {
        Some(p) => p.to_string(),
        None => {
            if cli.non_interactive {
                return Err(CliError::Usage(
                    "wifi connect requires --password in non-interactive mode".to_string(),
                )
                .into());
            }
            Password::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("Password for {ssid}"))
                .allow_empty_password(true)
                .interact()
                .map_err(|_| CliError::Cancelled("password prompt cancelled".to_string()))?
        },
    };

    let (mut link, events) = open_link(cli, config)?;

    link.send_command(&Command::ConnectWifi {
        ssid: ssid.to_string(),
        password,
    })
    .context("failed to send Wi-Fi credentials")?;

    if !cli.quiet {
        eprintln!("{} Connecting the device to {ssid}...", style("📶").cyan());
    }

    // The device reports the outcome via a status line once it settles
    let status = wait_for_event(&events, SCAN_TIMEOUT, |line| {
        match DeviceEvent::classify(line) {
            DeviceEvent::WifiStatus(s) => Some(s),
            _ => None,
        }
    })?;

    for (key, value) in status.iter() {
        println!("{key}: {value}");
    }

    link.disconnect()?;
    Ok(())
}

fn cmd_reset(cli: &Cli, config: &mut Config) -> Result<()> {
    let (mut link, _events) = open_link(cli, config)?;

    link.send_command(&Command::ResetWifi)
        .context("failed to send Wi-Fi reset")?;

    if !cli.quiet {
        eprintln!("{} Stored Wi-Fi credentials cleared", style("✓").green());
    }

    link.disconnect()?;
    Ok(())
}
