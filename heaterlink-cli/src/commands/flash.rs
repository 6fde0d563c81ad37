//! OTA firmware transfer command.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use heaterlink::ota::{self, OtaConfig};
use heaterlink::{FirmwareImage, OTA_CHUNK_SIZE};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::{Cli, CliError, open_link};

pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &mut Config,
    firmware: Option<&Path>,
    url: Option<&str>,
    yes: bool,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let image = load_image(cli, firmware, url)?;

    if !cli.quiet {
        eprintln!(
            "{} Firmware image: {} bytes ({} chunks of {} bytes)",
            style("📦").cyan(),
            image.len(),
            image.len().div_ceil(OTA_CHUNK_SIZE),
            OTA_CHUNK_SIZE
        );
    }

    if !yes {
        if cli.non_interactive {
            return Err(CliError::Usage(
                "flash requires --yes in non-interactive mode".to_string(),
            )
            .into());
        }
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Flash this image to the heater controller?")
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirmed {
            return Err(CliError::Cancelled("flash cancelled".to_string()).into());
        }
    }

    let (mut link, _events) = open_link(cli, config)?;

    let mut ota_config = OtaConfig::default();
    if let Some(secs) = timeout_secs.or(config.ota.response_timeout_secs) {
        ota_config.response_timeout = Duration::from_secs(secs);
    }

    let bar = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(image.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
        );
        bar
    };

    let result = ota::transfer(&mut link, &image, &ota_config, &mut |sent, _total| {
        bar.set_position(sent as u64);
    });

    match result {
        Ok(()) => {
            bar.finish();
            if !cli.quiet {
                eprintln!(
                    "{} Firmware transferred, device is applying it and rebooting",
                    style("✓").green()
                );
            }
            link.disconnect()?;
            Ok(())
        },
        Err(err) => {
            bar.abandon();
            let _ = link.disconnect();
            Err(err).context("firmware transfer failed")
        },
    }
}

fn load_image(cli: &Cli, firmware: Option<&Path>, url: Option<&str>) -> Result<FirmwareImage> {
    if let Some(path) = firmware {
        return FirmwareImage::from_file(path)
            .with_context(|| format!("failed to load firmware from {}", path.display()));
    }

    let url = url.ok_or_else(|| {
        CliError::Usage("flash needs a firmware file or --url".to_string())
    })?;

    if !cli.quiet {
        eprintln!("{} Downloading firmware from {url}", style("🌐").cyan());
    }

    let response = reqwest::blocking::get(url)
        .with_context(|| format!("failed to download firmware from {url}"))?;
    if !response.status().is_success() {
        anyhow::bail!("firmware download failed: HTTP {}", response.status());
    }
    let bytes = response.bytes().context("failed to read firmware download")?;

    FirmwareImage::from_bytes(bytes.to_vec()).context("downloaded firmware is unusable")
}
