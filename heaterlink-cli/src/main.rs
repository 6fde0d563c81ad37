//! heaterlink CLI - companion tool for ESP8266 diesel-heater controllers.
//!
//! ## Features
//!
//! - Live telemetry monitor with command forwarding
//! - Heater control (on/off, setpoint, priming, fault clearing)
//! - Settings round-trip (get/set/reset)
//! - Device Wi-Fi management
//! - OTA firmware transfer from a local file or URL
//! - Interactive serial port selection
//! - Shell completion generation

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use console::style;
use env_logger::Env;
use heaterlink::{HeaterLink, LinkEvent, NativePort, SerialConfig};
use log::debug;
use std::env;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::time::Duration;

mod commands;
mod config;
mod serial;

use commands::control::{cmd_control, cmd_reboot, cmd_version};
use commands::flash::cmd_flash;
use commands::monitor::cmd_monitor;
use commands::settings::cmd_settings;
use commands::wifi::cmd_wifi;
use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Global interrupt flag set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Whether Ctrl-C was pressed since startup (or since the last clear).
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

pub(crate) fn clear_interrupted_flag() {
    INTERRUPTED.store(false, Ordering::Relaxed);
}

/// Errors that carry a specific CLI exit code.
#[derive(Debug)]
pub(crate) enum CliError {
    /// Wrong invocation or unusable environment (exit 2).
    Usage(String),
    /// Operation cancelled by the user (exit 130).
    Cancelled(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage(msg) | Self::Cancelled(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for CliError {}

/// heaterlink - control and flash diesel-heater ESP8266 controllers.
///
/// Environment variables:
///   HEATERLINK_PORT             - Default serial port
///   HEATERLINK_BAUD             - Default baud rate (default: 9600)
///   HEATERLINK_NON_INTERACTIVE  - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "heaterlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "HEATERLINK_PORT")]
    port: Option<String>,

    /// Baud rate of the Bluetooth SPP module or UART bridge.
    #[arg(
        short,
        long,
        global = true,
        default_value = "9600",
        env = "HEATERLINK_BAUD"
    )]
    baud: u32,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "HEATERLINK_NON_INTERACTIVE")]
    non_interactive: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Heater control actions.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub(crate) enum ControlAction {
    /// Toggle the heater on/off.
    Enter,
    /// Run the fuel pump for priming.
    Prime,
    /// Clear a latched fault code.
    ClearFault,
    /// Raise the setpoint.
    Up,
    /// Lower the setpoint.
    Down,
}

/// Settings subcommands.
#[derive(Subcommand)]
pub(crate) enum SettingsAction {
    /// Fetch and display the current settings.
    Get {
        /// Output settings as JSON to stdout.
        #[arg(long)]
        json: bool,
    },
    /// Write one or more settings (format: key=value).
    Set {
        /// Settings to write.
        #[arg(required = true, value_name = "KEY=VALUE")]
        pairs: Vec<String>,
    },
    /// Restore all settings to firmware defaults.
    Reset {
        /// Skip the confirmation prompt.
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

/// Wi-Fi subcommands.
#[derive(Subcommand)]
pub(crate) enum WifiAction {
    /// Show the device's Wi-Fi connection state.
    Status {
        /// Output status as JSON to stdout.
        #[arg(long)]
        json: bool,
    },
    /// Scan for access points from the device.
    Scan {
        /// Output scan results as JSON to stdout.
        #[arg(long)]
        json: bool,
    },
    /// Join an access point.
    Connect {
        /// Network name.
        ssid: String,
        /// Network password (prompted if omitted).
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget stored Wi-Fi credentials.
    Reset,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Watch live telemetry and forward typed commands.
    Monitor {
        /// Print raw lines instead of parsed telemetry.
        #[arg(long)]
        raw: bool,

        /// Prefix each line with a timestamp.
        #[arg(long)]
        timestamps: bool,

        /// Disable keyboard input forwarding.
        #[arg(long)]
        no_input: bool,
    },

    /// Send a heater control command.
    Control {
        /// The action to perform.
        #[arg(value_enum)]
        action: ControlAction,
    },

    /// Read or write controller settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Manage the device's Wi-Fi connection.
    Wifi {
        #[command(subcommand)]
        action: WifiAction,
    },

    /// Transfer a firmware image to the controller (OTA).
    Flash {
        /// Path to the firmware .bin file.
        #[arg(required_unless_present = "url")]
        firmware: Option<PathBuf>,

        /// Download the firmware from a URL instead.
        #[arg(long, conflicts_with = "firmware")]
        url: Option<String>,

        /// Skip the confirmation prompt.
        #[arg(long, short = 'y')]
        yes: bool,

        /// Per-phase response timeout in seconds.
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Query the controller firmware version.
    Version,

    /// Reboot the ESP8266 controller.
    Reboot,

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            exit_code_for(&err)
        },
    };
    std::process::exit(exit_code);
}

/// Map an error to the CLI exit-code contract:
/// 1 generic, 2 usage, 4 device not reachable, 130 cancelled.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    if let Some(lib_err) = err.downcast_ref::<heaterlink::Error>() {
        return match lib_err {
            heaterlink::Error::NotConnected | heaterlink::Error::Serial(_) => 4,
            heaterlink::Error::Cancelled(_) => 130,
            _ => 1,
        };
    }
    1
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // --- NO_COLOR and TTY detection (clig.dev best practice) ---
    let stderr_is_tty = console::Term::stderr().is_term();
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "heaterlink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // Ctrl-C sets the flag; long-running library loops poll it
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    heaterlink::set_interrupt_checker(was_interrupted);

    // Load configuration
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Monitor {
            raw,
            timestamps,
            no_input,
        } => cmd_monitor(&cli, &mut config, *raw, *timestamps, *no_input),
        Commands::Control { action } => cmd_control(&cli, &mut config, *action),
        Commands::Settings { action } => cmd_settings(&cli, &mut config, action),
        Commands::Wifi { action } => cmd_wifi(&cli, &mut config, action),
        Commands::Flash {
            firmware,
            url,
            yes,
            timeout,
        } => cmd_flash(&cli, &mut config, firmware.as_deref(), url.as_deref(), *yes, *timeout),
        Commands::Version => cmd_version(&cli, &mut config),
        Commands::Reboot => cmd_reboot(&cli, &mut config),
        Commands::ListPorts { json } => {
            cmd_list_ports(*json);
            Ok(())
        },
        Commands::Completions { shell } => {
            cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Get serial port from CLI args, config or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;

    // Offer to remember unknown USB bridges in interactive mode
    if !selected.is_known && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

/// Open the heater link on the selected port.
pub(crate) fn open_link(
    cli: &Cli,
    config: &mut Config,
) -> Result<(HeaterLink<NativePort>, Receiver<LinkEvent>)> {
    let port = get_port(cli, config)?;
    // CLI flag wins; the config baud only fills in when the flag is left at
    // its default.
    let baud = if cli.baud == heaterlink::DEFAULT_BAUD {
        config.device.baud.unwrap_or(cli.baud)
    } else {
        cli.baud
    };

    if !cli.quiet {
        eprintln!(
            "{} Connecting to {} at {} baud",
            style("🔌").cyan(),
            style(&port).green(),
            baud
        );
    }

    let serial_config = SerialConfig::new(&port, baud);
    let (link, events) = HeaterLink::connect(&serial_config)?;
    Ok((link, events))
}

/// Drain link events until `matcher` accepts one, with a deadline.
///
/// Disconnection and Ctrl-C surface as errors; unmatched lines are logged at
/// debug level and skipped.
pub(crate) fn wait_for_event<T>(
    events: &Receiver<LinkEvent>,
    timeout: Duration,
    matcher: impl Fn(&str) -> Option<T>,
) -> Result<T> {
    let deadline = std::time::Instant::now() + timeout;

    loop {
        if was_interrupted() {
            return Err(CliError::Cancelled("interrupted while waiting for the device".to_string()).into());
        }
        if std::time::Instant::now() >= deadline {
            anyhow::bail!(
                "no response from the device within {:.1}s",
                timeout.as_secs_f64()
            );
        }

        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(LinkEvent::Line(line)) => {
                if let Some(value) = matcher(&line) {
                    return Ok(value);
                }
                debug!("Skipping line while waiting: {line}");
            },
            Ok(LinkEvent::Disconnected(reason)) => {
                anyhow::bail!("connection lost: {reason}");
            },
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {},
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                anyhow::bail!("connection closed");
            },
        }
    }
}

/// List available serial ports.
fn cmd_list_ports(json: bool) {
    let ports = heaterlink::detect_ports();

    if json {
        let list: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "kind": p.kind.name(),
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&list).unwrap_or_else(|_| "[]".to_string())
        );
        return;
    }

    if ports.is_empty() {
        eprintln!("{} No serial ports found", style("⚠").yellow());
        eprintln!(
            "  {}",
            style("Bind the heater's Bluetooth module first, e.g.: rfcomm bind 0 <bdaddr>").dim()
        );
        return;
    }

    eprintln!(
        "{} Found {} serial port(s):",
        style("ℹ").blue(),
        ports.len()
    );
    for port in &ports {
        let kind = if port.kind.is_known() {
            format!(" [{}]", style(port.kind.name()).yellow())
        } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_ref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();
        eprintln!("    {} {}{kind}{product}", style("•").dim(), port.name);
    }
}

/// Generate shell completions to stdout.
fn cmd_completions(shell: Shell) {
    let mut app = Cli::command();
    let name = app.get_name().to_string();
    generate(shell, &mut app, name, &mut io::stdout());
}
