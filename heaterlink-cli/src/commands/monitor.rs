//! Live telemetry monitor.
//!
//! The reader thread inside the link delivers framed lines over a channel;
//! this command prints them and, when a terminal is attached, forwards typed
//! command lines to the device (crossterm raw mode).

use std::io::{self, IsTerminal, Write as _};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use console::style;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal;
use heaterlink::{DeviceEvent, HeaterLink, LinkEvent, NativePort};

use crate::config::Config;
use crate::{Cli, clear_interrupted_flag, open_link, was_interrupted};

/// RAII guard to restore terminal mode on drop.
struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Wall-clock `[HH:MM:SS]` prefix (UTC).
fn timestamp_prefix() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    let (h, m, s) = (secs / 3600 % 24, secs / 60 % 60, secs % 60);
    format!("[{h:02}:{m:02}:{s:02}] ")
}

pub(crate) fn cmd_monitor(
    cli: &Cli,
    config: &mut Config,
    raw: bool,
    timestamps: bool,
    no_input: bool,
) -> Result<()> {
    let (mut link, events) = open_link(cli, config)?;

    let interactive =
        !no_input && io::stdin().is_terminal() && io::stderr().is_terminal();

    if !cli.quiet {
        eprintln!(
            "{} Monitoring {} (Ctrl-C to exit{})",
            style("📡").cyan(),
            style(link.name()).green(),
            if interactive {
                ", type a command and press Enter to send it"
            } else {
                ""
            }
        );
    }

    let result = if interactive {
        terminal::enable_raw_mode()?;
        let _raw_guard = RawModeGuard;
        run_interactive(&mut link, &events, raw, timestamps)
    } else {
        run_plain(&events, raw, timestamps)
    };

    link.disconnect()?;
    if was_interrupted() {
        clear_interrupted_flag();
    }
    if !cli.quiet {
        eprintln!("{} Monitor closed", style("👋").cyan());
    }
    result
}

/// Non-interactive loop: print lines until disconnect or Ctrl-C.
fn run_plain(events: &Receiver<LinkEvent>, raw: bool, timestamps: bool) -> Result<()> {
    loop {
        if was_interrupted() {
            return Ok(());
        }
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(LinkEvent::Line(line)) => {
                println!("{}", render_line(&line, raw, timestamps));
                io::stdout().flush().ok();
            },
            Ok(LinkEvent::Disconnected(reason)) => {
                anyhow::bail!("connection lost: {reason}");
            },
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {},
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

/// Raw-mode loop: interleave link events with keyboard input. Typed
/// characters build a command line; Enter sends it.
fn run_interactive(
    link: &mut HeaterLink<NativePort>,
    events: &Receiver<LinkEvent>,
    raw: bool,
    timestamps: bool,
) -> Result<()> {
    let mut input = String::new();

    loop {
        if was_interrupted() {
            return Ok(());
        }

        // Drain pending device lines first
        loop {
            match events.try_recv() {
                Ok(LinkEvent::Line(line)) => {
                    // Clear the input echo, print the line, restore the echo
                    let rendered = render_line(&line, raw, timestamps);
                    eprint!("\r\x1b[2K{rendered}\r\n");
                    if !input.is_empty() {
                        eprint!("> {input}");
                    }
                    io::stderr().flush().ok();
                },
                Ok(LinkEvent::Disconnected(reason)) => {
                    eprint!("\r\x1b[2K");
                    anyhow::bail!("connection lost: {reason}");
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }

        // Then poll the keyboard
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(KeyEvent {
                code, modifiers, ..
            }) = event::read()?
            {
                match (code, modifiers) {
                    (KeyCode::Char('c'), KeyModifiers::CONTROL) => return Ok(()),
                    (KeyCode::Enter, _) => {
                        if !input.is_empty() {
                            let command = std::mem::take(&mut input);
                            eprint!("\r\x1b[2K");
                            io::stderr().flush().ok();
                            if let Err(e) = link.send_line(&command) {
                                eprint!(
                                    "{} failed to send {command}: {e}\r\n",
                                    style("⚠").yellow()
                                );
                            }
                        }
                    },
                    (KeyCode::Backspace, _) => {
                        if input.pop().is_some() {
                            eprint!("\r\x1b[2K> {input}");
                            io::stderr().flush().ok();
                        }
                    },
                    (KeyCode::Char(c), KeyModifiers::NONE | KeyModifiers::SHIFT) => {
                        input.push(c);
                        eprint!("\r\x1b[2K> {input}");
                        io::stderr().flush().ok();
                    },
                    (KeyCode::Esc, _) => {
                        input.clear();
                        eprint!("\r\x1b[2K");
                        io::stderr().flush().ok();
                    },
                    _ => {},
                }
            }
        }
    }
}

/// Format one device line for display.
fn render_line(line: &str, raw: bool, timestamps: bool) -> String {
    let prefix = if timestamps {
        style(timestamp_prefix()).dim().to_string()
    } else {
        String::new()
    };

    if raw {
        return format!("{prefix}{line}");
    }

    let body = match DeviceEvent::classify(line) {
        DeviceEvent::Debug(msg) => style(format!("DEBUG: {msg}")).dim().to_string(),
        DeviceEvent::SettingsOk => style(line.to_string()).green().to_string(),
        DeviceEvent::SettingsError => style(line.to_string()).red().to_string(),
        DeviceEvent::Telemetry { raw: text, frame } => {
            // Flag fault codes so they stand out in the stream
            if frame.fault.is_some() {
                style(text).red().bold().to_string()
            } else {
                text
            }
        },
        _ => line.to_string(),
    };

    format!("{prefix}{body}")
}
