//! The line-framed serial link to the heater controller.
//!
//! A [`HeaterLink`] owns the serial port and one background reader thread.
//! The reader performs blocking reads (bounded by the port's short timeout so
//! the stop flag stays responsive), reassembles newline-delimited lines via
//! [`framing::LineFramer`] and delivers each line to exactly one consumer:
//!
//! - the armed OTA tap, while a firmware transfer is in progress, or
//! - the general event channel handed out by [`HeaterLink::start`].
//!
//! Delivery order always matches arrival order. A stream error is reported
//! exactly once as [`LinkEvent::Disconnected`], after which the link is dead
//! and must be reopened.

pub mod framing;

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, SyncSender, TrySendError, channel, sync_channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::{NativePort, Port, SerialConfig};
use crate::protocol::command::Command;
use framing::LineFramer;

/// Prefix of every OTA response line.
pub const OTA_PREFIX: &str = "OTA_";

/// Capacity of the armed OTA response queue.
///
/// The original companion app used a 10-deep blocking queue; responses beyond
/// that are dropped rather than stalling the reader.
pub const OTA_QUEUE_DEPTH: usize = 10;

const READ_BUFFER_SIZE: usize = 1024;

/// Event emitted by the reader thread to the general consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One complete, trimmed, non-empty line from the device.
    Line(String),
    /// The stream failed or was closed. Reported at most once per link.
    Disconnected(String),
}

/// State shared between the link handle and its reader thread.
struct Shared {
    stop: AtomicBool,
    connected: AtomicBool,
    ota_tap: Mutex<Option<SyncSender<String>>>,
}

/// An open, line-framed connection to the heater controller.
pub struct HeaterLink<P: Port> {
    port: P,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
}

impl HeaterLink<NativePort> {
    /// Open the serial port and start the reader thread.
    ///
    /// Returns the link handle plus the receiver for telemetry and status
    /// lines.
    pub fn connect(config: &SerialConfig) -> Result<(Self, Receiver<LinkEvent>)> {
        let port = NativePort::open(config)?;
        let reader = port.try_clone_handle()?;
        debug!("Connected to {} at {} baud", config.port_name, config.baud_rate);
        Ok(Self::start(port, reader))
    }
}

impl<P: Port> HeaterLink<P> {
    /// Start a link over an already-open port and an independent read handle.
    ///
    /// The read handle must honor a read timeout (returning
    /// `ErrorKind::TimedOut` when idle) or the reader thread cannot observe
    /// the stop flag.
    pub fn start<R>(port: P, reader: R) -> (Self, Receiver<LinkEvent>)
    where
        R: Read + Send + 'static,
    {
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            ota_tap: Mutex::new(None),
        });
        let (tx, rx) = channel();

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::spawn(move || read_loop(reader, &thread_shared, &tx));

        (
            Self {
                port,
                shared,
                reader: Some(handle),
            },
            rx,
        )
    }

    /// Whether the link is still usable.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Name of the underlying port.
    pub fn name(&self) -> &str {
        self.port.name()
    }

    /// Send a protocol command as one newline-terminated line.
    pub fn send_command(&mut self, command: &Command) -> Result<()> {
        self.send_line(&command.to_wire())
    }

    /// Send one raw line; a trailing `\n` is appended.
    pub fn send_line(&mut self, line: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        debug!("Sending command: {line}");
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.write_checked(&data)
    }

    /// Send raw bytes without framing (OTA firmware chunks).
    pub fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        trace!("Sending {} raw bytes", data.len());
        self.write_checked(data)
    }

    fn write_checked(&mut self, data: &[u8]) -> Result<()> {
        match self.port.write_all_bytes(data) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Send failed, marking link disconnected: {e}");
                self.shared.connected.store(false, Ordering::Relaxed);
                Err(e)
            },
        }
    }

    /// Arm the OTA tap: until disarmed, `OTA_`-prefixed lines go to the
    /// returned bounded queue instead of the general event channel, and all
    /// other lines are dropped. Arming replaces any previous tap.
    pub fn arm_ota_tap(&self) -> Receiver<String> {
        let (tx, rx) = sync_channel(OTA_QUEUE_DEPTH);
        if let Ok(mut guard) = self.shared.ota_tap.lock() {
            *guard = Some(tx);
        }
        rx
    }

    /// Disarm the OTA tap, restoring delivery to the general channel.
    pub fn disarm_ota_tap(&self) {
        if let Ok(mut guard) = self.shared.ota_tap.lock() {
            guard.take();
        }
    }

    /// Stop the reader thread and close the port.
    pub fn disconnect(&mut self) -> Result<()> {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        self.shared.connected.store(false, Ordering::Relaxed);
        self.port.close()
    }
}

impl<P: Port> Drop for HeaterLink<P> {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

/// Reader-thread body: blocking reads, line reassembly, dispatch.
fn read_loop<R: Read>(mut reader: R, shared: &Shared, events: &Sender<LinkEvent>) {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        if shared.stop.load(Ordering::Relaxed) {
            break;
        }

        match reader.read(&mut buf) {
            Ok(0) => {
                report_disconnect(shared, events, "stream closed by peer");
                break;
            },
            Ok(n) => {
                for line in framer.push(&buf[..n]) {
                    trace!("Line received: {line}");
                    dispatch_line(shared, events, line);
                }
            },
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::Interrupted => {},
            Err(e) => {
                if !shared.stop.load(Ordering::Relaxed) {
                    report_disconnect(shared, events, &format!("read error: {e}"));
                }
                break;
            },
        }
    }
}

fn dispatch_line(shared: &Shared, events: &Sender<LinkEvent>, line: String) {
    let tap_armed = {
        match shared.ota_tap.lock() {
            Ok(guard) => {
                if let Some(tap) = guard.as_ref() {
                    if line.starts_with(OTA_PREFIX) {
                        match tap.try_send(line.clone()) {
                            Ok(()) => {},
                            Err(TrySendError::Full(_)) => {
                                debug!("OTA response queue full, dropping: {line}");
                            },
                            Err(TrySendError::Disconnected(_)) => {
                                debug!("OTA tap receiver gone, dropping: {line}");
                            },
                        }
                    } else {
                        debug!("Dropping non-OTA line while OTA armed: {line}");
                    }
                    true
                } else {
                    false
                }
            },
            Err(_) => false,
        }
    };

    if !tap_armed {
        // Receiver may be gone; the reader keeps draining the stream anyway.
        let _ = events.send(LinkEvent::Line(line));
    }
}

fn report_disconnect(shared: &Shared, events: &Sender<LinkEvent>, reason: &str) {
    if shared.connected.swap(false, Ordering::Relaxed) {
        warn!("Link lost: {reason}");
        // Drop the armed tap sender so an OTA waiter blocked on the queue
        // observes the loss now instead of running out its phase timeout.
        if let Ok(mut guard) = shared.ota_tap.lock() {
            guard.take();
        }
        let _ = events.send(LinkEvent::Disconnected(reason.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Scripted reader: yields chunks in order, then times out forever.
    struct ScriptedReader {
        chunks: VecDeque<Vec<u8>>,
        /// Delay before the first chunk, so the test can arm the tap first.
        settle: Option<Duration>,
        /// Error to yield after the script runs out, instead of timing out.
        final_error: Option<std::io::ErrorKind>,
    }

    impl ScriptedReader {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                settle: None,
                final_error: None,
            }
        }

        fn with_settle_delay(mut self, delay: Duration) -> Self {
            self.settle = Some(delay);
            self
        }

        fn with_final_error(mut self, kind: std::io::ErrorKind) -> Self {
            self.final_error = Some(kind);
            self
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if let Some(delay) = self.settle.take() {
                std::thread::sleep(delay);
            }
            match self.chunks.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                },
                None => {
                    if let Some(kind) = self.final_error.take() {
                        return Err(std::io::Error::new(kind, "scripted failure"));
                    }
                    // Simulate the serial read timeout cadence
                    std::thread::sleep(Duration::from_millis(5));
                    Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "idle"))
                },
            }
        }
    }

    /// Writer-side mock port collecting everything sent.
    struct MockPort {
        written: Vec<u8>,
        timeout: Duration,
    }

    impl MockPort {
        fn new() -> Self {
            Self {
                written: Vec::new(),
                timeout: Duration::from_millis(100),
            }
        }
    }

    impl Read for MockPort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "idle"))
        }
    }

    impl std::io::Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for MockPort {
        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.timeout = timeout;
            Ok(())
        }
        fn timeout(&self) -> Duration {
            self.timeout
        }
        fn clear_buffers(&mut self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            "mock"
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    const RECV_WAIT: Duration = Duration::from_millis(500);

    #[test]
    fn test_lines_delivered_in_arrival_order() {
        let reader = ScriptedReader::new(&[b"ETmp: 120\nFan%", b": 45\n"]);
        let (mut link, rx) = HeaterLink::start(MockPort::new(), reader);

        assert_eq!(
            rx.recv_timeout(RECV_WAIT).unwrap(),
            LinkEvent::Line("ETmp: 120".into())
        );
        assert_eq!(
            rx.recv_timeout(RECV_WAIT).unwrap(),
            LinkEvent::Line("Fan%: 45".into())
        );

        link.disconnect().unwrap();
    }

    #[test]
    fn test_read_error_reports_disconnect_once() {
        let reader = ScriptedReader::new(&[b"I: idle\n"])
            .with_final_error(std::io::ErrorKind::BrokenPipe);
        let (link, rx) = HeaterLink::start(MockPort::new(), reader);

        assert_eq!(
            rx.recv_timeout(RECV_WAIT).unwrap(),
            LinkEvent::Line("I: idle".into())
        );
        match rx.recv_timeout(RECV_WAIT).unwrap() {
            LinkEvent::Disconnected(reason) => assert!(reason.contains("read error")),
            other => panic!("expected Disconnected, got {other:?}"),
        }
        // Reader thread exits; the channel closes without further events.
        assert!(rx.recv_timeout(RECV_WAIT).is_err());
        assert!(!link.is_connected());
    }

    #[test]
    fn test_armed_tap_captures_ota_lines_and_drops_others() {
        let reader = ScriptedReader::new(&[b"OTA_READY\nETmp: 99\nOTA_CHUNK_ACK\n"])
            .with_settle_delay(Duration::from_millis(50));
        let (mut link, rx) = HeaterLink::start(MockPort::new(), reader);

        let tap = link.arm_ota_tap();
        assert_eq!(tap.recv_timeout(RECV_WAIT).unwrap(), "OTA_READY");
        assert_eq!(tap.recv_timeout(RECV_WAIT).unwrap(), "OTA_CHUNK_ACK");
        // Telemetry observed while armed is dropped, not queued
        assert!(rx.try_recv().is_err());

        link.disarm_ota_tap();
        link.disconnect().unwrap();
    }

    #[test]
    fn test_read_error_drops_armed_tap() {
        let reader = ScriptedReader::new(&[b"OTA_READY\n"])
            .with_settle_delay(Duration::from_millis(50))
            .with_final_error(std::io::ErrorKind::BrokenPipe);
        let (link, _rx) = HeaterLink::start(MockPort::new(), reader);

        let tap = link.arm_ota_tap();
        assert_eq!(tap.recv_timeout(RECV_WAIT).unwrap(), "OTA_READY");
        // The stream failure must close the queue, not leave a waiter idling
        assert_eq!(
            tap.recv_timeout(RECV_WAIT),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected)
        );
        assert!(!link.is_connected());
    }

    #[test]
    fn test_tap_overflow_drops_excess_lines() {
        let mut script = Vec::new();
        for i in 0..OTA_QUEUE_DEPTH + 3 {
            script.extend_from_slice(format!("OTA_SEQ_{i:02}\n").as_bytes());
        }
        let reader = ScriptedReader::new(&[script.as_slice()])
            .with_settle_delay(Duration::from_millis(50));
        let (mut link, _rx) = HeaterLink::start(MockPort::new(), reader);

        let tap = link.arm_ota_tap();
        // Let the reader push the whole burst with nobody draining
        std::thread::sleep(Duration::from_millis(300));

        let mut received = Vec::new();
        while let Ok(line) = tap.try_recv() {
            received.push(line);
        }
        let expected: Vec<String> = (0..OTA_QUEUE_DEPTH)
            .map(|i| format!("OTA_SEQ_{i:02}"))
            .collect();
        assert_eq!(received, expected);
        // Dropping the overflow must not stall or kill the reader
        assert!(link.is_connected());

        link.disarm_ota_tap();
        link.disconnect().unwrap();
    }

    #[test]
    fn test_tap_receiver_drop_does_not_kill_reader() {
        let reader = ScriptedReader::new(&[b"OTA_READY\nOTA_CHUNK_ACK\n"])
            .with_settle_delay(Duration::from_millis(50));
        let (mut link, rx) = HeaterLink::start(MockPort::new(), reader);

        drop(link.arm_ota_tap());
        std::thread::sleep(Duration::from_millis(200));

        // Lines offered to the vanished tap are discarded, not rerouted
        assert!(rx.try_recv().is_err());
        assert!(link.is_connected());
        link.disconnect().unwrap();
    }

    #[test]
    fn test_send_line_appends_newline() {
        let reader = ScriptedReader::new(&[]);
        let (mut link, _rx) = HeaterLink::start(MockPort::new(), reader);

        link.send_line("GET_SETTINGS").unwrap();
        link.send_bytes(&[0xDE, 0xAD]).unwrap();

        assert_eq!(link.port.written, b"GET_SETTINGS\n\xDE\xAD");
        link.disconnect().unwrap();
    }

    #[test]
    fn test_send_after_disconnect_fails() {
        let reader = ScriptedReader::new(&[]);
        let (mut link, _rx) = HeaterLink::start(MockPort::new(), reader);

        link.disconnect().unwrap();
        assert!(matches!(
            link.send_line("GET_SETTINGS"),
            Err(Error::NotConnected)
        ));
    }
}
