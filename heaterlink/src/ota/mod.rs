//! Over-the-air firmware transfer.
//!
//! One [`OtaSession`] drives a single transfer attempt over an open
//! [`HeaterLink`]. The protocol is strictly phased; every phase sends at most
//! one command and then blocks on the armed OTA response queue until the
//! expected response arrives or the phase times out:
//!
//! 1. `START_OTA` → `OTA_READY`
//! 2. fixed-size raw chunks, each acknowledged by `OTA_CHUNK_ACK`
//! 3. `END_OTA` → `OTA_RECEIVE_COMPLETE:<summary>`
//! 4. `OTA_READY_TO_APPLY`
//! 5. `APPLY_OTA` → `OTA_APPLYING`
//! 6. `OTA_REBOOTING`
//!
//! Any `OTA_ERROR`/`OTA_FAIL` response, phase timeout or interrupt aborts the
//! session; on abort a best-effort `CANCEL_OTA` is sent so the device can
//! discard the partial image. There is no resumption: a failed transfer is
//! restarted from scratch.

use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::link::HeaterLink;
use crate::port::Port;
use crate::protocol::Command;

/// Size of one raw firmware chunk. Fixed by the receiver's buffer size.
pub const OTA_CHUNK_SIZE: usize = 512;

/// Default per-phase response timeout.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default pause after each acknowledged chunk, giving the ESP8266 time to
/// commit the buffer to flash.
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(20);

/// How often the response queue is polled so interrupts stay responsive.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tunable timing for a transfer session.
#[derive(Debug, Clone)]
pub struct OtaConfig {
    /// Per-phase response timeout (chunk acks use the same budget).
    pub response_timeout: Duration,
    /// Pause after each acknowledged chunk.
    pub chunk_delay: Duration,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            chunk_delay: DEFAULT_CHUNK_DELAY,
        }
    }
}

/// A firmware image ready for transfer.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Load an image from a `.bin` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(data)
    }

    /// Wrap raw image bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::Protocol("firmware image is empty".to_string()));
        }
        Ok(Self { data })
    }

    /// Total image size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty (never true for a constructed image).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw image bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Transfer a firmware image over an open link.
///
/// Arms the link's OTA tap for the duration of the session and disarms it on
/// the way out, success or not. `progress` receives `(bytes_sent, total)`
/// after every acknowledged chunk.
pub fn transfer<P: Port>(
    link: &mut HeaterLink<P>,
    image: &FirmwareImage,
    config: &OtaConfig,
    progress: &mut dyn FnMut(usize, usize),
) -> Result<()> {
    let responses = link.arm_ota_tap();
    let mut session = OtaSession {
        link,
        responses,
        config,
    };

    let result = session.run(image, progress);
    if result.is_err() {
        // Best effort: let the device discard the partial image
        if let Err(e) = session.link.send_command(&Command::CancelOta) {
            warn!("Failed to send CANCEL_OTA after aborted transfer: {e}");
        }
    }
    session.link.disarm_ota_tap();
    result
}

struct OtaSession<'a, P: Port> {
    link: &'a mut HeaterLink<P>,
    responses: Receiver<String>,
    config: &'a OtaConfig,
}

impl<P: Port> OtaSession<'_, P> {
    fn run(&mut self, image: &FirmwareImage, progress: &mut dyn FnMut(usize, usize)) -> Result<()> {
        let total = image.len();
        info!(
            "Starting OTA transfer: {total} bytes in {} chunks",
            total.div_ceil(OTA_CHUNK_SIZE)
        );

        self.link.send_command(&Command::StartOta)?;
        self.wait_for("OTA_READY", "waiting for transfer start")?;

        let mut sent = 0usize;
        for chunk in image.bytes().chunks(OTA_CHUNK_SIZE) {
            self.link.send_bytes(chunk)?;
            self.wait_for("OTA_CHUNK_ACK", "waiting for chunk acknowledgement")?;
            sent += chunk.len();
            progress(sent, total);
            std::thread::sleep(self.config.chunk_delay);
        }

        self.link.send_command(&Command::EndOta)?;
        let complete = self.wait_for("OTA_RECEIVE_COMPLETE", "waiting for receive confirmation")?;
        if !complete.starts_with("OTA_RECEIVE_COMPLETE:") {
            return Err(Error::Protocol(format!(
                "receive confirmation carried no summary: {complete}"
            )));
        }
        debug!("Device confirmed receive: {complete}");

        self.wait_for("OTA_READY_TO_APPLY", "waiting for apply readiness")?;
        self.link.send_command(&Command::ApplyOta)?;
        self.wait_for("OTA_APPLYING", "waiting for apply start")?;
        self.wait_for("OTA_REBOOTING", "waiting for reboot")?;

        info!("OTA transfer complete, device is rebooting");
        Ok(())
    }

    /// Block until a response starting with `expected` arrives.
    ///
    /// `OTA_ERROR`/`OTA_FAIL` abort immediately; other non-matching responses
    /// are skipped. Polls at short intervals so Ctrl-C is honored promptly.
    fn wait_for(&self, expected: &str, phase: &str) -> Result<String> {
        let deadline = Instant::now() + self.config.response_timeout;

        loop {
            if crate::is_interrupt_requested() {
                return Err(Error::Cancelled(format!("interrupted while {phase}")));
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "no {expected} within {:.1}s while {phase}",
                    self.config.response_timeout.as_secs_f64()
                )));
            }

            match self.responses.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    if line.starts_with("OTA_ERROR") || line.starts_with("OTA_FAIL") {
                        return Err(Error::DeviceFault(line));
                    }
                    if line.starts_with(expected) {
                        return Ok(line);
                    }
                    debug!("Skipping unexpected OTA response while {phase}: {line}");
                },
                Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => return Err(Error::NotConnected),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Read;
    use std::sync::{Arc, Mutex};

    /// Reader that replays scripted device responses after a short settling
    /// delay, then idles with timeouts.
    struct ScriptedReader {
        pending: VecDeque<u8>,
        delayed: bool,
        /// Error to yield once the script runs out, instead of idling.
        final_error: Option<std::io::ErrorKind>,
    }

    impl ScriptedReader {
        fn new(lines: &[&str]) -> Self {
            let mut pending = VecDeque::new();
            for line in lines {
                pending.extend(line.as_bytes());
                pending.push_back(b'\n');
            }
            Self {
                pending,
                delayed: false,
                final_error: None,
            }
        }

        fn failing_with(mut self, kind: std::io::ErrorKind) -> Self {
            self.final_error = Some(kind);
            self
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.delayed {
                // Let the session arm the tap before responses flow
                std::thread::sleep(Duration::from_millis(50));
                self.delayed = true;
            }
            if self.pending.is_empty() {
                if let Some(kind) = self.final_error.take() {
                    return Err(std::io::Error::new(kind, "scripted failure"));
                }
                std::thread::sleep(Duration::from_millis(5));
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "idle"));
            }
            let mut n = 0;
            while n < buf.len() {
                match self.pending.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    },
                    None => break,
                }
            }
            Ok(n)
        }
    }

    /// Writer-side port sharing its sink with the test body.
    struct SharedPort {
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for SharedPort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "idle"))
        }
    }

    impl std::io::Write for SharedPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Ok(mut sink) = self.written.lock() {
                sink.extend_from_slice(buf);
            }
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for SharedPort {
        fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(100)
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

    /// Serializes tests that read or write the global interrupt flag.
    static INTERRUPT_GUARD: Mutex<()> = Mutex::new(());

    fn lock_interrupt_flag() -> std::sync::MutexGuard<'static, ()> {
        INTERRUPT_GUARD
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn start_link(responses: &[&str]) -> (HeaterLink<SharedPort>, Arc<Mutex<Vec<u8>>>) {
        start_link_with(ScriptedReader::new(responses))
    }

    fn start_link_with(reader: ScriptedReader) -> (HeaterLink<SharedPort>, Arc<Mutex<Vec<u8>>>) {
        crate::test_set_interrupted(false);
        let written = Arc::new(Mutex::new(Vec::new()));
        let port = SharedPort {
            written: Arc::clone(&written),
        };
        let (link, _events) = HeaterLink::start(port, reader);
        // Keep the general receiver alive implicitly; dropped here is fine,
        // the reader ignores send failures.
        (link, written)
    }

    fn fast_config() -> OtaConfig {
        OtaConfig {
            response_timeout: Duration::from_secs(2),
            chunk_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_successful_transfer_walks_all_phases() {
        let _guard = lock_interrupt_flag();
        // 700 bytes = two chunks
        let (mut link, written) = start_link(&[
            "OTA_READY",
            "OTA_CHUNK_ACK",
            "OTA_CHUNK_ACK",
            "OTA_RECEIVE_COMPLETE:700",
            "OTA_READY_TO_APPLY",
            "OTA_APPLYING",
            "OTA_REBOOTING",
        ]);
        let image = FirmwareImage::from_bytes(vec![0xAB; 700]).unwrap();

        let mut reports = Vec::new();
        transfer(&mut link, &image, &fast_config(), &mut |sent, total| {
            reports.push((sent, total));
        })
        .unwrap();

        assert_eq!(reports, vec![(512, 700), (700, 700)]);

        let sent = written.lock().unwrap().clone();
        let text = String::from_utf8_lossy(&sent);
        assert!(text.starts_with("START_OTA\n"));
        assert!(text.contains("END_OTA\n"));
        assert!(text.ends_with("APPLY_OTA\n"));
        assert!(!text.contains("CANCEL_OTA"));
        // Both raw chunks went out between START_OTA and END_OTA
        assert_eq!(sent.iter().filter(|&&b| b == 0xAB).count(), 700);
    }

    #[test]
    fn test_device_error_aborts_and_cancels() {
        let _guard = lock_interrupt_flag();
        let (mut link, written) = start_link(&["OTA_READY", "OTA_ERROR: flash write failed"]);
        let image = FirmwareImage::from_bytes(vec![0x01; 100]).unwrap();

        let err = transfer(&mut link, &image, &fast_config(), &mut |_, _| {}).unwrap_err();
        assert!(matches!(err, Error::DeviceFault(_)));

        let sent = written.lock().unwrap().clone();
        let text = String::from_utf8_lossy(&sent);
        assert!(text.ends_with("CANCEL_OTA\n"));
    }

    #[test]
    fn test_phase_timeout_aborts_with_phase_name() {
        let _guard = lock_interrupt_flag();
        let (mut link, written) = start_link(&[]);
        let image = FirmwareImage::from_bytes(vec![0x01; 10]).unwrap();
        let config = OtaConfig {
            response_timeout: Duration::from_millis(150),
            chunk_delay: Duration::from_millis(1),
        };

        let err = transfer(&mut link, &image, &config, &mut |_, _| {}).unwrap_err();
        match err {
            Error::Timeout(msg) => assert!(msg.contains("waiting for transfer start")),
            other => panic!("expected Timeout, got {other:?}"),
        }
        let text = String::from_utf8_lossy(&written.lock().unwrap()).to_string();
        assert!(text.contains("CANCEL_OTA\n"));
    }

    #[test]
    fn test_receive_complete_without_summary_fails() {
        let _guard = lock_interrupt_flag();
        let (mut link, _written) = start_link(&[
            "OTA_READY",
            "OTA_CHUNK_ACK",
            "OTA_RECEIVE_COMPLETE",
            "OTA_RECEIVE_COMPLETE",
        ]);
        let image = FirmwareImage::from_bytes(vec![0x01; 10]).unwrap();

        let err = transfer(&mut link, &image, &fast_config(), &mut |_, _| {}).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_unexpected_ota_lines_are_skipped() {
        let _guard = lock_interrupt_flag();
        let (mut link, _written) = start_link(&[
            "OTA_PROGRESS: 0%",
            "OTA_READY",
            "OTA_CHUNK_ACK",
            "OTA_RECEIVE_COMPLETE:10",
            "OTA_READY_TO_APPLY",
            "OTA_APPLYING",
            "OTA_REBOOTING",
        ]);
        let image = FirmwareImage::from_bytes(vec![0x01; 10]).unwrap();

        transfer(&mut link, &image, &fast_config(), &mut |_, _| {}).unwrap();
    }

    #[test]
    fn test_connection_loss_mid_wait_fails_fast() {
        let _guard = lock_interrupt_flag();
        let (mut link, _written) = start_link_with(
            ScriptedReader::new(&["OTA_READY"]).failing_with(std::io::ErrorKind::BrokenPipe),
        );
        let image = FirmwareImage::from_bytes(vec![0x01; 10]).unwrap();

        let started = Instant::now();
        let err = transfer(&mut link, &image, &fast_config(), &mut |_, _| {}).unwrap_err();

        assert!(matches!(err, Error::NotConnected));
        // The dead stream ends the wait well inside the 2s phase budget
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_empty_image_is_rejected() {
        assert!(matches!(
            FirmwareImage::from_bytes(Vec::new()),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_interrupt_aborts_transfer() {
        let _guard = lock_interrupt_flag();
        let (mut link, written) = start_link(&[]);
        let image = FirmwareImage::from_bytes(vec![0x01; 10]).unwrap();
        crate::test_set_interrupted(true);

        let err = transfer(&mut link, &image, &fast_config(), &mut |_, _| {}).unwrap_err();
        crate::test_set_interrupted(false);

        assert!(matches!(err, Error::Cancelled(_)));
        let text = String::from_utf8_lossy(&written.lock().unwrap()).to_string();
        assert!(text.contains("CANCEL_OTA\n"));
    }
}
