//! Line reassembly for the newline-delimited controller protocol.
//!
//! The controller speaks newline-terminated ASCII. Reads from the serial
//! stream arrive at arbitrary byte boundaries, so a framer accumulates the
//! residual tail between reads: complete segments are trimmed and emitted as
//! lines, the unfinished remainder stays buffered for the next read.

/// Accumulating line framer.
///
/// Two layers of residue are kept: an incomplete UTF-8 sequence at the byte
/// level and an unterminated line at the text level.
#[derive(Debug, Default)]
pub struct LineFramer {
    bytes: Vec<u8>,
    text: String,
}

impl LineFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the stream; returns every complete line they
    /// finished, trimmed, with empty lines dropped. Delivery order matches
    /// arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.bytes.extend_from_slice(chunk);
        let decoded = drain_utf8_lossy(&mut self.bytes);
        self.text.push_str(&decoded);

        let mut lines = Vec::new();
        while let Some(pos) = self.text.find('\n') {
            let segment: String = self.text.drain(..=pos).collect();
            let trimmed = segment.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        lines
    }

    /// The unterminated partial line currently buffered.
    pub fn pending(&self) -> &str {
        &self.text
    }
}

/// Decode buffered bytes to text, tolerating a torn multi-byte sequence.
///
/// Decoded text is removed from `buffer`. A malformed sequence becomes one
/// replacement character and decoding continues past it. Bytes that could
/// still complete a valid sequence once more data arrives stay buffered.
pub fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut text = String::new();

    loop {
        let err = match std::str::from_utf8(buffer) {
            Ok(whole) => {
                text.push_str(whole);
                buffer.clear();
                break;
            },
            Err(err) => err,
        };

        let valid = err.valid_up_to();
        text.push_str(std::str::from_utf8(&buffer[..valid]).unwrap_or(""));

        match err.error_len() {
            Some(bad) => {
                text.push('\u{FFFD}');
                buffer.drain(..valid + bad);
            },
            None => {
                // Torn sequence at the tail; hold it for the next read
                buffer.drain(..valid);
                break;
            },
        }
    }

    text
}
