//! Response Frame Decoding
//!
//! Chat responses arrive as newline-delimited frames. Each line is one of:
//!
//! ```text
//! data: {"type":"token","text":"Hel"}     SSE data line, prefix stripped
//! {"type":"token","text":"lo"}            bare JSON (NDJSON)
//! : keep-alive                            SSE comment, ignored
//! event: message / id: 7 / retry: 3000    SSE field lines, ignored
//! data: [DONE]                            end sentinel, ignored
//! ```
//!
//! Bytes are buffered until a newline arrives, so a JSON object or a
//! multi-byte UTF-8 character split across network chunks decodes intact.
//!
//! # Robustness
//!
//! - A malformed frame yields [`Decoded::Malformed`] and the decoder moves on
//! - Lines longer than `MAX_FRAME_SIZE` are discarded without being parsed

use thiserror::Error;

use super::event::StreamEvent;

/// Maximum frame size (10 MB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Why a single frame could not be decoded
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame was not valid UTF-8
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    /// Frame was not a valid event object
    #[error("Malformed frame: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Frame exceeded the size limit
    #[error("Frame size {size} exceeds maximum {MAX_FRAME_SIZE}")]
    TooLarge {
        /// Size of the offending frame
        size: usize,
    },
}

/// Result of decoding one line
#[derive(Debug)]
pub enum Decoded {
    /// A well-formed event
    Event(StreamEvent),
    /// A line that carries no event (blank, comment, SSE field, sentinel)
    Skip,
    /// A line that should have been an event but could not be parsed
    Malformed(ProtocolError),
}

/// Decoder state machine for streaming frame parsing
///
/// Buffers incoming bytes and yields decoded lines.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
    /// Set while skipping the rest of an oversized line
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a new decoder with default buffer capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
            discarding: false,
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        // Compact buffer if we've consumed a lot
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Get the number of bytes available in the buffer
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to decode the next complete line
    ///
    /// Returns `None` when more data is needed.
    pub fn decode(&mut self) -> Option<Decoded> {
        let pending = &self.buffer[self.read_pos..];
        let Some(newline) = pending.iter().position(|&b| b == b'\n') else {
            if pending.len() > MAX_FRAME_SIZE {
                let size = pending.len();
                self.read_pos = self.buffer.len();
                self.discarding = true;
                return Some(Decoded::Malformed(ProtocolError::TooLarge { size }));
            }
            return None;
        };

        let start = self.read_pos;
        let end = start + newline;
        self.read_pos = end + 1;

        if self.discarding {
            // Tail of an oversized line that was already reported
            self.discarding = false;
            return Some(Decoded::Skip);
        }

        Some(decode_line(&self.buffer[start..end]))
    }

    /// Decode whatever remains once the stream has ended
    ///
    /// A final frame is allowed to omit its trailing newline.
    pub fn finish(&mut self) -> Option<Decoded> {
        if self.available() == 0 {
            return None;
        }
        let start = self.read_pos;
        self.read_pos = self.buffer.len();
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        Some(decode_line(&self.buffer[start..]))
    }
}

/// Decode a single line (without its newline)
pub fn decode_line(raw: &[u8]) -> Decoded {
    if raw.len() > MAX_FRAME_SIZE {
        return Decoded::Malformed(ProtocolError::TooLarge { size: raw.len() });
    }
    let Ok(line) = std::str::from_utf8(raw) else {
        return Decoded::Malformed(ProtocolError::InvalidUtf8);
    };
    let line = line.trim();

    if line.is_empty() || line.starts_with(':') {
        return Decoded::Skip;
    }

    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim_start(),
        None if is_sse_field(line) => return Decoded::Skip,
        None => line,
    };

    if payload.is_empty() || payload == "[DONE]" {
        return Decoded::Skip;
    }

    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => Decoded::Event(event),
        Err(e) => Decoded::Malformed(ProtocolError::InvalidJson(e)),
    }
}

fn is_sse_field(line: &str) -> bool {
    ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut FrameDecoder) -> Vec<Decoded> {
        let mut out = Vec::new();
        while let Some(decoded) = decoder.decode() {
            out.push(decoded);
        }
        out
    }

    #[test]
    fn test_sse_and_ndjson_lines() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"data: {\"type\":\"token\",\"text\":\"a\"}\n{\"type\":\"token\",\"text\":\"b\"}\n");

        let out = decode_all(&mut decoder);
        assert_eq!(out.len(), 2);
        assert!(matches!(&out[0], Decoded::Event(StreamEvent::Token { text }) if text == "a"));
        assert!(matches!(&out[1], Decoded::Event(StreamEvent::Token { text }) if text == "b"));
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"data: {\"type\":\"tok");
        assert!(decoder.decode().is_none());

        decoder.push(b"en\",\"text\":\"x\"}\n");
        assert!(matches!(
            decoder.decode(),
            Some(Decoded::Event(StreamEvent::Token { .. }))
        ));
    }

    #[test]
    fn test_split_utf8_character() {
        let line = "data: {\"type\":\"token\",\"text\":\"café\"}\n".as_bytes();
        // Split inside the two-byte 'é'
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut decoder = FrameDecoder::new();
        decoder.push(&line[..split]);
        assert!(decoder.decode().is_none());
        decoder.push(&line[split..]);

        match decoder.decode() {
            Some(Decoded::Event(StreamEvent::Token { text })) => assert_eq!(text, "café"),
            other => panic!("Expected token, got {other:?}"),
        }
    }

    #[test]
    fn test_sse_noise_is_skipped() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b": keep-alive\nevent: message\nid: 3\nretry: 1000\n\ndata: [DONE]\n");

        let out = decode_all(&mut decoder);
        assert_eq!(out.len(), 6);
        assert!(out.iter().all(|d| matches!(d, Decoded::Skip)));
    }

    #[test]
    fn test_malformed_frame_does_not_poison_decoder() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"data: {not json\ndata: {\"type\":\"status\",\"text\":\"ok\"}\n");

        let out = decode_all(&mut decoder);
        assert!(matches!(out[0], Decoded::Malformed(ProtocolError::InvalidJson(_))));
        assert!(matches!(&out[1], Decoded::Event(StreamEvent::Status { text }) if text == "ok"));
    }

    #[test]
    fn test_finish_decodes_unterminated_tail() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"{\"type\":\"token\",\"text\":\"end\"}");
        assert!(decoder.decode().is_none());
        assert!(matches!(
            decoder.finish(),
            Some(Decoded::Event(StreamEvent::Token { .. }))
        ));
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"data: {\"type\":\"token\",\"text\":\"x\"}\r\n\r\n");

        let out = decode_all(&mut decoder);
        assert!(matches!(out[0], Decoded::Event(_)));
        assert!(matches!(out[1], Decoded::Skip));
    }
}
