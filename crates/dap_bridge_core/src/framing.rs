//! Content-Length framing for the DAP base protocol.
//!
//! `FrameDecoder` is fed raw chunks as they arrive and hands back complete
//! bodies. It tolerates partial reads, several messages per chunk and garbage
//! headers, and it extracts a bounded number of messages per call.

use tracing::warn;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Messages extracted per `decode` call at most.
pub const MAX_MESSAGES_PER_DECODE: usize = 64;

/// Declared lengths above this are treated as a corrupt header.
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

pub fn encode_frame(body: &str) -> Vec<u8> {
    let mut framed = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    framed.extend_from_slice(body.as_bytes());
    framed
}

#[derive(Debug, Default, PartialEq)]
pub struct Decoded {
    pub messages: Vec<String>,
    /// The per-call cap was reached while complete headers remained buffered.
    pub more_buffered: bool,
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn decode(&mut self) -> Decoded {
        self.decode_at_most(MAX_MESSAGES_PER_DECODE)
    }

    pub fn decode_at_most(&mut self, limit: usize) -> Decoded {
        let mut decoded = Decoded::default();
        let mut iterations = 0;

        while iterations < limit {
            let Some(header_end) = find_terminator(&self.buffer) else {
                return decoded;
            };
            iterations += 1;

            let body_start = header_end + HEADER_TERMINATOR.len();
            let length = match parse_content_length(&self.buffer[..header_end]) {
                Some(length) if length <= MAX_CONTENT_LENGTH => length,
                Some(length) => {
                    warn!(length, "Content-Length exceeds limit, skipping header");
                    self.buffer.drain(..body_start);
                    continue;
                }
                None => {
                    warn!(
                        header = %String::from_utf8_lossy(&self.buffer[..header_end]),
                        "Malformed DAP header without Content-Length, skipping"
                    );
                    self.buffer.drain(..body_start);
                    continue;
                }
            };

            if self.buffer.len() < body_start + length {
                // Incomplete body; wait for the next chunk.
                return decoded;
            }

            let body: Vec<u8> = self.buffer.drain(..body_start + length).skip(body_start).collect();
            match String::from_utf8(body) {
                Ok(text) => decoded.messages.push(text),
                Err(e) => warn!("Dropping DAP body with invalid UTF-8: {}", e),
            }
        }

        decoded.more_buffered = find_terminator(&self.buffer).is_some();
        decoded
    }
}

fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

fn parse_content_length(header: &[u8]) -> Option<usize> {
    let header = std::str::from_utf8(header).ok()?;
    header.split("\r\n").find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse::<usize>().ok()
        } else {
            None
        }
    })
}
