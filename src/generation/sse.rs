//! Incremental decoder for `text/event-stream` bodies

use bytes::BytesMut;

/// Payload carried by one `data:` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseData {
    Payload(String),
    /// The `[DONE]` sentinel
    Done,
}

/// Splits arbitrary byte chunks into complete SSE `data:` lines
///
/// Bytes are buffered until a newline arrives, so multi-byte characters
/// split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: BytesMut,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk and collect every completed data line
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseData> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            if let Some(data) = parse_line(&line) {
                out.push(data);
            }
        }
        out
    }

    /// Flush a trailing line that had no newline
    pub fn finish(&mut self) -> Vec<SseData> {
        let line = self.buffer.split();
        parse_line(&line).into_iter().collect()
    }
}

fn parse_line(raw: &[u8]) -> Option<SseData> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        None
    } else if data == "[DONE]" {
        Some(SseData::Done)
    } else {
        Some(SseData::Payload(data.to_string()))
    }
}
