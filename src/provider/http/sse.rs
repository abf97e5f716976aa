//! Server-Sent Events (SSE) parser.

/// Incremental SSE parser yielding the `data:` payload of each complete event.
///
/// Events are delimited by a blank line. CRLF framing (used by Google endpoints)
/// is normalized to LF before splitting. Bytes are buffered raw and an event is
/// decoded only once its terminating blank line has arrived.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the body and return the payloads of any complete events.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend(chunk.iter().copied().filter(|&b| b != b'\r'));
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let event: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(data) = Self::parse_event(&String::from_utf8_lossy(&event)) {
                events.push(data);
            }
        }

        events
    }

    fn parse_event(text: &str) -> Option<String> {
        let data: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim_start)
            .collect();

        if data.is_empty() {
            return None;
        }
        Some(data.join("\n"))
    }

    pub fn has_pending(&self) -> bool {
        self.buffer.iter().any(|b| !b.is_ascii_whitespace())
    }
}
