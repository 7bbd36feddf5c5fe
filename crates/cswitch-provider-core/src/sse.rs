use bytes::Bytes;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    /// Each `data:` line of the event, in arrival order.
    pub data_lines: Vec<String>,
}

impl SseEvent {
    pub fn data(&self) -> String {
        self.data_lines.join("\n")
    }
}

/// Incremental SSE framer. Chunks may split lines and events anywhere,
/// including inside a multi-byte character.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        // Bytes already buffered hold no newline, so scanning starts at the new chunk.
        let mut scan_from = self.buffer.len();
        self.buffer.extend_from_slice(chunk);
        let buffer = std::mem::take(&mut self.buffer);
        let mut events = Vec::new();

        let mut line_start = 0;
        while let Some(offset) = buffer[scan_from..].iter().position(|b| *b == b'\n') {
            let end = scan_from + offset;
            let line = String::from_utf8_lossy(&buffer[line_start..end]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            self.push_line(line, &mut events);
            line_start = end + 1;
            scan_from = line_start;
        }

        self.buffer = buffer;
        self.buffer.drain(..line_start);
        events
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.push_bytes(&Bytes::copy_from_slice(chunk.as_bytes()))
    }

    /// Flushes a trailing line and event left without a terminating blank line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            self.push_line(line, &mut events);
        }
        self.finish_event(&mut events);
        events
    }

    fn push_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.finish_event(events);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        if let Some(value) = line.strip_prefix("event:") {
            let value = value.trim_start();
            self.event = if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
            return;
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data_lines.push(value.trim_start().to_string());
        }
    }

    fn finish_event(&mut self, events: &mut Vec<SseEvent>) {
        if self.event.is_none() && self.data_lines.is_empty() {
            return;
        }
        events.push(SseEvent {
            event: self.event.take(),
            data_lines: std::mem::take(&mut self.data_lines),
        });
    }
}
