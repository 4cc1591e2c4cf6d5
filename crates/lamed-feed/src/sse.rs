//! Incremental parser for `text/event-stream` bodies.
//!
//! Network chunks can split lines (and multi-byte characters) anywhere, so
//! bytes are buffered until a full line is available.

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: String,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.event.is_empty() && self.data.is_empty() {
                return None;
            }
            let event = if self.event.is_empty() {
                "message".to_string()
            } else {
                std::mem::take(&mut self.event)
            };
            let data = std::mem::take(&mut self.data).join("\n");
            return Some(SseEvent { event, data });
        }

        // Comment line
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = value.to_string(),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut parser = SseParser::new();
        let events = parser.push(b"event: put\ndata: {\"path\":\"/\",\"data\":null}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "put".into(),
                data: "{\"path\":\"/\",\"data\":null}".into()
            }]
        );
    }

    #[test]
    fn test_split_across_chunks_and_crlf() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: keep-al").is_empty());
        assert!(parser.push(b"ive\r\ndata: nu").is_empty());
        let events = parser.push(b"ll\r\n\r\n: comment\n\nevent: patch\ndata: {}\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "keep-alive");
        assert_eq!(events[0].data, "null");
        assert_eq!(events[1].event, "patch");
    }

    #[test]
    fn test_multibyte_split() {
        let mut parser = SseParser::new();
        let payload = "data: 🩺\n\n".as_bytes();
        let (a, b) = payload.split_at(8);
        assert!(parser.push(a).is_empty());
        let events = parser.push(b);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "🩺");
    }
}
