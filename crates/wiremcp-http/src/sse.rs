//! Incremental Server-Sent-Events parser.
//!
//! Feeds on raw body chunks and yields complete events as they close.
//! Handles the standard `event:`/`data:`/`id:` fields, multi-line data,
//! `\r\n` line endings, and comment lines.

/// One parsed SSE event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    /// `event:` field, when present
    pub event: Option<String>,
    /// Joined `data:` lines, when any were present
    pub data: Option<String>,
    /// `id:` field, when present
    pub id: Option<String>,
}

/// Incremental parser over an SSE byte stream.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        // Normalize CRLF so the frame delimiter search is uniform.
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(boundary) = self.buffer.find("\n\n") {
            let frame = self.buffer[..boundary].to_string();
            self.buffer.drain(..boundary + 2);
            if let Some(event) = parse_frame(&frame) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event_type: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    let mut id: Option<String> = None;

    for line in frame.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event_type = Some(value.to_string()),
            "data" => data_lines.push(value),
            "id" => id = Some(value.to_string()),
            _ => {}
        }
    }

    if event_type.is_none() && data_lines.is_empty() && id.is_none() {
        return None;
    }
    Some(SseEvent {
        event: event_type,
        data: if data_lines.is_empty() {
            None
        } else {
            Some(data_lines.join("\n"))
        },
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_event() {
        let mut parser = SseParser::new();
        let events = parser.push(b"event: message\ndata: {\"x\":1}\nid: e1\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].data.as_deref(), Some("{\"x\":1}"));
        assert_eq!(events[0].id.as_deref(), Some("e1"));
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: {\"jsonrpc\"").is_empty());
        assert!(parser.push(b":\"2.0\"}").is_empty());
        let events = parser.push(b"\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.as_deref(), Some("{\"jsonrpc\":\"2.0\"}"));
    }

    #[test]
    fn test_multi_line_data_joined() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: line one\ndata: line two\n\n");
        assert_eq!(events[0].data.as_deref(), Some("line one\nline two"));
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: hello\r\nid: e9\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("e9"));
    }

    #[test]
    fn test_comment_frames_are_dropped() {
        let mut parser = SseParser::new();
        let events = parser.push(b": keep-alive\n\ndata: real\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.as_deref(), Some("real"));
    }

    #[test]
    fn test_multiple_events_in_one_chunk() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: a\n\ndata: b\n\ndata: c\n\n");
        assert_eq!(events.len(), 3);
    }
}
