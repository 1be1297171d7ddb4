//! Incremental Server-Sent Events parser.
//!
//! Response bodies arrive in arbitrary network chunks; the parser buffers
//! bytes until a full line is available and dispatches a frame on each blank
//! line. Bytes are only decoded as UTF-8 once a whole line is buffered, so a
//! multi-byte character split across reads is never mangled.

/// One dispatched SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field, `"message"` when absent.
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete frames.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let raw = &self.buffer[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw).into_owned();
            start = end + 1;

            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        self.buffer.drain(..start);

        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        // Comment (axum keep-alives use these).
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Vec<SseFrame> {
        SseStreamParser::default().feed(input.as_bytes())
    }

    fn is_idle(parser: &SseStreamParser) -> bool {
        parser.buffer.is_empty() && parser.event.is_none() && parser.data.is_empty()
    }

    #[test]
    fn parse_named_frames() {
        let frames = parse(
            "event: session\ndata: {\"id\":\"s1\"}\n\nevent: no_session\ndata: {}\n\n",
        );
        assert_eq!(
            frames,
            vec![
                SseFrame {
                    event: "session".into(),
                    data: "{\"id\":\"s1\"}".into(),
                },
                SseFrame {
                    event: "no_session".into(),
                    data: "{}".into(),
                },
            ]
        );
    }

    #[test]
    fn parse_frames_incrementally() {
        let mut parser = SseStreamParser::default();
        assert!(parser.feed(b"event: chu").is_empty());
        assert!(parser.feed(b"nk\ndata: {\"sequence\":1}").is_empty());
        assert!(!is_idle(&parser));

        let frames = parser.feed(b"\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "chunk");
        assert_eq!(frames[0].data, "{\"sequence\":1}");
        assert!(is_idle(&parser));
    }

    #[test]
    fn multibyte_split_across_reads() {
        let bytes = "data: héllo\n\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut parser = SseStreamParser::default();
        assert!(parser.feed(&bytes[..split]).is_empty());
        let frames = parser.feed(&bytes[split..]);
        assert_eq!(frames[0].data, "héllo");
    }

    #[test]
    fn crlf_comments_and_defaults() {
        let frames = parse(":keep-alive\r\n\r\ndata:a\r\ndata: b\r\n\r\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "message".into(),
                data: "a\nb".into(),
            }]
        );
    }

    #[test]
    fn blank_line_without_data_dispatches_nothing() {
        let mut parser = SseStreamParser::default();
        assert!(parser.feed(b"event: orphan\n\n").is_empty());
        assert!(is_idle(&parser));
        let frames = parser.feed(b"data: {}\n\n");
        assert_eq!(frames[0].event, "message");
    }
}
