//! Decoded output accumulation.
//!
//! Chunks are cut by size, not by character, so a multi-byte UTF-8 sequence
//! may straddle two chunks. [`Utf8Decoder`] holds the incomplete tail until
//! the rest arrives. [`Transcript`] turns the decoded text into a bounded
//! list of lines.

use std::collections::VecDeque;

/// Streaming UTF-8 decoder.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode as much of `pending + bytes` as forms complete characters.
    ///
    /// Invalid sequences become U+FFFD; an incomplete sequence at the end is
    /// carried into the next call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest = self.pending.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }

    /// Flush whatever is held, replacing an unfinished sequence with U+FFFD.
    pub fn finish(&mut self) -> String {
        let tail = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&tail).into_owned()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

/// Bounded line buffer over decoded output.
#[derive(Debug)]
pub struct Transcript {
    lines: VecDeque<String>,
    partial: String,
    max_lines: usize,
}

impl Transcript {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            partial: String::new(),
            max_lines: max_lines.max(1),
        }
    }

    /// Append decoded text. Completed lines are committed without their
    /// trailing `\r`; text after the last newline stays open.
    pub fn push_text(&mut self, text: &str) {
        let mut pieces = text.split('\n');
        if let Some(first) = pieces.next() {
            self.partial.push_str(first);
        }
        for piece in pieces {
            let mut line = std::mem::replace(&mut self.partial, piece.to_string());
            if line.ends_with('\r') {
                line.pop();
            }
            self.commit(line);
        }
    }

    fn commit(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    /// Completed lines, oldest first.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// The line still waiting for its newline.
    pub fn partial(&self) -> &str {
        &self.partial
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.partial.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.partial.clear();
    }
}
