//! Decoding of server-sent-event style completion streams.
//!
//! The upstream body is a sequence of newline-delimited lines. Lines starting
//! with `data: ` carry either a JSON delta record or the `[DONE]` sentinel;
//! anything else (blank keep-alives, comments, other fields) is ignored.

use serde::Deserialize;
use tracing::debug;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLine<'a> {
    /// Blank or not a data line.
    Ignored,
    /// A data line; holds the payload with the prefix stripped.
    Data(&'a str),
    /// The terminal sentinel.
    Done,
}

pub fn classify_line(line: &str) -> EventLine<'_> {
    if line.is_empty() {
        return EventLine::Ignored;
    }
    match line.strip_prefix(DATA_PREFIX) {
        Some(DONE_SENTINEL) => EventLine::Done,
        Some(payload) => EventLine::Data(payload),
        None => EventLine::Ignored,
    }
}

#[derive(Deserialize)]
struct DeltaRecord {
    #[serde(default)]
    choices: Vec<DeltaChoice>,
}

#[derive(Deserialize)]
struct DeltaChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Extracts the text fragment of a delta record, if it carries one.
pub fn parse_delta(payload: &str) -> Result<Option<String>, serde_json::Error> {
    let record: DeltaRecord = serde_json::from_str(payload)?;
    Ok(record
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty()))
}

/// Reassembles complete lines from arbitrarily split chunks.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    /// Returns every line completed by `chunk`, without its terminator.
    /// Both `\n` and `\r\n` are accepted.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let mut line = std::mem::take(&mut self.pending);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                lines.push(String::from_utf8_lossy(&line).into_owned());
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Returns the trailing unterminated line, if any, once input has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.pending);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Delta(String),
    EndOfStream,
}

/// Structured parser: turns raw chunks into text deltas and a single
/// end-of-stream signal. Malformed payloads are skipped. Nothing is emitted
/// after the sentinel.
#[derive(Debug, Default)]
pub struct FrameParser {
    lines: LineDecoder,
    ended: bool,
    malformed: usize,
}

impl FrameParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<FrameEvent> {
        let mut events = Vec::new();
        for line in self.lines.push(chunk) {
            self.handle_line(&line, &mut events);
        }
        events
    }

    /// Flushes a final line that arrived without a terminator.
    pub fn finish(&mut self) -> Vec<FrameEvent> {
        let mut events = Vec::new();
        if let Some(line) = self.lines.finish() {
            self.handle_line(&line, &mut events);
        }
        events
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn malformed_count(&self) -> usize {
        self.malformed
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<FrameEvent>) {
        if self.ended {
            return;
        }
        match classify_line(line) {
            EventLine::Ignored => {}
            EventLine::Done => {
                self.ended = true;
                events.push(FrameEvent::EndOfStream);
            }
            EventLine::Data(payload) => match parse_delta(payload) {
                Ok(Some(text)) => events.push(FrameEvent::Delta(text)),
                Ok(None) => {}
                Err(e) => {
                    self.malformed += 1;
                    debug!("Skipping malformed frame ({}): {}", e, payload);
                }
            },
        }
    }
}

/// The full text reconstructed from a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccumulatedReply {
    pub text: String,
    /// Whether the sentinel was seen, as opposed to the stream just stopping.
    pub reached_sentinel: bool,
}

#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    parser: FrameParser,
    reply: AccumulatedReply,
}

impl DeltaAccumulator {
    /// Feeds one chunk; returns true once the sentinel has been seen.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        let events = self.parser.push(chunk);
        self.apply(events);
        self.parser.is_ended()
    }

    pub fn finish(mut self) -> AccumulatedReply {
        let events = self.parser.finish();
        self.apply(events);
        self.reply
    }

    fn apply(&mut self, events: Vec<FrameEvent>) {
        for event in events {
            match event {
                FrameEvent::Delta(text) => self.reply.text.push_str(&text),
                FrameEvent::EndOfStream => self.reply.reached_sentinel = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AB: &str = r#"data: {"choices":[{"delta":{"content":"ab"}}]}"#;
    const CD: &str = r#"data: {"choices":[{"delta":{"content":"cd"}}]}"#;

    #[test]
    fn classifies_lines() {
        assert_eq!(classify_line(""), EventLine::Ignored);
        assert_eq!(classify_line(": keep-alive"), EventLine::Ignored);
        assert_eq!(classify_line("event: message"), EventLine::Ignored);
        assert_eq!(classify_line("data:{}"), EventLine::Ignored);
        assert_eq!(classify_line("data: [DONE]"), EventLine::Done);
        assert_eq!(classify_line("data: {\"a\":1}"), EventLine::Data("{\"a\":1}"));
    }

    #[test]
    fn parse_delta_handles_empty_and_missing_content() {
        assert_eq!(parse_delta(r#"{"choices":[{"delta":{"content":"x"}}]}"#).unwrap(), Some("x".into()));
        assert_eq!(parse_delta(r#"{"choices":[{"delta":{"content":""}}]}"#).unwrap(), None);
        assert_eq!(parse_delta(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(), None);
        assert_eq!(parse_delta(r#"{"choices":[]}"#).unwrap(), None);
        assert!(parse_delta("{not json").is_err());
    }

    #[test]
    fn line_decoder_reassembles_split_lines() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push(b"data: he").is_empty());
        assert_eq!(decoder.push(b"llo\r\n\r\ndata: x"), vec!["data: hello".to_string(), String::new()]);
        assert_eq!(decoder.finish(), Some("data: x".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn accumulates_abcd_with_single_end_signal() {
        let stream = format!("{AB}\n\n{CD}\n\ndata: [DONE]\n\n");
        let mut parser = FrameParser::default();

        let mut events = Vec::new();
        // Feed byte by byte to exercise every split point.
        for byte in stream.as_bytes() {
            events.extend(parser.push(std::slice::from_ref(byte)));
        }
        events.extend(parser.push(b"data: [DONE]\n\n"));
        events.extend(parser.finish());

        assert_eq!(
            events,
            vec![
                FrameEvent::Delta("ab".into()),
                FrameEvent::Delta("cd".into()),
                FrameEvent::EndOfStream,
            ]
        );

        let mut acc = DeltaAccumulator::default();
        assert!(acc.feed(stream.as_bytes()));
        let reply = acc.finish();
        assert_eq!(reply.text, "abcd");
        assert!(reply.reached_sentinel);
    }

    #[test]
    fn malformed_frame_between_valid_frames_is_skipped() {
        let stream = format!("{AB}\n\ndata: {{not json\n\n{CD}\n\ndata: [DONE]\n\n");
        let mut acc = DeltaAccumulator::default();

        assert!(acc.feed(stream.as_bytes()));
        assert_eq!(acc.parser.malformed_count(), 1);
        assert_eq!(acc.finish().text, "abcd");
    }

    #[test]
    fn stream_without_sentinel_keeps_partial_text() {
        let mut acc = DeltaAccumulator::default();
        assert!(!acc.feed(format!("{AB}\n\n{CD}").as_bytes()));

        let reply = acc.finish();
        assert_eq!(reply.text, "abcd");
        assert!(!reply.reached_sentinel);
    }
}
