//! Decoder for the `data: ` subset of server-sent events used by
//! OpenAI-compatible chat streaming.

use serde_json::Value;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// One content delta, or the terminal marker when `is_done` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub content: String,
    pub is_done: bool,
}

impl StreamChunk {
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            content: String::new(),
            is_done: true,
        }
    }
}

/// Incremental decoder. Bytes may be split anywhere, including inside a
/// UTF-8 sequence; only complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `[DONE]` has been decoded. Later input is ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        if self.finished {
            return Vec::new();
        }
        self.pending.extend_from_slice(bytes);

        let mut chunks = Vec::new();
        let mut consumed = 0usize;
        while let Some(offset) = self.pending[consumed..].iter().position(|byte| *byte == b'\n') {
            let line_end = consumed + offset;
            let line = String::from_utf8_lossy(&self.pending[consumed..line_end]).into_owned();
            consumed = line_end + 1;
            if let Some(chunk) = self.decode_line(&line) {
                chunks.push(chunk);
                if self.finished {
                    break;
                }
            }
        }

        if self.finished {
            self.pending.clear();
        } else {
            self.pending.drain(..consumed);
        }
        chunks
    }

    /// Decodes a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        if self.finished || self.pending.is_empty() {
            self.pending.clear();
            return Vec::new();
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        self.decode_line(&line).into_iter().collect()
    }

    fn decode_line(&mut self, line: &str) -> Option<StreamChunk> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let payload = line.strip_prefix(DATA_PREFIX)?;
        if payload == DONE_SENTINEL {
            self.finished = true;
            return Some(StreamChunk::done());
        }
        parse_delta_content(payload).map(StreamChunk::delta)
    }
}

/// Decodes a complete body. Stops at `[DONE]`; does not invent a terminal
/// chunk when the sentinel is missing.
pub fn decode_sse(text: &str) -> Vec<StreamChunk> {
    let mut decoder = SseDecoder::new();
    let mut chunks = decoder.push(text.as_bytes());
    chunks.extend(decoder.finish());
    chunks
}

/// Extracts `choices[0].delta.content` from one event payload.
pub fn parse_delta_content(payload: &str) -> Option<String> {
    let event: Value = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(error) => {
            tracing::debug!(%error, payload, "skipping malformed stream event");
            return None;
        }
    };
    event
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
