//! Server-sent event accumulation for streamed completions

use crate::models::ChatCompletionChunk;
use serde_json::Value;
use tracing::debug;

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// Collects `data:` fragments of a streamed completion into the final text.
///
/// Bytes may arrive split anywhere, including in the middle of a line or a
/// UTF-8 sequence; only complete lines are interpreted.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    buffer: Vec<u8>,
    text: String,
    fragments: Vec<Value>,
    done: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        if self.done {
            return;
        }

        self.buffer.extend_from_slice(bytes);
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.push_line(&String::from_utf8_lossy(&line));
            if self.done {
                self.buffer.clear();
                break;
            }
        }
    }

    /// Interpret one line of the event stream.
    pub fn push_line(&mut self, line: &str) {
        if self.done {
            return;
        }

        let line = line.trim();
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };
        let payload = payload.trim_start();

        if payload == DONE_MARKER {
            self.done = true;
            return;
        }

        let fragment: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                debug!("Skipping malformed stream fragment: {}", e);
                return;
            }
        };

        match serde_json::from_value::<ChatCompletionChunk>(fragment.clone()) {
            Ok(chunk) => {
                if let Some(content) = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                {
                    self.text.push_str(&content);
                }
            }
            Err(e) => debug!("Stream fragment has no usable delta: {}", e),
        }

        self.fragments.push(fragment);
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Flush a trailing unterminated line and return the text and fragments.
    pub fn finish(mut self) -> (String, Vec<Value>) {
        if !self.done && !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.push_line(&String::from_utf8_lossy(&rest));
        }
        (self.text, self.fragments)
    }
}
