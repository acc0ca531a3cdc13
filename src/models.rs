//! Data models and structures
//!
//! Defines the multimodal chat message sent to OpenAI-compatible
//! `/chat/completions` endpoints, the parts of the response we read back, and
//! the `(text, raw)` outcome pair handed to the graph host.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// URL wrapper used by `image_url` and `video_url` parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaUrl {
    pub url: String,
}

/// One discriminated unit of a multimodal message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: MediaUrl },
    VideoUrl { video_url: MediaUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: MediaUrl { url: url.into() },
        }
    }

    pub fn video(url: impl Into<String>) -> Self {
        ContentPart::VideoUrl {
            video_url: MediaUrl { url: url.into() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn user(content: Vec<ContentPart>) -> Self {
        Self {
            role: "user".to_string(),
            content,
        }
    }
}

/// Request body for `POST {base_url}/chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stream: bool,
}

/// Sampling parameters after call-time and configured defaults are merged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub message: Option<AssistantMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Assistant message; `content` is usually a string but is kept loose so
/// providers returning structured content still produce text.
#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Option<Value>,
}

impl ChatCompletionResponse {
    /// Text of `choices[0].message.content`, if any.
    pub fn first_content(&self) -> Option<String> {
        let content = self.choices.first()?.message.as_ref()?.content.as_ref()?;
        match content {
            Value::String(text) => Some(text.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// `choices[0].finish_reason`, e.g. `"stop"` or `"length"`.
    pub fn first_finish_reason(&self) -> Option<&str> {
        self.choices.first()?.finish_reason.as_deref()
    }
}

/// One `data:` fragment of a streamed completion.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

/// Where a completion request is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub base_url: String,
    pub api_key: String,
}

/// A fully resolved completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionCall {
    pub endpoint: Endpoint,
    pub request: ChatCompletionRequest,
}

/// The `(text_output, raw_response)` pair returned for every call.
///
/// Failures carry a human-readable message in `text` and a JSON
/// `{"error": ...}` envelope in `raw`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutcome {
    pub text: String,
    pub raw: String,
    pub failed: bool,
}

impl CompletionOutcome {
    pub fn success(text: String, raw: String) -> Self {
        Self {
            text,
            raw,
            failed: false,
        }
    }

    pub fn failure(message: String, detail: &str) -> Self {
        let raw = serde_json::json!({ "error": detail }).to_string();
        Self {
            text: message,
            raw,
            failed: true,
        }
    }

    pub fn into_tuple(self) -> (String, String) {
        (self.text, self.raw)
    }
}
