use super::retry::{retry_transient, RetryPolicy, DEFAULT_BASE_DELAY};
use super::stream::StreamAccumulator;
use super::VisionLanguageService;
use crate::config::Config;
use crate::models::{ChatCompletionResponse, CompletionCall, CompletionOutcome};
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const NO_RESPONSE_PLACEHOLDER: &str = "No response from model";
const INLINE_MEDIA_PREVIEW: usize = 48;

/// Why a single completion call failed.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("API Error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API request timeout ({} seconds)", .0.as_secs())]
    Timeout(Duration),

    #[error("Error processing response: {0}")]
    Response(String),
}

impl CallError {
    /// Connection-level faults, including a body cut off mid-transfer.
    pub fn is_transient(&self) -> bool {
        matches!(self, CallError::Connection(_))
    }

    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            CallError::Timeout(timeout)
        } else if err.is_connect() || err.is_request() || err.is_body() {
            CallError::Connection(err.to_string())
        } else {
            CallError::Response(err.to_string())
        }
    }

    /// Failure while reading the body of an accepted response. A body cut
    /// off mid-transfer surfaces as a body or decode error and is retried
    /// like any other connection fault.
    pub fn from_body_read(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            CallError::Timeout(timeout)
        } else if err.is_body() || err.is_decode() {
            CallError::Connection(err.to_string())
        } else {
            Self::from_reqwest(err, timeout)
        }
    }

    pub fn into_outcome(self) -> CompletionOutcome {
        let message = self.to_string();
        match self {
            CallError::Status { body, .. } => CompletionOutcome::failure(message, &body),
            CallError::Response(detail) => CompletionOutcome::failure(message, &detail),
            CallError::Connection(_) | CallError::Timeout(_) => {
                let detail = message.clone();
                CompletionOutcome::failure(message, &detail)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub stream_timeout: Duration,
    pub log_api_calls: bool,
    pub log_payloads: bool,
    pub proxy: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(600),
            stream_timeout: Duration::from_secs(300),
            log_api_calls: false,
            log_payloads: false,
            proxy: None,
        }
    }
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> Self {
        let logging = config.logging();
        Self {
            retry: RetryPolicy::new(config.max_retries(), DEFAULT_BASE_DELAY),
            log_api_calls: logging.log_api_calls,
            log_payloads: logging.log_payloads,
            proxy: config.proxy(),
            ..Self::default()
        }
    }
}

/// HTTP client for OpenAI-compatible chat completion endpoints.
pub struct ApiClient {
    client: Client,
    settings: ClientSettings,
}

impl ApiClient {
    pub fn new(settings: ClientSettings) -> Result<Self> {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(proxy) = &settings.proxy {
            debug!("Routing API requests through proxy {}", proxy);
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }

        Ok(Self {
            client: builder.build()?,
            settings,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(ClientSettings::from_config(config))
    }

    async fn send(
        &self,
        url: &str,
        call: &CompletionCall,
        timeout: Duration,
    ) -> std::result::Result<Response, CallError> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", call.endpoint.api_key))
            .header("Accept", "application/json")
            .timeout(timeout)
            .json(&call.request)
            .send()
            .await
            .map_err(|e| CallError::from_reqwest(e, timeout))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    debug!("Could not read error response body: {}", e);
                    String::new()
                }
            };
            error!("API error (status {}): {}", status.as_u16(), body);
            return Err(CallError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn send_once(
        &self,
        url: &str,
        call: &CompletionCall,
        attempt: u32,
    ) -> std::result::Result<String, CallError> {
        let timeout = self.settings.request_timeout;
        if attempt > 1 {
            info!("Retrying API call (attempt {}/{})", attempt, self.settings.retry.max_attempts);
        }

        let response = self.send(url, call, timeout).await?;
        response
            .text()
            .await
            .map_err(|e| CallError::from_body_read(e, timeout))
    }

    async fn complete_buffered(
        &self,
        call: &CompletionCall,
    ) -> std::result::Result<CompletionOutcome, CallError> {
        let url = completions_url(&call.endpoint.base_url);
        let url = url.as_str();

        let body = retry_transient(self.settings.retry, move |attempt| {
            self.send_once(url, call, attempt)
        })
        .await?;

        parse_completion_body(&body)
    }

    async fn complete_streaming(
        &self,
        call: &CompletionCall,
    ) -> std::result::Result<CompletionOutcome, CallError> {
        let url = completions_url(&call.endpoint.base_url);
        let timeout = self.settings.stream_timeout;

        let mut response = self.send(&url, call, timeout).await?;
        let mut accumulator = StreamAccumulator::new();

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| CallError::from_body_read(e, timeout))?
        {
            accumulator.push_bytes(&chunk);
            if accumulator.is_done() {
                break;
            }
        }

        let (text, fragments) = accumulator.finish();
        debug!("Stream finished with {} fragments", fragments.len());

        let raw = serde_json::to_string_pretty(&fragments)
            .map_err(|e| CallError::Response(e.to_string()))?;
        Ok(CompletionOutcome::success(text, raw))
    }

    fn log_call(&self, call: &CompletionCall) {
        if self.settings.log_api_calls {
            info!(
                "Calling {} with model {} (stream: {})",
                completions_url(&call.endpoint.base_url),
                call.request.model,
                call.request.stream
            );
        }

        if self.settings.log_payloads {
            match serde_json::to_value(&call.request) {
                Ok(mut payload) => {
                    elide_inline_media(&mut payload);
                    debug!("Request payload: {}", payload);
                }
                Err(e) => debug!("Could not serialize request payload: {}", e),
            }
        }
    }
}

#[async_trait]
impl VisionLanguageService for ApiClient {
    async fn complete(&self, call: &CompletionCall) -> CompletionOutcome {
        self.log_call(call);

        let result = if call.request.stream {
            self.complete_streaming(call).await
        } else {
            self.complete_buffered(call).await
        };

        match result {
            Ok(outcome) => {
                if self.settings.log_api_calls {
                    info!("API call completed ({} characters)", outcome.text.chars().count());
                }
                outcome
            }
            Err(e) => {
                error!("{}", e);
                e.into_outcome()
            }
        }
    }
}

pub fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

/// Turn a 200 body into the outcome pair; `raw` is the pretty-printed body.
pub fn parse_completion_body(body: &str) -> std::result::Result<CompletionOutcome, CallError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| CallError::Response(e.to_string()))?;
    let response: ChatCompletionResponse =
        serde_json::from_value(value.clone()).map_err(|e| CallError::Response(e.to_string()))?;

    if response.first_finish_reason() == Some("length") {
        warn!("Response was cut off at the max_tokens limit");
    }

    let text = response
        .first_content()
        .unwrap_or_else(|| NO_RESPONSE_PLACEHOLDER.to_string());
    let raw = serde_json::to_string_pretty(&value).map_err(|e| CallError::Response(e.to_string()))?;

    Ok(CompletionOutcome::success(text, raw))
}

/// Shorten inline `data:` URIs so payload logs stay readable.
pub fn elide_inline_media(value: &mut Value) {
    match value {
        Value::String(s) if s.starts_with("data:") && s.len() > INLINE_MEDIA_PREVIEW => {
            let cut = s
                .char_indices()
                .map(|(i, _)| i)
                .take_while(|&i| i <= INLINE_MEDIA_PREVIEW)
                .last()
                .unwrap_or(0);
            *s = format!("{}...<{} bytes>", &s[..cut], s.len());
        }
        Value::Array(items) => items.iter_mut().for_each(elide_inline_media),
        Value::Object(map) => map.values_mut().for_each(elide_inline_media),
        _ => {}
    }
}
