//! Remote-inference node
//!
//! `ApiNode` is what the graph host invokes: it resolves provider, model and
//! credential, encodes the attached media, builds the request and hands it to
//! a [`VisionLanguageService`]. Call failures come back as the error pair;
//! only a missing credential or an undecodable image is raised as `Err`.

use crate::ai::request::{build_request, build_user_message};
use crate::ai::{ApiClient, VisionLanguageService};
use crate::config::{resolve_api_key_with, Config};
use crate::media::{encode_image_blocking, encode_video, EncodedVideo, ImageTensor, VideoInput};
use crate::models::{CompletionCall, Endpoint, SamplingParams};
use crate::Result;
use tracing::{info, warn};

pub const CATEGORY: &str = "Qwen3-VL";
pub const RETURN_NAMES: [&str; 2] = ["text_output", "raw_response"];
pub const DEFAULT_PROMPT: &str = "Describe this image.";
pub const DEFAULT_FORMAT_TITLE: &str = "Qwen3-VL Response";

const MAX_TOKENS_RANGE: (u32, u32) = (1, 8192);
const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);
const TOP_P_RANGE: (f32, f32) = (0.0, 1.0);

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Inputs of one node invocation. `None` means "use the configured default".
#[derive(Debug, Clone, Default)]
pub struct ApiNodeInputs {
    pub text_prompt: String,
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub model_name: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub image: Option<ImageTensor>,
    pub video: Option<VideoInput>,
    pub stream: bool,
}

impl ApiNodeInputs {
    pub fn new(text_prompt: impl Into<String>) -> Self {
        Self {
            text_prompt: text_prompt.into(),
            ..Self::default()
        }
    }
}

pub struct ApiNode {
    config: Config,
    service: Box<dyn VisionLanguageService>,
    env_lookup: EnvLookup,
}

impl ApiNode {
    pub fn new(config: Config) -> Result<Self> {
        let client = ApiClient::from_config(&config)?;
        Ok(Self {
            config,
            service: Box::new(client),
            env_lookup: Box::new(|name: &str| std::env::var(name).ok()),
        })
    }

    pub fn with_service(mut self, service: impl VisionLanguageService + 'static) -> Self {
        self.service = Box::new(service);
        self
    }

    /// Replace the process environment as the last credential source.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env_lookup = Box::new(lookup);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one completion and return `(text_output, raw_response)`.
    pub async fn process(&self, mut inputs: ApiNodeInputs) -> Result<(String, String)> {
        let profile = self.config.provider_profile(inputs.provider.as_deref());
        let model = self.config.resolve_model(inputs.model_name.as_deref());
        let api_key = resolve_api_key_with(inputs.api_key.as_deref(), &profile, |name| {
            (self.env_lookup)(name)
        })?;

        let image_url = match inputs.image.take() {
            Some(tensor) => {
                Some(encode_image_blocking(tensor, self.config.image_max_dimension()).await?)
            }
            None => None,
        };

        let video_url = match &inputs.video {
            Some(video) => self.encode_video(video).await,
            None => None,
        };

        let message = build_user_message(&inputs.text_prompt, image_url, video_url);

        let stream = if inputs.stream && !self.config.streaming_enabled() {
            warn!("Streaming is disabled in the configuration, using a buffered request");
            false
        } else {
            inputs.stream
        };

        let sampling = self.sampling(&model, &inputs);
        let request = build_request(&model, message, sampling, stream);

        info!(
            "[{}] Sending request to {} with model {} (stream: {})",
            CATEGORY, profile.name, model, stream
        );

        let call = CompletionCall {
            endpoint: Endpoint {
                base_url: profile.base_url,
                api_key,
            },
            request,
        };

        Ok(self.service.complete(&call).await.into_tuple())
    }

    async fn encode_video(&self, video: &VideoInput) -> Option<String> {
        match encode_video(video).await {
            Ok(EncodedVideo::Url(url)) => Some(url),
            Ok(EncodedVideo::TooLarge { .. }) => None,
            Ok(EncodedVideo::NotFound(path)) => {
                warn!("Skipping video, no file at {}", path.display());
                None
            }
            Err(e) => {
                warn!("Skipping video, failed to encode: {}", e);
                None
            }
        }
    }

    fn sampling(&self, model: &str, inputs: &ApiNodeInputs) -> SamplingParams {
        let defaults = self.config.generation();

        // A model's own token ceiling from `models.available` narrows the range.
        let token_ceiling = self
            .config
            .model_info(model)
            .and_then(|info| info.max_tokens)
            .map_or(MAX_TOKENS_RANGE.1, |limit| {
                limit.clamp(MAX_TOKENS_RANGE.0, MAX_TOKENS_RANGE.1)
            });

        let max_tokens = inputs.max_tokens.unwrap_or(defaults.max_tokens);
        let temperature = finite_or_default("temperature", inputs.temperature, defaults.temperature);
        let top_p = finite_or_default("top_p", inputs.top_p, defaults.top_p);

        SamplingParams {
            max_tokens: clamp_logged("max_tokens", max_tokens, (MAX_TOKENS_RANGE.0, token_ceiling)),
            temperature: clamp_logged("temperature", temperature, TEMPERATURE_RANGE),
            top_p: clamp_logged("top_p", top_p, TOP_P_RANGE),
        }
    }
}

/// Call-time value unless it is NaN or infinite, in which case the
/// configured default is used.
fn finite_or_default(name: &str, value: Option<f32>, default: f32) -> f32 {
    match value {
        Some(value) if !value.is_finite() => {
            warn!("{} {} is not a finite number, using {}", name, value, default);
            default
        }
        Some(value) => value,
        None => default,
    }
}

fn clamp_logged<T>(name: &str, value: T, (min, max): (T, T)) -> T
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    let clamped = if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    };

    if clamped != value {
        warn!("{} {} is out of range, using {}", name, value, clamped);
    }
    clamped
}

/// Prefix a response with a title line and an 80-character rule.
pub fn format_response(response: &str, title: Option<&str>) -> String {
    let title = title.unwrap_or(DEFAULT_FORMAT_TITLE);
    format!("{}\n{}\n{}", title, "=".repeat(80), response)
}
