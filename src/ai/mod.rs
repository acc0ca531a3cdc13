//! Vision-language service integration
//!
//! Sends multimodal chat completion requests to OpenAI-compatible endpoints
//! (DashScope and friends), with retry for buffered calls and incremental
//! parsing for streamed ones.

pub mod client;
pub mod mock;
pub mod request;
pub mod retry;
pub mod stream;

pub use client::{ApiClient, CallError, ClientSettings};
pub use mock::MockVisionClient;
pub use retry::RetryPolicy;

use crate::models::{CompletionCall, CompletionOutcome};
use async_trait::async_trait;

/// A backend that answers completion calls.
///
/// Implementations never fail outright: call-level errors are folded into a
/// failed [`CompletionOutcome`].
#[async_trait]
pub trait VisionLanguageService: Send + Sync {
    async fn complete(&self, call: &CompletionCall) -> CompletionOutcome;
}
