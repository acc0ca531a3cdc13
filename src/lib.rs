//! Qwen3-VL vision-language nodes
//!
//! Sends a text prompt, optionally with an image and a video, to an
//! OpenAI-compatible chat completion endpoint (DashScope by default) and
//! returns the generated text together with the raw provider response.

pub mod ai;
pub mod config;
pub mod error;
pub mod media;
pub mod models;
pub mod node;

pub use error::{Error, Result};
