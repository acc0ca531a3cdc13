use crate::models::{ChatCompletionRequest, ChatMessage, ContentPart, SamplingParams};
use tracing::warn;

const ACCEPTED_VIDEO_SCHEMES: [&str; 3] = ["http://", "https://", "data:"];

/// Build the single user message: image, then video, then text.
///
/// A video URL that is not remote or an inline data URI is dropped with a
/// warning.
pub fn build_user_message(
    text: &str,
    image_url: Option<String>,
    video_url: Option<String>,
) -> ChatMessage {
    let mut content = Vec::with_capacity(3);

    if let Some(url) = image_url {
        content.push(ContentPart::image(url));
    }

    if let Some(url) = video_url {
        if ACCEPTED_VIDEO_SCHEMES
            .iter()
            .any(|scheme| url.starts_with(scheme))
        {
            content.push(ContentPart::video(url));
        } else {
            warn!("Dropping video with unsupported URL: {}", url);
        }
    }

    content.push(ContentPart::text(text));
    ChatMessage::user(content)
}

pub fn build_request(
    model: &str,
    message: ChatMessage,
    sampling: SamplingParams,
    stream: bool,
) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![message],
        max_tokens: sampling.max_tokens,
        temperature: sampling.temperature,
        top_p: sampling.top_p,
        stream,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_text_only_message() {
        let message = build_user_message("Describe this image.", None, None);

        assert_eq!(message.role, "user");
        assert_eq!(message.content, vec![ContentPart::text("Describe this image.")]);
    }

    #[test]
    fn test_media_precede_text() {
        let message = build_user_message(
            "What is going on?",
            Some("data:image/png;base64,AAAA".to_string()),
            Some("data:video/mp4;base64,BBBB".to_string()),
        );

        assert_eq!(
            message.content,
            vec![
                ContentPart::image("data:image/png;base64,AAAA"),
                ContentPart::video("data:video/mp4;base64,BBBB"),
                ContentPart::text("What is going on?"),
            ]
        );
    }

    #[test]
    fn test_unsupported_video_url_is_dropped() {
        let message = build_user_message("Hi", None, Some("/tmp/clip.mp4".to_string()));

        assert_eq!(message.content, vec![ContentPart::text("Hi")]);
    }

    #[test]
    fn test_remote_video_is_kept() {
        let message = build_user_message("Hi", None, Some("https://cdn.example.com/v.mp4".to_string()));

        assert_eq!(message.content.len(), 2);
        assert_eq!(message.content[0], ContentPart::video("https://cdn.example.com/v.mp4"));
    }

    #[test]
    fn test_build_request_copies_sampling() {
        let sampling = SamplingParams {
            max_tokens: 256,
            temperature: 0.3,
            top_p: 0.9,
        };
        let request = build_request(
            "qwen-vl-plus",
            build_user_message("Hi", None, None),
            sampling,
            true,
        );

        assert_eq!(request.model, "qwen-vl-plus");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.max_tokens, 256);
        assert_eq!(request.temperature, 0.3);
        assert_eq!(request.top_p, 0.9);
        assert!(request.stream);
    }
}
