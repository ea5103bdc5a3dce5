use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// One role-attributed message in a chat-completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// An image input for vision analysis: either hosted behind a URL or inline
/// PNG bytes (a raw canvas snapshot off the WebSocket).
#[derive(Debug, Clone)]
pub enum ImageSource {
    Url(String),
    Png(Vec<u8>),
}

impl ImageSource {
    /// The URL form the vision API accepts; inline bytes become a data URL.
    pub fn to_request_url(&self) -> String {
        match self {
            ImageSource::Url(url) => url.clone(),
            ImageSource::Png(bytes) => {
                format!("data:image/png;base64,{}", BASE64.encode(bytes))
            }
        }
    }
}

/// Fixed generation parameters. Configured once at startup, never negotiated
/// per request.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// Speaker identity for speech synthesis.
    pub voice_id: String,
    /// Playback speed multiplier for synthesized speech.
    pub speech_rate: f32,
    /// Resolution for generated background images.
    pub image_size: String,
    /// Upper bound on generated reply length.
    pub max_response_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            voice_id: "nova".to_string(),
            speech_rate: 1.0,
            image_size: "1024x1024".to_string(),
            max_response_tokens: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LlmResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: String,
}

// The capability seam between the orchestrator and the AI provider. The
// orchestrator owns every prompt and only depends on these narrow
// input/output contracts, so unit tests can drive it through `mockall`'s
// generated `MockAiProvider` without touching the network.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait AiProvider {
    /// Speech-to-text over raw audio bytes.
    async fn transcribe(&self, audio: &[u8]) -> Result<String, CoreError>;

    /// Chat completion over an ordered message list.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CoreError>;

    /// Text-to-speech; returns the synthesized audio bytes.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, CoreError>;

    /// Vision analysis of an image under the given instruction; returns the
    /// model's free-text reply.
    async fn analyze_image(
        &self,
        instruction: &str,
        image: &ImageSource,
    ) -> Result<String, CoreError>;

    /// Image generation from a text prompt; returns the hosted image URL.
    async fn generate_image(&self, prompt: &str) -> Result<String, CoreError>;

    /// Plain download of image bytes from a URL.
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, CoreError>;
}

/// Production adapter over the OpenAI REST API.
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    chat_model: String,
    vision_model: String,
    options: GenerationOptions,
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        chat_model: String,
        vision_model: String,
        options: GenerationOptions,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key,
            chat_model,
            vision_model,
            options,
        }
    }

    async fn chat_request(
        &self,
        body: serde_json::Value,
        failure: fn(String) -> CoreError,
    ) -> Result<String, CoreError> {
        let resp = self
            .client
            .post(format!("{OPENAI_API_BASE}/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| failure(e.to_string()))?
            .error_for_status()
            .map_err(|e| failure(e.to_string()))?
            .json::<LlmResponse>()
            .await
            .map_err(|e| failure(e.to_string()))?;

        resp.choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| failure("no choices in response".to_string()))
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, CoreError> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| CoreError::Transcription(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", "whisper-1")
            .part("file", part);

        let resp = self
            .client
            .post(format!("{OPENAI_API_BASE}/audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CoreError::Transcription(e.to_string()))?
            .error_for_status()
            .map_err(|e| CoreError::Transcription(e.to_string()))?
            .json::<TranscriptionResponse>()
            .await
            .map_err(|e| CoreError::Transcription(e.to_string()))?;

        Ok(resp.text)
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CoreError> {
        let body = serde_json::json!({
            "model": self.chat_model,
            "messages": messages,
            "max_tokens": self.options.max_response_tokens,
        });
        self.chat_request(body, CoreError::ChatCompletion).await
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, CoreError> {
        let body = serde_json::json!({
            "model": "tts-1",
            "voice": self.options.voice_id,
            "input": text,
            "speed": self.options.speech_rate,
        });

        let resp = self
            .client
            .post(format!("{OPENAI_API_BASE}/audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Synthesis(e.to_string()))?
            .error_for_status()
            .map_err(|e| CoreError::Synthesis(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| CoreError::Synthesis(e.to_string()))?;

        Ok(resp.to_vec())
    }

    async fn analyze_image(
        &self,
        instruction: &str,
        image: &ImageSource,
    ) -> Result<String, CoreError> {
        let body = serde_json::json!({
            "model": self.vision_model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": instruction },
                    { "type": "image_url", "image_url": { "url": image.to_request_url() } }
                ]
            }],
            "max_tokens": self.options.max_response_tokens,
        });
        self.chat_request(body, CoreError::VisionAnalysis).await
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, CoreError> {
        let body = serde_json::json!({
            "model": "dall-e-3",
            "prompt": prompt,
            "n": 1,
            "size": self.options.image_size,
        });

        let resp = self
            .client
            .post(format!("{OPENAI_API_BASE}/images/generations"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::ImageGeneration(e.to_string()))?
            .error_for_status()
            .map_err(|e| CoreError::ImageGeneration(e.to_string()))?
            .json::<ImageGenerationResponse>()
            .await
            .map_err(|e| CoreError::ImageGeneration(e.to_string()))?;

        resp.data
            .first()
            .map(|image| image.url.clone())
            .ok_or_else(|| CoreError::ImageGeneration("no image in response".to_string()))
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, CoreError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CoreError::Download(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(CoreError::Download(format!(
                "unexpected status {} from {url}",
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| CoreError::Download(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn inline_png_becomes_a_data_url() {
        let image = ImageSource::Png(vec![0x89, 0x50, 0x4e, 0x47]);
        let url = image.to_request_url();
        assert!(url.starts_with("data:image/png;base64,"));
        assert!(url.len() > "data:image/png;base64,".len());
    }

    #[test]
    fn hosted_image_url_passes_through() {
        let image = ImageSource::Url("https://example.com/image.png".to_string());
        assert_eq!(image.to_request_url(), "https://example.com/image.png");
    }

    #[test]
    fn chat_message_roles_serialize_as_expected() {
        let message = ChatMessage::system("지시문");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "지시문");
    }

    // Live integration test against the OpenAI API. Ignored by default so
    // `cargo test` runs without an API key; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn live_complete_returns_text() {
        dotenvy::dotenv_override().ok();
        let api_key = env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set");
        let provider = OpenAiProvider::new(
            api_key,
            "gpt-4o".to_string(),
            "gpt-4o".to_string(),
            GenerationOptions::default(),
        );

        let reply = provider
            .complete(&[ChatMessage::user("한 단어로 인사해 주세요.")])
            .await
            .expect("completion failed");
        assert!(!reply.trim().is_empty());
    }
}
