use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{parse_llm_provider_model, VisionConfig};
use crate::error::{NoteError, Result};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat-completions client that sends one image plus one text prompt.
#[derive(Clone, Debug)]
pub struct OpenAiVisionClient {
    client: Client,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    max_retries: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiVisionClient {
    pub fn new(config: &VisionConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| NoteError::VisionUnavailable("API key required for vision model".to_string()))?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| OPENAI_BASE_URL.to_string());

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NoteError::Vision(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    /// Sends `image_png` with `prompt` and returns the trimmed reply text.
    pub async fn ask(&self, image_png: &[u8], prompt: &str, model: &str) -> Result<String> {
        let (_, model) = parse_llm_provider_model(model);
        let data_url = format!("data:image/png;base64,{}", STANDARD.encode(image_png));

        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        self.make_request(&request).await
    }

    async fn make_request(&self, request: &ChatRequest) -> Result<String> {
        let mut retries = 0;

        loop {
            let response = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(request)
                .send()
                .await;

            let retry_reason = match response {
                Ok(resp) if resp.status().is_success() => {
                    let chat_response: ChatResponse = resp
                        .json()
                        .await
                        .map_err(|e| NoteError::Vision(format!("Failed to parse response: {e}")))?;

                    return chat_response
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.content)
                        .map(|text| text.trim().to_string())
                        .ok_or_else(|| NoteError::Vision("No response from vision model".to_string()));
                }
                Ok(resp) if resp.status().as_u16() == 429 || resp.status().is_server_error() => {
                    resp.status().to_string()
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(NoteError::Vision(format!(
                        "Vision request failed: {status} - {body}"
                    )));
                }
                Err(e) => e.to_string(),
            };

            retries += 1;
            if retries > self.max_retries {
                return Err(NoteError::Vision(format!(
                    "Vision request failed after {} retries: {retry_reason}",
                    self.max_retries
                )));
            }
            let delay = Duration::from_millis(100 * 2_u64.pow(retries));
            tracing::warn!(attempt = retries, delay_ms = delay.as_millis() as u64, reason = %retry_reason, "vision request retrying");
            tokio::time::sleep(delay).await;
        }
    }
}
