//! Remote vision capability: page layout analysis and region transcription.

mod api;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::VisionConfig;
use crate::error::{NoteError, Result};
use crate::llm::prompts::layout_analysis_prompt;

pub use api::OpenAiVisionClient;

static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NoteHint {
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub has_qr_code: bool,
    #[serde(default)]
    pub has_title: bool,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LayoutAnalysis {
    #[serde(default)]
    pub total_notes: u32,
    #[serde(default)]
    pub layout: String,
    #[serde(default)]
    pub notes: Vec<NoteHint>,
}

/// Pulls the layout object out of a reply that may wrap it in prose or a
/// code fence.
pub fn parse_layout(reply: &str) -> Result<LayoutAnalysis> {
    let object = JSON_OBJECT
        .find(reply)
        .ok_or_else(|| NoteError::Vision("no JSON object in layout response".to_string()))?;
    Ok(serde_json::from_str(object.as_str())?)
}

#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn extract_text(&self, image_png: &[u8], prompt: &str, model: &str) -> Result<String>;

    async fn analyze_layout(&self, image_png: &[u8], model: &str) -> Result<LayoutAnalysis>;
}

#[derive(Debug, Clone)]
pub enum VisionBackend {
    OpenAI(OpenAiVisionClient),
    Unavailable { reason: String },
}

/// Configured vision backend, unavailable when no key is set.
#[derive(Debug, Clone)]
pub struct VisionProvider {
    backend: VisionBackend,
}

impl VisionProvider {
    pub fn new(config: &VisionConfig) -> Self {
        let backend = match OpenAiVisionClient::new(config) {
            Ok(client) => VisionBackend::OpenAI(client),
            Err(error) => {
                tracing::warn!(error = %error, "vision model unavailable");
                VisionBackend::Unavailable {
                    reason: error.to_string(),
                }
            }
        };
        Self { backend }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            backend: VisionBackend::Unavailable {
                reason: reason.to_string(),
            },
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.backend, VisionBackend::Unavailable { .. })
    }

    fn client(&self) -> Result<&OpenAiVisionClient> {
        match &self.backend {
            VisionBackend::OpenAI(client) => Ok(client),
            VisionBackend::Unavailable { reason } => Err(NoteError::VisionUnavailable(reason.clone())),
        }
    }
}

#[async_trait]
impl VisionClient for VisionProvider {
    async fn extract_text(&self, image_png: &[u8], prompt: &str, model: &str) -> Result<String> {
        self.client()?.ask(image_png, prompt, model).await
    }

    async fn analyze_layout(&self, image_png: &[u8], model: &str) -> Result<LayoutAnalysis> {
        let reply = self
            .client()?
            .ask(image_png, &layout_analysis_prompt(), model)
            .await?;
        parse_layout(&reply)
    }
}
