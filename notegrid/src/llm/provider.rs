use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{parse_llm_provider_model, LlmConfig};
use crate::error::{NoteError, Result};
use crate::llm::api::LlmApiClient;
use crate::llm::TextCompletion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAI,
    OpenRouter,
    Ollama,
    LmStudio,
    OpenAICompatible { base_url: String },
    Unavailable { reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

const CORRECTION_SYSTEM_PROMPT: &str =
    "You correct recognition errors in transcribed handwriting and answer with JSON only.";

#[derive(Debug, Clone)]
pub struct LlmProvider {
    backend: LlmBackend,
    config: Option<Arc<LlmConfig>>,
}

impl LlmProvider {
    pub fn new(config: Option<&LlmConfig>) -> Self {
        let Some(config) = config else {
            return Self::unavailable("No LLM configuration provided");
        };

        let (provider, _model) = parse_llm_provider_model(&config.model);

        let backend = match provider.to_lowercase().as_str() {
            "openai" => LlmBackend::OpenAI,
            "openrouter" => LlmBackend::OpenRouter,
            "ollama" => LlmBackend::Ollama,
            "lmstudio" => LlmBackend::LmStudio,
            _ => match &config.base_url {
                Some(base_url) => LlmBackend::OpenAICompatible {
                    base_url: base_url.clone(),
                },
                None => LlmBackend::Unavailable {
                    reason: format!("Unknown provider in model: {}", config.model),
                },
            },
        };

        Self {
            backend,
            config: Some(Arc::new(config.clone())),
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            backend: LlmBackend::Unavailable {
                reason: reason.to_string(),
            },
            config: None,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.backend, LlmBackend::Unavailable { .. })
    }

    pub fn backend(&self) -> &LlmBackend {
        &self.backend
    }

    pub fn config(&self) -> Option<&LlmConfig> {
        self.config.as_deref()
    }

    fn client(&self) -> Result<LlmApiClient> {
        if let LlmBackend::Unavailable { reason } = &self.backend {
            return Err(NoteError::LlmUnavailable(reason.clone()));
        }
        let config = self
            .config()
            .ok_or_else(|| NoteError::LlmUnavailable("No config available".to_string()))?;
        LlmApiClient::new(config)
    }
}

#[async_trait]
impl TextCompletion for LlmProvider {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let options = CompletionOptions {
            temperature: Some(0.1),
            max_tokens: Some(1000),
        };
        self.client()?
            .complete(prompt, Some(CORRECTION_SYSTEM_PROMPT), Some(&options))
            .await
    }
}
