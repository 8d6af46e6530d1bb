use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
    Client,
};

use crate::{
    config::{parse_llm_provider_model, LlmConfig},
    error::{NoteError, Result},
    llm::provider::CompletionOptions,
};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const LMSTUDIO_BASE_URL: &str = "http://localhost:1234/v1";

#[derive(Debug, Clone)]
struct ApiConfig {
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout_secs: u64,
    max_retries: u32,
}

/// Chat-completions client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct LlmApiClient {
    client: Client<OpenAIConfig>,
    config: ApiConfig,
}

impl LlmApiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_config = ApiConfig::from_llm_config(config);

        let (provider, _) = parse_llm_provider_model(&config.model);
        let needs_api_key = !matches!(
            provider.to_lowercase().as_str(),
            "ollama" | "local" | "lmstudio"
        );
        if needs_api_key && api_config.api_key.is_none() {
            return Err(NoteError::LlmUnavailable(format!(
                "API key required for provider '{provider}'"
            )));
        }

        let openai_config = OpenAIConfig::new()
            .with_api_base(api_config.base_url.clone())
            .with_api_key(api_config.api_key.clone().unwrap_or_default());

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api_config.timeout_secs))
            .build()
            .map_err(|error| NoteError::Llm(format!("Failed to create LLM HTTP client: {error}")))?;

        // async-openai retries server errors on its own schedule; cap it at our timeout.
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(api_config.timeout_secs)),
            ..Default::default()
        };

        let client = Client::with_config(openai_config)
            .with_http_client(http_client)
            .with_backoff(backoff);

        Ok(Self {
            client,
            config: api_config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: Option<&CompletionOptions>,
    ) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(NoteError::Validation("Prompt cannot be empty".to_string()));
        }

        let mut last_error: Option<NoteError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay_ms = 100 * 2_u64.pow(attempt - 1);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            let request = self.build_request(prompt, system_prompt, options)?;

            match self.client.chat().create(request).await {
                Ok(response) => {
                    let content = Self::extract_content(response)?;
                    tracing::debug!(
                        model = %self.config.model,
                        response_len = content.len(),
                        "completion received"
                    );
                    return Ok(content);
                }
                Err(error) => {
                    if let Some(terminal) =
                        Self::rate_limit_error(&error).or_else(|| Self::auth_error(&error))
                    {
                        return Err(terminal);
                    }

                    let retryable = Self::is_retryable(&error);
                    let mapped = Self::map_openai_error(error);
                    if retryable && attempt < self.config.max_retries {
                        tracing::warn!(attempt = attempt + 1, error = %mapped, "completion failed, retrying");
                        last_error = Some(mapped);
                        continue;
                    }
                    return Err(mapped);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| NoteError::Llm("LLM completion failed after retries".to_string())))
    }

    fn build_request(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: Option<&CompletionOptions>,
    ) -> Result<CreateChatCompletionRequest> {
        let mut messages = Vec::new();

        if let Some(system_prompt) = system_prompt.filter(|value| !value.trim().is_empty()) {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt)
                    .build()
                    .map_err(|error| NoteError::Validation(format!("Invalid system prompt: {error}")))?
                    .into(),
            );
        }

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(|error| NoteError::Validation(format!("Invalid user prompt: {error}")))?
                .into(),
        );

        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(self.config.model.clone()).messages(messages);
        if let Some(options) = options {
            if let Some(temperature) = options.temperature {
                request.temperature(temperature);
            }
            if let Some(max_tokens) = options.max_tokens {
                request.max_tokens(max_tokens);
            }
        }

        request
            .build()
            .map_err(|error| NoteError::Validation(format!("Invalid LLM completion request: {error}")))
    }

    fn extract_content(response: CreateChatCompletionResponse) -> Result<String> {
        let message = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| NoteError::Llm("LLM response contained no choices".to_string()))?
            .message
            .content
            .unwrap_or_default();

        if message.trim().is_empty() {
            return Err(NoteError::Llm("LLM response contained empty content".to_string()));
        }

        Ok(message)
    }

    fn is_retryable(error: &OpenAIError) -> bool {
        match error {
            OpenAIError::ApiError(api_error) => api_error.r#type.is_none() && api_error.code.is_none(),
            OpenAIError::Reqwest(reqwest_error) => reqwest_error
                .status()
                .map(|status| status.is_server_error())
                .unwrap_or(true),
            _ => false,
        }
    }

    fn rate_limit_error(error: &OpenAIError) -> Option<NoteError> {
        let limited = match error {
            OpenAIError::Reqwest(reqwest_error) => {
                reqwest_error.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS)
            }
            OpenAIError::ApiError(api_error) => api_error_mentions(
                api_error,
                &["rate limit", "too many requests", "rate_limit", "insufficient_quota"],
            ),
            _ => false,
        };
        limited.then_some(NoteError::LlmRateLimit { retry_after: None })
    }

    fn auth_error(error: &OpenAIError) -> Option<NoteError> {
        match error {
            OpenAIError::Reqwest(reqwest_error)
                if matches!(
                    reqwest_error.status(),
                    Some(reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN)
                ) =>
            {
                Some(NoteError::Llm(format!("LLM authentication failed: {reqwest_error}")))
            }
            OpenAIError::ApiError(api_error)
                if api_error_mentions(
                    api_error,
                    &["unauthorized", "forbidden", "authentication", "invalid api key", "invalid_api_key"],
                ) =>
            {
                Some(NoteError::Llm(format!("LLM authentication failed: {api_error}")))
            }
            _ => None,
        }
    }

    fn map_openai_error(error: OpenAIError) -> NoteError {
        match error {
            OpenAIError::Reqwest(reqwest_error) => {
                NoteError::Llm(format!("LLM request failed: {reqwest_error}"))
            }
            OpenAIError::ApiError(api_error) => NoteError::Llm(format!("LLM API error: {api_error}")),
            OpenAIError::JSONDeserialize(err) => {
                NoteError::Llm(format!("Failed to parse LLM response: {err}"))
            }
            OpenAIError::InvalidArgument(message) => NoteError::Validation(message),
            other => NoteError::Llm(other.to_string()),
        }
    }
}

/// Case-insensitive search over an API error's message, type and code.
fn api_error_mentions(api_error: &ApiError, needles: &[&str]) -> bool {
    let haystack = format!(
        "{} {} {}",
        api_error.message,
        api_error.r#type.as_deref().unwrap_or_default(),
        api_error.code.as_deref().unwrap_or_default()
    )
    .to_lowercase();
    needles.iter().any(|needle| haystack.contains(needle))
}

impl ApiConfig {
    fn from_llm_config(config: &LlmConfig) -> Self {
        let (provider, model) = parse_llm_provider_model(&config.model);

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(provider).to_string());

        let model = if provider.eq_ignore_ascii_case("local") {
            config.model.clone()
        } else {
            model.to_string()
        };

        Self {
            base_url,
            api_key: config.api_key.clone(),
            model,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        }
    }
}

fn default_base_url(provider: &str) -> &'static str {
    match provider.to_lowercase().as_str() {
        "openrouter" => OPENROUTER_BASE_URL,
        "ollama" => OLLAMA_BASE_URL,
        "lmstudio" => LMSTUDIO_BASE_URL,
        _ => OPENAI_BASE_URL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(model: &str, api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            model: model.to_string(),
            api_key: api_key.map(str::to_string),
            base_url: None,
            timeout_secs: 30,
            max_retries: 0,
        }
    }

    #[test]
    fn test_local_providers_need_no_key() {
        let client = LlmApiClient::new(&config("ollama/llama3", None)).expect("client");
        assert_eq!(client.model(), "llama3");
        assert_eq!(client.config.base_url, OLLAMA_BASE_URL);
    }

    #[test]
    fn test_hosted_provider_requires_key() {
        let result = LlmApiClient::new(&config("openai/gpt-4o-mini", None));
        assert!(matches!(result, Err(NoteError::LlmUnavailable(_))));
    }

    #[test]
    fn test_unprefixed_model_is_kept_whole() {
        let api = ApiConfig::from_llm_config(&config("mistral-7b", None));
        assert_eq!(api.model, "mistral-7b");
        assert_eq!(api.base_url, OPENAI_BASE_URL);
    }

    #[test]
    fn test_request_carries_options() {
        let client = LlmApiClient::new(&config("ollama/llama3", None)).expect("client");
        let options = CompletionOptions {
            temperature: Some(0.1),
            max_tokens: Some(500),
        };
        let request = client
            .build_request("fix this", Some("You correct OCR text."), Some(&options))
            .expect("request");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.temperature, Some(0.1));
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected() {
        let client = LlmApiClient::new(&config("ollama/llama3", None)).expect("client");
        let result = client.complete("   ", None, None).await;
        assert!(matches!(result, Err(NoteError::Validation(_))));
    }
}
