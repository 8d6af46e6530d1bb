mod api;
pub mod prompts;
mod provider;

use async_trait::async_trait;

use crate::error::Result;

pub use api::LlmApiClient;
pub use provider::{CompletionOptions, LlmBackend, LlmProvider};

/// Free-form text completion used for contextual correction.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}
