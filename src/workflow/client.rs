//! Provider registry and factory.
//!
//! Maps provider names to concrete [`LlmProvider`] implementations.

use crate::error::WorkflowError;
use crate::workflow::config::WorkflowConfig;
use crate::workflow::provider::LlmProvider;
use crate::workflow::providers::OpenAiProvider;

/// Creates an [`LlmProvider`] based on the configured provider name.
///
/// # Supported Providers
///
/// - `"openai"` (default) — OpenAI-compatible APIs via `async-openai`
///
/// # Errors
///
/// Returns [`WorkflowError::UnsupportedProvider`] for unknown provider
/// names.
pub fn create_provider(config: &WorkflowConfig) -> Result<Box<dyn LlmProvider>, WorkflowError> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiProvider::new(config))),
        other => Err(WorkflowError::UnsupportedProvider {
            name: other.to_string(),
        }),
    }
}
