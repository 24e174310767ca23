//! Pluggable LLM provider trait.
//!
//! Implementations translate provider-agnostic [`ChatRequest`]/[`ChatResponse`]
//! into vendor SDK calls. The classifier, planner, and step executor
//! all share one provider instance; swapping vendors touches nothing
//! else.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use super::message::{ChatRequest, ChatResponse};
use crate::error::WorkflowError;

/// Trait for LLM provider backends.
///
/// Implementations own the transport layer (HTTP, SDK calls, request
/// deadlines) while presenting a uniform interface to agents.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g. `"openai"`).
    fn name(&self) -> &'static str;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] on API failures, timeouts, or parse
    /// errors.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, WorkflowError>;

    /// Executes a streaming chat completion request.
    ///
    /// Returns a stream of text chunks as they arrive from the provider.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] on connection or streaming failures.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, WorkflowError>> + Send>>, WorkflowError>;
}
