//! Step executor: the bounded reason-act loop.
//!
//! For the current step, each turn sends the transcript to the model,
//! emits the model's reasoning as a thought, dispatches this turn's
//! tool calls concurrently, and appends every call and result to the
//! in-progress message — nothing is discarded, even on later failure.
//! The step completes when a turn produces no tool calls; hitting the
//! per-step turn cap marks the step failed and lets the workflow
//! continue rather than hang.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::config::WorkflowConfig;
use super::message::{
    ChatRequest, assistant_tool_calls_message, system_message, tool_message, user_message,
};
use super::plan::{Step, StepOutcome, StepStatus};
use super::prompt::build_step_prompt;
use super::provider::LlmProvider;
use super::tool::{ToolCall, ToolRegistry, ToolResult};
use crate::error::{ToolError, WorkflowError};
use crate::stream::event::{EventPayload, Thought, ToolCallUpdate};
use crate::stream::merge::MessageFeed;
use crate::stream::queue::CancelToken;

/// Runs single steps against the provider and tool registry.
pub struct StepExecutor {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    model: String,
    max_tokens: u32,
    llm_timeout: Duration,
    max_step_turns: usize,
    max_parallel_tools: usize,
    system_prompt: String,
}

impl StepExecutor {
    /// Creates an executor from configuration and the step system prompt.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        config: &WorkflowConfig,
        system_prompt: String,
    ) -> Self {
        Self {
            provider,
            tools,
            model: config.step_model.clone(),
            max_tokens: config.step_max_tokens,
            llm_timeout: config.llm_timeout,
            max_step_turns: config.max_step_turns,
            max_parallel_tools: config.max_parallel_tools.max(1),
            system_prompt,
        }
    }

    /// Runs one step to completion, mutating its status and outcome.
    ///
    /// Model and tool failures are folded into the step's outcome (the
    /// step fails, the workflow continues). The only `Err` returns are
    /// workflow-stopping: cancellation and a closed event queue.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Cancelled`] when the thread's token
    /// fired, [`WorkflowError::QueueClosed`] when the consumer is gone.
    pub async fn run_step(
        &self,
        feed: &mut MessageFeed,
        cancel: &CancelToken,
        step: &mut Step,
        step_index: usize,
        prior_results: &str,
    ) -> Result<(), WorkflowError> {
        step.start();
        feed.emit(EventPayload::StepProgress {
            step_index,
            status: StepStatus::Running,
            title: step.title.clone(),
        })
        .await?;

        let tool_defs = self
            .tools
            .definitions_for(step.kind)
            .into_iter()
            .filter(|d| step.permits_tool(&d.name))
            .collect();

        let mut request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                system_message(&self.system_prompt),
                user_message(&build_step_prompt(step, step_index, prior_results)),
            ],
            temperature: Some(0.0),
            max_tokens: Some(self.max_tokens),
            json_mode: false,
            stream: false,
            tools: tool_defs,
        };

        let mut outcome = StepOutcome::default();

        for turn in 0..self.max_step_turns {
            if cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }

            let response = match tokio::time::timeout(
                self.llm_timeout,
                self.provider.chat(&request),
            )
            .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    outcome.errors.push(format!("model call failed: {e}"));
                    return self.conclude(feed, step, step_index, outcome, true).await;
                }
                Err(_) => {
                    outcome.errors.push(
                        WorkflowError::Timeout {
                            operation: "step model call".to_string(),
                            secs: self.llm_timeout.as_secs(),
                        }
                        .to_string(),
                    );
                    return self.conclude(feed, step, step_index, outcome, true).await;
                }
            };

            if !response.content.trim().is_empty() {
                feed.emit(EventPayload::Thoughts {
                    thoughts: vec![Thought {
                        step_index,
                        text: response.content.clone(),
                        after_tool: turn > 0,
                    }],
                })
                .await?;
            }

            // Completion signal: a turn without tool calls.
            if response.tool_calls.is_empty() {
                debug!(step_index, turn, "step completed");
                outcome.summary = response.content;
                let failed = outcome.is_empty() && !outcome.errors.is_empty();
                return self.conclude(feed, step, step_index, outcome, failed).await;
            }

            debug!(
                step_index,
                turn,
                tool_count = response.tool_calls.len(),
                "dispatching tool calls"
            );

            feed.emit(EventPayload::ToolCalls {
                calls: response
                    .tool_calls
                    .iter()
                    .map(|tc| ToolCallUpdate {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        args: serde_json::from_str(&tc.arguments)
                            .unwrap_or(serde_json::Value::Null),
                    })
                    .collect(),
            })
            .await?;

            request
                .messages
                .push(assistant_tool_calls_message(response.tool_calls.clone()));

            let results = self
                .dispatch_turn(step, &response.tool_calls, cancel)
                .await?;

            for result in results {
                let result_value = match &result.outcome {
                    Ok(value) => value.clone(),
                    Err(e) => serde_json::to_value(e)
                        .unwrap_or_else(|_| serde_json::Value::String(e.to_string())),
                };
                feed.emit(EventPayload::ToolCallResult {
                    call_id: Some(result.call_id.clone()),
                    name: Some(result.name.clone()),
                    result: result_value,
                })
                .await?;

                request
                    .messages
                    .push(tool_message(&result.call_id, &result.transcript_content()));

                match result.outcome {
                    Ok(value) => outcome.data.push(value),
                    Err(e) => outcome.errors.push(e.to_string()),
                }
            }
        }

        warn!(step_index, max_turns = self.max_step_turns, "step turn cap hit");
        outcome.errors.push(
            WorkflowError::StepTurnsExceeded {
                max_turns: self.max_step_turns,
            }
            .to_string(),
        );
        self.conclude(feed, step, step_index, outcome, true).await
    }

    /// Dispatches one turn's tool calls concurrently and awaits the
    /// full set before returning — no partial-turn progression.
    /// Results come back in call order regardless of completion order.
    async fn dispatch_turn(
        &self,
        step: &Step,
        calls: &[ToolCall],
        cancel: &CancelToken,
    ) -> Result<Vec<ToolResult>, WorkflowError> {
        if cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }

        enum Pending {
            Ready(ToolResult),
            Running(tokio::task::JoinHandle<ToolResult>),
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel_tools));
        let mut pending = Vec::with_capacity(calls.len());

        for call in calls {
            if let Some(refusal) = self.policy_refusal(step, call) {
                pending.push((call.clone(), Pending::Ready(refusal)));
                continue;
            }

            let tools = Arc::clone(&self.tools);
            let semaphore = Arc::clone(&semaphore);
            let call_owned = call.clone();
            let handle = tokio::spawn(async move {
                let permit = semaphore.acquire_owned().await;
                if permit.is_err() {
                    return ToolResult {
                        call_id: call_owned.id.clone(),
                        name: call_owned.name.clone(),
                        outcome: Err(ToolError::new(
                            &call_owned.name,
                            crate::error::ToolErrorKind::UpstreamError,
                            "dispatch semaphore closed",
                        )),
                    };
                }
                tools.invoke(&call_owned).await
            });
            pending.push((call.clone(), Pending::Running(handle)));
        }

        let mut results = Vec::with_capacity(pending.len());
        for (call, task) in pending {
            match task {
                Pending::Ready(result) => results.push(result),
                Pending::Running(handle) => match handle.await {
                    Ok(result) => results.push(result),
                    Err(e) => results.push(ToolResult {
                        call_id: call.id,
                        name: call.name.clone(),
                        outcome: Err(ToolError::new(
                            &call.name,
                            crate::error::ToolErrorKind::UpstreamError,
                            format!("task join failed: {e}"),
                        )),
                    }),
                },
            }
        }

        Ok(results)
    }

    /// Checks the step's structured allow/deny sets and the kind gate.
    /// A refused call is recorded with `PERMISSION_DENIED` and never
    /// dispatched.
    fn policy_refusal(&self, step: &Step, call: &ToolCall) -> Option<ToolResult> {
        let refusal = if !step.permits_tool(&call.name) {
            Some("tool is forbidden for this step")
        } else {
            match (self.tools.category_of(&call.name), step.kind.permitted_category()) {
                (Some(category), Some(permitted)) if category == permitted => None,
                (None, _) => None, // unknown tool: let dispatch report NOT_FOUND
                _ => Some("tool category is not permitted for this step kind"),
            }
        };

        refusal.map(|message| ToolResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: Err(ToolError::permission_denied(&call.name, message)),
        })
    }

    async fn conclude(
        &self,
        feed: &mut MessageFeed,
        step: &mut Step,
        step_index: usize,
        outcome: StepOutcome,
        failed: bool,
    ) -> Result<(), WorkflowError> {
        let status = if failed {
            StepStatus::Failed
        } else {
            StepStatus::Done
        };
        step.finish(outcome, failed);
        feed.emit(EventPayload::StepProgress {
            step_index,
            status,
            title: step.title.clone(),
        })
        .await
    }
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("max_step_turns", &self.max_step_turns)
            .field("max_parallel_tools", &self.max_parallel_tools)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;
    use crate::workflow::message::{ChatResponse, TokenUsage};
    use crate::workflow::plan::StepKind;
    use crate::workflow::prompt::STEP_SYSTEM_PROMPT;
    use crate::workflow::tool::{Tool, ToolCategory, ToolDefinition};
    use crate::stream::event::ThreadId;
    use crate::stream::merge::{ResultPayload, StreamedMessage, ToolArgs};
    use crate::stream::queue::ThreadRegistry;
    use crate::workflow::message::Role;

    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures_util::Stream;
    use serde_json::json;

    /// Provider scripted to return tool-call rounds, then a final text.
    struct ScriptedProvider {
        call_count: AtomicUsize,
        tool_rounds: usize,
        calls_per_round: Vec<ToolCall>,
    }

    impl ScriptedProvider {
        fn new(tool_rounds: usize, calls_per_round: Vec<ToolCall>) -> Self {
            Self {
                call_count: AtomicUsize::new(0),
                tool_rounds,
                calls_per_round,
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, WorkflowError> {
            let count = self.call_count.fetch_add(1, Ordering::SeqCst);
            if count < self.tool_rounds {
                Ok(ChatResponse {
                    content: format!("dispatching round {count}"),
                    usage: TokenUsage::default(),
                    tool_calls: self
                        .calls_per_round
                        .iter()
                        .enumerate()
                        .map(|(i, c)| ToolCall {
                            id: format!("call_{count}_{i}"),
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        })
                        .collect(),
                    finish_reason: Some("tool_calls".to_string()),
                })
            } else {
                Ok(ChatResponse {
                    content: "Both lookups completed; 3 open tasks across 2 sprints.".to_string(),
                    usage: TokenUsage::default(),
                    tool_calls: Vec::new(),
                    finish_reason: Some("stop".to_string()),
                })
            }
        }

        async fn chat_stream(
            &self,
            _request: &ChatRequest,
        ) -> Result<
            Pin<Box<dyn Stream<Item = Result<String, WorkflowError>> + Send>>,
            WorkflowError,
        > {
            Err(WorkflowError::Stream {
                message: "not implemented".to_string(),
            })
        }
    }

    struct FixedTool {
        name: &'static str,
        category: ToolCategory,
        payload: serde_json::Value,
    }

    #[async_trait]
    impl Tool for FixedTool {
        fn name(&self) -> &str {
            self.name
        }

        fn category(&self) -> ToolCategory {
            self.category
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.name.to_string(),
                description: "test".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }
        }

        async fn invoke(
            &self,
            _args: serde_json::Value,
        ) -> Result<serde_json::Value, ToolError> {
            Ok(self.payload.clone())
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new(Duration::from_secs(1));
        registry.register(Arc::new(FixedTool {
            name: "list_tasks",
            category: ToolCategory::DataQuery,
            payload: json!([{"id": 1}, {"id": 2}, {"id": 3}]),
        }));
        registry.register(Arc::new(FixedTool {
            name: "list_sprints",
            category: ToolCategory::DataQuery,
            payload: json!([{"name": "alpha"}, {"name": "beta"}]),
        }));
        registry.register(Arc::new(FixedTool {
            name: "search_docs",
            category: ToolCategory::Research,
            payload: json!({"hits": []}),
        }));
        Arc::new(registry)
    }

    fn executor(provider: Arc<dyn LlmProvider>, max_step_turns: usize) -> StepExecutor {
        let config = WorkflowConfig::builder()
            .api_key("test")
            .max_step_turns(max_step_turns)
            .build()
            .unwrap_or_else(|_| unreachable!());
        StepExecutor::new(provider, registry(), &config, STEP_SYSTEM_PROMPT.to_string())
    }

    fn feed(registry: &ThreadRegistry, thread: &ThreadId) -> MessageFeed {
        MessageFeed::new(
            StreamedMessage::new("msg-1", thread.clone(), Role::Assistant),
            registry.handle(thread),
        )
    }

    fn two_calls() -> Vec<ToolCall> {
        vec![
            ToolCall {
                id: String::new(),
                name: "list_tasks".to_string(),
                arguments: "{}".to_string(),
            },
            ToolCall {
                id: String::new(),
                name: "list_sprints".to_string(),
                arguments: "{}".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn test_concurrent_calls_both_recorded() {
        let queues = ThreadRegistry::new(64);
        let thread = ThreadId::from("t-1");
        let mut feed = feed(&queues, &thread);
        let executor = executor(Arc::new(ScriptedProvider::new(1, two_calls())), 4);
        let mut step = Step::new(StepKind::DataQuery, "Fetch", "List tasks and sprints");

        executor
            .run_step(&mut feed, &CancelToken::new(), &mut step, 0, "")
            .await
            .unwrap_or_else(|e| panic!("run_step failed: {e}"));

        assert_eq!(step.status, StepStatus::Done);
        let outcome = step.outcome.as_ref().map_or_else(|| panic!("no outcome"), |o| o);
        assert_eq!(outcome.data.len(), 2, "both concurrent results recorded");
        assert!(outcome.errors.is_empty());
        assert!(outcome.summary.contains("3 open tasks"));

        // Merged message mirrors the dispatch: two calls, both resolved.
        let message = feed.message();
        assert_eq!(message.tool_calls.len(), 2);
        for call in &message.tool_calls {
            assert!(matches!(call.result, Some(ResultPayload::Structured(_))));
            assert!(matches!(call.args, ToolArgs::Known(_)));
        }
        // Thoughts: pre-tool for round 0, post-tool for the final turn.
        assert_eq!(message.thoughts.len(), 2);
        assert!(!message.thoughts[0].after_tool);
        assert!(message.thoughts[1].after_tool);
    }

    #[tokio::test]
    async fn test_turn_cap_marks_step_failed() {
        let queues = ThreadRegistry::new(256);
        let thread = ThreadId::from("t-1");
        let mut feed = feed(&queues, &thread);
        // Provider never stops calling tools; cap at 2 turns.
        let executor = executor(Arc::new(ScriptedProvider::new(100, two_calls())), 2);
        let mut step = Step::new(StepKind::DataQuery, "Fetch", "instruction");

        executor
            .run_step(&mut feed, &CancelToken::new(), &mut step, 0, "")
            .await
            .unwrap_or_else(|e| panic!("run_step failed: {e}"));

        assert_eq!(step.status, StepStatus::Failed);
        let outcome = step.outcome.as_ref().map_or_else(|| panic!("no outcome"), |o| o);
        assert!(outcome.errors.iter().any(|e| e.contains("2 reason-act turns")));
        // Provenance: results from completed turns are kept.
        assert_eq!(outcome.data.len(), 4);
    }

    #[tokio::test]
    async fn test_forbidden_tool_refused_locally() {
        let queues = ThreadRegistry::new(64);
        let thread = ThreadId::from("t-1");
        let mut feed = feed(&queues, &thread);
        let executor = executor(Arc::new(ScriptedProvider::new(1, two_calls())), 4);
        let mut step = Step::new(StepKind::DataQuery, "Fetch", "instruction");
        step.forbidden_tools.insert("list_sprints".to_string());

        executor
            .run_step(&mut feed, &CancelToken::new(), &mut step, 0, "")
            .await
            .unwrap_or_else(|e| panic!("run_step failed: {e}"));

        let outcome = step.outcome.as_ref().map_or_else(|| panic!("no outcome"), |o| o);
        assert_eq!(outcome.data.len(), 1);
        assert!(outcome.errors.iter().any(|e| e.contains("PERMISSION_DENIED")));
    }

    #[tokio::test]
    async fn test_kind_gate_refuses_cross_category_call() {
        let queues = ThreadRegistry::new(64);
        let thread = ThreadId::from("t-1");
        let mut feed = feed(&queues, &thread);
        let research_call = vec![ToolCall {
            id: String::new(),
            name: "search_docs".to_string(),
            arguments: "{}".to_string(),
        }];
        let executor = executor(Arc::new(ScriptedProvider::new(1, research_call)), 4);
        let mut step = Step::new(StepKind::DataQuery, "Fetch", "instruction");

        executor
            .run_step(&mut feed, &CancelToken::new(), &mut step, 0, "")
            .await
            .unwrap_or_else(|e| panic!("run_step failed: {e}"));

        let outcome = step.outcome.as_ref().map_or_else(|| panic!("no outcome"), |o| o);
        assert!(outcome.data.is_empty());
        assert!(outcome.errors.iter().any(|e| e.contains("PERMISSION_DENIED")));
    }

    #[tokio::test]
    async fn test_cancellation_abandons_dispatch() {
        let queues = ThreadRegistry::new(64);
        let thread = ThreadId::from("t-1");
        let mut feed = feed(&queues, &thread);
        let executor = executor(Arc::new(ScriptedProvider::new(1, two_calls())), 4);
        let mut step = Step::new(StepKind::DataQuery, "Fetch", "instruction");

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = executor.run_step(&mut feed, &cancel, &mut step, 0, "").await;
        assert!(matches!(result, Err(WorkflowError::Cancelled)));
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_not_found() {
        let queues = ThreadRegistry::new(64);
        let thread = ThreadId::from("t-1");
        let mut feed = feed(&queues, &thread);
        let ghost_call = vec![ToolCall {
            id: String::new(),
            name: "delete_everything".to_string(),
            arguments: "{}".to_string(),
        }];
        let executor = executor(Arc::new(ScriptedProvider::new(1, ghost_call)), 4);
        let mut step = Step::new(StepKind::DataQuery, "Fetch", "instruction");

        executor
            .run_step(&mut feed, &CancelToken::new(), &mut step, 0, "")
            .await
            .unwrap_or_else(|e| panic!("run_step failed: {e}"));

        let outcome = step.outcome.as_ref().map_or_else(|| panic!("no outcome"), |o| o);
        assert!(
            outcome
                .errors
                .iter()
                .any(|e| e.contains(ToolErrorKind::NotFound.as_str()))
        );
    }
}
