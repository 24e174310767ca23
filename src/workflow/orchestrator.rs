//! Workflow orchestrator.
//!
//! Ties the run together: classify → direct execution or plan loop ⇄
//! validator → reporter. The run is one sequential task per thread;
//! only tool calls within a single step turn execute concurrently.
//! Every stage emits events through the thread's queue, and the final
//! report is streamed as a terminal message chunk.

use std::fmt::Write;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::config::WorkflowConfig;
use super::intent::IntentClassifier;
use super::message::{ChatMessage, recent_history};
use super::plan::Plan;
use super::prompt::PromptSet;
use super::provider::LlmProvider;
use super::reporter::Reporter;
use super::tool::ToolRegistry;
use super::validator::{Validator, Verdict};
use crate::error::WorkflowError;
use crate::stream::event::{EventPayload, ThreadId};
use crate::stream::merge::{MessageFeed, StreamedMessage};
use crate::stream::queue::{CancelToken, ThreadRegistry};

/// Maximum accepted query length in bytes.
const MAX_QUERY_LEN: usize = 10_000;

/// How a handled query left the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    /// The classifier routed the query away; generic handling applies.
    NotRouted,
    /// The workflow produced a report.
    Answered {
        /// The rendered report, identical to the streamed content.
        report: String,
    },
    /// The client disconnected; the run stopped cleanly.
    Cancelled,
}

/// Drives one query through the full workflow.
pub struct WorkflowOrchestrator {
    provider: Arc<dyn LlmProvider>,
    queues: Arc<ThreadRegistry>,
    classifier: IntentClassifier,
    planner: super::plan::Planner,
    executor: super::executor::StepExecutor,
    validator: Validator,
}

impl WorkflowOrchestrator {
    /// Creates an orchestrator wired to the given provider, tools, and
    /// queue registry.
    ///
    /// Prompt templates load from [`WorkflowConfig::prompt_dir`],
    /// falling back to compiled-in defaults.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        queues: Arc<ThreadRegistry>,
        config: &WorkflowConfig,
    ) -> Self {
        let prompts = PromptSet::load(config.prompt_dir.as_deref());
        Self {
            provider: Arc::clone(&provider),
            queues,
            classifier: IntentClassifier::new(config, prompts.classifier),
            planner: super::plan::Planner::new(config, prompts.planner),
            executor: super::executor::StepExecutor::new(provider, tools, config, prompts.step),
            validator: Validator::new(config.max_plan_iterations),
        }
    }

    /// Handles one user query on a thread.
    ///
    /// Returns [`WorkflowOutcome::NotRouted`] without touching the
    /// thread's queue when the classifier declines the query.
    /// Cancellation and a closed queue are normal termination, not
    /// errors.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] on invalid input or a planning
    /// failure with no plan to fall back on.
    pub async fn handle(
        &self,
        thread_id: &ThreadId,
        user_msg: &str,
        history: &[ChatMessage],
    ) -> Result<WorkflowOutcome, WorkflowError> {
        if user_msg.trim().is_empty() {
            return Err(WorkflowError::Orchestration {
                message: "query cannot be empty".to_string(),
            });
        }
        if user_msg.len() > MAX_QUERY_LEN {
            return Err(WorkflowError::Orchestration {
                message: format!(
                    "query exceeds maximum length ({} bytes, max {MAX_QUERY_LEN})",
                    user_msg.len()
                ),
            });
        }

        if !self
            .classifier
            .classify(&*self.provider, user_msg, history)
            .await
        {
            debug!(thread = %thread_id, "query not routed into the workflow");
            return Ok(WorkflowOutcome::NotRouted);
        }

        let handle = self.queues.handle(thread_id);
        let cancel = handle.cancel_token();
        let message = StreamedMessage::new(
            format!("msg-{thread_id}"),
            thread_id.clone(),
            super::message::Role::Assistant,
        );
        let mut feed = MessageFeed::new(message, handle);

        match self
            .run_routed(&mut feed, &cancel, user_msg, history)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(WorkflowError::Cancelled | WorkflowError::QueueClosed { .. }) => {
                info!(thread = %thread_id, "run stopped by client disconnect");
                Ok(WorkflowOutcome::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    /// Runs a routed query: direct path first, escalating to the full
    /// planner loop when the validator says the direct result is not
    /// enough.
    async fn run_routed(
        &self,
        feed: &mut MessageFeed,
        cancel: &CancelToken,
        user_msg: &str,
        history: &[ChatMessage],
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let start = Instant::now();
        let mut best_effort = false;

        let mut plan = Plan::direct(user_msg);
        self.executor
            .run_step(feed, cancel, &mut plan.steps[0], 0, "")
            .await?;

        if self.validator.should_escalate(&plan.steps[0]) {
            debug!("direct path insufficient; escalating to planner");
            let context = format_context(recent_history(history, 4));
            plan = self
                .planner
                .plan(&*self.provider, user_msg, &context)
                .await?;
            best_effort = self.run_plan_loop(feed, cancel, &mut plan).await?;
        }

        let report = Reporter::render(user_msg, &plan, best_effort);
        feed.emit(EventPayload::MessageChunk {
            delta: report.clone(),
            done: true,
        })
        .await?;

        info!(
            steps = plan.steps.len(),
            revision = plan.revision,
            best_effort,
            elapsed = ?start.elapsed(),
            "workflow run complete"
        );
        Ok(WorkflowOutcome::Answered { report })
    }

    /// Step ⇄ validator loop over a planned run. Returns whether
    /// finalization was forced (best-effort report).
    async fn run_plan_loop(
        &self,
        feed: &mut MessageFeed,
        cancel: &CancelToken,
        plan: &mut Plan,
    ) -> Result<bool, WorkflowError> {
        let mut iterations: usize = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }

            if let Some(idx) = plan.next_pending() {
                let prior = prior_results_context(plan, idx);
                self.executor
                    .run_step(feed, cancel, &mut plan.steps[idx], idx, &prior)
                    .await?;
            }

            match self.validator.assess(plan, iterations) {
                Verdict::Advance => {}
                Verdict::Replan { feedback } => {
                    iterations += 1;
                    match self
                        .planner
                        .revise(&*self.provider, plan, &feedback)
                        .await
                    {
                        Ok(revised) => *plan = revised,
                        Err(e) => {
                            warn!(error = %e, "plan revision failed; forcing finalize");
                            return Ok(true);
                        }
                    }
                }
                Verdict::Finalize { forced } => return Ok(forced),
            }
        }
    }
}

impl std::fmt::Debug for WorkflowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowOrchestrator")
            .field("provider", &self.provider.name())
            .field("queues", &self.queues)
            .field("classifier", &self.classifier)
            .finish()
    }
}

/// Renders a history tail as planner context.
fn format_context(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| format!("{:?}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders prior step outcomes for the next step's prompt.
fn prior_results_context(plan: &Plan, upto: usize) -> String {
    let mut out = String::new();
    for (idx, step) in plan.steps[..upto].iter().enumerate() {
        let Some(outcome) = &step.outcome else {
            continue;
        };
        let _ = writeln!(out, "step {idx} '{}': {}", step.title, outcome.summary);
        for value in &outcome.data {
            let _ = writeln!(out, "<result>{value}</result>");
        }
        for error in &outcome.errors {
            let _ = writeln!(out, "error: {error}");
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::workflow::message::{ChatRequest, ChatResponse, TokenUsage};
    use crate::workflow::tool::{Tool, ToolCall, ToolCategory, ToolDefinition};

    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::Stream;
    use serde_json::json;

    /// Provider that answers plan requests (json_mode) with a fixed
    /// plan, and step requests with a scripted sequence.
    struct PipelineProvider {
        plan_json: &'static str,
        /// `true`: step turns always request a tool call (never
        /// finishing). `false`: one tool round, then a final text.
        never_finish: bool,
        step_calls: AtomicUsize,
        plan_calls: AtomicUsize,
    }

    impl PipelineProvider {
        fn new(plan_json: &'static str, never_finish: bool) -> Self {
            Self {
                plan_json,
                never_finish,
                step_calls: AtomicUsize::new(0),
                plan_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for PipelineProvider {
        fn name(&self) -> &'static str {
            "pipeline"
        }

        async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, WorkflowError> {
            if request.json_mode {
                self.plan_calls.fetch_add(1, Ordering::SeqCst);
                return Ok(ChatResponse {
                    content: self.plan_json.to_string(),
                    usage: TokenUsage::default(),
                    tool_calls: Vec::new(),
                    finish_reason: Some("stop".to_string()),
                });
            }

            let count = self.step_calls.fetch_add(1, Ordering::SeqCst);
            let wants_tool = self.never_finish || count % 2 == 0;
            if wants_tool {
                Ok(ChatResponse {
                    content: "looking up sprints".to_string(),
                    usage: TokenUsage::default(),
                    tool_calls: vec![ToolCall {
                        id: format!("call_{count}"),
                        name: "list_sprints".to_string(),
                        arguments: "{}".to_string(),
                    }],
                    finish_reason: Some("tool_calls".to_string()),
                })
            } else {
                Ok(ChatResponse {
                    content: "Two active sprints: alpha and beta.".to_string(),
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

    struct SprintTool;

    #[async_trait]
    impl Tool for SprintTool {
        fn name(&self) -> &str {
            "list_sprints"
        }

        fn category(&self) -> ToolCategory {
            ToolCategory::DataQuery
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "list_sprints".to_string(),
                description: "List sprints".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }
        }

        async fn invoke(
            &self,
            _args: serde_json::Value,
        ) -> Result<serde_json::Value, ToolError> {
            Ok(json!([{"name": "alpha"}, {"name": "beta"}]))
        }
    }

    const SINGLE_STEP_PLAN: &str = r#"{
        "title": "Sprint lookup",
        "rationale": "one fetch",
        "steps": [{"kind": "data-query", "title": "Fetch sprints", "instruction": "list them"}]
    }"#;

    fn orchestrator(
        provider: Arc<dyn LlmProvider>,
        queues: Arc<ThreadRegistry>,
        max_plan_iterations: usize,
    ) -> WorkflowOrchestrator {
        let config = WorkflowConfig::builder()
            .api_key("test")
            .max_step_turns(2)
            .max_plan_iterations(max_plan_iterations)
            .build()
            .unwrap_or_else(|_| unreachable!());
        let mut tools = ToolRegistry::new(Duration::from_secs(1));
        tools.register(Arc::new(SprintTool));
        WorkflowOrchestrator::new(provider, Arc::new(tools), queues, &config)
    }

    #[tokio::test]
    async fn test_keyword_routed_direct_run_streams_report() {
        let queues = Arc::new(ThreadRegistry::new(256));
        let provider = Arc::new(PipelineProvider::new(SINGLE_STEP_PLAN, false));
        let orchestrator = orchestrator(provider, Arc::clone(&queues), 5);
        let thread = ThreadId::from("t-1");

        let outcome = orchestrator
            .handle(&thread, "list sprints", &[])
            .await
            .unwrap_or_else(|e| panic!("handle failed: {e}"));

        let WorkflowOutcome::Answered { report } = outcome else {
            panic!("expected Answered, got {outcome:?}");
        };
        assert!(report.contains("alpha"));
        assert!(report.contains("beta"));
        assert!(!report.contains("Best-effort"));

        // The final frame in the queue is the terminal message chunk.
        let mut receiver = queues
            .take_receiver(&thread)
            .map_or_else(|| panic!("receiver missing"), |r| r);
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        let last = events.last().map_or_else(|| panic!("no events"), |e| e);
        assert!(matches!(
            last.payload,
            EventPayload::MessageChunk { done: true, .. }
        ));
        assert!(events.iter().all(|e| e.thread_id == thread));
    }

    #[tokio::test]
    async fn test_unrelated_query_not_routed_creates_no_queue() {
        let queues = Arc::new(ThreadRegistry::new(256));
        // LLM fallback answers NO for the unrelated message.
        struct NoProvider;
        #[async_trait]
        impl LlmProvider for NoProvider {
            fn name(&self) -> &'static str {
                "no"
            }
            async fn chat(&self, _r: &ChatRequest) -> Result<ChatResponse, WorkflowError> {
                Ok(ChatResponse {
                    content: "NO".to_string(),
                    usage: TokenUsage::default(),
                    tool_calls: Vec::new(),
                    finish_reason: Some("stop".to_string()),
                })
            }
            async fn chat_stream(
                &self,
                _r: &ChatRequest,
            ) -> Result<
                Pin<Box<dyn Stream<Item = Result<String, WorkflowError>> + Send>>,
                WorkflowError,
            > {
                Err(WorkflowError::Stream {
                    message: "not implemented".to_string(),
                })
            }
        }

        let orchestrator = orchestrator(Arc::new(NoProvider), Arc::clone(&queues), 5);
        let outcome = orchestrator
            .handle(&ThreadId::from("t-1"), "tell me a long story about ships", &[])
            .await
            .unwrap_or_else(|e| panic!("handle failed: {e}"));
        assert_eq!(outcome, WorkflowOutcome::NotRouted);
        assert!(queues.is_empty(), "unrouted queries must not create queues");
    }

    #[tokio::test]
    async fn test_plan_ceiling_forces_finalize_and_terminates() {
        let queues = Arc::new(ThreadRegistry::new(1024));
        // Steps never finish: every turn requests another tool call, so
        // every step fails at the turn cap and the validator replans
        // until the ceiling.
        let provider = Arc::new(PipelineProvider::new(SINGLE_STEP_PLAN, true));
        let orchestrator = orchestrator(Arc::clone(&provider) as Arc<dyn LlmProvider>, Arc::clone(&queues), 2);

        let outcome = orchestrator
            .handle(&ThreadId::from("t-1"), "list sprints", &[])
            .await
            .unwrap_or_else(|e| panic!("handle failed: {e}"));

        let WorkflowOutcome::Answered { report } = outcome else {
            panic!("expected Answered, got {outcome:?}");
        };
        assert!(report.contains("Best-effort"), "forced finalize is annotated");
        // 1 initial plan + 2 revisions: the ceiling bounds replanning.
        assert_eq!(provider.plan_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_thread_stops_cleanly() {
        let queues = Arc::new(ThreadRegistry::new(256));
        let provider = Arc::new(PipelineProvider::new(SINGLE_STEP_PLAN, false));
        let orchestrator = orchestrator(provider, Arc::clone(&queues), 5);
        let thread = ThreadId::from("t-1");

        // Client is already gone before the run starts.
        queues.handle(&thread).cancel_token().cancel();

        let outcome = orchestrator
            .handle(&thread, "list sprints", &[])
            .await
            .unwrap_or_else(|e| panic!("handle failed: {e}"));
        assert_eq!(outcome, WorkflowOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_empty_and_oversized_queries_rejected() {
        let queues = Arc::new(ThreadRegistry::new(256));
        let provider = Arc::new(PipelineProvider::new(SINGLE_STEP_PLAN, false));
        let orchestrator = orchestrator(provider, queues, 5);
        let thread = ThreadId::from("t-1");

        assert!(orchestrator.handle(&thread, "  ", &[]).await.is_err());
        let huge = "sprint ".repeat(2000);
        assert!(orchestrator.handle(&thread, &huge, &[]).await.is_err());
    }
}
