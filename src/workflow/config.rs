//! Workflow configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::WorkflowError;

/// Default per-step reason-act turn cap.
const DEFAULT_MAX_STEP_TURNS: usize = 4;
/// Default global replanning ceiling.
const DEFAULT_MAX_PLAN_ITERATIONS: usize = 5;
/// Default concurrent tool dispatches within one step turn.
const DEFAULT_MAX_PARALLEL_TOOLS: usize = 8;
/// Default per-thread event queue capacity.
const DEFAULT_QUEUE_CAPACITY: usize = 256;
/// Default LLM request timeout in seconds.
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
/// Default tool invocation timeout in seconds.
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;
/// Default classification timeout in seconds. Short: a slow classifier
/// degrades to "not matched" rather than stalling routing.
const DEFAULT_CLASSIFY_TIMEOUT_SECS: u64 = 10;
/// Default minimum message length before the LLM fallback fires.
const DEFAULT_MIN_CLASSIFY_LEN: usize = 5;
/// Default classifier max tokens. A strict yes/no needs almost none.
const DEFAULT_CLASSIFIER_MAX_TOKENS: u32 = 8;
/// Default planner max tokens.
const DEFAULT_PLANNER_MAX_TOKENS: u32 = 2048;
/// Default step agent max tokens.
const DEFAULT_STEP_MAX_TOKENS: u32 = 4096;

/// Default intent keywords for the stage-1 matcher.
const DEFAULT_KEYWORDS: &[&str] = &[
    "task", "tasks", "sprint", "sprints", "backlog", "ticket", "tickets", "board", "standup",
    "milestone", "assignee", "deadline", "epic", "story",
];

/// Configuration for the workflow engine.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// LLM provider name (e.g. "openai").
    pub provider: String,
    /// API key for the provider.
    pub api_key: String,
    /// Optional base URL override (for proxies or compatible APIs).
    pub base_url: Option<String>,
    /// Model for the classification fallback.
    pub classifier_model: String,
    /// Model for the planner.
    pub planner_model: String,
    /// Model for step execution.
    pub step_model: String,
    /// Maximum tokens for classifier responses.
    pub classifier_max_tokens: u32,
    /// Maximum tokens for planner responses.
    pub planner_max_tokens: u32,
    /// Maximum tokens for step agent responses.
    pub step_max_tokens: u32,
    /// Deadline for planner and step model calls.
    pub llm_timeout: Duration,
    /// Deadline for one tool invocation.
    pub tool_timeout: Duration,
    /// Deadline for the classification fallback call.
    pub classify_timeout: Duration,
    /// Reason-act turns a step may take before it is marked failed.
    pub max_step_turns: usize,
    /// Replanning rounds before finalization is forced.
    pub max_plan_iterations: usize,
    /// Concurrent tool dispatches within one step turn.
    pub max_parallel_tools: usize,
    /// Per-thread event queue capacity.
    pub queue_capacity: usize,
    /// Minimum trimmed message length before the LLM fallback fires.
    pub min_classify_len: usize,
    /// Keyword set for the stage-1 intent matcher.
    pub intent_keywords: Vec<String>,
    /// Directory containing prompt template files.
    ///
    /// When set, system prompts load from markdown files in this
    /// directory, falling back to compiled-in defaults for any missing
    /// files.
    pub prompt_dir: Option<PathBuf>,
}

impl WorkflowConfig {
    /// Creates a new builder for `WorkflowConfig`.
    #[must_use]
    pub fn builder() -> WorkflowConfigBuilder {
        WorkflowConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::ApiKeyMissing`] if no API key is found.
    pub fn from_env() -> Result<Self, WorkflowError> {
        Self::builder().from_env().build()
    }
}

/// Builder for [`WorkflowConfig`].
#[derive(Debug, Clone, Default)]
pub struct WorkflowConfigBuilder {
    provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    classifier_model: Option<String>,
    planner_model: Option<String>,
    step_model: Option<String>,
    classifier_max_tokens: Option<u32>,
    planner_max_tokens: Option<u32>,
    step_max_tokens: Option<u32>,
    llm_timeout: Option<Duration>,
    tool_timeout: Option<Duration>,
    classify_timeout: Option<Duration>,
    max_step_turns: Option<usize>,
    max_plan_iterations: Option<usize>,
    max_parallel_tools: Option<usize>,
    queue_capacity: Option<usize>,
    min_classify_len: Option<usize>,
    intent_keywords: Option<Vec<String>>,
    prompt_dir: Option<PathBuf>,
}

impl WorkflowConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.provider.is_none() {
            self.provider = std::env::var("TASKPILOT_PROVIDER").ok();
        }
        if self.api_key.is_none() {
            self.api_key = std::env::var("OPENAI_API_KEY")
                .or_else(|_| std::env::var("TASKPILOT_API_KEY"))
                .ok();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("OPENAI_BASE_URL")
                .or_else(|_| std::env::var("TASKPILOT_BASE_URL"))
                .ok();
        }
        if self.classifier_model.is_none() {
            self.classifier_model = std::env::var("TASKPILOT_CLASSIFIER_MODEL").ok();
        }
        if self.planner_model.is_none() {
            self.planner_model = std::env::var("TASKPILOT_PLANNER_MODEL").ok();
        }
        if self.step_model.is_none() {
            self.step_model = std::env::var("TASKPILOT_STEP_MODEL").ok();
        }
        if self.max_step_turns.is_none() {
            self.max_step_turns = std::env::var("TASKPILOT_MAX_STEP_TURNS")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.max_plan_iterations.is_none() {
            self.max_plan_iterations = std::env::var("TASKPILOT_MAX_PLAN_ITERATIONS")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.queue_capacity.is_none() {
            self.queue_capacity = std::env::var("TASKPILOT_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.intent_keywords.is_none() {
            self.intent_keywords = std::env::var("TASKPILOT_KEYWORDS").ok().map(|v| {
                v.split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect()
            });
        }
        if self.prompt_dir.is_none() {
            self.prompt_dir = std::env::var("TASKPILOT_PROMPT_DIR").ok().map(PathBuf::from);
        }
        self
    }

    /// Sets the LLM provider name.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL override.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the classifier model.
    #[must_use]
    pub fn classifier_model(mut self, model: impl Into<String>) -> Self {
        self.classifier_model = Some(model.into());
        self
    }

    /// Sets the planner model.
    #[must_use]
    pub fn planner_model(mut self, model: impl Into<String>) -> Self {
        self.planner_model = Some(model.into());
        self
    }

    /// Sets the step execution model.
    #[must_use]
    pub fn step_model(mut self, model: impl Into<String>) -> Self {
        self.step_model = Some(model.into());
        self
    }

    /// Sets the classifier max tokens.
    #[must_use]
    pub const fn classifier_max_tokens(mut self, n: u32) -> Self {
        self.classifier_max_tokens = Some(n);
        self
    }

    /// Sets the planner max tokens.
    #[must_use]
    pub const fn planner_max_tokens(mut self, n: u32) -> Self {
        self.planner_max_tokens = Some(n);
        self
    }

    /// Sets the step agent max tokens.
    #[must_use]
    pub const fn step_max_tokens(mut self, n: u32) -> Self {
        self.step_max_tokens = Some(n);
        self
    }

    /// Sets the LLM request timeout.
    #[must_use]
    pub const fn llm_timeout(mut self, duration: Duration) -> Self {
        self.llm_timeout = Some(duration);
        self
    }

    /// Sets the tool invocation timeout.
    #[must_use]
    pub const fn tool_timeout(mut self, duration: Duration) -> Self {
        self.tool_timeout = Some(duration);
        self
    }

    /// Sets the classification timeout.
    #[must_use]
    pub const fn classify_timeout(mut self, duration: Duration) -> Self {
        self.classify_timeout = Some(duration);
        self
    }

    /// Sets the per-step reason-act turn cap.
    #[must_use]
    pub const fn max_step_turns(mut self, n: usize) -> Self {
        self.max_step_turns = Some(n);
        self
    }

    /// Sets the global replanning ceiling.
    #[must_use]
    pub const fn max_plan_iterations(mut self, n: usize) -> Self {
        self.max_plan_iterations = Some(n);
        self
    }

    /// Sets the concurrent tool dispatch limit.
    #[must_use]
    pub const fn max_parallel_tools(mut self, n: usize) -> Self {
        self.max_parallel_tools = Some(n);
        self
    }

    /// Sets the per-thread event queue capacity.
    #[must_use]
    pub const fn queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = Some(n);
        self
    }

    /// Sets the minimum message length for the LLM fallback.
    #[must_use]
    pub const fn min_classify_len(mut self, n: usize) -> Self {
        self.min_classify_len = Some(n);
        self
    }

    /// Sets the stage-1 intent keyword set.
    #[must_use]
    pub fn intent_keywords(mut self, keywords: Vec<String>) -> Self {
        self.intent_keywords = Some(keywords);
        self
    }

    /// Sets the prompt template directory.
    #[must_use]
    pub fn prompt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompt_dir = Some(dir.into());
        self
    }

    /// Builds the [`WorkflowConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::ApiKeyMissing`] if no API key was set.
    pub fn build(self) -> Result<WorkflowConfig, WorkflowError> {
        let api_key = self.api_key.ok_or(WorkflowError::ApiKeyMissing)?;

        Ok(WorkflowConfig {
            provider: self.provider.unwrap_or_else(|| "openai".to_string()),
            api_key,
            base_url: self.base_url,
            classifier_model: self
                .classifier_model
                .unwrap_or_else(|| "gpt-5-mini-2025-08-07".to_string()),
            planner_model: self
                .planner_model
                .unwrap_or_else(|| "gpt-5.2-2025-12-11".to_string()),
            step_model: self
                .step_model
                .unwrap_or_else(|| "gpt-5.2-2025-12-11".to_string()),
            classifier_max_tokens: self
                .classifier_max_tokens
                .unwrap_or(DEFAULT_CLASSIFIER_MAX_TOKENS),
            planner_max_tokens: self.planner_max_tokens.unwrap_or(DEFAULT_PLANNER_MAX_TOKENS),
            step_max_tokens: self.step_max_tokens.unwrap_or(DEFAULT_STEP_MAX_TOKENS),
            llm_timeout: self
                .llm_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS)),
            tool_timeout: self
                .tool_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS)),
            classify_timeout: self
                .classify_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_CLASSIFY_TIMEOUT_SECS)),
            max_step_turns: self.max_step_turns.unwrap_or(DEFAULT_MAX_STEP_TURNS),
            max_plan_iterations: self
                .max_plan_iterations
                .unwrap_or(DEFAULT_MAX_PLAN_ITERATIONS),
            max_parallel_tools: self.max_parallel_tools.unwrap_or(DEFAULT_MAX_PARALLEL_TOOLS),
            queue_capacity: self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            min_classify_len: self.min_classify_len.unwrap_or(DEFAULT_MIN_CLASSIFY_LEN),
            intent_keywords: self.intent_keywords.unwrap_or_else(|| {
                DEFAULT_KEYWORDS.iter().map(ToString::to_string).collect()
            }),
            prompt_dir: self.prompt_dir,
        })
    }
}
