//! Plans, typed steps, and the LLM-backed planner.
//!
//! A [`Plan`] is immutable once created: replanning produces a new
//! `Plan` with a bumped revision and the prior rationale carried
//! forward, preserving the audit trail of why replanning happened.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::WorkflowConfig;
use super::prompt::{build_planner_prompt, build_revision_prompt};
use super::provider::LlmProvider;
use super::tool::ToolCategory;
use super::traits::Agent;
use crate::error::WorkflowError;

/// Maximum steps a single plan may carry.
const MAX_PLAN_STEPS: usize = 12;

/// The type tag of a planned step, gating which tool categories the
/// executor may dispatch for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    /// Read-only domain lookups.
    DataQuery,
    /// Pure computation over already-fetched data; no tool calls.
    Processing,
    /// Search and document retrieval.
    Research,
}

impl StepKind {
    /// Returns the tool category a step of this kind may dispatch.
    ///
    /// This is the explicit handler table for kind-based gating;
    /// processing steps get no tools at all.
    #[must_use]
    pub const fn permitted_category(self) -> Option<ToolCategory> {
        match self {
            Self::DataQuery => Some(ToolCategory::DataQuery),
            Self::Research => Some(ToolCategory::Research),
            Self::Processing => None,
        }
    }

    /// Returns the wire representation of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DataQuery => "data-query",
            Self::Processing => "processing",
            Self::Research => "research",
        }
    }
}

/// Completion status of a step.
///
/// A step transitions `Pending → Running → Done | Failed` exactly once;
/// it is never re-entered. Replanning creates a fresh plan with fresh
/// steps instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Not yet started.
    Pending,
    /// Currently executing.
    Running,
    /// Completed with a usable outcome.
    Done,
    /// Gave up (turn cap, provider failure, or all tools errored).
    Failed,
}

impl StepStatus {
    /// Returns `true` for `Done` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// What a finished step produced. Everything in here flows verbatim
/// into the final report; errors are kept, never dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepOutcome {
    /// The step agent's final text.
    pub summary: String,
    /// Successful tool payloads, recorded in dispatch order.
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
    /// Tool and loop failures, recorded verbatim.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl StepOutcome {
    /// Returns `true` if the outcome carries neither text nor data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty() && self.data.is_empty()
    }
}

/// One planned unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step type; gates tool categories.
    pub kind: StepKind,
    /// Short step title.
    pub title: String,
    /// Natural-language instruction for the step agent.
    pub instruction: String,
    /// Tools this step may use, beyond the kind gate. Empty = any tool
    /// the kind permits.
    #[serde(default)]
    pub allowed_tools: BTreeSet<String>,
    /// Tools this step must never use.
    #[serde(default)]
    pub forbidden_tools: BTreeSet<String>,
    /// Completion status.
    #[serde(default = "default_status")]
    pub status: StepStatus,
    /// Execution result, set exactly once on completion.
    #[serde(default)]
    pub outcome: Option<StepOutcome>,
}

const fn default_status() -> StepStatus {
    StepStatus::Pending
}

impl Step {
    /// Creates a pending step.
    #[must_use]
    pub fn new(kind: StepKind, title: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            instruction: instruction.into(),
            allowed_tools: BTreeSet::new(),
            forbidden_tools: BTreeSet::new(),
            status: StepStatus::Pending,
            outcome: None,
        }
    }

    /// Marks the step running. Only valid from `Pending`.
    pub fn start(&mut self) {
        debug_assert_eq!(self.status, StepStatus::Pending, "step re-entered");
        if self.status == StepStatus::Pending {
            self.status = StepStatus::Running;
        }
    }

    /// Records the outcome and marks the step done or failed.
    /// Only valid from `Running`; later calls are ignored.
    pub fn finish(&mut self, outcome: StepOutcome, failed: bool) {
        debug_assert_eq!(self.status, StepStatus::Running, "step finished twice");
        if self.status == StepStatus::Running {
            self.status = if failed {
                StepStatus::Failed
            } else {
                StepStatus::Done
            };
            self.outcome = Some(outcome);
        }
    }

    /// Returns `true` if this step may dispatch the named tool.
    ///
    /// The kind gate is checked by the registry; this checks the step's
    /// own structured allow/deny sets.
    #[must_use]
    pub fn permits_tool(&self, name: &str) -> bool {
        if self.forbidden_tools.contains(name) {
            return false;
        }
        self.allowed_tools.is_empty() || self.allowed_tools.contains(name)
    }
}

/// An ordered list of steps answering one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Plan title.
    pub title: String,
    /// Why the plan is shaped this way. Revisions prepend the prior
    /// rationale so the replanning history stays auditable.
    pub rationale: String,
    /// Ordered steps.
    pub steps: Vec<Step>,
    /// 0 for the initial plan, incremented by each revision.
    pub revision: u32,
}

impl Plan {
    /// Creates a single-step plan for the lightweight direct path.
    #[must_use]
    pub fn direct(query: &str) -> Self {
        Self {
            title: "Direct lookup".to_string(),
            rationale: "Keyword-routed query answered by direct tool invocation.".to_string(),
            steps: vec![Step::new(
                StepKind::DataQuery,
                "Direct lookup",
                query.to_string(),
            )],
            revision: 0,
        }
    }

    /// Returns the index of the first pending step, if any.
    #[must_use]
    pub fn next_pending(&self) -> Option<usize> {
        self.steps.iter().position(|s| s.status == StepStatus::Pending)
    }

    /// Returns `true` when every step reached a terminal status.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_terminal())
    }

    /// Returns `true` if any step failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Failed)
    }
}

/// Serde shape of the model's plan output, validated into a [`Plan`].
#[derive(Debug, Deserialize)]
struct PlanDraft {
    title: String,
    #[serde(default)]
    rationale: String,
    steps: Vec<StepDraft>,
}

#[derive(Debug, Deserialize)]
struct StepDraft {
    kind: StepKind,
    title: String,
    instruction: String,
    #[serde(default)]
    allowed_tools: BTreeSet<String>,
    #[serde(default)]
    forbidden_tools: BTreeSet<String>,
}

/// Agent that decomposes a query into a typed step plan, and revises
/// plans when the validator sends the run back.
pub struct Planner {
    model: String,
    max_tokens: u32,
    system_prompt: String,
}

impl Planner {
    /// Creates a planner from configuration and a system prompt.
    #[must_use]
    pub fn new(config: &WorkflowConfig, system_prompt: String) -> Self {
        Self {
            model: config.planner_model.clone(),
            max_tokens: config.planner_max_tokens,
            system_prompt,
        }
    }

    /// Produces a plan for the query.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::ResponseParse`] if the response is not
    /// valid JSON, [`WorkflowError::Planning`] if the plan shape is
    /// invalid.
    pub async fn plan(
        &self,
        provider: &dyn LlmProvider,
        query: &str,
        context: &str,
    ) -> Result<Plan, WorkflowError> {
        let user_msg = build_planner_prompt(query, context);
        let response = self.execute(provider, &user_msg).await?;
        let plan = Self::parse_plan(&response.content, 0, None)?;
        debug!(steps = plan.steps.len(), title = %plan.title, "plan created");
        Ok(plan)
    }

    /// Produces a revised plan from a prior plan and validator feedback.
    ///
    /// Never mutates the prior plan: the result is a new `Plan` with
    /// `revision + 1` and the prior rationale carried forward.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::ResponseParse`] if the response is not
    /// valid JSON, [`WorkflowError::Planning`] if the plan shape is
    /// invalid.
    pub async fn revise(
        &self,
        provider: &dyn LlmProvider,
        prior: &Plan,
        feedback: &str,
    ) -> Result<Plan, WorkflowError> {
        let user_msg = build_revision_prompt(prior, feedback);
        let response = self.execute(provider, &user_msg).await?;
        let plan = Self::parse_plan(
            &response.content,
            prior.revision + 1,
            Some(&prior.rationale),
        )?;
        debug!(
            revision = plan.revision,
            steps = plan.steps.len(),
            "plan revised"
        );
        Ok(plan)
    }

    /// Parses the model's JSON response into a validated plan.
    fn parse_plan(
        content: &str,
        revision: u32,
        prior_rationale: Option<&str>,
    ) -> Result<Plan, WorkflowError> {
        let json_str = strip_fences(content);

        let draft: PlanDraft =
            serde_json::from_str(json_str).map_err(|e| WorkflowError::ResponseParse {
                message: format!("failed to parse plan JSON: {e}"),
                content: content.to_string(),
            })?;

        if draft.steps.is_empty() {
            return Err(WorkflowError::Planning {
                message: "plan has no steps".to_string(),
            });
        }
        if draft.steps.len() > MAX_PLAN_STEPS {
            return Err(WorkflowError::Planning {
                message: format!(
                    "plan has {} steps (max {MAX_PLAN_STEPS})",
                    draft.steps.len()
                ),
            });
        }

        let rationale = prior_rationale.map_or_else(
            || draft.rationale.clone(),
            |prior| format!("{prior}\n---\nRevision: {}", draft.rationale),
        );

        Ok(Plan {
            title: draft.title,
            rationale,
            steps: draft
                .steps
                .into_iter()
                .map(|s| Step {
                    kind: s.kind,
                    title: s.title,
                    instruction: s.instruction,
                    allowed_tools: s.allowed_tools,
                    forbidden_tools: s.forbidden_tools,
                    status: StepStatus::Pending,
                    outcome: None,
                })
                .collect(),
            revision,
        })
    }
}

/// Strips markdown code fences the model may wrap JSON output in.
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
    } else {
        trimmed
    }
}

#[async_trait]
impl Agent for Planner {
    fn name(&self) -> &'static str {
        "planner"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn json_mode(&self) -> bool {
        true
    }

    fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
}
