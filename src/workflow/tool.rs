//! Tool surface consumed by the step executor.
//!
//! Tools are external capabilities behind a narrow trait: the engine
//! dispatches by name, applies a deadline, and records payloads without
//! interpreting their business meaning. Failures are typed
//! [`ToolError`]s and are propagated verbatim to the report.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::plan::StepKind;
use crate::error::ToolError;

/// Maximum raw byte length of tool argument JSON from the model.
const MAX_TOOL_ARGS_LEN: usize = 100_000;

/// Category a tool belongs to. Step kinds gate which categories the
/// executor may dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCategory {
    /// Read-only domain lookups (tasks, sprints, boards).
    DataQuery,
    /// Search and document retrieval.
    Research,
}

/// A tool definition that can be sent to an LLM for function-calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (must match the registry's dispatch key).
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema object describing the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call (assigned by the provider).
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON-encoded arguments for the tool.
    pub arguments: String,
}

/// The recorded outcome of one dispatched tool call.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// ID of the tool call this result corresponds to.
    pub call_id: String,
    /// Name of the tool that produced it.
    pub name: String,
    /// Payload on success, typed error on failure.
    pub outcome: Result<serde_json::Value, ToolError>,
}

impl ToolResult {
    /// Renders the outcome as text for the model transcript.
    #[must_use]
    pub fn transcript_content(&self) -> String {
        match &self.outcome {
            Ok(value) => value.to_string(),
            Err(e) => e.to_string(),
        }
    }
}

/// An external capability the step executor can invoke.
///
/// Implementations handle the actual adapter work (HTTP calls, API
/// clients); the engine only dispatches, bounds, and records.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used for dispatch and gating.
    fn name(&self) -> &str;

    /// Category this tool belongs to.
    fn category(&self) -> ToolCategory;

    /// Definition advertised to the model.
    fn definition(&self) -> ToolDefinition;

    /// Invokes the tool with parsed arguments.
    ///
    /// # Errors
    ///
    /// Returns a [`ToolError`] with a typed failure code.
    async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Registry of tools keyed by name.
///
/// Owns the per-call deadline and the category gate. Dispatch is a
/// plain map lookup; an unknown name is a typed `NOT_FOUND`, never a
/// panic.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl ToolRegistry {
    /// Creates an empty registry with the given per-call deadline.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            timeout,
        }
    }

    /// Registers a tool, replacing any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Returns `true` if the registry holds no tools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns the category of a registered tool, if present.
    #[must_use]
    pub fn category_of(&self, name: &str) -> Option<ToolCategory> {
        self.tools.get(name).map(|t| t.category())
    }

    /// Returns the definitions a step of the given kind may use.
    ///
    /// Processing steps get no tools; data-query and research steps get
    /// the matching category only.
    #[must_use]
    pub fn definitions_for(&self, kind: StepKind) -> Vec<ToolDefinition> {
        let Some(category) = kind.permitted_category() else {
            return Vec::new();
        };
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .filter(|t| t.category() == category)
            .map(|t| t.definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Dispatches one tool call, applying argument validation and the
    /// per-call deadline.
    ///
    /// Never returns an `Err` at the function level: every failure mode
    /// is folded into the result's typed outcome so the caller records
    /// it alongside successes.
    pub async fn invoke(&self, call: &ToolCall) -> ToolResult {
        let outcome = self.dispatch(call).await;
        debug!(
            tool = call.name,
            call_id = call.id,
            is_error = outcome.is_err(),
            "tool dispatch complete"
        );
        ToolResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome,
        }
    }

    async fn dispatch(&self, call: &ToolCall) -> Result<serde_json::Value, ToolError> {
        if call.arguments.len() > MAX_TOOL_ARGS_LEN {
            return Err(ToolError::invalid_args(
                &call.name,
                format!(
                    "arguments too large ({} bytes, max {MAX_TOOL_ARGS_LEN})",
                    call.arguments.len()
                ),
            ));
        }

        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::not_found(&call.name))?;

        let args: serde_json::Value = if call.arguments.trim().is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&call.arguments)
                .map_err(|e| ToolError::invalid_args(&call.name, format!("invalid JSON: {e}")))?
        };

        match tokio::time::timeout(self.timeout, tool.invoke(args)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::timeout(
                &call.name,
                format!("no result within {}s", self.timeout.as_secs()),
            )),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ToolRegistry")
            .field("tools", &names)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Returns `true` if a tool error carries the given kind. Test helper.
#[cfg(test)]
pub(crate) fn has_kind(result: &ToolResult, kind: crate::error::ToolErrorKind) -> bool {
    matches!(&result.outcome, Err(e) if e.kind == kind)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;
    use serde_json::json;

    struct StaticTool {
        name: &'static str,
        category: ToolCategory,
        payload: serde_json::Value,
        delay: Duration,
    }

    impl StaticTool {
        fn new(name: &'static str, category: ToolCategory, payload: serde_json::Value) -> Self {
            Self {
                name,
                category,
                payload,
                delay: Duration::ZERO,
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Tool for StaticTool {
        fn name(&self) -> &str {
            self.name
        }

        fn category(&self) -> ToolCategory {
            self.category
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.name.to_string(),
                description: format!("static test tool {}", self.name),
                parameters: json!({"type": "object", "properties": {}}),
            }
        }

        async fn invoke(
            &self,
            _args: serde_json::Value,
        ) -> Result<serde_json::Value, ToolError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.payload.clone())
        }
    }

    fn registry_with(tools: Vec<StaticTool>) -> ToolRegistry {
        let mut registry = ToolRegistry::new(Duration::from_millis(200));
        for tool in tools {
            registry.register(Arc::new(tool));
        }
        registry
    }

    fn call(name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: format!("call_{name}"),
            name: name.to_string(),
            arguments: args.to_string(),
        }
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let registry = registry_with(vec![StaticTool::new(
            "list_tasks",
            ToolCategory::DataQuery,
            json!([{"id": 1, "title": "triage"}]),
        )]);
        let result = registry.invoke(&call("list_tasks", "{}")).await;
        assert_eq!(result.name, "list_tasks");
        assert!(result.outcome.is_ok());
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = registry_with(vec![]);
        let result = registry.invoke(&call("nope", "{}")).await;
        assert!(has_kind(&result, ToolErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_invoke_invalid_args() {
        let registry = registry_with(vec![StaticTool::new(
            "list_tasks",
            ToolCategory::DataQuery,
            json!(null),
        )]);
        let result = registry.invoke(&call("list_tasks", "not json")).await;
        assert!(has_kind(&result, ToolErrorKind::InvalidArgs));
    }

    #[tokio::test]
    async fn test_invoke_empty_args_defaults_to_object() {
        let registry = registry_with(vec![StaticTool::new(
            "list_tasks",
            ToolCategory::DataQuery,
            json!([]),
        )]);
        let result = registry.invoke(&call("list_tasks", "")).await;
        assert!(result.outcome.is_ok());
    }

    #[tokio::test]
    async fn test_invoke_oversized_args() {
        let registry = registry_with(vec![StaticTool::new(
            "list_tasks",
            ToolCategory::DataQuery,
            json!(null),
        )]);
        let huge = "x".repeat(MAX_TOOL_ARGS_LEN + 1);
        let result = registry.invoke(&call("list_tasks", &huge)).await;
        assert!(has_kind(&result, ToolErrorKind::InvalidArgs));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_timeout() {
        let registry = registry_with(vec![
            StaticTool::new("slow_search", ToolCategory::Research, json!(null))
                .slow(Duration::from_secs(5)),
        ]);
        let result = registry.invoke(&call("slow_search", "{}")).await;
        assert!(has_kind(&result, ToolErrorKind::Timeout));
    }

    #[test]
    fn test_definitions_gated_by_kind() {
        let registry = registry_with(vec![
            StaticTool::new("list_tasks", ToolCategory::DataQuery, json!(null)),
            StaticTool::new("search_docs", ToolCategory::Research, json!(null)),
        ]);

        let data = registry.definitions_for(StepKind::DataQuery);
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].name, "list_tasks");

        let research = registry.definitions_for(StepKind::Research);
        assert_eq!(research.len(), 1);
        assert_eq!(research[0].name, "search_docs");

        assert!(registry.definitions_for(StepKind::Processing).is_empty());
    }

    #[test]
    fn test_transcript_content() {
        let ok = ToolResult {
            call_id: "c1".to_string(),
            name: "list_tasks".to_string(),
            outcome: Ok(json!({"count": 2})),
        };
        assert_eq!(ok.transcript_content(), r#"{"count":2}"#);

        let err = ToolResult {
            call_id: "c2".to_string(),
            name: "list_tasks".to_string(),
            outcome: Err(ToolError::not_found("list_tasks")),
        };
        assert!(err.transcript_content().contains("NOT_FOUND"));
    }
}
