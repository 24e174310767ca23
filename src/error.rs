//! Error types for the workflow engine.
//!
//! [`WorkflowError`] covers orchestration, provider, and queue failures.
//! Tool invocations report the dedicated [`ToolError`] carrying one of
//! the five typed failure codes the tool surface exposes on the wire.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed failure code reported by a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorKind {
    /// The call was refused by policy before or during dispatch.
    PermissionDenied,
    /// No tool with the requested name is registered.
    NotFound,
    /// Arguments failed to parse or validate.
    InvalidArgs,
    /// The tool's upstream dependency failed.
    UpstreamError,
    /// The call did not complete within its deadline.
    Timeout,
}

impl ToolErrorKind {
    /// Returns the wire representation of this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidArgs => "INVALID_ARGS",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed failure from a tool invocation.
///
/// Propagated verbatim through the workflow to the final report; the
/// core records tool failures, it never hides or reinterprets them.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("tool '{name}' failed ({kind}): {message}")]
pub struct ToolError {
    /// Name of the tool that failed.
    pub name: String,
    /// Typed failure code.
    pub kind: ToolErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl ToolError {
    /// Creates a new tool error.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a `NOT_FOUND` error.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::new(name, ToolErrorKind::NotFound, "unknown tool")
    }

    /// Shorthand for a `PERMISSION_DENIED` error.
    #[must_use]
    pub fn permission_denied(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, ToolErrorKind::PermissionDenied, message)
    }

    /// Shorthand for an `INVALID_ARGS` error.
    #[must_use]
    pub fn invalid_args(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, ToolErrorKind::InvalidArgs, message)
    }

    /// Shorthand for a `TIMEOUT` error.
    #[must_use]
    pub fn timeout(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, ToolErrorKind::Timeout, message)
    }
}

/// Errors from the workflow engine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// No API key was provided via builder or environment.
    #[error("API key missing: set OPENAI_API_KEY or TASKPILOT_API_KEY")]
    ApiKeyMissing,

    /// The configured provider name is not supported.
    #[error("unsupported provider: {name}")]
    UnsupportedProvider {
        /// The unrecognized provider name.
        name: String,
    },

    /// An LLM API request failed.
    #[error("API request failed: {message}")]
    ApiRequest {
        /// Error detail from the provider.
        message: String,
        /// HTTP status code, if the failure carried one.
        status: Option<u16>,
    },

    /// A streaming response failed mid-stream.
    #[error("stream error: {message}")]
    Stream {
        /// Error detail.
        message: String,
    },

    /// A model response could not be parsed into the expected shape.
    #[error("response parse error: {message}")]
    ResponseParse {
        /// Parse failure detail.
        message: String,
        /// The raw response content, kept for diagnostics.
        content: String,
    },

    /// Plan generation or revision failed.
    #[error("planning failed: {message}")]
    Planning {
        /// Failure detail.
        message: String,
    },

    /// A workflow-level invariant was violated.
    #[error("orchestration error: {message}")]
    Orchestration {
        /// Failure detail.
        message: String,
    },

    /// A step's reason-act loop hit its turn cap.
    #[error("step exceeded {max_turns} reason-act turns")]
    StepTurnsExceeded {
        /// The configured per-step turn cap.
        max_turns: usize,
    },

    /// A tool invocation failed with a typed code.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// An external call missed its deadline.
    #[error("{operation} timed out after {secs}s")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The deadline in seconds.
        secs: u64,
    },

    /// A bounded event queue rejected a non-blocking publish.
    #[error("event queue full for thread '{thread}' (capacity {capacity})")]
    QueueFull {
        /// Thread whose queue is full.
        thread: String,
        /// The configured queue capacity.
        capacity: usize,
    },

    /// The thread's event queue was closed (consumer gone).
    #[error("event queue closed for thread '{thread}'")]
    QueueClosed {
        /// Thread whose queue is closed.
        thread: String,
    },

    /// The run was cancelled by the client. Normal termination.
    #[error("workflow cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_kind_wire_strings() {
        assert_eq!(ToolErrorKind::PermissionDenied.as_str(), "PERMISSION_DENIED");
        assert_eq!(ToolErrorKind::NotFound.as_str(), "NOT_FOUND");
        assert_eq!(ToolErrorKind::InvalidArgs.as_str(), "INVALID_ARGS");
        assert_eq!(ToolErrorKind::UpstreamError.as_str(), "UPSTREAM_ERROR");
        assert_eq!(ToolErrorKind::Timeout.as_str(), "TIMEOUT");
    }

    #[test]
    fn test_tool_error_display() {
        let err = ToolError::not_found("list_tasks");
        let text = err.to_string();
        assert!(text.contains("list_tasks"));
        assert!(text.contains("NOT_FOUND"));
    }

    #[test]
    fn test_tool_error_kind_serde() {
        let json = serde_json::to_string(&ToolErrorKind::InvalidArgs).unwrap_or_default();
        assert_eq!(json, "\"INVALID_ARGS\"");
    }

    #[test]
    fn test_workflow_error_from_tool_error() {
        let err: WorkflowError = ToolError::timeout("search_docs", "deadline exceeded").into();
        assert!(matches!(err, WorkflowError::Tool(_)));
        assert!(err.to_string().contains("TIMEOUT"));
    }

    #[test]
    fn test_queue_full_display() {
        let err = WorkflowError::QueueFull {
            thread: "t-1".to_string(),
            capacity: 256,
        };
        assert!(err.to_string().contains("t-1"));
        assert!(err.to_string().contains("256"));
    }
}
