//! Streamed event frames.
//!
//! Events are the only channel through which workflow state becomes
//! visible outside the workflow. Each frame carries a thread id, a
//! kind discriminator, and a kind-specific payload; frames for one
//! thread are delivered over an order-preserving channel with no
//! reordering or batching across frame boundaries.

use serde::{Deserialize, Serialize};

use crate::workflow::plan::StepStatus;

/// Opaque identifier of one conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(String);

impl ThreadId {
    /// Creates a thread id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One discrete unit of streamed update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Thread this frame belongs to.
    pub thread_id: ThreadId,
    /// Kind-specific payload.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Creates an event for the given thread.
    #[must_use]
    pub fn new(thread_id: ThreadId, payload: EventPayload) -> Self {
        Self { thread_id, payload }
    }
}

/// The authoritative form of a tool call: id, name, and fully-known
/// structured arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallUpdate {
    /// Call id, unique within its message.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Structured arguments.
    pub args: serde_json::Value,
}

/// A raw argument fragment awaiting concatenation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallChunk {
    /// Call id this fragment belongs to, when the producer supplies one.
    #[serde(default)]
    pub id: Option<String>,
    /// The raw fragment text.
    pub fragment: String,
}

/// A free-text reasoning trace attributed to a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thought {
    /// Index of the step this thought belongs to.
    pub step_index: usize,
    /// The thought text.
    pub text: String,
    /// `false` when the thought precedes this turn's tool invocations,
    /// `true` when it follows results.
    #[serde(default)]
    pub after_tool: bool,
}

/// Kind-specific event payload. Exactly one of the seven wire kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventPayload {
    /// Incremental assistant text. The finish signal rides on `done`
    /// so the frame taxonomy stays fixed.
    MessageChunk {
        /// Appended text; may be empty on a pure finish frame.
        delta: String,
        /// `true` marks stream completion for the message.
        #[serde(default)]
        done: bool,
    },
    /// Authoritative tool calls, merged by id.
    ToolCalls {
        /// The calls.
        calls: Vec<ToolCallUpdate>,
    },
    /// Raw argument fragments for in-flight tool calls.
    ToolCallChunks {
        /// The fragments, in producer order.
        chunks: Vec<ToolCallChunk>,
    },
    /// A tool call's result.
    ToolCallResult {
        /// Call id, when known.
        #[serde(default)]
        call_id: Option<String>,
        /// Tool name, for fallback matching when the id is unknown.
        #[serde(default)]
        name: Option<String>,
        /// The payload: a string is recorded raw, anything else is
        /// structured.
        result: serde_json::Value,
    },
    /// Reasoning traces.
    Thoughts {
        /// The thoughts.
        thoughts: Vec<Thought>,
    },
    /// Step lifecycle progress.
    StepProgress {
        /// Index of the step in its plan.
        step_index: usize,
        /// New status.
        status: StepStatus,
        /// Step title, for display.
        title: String,
    },
    /// The run paused awaiting a client decision.
    Interrupt {
        /// Options presented to the client.
        options: Vec<String>,
    },
}

impl EventPayload {
    /// Returns the wire kind discriminator for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MessageChunk { .. } => "message-chunk",
            Self::ToolCalls { .. } => "tool-calls",
            Self::ToolCallChunks { .. } => "tool-call-chunks",
            Self::ToolCallResult { .. } => "tool-call-result",
            Self::Thoughts { .. } => "thoughts",
            Self::StepProgress { .. } => "step-progress",
            Self::Interrupt { .. } => "interrupt",
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serde_kind_tags() {
        let event = Event::new(
            ThreadId::from("t-1"),
            EventPayload::MessageChunk {
                delta: "hello".to_string(),
                done: false,
            },
        );
        let json = serde_json::to_string(&event).unwrap_or_default();
        assert!(json.contains("\"kind\":\"message-chunk\""));
        assert!(json.contains("\"thread_id\":\"t-1\""));

        let back: Event = serde_json::from_str(&json).unwrap_or_else(|e| panic!("serde: {e}"));
        assert_eq!(back.payload.kind(), "message-chunk");
    }

    #[test]
    fn test_tool_call_chunk_id_optional() {
        let frame = r#"{"thread_id":"t","kind":"tool-call-chunks","chunks":[{"fragment":"{\"a\":"}]}"#;
        let event: Event = serde_json::from_str(frame).unwrap_or_else(|e| panic!("serde: {e}"));
        if let EventPayload::ToolCallChunks { chunks } = &event.payload {
            assert_eq!(chunks.len(), 1);
            assert!(chunks[0].id.is_none());
        } else {
            panic!("wrong payload kind");
        }
    }

    #[test]
    fn test_all_kind_discriminators() {
        let payloads = vec![
            EventPayload::MessageChunk {
                delta: String::new(),
                done: true,
            },
            EventPayload::ToolCalls { calls: vec![] },
            EventPayload::ToolCallChunks { chunks: vec![] },
            EventPayload::ToolCallResult {
                call_id: None,
                name: None,
                result: json!(null),
            },
            EventPayload::Thoughts { thoughts: vec![] },
            EventPayload::StepProgress {
                step_index: 0,
                status: StepStatus::Running,
                title: String::new(),
            },
            EventPayload::Interrupt { options: vec![] },
        ];
        let kinds: Vec<&str> = payloads.iter().map(EventPayload::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "message-chunk",
                "tool-calls",
                "tool-call-chunks",
                "tool-call-result",
                "thoughts",
                "step-progress",
                "interrupt",
            ]
        );
    }
}
