//! Message merge engine.
//!
//! Folds an ordered event sequence into one mutable
//! [`StreamedMessage`]. The workflow side uses it to materialize the
//! final record; the consuming side uses the same fold to reconstruct
//! live state from delivered frames. Merging is total: malformed
//! payloads degrade to raw or empty values, they never error out of
//! the merge path.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::event::{Event, EventPayload, Thought, ToolCallChunk, ToolCallUpdate};
use super::json::parse_embedded;
use super::queue::QueueHandle;
use crate::error::WorkflowError;
use crate::workflow::message::Role;

/// Literal marker some producers use to embed a tool result inside
/// thought text. Carried as a compatibility shim for that upstream
/// convention; the payload after the marker is parsed when balanced
/// and buffered for retry when not.
const TOOL_RESULT_MARKER: &str = "TOOL_RESULT:";

/// Whether a message is still receiving frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishState {
    /// Frames may still arrive.
    Streaming,
    /// The finish signal was merged; the message is complete.
    Done,
}

/// Arguments of a merged tool call: either fully known, or an ordered
/// fragment list still awaiting concatenation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolArgs {
    /// Structured arguments.
    Known(serde_json::Value),
    /// Raw fragments in arrival order. "Open" until finalization.
    Fragments(Vec<String>),
}

impl ToolArgs {
    const fn is_open(&self) -> bool {
        matches!(self, Self::Fragments(_))
    }
}

/// A tool call's recorded result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultPayload {
    /// Parsed structured payload.
    Structured(serde_json::Value),
    /// Raw text kept verbatim when no structured parse succeeded.
    Raw(String),
}

/// A tool call as reconstructed from the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedToolCall {
    /// Call id, unique within the message. Empty for calls created by
    /// id-less fragments (degraded mode).
    pub id: String,
    /// Tool name. May be empty until an authoritative update arrives.
    pub name: String,
    /// Arguments, known or still fragmented.
    pub args: ToolArgs,
    /// Result, once one was merged.
    pub result: Option<ResultPayload>,
}

/// Buffered marker payload awaiting completion across merges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PendingMarker {
    /// Id of the call the raw payload was attached to.
    call_id: String,
    /// Accumulated payload text.
    buffer: String,
}

/// One message reconstructed from an ordered event sequence.
///
/// The merge engine is the sole mutator on its side of the queue:
/// the producer folds into its own copy, the consumer into its own,
/// and the two never share one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamedMessage {
    /// Message id.
    pub id: String,
    /// Thread this message belongs to.
    pub thread_id: super::event::ThreadId,
    /// Message role.
    pub role: Role,
    /// Accumulated text content.
    pub content: String,
    /// Ordered content-chunk log, kept for replay and audit.
    pub chunk_log: Vec<String>,
    /// Tool calls merged by id.
    pub tool_calls: Vec<MergedToolCall>,
    /// Deduplicated thoughts, sorted by step index.
    pub thoughts: Vec<Thought>,
    /// Streaming or done.
    pub finish: FinishState,
    /// Interrupt options, when the run paused for a client decision.
    pub interrupt: Option<Vec<String>>,
    /// Marker payload buffered for retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending_marker: Option<PendingMarker>,
}

impl StreamedMessage {
    /// Creates an empty streaming message.
    #[must_use]
    pub fn new(id: impl Into<String>, thread_id: super::event::ThreadId, role: Role) -> Self {
        Self {
            id: id.into(),
            thread_id,
            role,
            content: String::new(),
            chunk_log: Vec::new(),
            tool_calls: Vec::new(),
            thoughts: Vec::new(),
            finish: FinishState::Streaming,
            interrupt: None,
            pending_marker: None,
        }
    }

    /// Returns `true` once the finish signal was merged.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.finish, FinishState::Done)
    }

    /// Folds one event into the message.
    ///
    /// Events for a different thread are ignored (and logged): per
    /// thread there is exactly one live message, and cross-thread
    /// frames must never leak into it.
    pub fn apply(&mut self, event: &Event) {
        if event.thread_id != self.thread_id {
            warn!(
                event_thread = %event.thread_id,
                message_thread = %self.thread_id,
                "dropping event for foreign thread"
            );
            return;
        }

        match &event.payload {
            EventPayload::MessageChunk { delta, done } => self.apply_chunk(delta, *done),
            EventPayload::ToolCalls { calls } => self.apply_tool_calls(calls),
            EventPayload::ToolCallChunks { chunks } => self.apply_tool_chunks(chunks),
            EventPayload::ToolCallResult {
                call_id,
                name,
                result,
            } => self.apply_result(call_id.as_deref(), name.as_deref(), result),
            EventPayload::Thoughts { thoughts } => self.apply_thoughts(thoughts),
            EventPayload::StepProgress { .. } => {
                // Progress frames drive client display only; they carry
                // no message state.
            }
            EventPayload::Interrupt { options } => {
                self.interrupt = Some(options.clone());
            }
        }
    }

    /// Marks the message complete and converts every fragment list
    /// still open into structured arguments. Parse failures degrade to
    /// an empty object.
    pub fn finalize(&mut self) {
        self.finish = FinishState::Done;
        for call in &mut self.tool_calls {
            if let ToolArgs::Fragments(fragments) = &call.args {
                let joined = fragments.concat();
                let value = parse_embedded(&joined).unwrap_or_else(|| {
                    debug!(
                        call_id = call.id,
                        "fragment concatenation did not parse; degrading to empty args"
                    );
                    serde_json::Value::Object(serde_json::Map::new())
                });
                call.args = ToolArgs::Known(value);
            }
        }
    }

    fn apply_chunk(&mut self, delta: &str, done: bool) {
        if !delta.is_empty() {
            self.content.push_str(delta);
            self.chunk_log.push(delta.to_string());
        }
        if done {
            self.finalize();
        }
    }

    fn apply_tool_calls(&mut self, calls: &[ToolCallUpdate]) {
        for update in calls {
            if let Some(existing) = self.tool_calls.iter_mut().find(|c| c.id == update.id) {
                if !update.name.is_empty() {
                    existing.name.clone_from(&update.name);
                }
                existing.args = ToolArgs::Known(update.args.clone());
            } else {
                self.tool_calls.push(MergedToolCall {
                    id: update.id.clone(),
                    name: update.name.clone(),
                    args: ToolArgs::Known(update.args.clone()),
                    result: None,
                });
            }
        }
    }

    fn apply_tool_chunks(&mut self, chunks: &[ToolCallChunk]) {
        for chunk in chunks {
            match &chunk.id {
                Some(id) => {
                    if let Some(call) = self.tool_calls.iter_mut().find(|c| &c.id == id) {
                        match &mut call.args {
                            ToolArgs::Fragments(fragments) => {
                                fragments.push(chunk.fragment.clone());
                            }
                            ToolArgs::Known(_) => {
                                debug!(
                                    call_id = id,
                                    "fragment for call with known args; ignoring"
                                );
                            }
                        }
                    } else {
                        self.tool_calls.push(MergedToolCall {
                            id: id.clone(),
                            name: String::new(),
                            args: ToolArgs::Fragments(vec![chunk.fragment.clone()]),
                            result: None,
                        });
                    }
                }
                None => self.apply_anonymous_fragment(&chunk.fragment),
            }
        }
    }

    /// Id-less fragments attach to whichever call currently has an
    /// open fragment list, last writer wins. This is a documented
    /// degraded-mode heuristic: it can misattribute fragments when
    /// several calls stream concurrently without ids, so producers
    /// should supply ids whenever their protocol allows.
    fn apply_anonymous_fragment(&mut self, fragment: &str) {
        debug!("id-less argument fragment; using last open fragment list");
        if let Some(call) = self
            .tool_calls
            .iter_mut()
            .rev()
            .find(|c| c.args.is_open())
        {
            if let ToolArgs::Fragments(fragments) = &mut call.args {
                fragments.push(fragment.to_string());
            }
        } else {
            self.tool_calls.push(MergedToolCall {
                id: String::new(),
                name: String::new(),
                args: ToolArgs::Fragments(vec![fragment.to_string()]),
                result: None,
            });
        }
    }

    fn apply_result(
        &mut self,
        call_id: Option<&str>,
        name: Option<&str>,
        result: &serde_json::Value,
    ) {
        let payload = match result {
            serde_json::Value::String(s) => ResultPayload::Raw(s.clone()),
            other => ResultPayload::Structured(other.clone()),
        };

        let index = call_id
            .and_then(|id| self.tool_calls.iter().position(|c| c.id == id))
            .or_else(|| {
                // Fallback: earliest call with the same name still
                // lacking a result.
                name.and_then(|n| {
                    self.tool_calls
                        .iter()
                        .position(|c| c.name == n && c.result.is_none())
                })
            });

        match index {
            Some(i) => {
                if self.tool_calls[i].result.is_none() {
                    self.tool_calls[i].result = Some(payload);
                } else {
                    debug!(call_id = self.tool_calls[i].id, "result already set; keeping first");
                }
            }
            None => warn!(?call_id, ?name, "tool result matched no call; dropped"),
        }
    }

    fn apply_thoughts(&mut self, thoughts: &[Thought]) {
        for incoming in thoughts {
            let duplicate = self
                .thoughts
                .iter()
                .any(|t| t.step_index == incoming.step_index && t.text == incoming.text);
            if duplicate {
                continue;
            }
            self.thoughts.push(incoming.clone());
            self.scan_marker(&incoming.text);
        }
        // Stable sort keeps arrival order within one step.
        self.thoughts.sort_by_key(|t| t.step_index);
    }

    /// Scans thought text for the embedded-result marker and tries to
    /// attach the trailing payload to the most recent result-less call.
    fn scan_marker(&mut self, text: &str) {
        if let Some(pending) = &mut self.pending_marker {
            // A prior payload was incomplete: accumulate and retry.
            pending.buffer.push_str(text);
            let call_id = pending.call_id.clone();
            let buffer = pending.buffer.clone();
            if let Some(value) = parse_embedded(&buffer) {
                self.pending_marker = None;
                if let Some(call) = self.tool_calls.iter_mut().find(|c| c.id == call_id) {
                    call.result = Some(ResultPayload::Structured(value));
                }
            }
            return;
        }

        let Some(pos) = text.find(TOOL_RESULT_MARKER) else {
            return;
        };
        let payload = text[pos + TOOL_RESULT_MARKER.len()..].trim_start();

        let Some(target) = self
            .tool_calls
            .iter_mut()
            .rev()
            .find(|c| c.result.is_none())
        else {
            debug!("embedded result marker with no result-less call; ignored");
            return;
        };

        if let Some(value) = parse_embedded(payload) {
            target.result = Some(ResultPayload::Structured(value));
        } else {
            // Incomplete or unparsable: keep the raw text and retry on
            // the next merge.
            target.result = Some(ResultPayload::Raw(payload.to_string()));
            let call_id = target.id.clone();
            self.pending_marker = Some(PendingMarker {
                call_id,
                buffer: payload.to_string(),
            });
        }
    }
}

/// Couples the producer-side live message with the thread's queue so
/// every emitted event is folded locally and enqueued in the same
/// order. This keeps the final record and the delivered stream
/// identical by construction.
#[derive(Debug)]
pub struct MessageFeed {
    message: StreamedMessage,
    handle: QueueHandle,
}

impl MessageFeed {
    /// Creates a feed for the given message and queue handle.
    #[must_use]
    pub const fn new(message: StreamedMessage, handle: QueueHandle) -> Self {
        Self { message, handle }
    }

    /// Folds the payload into the live message and enqueues it.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::QueueClosed`] when the consumer is
    /// gone; callers treat this as cancellation.
    pub async fn emit(&mut self, payload: EventPayload) -> Result<(), WorkflowError> {
        let event = Event::new(self.handle.thread_id().clone(), payload);
        self.message.apply(&event);
        self.handle.publish(event).await
    }

    /// Returns the live message.
    #[must_use]
    pub const fn message(&self) -> &StreamedMessage {
        &self.message
    }

    /// Consumes the feed, returning the materialized message.
    #[must_use]
    pub fn into_message(self) -> StreamedMessage {
        self.message
    }
}
