//! Streaming layer.
//!
//! Everything between the workflow and the client lives here: event
//! frames, the per-thread queue registry, the delivery loop, and the
//! merge engine that folds an ordered event sequence back into one
//! coherent message.
//!
//! ```text
//! workflow ──publish──▶ ThreadRegistry queue ──▶ DeliveryLoop ──▶ Transport
//!     │                                                              │
//!     └── StreamedMessage::apply (producer copy)     consumer copy ──┘
//! ```

pub mod event;
pub mod json;
pub mod merge;
pub mod queue;

pub use event::{Event, EventPayload, Thought, ThreadId, ToolCallChunk, ToolCallUpdate};
pub use merge::{
    FinishState, MergedToolCall, MessageFeed, ResultPayload, StreamedMessage, ToolArgs,
};
pub use queue::{CancelToken, DeliveryLoop, QueueHandle, ThreadRegistry, Transport};
