//! # taskpilot-rs
//!
//! Streaming AI-agent workflow engine: intent routing, step planning,
//! bounded tool execution, and incremental message reconstruction.
//!
//! A query enters through the intent classifier and is answered either
//! by direct tool invocation or by a planned multi-step run. Every
//! component streams progress as events into a per-thread queue; a
//! delivery loop forwards them to the transport, and the merge engine
//! folds them back into one coherent message on the consuming side.
//!
//! # Architecture
//!
//! ```text
//! User query → IntentClassifier
//!   ├── keyword stage (no LLM call)
//!   └── LLM fallback (strict yes/no)
//! Routed query → WorkflowOrchestrator
//!   ├── direct single-step execution
//!   ├── Planner → Plan (typed Steps)
//!   ├── StepExecutor (reason-act loop, concurrent tool dispatch)
//!   ├── Validator (advance | replan | finalize, bounded)
//!   └── Reporter (deterministic assembly, surfaces every failure)
//! Concurrently: Events → ThreadRegistry queue → DeliveryLoop → Transport
//!               Events → StreamedMessage::apply (merge engine)
//! ```

pub mod cli;
pub mod error;
pub mod stream;
pub mod workflow;

pub use error::{ToolError, ToolErrorKind, WorkflowError};
pub use stream::{
    DeliveryLoop, Event, EventPayload, StreamedMessage, ThreadId, ThreadRegistry, Transport,
};
pub use workflow::{
    IntentClassifier, LlmProvider, Plan, Planner, Reporter, Step, StepExecutor, StepKind,
    StepStatus, Tool, ToolRegistry, Validator, WorkflowConfig, WorkflowOrchestrator,
    WorkflowOutcome,
};
