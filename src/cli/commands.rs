//! CLI command implementations.
//!
//! Each command builds its slice of the engine from environment
//! configuration and returns the output string; printing stays in
//! `output` and the binary.

use std::sync::Arc;

use crate::cli::output::{
    OutputFormat, SinkTransport, StdoutTransport, format_decision, format_outcome,
};
use crate::cli::parser::{Cli, Commands};
use crate::error::WorkflowError;
use crate::stream::event::ThreadId;
use crate::stream::queue::{DeliveryLoop, ThreadRegistry, Transport};
use crate::workflow::client::create_provider;
use crate::workflow::config::WorkflowConfig;
use crate::workflow::intent::IntentClassifier;
use crate::workflow::orchestrator::WorkflowOrchestrator;
use crate::workflow::plan::Planner;
use crate::workflow::prompt::PromptSet;
use crate::workflow::tool::ToolRegistry;

/// Executes the parsed CLI command.
///
/// # Errors
///
/// Returns [`WorkflowError`] when configuration is incomplete or the
/// run fails.
pub async fn execute(cli: &Cli) -> Result<String, WorkflowError> {
    let format = OutputFormat::parse(&cli.format);

    match &cli.command {
        Commands::Ask {
            query,
            thread,
            events,
        } => cmd_ask(query, thread, *events, format).await,
        Commands::Classify { message } => cmd_classify(message, format).await,
        Commands::Plan { query } => cmd_plan(query).await,
    }
}

async fn cmd_ask(
    query: &str,
    thread: &str,
    events: bool,
    format: OutputFormat,
) -> Result<String, WorkflowError> {
    let config = WorkflowConfig::from_env()?;
    let provider: Arc<dyn crate::workflow::provider::LlmProvider> =
        Arc::from(create_provider(&config)?);

    // Tools come from embedding applications; the CLI runs with an
    // empty registry and lets the report state what it could not fetch.
    let tools = Arc::new(ToolRegistry::new(config.tool_timeout));
    let queues = Arc::new(ThreadRegistry::new(config.queue_capacity));
    let orchestrator =
        WorkflowOrchestrator::new(provider, tools, Arc::clone(&queues), &config);

    let thread_id = ThreadId::from(thread);
    let handle = queues.handle(&thread_id);
    let receiver = queues
        .take_receiver(&thread_id)
        .ok_or_else(|| WorkflowError::Orchestration {
            message: format!("thread '{thread}' already has a consumer"),
        })?;

    let transport: Arc<dyn Transport> = if events {
        Arc::new(StdoutTransport)
    } else {
        Arc::new(SinkTransport)
    };
    let delivery = tokio::spawn(DeliveryLoop::run(
        receiver,
        transport,
        handle.cancel_token(),
    ));

    let outcome = orchestrator.handle(&thread_id, query, &[]).await?;

    queues.close(&thread_id);
    drop(handle);
    let _ = delivery.await;

    Ok(format_outcome(&outcome, format))
}

async fn cmd_classify(message: &str, format: OutputFormat) -> Result<String, WorkflowError> {
    let config = WorkflowConfig::from_env()?;
    let provider = create_provider(&config)?;
    let prompts = PromptSet::load(config.prompt_dir.as_deref());
    let classifier = IntentClassifier::new(&config, prompts.classifier);

    let matched = classifier.classify(&*provider, message, &[]).await;
    Ok(format_decision(matched, format))
}

async fn cmd_plan(query: &str) -> Result<String, WorkflowError> {
    let config = WorkflowConfig::from_env()?;
    let provider = create_provider(&config)?;
    let prompts = PromptSet::load(config.prompt_dir.as_deref());
    let planner = Planner::new(&config, prompts.planner);

    let plan = planner.plan(&*provider, query, "").await?;
    serde_json::to_string_pretty(&plan).map_err(|e| WorkflowError::Orchestration {
        message: format!("plan serialization failed: {e}"),
    })
}
