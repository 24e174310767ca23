//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};

/// taskpilot-rs: streaming AI-agent workflow engine.
///
/// Routes project-management queries through intent classification,
/// planning, and bounded tool execution, streaming progress events.
#[derive(Parser, Debug)]
#[command(name = "taskpilot-rs")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a query through the full workflow.
    ///
    /// Requires OPENAI_API_KEY (or TASKPILOT_API_KEY). Tools are
    /// registered by embedding applications; without any, the run
    /// reports what it could not fetch instead of fabricating data.
    #[command(after_help = r#"Examples:
  taskpilot-rs ask "list sprints"                 # Run and print the report
  taskpilot-rs ask "open tasks" --events          # Also print event frames
  taskpilot-rs ask "standup summary" -t thread-7  # Pin the thread id
"#)]
    Ask {
        /// The query text.
        query: String,

        /// Thread id the run is bound to.
        #[arg(short, long, default_value = "cli", env = "TASKPILOT_THREAD")]
        thread: String,

        /// Print each streamed event frame as a JSON line before the
        /// report.
        #[arg(long)]
        events: bool,
    },

    /// Run only the intent classifier on a message.
    #[command(after_help = r#"Examples:
  taskpilot-rs classify "list sprints"      # Keyword stage hit, no LLM call
  taskpilot-rs classify "¿qué hay pendiente?"  # LLM fallback decides
"#)]
    Classify {
        /// The message to classify.
        message: String,
    },

    /// Produce a plan for a query without executing it.
    Plan {
        /// The query text.
        query: String,
    },
}
