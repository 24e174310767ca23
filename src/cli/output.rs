//! Output formatting for CLI commands.
//!
//! Owns every print in the CLI so the rest of the crate stays free of
//! stdout access.

// CLI output is the one place printing is the point.
#![allow(clippy::print_stdout)]

use async_trait::async_trait;

use crate::error::WorkflowError;
use crate::stream::event::Event;
use crate::stream::queue::Transport;
use crate::workflow::orchestrator::WorkflowOutcome;

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// JSON for scripting.
    Json,
}

impl OutputFormat {
    /// Parses a format name; anything unknown falls back to text.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Formats a workflow outcome for the terminal.
#[must_use]
pub fn format_outcome(outcome: &WorkflowOutcome, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(&outcome_json(outcome))
            .unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Text => match outcome {
            WorkflowOutcome::Answered { report } => report.clone(),
            WorkflowOutcome::NotRouted => {
                "Query was not routed into the workflow (no project-management intent).".to_string()
            }
            WorkflowOutcome::Cancelled => "Run was cancelled by the client.".to_string(),
        },
    }
}

/// Formats a classification decision.
#[must_use]
pub fn format_decision(matched: bool, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => format!("{{\"matched\": {matched}}}"),
        OutputFormat::Text => {
            if matched {
                "matched: the query would enter the workflow".to_string()
            } else {
                "not matched: the query falls through to generic handling".to_string()
            }
        }
    }
}

fn outcome_json(outcome: &WorkflowOutcome) -> serde_json::Value {
    match outcome {
        WorkflowOutcome::Answered { report } => {
            serde_json::json!({"status": "answered", "report": report})
        }
        WorkflowOutcome::NotRouted => serde_json::json!({"status": "not-routed"}),
        WorkflowOutcome::Cancelled => serde_json::json!({"status": "cancelled"}),
    }
}

/// Transport that prints each event frame as a JSON line.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutTransport;

#[async_trait]
impl Transport for StdoutTransport {
    async fn deliver(&self, event: &Event) -> Result<(), WorkflowError> {
        match serde_json::to_string(event) {
            Ok(line) => {
                println!("{line}");
                Ok(())
            }
            Err(e) => Err(WorkflowError::Stream {
                message: format!("event serialization failed: {e}"),
            }),
        }
    }
}

/// Transport that discards frames. Used when the caller only wants the
/// final report; the queue still exercises the full delivery path.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinkTransport;

#[async_trait]
impl Transport for SinkTransport {
    async fn deliver(&self, _event: &Event) -> Result<(), WorkflowError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("text"), OutputFormat::Text);
        assert_eq!(OutputFormat::parse("yaml"), OutputFormat::Text);
    }

    #[test]
    fn test_format_outcome_text() {
        let outcome = WorkflowOutcome::Answered {
            report: "## Summary\nok".to_string(),
        };
        assert!(format_outcome(&outcome, OutputFormat::Text).contains("## Summary"));
        assert!(
            format_outcome(&WorkflowOutcome::NotRouted, OutputFormat::Text)
                .contains("not routed")
        );
    }

    #[test]
    fn test_format_outcome_json() {
        let text = format_outcome(&WorkflowOutcome::NotRouted, OutputFormat::Json);
        assert!(text.contains("\"not-routed\""));
    }

    #[test]
    fn test_format_decision() {
        assert!(format_decision(true, OutputFormat::Text).contains("matched"));
        assert_eq!(
            format_decision(false, OutputFormat::Json),
            "{\"matched\": false}"
        );
    }
}
