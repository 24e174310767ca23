//! Deterministic report assembly.
//!
//! The reporter builds the final answer purely from recorded step
//! outcomes: structured sections for the summary, tabular data, and
//! key metrics, plus a caveats section naming every missing or errored
//! result verbatim. Because nothing is generated, fabricating missing
//! data is impossible by construction, and an empty success cannot be
//! produced — if nothing succeeded, the report says exactly that.

use std::fmt::Write;

use serde_json::Value;

use super::plan::{Plan, StepStatus};

/// Assembles the final report from a finished (or force-finalized) plan.
#[derive(Debug, Clone, Copy)]
pub struct Reporter;

impl Reporter {
    /// Renders the report.
    ///
    /// `best_effort` marks a forced finalization; the report is
    /// annotated so the client knows results are partial.
    #[must_use]
    pub fn render(query: &str, plan: &Plan, best_effort: bool) -> String {
        let mut report = String::new();

        Self::render_summary(&mut report, query, plan);
        Self::render_data(&mut report, plan);
        Self::render_metrics(&mut report, plan);
        Self::render_caveats(&mut report, plan, best_effort);

        report
    }

    fn render_summary(out: &mut String, query: &str, plan: &Plan) {
        let _ = writeln!(out, "## Summary\n");
        let _ = writeln!(out, "Query: {query}");
        let _ = writeln!(out, "Plan: {} (revision {})\n", plan.title, plan.revision);

        let mut any_done = false;
        for step in &plan.steps {
            if step.status != StepStatus::Done {
                continue;
            }
            any_done = true;
            let summary = step
                .outcome
                .as_ref()
                .map_or("", |o| o.summary.as_str())
                .lines()
                .next()
                .unwrap_or("");
            if summary.is_empty() {
                let _ = writeln!(out, "- {}: completed", step.title);
            } else {
                let _ = writeln!(out, "- {}: {summary}", step.title);
            }
        }
        if !any_done {
            let _ = writeln!(
                out,
                "No step produced a usable result; see Caveats for what failed."
            );
        }
        out.push('\n');
    }

    fn render_data(out: &mut String, plan: &Plan) {
        let mut section = String::new();
        for step in &plan.steps {
            let Some(outcome) = &step.outcome else {
                continue;
            };
            for value in &outcome.data {
                if let Some(rendered) = render_value(value) {
                    let _ = writeln!(section, "### {}\n", step.title);
                    section.push_str(&rendered);
                    section.push('\n');
                }
            }
        }
        if !section.is_empty() {
            let _ = writeln!(out, "## Data\n");
            out.push_str(&section);
        }
    }

    fn render_metrics(out: &mut String, plan: &Plan) {
        let mut lines = String::new();
        for step in &plan.steps {
            let Some(outcome) = &step.outcome else {
                continue;
            };
            for value in &outcome.data {
                match value {
                    Value::Array(rows) => {
                        let _ = writeln!(lines, "- **{} rows**: {}", step.title, rows.len());
                    }
                    Value::Object(map) => {
                        for (key, field) in map {
                            if field.is_number() {
                                let _ = writeln!(lines, "- **{key}**: {field}");
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        if !lines.is_empty() {
            let _ = writeln!(out, "## Key Metrics\n");
            out.push_str(&lines);
            out.push('\n');
        }
    }

    fn render_caveats(out: &mut String, plan: &Plan, best_effort: bool) {
        let mut lines = String::new();

        if best_effort {
            let _ = writeln!(
                lines,
                "- Best-effort report: finalization was forced before the plan completed; \
                 results below are partial."
            );
        }

        for step in &plan.steps {
            match step.status {
                StepStatus::Pending | StepStatus::Running => {
                    let _ = writeln!(lines, "- Step '{}' never completed.", step.title);
                }
                StepStatus::Failed => {
                    let _ = writeln!(lines, "- Step '{}' failed.", step.title);
                }
                StepStatus::Done => {}
            }
            if let Some(outcome) = &step.outcome {
                for error in &outcome.errors {
                    let _ = writeln!(lines, "  - {error}");
                }
            }
        }

        if !lines.is_empty() {
            let _ = writeln!(out, "## Caveats\n");
            out.push_str(&lines);
        }
    }
}

/// Renders one recorded payload as markdown.
///
/// Arrays of objects become tables, other arrays become lists, objects
/// become field lists. Scalars are skipped — they carry no tabular
/// information and already surface through metrics or summaries.
fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Array(rows) if !rows.is_empty() => {
            if rows.iter().all(Value::is_object) {
                Some(render_table(rows))
            } else {
                let mut out = String::new();
                for row in rows {
                    let _ = writeln!(out, "- {row}");
                }
                Some(out)
            }
        }
        Value::Object(map) if !map.is_empty() => {
            let mut out = String::new();
            for (key, field) in map {
                let _ = writeln!(out, "- {key}: {field}");
            }
            Some(out)
        }
        _ => None,
    }
}

/// Renders an array of objects as a markdown table. Columns are the
/// union of keys in first-appearance order; missing cells are empty.
fn render_table(rows: &[Value]) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        if let Value::Object(map) = row {
            for key in map.keys() {
                if !columns.contains(&key.as_str()) {
                    columns.push(key);
                }
            }
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "| {} |", columns.join(" | "));
    let _ = writeln!(
        out,
        "|{}|",
        columns.iter().map(|_| " --- ").collect::<Vec<_>>().join("|")
    );
    for row in rows {
        if let Value::Object(map) = row {
            let cells: Vec<String> = columns
                .iter()
                .map(|c| map.get(*c).map_or_else(String::new, render_cell))
                .collect();
            let _ = writeln!(out, "| {} |", cells.join(" | "));
        }
    }
    out
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
