//! Validation and reflection between steps.
//!
//! After each step the validator decides whether the run advances,
//! goes back to the planner, or finalizes. It owns two transitions no
//! other component may take: the escalation from the lightweight
//! direct path to full planning, and the forced finalization when the
//! replanning ceiling is reached — the run always terminates with
//! whatever partial results exist, never an unbounded loop.

use std::fmt::Write;

use tracing::{debug, warn};

use super::plan::{Plan, Step, StepStatus};

/// The validator's decision after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Run the next pending step.
    Advance,
    /// Go back to the planner with feedback.
    Replan {
        /// What went wrong, for the revision prompt.
        feedback: String,
    },
    /// Assemble the report.
    Finalize {
        /// `true` when finalization was forced with incomplete or
        /// failed results; the report is annotated best-effort.
        forced: bool,
    },
}

/// Decides between advancing, replanning, and finalizing.
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    max_plan_iterations: usize,
}

impl Validator {
    /// Creates a validator with the given replanning ceiling.
    #[must_use]
    pub const fn new(max_plan_iterations: usize) -> Self {
        Self {
            max_plan_iterations,
        }
    }

    /// Assesses the plan after a step completed.
    ///
    /// `iterations_used` counts replanning rounds so far. At or beyond
    /// the ceiling the verdict is always `Finalize`.
    #[must_use]
    pub fn assess(&self, plan: &Plan, iterations_used: usize) -> Verdict {
        if iterations_used >= self.max_plan_iterations {
            warn!(
                iterations_used,
                ceiling = self.max_plan_iterations,
                "plan iteration ceiling reached; forcing finalize"
            );
            return Verdict::Finalize {
                forced: plan.has_failures() || !plan.is_complete(),
            };
        }

        if plan.has_failures() {
            let feedback = failure_feedback(plan);
            debug!(revision = plan.revision, "step failure; requesting replan");
            return Verdict::Replan { feedback };
        }

        if plan.is_complete() {
            Verdict::Finalize { forced: false }
        } else {
            Verdict::Advance
        }
    }

    /// Decides whether a direct-path step needs escalation to the full
    /// planner: a failed, empty, or missing outcome means the
    /// lightweight path was not enough.
    #[must_use]
    pub fn should_escalate(&self, step: &Step) -> bool {
        if step.status == StepStatus::Failed {
            return true;
        }
        step.outcome.as_ref().is_none_or(super::plan::StepOutcome::is_empty)
    }
}

/// Summarizes failed steps for the revision prompt.
fn failure_feedback(plan: &Plan) -> String {
    let mut feedback = String::new();
    for (idx, step) in plan.steps.iter().enumerate() {
        if step.status != StepStatus::Failed {
            continue;
        }
        let _ = write!(feedback, "step {idx} '{}' failed", step.title);
        if let Some(outcome) = &step.outcome {
            if let Some(first_error) = outcome.errors.first() {
                let _ = write!(feedback, ": {first_error}");
            }
        }
        feedback.push('\n');
    }
    feedback
}
