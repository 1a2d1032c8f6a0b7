//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying plans, run
//! results and recorded state in text or JSON.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::planner::{ChangeAction, OutcomeStatus, Plan};
use crate::reconciler::ReconciliationResult;
use crate::state::{LockInfo, State};

use super::commands::OutputFormat;

/// Widest details cell before truncation.
const DETAILS_WIDTH: usize = 60;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Details")]
    details: String,
}

/// Run outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Result")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "Properties")]
    properties: usize,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&PlanJson::from(plan)).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &Plan) -> String {
        if plan.is_empty() {
            return format!("{} Nothing to do.\n", "✓".green());
        }

        let mut output = String::new();
        if !plan.config_hash.is_empty() {
            let _ = writeln!(output, "Config hash: {}\n", short_hash(&plan.config_hash));
        }

        let rows: Vec<PlanRow> = plan
            .changes
            .iter()
            .map(|change| PlanRow {
                name: change.name.clone(),
                resource_type: change.resource_type.clone(),
                action: Self::format_action(change.action),
                details: truncate(&change.details_text(), DETAILS_WIDTH),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        let _ = write!(output, "\n\n{}\n", plan.summary_line().bold());

        output
    }

    /// Formats the result of a deploy or destroy run.
    #[must_use]
    pub fn format_result(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                if !result.outcomes.is_empty() {
                    let rows: Vec<OutcomeRow> = result
                        .outcomes
                        .iter()
                        .map(|o| OutcomeRow {
                            name: o.name.clone(),
                            resource_type: o.resource_type.clone(),
                            status: Self::format_status(o.status),
                            message: truncate(
                                &o.error.clone().unwrap_or_else(|| o.warnings.join("; ")),
                                DETAILS_WIDTH,
                            ),
                        })
                        .collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push_str("\n\n");
                }

                let mark = if result.success {
                    "✓".green()
                } else {
                    "✗".red()
                };
                let _ = writeln!(output, "{mark} {}", result.summary_line());
                output
            }
        }
    }

    /// Formats recorded state.
    #[must_use]
    pub fn format_state(&self, state: &State) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "Version: {}", state.version);
                let _ = writeln!(output, "Config hash: {}", short_hash(&state.config_hash));
                let _ = writeln!(output, "Last updated: {}", state.last_updated);
                let _ = writeln!(output, "Resources: {}\n", state.len());

                if !state.is_empty() {
                    let rows: Vec<RecordRow> = state
                        .resources
                        .iter()
                        .map(|r| RecordRow {
                            name: r.name.clone(),
                            resource_type: r.resource_type.clone(),
                            provider: r.provider.clone().unwrap_or_else(|| "-".to_string()),
                            properties: r.properties.len(),
                        })
                        .collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\nRecent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let mark = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "  {mark} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, resources: usize, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "valid": result.is_valid(),
                "resources": resources,
                "warnings": result.warnings,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} Configuration is valid ({resources} resource(s), {} warning(s)).\n",
                    "✓".green(),
                    result.warning_count()
                );
                if show_warnings {
                    for warning in &result.warnings {
                        let _ = writeln!(output, "  {} {warning}", "⚠".yellow());
                    }
                }
                output
            }
        }
    }

    /// Formats the current lock, if any.
    #[must_use]
    pub fn format_lock(&self, lock: Option<&LockInfo>) -> String {
        match (self.format, lock) {
            (OutputFormat::Json, _) => serde_json::to_string_pretty(&lock).unwrap_or_default(),
            (OutputFormat::Text, Some(lock)) => format!("Locked: {lock}\n"),
            (OutputFormat::Text, None) => "Not locked.\n".to_string(),
        }
    }

    fn format_action(action: ChangeAction) -> String {
        match action {
            ChangeAction::Create => "+ create".green().to_string(),
            ChangeAction::Update => "~ update".yellow().to_string(),
            ChangeAction::NoChange => "no-change".dimmed().to_string(),
            ChangeAction::Destroy => "- destroy".red().to_string(),
        }
    }

    fn format_status(status: OutcomeStatus) -> String {
        let text = status.to_string();
        match status {
            OutcomeStatus::Created | OutcomeStatus::Updated | OutcomeStatus::Destroyed => {
                text.green().to_string()
            }
            OutcomeStatus::Unchanged => text.dimmed().to_string(),
            OutcomeStatus::Skipped | OutcomeStatus::Partial => text.yellow().to_string(),
            OutcomeStatus::Failed => text.red().to_string(),
        }
    }
}

/// First eight characters of a hash, or `-` if empty.
fn short_hash(hash: &str) -> String {
    if hash.is_empty() {
        "-".to_string()
    } else {
        hash.chars().take(8).collect()
    }
}

/// Truncates a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct PlanJson<'a> {
    #[serde(flatten)]
    plan: &'a Plan,
    summary: String,
    counts: crate::planner::PlanCounts,
}

impl<'a> From<&'a Plan> for PlanJson<'a> {
    fn from(plan: &'a Plan) -> Self {
        Self {
            plan,
            summary: plan.summary_line(),
            counts: plan.counts(),
        }
    }
}
