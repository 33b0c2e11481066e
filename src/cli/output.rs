//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying snapshots,
//! plans, and stack records to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::graph::{Snapshot, SpecHasher};
use crate::planner::Plan;
use crate::state::{StackKey, StackRecord};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Snapshot resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    name: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Properties")]
    properties: String,
}

/// Plan change row for table display.
#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Stack listing row for table display.
#[derive(Tabled)]
struct StackRow {
    #[tabled(rename = "Environment")]
    environment: String,
    #[tabled(rename = "Stack")]
    stack: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a resolved snapshot for display.
    #[must_use]
    pub fn format_snapshot(&self, snapshot: &Snapshot) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(snapshot).unwrap_or_default(),
            OutputFormat::Text => Self::format_snapshot_text(snapshot),
        }
    }

    /// Formats a snapshot as text.
    fn format_snapshot_text(snapshot: &Snapshot) -> String {
        let mut output = String::new();
        let _ = write!(
            output,
            "\nSnapshot for {}/{} (root {})\n",
            snapshot.environment, snapshot.scope, snapshot.root_module
        );
        let _ = write!(
            output,
            "   Content hash: {}\n\n",
            SpecHasher::short_hash(&snapshot.content_hash)
        );

        if snapshot.resources.is_empty() {
            output.push_str("   No resources.\n");
            return output;
        }

        let rows: Vec<ResourceRow> = snapshot
            .resources
            .iter()
            .map(|spec| ResourceRow {
                name: spec.id.name.clone(),
                resource_type: spec.id.resource_type.clone(),
                properties: Self::truncate(
                    &spec
                        .properties
                        .iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect::<Vec<_>>()
                        .join(", "),
                    48,
                ),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = write!(output, "\n{} resource(s) declared.\n", snapshot.resources.len());
        output
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - stack is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = write!(
            output,
            "\nPlan for snapshot {}\n\n",
            SpecHasher::short_hash(&plan.snapshot_hash)
        );

        let mut rows: Vec<ChangeRow> = Vec::new();
        let mut index = 0_usize;
        for change in &plan.to_create {
            index += 1;
            rows.push(ChangeRow {
                index,
                action: "+create".green().to_string(),
                resource: change.id.to_string(),
                detail: Self::truncate(
                    &format!("hash {}", SpecHasher::short_hash(&change.new_hash)),
                    40,
                ),
            });
        }
        for change in &plan.to_update {
            index += 1;
            let detail = if change.changed_fields.is_empty() {
                String::from("adopt")
            } else {
                change.changed_fields.join(", ")
            };
            rows.push(ChangeRow {
                index,
                action: "~update".yellow().to_string(),
                resource: change.id.to_string(),
                detail: Self::truncate(&detail, 40),
            });
        }
        for delete in &plan.to_delete {
            index += 1;
            rows.push(ChangeRow {
                index,
                action: "-delete".red().to_string(),
                resource: delete.id.to_string(),
                detail: String::from("out of scope"),
            });
        }
        for id in &plan.to_detach {
            index += 1;
            rows.push(ChangeRow {
                index,
                action: "/detach".dimmed().to_string(),
                resource: id.to_string(),
                detail: String::from("left in place"),
            });
        }

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} to detach\n",
            plan.to_create.len().to_string().green(),
            plan.to_update.len().to_string().yellow(),
            plan.to_delete.len().to_string().red(),
            plan.to_detach.len()
        );

        if detailed {
            for change in plan.to_create.iter().chain(&plan.to_update) {
                let _ = write!(output, "\n{}\n", change.id);
                for (field, value) in &change.spec.properties {
                    let _ = writeln!(output, "   {field}: {value}");
                }
            }
        }

        output
    }

    /// Formats a stack record for display.
    #[must_use]
    pub fn format_record(&self, key: &StackKey, record: &StackRecord) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(record).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = write!(output, "\nStack: {key}\n\n");
                let _ = writeln!(output, "   Record version: {}", record.version);
                let _ = writeln!(
                    output,
                    "   Last snapshot: {}",
                    record
                        .last_snapshot_hash
                        .as_deref()
                        .map_or_else(|| String::from("never applied"), SpecHasher::short_hash)
                );
                if let Some(applied) = record.last_applied_at {
                    let _ = writeln!(
                        output,
                        "   Last applied: {}",
                        applied.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
                let _ = writeln!(output, "   Unmanage policy: {}", record.unmanage_policy);
                let _ = writeln!(output, "   Managed resources: {}", record.managed.len());
                for (id, state) in &record.managed {
                    let _ = writeln!(
                        output,
                        "     - {id} ({})",
                        SpecHasher::short_hash(&state.spec_hash)
                    );
                }
                output
            }
        }
    }

    /// Formats the stack listing for display.
    #[must_use]
    pub fn format_stack_list(&self, keys: &[StackKey]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(keys).unwrap_or_default(),
            OutputFormat::Text => {
                if keys.is_empty() {
                    return String::from("No stack records found.\n");
                }
                let rows: Vec<StackRow> = keys
                    .iter()
                    .map(|k| StackRow {
                        environment: k.environment.clone(),
                        stack: k.stack.clone(),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Truncates a string to a maximum number of characters.
    ///
    /// Counts characters rather than bytes; property values are arbitrary
    /// user YAML and may contain multibyte text.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}
