pub mod create;
pub mod delete;
pub mod update;

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use taskgraph::{Mode, Report};

use crate::ui;

/// Exit status for a run that left some tasks unfinished
pub const PARTIAL_FAILURE: u8 = 2;

/// Ask before a destructive step
fn confirm(prompt: &str) -> Result<bool> {
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

/// Open `text` in `$EDITOR`; `None` if the user quit without saving
fn edit(text: &str) -> Result<Option<String>> {
    dialoguer::Editor::new()
        .extension(".yaml")
        .edit(text)
        .context("Failed to run $EDITOR")
}

/// Final summary of an execution, with problems listed first
fn print_summary(report: &Report) {
    ui::report_problems(report);
    println!();
    let verb = match report.mode {
        Mode::Apply => "applied",
        Mode::Destroy => "deleted",
    };
    if report.is_success() {
        println!("  {} Cluster {verb}", "✓".green().bold());
    } else {
        println!("  {} Cluster {verb} with errors", "⚠".yellow().bold());
    }
    ui::dim(&report.summary_line());
}

fn exit_status(report: &Report) -> u8 {
    if report.is_success() { 0 } else { PARTIAL_FAILURE }
}
