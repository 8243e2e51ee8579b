use colored::Colorize;
use taskgraph::{Action, PlannedChange, Report, ReportEntry, TaskState};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Plans and Reports
// ============================================================================

fn action_marker(action: Action) -> colored::ColoredString {
    match action {
        Action::Create => "+".green().bold(),
        Action::Update => "~".yellow().bold(),
        Action::Replace => "±".yellow().bold(),
        Action::Delete => "-".red().bold(),
        Action::Noop | Action::None => " ".normal(),
    }
}

/// One line per planned change, noops omitted
pub fn plan(planned: &[PlannedChange]) {
    let changes: Vec<&PlannedChange> = planned.iter().filter(|p| p.action.is_change()).collect();
    if changes.is_empty() {
        info("No changes");
        return;
    }
    for change in changes {
        let fields = if change.fields.is_empty() || change.action == Action::Create {
            String::new()
        } else {
            format!(" ({})", change.fields.join(", "))
        };
        println!(
            "  {} {} {}{}",
            action_marker(change.action),
            change.action.to_string().bold(),
            change.key,
            fields.dimmed()
        );
    }
}

fn entry_line(entry: &ReportEntry) -> String {
    let state = match entry.state {
        TaskState::Failed => entry.state.to_string().red().to_string(),
        TaskState::Blocked | TaskState::Cancelled => entry.state.to_string().yellow().to_string(),
        _ => entry.state.to_string(),
    };
    let mut line = format!("{} {} [{state}]", entry.action, entry.key);
    if entry.retries > 0 {
        line.push_str(&format!(" after {} retries", entry.retries));
    }
    line
}

/// Failed, blocked and cancelled tasks with their diagnostics
pub fn report_problems(report: &Report) {
    let problems: Vec<&ReportEntry> = report
        .sorted_entries()
        .into_iter()
        .filter(|e| !e.state.is_success())
        .collect();
    if problems.is_empty() {
        return;
    }
    section("Problems");
    for entry in problems {
        error(&entry_line(entry));
        if let Some(diagnostic) = &entry.diagnostic {
            dim(diagnostic);
        }
    }
}

/// Every task that changed something
pub fn report_changes(report: &Report) {
    for entry in report.sorted_entries() {
        if entry.action.is_change() && entry.state.is_success() {
            println!("  {} {}", action_marker(entry.action), entry_line(entry));
        }
    }
}

/// Print a unified-style diff between two texts
pub fn text_diff(old: &str, new: &str) {
    let diff = similar::TextDiff::from_lines(old, new);
    let mut has_changes = false;

    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Delete => {
                has_changes = true;
                print!("    {}", format!("- {change}").red());
            }
            similar::ChangeTag::Insert => {
                has_changes = true;
                print!("    {}", format!("+ {change}").green());
            }
            similar::ChangeTag::Equal => {}
        }
    }

    if !has_changes {
        println!("    {}", "(no changes)".dimmed());
    }
}
