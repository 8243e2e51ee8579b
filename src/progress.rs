//! Progress bar for graph execution

use indicatif::{ProgressBar, ProgressStyle};
use taskgraph::{Action, ProgressCallback, TaskKey, TaskState};

/// Reports executor progress on an indicatif bar
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar }
    }
}

impl ProgressCallback for BarProgress {
    fn on_start(&mut self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_task_start(&mut self, key: &TaskKey) {
        self.bar.set_message(key.to_string());
    }

    fn on_task_complete(&mut self, key: &TaskKey, state: TaskState, action: Action) {
        if state == TaskState::Failed {
            self.bar.println(format!("failed: {action} {key}"));
        }
        self.bar.inc(1);
    }

    fn on_finish(&mut self) {
        self.bar.finish_and_clear();
    }
}
