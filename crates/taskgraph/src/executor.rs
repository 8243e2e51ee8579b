//! Execution engine - walks the task graph with a bounded worker pool
//!
//! A single coordinator owns all task state. Workers on a rayon pool run
//! one task step each and report back over a channel. A task waiting out a
//! transient backoff sits in the coordinator's delayed list, not on a worker.

use crate::cancel::CancelToken;
use crate::context::{ExecContext, NoProgress, ProgressCallback};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::report::{Report, ReportEntry};
use crate::resource::{Actual, Task};
use crate::target::Target;
use crate::types::{Action, ExecuteOptions, Mode, Observed, TaskKey, TaskState};
use std::any::Any;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Longest the coordinator sleeps before re-checking cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Execute a graph against a target
///
/// Per task: `find`, compute changes, `check_changes`, then render through
/// the target. Failed tasks block their dependents; independent branches
/// continue. In destroy mode every object is discovered first, then deleted
/// with dependents ahead of what they reference.
pub fn execute<P: ProgressCallback>(
    graph: &Graph,
    target: &Target,
    ctx: &ExecContext,
    opts: &ExecuteOptions,
    progress: &mut P,
) -> Result<Report> {
    let started = Instant::now();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs.max(1))
        .build()
        .map_err(|e| Error::permanent(format!("failed to create thread pool: {e}")))?;

    log::debug!(
        "executing {} tasks against {} ({} jobs)",
        graph.len(),
        target.name(),
        opts.jobs
    );
    progress.on_start(graph.len());

    let mut slots = vec![Slot::default(); graph.len()];
    let (completion, replay_order) = match opts.mode {
        Mode::Apply => {
            let work = |idx: usize| apply_task(graph.task(idx).as_ref(), target, ctx, opts);
            let scheduler = Scheduler::new(&pool, graph, Direction::Forward, opts, ctx.cancel_token());
            (scheduler.run(&mut slots, &work, progress), graph.replay_order())
        }
        Mode::Destroy => {
            let found: Vec<OnceLock<Actual>> = (0..graph.len()).map(|_| OnceLock::new()).collect();

            let mut discovery = vec![Slot::default(); graph.len()];
            let discover = |idx: usize| discover_task(graph.task(idx).as_ref(), ctx, &found[idx]);
            Scheduler::new(&pool, graph, Direction::Forward, opts, ctx.cancel_token())
                .run(&mut discovery, &discover, &mut NoProgress);
            for (slot, seen) in slots.iter_mut().zip(&discovery) {
                slot.initial = seen.initial;
                slot.retries = seen.retries;
                if !seen.state.is_success() {
                    slot.state = seen.state;
                    slot.diagnostic.clone_from(&seen.diagnostic);
                }
            }

            let work = |idx: usize| {
                delete_task(graph.task(idx).as_ref(), target, ctx, found[idx].get())
            };
            let scheduler = Scheduler::new(&pool, graph, Direction::Reverse, opts, ctx.cancel_token());
            let mut order = graph.replay_order();
            order.reverse();
            (scheduler.run(&mut slots, &work, progress), order)
        }
    };
    progress.on_finish();

    let entries = completion
        .into_iter()
        .map(|idx| slots[idx].to_entry(graph.key(idx)))
        .collect();
    Ok(Report {
        entries,
        replay_order,
        target: target.name(),
        mode: opts.mode,
        elapsed: started.elapsed(),
    })
}

/// Coordinator-side state of one task
#[derive(Debug, Clone)]
struct Slot {
    state: TaskState,
    initial: Observed,
    action: Action,
    retries: u32,
    first_started: Option<Instant>,
    duration: Duration,
    changed_fields: Vec<String>,
    diagnostic: Option<String>,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            state: TaskState::Pending,
            initial: Observed::Unknown,
            action: Action::None,
            retries: 0,
            first_started: None,
            duration: Duration::ZERO,
            changed_fields: Vec::new(),
            diagnostic: None,
        }
    }
}

impl Slot {
    fn to_entry(&self, key: &TaskKey) -> ReportEntry {
        ReportEntry {
            key: key.clone(),
            initial: self.initial,
            action: self.action,
            state: self.state,
            duration: self.duration,
            retries: self.retries,
            changed_fields: self.changed_fields.clone(),
            diagnostic: self.diagnostic.clone(),
        }
    }
}

/// What a worker learned before its step finished or failed
#[derive(Debug, Default)]
struct StepInfo {
    observed: Option<Observed>,
    action: Option<Action>,
    changed_fields: Vec<String>,
}

type StepResult = (StepInfo, Result<TaskState>);

fn apply_task(task: &dyn Task, target: &Target, ctx: &ExecContext, opts: &ExecuteOptions) -> StepResult {
    let mut info = StepInfo::default();
    let result = apply_steps(task, target, ctx, opts, &mut info);
    (info, result)
}

fn apply_steps(
    task: &dyn Task,
    target: &Target,
    ctx: &ExecContext,
    opts: &ExecuteOptions,
    info: &mut StepInfo,
) -> Result<TaskState> {
    ctx.check_cancelled()?;
    let key = task.key();

    let actual = if opts.assume_absent {
        None
    } else {
        task.find(ctx)?
    };
    info.observed = Some(if actual.is_some() {
        Observed::Present
    } else {
        Observed::Absent
    });
    if let Some(existing) = &actual
        && let Some(id) = task.cloud_id(existing)
    {
        ctx.publish(&key, id);
    }

    let changes = task.changes(actual.as_ref())?;
    let action = task.plan(actual.as_ref(), &changes);
    info.action = Some(action);
    info.changed_fields = changes.field_names();

    if action == Action::Noop && !target.is_declarative() && !target.is_dry_run() {
        log::debug!("{key} is up to date");
        return Ok(TaskState::Done);
    }

    // Validation failures are final even if a task reports them as transient
    task.check_changes(actual.as_ref(), &changes).map_err(|e| {
        if e.is_retryable() {
            Error::permanent(e.to_string())
        } else {
            e
        }
    })?;

    ctx.check_cancelled()?;
    if let Some(id) = task.render(target, ctx, actual.as_ref(), &changes)? {
        ctx.publish(&key, id);
    }

    if target.is_dry_run() && action.is_change() {
        Ok(TaskState::Planned)
    } else {
        Ok(TaskState::Done)
    }
}

fn discover_task(task: &dyn Task, ctx: &ExecContext, found: &OnceLock<Actual>) -> StepResult {
    let mut info = StepInfo::default();
    let result = (|| -> Result<TaskState> {
        ctx.check_cancelled()?;
        let actual = task.find(ctx)?;
        info.observed = Some(if actual.is_some() {
            Observed::Present
        } else {
            Observed::Absent
        });
        if let Some(existing) = actual {
            if let Some(id) = task.cloud_id(&existing) {
                ctx.publish(&task.key(), id);
            }
            let _ = found.set(existing);
        }
        Ok(TaskState::Done)
    })();
    (info, result)
}

fn delete_task(
    task: &dyn Task,
    target: &Target,
    ctx: &ExecContext,
    actual: Option<&Actual>,
) -> StepResult {
    let mut info = StepInfo::default();
    let result = (|| -> Result<TaskState> {
        ctx.check_cancelled()?;
        let Some(existing) = actual else {
            info.action = Some(Action::Noop);
            return Ok(TaskState::Done);
        };
        info.action = Some(Action::Delete);
        task.delete(target, ctx, existing)?;
        if target.is_dry_run() {
            Ok(TaskState::Planned)
        } else {
            log::info!("deleted {}", task.key());
            Ok(TaskState::Done)
        }
    })();
    (info, result)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    /// Referents before referrers
    Forward,
    /// Referrers before referents
    Reverse,
}

struct Scheduler<'a> {
    pool: &'a rayon::ThreadPool,
    graph: &'a Graph,
    direction: Direction,
    opts: &'a ExecuteOptions,
    cancel: &'a CancelToken,
}

/// Mutable bookkeeping of one scheduler run
struct RunState<'s> {
    slots: &'s mut [Slot],
    waiting: Vec<usize>,
    ready: BinaryHeap<Reverse<usize>>,
    delayed: Vec<(Instant, usize)>,
    completion: Vec<usize>,
}

impl<'a> Scheduler<'a> {
    fn new(
        pool: &'a rayon::ThreadPool,
        graph: &'a Graph,
        direction: Direction,
        opts: &'a ExecuteOptions,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            pool,
            graph,
            direction,
            opts,
            cancel,
        }
    }

    fn prerequisites(&self, idx: usize) -> &'a [usize] {
        match self.direction {
            Direction::Forward => self.graph.dependencies(idx),
            Direction::Reverse => self.graph.dependents(idx),
        }
    }

    fn followers(&self, idx: usize) -> &'a [usize] {
        match self.direction {
            Direction::Forward => self.graph.dependents(idx),
            Direction::Reverse => self.graph.dependencies(idx),
        }
    }

    /// Run every non-terminal slot to a terminal state, returning completion order
    fn run<F, P>(&self, slots: &mut [Slot], work: &F, progress: &mut P) -> Vec<usize>
    where
        F: Fn(usize) -> StepResult + Sync,
        P: ProgressCallback,
    {
        let n = slots.len();
        let mut run = RunState {
            slots,
            waiting: (0..n).map(|i| self.prerequisites(i).len()).collect(),
            ready: BinaryHeap::new(),
            delayed: Vec::new(),
            completion: Vec::with_capacity(n),
        };

        // Slots may arrive terminal (failed during discovery)
        let preset: Vec<usize> = (0..n).filter(|&i| run.slots[i].state.is_terminal()).collect();
        for &i in &preset {
            run.completion.push(i);
            progress.on_task_complete(self.graph.key(i), run.slots[i].state, run.slots[i].action);
        }
        for &i in &preset {
            self.release(&mut run, i, progress);
        }
        for i in 0..n {
            if run.waiting[i] == 0 && run.slots[i].state == TaskState::Pending {
                run.slots[i].state = TaskState::Ready;
                run.ready.push(Reverse(i));
            }
        }

        let (tx, rx) = mpsc::channel::<(usize, StepResult)>();
        let jobs = self.opts.jobs.max(1);
        let mut running = 0usize;

        self.pool.in_place_scope(|scope| {
            loop {
                let now = Instant::now();
                run.promote_delayed(now);

                if self.cancel.is_cancelled() {
                    run.ready.clear();
                    run.delayed.clear();
                } else {
                    while running < jobs {
                        let Some(Reverse(i)) = run.ready.pop() else {
                            break;
                        };
                        let slot = &mut run.slots[i];
                        slot.state = TaskState::Running;
                        slot.first_started.get_or_insert(now);
                        log::debug!("starting {}", self.graph.key(i));
                        progress.on_task_start(self.graph.key(i));

                        running += 1;
                        let tx = tx.clone();
                        scope.spawn(move |_| {
                            let step = panic::catch_unwind(AssertUnwindSafe(|| work(i)))
                                .unwrap_or_else(|payload| {
                                    let msg = panic_message(payload.as_ref());
                                    (
                                        StepInfo::default(),
                                        Err(Error::permanent(format!("task panicked: {msg}"))),
                                    )
                                });
                            let _ = tx.send((i, step));
                        });
                    }
                }

                if running == 0 && run.ready.is_empty() && run.delayed.is_empty() {
                    break;
                }

                let wait = run
                    .next_deadline()
                    .map_or(POLL_INTERVAL, |d| d.saturating_duration_since(now))
                    .min(POLL_INTERVAL);
                match rx.recv_timeout(wait) {
                    Ok((i, step)) => {
                        running -= 1;
                        self.complete(&mut run, i, step, progress);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        // Anything left never started: cancelled, or stranded behind a cancelled task
        for i in 0..n {
            if !run.slots[i].state.is_terminal() {
                let slot = &mut run.slots[i];
                let diagnostic = if slot.retries > 0 || slot.first_started.is_some() {
                    "cancelled during retry backoff"
                } else {
                    "not started"
                };
                slot.state = TaskState::Cancelled;
                slot.diagnostic = Some(diagnostic.to_string());
                run.completion.push(i);
                progress.on_task_complete(self.graph.key(i), TaskState::Cancelled, run.slots[i].action);
            }
        }

        run.completion
    }

    fn complete<P: ProgressCallback>(&self, run: &mut RunState<'_>, idx: usize, step: StepResult, progress: &mut P) {
        let (info, result) = step;
        let key = self.graph.key(idx);
        let now = Instant::now();
        let retry = &self.opts.retry;

        let slot = &mut run.slots[idx];
        if let Some(observed) = info.observed
            && slot.initial == Observed::Unknown
        {
            slot.initial = observed;
        }
        if let Some(action) = info.action {
            slot.action = action;
        }
        if !info.changed_fields.is_empty() {
            slot.changed_fields = info.changed_fields;
        }

        let state = match result {
            Ok(state) => {
                log::debug!("{key}: {} ({})", state, slot.action);
                state
            }
            Err(Error::Cancelled) => {
                slot.diagnostic = Some("cancelled while running".to_string());
                TaskState::Cancelled
            }
            Err(e) if e.is_retryable() && self.cancel.is_cancelled() => {
                log::debug!("{key}: {e} after cancellation");
                slot.diagnostic = Some("cancelled while running".to_string());
                TaskState::Cancelled
            }
            Err(e) if e.is_retryable() => {
                let delay = retry.delay_for_attempt(slot.retries);
                let first = slot.first_started.unwrap_or(now);
                if retry.allows(first, delay) {
                    slot.retries += 1;
                    slot.state = TaskState::Pending;
                    log::warn!(
                        "{key}: {e}; retry {} in {:.1}s",
                        slot.retries,
                        delay.as_secs_f64()
                    );
                    run.delayed.push((now + delay, idx));
                    return;
                }
                slot.diagnostic = Some(format!("gave up after {} retries: {e}", slot.retries));
                TaskState::Failed
            }
            Err(e) => {
                slot.diagnostic = Some(e.to_string());
                TaskState::Failed
            }
        };

        slot.state = state;
        slot.duration = slot.first_started.map_or(Duration::ZERO, |t| t.elapsed());
        if state == TaskState::Failed {
            log::warn!("{key} failed: {}", slot.diagnostic.as_deref().unwrap_or(""));
        }
        run.completion.push(idx);
        progress.on_task_complete(key, state, slot.action);
        self.release(run, idx, progress);
    }

    /// Unblock followers of a successful task, or block them after a failure
    fn release<P: ProgressCallback>(&self, run: &mut RunState<'_>, idx: usize, progress: &mut P) {
        match run.slots[idx].state {
            state if state.is_success() => {
                for &f in self.followers(idx) {
                    run.waiting[f] -= 1;
                    if run.waiting[f] == 0 && run.slots[f].state == TaskState::Pending {
                        run.slots[f].state = TaskState::Ready;
                        run.ready.push(Reverse(f));
                    }
                }
            }
            TaskState::Failed | TaskState::Blocked => {
                let cause = self.graph.key(idx).clone();
                let mut stack: Vec<usize> = self.followers(idx).to_vec();
                while let Some(f) = stack.pop() {
                    let slot = &mut run.slots[f];
                    if slot.state.is_terminal() {
                        continue;
                    }
                    slot.state = TaskState::Blocked;
                    slot.diagnostic = Some(format!("blocked by {cause}"));
                    run.completion.push(f);
                    progress.on_task_complete(self.graph.key(f), TaskState::Blocked, slot.action);
                    stack.extend_from_slice(self.followers(f));
                }
            }
            _ => {}
        }
    }
}

impl RunState<'_> {
    fn promote_delayed(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.delayed.len() {
            if self.delayed[i].0 <= now {
                let (_, idx) = self.delayed.swap_remove(i);
                self.slots[idx].state = TaskState::Ready;
                self.ready.push(Reverse(idx));
            } else {
                i += 1;
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ModelContext;
    use crate::retry::RetryConfig;
    use crate::target::{DirectTarget, DryRunTarget, TerraformTarget};
    use crate::testing::{FakeCloud, Fault, Widget};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn graph(widgets: &[Widget]) -> Graph {
        let mut ctx = ModelContext::new();
        for w in widgets {
            ctx.add(w.clone()).unwrap();
        }
        Graph::build(ctx).unwrap()
    }

    fn chain() -> Vec<Widget> {
        vec![
            Widget::new("net").size(1),
            Widget::new("subnet").size(2).parent("net"),
            Widget::new("vm").size(3).label("web").parent("subnet"),
        ]
    }

    fn fast_opts() -> ExecuteOptions {
        ExecuteOptions {
            retry: RetryConfig::new(Duration::from_millis(10), 2.0, Duration::from_secs(5)),
            ..Default::default()
        }
    }

    fn run(graph: &Graph, cloud: &Arc<FakeCloud>, target: &Target, opts: &ExecuteOptions) -> Report {
        let ctx = ExecContext::new(cloud.clone(), CancelToken::new());
        execute(graph, target, &ctx, opts, &mut NoProgress).unwrap()
    }

    fn direct(cloud: &Arc<FakeCloud>) -> Target {
        Target::Direct(DirectTarget::new(cloud.clone()))
    }

    fn key(name: &str) -> TaskKey {
        TaskKey::new("Widget", name)
    }

    #[test]
    fn test_dry_run_on_absent_state_plans_creates() {
        let cloud = Arc::new(FakeCloud::default());
        let g = graph(&chain());
        let target = Target::DryRun(DryRunTarget::new());
        let report = run(&g, &cloud, &target, &fast_opts());

        assert!(report.entries.iter().all(|e| e.action == Action::Create));
        assert!(report.entries.iter().all(|e| e.state == TaskState::Planned));
        assert!(report.entries.iter().all(|e| e.initial == Observed::Absent));
        assert_eq!(cloud.writes(), 0);
        let Target::DryRun(dry) = &target else {
            unreachable!()
        };
        assert_eq!(dry.planned().len(), 3);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_direct_apply_reaches_fixed_point() {
        let cloud = Arc::new(FakeCloud::default());
        let g = graph(&chain());

        let first = run(&g, &cloud, &direct(&cloud), &fast_opts());
        assert_eq!(first.summary().created, 3);
        assert_eq!(cloud.writes(), 3);

        let second = run(&g, &cloud, &direct(&cloud), &fast_opts());
        assert!(second.entries.iter().all(|e| e.action == Action::Noop));
        assert!(second.entries.iter().all(|e| e.state == TaskState::Done));
        assert_eq!(cloud.writes(), 3);
    }

    #[test]
    fn test_completion_respects_dependencies() {
        let cloud = Arc::new(FakeCloud::default());
        let g = graph(&chain());
        let report = run(&g, &cloud, &direct(&cloud), &fast_opts());
        let order: Vec<&str> = report.entries.iter().map(|e| e.key.name.as_str()).collect();
        assert_eq!(order, vec!["net", "subnet", "vm"]);
        assert_eq!(report.replay_order, vec![key("net"), key("subnet"), key("vm")]);
    }

    #[test]
    fn test_transient_failures_are_retried_with_backoff() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.inject("net", &[Fault::Transient, Fault::Transient, Fault::Transient]);
        let g = graph(&[Widget::new("net").size(1)]);
        let opts = fast_opts();

        let report = run(&g, &cloud, &direct(&cloud), &opts);
        let entry = report.entry(&key("net")).unwrap();
        assert_eq!(entry.state, TaskState::Done);
        assert_eq!(entry.retries, 3);
        let backoff: Duration = (0..3).map(|a| opts.retry.delay_for_attempt(a)).sum();
        assert!(report.elapsed >= backoff);
        assert!(cloud.contains("net"));
    }

    #[test]
    fn test_retry_budget_exhaustion_fails_task() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.inject("net", &[Fault::Transient; 20]);
        let g = graph(&[Widget::new("net").size(1)]);
        let opts = ExecuteOptions {
            retry: RetryConfig::new(Duration::from_millis(5), 2.0, Duration::from_millis(30)),
            ..Default::default()
        };

        let report = run(&g, &cloud, &direct(&cloud), &opts);
        let entry = report.entry(&key("net")).unwrap();
        assert_eq!(entry.state, TaskState::Failed);
        assert!(entry.diagnostic.as_deref().unwrap().starts_with("gave up after"));
    }

    #[test]
    fn test_failed_task_blocks_dependents_only() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.inject("net", &[Fault::Permanent]);
        let mut widgets = chain();
        widgets.push(Widget::new("bucket").size(1));
        let g = graph(&widgets);

        let report = run(&g, &cloud, &direct(&cloud), &fast_opts());
        assert_eq!(report.entry(&key("net")).unwrap().state, TaskState::Failed);
        assert_eq!(report.entry(&key("net")).unwrap().initial, Observed::Unknown);
        let vm = report.entry(&key("vm")).unwrap();
        assert_eq!(vm.state, TaskState::Blocked);
        assert_eq!(vm.action, Action::None);
        assert_eq!(report.entry(&key("subnet")).unwrap().state, TaskState::Blocked);
        assert_eq!(report.entry(&key("bucket")).unwrap().state, TaskState::Done);
        assert!(cloud.contains("bucket"));
        assert!(!cloud.contains("vm"));
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn test_panicking_task_is_isolated() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.inject("net", &[Fault::Panic]);
        let g = graph(&[Widget::new("net").size(1), Widget::new("bucket").size(1)]);

        let report = run(&g, &cloud, &direct(&cloud), &fast_opts());
        let net = report.entry(&key("net")).unwrap();
        assert_eq!(net.state, TaskState::Failed);
        assert!(net.diagnostic.as_deref().unwrap().contains("panicked"));
        assert_eq!(report.entry(&key("bucket")).unwrap().state, TaskState::Done);
    }

    #[test]
    fn test_cancelled_before_start() {
        let cloud = Arc::new(FakeCloud::default());
        let g = graph(&chain());
        let cancel = CancelToken::new();
        cancel.cancel();
        let ctx = ExecContext::new(cloud.clone(), cancel);

        let report = execute(&g, &direct(&cloud), &ctx, &fast_opts(), &mut NoProgress).unwrap();
        assert_eq!(report.entries.len(), 3);
        assert!(report.entries.iter().all(|e| e.state == TaskState::Cancelled));
        assert_eq!(cloud.writes(), 0);
    }

    #[test]
    fn test_cancelled_while_running() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.inject("net", &[Fault::CancelThenTransient]);
        let g = graph(&chain());

        let report = run(&g, &cloud, &direct(&cloud), &fast_opts());
        let net = report.entry(&key("net")).unwrap();
        assert_eq!(net.state, TaskState::Cancelled);
        assert_eq!(net.diagnostic.as_deref(), Some("cancelled while running"));
        assert_eq!(net.retries, 0);
        for name in ["subnet", "vm"] {
            let entry = report.entry(&key(name)).unwrap();
            assert_eq!(entry.state, TaskState::Cancelled);
            assert_eq!(entry.diagnostic.as_deref(), Some("not started"));
        }
        assert_eq!(cloud.writes(), 0);
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn test_cancelled_during_retry_backoff() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.inject("net", &[Fault::Transient]);
        let g = graph(&[Widget::new("net").size(1)]);
        let opts = ExecuteOptions {
            retry: RetryConfig::new(Duration::from_millis(500), 2.0, Duration::from_secs(5)),
            ..Default::default()
        };
        let ctx = ExecContext::new(cloud.clone(), CancelToken::with_timeout(Duration::from_millis(50)));

        let report = execute(&g, &direct(&cloud), &ctx, &opts, &mut NoProgress).unwrap();
        let net = report.entry(&key("net")).unwrap();
        assert_eq!(net.state, TaskState::Cancelled);
        assert_eq!(net.retries, 1);
        assert_eq!(net.diagnostic.as_deref(), Some("cancelled during retry backoff"));
        assert!(!cloud.contains("net"));
    }

    #[test]
    fn test_required_field_fails_without_retry() {
        let cloud = Arc::new(FakeCloud::default());
        let g = graph(&[Widget::new("net")]);
        let report = run(&g, &cloud, &direct(&cloud), &fast_opts());
        let entry = report.entry(&key("net")).unwrap();
        assert_eq!(entry.state, TaskState::Failed);
        assert_eq!(entry.retries, 0);
        assert_eq!(entry.diagnostic.as_deref(), Some("required field not set: size"));
    }

    #[test]
    fn test_in_place_update_and_replace() {
        let cloud = Arc::new(FakeCloud::default());
        run(&graph(&chain()), &cloud, &direct(&cloud), &fast_opts());
        let vm_id = cloud.id_of("vm").unwrap();

        let mut relabeled = chain();
        relabeled[2] = Widget::new("vm").size(3).label("api").parent("subnet");
        let report = run(&graph(&relabeled), &cloud, &direct(&cloud), &fast_opts());
        let vm = report.entry(&key("vm")).unwrap();
        assert_eq!(vm.action, Action::Update);
        assert_eq!(vm.changed_fields, vec!["label"]);
        assert_eq!(cloud.label_of("vm").as_deref(), Some("api"));
        assert_eq!(cloud.id_of("vm").as_deref(), Some(vm_id.as_str()));

        let mut resized = relabeled;
        resized[2] = Widget::new("vm").size(4).label("api").parent("subnet");
        let writes = cloud.writes();
        let report = run(&graph(&resized), &cloud, &direct(&cloud), &fast_opts());
        assert_eq!(report.entry(&key("vm")).unwrap().action, Action::Replace);
        assert_eq!(cloud.writes(), writes + 2);
        assert_ne!(cloud.id_of("vm"), Some(vm_id));
    }

    #[test]
    fn test_immutable_change_is_rejected() {
        let cloud = Arc::new(FakeCloud::default());
        let mut widgets = chain();
        widgets.push(Widget::new("other").size(1));
        run(&graph(&widgets), &cloud, &direct(&cloud), &fast_opts());

        widgets[2] = Widget::new("vm").size(3).label("web").parent("other");
        let writes = cloud.writes();
        let report = run(&graph(&widgets), &cloud, &direct(&cloud), &fast_opts());
        let vm = report.entry(&key("vm")).unwrap();
        assert_eq!(vm.state, TaskState::Failed);
        assert!(vm.diagnostic.as_deref().unwrap().contains("immutable"));
        assert_eq!(cloud.writes(), writes);
    }

    #[test]
    fn test_destroy_deletes_dependents_first() {
        let cloud = Arc::new(FakeCloud::default());
        let mut widgets = chain();
        widgets.push(Widget::new("never-created").size(1));
        let g = graph(&chain());
        run(&g, &cloud, &direct(&cloud), &fast_opts());

        let g = graph(&widgets);
        let opts = ExecuteOptions {
            mode: Mode::Destroy,
            ..fast_opts()
        };
        let report = run(&g, &cloud, &direct(&cloud), &opts);
        let deleted: Vec<&str> = report
            .entries
            .iter()
            .filter(|e| e.action == Action::Delete)
            .map(|e| e.key.name.as_str())
            .collect();
        assert_eq!(deleted, vec!["vm", "subnet", "net"]);
        assert_eq!(
            report.entry(&key("never-created")).unwrap().action,
            Action::Noop
        );
        assert!(!cloud.contains("net"));
        assert!(report.is_success());
    }

    #[test]
    fn test_dry_run_destroy_lists_deletions() {
        let cloud = Arc::new(FakeCloud::default());
        let g = graph(&chain());
        run(&g, &cloud, &direct(&cloud), &fast_opts());
        let writes = cloud.writes();

        let opts = ExecuteOptions {
            mode: Mode::Destroy,
            ..fast_opts()
        };
        let report = run(&g, &cloud, &Target::DryRun(DryRunTarget::new()), &opts);
        assert_eq!(report.summary().deleted, 3);
        assert!(report.entries.iter().all(|e| e.state == TaskState::Planned));
        assert_eq!(cloud.writes(), writes);
    }

    #[test]
    fn test_terraform_output_is_byte_identical() {
        let temp = TempDir::new().unwrap();
        let cloud = Arc::new(FakeCloud::default());
        let g = graph(&chain());
        let opts = ExecuteOptions {
            assume_absent: true,
            jobs: 2,
            ..fast_opts()
        };

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let target = Target::Terraform(TerraformTarget::new(temp.path(), "fake", json!({})));
            let report = run(&g, &cloud, &target, &opts);
            assert!(report.is_success());
            let Target::Terraform(tf) = &target else {
                unreachable!()
            };
            outputs.push(tf.finish().unwrap());
        }
        assert_eq!(outputs[0].current, outputs[1].current);
        assert!(!outputs[1].changed());
        assert_eq!(cloud.reads(), 0);
        assert!(outputs[0].current.contains("${fake_widget.subnet.id}"));
    }
}
