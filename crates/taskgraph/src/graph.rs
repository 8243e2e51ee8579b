//! Task graph built from inter-task references

use crate::context::ModelContext;
use crate::error::{Error, Result};
use crate::resource::Task;
use crate::types::TaskKey;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::sync::Arc;

/// An acyclic graph of tasks.
///
/// Nodes are stored in key order, so a node's index doubles as its
/// (kind, name) tie-break rank. Edges point from referrer to referent.
pub struct Graph {
    tasks: Vec<Arc<dyn Task>>,
    keys: Vec<TaskKey>,
    index: HashMap<TaskKey, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl Graph {
    /// Resolve every reference of every registered task.
    ///
    /// Fails on dangling references and cycles; the cycle error names the path.
    pub fn build(ctx: ModelContext) -> Result<Self> {
        Self::from_tasks(ctx.into_tasks(), false)
    }

    fn from_tasks(mut tasks: Vec<Arc<dyn Task>>, drop_outside: bool) -> Result<Self> {
        tasks.sort_by_key(|t| t.key());
        let keys: Vec<TaskKey> = tasks.iter().map(|t| t.key()).collect();
        let index: HashMap<TaskKey, usize> =
            keys.iter().cloned().enumerate().map(|(i, k)| (k, i)).collect();

        let mut dependencies = vec![Vec::new(); tasks.len()];
        let mut dependents = vec![Vec::new(); tasks.len()];
        for (i, task) in tasks.iter().enumerate() {
            for dep in task.dependencies() {
                match index.get(&dep) {
                    Some(&j) => {
                        dependencies[i].push(j);
                        dependents[j].push(i);
                    }
                    None if drop_outside => {}
                    None => {
                        return Err(Error::DanglingReference {
                            from: keys[i].clone(),
                            to: dep,
                        });
                    }
                }
            }
        }
        for list in dependencies.iter_mut().chain(dependents.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        let graph = Self {
            tasks,
            keys,
            index,
            dependencies,
            dependents,
        };
        graph.check_acyclic()?;
        log::debug!("built task graph with {} tasks", graph.len());
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, idx: usize) -> &Arc<dyn Task> {
        &self.tasks[idx]
    }

    pub fn key(&self, idx: usize) -> &TaskKey {
        &self.keys[idx]
    }

    pub fn keys(&self) -> &[TaskKey] {
        &self.keys
    }

    pub fn index_of(&self, key: &TaskKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Indices of tasks that `idx` references
    pub fn dependencies(&self, idx: usize) -> &[usize] {
        &self.dependencies[idx]
    }

    /// Indices of tasks that reference `idx`
    pub fn dependents(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    /// Topological order, referents first, ties broken by (kind, name)
    pub fn topological_order(&self) -> Vec<usize> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = remaining
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &d in &self.dependents[i] {
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    ready.push(Reverse(d));
                }
            }
        }
        order
    }

    /// Deterministic execution order as keys
    pub fn replay_order(&self) -> Vec<TaskKey> {
        self.topological_order()
            .into_iter()
            .map(|i| self.keys[i].clone())
            .collect()
    }

    /// Graph restricted to `keys`.
    ///
    /// References to tasks outside the selection are dropped rather than
    /// rejected; those tasks resolve what they need by name.
    pub fn subgraph(&self, keys: &BTreeSet<TaskKey>) -> Result<Self> {
        let mut tasks = Vec::with_capacity(keys.len());
        for key in keys {
            let idx = self
                .index_of(key)
                .ok_or_else(|| Error::Validation(format!("{key} is not in the graph")))?;
            tasks.push(self.tasks[idx].clone());
        }
        Self::from_tasks(tasks, true)
    }

    fn check_acyclic(&self) -> Result<()> {
        if self.topological_order().len() == self.len() {
            return Ok(());
        }
        Err(Error::Cycle {
            path: self.find_cycle(),
        })
    }

    /// Path around one cycle, first key repeated at the end
    fn find_cycle(&self) -> Vec<TaskKey> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            OnStack,
            Done,
        }

        let mut marks = vec![Mark::New; self.len()];
        for start in 0..self.len() {
            if marks[start] != Mark::New {
                continue;
            }
            // Iterative DFS; each frame is (node, next dependency position)
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::OnStack;
            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                let next = self.dependencies[node].get(frame.1).copied();
                frame.1 += 1;
                let Some(next) = next else {
                    marks[node] = Mark::Done;
                    stack.pop();
                    continue;
                };
                match marks[next] {
                    Mark::New => {
                        marks[next] = Mark::OnStack;
                        stack.push((next, 0));
                    }
                    Mark::OnStack => {
                        let from = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                        let mut path: Vec<TaskKey> = stack[from..]
                            .iter()
                            .map(|(n, _)| self.keys[*n].clone())
                            .collect();
                        path.push(self.keys[next].clone());
                        return path;
                    }
                    Mark::Done => {}
                }
            }
        }
        Vec::new()
    }
}
