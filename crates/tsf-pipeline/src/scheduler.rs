//! Dependency resolution and level-parallel execution.

use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;
use tsf_core::{Error, Result};

use crate::stage::{Inputs, Stage, StageId};
use crate::store::{LocalStore, Publish};

/// Stage keys touched by one [`Scheduler::build`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    /// Stages whose `run` was called, in execution order.
    pub executed: Vec<String>,
    /// Complete stages that were reused.
    pub cached: Vec<String>,
}

impl BuildSummary {
    /// `true` when nothing had to run.
    pub fn is_noop(&self) -> bool {
        self.executed.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

struct Node {
    stage: Arc<dyn Stage>,
    deps: Vec<usize>,
    complete: bool,
}

/// Builds stages against a [`LocalStore`].
#[derive(Debug, Clone)]
pub struct Scheduler {
    store: LocalStore,
}

impl Scheduler {
    /// Scheduler over `store`.
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// The artifact store.
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Make sure the artifacts of `roots` exist, producing missing upstream
    /// artifacts first.
    ///
    /// Complete stages are not expanded. Independent stages run in parallel;
    /// the first failing stage aborts the build after its level finishes.
    pub fn build(&self, roots: &[Arc<dyn Stage>]) -> Result<BuildSummary> {
        let mut graph = Graph::default();
        for root in roots {
            graph.visit(&self.store, Arc::clone(root), &mut Vec::new())?;
        }

        let mut summary = BuildSummary::default();
        for node in &graph.nodes {
            if node.complete {
                tracing::debug!(stage = %node.stage.id(), "cached");
                summary.cached.push(node.stage.id().key());
            }
        }

        let n = graph.nodes.len();
        let mut pending = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, node) in graph.nodes.iter().enumerate() {
            if node.complete {
                continue;
            }
            for &d in &node.deps {
                if !graph.nodes[d].complete {
                    pending[i] += 1;
                    dependents[d].push(i);
                }
            }
        }

        let mut ready: Vec<usize> = (0..n)
            .filter(|&i| !graph.nodes[i].complete && pending[i] == 0)
            .collect();
        let mut level = 0usize;
        while !ready.is_empty() {
            tracing::debug!(level, stages = ready.len(), "running level");
            let results: Vec<Result<Publish>> =
                ready.par_iter().map(|&i| self.execute(&graph, i)).collect();

            let mut next = Vec::new();
            for (&i, result) in ready.iter().zip(results) {
                result.map_err(|e| Error::Stage {
                    stage: graph.nodes[i].stage.id().key(),
                    source: Box::new(e),
                })?;
                summary.executed.push(graph.nodes[i].stage.id().key());
                for &j in &dependents[i] {
                    pending[j] -= 1;
                    if pending[j] == 0 {
                        next.push(j);
                    }
                }
            }
            next.sort_unstable();
            ready = next;
            level += 1;
        }

        tracing::info!(
            executed = summary.executed.len(),
            cached = summary.cached.len(),
            "build finished"
        );
        Ok(summary)
    }

    fn execute(&self, graph: &Graph, index: usize) -> Result<Publish> {
        let node = &graph.nodes[index];
        let id = node.stage.id();
        let target = self.store.target(id);

        let mut targets = Vec::with_capacity(node.deps.len());
        for &d in &node.deps {
            let input = self.store.target(graph.nodes[d].stage.id());
            if !input.exists() {
                return Err(Error::Data(format!("input {} is missing", input.id())));
            }
            targets.push(input);
        }

        tracing::info!(stage = %id, fingerprint = %&id.fingerprint()[..16], "running stage");
        let bytes = node.stage.run(&Inputs::new(targets))?;
        target.write(&bytes)
    }
}

#[derive(Default)]
struct Graph {
    nodes: Vec<Node>,
    index: HashMap<StageId, usize>,
    marks: Vec<Mark>,
}

impl Graph {
    fn visit(
        &mut self,
        store: &LocalStore,
        stage: Arc<dyn Stage>,
        path: &mut Vec<String>,
    ) -> Result<usize> {
        let id = stage.id().clone();
        if let Some(&i) = self.index.get(&id) {
            if self.marks[i] == Mark::Visiting {
                path.push(id.key());
                return Err(Error::DependencyCycle(path.join(" -> ")));
            }
            return Ok(i);
        }

        let i = self.nodes.len();
        let complete = store.target(&id).exists();
        self.nodes.push(Node { stage: Arc::clone(&stage), deps: Vec::new(), complete });
        self.index.insert(id.clone(), i);
        if complete {
            self.marks.push(Mark::Done);
            return Ok(i);
        }
        self.marks.push(Mark::Visiting);

        path.push(id.key());
        let requirements = stage.requires().map_err(|e| Error::Stage {
            stage: id.key(),
            source: Box::new(e),
        })?;
        let mut deps = Vec::with_capacity(requirements.len());
        for req in requirements {
            deps.push(self.visit(store, req, path)?);
        }
        path.pop();

        self.nodes[i].deps = deps;
        self.marks[i] = Mark::Done;
        Ok(i)
    }
}
