use crate::error::DagError;
use crate::template::step_output_dependencies;
use crate::types::{ExecutionMode, StepDefinition, StepId, WorkflowDefinition};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Why one step waits for another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Listed in `depends_on`
    Explicit,
    /// Implied by sequential mode
    Sequential,
    /// The step reads the other step's output
    Data,
}

/// DAG representation of a workflow definition
pub struct WorkflowDag {
    graph: DiGraph<StepDefinition, EdgeKind>,
    step_indices: HashMap<StepId, NodeIndex>,
    stages: Vec<Vec<StepId>>,
}

impl WorkflowDag {
    /// Build a DAG from a workflow definition.
    ///
    /// A step with `depends_on` waits for exactly those steps. Without it, a
    /// step in sequential mode waits for the step declared before it, unless
    /// that step already depends on it through data, and a step in parallel
    /// mode waits for nothing. Reading another step's output always adds a
    /// dependency on that step.
    pub fn from_definition(workflow: &WorkflowDefinition) -> Result<Self, DagError> {
        let mut graph = DiGraph::new();
        let mut step_indices = HashMap::new();

        for step in &workflow.steps {
            if step_indices.contains_key(&step.name) {
                return Err(DagError::DuplicateStep {
                    step: step.name.clone(),
                });
            }
            let node = graph.add_node(step.clone());
            step_indices.insert(step.name.clone(), node);
        }

        let add_edge = |graph: &mut DiGraph<StepDefinition, EdgeKind>,
                            step: &StepId,
                            dep: &StepId,
                            kind: EdgeKind|
         -> Result<(), DagError> {
            if dep == step {
                return Err(DagError::SelfDependency { step: step.clone() });
            }
            let dep_idx = step_indices.get(dep).ok_or_else(|| DagError::UnknownDependency {
                step: step.clone(),
                dependency: dep.clone(),
            })?;
            let step_idx = step_indices[step];
            // Edge from dependency to dependent (dep -> step)
            if graph.find_edge(*dep_idx, step_idx).is_none() {
                graph.add_edge(*dep_idx, step_idx, kind);
            }
            Ok(())
        };

        for step in &workflow.steps {
            for dep in step.depends_on.iter().flatten() {
                add_edge(&mut graph, &step.name, dep, EdgeKind::Explicit)?;
            }
            for dep in step_output_dependencies(step) {
                add_edge(&mut graph, &step.name, &dep, EdgeKind::Data)?;
            }
        }

        // Implicit ordering yields to data flow: a step whose output an
        // earlier step reads is not made to wait for that step.
        if workflow.mode == ExecutionMode::Sequential {
            for pair in workflow.steps.windows(2) {
                let (previous, step) = (&pair[0], &pair[1]);
                if step.depends_on.is_some() {
                    continue;
                }
                let (prev_idx, step_idx) = (step_indices[&previous.name], step_indices[&step.name]);
                if !has_path_connecting(&graph, step_idx, prev_idx, None) {
                    add_edge(&mut graph, &step.name, &previous.name, EdgeKind::Sequential)?;
                }
            }
        }

        let order = petgraph::algo::toposort(&graph, None).map_err(|cycle| DagError::Cycle {
            step: graph[cycle.node_id()].name.clone(),
        })?;

        let stages = Self::compute_stages(&graph, &order);

        tracing::debug!(
            "Built DAG for workflow {}: {} step(s), {} stage(s)",
            workflow.name,
            graph.node_count(),
            stages.len()
        );

        Ok(Self {
            graph,
            step_indices,
            stages,
        })
    }

    // Longest-path layering: a step sits one stage after its latest dependency
    fn compute_stages(
        graph: &DiGraph<StepDefinition, EdgeKind>,
        order: &[NodeIndex],
    ) -> Vec<Vec<StepId>> {
        let mut level: HashMap<NodeIndex, usize> = HashMap::new();
        for &node in order {
            let l = graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|dep| level[&dep] + 1)
                .max()
                .unwrap_or(0);
            level.insert(node, l);
        }

        let depth = level.values().copied().max().map(|m| m + 1).unwrap_or(0);
        let mut stages = vec![Vec::new(); depth];
        // Node indices follow declaration order, which keeps stages stable
        for node in graph.node_indices() {
            stages[level[&node]].push(graph[node].name.clone());
        }
        stages
    }

    /// Steps grouped into stages; steps in one stage may run concurrently
    pub fn stages(&self) -> &[Vec<StepId>] {
        &self.stages
    }

    /// Get steps in topological order (dependencies first)
    pub fn topological_order(&self) -> Vec<&StepDefinition> {
        self.stages
            .iter()
            .flatten()
            .map(|id| &self.graph[self.step_indices[id]])
            .collect()
    }

    pub fn step(&self, step_id: &StepId) -> Option<&StepDefinition> {
        self.step_indices.get(step_id).map(|&n| &self.graph[n])
    }

    fn node(&self, step_id: &StepId) -> Result<NodeIndex, DagError> {
        self.step_indices
            .get(step_id)
            .copied()
            .ok_or_else(|| DagError::StepNotFound(step_id.clone()))
    }

    fn neighbors(&self, step_id: &StepId, direction: Direction) -> Result<Vec<StepId>, DagError> {
        let node = self.node(step_id)?;
        let mut ids: Vec<StepId> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n].name.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Get direct dependencies of a step
    pub fn dependencies(&self, step_id: &StepId) -> Result<Vec<StepId>, DagError> {
        self.neighbors(step_id, Direction::Incoming)
    }

    /// Get steps that directly depend on the given step
    pub fn dependents(&self, step_id: &StepId) -> Result<Vec<StepId>, DagError> {
        self.neighbors(step_id, Direction::Outgoing)
    }

    /// Every step that transitively depends on the given step
    pub fn downstream(&self, step_id: &StepId) -> Result<Vec<StepId>, DagError> {
        let start = self.node(step_id)?;
        let mut bfs = Bfs::new(&self.graph, start);
        let mut ids = Vec::new();
        while let Some(node) = bfs.next(&self.graph) {
            if node != start {
                ids.push(self.graph[node].name.clone());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Check if all dependencies of a step are satisfied
    pub fn can_execute(
        &self,
        step_id: &StepId,
        completed_steps: &HashSet<StepId>,
    ) -> Result<bool, DagError> {
        let deps = self.dependencies(step_id)?;
        Ok(deps.iter().all(|dep| completed_steps.contains(dep)))
    }

    /// Get all steps with no dependencies (can start immediately)
    pub fn entry_steps(&self) -> Vec<&StepDefinition> {
        self.graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .count()
                    == 0
            })
            .map(|n| &self.graph[n])
            .collect()
    }

    /// Kind of the edge `dependency -> step`, if there is one
    pub fn edge_kind(&self, step_id: &StepId, dependency: &StepId) -> Option<EdgeKind> {
        let step = self.step_indices.get(step_id)?;
        let dep = self.step_indices.get(dependency)?;
        self.graph
            .find_edge(*dep, *step)
            .map(|e| self.graph[e])
    }
}
