//! Job graph: a validated workflow resolved into executable form

use crate::core::config::PipelineConfig;
use crate::core::error::SchemaError;
use crate::core::filter::JobFilter;
use crate::core::job::Job;
use std::collections::{HashMap, HashSet};

/// One node of the graph: the job definition plus its workflow wiring
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub job: Job,
    pub requires: Vec<String>,
    pub filter: JobFilter,
}

/// A workflow's jobs with dependency edges and compiled filters.
///
/// Immutable configuration, built once per run from a validated
/// document. Construction re-checks references and cycles so a graph in
/// hand is always well formed.
#[derive(Debug, Clone)]
pub struct JobGraph {
    /// Workflow name this graph was built from
    pub workflow: String,

    nodes: HashMap<String, GraphNode>,

    /// Deterministic topological order
    order: Vec<String>,
}

impl JobGraph {
    /// Build the graph for one workflow of a validated document.
    pub fn from_config(config: &PipelineConfig, workflow: &str) -> Result<Self, SchemaError> {
        let workflow_config = config
            .workflows
            .get(workflow)
            .ok_or_else(|| SchemaError::UnknownWorkflow(workflow.to_string()))?;

        let default_timeout = config.default_timeout();
        let mut nodes = HashMap::new();

        for entry in workflow_config.entries(workflow)? {
            let job_config =
                config
                    .jobs
                    .get(&entry.job)
                    .ok_or_else(|| SchemaError::UnknownJob {
                        workflow: workflow.to_string(),
                        job: entry.job.clone(),
                    })?;

            let filter = match &entry.options.filters {
                Some(filters) => filters.compile()?,
                None => JobFilter::default(),
            };

            nodes.insert(
                entry.job.clone(),
                GraphNode {
                    job: job_config.to_job(&entry.job, default_timeout),
                    requires: entry.options.requires.clone(),
                    filter,
                },
            );
        }

        let order = Self::topological_sort(workflow, &nodes)?;

        Ok(Self {
            workflow: workflow.to_string(),
            nodes,
            order,
        })
    }

    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.get(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Job names in a deterministic dependency-respecting order
    pub fn execution_order(&self) -> &[String] {
        &self.order
    }

    /// Group jobs into waves: each batch depends only on earlier
    /// batches, so every member of a batch may run concurrently.
    pub fn topological_batches(&self) -> Vec<Vec<String>> {
        let mut placed: HashSet<&str> = HashSet::new();
        let mut remaining: Vec<&str> = self.order.iter().map(String::as_str).collect();
        let mut batches = Vec::new();

        while !remaining.is_empty() {
            let (ready, rest): (Vec<&str>, Vec<&str>) = remaining.iter().copied().partition(|name| {
                self.nodes[*name]
                    .requires
                    .iter()
                    .all(|dep| placed.contains(dep.as_str()))
            });

            // Validated graphs are acyclic, so each wave makes progress
            debug_assert!(!ready.is_empty());

            placed.extend(ready.iter().copied());
            batches.push(ready.iter().map(|s| s.to_string()).collect());
            remaining = rest;
        }

        batches
    }

    /// Depth-first topological sort, deterministic by sorted job name
    fn topological_sort(
        workflow: &str,
        nodes: &HashMap<String, GraphNode>,
    ) -> Result<Vec<String>, SchemaError> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = HashSet::new();

        let mut names: Vec<&String> = nodes.keys().collect();
        names.sort();

        for name in names {
            if !visited.contains(name.as_str()) {
                Self::visit(workflow, name, nodes, &mut visited, &mut stack, &mut result)?;
            }
        }

        Ok(result)
    }

    fn visit<'a>(
        workflow: &str,
        name: &'a str,
        nodes: &'a HashMap<String, GraphNode>,
        visited: &mut HashSet<&'a str>,
        stack: &mut HashSet<&'a str>,
        result: &mut Vec<String>,
    ) -> Result<(), SchemaError> {
        if visited.contains(name) {
            return Ok(());
        }
        stack.insert(name);

        if let Some(node) = nodes.get(name) {
            for dep in &node.requires {
                if stack.contains(dep.as_str()) {
                    return Err(SchemaError::DependencyCycle {
                        workflow: workflow.to_string(),
                        job: dep.clone(),
                    });
                }
                Self::visit(workflow, dep, nodes, visited, stack, result)?;
            }
        }

        stack.remove(name);
        visited.insert(name);
        result.push(name.to_string());
        Ok(())
    }
}
