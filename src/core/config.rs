//! Pipeline configuration from YAML

use crate::core::error::SchemaError;
use crate::core::filter::{JobFilter, PatternRules};
use crate::core::job::{Job, Step};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// Default per-step timeout when neither the document nor the job sets one
const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Top-level pipeline document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Document format version (informational)
    #[serde(default)]
    pub version: Option<u32>,

    /// Job definitions, by name
    pub jobs: BTreeMap<String, JobConfig>,

    /// Workflows wiring jobs into graphs
    pub workflows: BTreeMap<String, WorkflowConfig>,

    /// Default per-step timeout in seconds
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
}

/// One job definition as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Container image reference (recorded, not executed)
    #[serde(default)]
    pub docker: Option<String>,

    /// Static environment variables for every step
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Host environment variable names forwarded into the job without
    /// being logged
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Per-step timeout override in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Ordered steps
    pub steps: Vec<StepConfig>,
}

/// A step entry: either a bare keyword (`- checkout`) or a single-key map
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepConfig {
    Simple(SimpleStep),
    Compound(CompoundStep),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SimpleStep {
    Checkout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompoundStep {
    Run(RunConfig),
    RestoreCache(RestoreCacheConfig),
    SaveCache(SaveCacheConfig),
}

/// A `run` step: a bare command string or `{name, command}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunConfig {
    Command(String),
    Detailed {
        #[serde(default)]
        name: Option<String>,
        command: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreCacheConfig {
    /// Cache key template, may contain `{{ checksum "file" }}`
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveCacheConfig {
    pub key: String,

    /// Filesystem paths (relative to the job workspace) to persist
    pub paths: Vec<String>,
}

/// One workflow: an ordered list of job references
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub jobs: Vec<WorkflowJobConfig>,
}

/// A job reference: a bare name or a single-key map with options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkflowJobConfig {
    Name(String),
    Detailed(BTreeMap<String, WorkflowJobOptions>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowJobOptions {
    /// Jobs in the same workflow that must succeed first
    #[serde(default)]
    pub requires: Vec<String>,

    /// Branch/tag trigger filters
    #[serde(default)]
    pub filters: Option<FiltersConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FiltersConfig {
    #[serde(default)]
    pub branches: Option<RulesConfig>,

    #[serde(default)]
    pub tags: Option<RulesConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub only: Option<OneOrMany>,

    #[serde(default)]
    pub ignore: Option<OneOrMany>,
}

/// A single pattern or a list of patterns
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(pattern) => vec![pattern.clone()],
            OneOrMany::Many(patterns) => patterns.clone(),
        }
    }
}

fn patterns(rules: &Option<OneOrMany>) -> Vec<String> {
    rules.as_ref().map(|r| r.to_vec()).unwrap_or_default()
}

impl FiltersConfig {
    /// Compile the declared rules into a domain filter.
    pub fn compile(&self) -> Result<JobFilter, SchemaError> {
        let compile_rules = |rules: &Option<RulesConfig>| -> Result<Option<PatternRules>, SchemaError> {
            match rules {
                Some(rules) => Ok(Some(PatternRules::compile(
                    &patterns(&rules.only),
                    &patterns(&rules.ignore),
                )?)),
                None => Ok(None),
            }
        };

        Ok(JobFilter {
            branches: compile_rules(&self.branches)?,
            tags: compile_rules(&self.tags)?,
        })
    }
}

/// A resolved workflow entry: job name plus its options
#[derive(Debug, Clone)]
pub struct WorkflowEntry {
    pub job: String,
    pub options: WorkflowJobOptions,
}

impl WorkflowConfig {
    /// Flatten the job references into (name, options) pairs.
    pub fn entries(&self, workflow: &str) -> Result<Vec<WorkflowEntry>, SchemaError> {
        let mut entries = Vec::new();
        for job_ref in &self.jobs {
            match job_ref {
                WorkflowJobConfig::Name(name) => entries.push(WorkflowEntry {
                    job: name.clone(),
                    options: WorkflowJobOptions::default(),
                }),
                WorkflowJobConfig::Detailed(map) => {
                    if map.len() != 1 {
                        return Err(SchemaError::InvalidJob {
                            job: workflow.to_string(),
                            reason: "workflow job entry must have exactly one key".to_string(),
                        });
                    }
                    for (name, options) in map {
                        entries.push(WorkflowEntry {
                            job: name.clone(),
                            options: options.clone(),
                        });
                    }
                }
            }
        }
        Ok(entries)
    }
}

impl RunConfig {
    pub fn name(&self) -> Option<String> {
        match self {
            RunConfig::Command(_) => None,
            RunConfig::Detailed { name, .. } => name.clone(),
        }
    }

    pub fn command(&self) -> &str {
        match self {
            RunConfig::Command(command) => command,
            RunConfig::Detailed { command, .. } => command,
        }
    }
}

impl JobConfig {
    /// Convert to the domain model.
    pub fn to_job(&self, name: &str, default_timeout_secs: u64) -> Job {
        let steps = self
            .steps
            .iter()
            .map(|step| match step {
                StepConfig::Simple(SimpleStep::Checkout) => Step::Checkout,
                StepConfig::Compound(CompoundStep::Run(run)) => Step::Run {
                    name: run.name(),
                    command: run.command().to_string(),
                },
                StepConfig::Compound(CompoundStep::RestoreCache(restore)) => Step::RestoreCache {
                    key: restore.key.clone(),
                },
                StepConfig::Compound(CompoundStep::SaveCache(save)) => Step::SaveCache {
                    key: save.key.clone(),
                    paths: save.paths.clone(),
                },
            })
            .collect();

        Job {
            name: name.to_string(),
            image: self.docker.clone(),
            steps,
            environment: self.environment.clone(),
            secrets: self.secrets.clone(),
            timeout_secs: self.timeout_secs.unwrap_or(default_timeout_secs),
        }
    }
}

impl PipelineConfig {
    /// Load a pipeline document from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml(&content)?)
    }

    /// Parse and validate a pipeline document from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, SchemaError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Effective default per-step timeout
    pub fn default_timeout(&self) -> u64 {
        self.default_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)
    }

    /// Resolve which workflow to run. With no explicit name the document
    /// must define exactly one workflow.
    pub fn select_workflow<'a>(&'a self, name: Option<&'a str>) -> Result<&'a str, SchemaError> {
        match name {
            Some(name) => {
                if self.workflows.contains_key(name) {
                    Ok(name)
                } else {
                    Err(SchemaError::UnknownWorkflow(name.to_string()))
                }
            }
            None => {
                let mut names = self.workflows.keys();
                match (names.next(), names.next()) {
                    (Some(only), None) => Ok(only),
                    _ => Err(SchemaError::AmbiguousWorkflow(
                        self.workflows
                            .keys()
                            .cloned()
                            .collect::<Vec<_>>()
                            .join(", "),
                    )),
                }
            }
        }
    }

    /// Validate the document. Fails fast before anything runs.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for (name, job) in &self.jobs {
            Self::validate_job(name, job)?;
        }

        for (workflow_name, workflow) in &self.workflows {
            let entries = workflow.entries(workflow_name)?;

            let mut seen = HashSet::new();
            for entry in &entries {
                if !seen.insert(entry.job.as_str()) {
                    return Err(SchemaError::DuplicateJob {
                        workflow: workflow_name.clone(),
                        job: entry.job.clone(),
                    });
                }
                if !self.jobs.contains_key(&entry.job) {
                    return Err(SchemaError::UnknownJob {
                        workflow: workflow_name.clone(),
                        job: entry.job.clone(),
                    });
                }
            }

            let members: HashSet<&str> = entries.iter().map(|e| e.job.as_str()).collect();
            for entry in &entries {
                for dep in &entry.options.requires {
                    if !members.contains(dep.as_str()) {
                        return Err(SchemaError::UnknownRequirement {
                            workflow: workflow_name.clone(),
                            job: entry.job.clone(),
                            requires: dep.clone(),
                        });
                    }
                }

                if let Some(filters) = &entry.options.filters {
                    filters.compile()?;
                }
            }

            Self::check_cycles(workflow_name, &entries)?;
        }

        Ok(())
    }

    fn validate_job(name: &str, job: &JobConfig) -> Result<(), SchemaError> {
        if job.steps.is_empty() {
            return Err(SchemaError::InvalidJob {
                job: name.to_string(),
                reason: "job has no steps".to_string(),
            });
        }
        for step in &job.steps {
            if let StepConfig::Compound(CompoundStep::SaveCache(save)) = step {
                if save.paths.is_empty() {
                    return Err(SchemaError::InvalidJob {
                        job: name.to_string(),
                        reason: format!("save_cache '{}' declares no paths", save.key),
                    });
                }
            }
        }
        Ok(())
    }

    /// DFS cycle check over the `requires` relation
    fn check_cycles(workflow: &str, entries: &[WorkflowEntry]) -> Result<(), SchemaError> {
        let requires: HashMap<&str, &Vec<String>> = entries
            .iter()
            .map(|e| (e.job.as_str(), &e.options.requires))
            .collect();

        let mut visited = HashSet::new();
        let mut stack = HashSet::new();

        for entry in entries {
            if !visited.contains(entry.job.as_str()) {
                Self::dfs_check(workflow, &entry.job, &requires, &mut visited, &mut stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check<'a>(
        workflow: &str,
        job: &'a str,
        requires: &HashMap<&'a str, &'a Vec<String>>,
        visited: &mut HashSet<&'a str>,
        stack: &mut HashSet<&'a str>,
    ) -> Result<(), SchemaError> {
        visited.insert(job);
        stack.insert(job);

        if let Some(deps) = requires.get(job) {
            for dep in deps.iter() {
                if stack.contains(dep.as_str()) {
                    return Err(SchemaError::DependencyCycle {
                        workflow: workflow.to_string(),
                        job: dep.clone(),
                    });
                }
                if !visited.contains(dep.as_str()) {
                    Self::dfs_check(workflow, dep, requires, visited, stack)?;
                }
            }
        }

        stack.remove(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUILD_DEPLOY: &str = r#"
version: 2
jobs:
  build:
    docker: python:3.11
    steps:
      - checkout
      - restore_cache:
          key: deps-{{ checksum "setup.py" }}
      - run:
          name: Install dependencies
          command: pip install -e .
      - save_cache:
          key: deps-{{ checksum "setup.py" }}
          paths:
            - .venv
      - run: pytest
  deploy:
    docker: python:3.11
    secrets: [PYPI_PASSWORD]
    steps:
      - checkout
      - run:
          name: Upload package
          command: python setup.py sdist && twine upload dist/*
workflows:
  build_deploy:
    jobs:
      - build
      - deploy:
          requires: [build]
          filters:
            tags:
              only: v[0-9]+(\.[0-9]+)*
            branches:
              ignore: .*
"#;

    #[test]
    fn test_parse_build_deploy_document() {
        let config = PipelineConfig::from_yaml(BUILD_DEPLOY).unwrap();
        assert_eq!(config.version, Some(2));
        assert_eq!(config.jobs.len(), 2);

        let build = &config.jobs["build"];
        assert_eq!(build.docker.as_deref(), Some("python:3.11"));
        assert_eq!(build.steps.len(), 5);
        assert!(matches!(
            build.steps[0],
            StepConfig::Simple(SimpleStep::Checkout)
        ));
        assert!(matches!(
            build.steps[1],
            StepConfig::Compound(CompoundStep::RestoreCache(_))
        ));

        // Bare string form of run
        match &build.steps[4] {
            StepConfig::Compound(CompoundStep::Run(run)) => {
                assert_eq!(run.command(), "pytest");
                assert_eq!(run.name(), None);
            }
            other => panic!("expected run step, got {:?}", other),
        }
    }

    #[test]
    fn test_workflow_entries_carry_options() {
        let config = PipelineConfig::from_yaml(BUILD_DEPLOY).unwrap();
        let entries = config.workflows["build_deploy"]
            .entries("build_deploy")
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].job, "build");
        assert!(entries[0].options.requires.is_empty());
        assert_eq!(entries[1].job, "deploy");
        assert_eq!(entries[1].options.requires, vec!["build".to_string()]);
        assert!(entries[1].options.filters.is_some());
    }

    #[test]
    fn test_to_job_builds_domain_steps() {
        let config = PipelineConfig::from_yaml(BUILD_DEPLOY).unwrap();
        let job = config.jobs["build"].to_job("build", config.default_timeout());
        assert_eq!(job.name, "build");
        assert_eq!(job.timeout_secs, 600);
        assert_eq!(job.steps[0], crate::core::Step::Checkout);
        match &job.steps[3] {
            crate::core::Step::SaveCache { key, paths } => {
                assert_eq!(key, "deps-{{ checksum \"setup.py\" }}");
                assert_eq!(paths, &vec![".venv".to_string()]);
            }
            other => panic!("expected save_cache, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_workflow_job_fails() {
        let yaml = r#"
jobs:
  build:
    steps: [{run: "true"}]
workflows:
  main:
    jobs: [build, build]
"#;
        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(SchemaError::DuplicateJob { .. })
        ));
    }

    #[test]
    fn test_unknown_job_reference_fails() {
        let yaml = r#"
jobs:
  build:
    steps: [{run: "true"}]
workflows:
  main:
    jobs: [build, deploy]
"#;
        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(SchemaError::UnknownJob { .. })
        ));
    }

    #[test]
    fn test_unknown_requirement_fails() {
        let yaml = r#"
jobs:
  build:
    steps: [{run: "true"}]
workflows:
  main:
    jobs:
      - build:
          requires: [ghost]
"#;
        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(SchemaError::UnknownRequirement { .. })
        ));
    }

    #[test]
    fn test_dependency_cycle_fails() {
        let yaml = r#"
jobs:
  a:
    steps: [{run: "true"}]
  b:
    steps: [{run: "true"}]
workflows:
  main:
    jobs:
      - a:
          requires: [b]
      - b:
          requires: [a]
"#;
        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(SchemaError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_invalid_filter_pattern_fails() {
        let yaml = r#"
jobs:
  build:
    steps: [{run: "true"}]
workflows:
  main:
    jobs:
      - build:
          filters:
            tags:
              only: "(unclosed"
"#;
        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(SchemaError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_save_cache_without_paths_fails() {
        let yaml = r#"
jobs:
  build:
    steps:
      - save_cache:
          key: deps-v1
          paths: []
workflows:
  main:
    jobs: [build]
"#;
        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(SchemaError::InvalidJob { .. })
        ));
    }

    #[test]
    fn test_select_workflow_defaults_to_single() {
        let config = PipelineConfig::from_yaml(BUILD_DEPLOY).unwrap();
        assert_eq!(config.select_workflow(None).unwrap(), "build_deploy");
        assert!(matches!(
            config.select_workflow(Some("nightly")),
            Err(SchemaError::UnknownWorkflow(_))
        ));
    }

    #[test]
    fn test_filter_pattern_lists() {
        let yaml = r#"
jobs:
  build:
    steps: [{run: "true"}]
workflows:
  main:
    jobs:
      - build:
          filters:
            branches:
              only: [main, "release-.*"]
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        let entries = config.workflows["main"].entries("main").unwrap();
        let filter = entries[0].options.filters.as_ref().unwrap().compile().unwrap();
        use crate::core::TriggerRef;
        assert!(filter.accepts(&TriggerRef::Branch("release-2.0".to_string())));
        assert!(!filter.accepts(&TriggerRef::Branch("feature".to_string())));
    }
}
