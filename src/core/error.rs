//! Schema validation errors

use thiserror::Error;

/// Errors raised while loading or validating a pipeline document.
///
/// A `SchemaError` is fatal before anything runs: a document that fails
/// validation never produces a `PipelineRun`.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid pipeline document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("workflow '{workflow}' lists job '{job}' more than once")]
    DuplicateJob { workflow: String, job: String },

    #[error("workflow '{workflow}' references unknown job '{job}'")]
    UnknownJob { workflow: String, job: String },

    #[error("job '{job}' in workflow '{workflow}' requires '{requires}', which is not part of that workflow")]
    UnknownRequirement {
        workflow: String,
        job: String,
        requires: String,
    },

    #[error("dependency cycle in workflow '{workflow}' involving job '{job}'")]
    DependencyCycle { workflow: String, job: String },

    #[error("invalid filter pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("workflow '{0}' not found")]
    UnknownWorkflow(String),

    #[error("no workflow selected; document defines {0}, pick one with --workflow")]
    AmbiguousWorkflow(String),

    #[error("job '{job}': {reason}")]
    InvalidJob { job: String, reason: String },
}
