//! conveyor - a CI pipeline runner for YAML-defined job graphs

pub mod cache;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod shell;

// Re-export commonly used types
pub use cache::{CacheStore, DirCacheStore, InMemoryCacheStore};
pub use core::{
    Job, JobFilter, JobGraph, JobState, PipelineRun, RunStatus, SchemaError, SkipReason, Step,
    Trigger, TriggerRef,
};
pub use execution::{RunEvent, RunReport, SchedulingStrategy, WorkflowEngine};
pub use shell::{CommandRunner, ShellRunner};
