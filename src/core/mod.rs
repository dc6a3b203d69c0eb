//! Core domain models
//!
//! This module defines the data structures that represent pipeline
//! documents, job graphs, filters and run state.

pub mod config;
pub mod error;
pub mod filter;
pub mod graph;
pub mod job;
pub mod run;
pub mod state;

pub use error::SchemaError;
pub use filter::{JobFilter, PatternRules, TriggerRef};
pub use graph::JobGraph;
pub use job::{Job, Step};
pub use run::{JobRun, PipelineRun, Trigger};
pub use state::{JobState, RunState, RunStatus, SkipReason};
