//! Run orchestration: engine, scheduling, step execution, reporting

pub mod engine;
pub mod report;
pub mod runner;
pub mod scheduler;

pub use engine::{CancelHandle, EventHandler, RunEvent, WorkflowEngine};
pub use report::{build_report, JobOutcome, JobReport, RunReport};
pub use runner::{JobSandbox, StepOutcome, StepRunner};
pub use scheduler::{RunScheduler, SchedulingStrategy};
