//! Run scheduler - decides which jobs start next

use crate::core::PipelineRun;

/// Strategy for scheduling job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// One job at a time in dependency order
    Sequential,

    /// Every ready job in the current wave
    Parallel,

    /// At most N jobs per wave
    LimitedParallel(usize),
}

impl Default for SchedulingStrategy {
    fn default() -> Self {
        SchedulingStrategy::Sequential
    }
}

/// Picks the next wave of jobs whose dependencies have succeeded. The
/// engine settles filter and cascade skips first and drains each wave
/// before asking again, so a ready job is genuinely runnable.
pub struct RunScheduler {
    strategy: SchedulingStrategy,
}

impl RunScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    /// Job names to start now, in deterministic order
    pub fn next_jobs(&self, run: &PipelineRun) -> Vec<String> {
        let ready = run.ready_jobs();

        match self.strategy {
            SchedulingStrategy::Sequential => {
                ready.first().map(|name| vec![name.to_string()]).unwrap_or_default()
            }
            SchedulingStrategy::Parallel => ready.iter().map(|s| s.to_string()).collect(),
            SchedulingStrategy::LimitedParallel(max) => {
                ready.iter().take(max).map(|s| s.to_string()).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PipelineConfig;
    use crate::core::{JobGraph, JobState, PipelineRun, Trigger};
    use chrono::Utc;

    const FAN_OUT: &str = r#"
jobs:
  setup: {steps: [{run: "true"}]}
  lint: {steps: [{run: "true"}]}
  test: {steps: [{run: "true"}]}
workflows:
  main:
    jobs:
      - setup
      - lint:
          requires: [setup]
      - test:
          requires: [setup]
"#;

    fn run() -> PipelineRun {
        let config = PipelineConfig::from_yaml(FAN_OUT).unwrap();
        let graph = JobGraph::from_config(&config, "main").unwrap();
        PipelineRun::new(&graph, Trigger::branch("main"))
    }

    #[test]
    fn test_sequential_takes_one() {
        let run = run();
        let scheduler = RunScheduler::new(SchedulingStrategy::Sequential);
        assert_eq!(scheduler.next_jobs(&run), vec!["setup".to_string()]);
    }

    #[test]
    fn test_parallel_takes_all_ready() {
        let mut run = run();
        run.job_mut("setup").unwrap().state = JobState::Succeeded {
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let scheduler = RunScheduler::new(SchedulingStrategy::Parallel);
        let mut next = scheduler.next_jobs(&run);
        next.sort();
        assert_eq!(next, vec!["lint".to_string(), "test".to_string()]);
    }

    #[test]
    fn test_limited_parallel_respects_cap() {
        let mut run = run();
        run.job_mut("setup").unwrap().state = JobState::Succeeded {
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let scheduler = RunScheduler::new(SchedulingStrategy::LimitedParallel(1));
        assert_eq!(scheduler.next_jobs(&run).len(), 1);
    }
}
