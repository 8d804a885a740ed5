// Job variant: concurrency and data persistence policy of a registered job

use crate::scheduler::job::JobDetailBuilder;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concurrency {
    /// Fires of the same job may overlap (usually a bad idea)
    Concurrent,
    /// Fire N+1 waits until fire N has completed
    NonConcurrent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Persistence {
    Transient,
    /// Job data changed during a fire is kept for the next one
    Persistent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobVariant {
    pub concurrency: Concurrency,
    pub persistence: Persistence,
}

impl JobVariant {
    pub fn select(allow_concurrent: bool, persistent: bool) -> Self {
        Self {
            concurrency: if allow_concurrent {
                Concurrency::Concurrent
            } else {
                Concurrency::NonConcurrent
            },
            persistence: if persistent {
                Persistence::Persistent
            } else {
                Persistence::Transient
            },
        }
    }

    pub fn allows_concurrent_execution(self) -> bool {
        self.concurrency == Concurrency::Concurrent
    }

    pub fn persists_job_data(self) -> bool {
        self.persistence == Persistence::Persistent
    }

    /// Set the engine flags matching this variant
    pub fn apply(self, builder: JobDetailBuilder) -> JobDetailBuilder {
        builder
            .disallow_concurrent_execution(!self.allows_concurrent_execution())
            .persist_job_data_after_execution(self.persists_job_data())
    }
}

impl fmt::Display for JobVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match (self.concurrency, self.persistence) {
            (Concurrency::Concurrent, Persistence::Transient) => "concurrent",
            (Concurrency::Concurrent, Persistence::Persistent) => "concurrent-persistent",
            (Concurrency::NonConcurrent, Persistence::Transient) => "non-concurrent",
            (Concurrency::NonConcurrent, Persistence::Persistent) => "non-concurrent-persistent",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Job, JobDetail, JobExecutionContext, JobKey};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NoopJob;

    #[async_trait]
    impl Job for NoopJob {
        async fn execute(&self, _context: Arc<JobExecutionContext>) {}
    }

    #[test]
    fn test_select_all_variants() {
        assert_eq!(JobVariant::select(true, false).to_string(), "concurrent");
        assert_eq!(
            JobVariant::select(true, true).to_string(),
            "concurrent-persistent"
        );
        assert_eq!(JobVariant::select(false, false).to_string(), "non-concurrent");
        assert_eq!(
            JobVariant::select(false, true).to_string(),
            "non-concurrent-persistent"
        );
    }

    #[test]
    fn test_apply_sets_engine_flags() {
        let detail = JobVariant::select(false, true)
            .apply(JobDetail::builder(JobKey::new("j", "g"), Arc::new(NoopJob)))
            .build();
        assert!(detail.is_concurrent_execution_disallowed());
        assert!(detail.is_persist_job_data_after_execution());

        let detail = JobVariant::select(true, false)
            .apply(JobDetail::builder(JobKey::new("j", "g"), Arc::new(NoopJob)))
            .build();
        assert!(!detail.is_concurrent_execution_disallowed());
        assert!(!detail.is_persist_job_data_after_execution());
    }
}
