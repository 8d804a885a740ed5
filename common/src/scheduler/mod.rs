// In-process scheduling engine: named cron schedulers and their factory

pub mod engine;
pub mod factory;
pub mod job;
pub mod trigger;

pub use engine::LocalScheduler;
pub use factory::SchedulerFactory;
pub use job::{GroupMatcher, Job, JobDataMap, JobDetail, JobExecutionContext, JobKey};
pub use trigger::{CronTrigger, MisfireInstruction, TriggerKey, DEFAULT_PRIORITY};

use crate::errors::EngineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Operations a scheduler instance exposes to registration and queries
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Instance name, unique within a factory
    fn name(&self) -> &str;

    /// Start firing triggers; a no-op when already started
    async fn start(&self) -> Result<(), EngineError>;

    /// Start firing triggers once `delay` has elapsed
    async fn start_delayed(&self, delay: Duration) -> Result<(), EngineError>;

    /// True once a start (immediate or delayed) has been requested
    fn is_started(&self) -> bool;

    fn is_shutdown(&self) -> bool;

    /// Stop firing; with `wait_for_jobs` in-flight fires complete first
    async fn shutdown(&self, wait_for_jobs: bool);

    /// Store a job with its trigger, returning the first fire time
    async fn schedule_job(
        &self,
        job: JobDetail,
        trigger: CronTrigger,
    ) -> Result<DateTime<Utc>, EngineError>;

    /// Remove a job and all of its triggers; `false` when it did not exist
    async fn delete_job(&self, key: &JobKey) -> Result<bool, EngineError>;

    async fn job_keys(&self, matcher: &GroupMatcher) -> Result<Vec<JobKey>, EngineError>;

    async fn job_detail(&self, key: &JobKey) -> Result<Option<JobDetail>, EngineError>;

    async fn triggers_of_job(&self, key: &JobKey) -> Result<Vec<CronTrigger>, EngineError>;
}
