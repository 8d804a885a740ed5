// Job model: keys, details, data map and the per-fire execution context

use super::trigger::CronTrigger;
use super::Scheduler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Key/value bag attached to a job
pub type JobDataMap = HashMap<String, serde_json::Value>;

/// Unique identity of a job inside one scheduler
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

impl JobKey {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Group filter used when enumerating job keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMatcher {
    AnyGroup,
    GroupEquals(String),
}

impl GroupMatcher {
    pub fn matches(&self, key: &JobKey) -> bool {
        match self {
            GroupMatcher::AnyGroup => true,
            GroupMatcher::GroupEquals(group) => key.group == *group,
        }
    }
}

/// Work executed on every fire of a job
#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(&self, context: Arc<JobExecutionContext>);
}

/// Registered job definition
#[derive(Clone)]
pub struct JobDetail {
    key: JobKey,
    description: Option<String>,
    durable: bool,
    requests_recovery: bool,
    concurrent_execution_disallowed: bool,
    persist_job_data_after_execution: bool,
    job_data: JobDataMap,
    job: Arc<dyn Job>,
}

impl JobDetail {
    pub fn builder(key: JobKey, job: Arc<dyn Job>) -> JobDetailBuilder {
        JobDetailBuilder {
            detail: JobDetail {
                key,
                description: None,
                durable: false,
                requests_recovery: false,
                concurrent_execution_disallowed: false,
                persist_job_data_after_execution: false,
                job_data: JobDataMap::new(),
                job,
            },
        }
    }

    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Durable jobs stay registered once their last trigger is gone
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn requests_recovery(&self) -> bool {
        self.requests_recovery
    }

    pub fn is_concurrent_execution_disallowed(&self) -> bool {
        self.concurrent_execution_disallowed
    }

    pub fn is_persist_job_data_after_execution(&self) -> bool {
        self.persist_job_data_after_execution
    }

    pub fn job_data(&self) -> &JobDataMap {
        &self.job_data
    }

    pub fn job(&self) -> Arc<dyn Job> {
        Arc::clone(&self.job)
    }

    pub(crate) fn set_job_data(&mut self, job_data: JobDataMap) {
        self.job_data = job_data;
    }
}

impl fmt::Debug for JobDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDetail")
            .field("key", &self.key)
            .field("description", &self.description)
            .field("durable", &self.durable)
            .field("requests_recovery", &self.requests_recovery)
            .field(
                "concurrent_execution_disallowed",
                &self.concurrent_execution_disallowed,
            )
            .field(
                "persist_job_data_after_execution",
                &self.persist_job_data_after_execution,
            )
            .field("job_data", &self.job_data)
            .finish_non_exhaustive()
    }
}

pub struct JobDetailBuilder {
    detail: JobDetail,
}

impl JobDetailBuilder {
    pub fn description(mut self, description: Option<String>) -> Self {
        self.detail.description = description;
        self
    }

    pub fn store_durably(mut self, durable: bool) -> Self {
        self.detail.durable = durable;
        self
    }

    pub fn request_recovery(mut self, recovery: bool) -> Self {
        self.detail.requests_recovery = recovery;
        self
    }

    pub fn disallow_concurrent_execution(mut self, disallow: bool) -> Self {
        self.detail.concurrent_execution_disallowed = disallow;
        self
    }

    pub fn persist_job_data_after_execution(mut self, persist: bool) -> Self {
        self.detail.persist_job_data_after_execution = persist;
        self
    }

    pub fn using_job_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.detail.job_data.insert(key.into(), value);
        self
    }

    pub fn build(self) -> JobDetail {
        self.detail
    }
}

/// Per-fire metadata handed to a job and, optionally, to the scheduled method
pub struct JobExecutionContext {
    scheduler: Arc<dyn Scheduler>,
    job_detail: JobDetail,
    trigger: CronTrigger,
    fire_instance_id: Uuid,
    fire_time: DateTime<Utc>,
    scheduled_fire_time: DateTime<Utc>,
    previous_fire_time: Option<DateTime<Utc>>,
    next_fire_time: Option<DateTime<Utc>>,
    job_data: Mutex<JobDataMap>,
}

impl JobExecutionContext {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        job_detail: JobDetail,
        trigger: CronTrigger,
        scheduled_fire_time: DateTime<Utc>,
        previous_fire_time: Option<DateTime<Utc>>,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> Self {
        let job_data = Mutex::new(job_detail.job_data().clone());
        Self {
            scheduler,
            job_detail,
            trigger,
            fire_instance_id: Uuid::new_v4(),
            fire_time: Utc::now(),
            scheduled_fire_time,
            previous_fire_time,
            next_fire_time,
            job_data,
        }
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn job_detail(&self) -> &JobDetail {
        &self.job_detail
    }

    pub fn trigger(&self) -> &CronTrigger {
        &self.trigger
    }

    pub fn fire_instance_id(&self) -> Uuid {
        self.fire_instance_id
    }

    pub fn fire_time(&self) -> DateTime<Utc> {
        self.fire_time
    }

    pub fn scheduled_fire_time(&self) -> DateTime<Utc> {
        self.scheduled_fire_time
    }

    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    /// Mutable view of this fire's job data; written back only for jobs
    /// that persist their data after execution
    pub async fn job_data(&self) -> tokio::sync::MutexGuard<'_, JobDataMap> {
        self.job_data.lock().await
    }

    pub(crate) async fn job_data_snapshot(&self) -> JobDataMap {
        self.job_data.lock().await.clone()
    }
}

impl fmt::Debug for JobExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobExecutionContext")
            .field("scheduler", &self.scheduler.name())
            .field("job", self.job_detail.key())
            .field("trigger", self.trigger.key())
            .field("fire_instance_id", &self.fire_instance_id)
            .field("scheduled_fire_time", &self.scheduled_fire_time)
            .field("next_fire_time", &self.next_fire_time)
            .finish_non_exhaustive()
    }
}
