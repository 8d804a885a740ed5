// Registry queries across every scheduler bound to the factory

use crate::scheduler::{CronTrigger, GroupMatcher, JobDetail, JobKey, Scheduler, SchedulerFactory};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::error;

/// Read-only view over all live scheduler instances
///
/// A failing instance is logged and skipped; results from the other
/// instances are still returned.
#[derive(Clone)]
pub struct ScheduleRegistry {
    factory: Arc<SchedulerFactory>,
}

impl ScheduleRegistry {
    pub fn new(factory: Arc<SchedulerFactory>) -> Self {
        Self { factory }
    }

    pub async fn all_schedulers(&self) -> Vec<Arc<dyn Scheduler>> {
        self.factory.all_schedulers().await
    }

    pub async fn scheduler_by_name(&self, name: &str) -> Option<Arc<dyn Scheduler>> {
        self.factory.get_scheduler_by_name(name).await
    }

    /// Every job of every scheduler; a key seen twice is reported once
    pub async fn all_job_details(&self) -> Vec<JobDetail> {
        let mut seen = HashSet::new();
        let mut details = Vec::new();

        for scheduler in self.all_schedulers().await {
            let keys = match scheduler.job_keys(&GroupMatcher::AnyGroup).await {
                Ok(keys) => keys,
                Err(e) => {
                    error!(scheduler = %scheduler.name(), error = %e, "Failed to list jobs");
                    continue;
                }
            };

            for key in keys {
                match scheduler.job_detail(&key).await {
                    Ok(Some(detail)) => {
                        if seen.insert(key) {
                            details.push(detail);
                        }
                    }
                    // Removed between listing and lookup
                    Ok(None) => {}
                    Err(e) => {
                        error!(
                            scheduler = %scheduler.name(),
                            job = %key,
                            error = %e,
                            "Failed to load job"
                        );
                    }
                }
            }
        }

        details
    }

    pub async fn triggers_of_job(&self, job_name: &str, job_group: &str) -> Vec<CronTrigger> {
        let key = JobKey::new(job_name, job_group);
        let mut triggers = Vec::new();

        for scheduler in self.all_schedulers().await {
            match scheduler.triggers_of_job(&key).await {
                Ok(found) => triggers.extend(found),
                Err(e) => {
                    error!(
                        scheduler = %scheduler.name(),
                        job = %key,
                        error = %e,
                        "Failed to list triggers"
                    );
                }
            }
        }

        triggers
    }

    /// First scheduler holding the job wins
    pub async fn job_detail(&self, job_name: &str, job_group: &str) -> Option<JobDetail> {
        let key = JobKey::new(job_name, job_group);

        for scheduler in self.all_schedulers().await {
            match scheduler.job_detail(&key).await {
                Ok(Some(detail)) => return Some(detail),
                Ok(None) => {}
                Err(e) => {
                    error!(
                        scheduler = %scheduler.name(),
                        job = %key,
                        error = %e,
                        "Failed to load job"
                    );
                }
            }
        }

        None
    }
}
