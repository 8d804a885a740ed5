// Schedule helper: registers the scheduled methods of a component with the engine

use crate::config::PropertySource;
use crate::container::InstanceResolver;
use crate::errors::ScheduleError;
use crate::guard::{GuardedJob, FORCE_KEEP_KEY, REMOVE_ON_ERROR_KEY};
use crate::invoker::InvokerTask;
use crate::scan::{scan, Registration, Scheduled};
use crate::schedule::build_trigger;
use crate::scheduler::{JobDetail, Scheduler, SchedulerFactory};
use crate::telemetry;
use crate::variant::JobVariant;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use std::any::type_name;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

pub struct ScheduleHelper {
    factory: Arc<SchedulerFactory>,
    properties: Arc<dyn PropertySource>,
    resolver: Arc<dyn InstanceResolver>,
    timezone: Tz,
}

impl ScheduleHelper {
    pub fn new(
        factory: Arc<SchedulerFactory>,
        properties: Arc<dyn PropertySource>,
        resolver: Arc<dyn InstanceResolver>,
        timezone: Tz,
    ) -> Self {
        Self {
            factory,
            properties,
            resolver,
            timezone,
        }
    }

    /// Register every scheduled method of a freshly constructed component
    ///
    /// Call once per new instance. Each method succeeds or fails on its own;
    /// already registered jobs are left alone. Returns the number of jobs
    /// newly scheduled.
    #[instrument(skip_all, fields(component = type_name::<T>()))]
    pub async fn schedule_target<T: Scheduled>(&self, target: &Arc<T>) -> usize {
        let registrations = scan(target);
        if registrations.is_empty() {
            return 0;
        }

        let mut scheduled = 0;
        for registration in registrations {
            if self.register(registration).await {
                scheduled += 1;
            }
        }
        scheduled
    }

    async fn register(&self, registration: Registration) -> bool {
        let task = registration.task_name();
        let cron = registration.descriptor.cron.clone();

        match self.try_register(registration).await {
            Ok(first_fire_time) => {
                telemetry::record_registration("scheduled");
                info!(
                    task = %task,
                    cron = %cron,
                    first_fire_time = %first_fire_time,
                    "Scheduled task"
                );
                true
            }
            Err(ScheduleError::Engine(e)) if e.is_already_exists() => {
                telemetry::record_registration("duplicate");
                info!(task = %task, error = %e, "Task already scheduled, skipping");
                false
            }
            Err(e) => {
                telemetry::record_registration("failed");
                error!(task = %task, cron = %cron, error = %e, "Failed to schedule task");
                false
            }
        }
    }

    async fn try_register(&self, registration: Registration) -> Result<DateTime<Utc>, ScheduleError> {
        let Registration {
            declaring_type,
            method,
            descriptor,
            invocable,
        } = registration;

        let trigger = build_trigger(
            &descriptor,
            declaring_type,
            &method,
            self.properties.as_ref(),
            self.timezone,
        )?;

        let variant = JobVariant::select(descriptor.allow_concurrent, descriptor.persistent);
        let task = InvokerTask::new(invocable, Arc::clone(&self.resolver));
        let job = variant
            .apply(JobDetail::builder(
                descriptor.job_key(declaring_type, &method),
                Arc::new(GuardedJob::new(Arc::new(task))),
            ))
            .description(descriptor.job_description.clone())
            .store_durably(descriptor.job_durability)
            .request_recovery(descriptor.job_recovery)
            .using_job_data(REMOVE_ON_ERROR_KEY, Value::Bool(descriptor.remove_on_error))
            .using_job_data(FORCE_KEEP_KEY, Value::Bool(descriptor.force_keep))
            .build();

        debug!(
            job = %job.key(),
            trigger = %trigger.key(),
            priority = trigger.priority(),
            variant = %variant,
            "Created job and trigger"
        );

        let scheduler = self.factory.get_scheduler().await?;
        let first_fire_time = scheduler.schedule_job(job, trigger).await?;
        ensure_started(scheduler.as_ref(), descriptor.scheduler_delay).await?;

        Ok(first_fire_time)
    }
}

/// Start the engine unless a start was already requested
async fn ensure_started(
    scheduler: &dyn Scheduler,
    delay: Option<Duration>,
) -> Result<(), ScheduleError> {
    if scheduler.is_started() {
        return Ok(());
    }

    match delay {
        Some(delay) if !delay.is_zero() => scheduler.start_delayed(delay).await?,
        _ => scheduler.start().await?,
    }
    Ok(())
}
