// Periodic summary of everything the registry knows about

use common::descriptor::ScheduleDescriptor;
use common::registry::ScheduleRegistry;
use common::scan::{Scheduled, ScheduledMethod};
use common::scheduler::JobExecutionContext;
use std::sync::Arc;
use tracing::info;

/// Configuration key holding the report cron expression
pub const REPORT_SCHEDULE_KEY: &str = "schedule.registry_report";

pub struct RegistryReporter;

impl RegistryReporter {
    async fn report(
        &self,
        context: Option<Arc<JobExecutionContext>>,
        registry: Option<Arc<ScheduleRegistry>>,
    ) -> anyhow::Result<()> {
        let registry =
            registry.ok_or_else(|| anyhow::anyhow!("schedule registry is not available"))?;

        let schedulers = registry.all_schedulers().await;
        let jobs = registry.all_job_details().await;

        info!(
            schedulers = schedulers.len(),
            jobs = jobs.len(),
            next_fire_time = ?context.and_then(|c| c.next_fire_time()),
            "Schedule registry report"
        );
        Ok(())
    }
}

impl Scheduled for RegistryReporter {
    fn scheduled_methods() -> Vec<ScheduledMethod<Self>> {
        vec![ScheduledMethod::new(
            "report",
            ScheduleDescriptor::cron(REPORT_SCHEDULE_KEY)
                .job_description("Log a summary of registered jobs")
                .force_keep(true),
        )
        .invoke2(
            |this: Arc<Self>,
             context: Option<Arc<JobExecutionContext>>,
             registry: Option<Arc<ScheduleRegistry>>| async move {
                this.report(context, registry).await
            },
        )]
    }
}
