// Execution guard: runs a task on every fire and removes jobs that keep failing

use crate::errors::InvocationError;
use crate::invoker::Task;
use crate::scheduler::{Job, JobDataMap, JobExecutionContext};
use crate::telemetry;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Job data key of the remove-on-error flag
pub const REMOVE_ON_ERROR_KEY: &str = "removeOnError";
/// Job data key of the force-keep flag
pub const FORCE_KEEP_KEY: &str = "forceKeep";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Target unreachable
    Access,
    /// Argument list did not match the method
    IllegalArgument,
    /// The method itself returned an error
    Target,
    /// Panic or anything else
    Unexpected,
}

impl FailureKind {
    pub fn of(error: &InvocationError) -> Self {
        match error {
            InvocationError::Access(_) => FailureKind::Access,
            InvocationError::IllegalArgument { .. } => FailureKind::IllegalArgument,
            InvocationError::Target(_) => FailureKind::Target,
            InvocationError::Unexpected(_) => FailureKind::Unexpected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Access => "access",
            FailureKind::IllegalArgument => "illegal_argument",
            FailureKind::Target => "target",
            FailureKind::Unexpected => "unexpected",
        }
    }
}

/// Keep/remove flags stored in a job's data map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalFlags {
    pub remove_on_error: bool,
    pub force_keep: bool,
}

impl Default for RemovalFlags {
    fn default() -> Self {
        Self {
            remove_on_error: true,
            force_keep: false,
        }
    }
}

impl RemovalFlags {
    /// Read the flags; missing or non-boolean entries keep their defaults
    pub fn from_job_data(job_data: &JobDataMap) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            job_data
                .get(key)
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(default)
        };

        Self {
            remove_on_error: flag(REMOVE_ON_ERROR_KEY, defaults.remove_on_error),
            force_keep: flag(FORCE_KEEP_KEY, defaults.force_keep),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    Remove,
}

/// Decide the fate of a job after a failed fire
pub fn decide(kind: FailureKind, flags: RemovalFlags) -> Disposition {
    match kind {
        FailureKind::Access | FailureKind::IllegalArgument => Disposition::Remove,
        FailureKind::Target if flags.force_keep => Disposition::Keep,
        FailureKind::Target if flags.remove_on_error => Disposition::Remove,
        FailureKind::Target => Disposition::Keep,
        FailureKind::Unexpected if flags.force_keep => Disposition::Keep,
        FailureKind::Unexpected => Disposition::Remove,
    }
}

/// Engine job wrapping one task with the failure policy
pub struct GuardedJob {
    task: Arc<dyn Task>,
}

impl GuardedJob {
    pub fn new(task: Arc<dyn Task>) -> Self {
        Self { task }
    }

    async fn run_task(&self, context: Arc<JobExecutionContext>) -> Result<(), InvocationError> {
        match AssertUnwindSafe(self.task.execute(context))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(InvocationError::Unexpected(panic_message(panic.as_ref()))),
        }
    }

    async fn remove_self(&self, context: &JobExecutionContext) {
        let key = context.job_detail().key();

        match context.scheduler().delete_job(key).await {
            Ok(true) => {
                telemetry::record_job_removed(self.task.name());
                info!(task = %self.task.name(), job = %key, "Removed job");
            }
            Ok(false) => {
                debug!(task = %self.task.name(), job = %key, "Job was already removed");
            }
            Err(e) => {
                // Not retried: the next fire gets another chance
                error!(
                    task = %self.task.name(),
                    job = %key,
                    error = %e,
                    "Failed to remove job, you are likely to see this failure again"
                );
            }
        }
    }
}

#[async_trait]
impl Job for GuardedJob {
    async fn execute(&self, context: Arc<JobExecutionContext>) {
        let task = self.task.name();
        let started = Instant::now();
        let outcome = self.run_task(Arc::clone(&context)).await;
        telemetry::record_fire_duration(task, started.elapsed().as_secs_f64());

        let err = match outcome {
            Ok(()) => {
                telemetry::record_fire_success(task);
                debug!(task = %task, fire_instance_id = %context.fire_instance_id(), "Task completed");
                return;
            }
            Err(err) => err,
        };

        let kind = FailureKind::of(&err);
        telemetry::record_fire_failure(task, kind.as_str());
        let flags = RemovalFlags::from_job_data(context.job_detail().job_data());

        match decide(kind, flags) {
            Disposition::Keep => {
                warn!(
                    task = %task,
                    job = %context.job_detail().key(),
                    kind = kind.as_str(),
                    force_keep = flags.force_keep,
                    remove_on_error = flags.remove_on_error,
                    error = %err,
                    "Task failed, keeping job"
                );
            }
            Disposition::Remove => {
                error!(
                    task = %task,
                    job = %context.job_detail().key(),
                    kind = kind.as_str(),
                    error = %err,
                    "Task failed, removing job to avoid repeated errors"
                );
                self.remove_self(&context).await;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineProperties;
    use crate::errors::EngineError;
    use crate::scheduler::{
        CronTrigger, GroupMatcher, JobDetail, JobKey, LocalScheduler, Scheduler, TriggerKey,
    };
    use chrono::{DateTime, Utc};
    use std::str::FromStr;
    use std::time::Duration;

    struct FailingTask {
        error: fn() -> InvocationError,
    }

    #[async_trait]
    impl Task for FailingTask {
        fn name(&self) -> &str {
            "tests::Component.fail"
        }

        async fn execute(&self, _context: Arc<JobExecutionContext>) -> Result<(), InvocationError> {
            Err((self.error)())
        }
    }

    struct PanickingTask;

    #[async_trait]
    impl Task for PanickingTask {
        fn name(&self) -> &str {
            "tests::Component.panic"
        }

        async fn execute(&self, _context: Arc<JobExecutionContext>) -> Result<(), InvocationError> {
            panic!("index out of bounds");
        }
    }

    /// Scheduler whose deletions always fail
    struct StuckScheduler {
        deletes: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Scheduler for StuckScheduler {
        fn name(&self) -> &str {
            "stuck"
        }
        async fn start(&self) -> Result<(), EngineError> {
            Ok(())
        }
        async fn start_delayed(&self, _delay: Duration) -> Result<(), EngineError> {
            Ok(())
        }
        fn is_started(&self) -> bool {
            true
        }
        fn is_shutdown(&self) -> bool {
            false
        }
        async fn shutdown(&self, _wait_for_jobs: bool) {}
        async fn schedule_job(
            &self,
            _job: JobDetail,
            _trigger: CronTrigger,
        ) -> Result<DateTime<Utc>, EngineError> {
            Ok(Utc::now())
        }
        async fn delete_job(&self, key: &JobKey) -> Result<bool, EngineError> {
            self.deletes
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(EngineError::JobNotFound(key.to_string()))
        }
        async fn job_keys(&self, _matcher: &GroupMatcher) -> Result<Vec<JobKey>, EngineError> {
            Ok(vec![])
        }
        async fn job_detail(&self, _key: &JobKey) -> Result<Option<JobDetail>, EngineError> {
            Ok(None)
        }
        async fn triggers_of_job(&self, _key: &JobKey) -> Result<Vec<CronTrigger>, EngineError> {
            Ok(vec![])
        }
    }

    fn target_error() -> InvocationError {
        InvocationError::Target(anyhow::anyhow!("boom"))
    }

    fn access_error() -> InvocationError {
        InvocationError::Access("tests::Component.fail".to_string())
    }

    fn trigger(key: &JobKey) -> CronTrigger {
        CronTrigger::builder(
            TriggerKey::new(&key.name, &key.group),
            key.clone(),
            "0 0 12 * * *",
            cron::Schedule::from_str("0 0 12 * * *").unwrap(),
        )
        .build()
    }

    /// Register a guarded job and fire it once by hand
    async fn fire_once(task: Arc<dyn Task>, flags: RemovalFlags) -> (LocalScheduler, JobKey) {
        let scheduler = LocalScheduler::new(EngineProperties::default()).unwrap();
        let key = JobKey::new("J-fail", "JG-tests::Component");
        let detail = JobDetail::builder(key.clone(), Arc::new(GuardedJob::new(Arc::clone(&task))))
            .using_job_data(REMOVE_ON_ERROR_KEY, serde_json::Value::Bool(flags.remove_on_error))
            .using_job_data(FORCE_KEEP_KEY, serde_json::Value::Bool(flags.force_keep))
            .build();
        scheduler
            .schedule_job(detail.clone(), trigger(&key))
            .await
            .unwrap();

        let handle: Arc<dyn Scheduler> = Arc::new(scheduler.clone());
        let context = Arc::new(JobExecutionContext::new(
            handle,
            detail,
            trigger(&key),
            Utc::now(),
            None,
            None,
        ));
        GuardedJob::new(task).execute(context).await;
        (scheduler, key)
    }

    fn flags(remove_on_error: bool, force_keep: bool) -> RemovalFlags {
        RemovalFlags {
            remove_on_error,
            force_keep,
        }
    }

    #[test]
    fn test_policy_table() {
        use Disposition::*;
        use FailureKind::*;

        for f in [flags(true, true), flags(true, false), flags(false, true), flags(false, false)] {
            assert_eq!(decide(Access, f), Remove);
            assert_eq!(decide(IllegalArgument, f), Remove);
        }

        assert_eq!(decide(Target, flags(true, true)), Keep);
        assert_eq!(decide(Target, flags(true, false)), Remove);
        assert_eq!(decide(Target, flags(false, true)), Keep);
        assert_eq!(decide(Target, flags(false, false)), Keep);

        assert_eq!(decide(Unexpected, flags(true, true)), Keep);
        assert_eq!(decide(Unexpected, flags(false, true)), Keep);
        assert_eq!(decide(Unexpected, flags(true, false)), Remove);
        assert_eq!(decide(Unexpected, flags(false, false)), Remove);
    }

    #[test]
    fn test_flags_from_job_data() {
        let mut data = JobDataMap::new();
        assert_eq!(RemovalFlags::from_job_data(&data), RemovalFlags::default());

        data.insert(FORCE_KEEP_KEY.to_string(), serde_json::Value::Bool(true));
        data.insert(
            REMOVE_ON_ERROR_KEY.to_string(),
            serde_json::Value::String("yes".to_string()),
        );
        assert_eq!(RemovalFlags::from_job_data(&data), flags(true, true));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");
    }

    #[tokio::test]
    async fn test_target_failure_with_remove_on_error_removes_job() {
        let task = Arc::new(FailingTask { error: target_error });
        let (scheduler, key) = fire_once(task, flags(true, false)).await;
        assert!(scheduler.job_detail(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_target_failure_with_force_keep_keeps_job() {
        let task = Arc::new(FailingTask { error: target_error });
        let (scheduler, key) = fire_once(task, flags(true, true)).await;
        assert!(scheduler.job_detail(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_access_failure_ignores_force_keep() {
        let task = Arc::new(FailingTask { error: access_error });
        let (scheduler, key) = fire_once(task, flags(false, true)).await;
        assert!(scheduler.job_detail(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_panic_is_contained_and_removes_job() {
        let (scheduler, key) = fire_once(Arc::new(PanickingTask), flags(false, false)).await;
        assert!(scheduler.job_detail(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_removal_is_not_retried() {
        let stuck = Arc::new(StuckScheduler {
            deletes: std::sync::atomic::AtomicUsize::new(0),
        });
        let key = JobKey::new("J-fail", "JG-tests::Component");
        let task: Arc<dyn Task> = Arc::new(FailingTask { error: target_error });
        let detail = JobDetail::builder(key.clone(), Arc::new(GuardedJob::new(Arc::clone(&task))))
            .build();

        let handle: Arc<dyn Scheduler> = stuck.clone();
        let context = Arc::new(JobExecutionContext::new(
            handle,
            detail,
            trigger(&key),
            Utc::now(),
            None,
            None,
        ));
        GuardedJob::new(task).execute(context).await;

        assert_eq!(stuck.deletes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
