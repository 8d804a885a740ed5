// Scheduler engine implementation

use super::job::{GroupMatcher, JobDetail, JobExecutionContext, JobKey};
use super::trigger::{CronTrigger, MisfireInstruction, TriggerKey};
use super::Scheduler;
use crate::config::EngineProperties;
use crate::errors::EngineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, instrument, warn};

/// Longest sleep of the dispatch loop when nothing is due
const IDLE_WAIT: Duration = Duration::from_secs(30);

struct JobEntry {
    detail: JobDetail,
    /// Fires of this job currently executing
    running: usize,
}

impl JobEntry {
    fn is_blocked(&self) -> bool {
        self.detail.is_concurrent_execution_disallowed() && self.running > 0
    }
}

#[derive(Default)]
struct Store {
    jobs: HashMap<JobKey, JobEntry>,
    triggers: HashMap<TriggerKey, CronTrigger>,
}

impl Store {
    fn is_blocked(&self, trigger: &CronTrigger) -> bool {
        self.jobs
            .get(trigger.job_key())
            .is_some_and(JobEntry::is_blocked)
    }
}

/// A fire selected by the dispatch loop, waiting for a worker
struct Fire {
    detail: JobDetail,
    trigger: CronTrigger,
    scheduled_fire_time: DateTime<Utc>,
    previous_fire_time: Option<DateTime<Utc>>,
}

struct Inner {
    name: String,
    properties: EngineProperties,
    store: Mutex<Store>,
    workers: Arc<Semaphore>,
    start_requested: AtomicBool,
    running: AtomicBool,
    shutdown: AtomicBool,
    wakeup: Notify,
    shutdown_tx: broadcast::Sender<()>,
}

/// Cron scheduler running inside the current tokio runtime
///
/// A single dispatch loop selects due triggers and hands each fire to a
/// worker pool of `thread_count` permits. Clones share the same instance.
#[derive(Clone)]
pub struct LocalScheduler {
    inner: Arc<Inner>,
}

impl LocalScheduler {
    /// Create a stopped scheduler instance
    pub fn new(properties: EngineProperties) -> Result<Self, EngineError> {
        if properties.thread_count == 0 {
            return Err(EngineError::Configuration(
                "thread_count must be greater than 0".to_string(),
            ));
        }
        if properties.instance_name.trim().is_empty() {
            return Err(EngineError::Configuration(
                "instance_name cannot be empty".to_string(),
            ));
        }

        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

        Ok(Self {
            inner: Arc::new(Inner {
                name: properties.instance_name.clone(),
                workers: Arc::new(Semaphore::new(properties.thread_count)),
                properties,
                store: Mutex::new(Store::default()),
                start_requested: AtomicBool::new(false),
                running: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                wakeup: Notify::new(),
                shutdown_tx,
            }),
        })
    }

    pub fn properties(&self) -> &EngineProperties {
        &self.inner.properties
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(EngineError::Shutdown(self.inner.name.clone()));
        }
        Ok(())
    }

    /// Spawn the dispatch loop unless it is already running
    fn launch(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(
            scheduler = %self.inner.name,
            thread_count = self.inner.properties.thread_count,
            "Scheduler started"
        );

        let this = self.clone();
        tokio::spawn(async move { this.run().await });
    }

    async fn run(self) {
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();

        loop {
            if self.inner.shutdown.load(Ordering::SeqCst) {
                break;
            }

            for fire in self.acquire_due_fires(Utc::now()).await {
                let permit = tokio::select! {
                    permit = Arc::clone(&self.inner.workers).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                    _ = shutdown_rx.recv() => {
                        info!(scheduler = %self.inner.name, "Dispatch loop stopped");
                        return;
                    }
                };
                self.dispatch(fire, permit);
            }

            let wait = self.time_until_next_fire().await;
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.inner.wakeup.notified() => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        info!(scheduler = %self.inner.name, "Dispatch loop stopped");
    }

    /// Select every trigger due at `now`, advance it and apply misfire handling
    ///
    /// Due triggers are taken in fire-time order, higher priority first on ties.
    async fn acquire_due_fires(&self, now: DateTime<Utc>) -> Vec<Fire> {
        let threshold = self.inner.properties.misfire_threshold();

        let mut store = self.inner.store.lock().await;
        let Store { jobs, triggers } = &mut *store;

        let mut due: Vec<(DateTime<Utc>, i32, TriggerKey)> = triggers
            .values()
            .filter_map(|t| {
                t.next_fire_time
                    .filter(|next| *next <= now)
                    .map(|next| (next, t.priority(), t.key().clone()))
            })
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        let mut fires = Vec::new();
        let mut completed = Vec::new();

        for (scheduled, _, trigger_key) in due {
            let Some(trigger) = triggers.get_mut(&trigger_key) else {
                continue;
            };
            let Some(entry) = jobs.get_mut(trigger.job_key()) else {
                continue;
            };
            if entry.is_blocked() {
                continue;
            }

            let should_fire = if now - scheduled > threshold {
                match trigger.misfire_instruction() {
                    MisfireInstruction::DoNothing => {
                        trigger.next_fire_time = trigger.fire_time_after(now);
                        false
                    }
                    MisfireInstruction::FireAndProceed => {
                        trigger.next_fire_time = trigger.fire_time_after(now);
                        true
                    }
                    MisfireInstruction::IgnoreMisfires => {
                        trigger.next_fire_time = trigger.fire_time_after(scheduled);
                        true
                    }
                }
            } else {
                trigger.next_fire_time = trigger.fire_time_after(scheduled);
                true
            };

            if should_fire {
                let previous_fire_time = trigger.previous_fire_time.replace(scheduled);
                entry.running += 1;
                fires.push(Fire {
                    detail: entry.detail.clone(),
                    trigger: trigger.clone(),
                    scheduled_fire_time: scheduled,
                    previous_fire_time,
                });
            } else {
                warn!(
                    scheduler = %self.inner.name,
                    trigger = %trigger_key,
                    scheduled_fire_time = %scheduled,
                    "Trigger misfired, skipping to next fire time"
                );
            }

            if trigger.next_fire_time.is_none() {
                completed.push(trigger_key);
            }
        }

        for trigger_key in completed {
            let Some(trigger) = triggers.remove(&trigger_key) else {
                continue;
            };
            info!(scheduler = %self.inner.name, trigger = %trigger_key, "Trigger completed");

            let job_key = trigger.job_key();
            let orphaned = !triggers.values().any(|t| t.job_key() == job_key);
            if orphaned && jobs.get(job_key).is_some_and(|e| !e.detail.is_durable()) {
                jobs.remove(job_key);
                info!(
                    scheduler = %self.inner.name,
                    job = %job_key,
                    "Removed non-durable job without triggers"
                );
            }
        }

        fires
    }

    async fn time_until_next_fire(&self) -> Duration {
        let store = self.inner.store.lock().await;
        let now = Utc::now();

        store
            .triggers
            .values()
            .filter(|t| !store.is_blocked(t))
            .filter_map(|t| t.next_fire_time)
            .min()
            .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO).min(IDLE_WAIT))
            .unwrap_or(IDLE_WAIT)
    }

    fn dispatch(&self, fire: Fire, permit: OwnedSemaphorePermit) {
        let this = self.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let handle: Arc<dyn Scheduler> = Arc::new(this.clone());
            let next_fire_time = fire.trigger.next_fire_time();
            let context = Arc::new(JobExecutionContext::new(
                handle,
                fire.detail.clone(),
                fire.trigger,
                fire.scheduled_fire_time,
                fire.previous_fire_time,
                next_fire_time,
            ));

            debug!(
                scheduler = %this.inner.name,
                job = %fire.detail.key(),
                fire_instance_id = %context.fire_instance_id(),
                "Firing job"
            );

            let job = fire.detail.job();
            if AssertUnwindSafe(job.execute(Arc::clone(&context)))
                .catch_unwind()
                .await
                .is_err()
            {
                error!(
                    scheduler = %this.inner.name,
                    job = %fire.detail.key(),
                    "Job panicked during execution"
                );
            }

            this.complete_fire(&fire.detail, &context).await;
        });
    }

    async fn complete_fire(&self, detail: &JobDetail, context: &JobExecutionContext) {
        let job_data = if detail.is_persist_job_data_after_execution() {
            Some(context.job_data_snapshot().await)
        } else {
            None
        };

        let mut store = self.inner.store.lock().await;
        if let Some(entry) = store.jobs.get_mut(detail.key()) {
            entry.running = entry.running.saturating_sub(1);
            if let Some(job_data) = job_data {
                entry.detail.set_job_data(job_data);
            }
        }
        drop(store);

        // Blocked triggers of this job may be due now
        self.inner.wakeup.notify_one();
    }
}

#[async_trait]
impl Scheduler for LocalScheduler {
    fn name(&self) -> &str {
        &self.inner.name
    }

    #[instrument(skip(self), fields(scheduler = %self.inner.name))]
    async fn start(&self) -> Result<(), EngineError> {
        self.ensure_running()?;
        self.inner.start_requested.store(true, Ordering::SeqCst);
        self.launch();
        Ok(())
    }

    #[instrument(skip(self), fields(scheduler = %self.inner.name))]
    async fn start_delayed(&self, delay: Duration) -> Result<(), EngineError> {
        self.ensure_running()?;
        if self.inner.start_requested.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(delay_ms = delay.as_millis() as u64, "Scheduler start delayed");

        let this = self.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => this.launch(),
                _ = shutdown_rx.recv() => {}
            }
        });
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.inner.start_requested.load(Ordering::SeqCst)
    }

    fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    #[instrument(skip(self), fields(scheduler = %self.inner.name))]
    async fn shutdown(&self, wait_for_jobs: bool) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Stopping scheduler");
        let _ = self.inner.shutdown_tx.send(());
        self.inner.wakeup.notify_one();

        if wait_for_jobs {
            let permits = u32::try_from(self.inner.properties.thread_count).unwrap_or(u32::MAX);
            if let Ok(all) = self.inner.workers.acquire_many(permits).await {
                drop(all);
            }
        }
        self.inner.workers.close();

        info!("Scheduler stopped");
    }

    #[instrument(
        skip(self, job, trigger),
        fields(scheduler = %self.inner.name, job = %job.key(), trigger = %trigger.key())
    )]
    async fn schedule_job(
        &self,
        job: JobDetail,
        mut trigger: CronTrigger,
    ) -> Result<DateTime<Utc>, EngineError> {
        self.ensure_running()?;

        if trigger.job_key() != job.key() {
            return Err(EngineError::Configuration(format!(
                "trigger {} references job {}, not {}",
                trigger.key(),
                trigger.job_key(),
                job.key()
            )));
        }

        let mut store = self.inner.store.lock().await;
        if store.jobs.contains_key(job.key()) {
            return Err(EngineError::ObjectAlreadyExists {
                kind: "Job",
                key: job.key().to_string(),
            });
        }
        if store.triggers.contains_key(trigger.key()) {
            return Err(EngineError::ObjectAlreadyExists {
                kind: "Trigger",
                key: trigger.key().to_string(),
            });
        }

        let first_fire_time = trigger
            .fire_time_after(Utc::now())
            .ok_or_else(|| EngineError::TriggerWillNeverFire(trigger.key().to_string()))?;
        trigger.next_fire_time = Some(first_fire_time);

        store.jobs.insert(
            job.key().clone(),
            JobEntry {
                detail: job,
                running: 0,
            },
        );
        store.triggers.insert(trigger.key().clone(), trigger);
        drop(store);

        self.inner.wakeup.notify_one();
        debug!(first_fire_time = %first_fire_time, "Job stored");
        Ok(first_fire_time)
    }

    #[instrument(skip(self), fields(scheduler = %self.inner.name, job = %key))]
    async fn delete_job(&self, key: &JobKey) -> Result<bool, EngineError> {
        self.ensure_running()?;

        let mut store = self.inner.store.lock().await;
        let existed = store.jobs.remove(key).is_some();
        store.triggers.retain(|_, t| t.job_key() != key);
        drop(store);

        if existed {
            info!("Job deleted");
        }
        Ok(existed)
    }

    async fn job_keys(&self, matcher: &GroupMatcher) -> Result<Vec<JobKey>, EngineError> {
        self.ensure_running()?;

        let store = self.inner.store.lock().await;
        let mut keys: Vec<JobKey> = store
            .jobs
            .keys()
            .filter(|k| matcher.matches(k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn job_detail(&self, key: &JobKey) -> Result<Option<JobDetail>, EngineError> {
        self.ensure_running()?;

        let store = self.inner.store.lock().await;
        Ok(store.jobs.get(key).map(|e| e.detail.clone()))
    }

    async fn triggers_of_job(&self, key: &JobKey) -> Result<Vec<CronTrigger>, EngineError> {
        self.ensure_running()?;

        let store = self.inner.store.lock().await;
        let mut triggers: Vec<CronTrigger> = store
            .triggers
            .values()
            .filter(|t| t.job_key() == key)
            .cloned()
            .collect();
        triggers.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(triggers)
    }
}
