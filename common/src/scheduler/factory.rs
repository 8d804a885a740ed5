// Scheduler factory: one lazily created default instance plus a registry of named instances

use super::engine::LocalScheduler;
use super::Scheduler;
use crate::config::EngineProperties;
use crate::errors::EngineError;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, instrument};

static GLOBAL: OnceLock<Arc<SchedulerFactory>> = OnceLock::new();

pub struct SchedulerFactory {
    properties: EngineProperties,
    default: OnceCell<Arc<dyn Scheduler>>,
    instances: RwLock<HashMap<String, Arc<dyn Scheduler>>>,
}

impl SchedulerFactory {
    pub fn new(properties: EngineProperties) -> Self {
        Self {
            properties,
            default: OnceCell::new(),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Install the process-wide factory; fails if one is already installed
    pub fn init_global(properties: EngineProperties) -> Result<(), EngineError> {
        GLOBAL
            .set(Arc::new(Self::new(properties)))
            .map_err(|_| EngineError::AlreadyInitialized)
    }

    /// The factory installed by `init_global`, if any
    pub fn global() -> Option<Arc<Self>> {
        GLOBAL.get().cloned()
    }

    pub fn properties(&self) -> &EngineProperties {
        &self.properties
    }

    /// The default scheduler, created and bound on first use
    ///
    /// Concurrent first callers all receive the same instance.
    pub async fn get_scheduler(&self) -> Result<Arc<dyn Scheduler>, EngineError> {
        self.default
            .get_or_try_init(|| async {
                let scheduler: Arc<dyn Scheduler> =
                    Arc::new(LocalScheduler::new(self.properties.clone())?);
                self.bind(Arc::clone(&scheduler)).await?;
                info!(scheduler = %scheduler.name(), "Created default scheduler");
                Ok::<_, EngineError>(scheduler)
            })
            .await
            .cloned()
    }

    pub async fn get_scheduler_by_name(&self, name: &str) -> Option<Arc<dyn Scheduler>> {
        self.instances.read().await.get(name).cloned()
    }

    /// Register an externally created scheduler under its own name
    #[instrument(skip(self, scheduler), fields(scheduler = %scheduler.name()))]
    pub async fn bind(&self, scheduler: Arc<dyn Scheduler>) -> Result<(), EngineError> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(scheduler.name()) {
            return Err(EngineError::ObjectAlreadyExists {
                kind: "Scheduler",
                key: scheduler.name().to_string(),
            });
        }
        instances.insert(scheduler.name().to_string(), scheduler);
        Ok(())
    }

    /// Every bound scheduler, ordered by name
    pub async fn all_schedulers(&self) -> Vec<Arc<dyn Scheduler>> {
        let instances = self.instances.read().await;
        let mut schedulers: Vec<Arc<dyn Scheduler>> = instances.values().cloned().collect();
        schedulers.sort_by(|a, b| a.name().cmp(b.name()));
        schedulers
    }

    pub async fn shutdown_all(&self, wait_for_jobs: bool) {
        for scheduler in self.all_schedulers().await {
            scheduler.shutdown(wait_for_jobs).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(name: &str) -> EngineProperties {
        EngineProperties {
            instance_name: name.to_string(),
            ..EngineProperties::default()
        }
    }

    #[tokio::test]
    async fn test_default_scheduler_is_created_once() {
        let factory = SchedulerFactory::new(props("Main"));

        let first = factory.get_scheduler().await.unwrap();
        let second = factory.get_scheduler().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "Main");
        assert!(!first.is_started());
    }

    #[tokio::test]
    async fn test_concurrent_first_use_yields_one_instance() {
        let factory = Arc::new(SchedulerFactory::new(props("Main")));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let factory = Arc::clone(&factory);
                tokio::spawn(async move { factory.get_scheduler().await.unwrap() })
            })
            .collect();

        let mut schedulers = Vec::new();
        for handle in handles {
            schedulers.push(handle.await.unwrap());
        }
        assert!(schedulers.iter().all(|s| Arc::ptr_eq(s, &schedulers[0])));
        assert_eq!(factory.all_schedulers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_bind_and_lookup_by_name() {
        let factory = SchedulerFactory::new(props("Main"));
        factory.get_scheduler().await.unwrap();

        let reports: Arc<dyn Scheduler> =
            Arc::new(LocalScheduler::new(props("Reports")).unwrap());
        factory.bind(Arc::clone(&reports)).await.unwrap();

        let found = factory.get_scheduler_by_name("Reports").await.unwrap();
        assert!(Arc::ptr_eq(&found, &reports));
        assert!(factory.get_scheduler_by_name("Missing").await.is_none());

        let names: Vec<String> = factory
            .all_schedulers()
            .await
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["Main", "Reports"]);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let factory = SchedulerFactory::new(props("Main"));
        factory.get_scheduler().await.unwrap();

        let clash: Arc<dyn Scheduler> = Arc::new(LocalScheduler::new(props("Main")).unwrap());
        let err = factory.bind(clash).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_global_factory_initialises_once() {
        SchedulerFactory::init_global(props("Global")).unwrap();
        let installed = SchedulerFactory::global().unwrap();
        assert_eq!(installed.properties().instance_name, "Global");

        let err = SchedulerFactory::init_global(props("Second")).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyInitialized));

        let current = SchedulerFactory::global().unwrap();
        assert!(Arc::ptr_eq(&installed, &current));
        assert_eq!(current.properties().instance_name, "Global");
    }

    #[tokio::test]
    async fn test_shutdown_all() {
        let factory = SchedulerFactory::new(props("Main"));
        let scheduler = factory.get_scheduler().await.unwrap();

        factory.shutdown_all(false).await;
        assert!(scheduler.is_shutdown());
    }
}
