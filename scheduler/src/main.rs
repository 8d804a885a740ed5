// Scheduler binary entry point

mod reporter;

use anyhow::Context;
use common::config::{load_config, EngineProperties, Settings};
use common::container::Container;
use common::helper::ScheduleHelper;
use common::registry::ScheduleRegistry;
use common::scheduler::SchedulerFactory;
use common::telemetry;
use reporter::RegistryReporter;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = load_config("config").context("Failed to load configuration")?;
    let settings = Settings::from_config(&config).context("Invalid configuration")?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(&settings.observability.log_level)?;
    info!("Starting cronbind scheduler");

    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    let properties = EngineProperties::load(settings.scheduler.properties_file.as_deref())
        .map_err(|e| {
            error!(error = %e, "Failed to load engine properties");
            e
        })?;
    info!(
        instance_name = %properties.instance_name,
        thread_count = properties.thread_count,
        misfire_threshold_ms = properties.misfire_threshold_ms,
        "Engine properties loaded"
    );

    // Must happen before any component registers scheduled methods
    SchedulerFactory::init_global(properties)?;
    let factory = SchedulerFactory::global().context("Scheduler factory is not installed")?;

    let container = Arc::new(Container::new());
    container.insert(Arc::new(ScheduleRegistry::new(Arc::clone(&factory))));

    let helper = ScheduleHelper::new(
        Arc::clone(&factory),
        Arc::new(config),
        container.clone(),
        settings.timezone()?,
    );

    let reporter = Arc::new(RegistryReporter);
    container.insert(Arc::clone(&reporter));
    let scheduled = helper.schedule_target(&reporter).await;
    info!(
        scheduled = scheduled,
        schedule_key = reporter::REPORT_SCHEDULE_KEY,
        "Components registered"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C signal, initiating graceful shutdown");

    factory.shutdown_all(true).await;
    info!("Scheduler stopped");
    Ok(())
}
