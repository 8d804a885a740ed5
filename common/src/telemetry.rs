// Telemetry module for structured logging and metrics

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging with JSON formatting
///
/// `RUST_LOG` takes precedence over the configured level.
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(
        log_level = log_level,
        "Structured logging initialized with JSON formatting"
    );

    Ok(())
}

/// Initialize Prometheus metrics exporter and describe the scheduling metrics
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "scheduled_fire_success_total",
        "Total number of scheduled method invocations that completed"
    );
    describe_counter!(
        "scheduled_fire_failure_total",
        "Total number of failed scheduled method invocations by failure kind"
    );
    describe_counter!(
        "scheduled_job_removed_total",
        "Total number of jobs removed after a failed invocation"
    );
    describe_counter!(
        "scheduled_registration_total",
        "Total number of scheduled method registrations by outcome"
    );
    describe_histogram!(
        "scheduled_fire_duration_seconds",
        "Duration of scheduled method invocations in seconds"
    );

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_fire_success(task: &str) {
    counter!("scheduled_fire_success_total", "task" => task.to_string()).increment(1);
}

#[inline]
pub fn record_fire_failure(task: &str, kind: &'static str) {
    counter!(
        "scheduled_fire_failure_total",
        "task" => task.to_string(),
        "kind" => kind
    )
    .increment(1);
}

#[inline]
pub fn record_fire_duration(task: &str, duration_seconds: f64) {
    histogram!("scheduled_fire_duration_seconds", "task" => task.to_string())
        .record(duration_seconds);
}

#[inline]
pub fn record_job_removed(task: &str) {
    counter!("scheduled_job_removed_total", "task" => task.to_string()).increment(1);
}

/// `outcome` is one of `scheduled`, `duplicate` or `failed`
#[inline]
pub fn record_registration(outcome: &'static str) {
    counter!("scheduled_registration_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_installs_once() {
        // Only the first initialisation in a process can succeed
        init_logging("info").unwrap();

        let err = init_logging("debug").unwrap_err();
        assert!(err
            .to_string()
            .contains("Failed to initialize tracing subscriber"));
    }

    #[test]
    fn test_metrics_recording() {
        // Recording without an installed exporter must not panic
        record_fire_success("app::Reports.nightly");
        record_fire_failure("app::Reports.nightly", "target");
        record_fire_duration("app::Reports.nightly", 0.25);
        record_job_removed("app::Reports.nightly");
        record_registration("scheduled");
    }
}
