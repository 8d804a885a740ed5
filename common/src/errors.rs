// Error handling framework for registration, engine and invocation failures

use thiserror::Error;

/// Errors raised while turning a schedule descriptor into a registration
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid datetime '{value}', expected format '{expected}'")]
    InvalidDatetime { value: String, expected: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Errors reported by the scheduling engine and its factory
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{kind} '{key}' already exists")]
    ObjectAlreadyExists { kind: &'static str, key: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Scheduler '{0}' has been shut down")]
    Shutdown(String),

    #[error("Trigger '{0}' will never fire")]
    TriggerWillNeverFire(String),

    #[error("Invalid engine configuration: {0}")]
    Configuration(String),

    #[error("Scheduler factory has already been initialised")]
    AlreadyInitialized,
}

impl EngineError {
    /// True for duplicate job or trigger keys, which registration tolerates
    pub fn is_already_exists(&self) -> bool {
        matches!(self, EngineError::ObjectAlreadyExists { .. })
    }
}

/// Failures surfaced by a task invocation to the execution guard
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("Target of {0} is no longer reachable")]
    Access(String),

    #[error("Argument {position} of {method} does not match declared type {expected}")]
    IllegalArgument {
        method: String,
        position: usize,
        expected: &'static str,
    },

    #[error("Scheduled method failed: {0:#}")]
    Target(#[source] anyhow::Error),

    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_error_display() {
        let err = ScheduleError::InvalidCronExpression {
            expression: "* * * *".to_string(),
            reason: "invalid format".to_string(),
        };
        assert!(err.to_string().contains("Invalid cron expression"));
    }

    #[test]
    fn test_engine_error_converts_into_schedule_error() {
        let err: ScheduleError = EngineError::Shutdown("main".to_string()).into();
        assert!(matches!(err, ScheduleError::Engine(EngineError::Shutdown(_))));
        assert_eq!(err.to_string(), "Scheduler 'main' has been shut down");
    }

    #[test]
    fn test_already_exists_detection() {
        let dup = EngineError::ObjectAlreadyExists {
            kind: "Job",
            key: "g.n".to_string(),
        };
        assert!(dup.is_already_exists());
        assert!(!EngineError::JobNotFound("g.n".to_string()).is_already_exists());
    }

    #[test]
    fn test_target_error_keeps_source_chain() {
        let err = InvocationError::Target(anyhow::anyhow!("boom").context("while counting"));
        assert!(err.to_string().contains("while counting"));
        assert!(err.to_string().contains("boom"));
    }
}
