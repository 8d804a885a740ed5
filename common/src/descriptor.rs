// Schedule descriptors attached to component methods, and their default naming

use crate::scheduler::{JobKey, TriggerKey, DEFAULT_PRIORITY};
use std::time::Duration;

/// Prefix of generated job names
pub const JOB_NAME_PREFIX: &str = "J-";
/// Prefix of generated job groups
pub const JOB_GROUP_PREFIX: &str = "JG-";
/// Prefix of generated trigger names
pub const TRIGGER_NAME_PREFIX: &str = "CT-";
/// Prefix of generated trigger groups
pub const TRIGGER_GROUP_PREFIX: &str = "CTG-";

/// Text format of trigger start and end bounds (`yyyyMMddHHmmSS`)
///
/// The trailing `SS` is read as seconds of the minute, never as fractional
/// seconds; `20250101120045` is 12:00:45.
pub const TRIGGER_DATETIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// What to do with a fire time that was missed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MisfirePolicy {
    #[default]
    DoNothing,
    FireAndProceed,
    Ignore,
}

impl MisfirePolicy {
    /// Map a numeric policy code; unknown codes fall back to [`MisfirePolicy::DoNothing`]
    pub fn from_code(code: i32) -> Self {
        match code {
            2 => MisfirePolicy::FireAndProceed,
            3 => MisfirePolicy::Ignore,
            _ => MisfirePolicy::DoNothing,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            MisfirePolicy::DoNothing => 1,
            MisfirePolicy::FireAndProceed => 2,
            MisfirePolicy::Ignore => 3,
        }
    }
}

/// Recurrence rule and execution policy of one scheduled method
///
/// Built once per method with [`ScheduleDescriptor::cron`] and the chained
/// setters, then only read. Empty names count as unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDescriptor {
    /// Cron expression, or a configuration key holding one
    pub cron: String,
    pub job_name: Option<String>,
    pub job_group: Option<String>,
    pub job_description: Option<String>,
    pub job_recovery: bool,
    pub job_durability: bool,
    pub trigger_name: Option<String>,
    pub trigger_group: Option<String>,
    pub trigger_start_at: Option<String>,
    pub trigger_end_at: Option<String>,
    pub trigger_priority: i32,
    /// Delay before the engine starts; `None` starts it immediately
    pub scheduler_delay: Option<Duration>,
    pub misfire_policy: MisfirePolicy,
    pub allow_concurrent: bool,
    pub persistent: bool,
    pub remove_on_error: bool,
    pub force_keep: bool,
}

impl ScheduleDescriptor {
    pub fn cron(cron: impl Into<String>) -> Self {
        Self {
            cron: cron.into(),
            job_name: None,
            job_group: None,
            job_description: None,
            job_recovery: true,
            job_durability: false,
            trigger_name: None,
            trigger_group: None,
            trigger_start_at: None,
            trigger_end_at: None,
            trigger_priority: DEFAULT_PRIORITY,
            scheduler_delay: None,
            misfire_policy: MisfirePolicy::default(),
            allow_concurrent: false,
            persistent: false,
            remove_on_error: true,
            force_keep: false,
        }
    }

    pub fn job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = Some(name.into());
        self
    }

    pub fn job_group(mut self, group: impl Into<String>) -> Self {
        self.job_group = Some(group.into());
        self
    }

    pub fn job_description(mut self, description: impl Into<String>) -> Self {
        self.job_description = Some(description.into());
        self
    }

    pub fn job_recovery(mut self, recovery: bool) -> Self {
        self.job_recovery = recovery;
        self
    }

    pub fn job_durability(mut self, durable: bool) -> Self {
        self.job_durability = durable;
        self
    }

    pub fn trigger_name(mut self, name: impl Into<String>) -> Self {
        self.trigger_name = Some(name.into());
        self
    }

    pub fn trigger_group(mut self, group: impl Into<String>) -> Self {
        self.trigger_group = Some(group.into());
        self
    }

    pub fn trigger_start_at(mut self, start_at: impl Into<String>) -> Self {
        self.trigger_start_at = Some(start_at.into());
        self
    }

    pub fn trigger_end_at(mut self, end_at: impl Into<String>) -> Self {
        self.trigger_end_at = Some(end_at.into());
        self
    }

    pub fn trigger_priority(mut self, priority: i32) -> Self {
        self.trigger_priority = priority;
        self
    }

    pub fn scheduler_delay(mut self, delay: Duration) -> Self {
        self.scheduler_delay = Some(delay);
        self
    }

    pub fn misfire_policy(mut self, policy: MisfirePolicy) -> Self {
        self.misfire_policy = policy;
        self
    }

    pub fn allow_concurrent(mut self, allow: bool) -> Self {
        self.allow_concurrent = allow;
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn remove_on_error(mut self, remove: bool) -> Self {
        self.remove_on_error = remove;
        self
    }

    pub fn force_keep(mut self, keep: bool) -> Self {
        self.force_keep = keep;
        self
    }

    /// Job key for `method` declared on `declaring_type`
    pub fn job_key(&self, declaring_type: &str, method: &str) -> JobKey {
        JobKey::new(
            explicit(&self.job_name).unwrap_or_else(|| default_job_name(method)),
            explicit(&self.job_group).unwrap_or_else(|| default_job_group(declaring_type)),
        )
    }

    pub fn trigger_key(&self, declaring_type: &str, method: &str) -> TriggerKey {
        TriggerKey::new(
            explicit(&self.trigger_name).unwrap_or_else(|| default_trigger_name(method)),
            explicit(&self.trigger_group)
                .unwrap_or_else(|| default_trigger_group(declaring_type)),
        )
    }
}

fn explicit(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn default_job_name(method: &str) -> String {
    format!("{JOB_NAME_PREFIX}{method}")
}

pub fn default_job_group(declaring_type: &str) -> String {
    format!("{JOB_GROUP_PREFIX}{declaring_type}")
}

pub fn default_trigger_name(method: &str) -> String {
    format!("{TRIGGER_NAME_PREFIX}{method}")
}

pub fn default_trigger_group(declaring_type: &str) -> String {
    format!("{TRIGGER_GROUP_PREFIX}{declaring_type}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults() {
        let d = ScheduleDescriptor::cron("0 0 * * * *");
        assert!(d.job_recovery);
        assert!(!d.job_durability);
        assert!(!d.allow_concurrent);
        assert!(!d.persistent);
        assert!(d.remove_on_error);
        assert!(!d.force_keep);
        assert_eq!(d.trigger_priority, DEFAULT_PRIORITY);
        assert_eq!(d.misfire_policy, MisfirePolicy::DoNothing);
        assert!(d.scheduler_delay.is_none());
    }

    #[test]
    fn test_default_keys() {
        let d = ScheduleDescriptor::cron("0 0 * * * *");
        let job = d.job_key("app::Reports", "nightly");
        let trigger = d.trigger_key("app::Reports", "nightly");

        assert_eq!(job, JobKey::new("J-nightly", "JG-app::Reports"));
        assert_eq!(trigger, TriggerKey::new("CT-nightly", "CTG-app::Reports"));
    }

    #[test]
    fn test_explicit_names_win() {
        let d = ScheduleDescriptor::cron("0 0 * * * *")
            .job_name("billing")
            .job_group("finance")
            .trigger_name("billing-trigger")
            .trigger_group("  ");

        assert_eq!(d.job_key("T", "m"), JobKey::new("billing", "finance"));
        // Blank group falls back to the generated one
        assert_eq!(
            d.trigger_key("T", "m"),
            TriggerKey::new("billing-trigger", "CTG-T")
        );
    }

    #[test]
    fn test_misfire_codes() {
        assert_eq!(MisfirePolicy::from_code(1), MisfirePolicy::DoNothing);
        assert_eq!(MisfirePolicy::from_code(2), MisfirePolicy::FireAndProceed);
        assert_eq!(MisfirePolicy::from_code(3), MisfirePolicy::Ignore);
        assert_eq!(MisfirePolicy::from_code(0), MisfirePolicy::DoNothing);
        assert_eq!(MisfirePolicy::from_code(-7), MisfirePolicy::DoNothing);
        assert_eq!(MisfirePolicy::Ignore.code(), 3);
    }
}
