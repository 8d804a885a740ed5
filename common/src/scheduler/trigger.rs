// Cron trigger model used by the scheduling engine

use super::job::JobKey;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority given to triggers that do not set one
pub const DEFAULT_PRIORITY: i32 = 5;

/// Unique identity of a trigger inside one scheduler
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    pub name: String,
    pub group: String,
}

impl TriggerKey {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// What the engine does with a fire time it could not honour in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MisfireInstruction {
    /// Skip the missed fire and wait for the next regular one
    #[default]
    DoNothing,
    /// Fire once immediately, then continue from now
    FireAndProceed,
    /// Fire every missed time as soon as possible
    IgnoreMisfires,
}

/// Cron-based recurrence rule bound to one job
#[derive(Debug, Clone)]
pub struct CronTrigger {
    key: TriggerKey,
    job_key: JobKey,
    expression: String,
    schedule: CronSchedule,
    timezone: Tz,
    priority: i32,
    start_at: Option<DateTime<Utc>>,
    end_at: Option<DateTime<Utc>>,
    misfire_instruction: MisfireInstruction,
    pub(crate) next_fire_time: Option<DateTime<Utc>>,
    pub(crate) previous_fire_time: Option<DateTime<Utc>>,
}

impl CronTrigger {
    pub fn builder(
        key: TriggerKey,
        job_key: JobKey,
        expression: impl Into<String>,
        schedule: CronSchedule,
    ) -> CronTriggerBuilder {
        CronTriggerBuilder {
            trigger: CronTrigger {
                key,
                job_key,
                expression: expression.into(),
                schedule,
                timezone: Tz::UTC,
                priority: DEFAULT_PRIORITY,
                start_at: None,
                end_at: None,
                misfire_instruction: MisfireInstruction::default(),
                next_fire_time: None,
                previous_fire_time: None,
            },
        }
    }

    pub fn key(&self) -> &TriggerKey {
        &self.key
    }

    pub fn job_key(&self) -> &JobKey {
        &self.job_key
    }

    pub fn cron_expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn start_at(&self) -> Option<DateTime<Utc>> {
        self.start_at
    }

    pub fn end_at(&self) -> Option<DateTime<Utc>> {
        self.end_at
    }

    pub fn misfire_instruction(&self) -> MisfireInstruction {
        self.misfire_instruction
    }

    /// Next fire time as last computed by the owning scheduler
    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    /// First fire time strictly after `after`, honouring the start and end bounds
    pub fn fire_time_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let from = match self.start_at {
            // A fire exactly at the start bound is allowed
            Some(start) if start > after => start - Duration::seconds(1),
            _ => after,
        };

        let next = self
            .schedule
            .after(&from.with_timezone(&self.timezone))
            .next()?
            .with_timezone(&Utc);

        match self.end_at {
            Some(end) if next > end => None,
            _ => Some(next),
        }
    }
}

pub struct CronTriggerBuilder {
    trigger: CronTrigger,
}

impl CronTriggerBuilder {
    pub fn in_timezone(mut self, timezone: Tz) -> Self {
        self.trigger.timezone = timezone;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.trigger.priority = priority;
        self
    }

    pub fn start_at(mut self, start_at: Option<DateTime<Utc>>) -> Self {
        self.trigger.start_at = start_at;
        self
    }

    pub fn end_at(mut self, end_at: Option<DateTime<Utc>>) -> Self {
        self.trigger.end_at = end_at;
        self
    }

    pub fn with_misfire_instruction(mut self, instruction: MisfireInstruction) -> Self {
        self.trigger.misfire_instruction = instruction;
        self
    }

    pub fn build(self) -> CronTrigger {
        self.trigger
    }
}
