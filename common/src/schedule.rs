// Trigger construction from schedule descriptors
//
// Resolves the cron source (literal or configuration key), parses optional
// start/end bounds and maps the misfire policy onto the engine trigger.

use crate::config::PropertySource;
use crate::descriptor::{MisfirePolicy, ScheduleDescriptor, TRIGGER_DATETIME_FORMAT};
use crate::errors::ScheduleError;
use crate::scheduler::{CronTrigger, MisfireInstruction};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;
use tracing::{debug, warn};

/// Resolve the cron field of a descriptor
///
/// The field is first looked up as a configuration key; when no value exists
/// under that key the field itself is the expression.
pub fn resolve_cron_expression(raw: &str, properties: &dyn PropertySource) -> String {
    match properties.get(raw) {
        Some(value) => {
            debug!(key = raw, expression = %value, "Cron expression resolved from configuration");
            value
        }
        None => raw.to_string(),
    }
}

/// Parse and validate a cron expression (seconds precision)
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    CronSchedule::from_str(expression).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

pub fn misfire_instruction(policy: MisfirePolicy) -> MisfireInstruction {
    match policy {
        MisfirePolicy::DoNothing => MisfireInstruction::DoNothing,
        MisfirePolicy::FireAndProceed => MisfireInstruction::FireAndProceed,
        MisfirePolicy::Ignore => MisfireInstruction::IgnoreMisfires,
    }
}

/// Parse a `yyyyMMddHHmmSS` bound as local time in `timezone`
pub fn parse_trigger_datetime(value: &str, timezone: Tz) -> Result<DateTime<Utc>, ScheduleError> {
    let invalid = || ScheduleError::InvalidDatetime {
        value: value.to_string(),
        expected: "yyyyMMddHHmmSS".to_string(),
    };

    let naive =
        NaiveDateTime::parse_from_str(value.trim(), TRIGGER_DATETIME_FORMAT).map_err(|_| invalid())?;

    // Ambiguous local times (DST fold) take the earlier instant; gaps are invalid
    timezone
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(invalid)
}

/// Optional bound; unparseable text is logged and ignored
fn parse_bound(value: Option<&str>, bound: &'static str, timezone: Tz) -> Option<DateTime<Utc>> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;

    match parse_trigger_datetime(value, timezone) {
        Ok(dt) => Some(dt),
        Err(e) => {
            warn!(bound = bound, error = %e, "Ignoring trigger bound");
            None
        }
    }
}

/// Build the trigger for `method` declared on `declaring_type`
pub fn build_trigger(
    descriptor: &ScheduleDescriptor,
    declaring_type: &str,
    method: &str,
    properties: &dyn PropertySource,
    timezone: Tz,
) -> Result<CronTrigger, ScheduleError> {
    let expression = resolve_cron_expression(&descriptor.cron, properties);
    let schedule = parse_cron_expression(&expression)?;

    let trigger = CronTrigger::builder(
        descriptor.trigger_key(declaring_type, method),
        descriptor.job_key(declaring_type, method),
        expression,
        schedule,
    )
    .in_timezone(timezone)
    .with_priority(descriptor.trigger_priority)
    .start_at(parse_bound(descriptor.trigger_start_at.as_deref(), "start", timezone))
    .end_at(parse_bound(descriptor.trigger_end_at.as_deref(), "end", timezone))
    .with_misfire_instruction(misfire_instruction(descriptor.misfire_policy))
    .build();

    Ok(trigger)
}
