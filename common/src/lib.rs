// Common library: declarative cron scheduling of component methods

pub mod config;
pub mod container;
pub mod descriptor;
pub mod errors;
pub mod guard;
pub mod helper;
pub mod invoker;
pub mod registry;
pub mod scan;
pub mod schedule;
pub mod scheduler;
pub mod telemetry;
pub mod variant;
