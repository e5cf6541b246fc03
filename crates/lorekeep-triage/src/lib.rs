#![forbid(unsafe_code)]
//! lorekeep-triage library.
//!
//! Decides what each pipeline run works on: candidate collection from the
//! scanner and queues, strict-priority planning with per-class quotas, and
//! the compendium health score.
//!
//! # Conventions
//!
//! - **Errors**: planning is infallible; persistence failures are logged.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod schedule;
pub mod score;
pub mod state;

pub use schedule::{Plan, Quotas, Target, WorkClass, WorkItem};
pub use score::HealthStats;
pub use state::{Scheduler, SchedulerState};
