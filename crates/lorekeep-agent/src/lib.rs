//! lorekeep-agent library.
//!
//! The work a pipeline run performs: reading source material, discovering
//! entities, generating and revising entries through the text-generation
//! service, running research tasks, and the driver that strings these
//! together under the run gate.
//!
//! # Conventions
//!
//! - **Errors**: Stages return [`AgentError`]. External-call failures are
//!   [`ExternalError`] and are skipped per item by the driver; anything else
//!   ends the run as `failed`.
//! - **Time**: Stages take `now` explicitly; only the driver reads the clock.
//! - **Blocking**: Everything is synchronous. Waiting goes through
//!   [`RunBudget::sleep`] so cancellation and the run deadline are honoured.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod cancel;
pub mod client;
pub mod context;
pub mod discovery;
pub mod error;
#[cfg(test)]
mod fixtures;
pub mod generate;
pub mod images;
pub mod pipeline;
pub mod research;
pub mod review;
pub mod sources;

pub use cancel::{CancelToken, RunBudget};
pub use client::{AnthropicClient, CompletionRequest, GenerationClient, ScriptedClient};
pub use error::{AgentError, ExternalError};
pub use context::{Stage, Stores};
pub use pipeline::{Pipeline, RunReport, RunSummary, StopReason};
