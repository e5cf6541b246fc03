//! lorekeep-core library.
//!
//! Durable state of the lore pipeline: the storage abstraction, the record
//! model, the run gate, the work queues, the changelog and the entry scanner.
//!
//! # Conventions
//!
//! - **Errors**: Domain operations return [`LoreError`]; loaders that read
//!   files use `anyhow::Result` with context.
//! - **Storage**: Reads never fail (defaults on absence or corruption);
//!   writes report `false` and log at `error`.
//! - **Time**: Every operation that stamps a record takes `now` explicitly.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod changelog;
pub mod citations;
pub mod config;
pub mod discovery_queue;
pub mod error;
pub mod ids;
pub mod lock;
pub mod lore;
pub mod model;
pub mod pending;
pub mod research;
pub mod review_queue;
pub mod scanner;
pub mod state;
pub mod storage;

pub use error::{ErrorCode, LoreError};
