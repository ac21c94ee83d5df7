//! stride-core library: study-day bucketing, anchored windows, rule
//! evaluation, the snapshot store, and the aggregation run.
//!
//! # Conventions
//!
//! - **Errors**: typed errors (`thiserror`) at module seams, `anyhow::Result`
//!   with context at orchestration level.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`).

pub mod config;
pub mod day;
pub mod error;
pub mod requirements;
pub mod rules;
pub mod run;
pub mod source;
pub mod store;
pub mod window;
