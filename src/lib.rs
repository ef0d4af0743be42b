//! drydock - the self-hosted media stack on top of the `converge` engine
//!
//! Provides the concrete pieces around the engine: configuration, a
//! file-backed state store, the stack definition itself, dry-run plans and
//! run summaries.

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;
pub mod plan;
pub mod report;
pub mod stack;
pub mod state;

pub use error::{Error, Result};
