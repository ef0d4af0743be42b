//! Error types for graph construction, provider calls and state storage.
//!
//! Graph errors are fatal before anything is applied. Provider and store
//! errors are local to one resource: the scheduler records them in the
//! report and keeps going with independent resources.

use crate::resource::ResourceKind;
use std::time::Duration;
use thiserror::Error;

/// Errors detected while building the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A dependency cycle; the witness starts and ends with the same resource
    #[error("dependency cycle: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// A reference or explicit dependency names a resource that is not declared
    #[error("resource '{from}' depends on unknown resource '{missing}'")]
    UnknownResource { from: String, missing: String },

    /// A reference names an output the target kind does not produce
    #[error("resource '{from}' references output '{output}' which {kind} '{resource}' does not produce")]
    UnknownOutput {
        from: String,
        resource: String,
        kind: ResourceKind,
        output: String,
    },

    #[error("duplicate resource name '{name}'")]
    DuplicateResource { name: String },

    #[error("invalid resource name '{name}': use letters, digits, '-' and '_', starting with a letter")]
    InvalidName { name: String },

    /// A property is missing or not part of the kind's schema
    #[error("resource '{resource}': {message}")]
    InvalidProperty { resource: String, message: String },
}

/// Errors returned by a provisioning driver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Network or API hiccup, worth retrying
    #[error("transient provider error: {message}")]
    Transient { message: String },

    /// The provider rejected the request
    #[error("provider rejected request: {message}")]
    Permanent { message: String },

    #[error("provisioning call timed out after {}s", .after.as_secs())]
    Timeout { after: Duration },

    #[error("provisioning call cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }
}

/// Errors raised by a state store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state backend error: {0}")]
    Backend(String),

    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failures that prevent a run from starting at all
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to create worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to read state: {0}")]
    Store(#[from] StoreError),
}
