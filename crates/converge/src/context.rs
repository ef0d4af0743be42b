//! Provider traits and call context
//!
//! These traits let the engine drive real infrastructure without
//! depending on a specific provider API (Docker, Tailscale, ...).

use crate::error::ProviderError;
use crate::resource::ResourceKind;
use crate::types::{Outputs, ResolvedProperties, ResourceOutcome};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Shared cancellation flag
///
/// Used both for a whole run (stop dispatching new work) and for a
/// single provider call (abort after a timeout).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Context handed to every provider call
#[derive(Debug, Clone)]
pub struct CallContext {
    /// How long the engine waits for this call
    pub timeout: Duration,
    /// Set when the run is cancelled
    pub run: CancelToken,
    /// Set when the engine stopped waiting for this call
    pub abort: CancelToken,
    /// 0-indexed attempt number
    pub attempt: u32,
}

impl CallContext {
    /// Whether the driver should stop what it is doing
    pub fn should_abort(&self) -> bool {
        self.run.is_cancelled() || self.abort.is_cancelled()
    }
}

/// Request to create a resource
#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// Logical name; drivers use it to keep create idempotent
    pub name: String,
    pub kind: ResourceKind,
    pub properties: ResolvedProperties,
}

/// Request to change a resource in place
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub name: String,
    pub kind: ResourceKind,
    pub provider_id: String,
    pub properties: ResolvedProperties,
}

/// Request to destroy a resource
#[derive(Debug, Clone)]
pub struct DestroyRequest {
    pub name: String,
    pub kind: ResourceKind,
    pub provider_id: String,
}

/// What a provider returns after creating a resource
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    pub provider_id: String,
    pub outputs: Outputs,
}

/// Client for the provider API that owns the real resources
///
/// Every call must be safe to repeat for the same logical resource: the
/// engine retries transient failures and timeouts.
pub trait ProvisioningDriver: Send + Sync {
    fn create(&self, request: &CreateRequest, ctx: &CallContext) -> Result<Created, ProviderError>;

    fn update(&self, request: &UpdateRequest, ctx: &CallContext) -> Result<Outputs, ProviderError>;

    fn destroy(&self, request: &DestroyRequest, ctx: &CallContext) -> Result<(), ProviderError>;
}

/// Progress callback for runs
///
/// Called from the coordinating thread only.
pub trait ProgressCallback: Send {
    /// Called once before the first dispatch
    fn on_run_start(&mut self, total: usize);

    /// Called when a resource is handed to a worker
    fn on_resource_start(&mut self, name: &str, kind: ResourceKind);

    /// Called when a resource reaches a terminal state
    fn on_resource_complete(&mut self, name: &str, outcome: &ResourceOutcome);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_resource_start(&mut self, _name: &str, _kind: ResourceKind) {}
    fn on_resource_complete(&mut self, _name: &str, _outcome: &ResourceOutcome) {}
}

/// Progress callback that writes to the `log` facade
pub struct LogProgress;

impl ProgressCallback for LogProgress {
    fn on_run_start(&mut self, total: usize) {
        log::info!("Reconciling {total} resources");
    }

    fn on_resource_start(&mut self, name: &str, kind: ResourceKind) {
        log::info!("→ {kind} {name}");
    }

    fn on_resource_complete(&mut self, name: &str, outcome: &ResourceOutcome) {
        match outcome.error() {
            Some(error) if !outcome.is_success() => {
                log::warn!("✗ {name}: {} ({error})", outcome.label());
            }
            _ => log::info!("✓ {name}: {}", outcome.label()),
        }
    }
}
