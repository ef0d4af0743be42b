//! # Converge
//!
//! An engine that drives a declared set of infrastructure resources to
//! their desired state.
//!
//! A [`Stack`] lists [`ResourceDescriptor`]s whose properties may refer to
//! outputs of other resources (a container's environment naming a
//! database's host, for instance). [`build`] turns the stack into a
//! validated dependency [`Graph`]; [`apply`] walks the graph with bounded
//! parallelism, compares each resource against its last
//! [`ProvisioningRecord`] and calls the [`ProvisioningDriver`] only for
//! what changed. [`destroy`] runs the same graph in reverse.
//!
//! ## Core Concepts
//!
//! - **Value cell**: write-once slot holding one resource output, read by
//!   dependents once the owning resource finished
//! - **Provisioning record**: last known concrete state, kept in a
//!   [`StateStore`] so a later run can resume or detect drift in the
//!   declaration
//! - **Lifecycle policy**: whether teardown may destroy a resource; the
//!   `production` stage retains by default
//!
//! ## Example
//!
//! ```ignore
//! use converge::{ApplyOptions, MemoryStateStore, Property, ResourceDescriptor, Stack,
//!     StackMetadata, apply_simple, build};
//!
//! let password = ResourceDescriptor::secret("dbPass");
//! let db = ResourceDescriptor::container("db")
//!     .with("name", "db")
//!     .with("image", "postgres:14")
//!     .with("envs", Property::list([Property::interpolate([
//!         Property::from("POSTGRES_PASSWORD="),
//!         password.output("value").into(),
//!     ])]));
//!
//! let stack = Stack::new(StackMetadata::new("media", "dev")).with(password).with(db);
//! let graph = build(&stack)?;
//! let report = apply_simple(&graph, driver, &MemoryStateStore::new(), &ApplyOptions::default())?;
//! ```
//!
//! ## Provider Traits
//!
//! - [`ProvisioningDriver`]: creates, updates and destroys real resources
//! - [`StateStore`]: persists provisioning records between runs
//! - [`ProgressCallback`]: receives progress updates

pub mod cell;
pub mod context;
pub mod diff;
pub mod error;
pub mod graph;
pub mod resource;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use cell::{CellTable, ValueCell};
pub use context::{
    CallContext, CancelToken, CreateRequest, Created, DestroyRequest, LogProgress, NoProgress,
    ProgressCallback, ProvisioningDriver, UpdateRequest,
};
pub use error::{EngineError, GraphError, ProviderError, StoreError};
pub use graph::{Graph, build};
pub use resource::{
    CellRef, LifecyclePolicy, PRODUCTION_STAGE, Property, ResourceDescriptor, ResourceKind, Stack,
    StackMetadata,
};
pub use retry::RetryConfig;
pub use scheduler::{apply, apply_simple, destroy, destroy_simple};
pub use state::{MemoryStateStore, ProvisioningRecord, StateStore};
pub use types::{
    ApplyOptions, ApplyReport, ApplySummary, FailureKind, Outputs, ResolvedProperties,
    ResourceOutcome, ResourceReport, RunMode, SkipReason,
};
