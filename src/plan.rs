//! Dry runs against the recorded state
//!
//! A plan runs the real scheduler against a snapshot of the state file with
//! a driver that provisions nothing, so the report shows what an apply or a
//! destroy would do without touching any provider or the file itself.

use converge::{
    ApplyOptions, ApplyReport, CallContext, CreateRequest, Created, DestroyRequest, EngineError,
    Graph, LogProgress, MemoryStateStore, Outputs, ProviderError, ProvisioningDriver,
    ProvisioningRecord, ResourceKind, UpdateRequest,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Placeholder for outputs only a real provider can produce
pub const UNKNOWN: &str = "(known after apply)";

/// Driver that records nothing and answers every call at once
///
/// Created resources report [`UNKNOWN`] outputs. In-place updates keep the
/// outputs recorded before, as a real update keeps the resource identity.
pub struct DryRunDriver {
    recorded: BTreeMap<String, Outputs>,
}

impl DryRunDriver {
    pub fn new(records: &[ProvisioningRecord]) -> Self {
        Self {
            recorded: records
                .iter()
                .map(|r| (r.name.clone(), r.outputs.clone()))
                .collect(),
        }
    }

    fn unknown_outputs(kind: ResourceKind) -> Outputs {
        kind.outputs()
            .iter()
            .map(|output| (output.to_string(), Value::from(UNKNOWN)))
            .collect()
    }
}

impl ProvisioningDriver for DryRunDriver {
    fn create(
        &self,
        request: &CreateRequest,
        _ctx: &CallContext,
    ) -> Result<Created, ProviderError> {
        Ok(Created {
            provider_id: format!("(new {})", request.name),
            outputs: Self::unknown_outputs(request.kind),
        })
    }

    fn update(
        &self,
        request: &UpdateRequest,
        _ctx: &CallContext,
    ) -> Result<Outputs, ProviderError> {
        Ok(self
            .recorded
            .get(&request.name)
            .cloned()
            .unwrap_or_else(|| Self::unknown_outputs(request.kind)))
    }

    fn destroy(&self, _request: &DestroyRequest, _ctx: &CallContext) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// What a plan previews
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    Apply,
    Destroy,
}

/// Preview an apply or destroy of `graph` against `records`
pub fn plan(
    graph: &Graph,
    records: Vec<ProvisioningRecord>,
    options: &ApplyOptions,
    mode: PlanMode,
) -> Result<ApplyReport, EngineError> {
    let driver = Arc::new(DryRunDriver::new(&records));
    let snapshot = MemoryStateStore::with_records(records);
    log::debug!("Planning against {} recorded resources", snapshot.len());

    let mut progress = LogProgress;
    match mode {
        PlanMode::Apply => converge::apply(graph, driver, &snapshot, options, &mut progress),
        PlanMode::Destroy => converge::destroy(graph, driver, &snapshot, options, &mut progress),
    }
}
