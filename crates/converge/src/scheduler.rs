//! Scheduler - drives a resource graph to its desired state
//!
//! Resources are dispatched to a bounded rayon pool as soon as everything
//! they wait on is terminal. The calling thread coordinates: it owns the
//! ready queue, resolves properties before dispatch and refills the queue
//! whenever a worker reports back over a channel.

use crate::cell::CellTable;
use crate::context::{
    CallContext, CancelToken, CreateRequest, Created, DestroyRequest, NoProgress,
    ProgressCallback, ProvisioningDriver, UpdateRequest,
};
use crate::diff::{Action, plan_action, properties_hash};
use crate::error::{EngineError, ProviderError};
use crate::graph::Graph;
use crate::resource::{LifecyclePolicy, ResourceKind};
use crate::retry::{PendingCall, Waited, call_with_timeout, with_retry};
use crate::state::{ProvisioningRecord, StateStore};
use crate::types::{
    ApplyOptions, ApplyReport, FailureKind, Outputs, ResolvedProperties, ResourceOutcome,
    ResourceReport, RunMode, SkipReason,
};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};

/// Converge every resource of `graph` to its declared state
///
/// Per-resource failures never abort the run: they are reported, their
/// dependents are skipped and independent resources carry on. Only setup
/// failures (worker pool, reading the store) return an error.
pub fn apply<P: ProgressCallback>(
    graph: &Graph,
    driver: Arc<dyn ProvisioningDriver>,
    store: &dyn StateStore,
    options: &ApplyOptions,
    progress: &mut P,
) -> Result<ApplyReport, EngineError> {
    let records = store.list()?;
    let pool = build_pool(options)?;
    let cells = CellTable::for_graph(graph);
    let env = Env {
        driver,
        store,
        options,
    };

    log::info!(
        "Applying stack '{}' (stage {}, {} resources)",
        graph.metadata().name,
        graph.metadata().stage,
        graph.len()
    );

    let nodes: Vec<DagNode> = graph
        .nodes()
        .map(|node| DagNode {
            name: node.name().to_string(),
            kind: node.descriptor.kind,
            waits_for: node.predecessors.iter().cloned().collect(),
            releases: node.successors.iter().cloned().collect(),
        })
        .collect();

    let mut report = ApplyReport::new(graph.metadata().name.clone(), RunMode::Apply);
    report.resources = run_dag(
        &pool,
        &nodes,
        progress,
        |node, finished| prepare_apply(graph, &cells, options, node, finished),
        |job| env.reconcile(job, &cells),
        |node| ResourceOutcome::Skipped {
            reason: SkipReason::DependencyFailed {
                dependency: node.waits_for.first().cloned().unwrap_or_default(),
            },
        },
    );

    if options.prune_orphans {
        let orphans: Vec<TeardownEntry> = records
            .into_iter()
            .filter(|record| !graph.contains(&record.name))
            .map(TeardownEntry::from_record)
            .collect();
        if !orphans.is_empty() {
            log::info!("Removing {} resources no longer declared", orphans.len());
            report
                .resources
                .extend(teardown(&pool, &env, orphans, progress));
        }
    }

    Ok(report)
}

/// Tear down every resource of `graph`, dependents first
///
/// Resources with a retain policy are reported as retained and keep their
/// record. With `prune_orphans`, recorded resources that are no longer
/// declared are torn down in the same pass.
pub fn destroy<P: ProgressCallback>(
    graph: &Graph,
    driver: Arc<dyn ProvisioningDriver>,
    store: &dyn StateStore,
    options: &ApplyOptions,
    progress: &mut P,
) -> Result<ApplyReport, EngineError> {
    let records = if options.prune_orphans {
        store.list()?
    } else {
        Vec::new()
    };
    let pool = build_pool(options)?;
    let env = Env {
        driver,
        store,
        options,
    };

    log::info!(
        "Destroying stack '{}' (stage {}, {} resources)",
        graph.metadata().name,
        graph.metadata().stage,
        graph.len()
    );

    let mut entries: Vec<TeardownEntry> = graph
        .nodes()
        .map(|node| TeardownEntry {
            name: node.name().to_string(),
            kind: node.descriptor.kind,
            policy: node.policy,
            dependencies: node.predecessors.iter().cloned().collect(),
        })
        .collect();
    entries.extend(
        records
            .into_iter()
            .filter(|record| !graph.contains(&record.name))
            .map(TeardownEntry::from_record),
    );

    let mut report = ApplyReport::new(graph.metadata().name.clone(), RunMode::Destroy);
    report.resources = teardown(&pool, &env, entries, progress);
    Ok(report)
}

/// Apply without progress reporting
pub fn apply_simple(
    graph: &Graph,
    driver: Arc<dyn ProvisioningDriver>,
    store: &dyn StateStore,
    options: &ApplyOptions,
) -> Result<ApplyReport, EngineError> {
    apply(graph, driver, store, options, &mut NoProgress)
}

/// Destroy without progress reporting
pub fn destroy_simple(
    graph: &Graph,
    driver: Arc<dyn ProvisioningDriver>,
    store: &dyn StateStore,
    options: &ApplyOptions,
) -> Result<ApplyReport, EngineError> {
    destroy(graph, driver, store, options, &mut NoProgress)
}

fn build_pool(options: &ApplyOptions) -> Result<ThreadPool, EngineError> {
    Ok(ThreadPoolBuilder::new()
        .num_threads(options.jobs.max(1))
        .thread_name(|i| format!("converge-worker-{i}"))
        .build()?)
}

// ============================================================================
// DAG execution
// ============================================================================

/// A schedulable unit: `waits_for` must be terminal before dispatch,
/// `releases` is notified on completion
struct DagNode {
    name: String,
    kind: ResourceKind,
    waits_for: Vec<String>,
    releases: Vec<String>,
}

/// A worker's (or the coordinator's) verdict on one resource
struct Completion {
    name: String,
    outcome: ResourceOutcome,
    provider_id: Option<String>,
}

impl Completion {
    fn new(name: &str, outcome: ResourceOutcome, provider_id: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            provider_id,
        }
    }
}

enum Prepared<J> {
    Dispatch(J),
    Done(Completion),
}

/// Bookkeeping owned by the coordinating thread
struct Tracker<'n> {
    index: HashMap<&'n str, &'n DagNode>,
    pending: HashMap<&'n str, usize>,
    ready: VecDeque<&'n str>,
    finished: HashMap<String, ResourceOutcome>,
    reports: Vec<ResourceReport>,
}

impl<'n> Tracker<'n> {
    fn new(nodes: &'n [DagNode]) -> Self {
        let index: HashMap<&str, &DagNode> =
            nodes.iter().map(|n| (n.name.as_str(), n)).collect();
        let pending: HashMap<&str, usize> = nodes
            .iter()
            .map(|n| {
                let waiting = n
                    .waits_for
                    .iter()
                    .filter(|w| index.contains_key(w.as_str()))
                    .count();
                (n.name.as_str(), waiting)
            })
            .collect();
        let ready = nodes
            .iter()
            .filter(|n| pending[n.name.as_str()] == 0)
            .map(|n| n.name.as_str())
            .collect();

        Self {
            index,
            pending,
            ready,
            finished: HashMap::new(),
            reports: Vec::with_capacity(nodes.len()),
        }
    }

    /// Record a terminal state and release whatever was waiting on it
    fn settle<P: ProgressCallback>(&mut self, done: Completion, progress: &mut P) {
        let Some(node) = self.index.get(done.name.as_str()).copied() else {
            return;
        };
        progress.on_resource_complete(&done.name, &done.outcome);

        for next in &node.releases {
            if let Some(waiting) = self.pending.get_mut(next.as_str()) {
                *waiting = waiting.saturating_sub(1);
                if *waiting == 0 {
                    self.ready.push_back(next.as_str());
                }
            }
        }

        self.finished.insert(done.name.clone(), done.outcome.clone());
        self.reports.push(ResourceReport {
            name: done.name,
            kind: node.kind,
            outcome: done.outcome,
            provider_id: done.provider_id,
        });
    }
}

/// Run a DAG on the pool
///
/// `prepare` runs on the coordinating thread and either finishes a node
/// directly or produces a job; `work` runs jobs on pool threads.
fn run_dag<J, P, Prep, Work, Stuck>(
    pool: &ThreadPool,
    nodes: &[DagNode],
    progress: &mut P,
    mut prepare: Prep,
    work: Work,
    stuck: Stuck,
) -> Vec<ResourceReport>
where
    J: Send,
    P: ProgressCallback,
    Prep: FnMut(&DagNode, &HashMap<String, ResourceOutcome>) -> Prepared<J>,
    Work: Fn(J) -> Completion + Sync,
    Stuck: Fn(&DagNode) -> ResourceOutcome,
{
    let mut tracker = Tracker::new(nodes);
    let (tx, rx) = mpsc::channel::<Completion>();
    let work = &work;

    progress.on_run_start(nodes.len());

    pool.in_place_scope(|scope| {
        let mut in_flight = 0usize;
        loop {
            while let Some(name) = tracker.ready.pop_front() {
                let node = tracker.index[name];
                match prepare(node, &tracker.finished) {
                    Prepared::Done(done) => tracker.settle(done, progress),
                    Prepared::Dispatch(job) => {
                        progress.on_resource_start(name, node.kind);
                        in_flight += 1;
                        let tx = tx.clone();
                        let name = name.to_string();
                        scope.spawn(move |_| {
                            match panic::catch_unwind(AssertUnwindSafe(|| work(job))) {
                                Ok(done) => {
                                    let _ = tx.send(done);
                                }
                                Err(payload) => {
                                    let outcome = ResourceOutcome::failed(
                                        FailureKind::Provider,
                                        "worker panicked",
                                    );
                                    let _ = tx.send(Completion::new(&name, outcome, None));
                                    panic::resume_unwind(payload);
                                }
                            }
                        });
                    }
                }
            }

            if in_flight == 0 {
                break;
            }
            match rx.recv() {
                Ok(done) => {
                    in_flight -= 1;
                    tracker.settle(done, progress);
                }
                Err(_) => break,
            }
        }
    });

    // only reachable with cyclic recorded dependencies
    for node in nodes {
        if !tracker.finished.contains_key(&node.name) {
            let outcome = stuck(node);
            log::warn!("{} '{}' could not be scheduled", node.kind, node.name);
            tracker.finished.insert(node.name.clone(), outcome.clone());
            tracker.reports.push(ResourceReport {
                name: node.name.clone(),
                kind: node.kind,
                outcome,
                provider_id: None,
            });
        }
    }

    tracker.reports
}

// ============================================================================
// Apply
// ============================================================================

struct ApplyJob {
    name: String,
    kind: ResourceKind,
    policy: LifecyclePolicy,
    properties: ResolvedProperties,
    dependencies: Vec<String>,
}

/// Decide on the coordinating thread whether a resource can be dispatched
fn prepare_apply(
    graph: &Graph,
    cells: &CellTable,
    options: &ApplyOptions,
    node: &DagNode,
    finished: &HashMap<String, ResourceOutcome>,
) -> Prepared<ApplyJob> {
    let skip = |reason: SkipReason| {
        cells.fail_outputs(&node.name, node.kind, &format!("{} skipped: {reason}", node.name));
        Prepared::Done(Completion::new(
            &node.name,
            ResourceOutcome::Skipped { reason },
            None,
        ))
    };

    if options.cancel.is_cancelled() {
        return skip(SkipReason::Cancelled);
    }

    let Some(graph_node) = graph.node(&node.name) else {
        return skip(SkipReason::Cancelled);
    };

    if let Some(failed) = graph_node
        .predecessors
        .iter()
        .find(|pred| finished.get(*pred).is_some_and(|o| !o.is_success()))
    {
        log::debug!("Skipping '{}': dependency '{failed}' did not succeed", node.name);
        return skip(SkipReason::DependencyFailed {
            dependency: failed.clone(),
        });
    }

    match cells.resolve_properties(&graph_node.descriptor.properties) {
        Ok(properties) => Prepared::Dispatch(ApplyJob {
            name: node.name.clone(),
            kind: node.kind,
            policy: graph_node.policy,
            properties,
            dependencies: graph_node.predecessors.iter().cloned().collect(),
        }),
        Err(blocked) => {
            log::debug!(
                "Skipping '{}': {} is unavailable ({})",
                node.name,
                blocked.cell,
                blocked.error
            );
            skip(SkipReason::DependencyFailed {
                dependency: blocked.cell.resource,
            })
        }
    }
}

type Failure = (FailureKind, String);

struct Converged {
    outcome: ResourceOutcome,
    provider_id: String,
    outputs: Outputs,
}

fn provider_failure(error: ProviderError) -> Failure {
    let kind = match error {
        ProviderError::Timeout { .. } => FailureKind::Timeout,
        _ => FailureKind::Provider,
    };
    (kind, error.to_string())
}

fn state_failure(error: impl std::fmt::Display) -> Failure {
    (FailureKind::State, error.to_string())
}

/// Shared, read-only context for workers
struct Env<'a> {
    driver: Arc<dyn ProvisioningDriver>,
    store: &'a dyn StateStore,
    options: &'a ApplyOptions,
}

impl Env<'_> {
    /// Converge one resource and publish its outputs
    fn reconcile(&self, job: ApplyJob, cells: &CellTable) -> Completion {
        match self.converge(&job) {
            Ok(converged) => {
                if let Err(missing) = cells.resolve_outputs(&job.name, job.kind, &converged.outputs)
                {
                    let error = format!(
                        "{} '{}' did not report outputs: {}",
                        job.kind,
                        job.name,
                        missing.join(", ")
                    );
                    log::warn!("{error}");
                    return Completion::new(
                        &job.name,
                        ResourceOutcome::failed(FailureKind::MissingOutput, error),
                        Some(converged.provider_id),
                    );
                }
                Completion::new(&job.name, converged.outcome, Some(converged.provider_id))
            }
            Err((kind, error)) => {
                log::warn!("{} '{}' failed: {error}", job.kind, job.name);
                cells.fail_outputs(&job.name, job.kind, &error);
                Completion::new(&job.name, ResourceOutcome::failed(kind, error), None)
            }
        }
    }

    fn converge(&self, job: &ApplyJob) -> Result<Converged, Failure> {
        let hash = properties_hash(job.kind, &job.properties);
        let record = self.store.get(&job.name).map_err(state_failure)?;
        let action = plan_action(record.as_ref(), job.kind, job.policy, &hash);

        match (action, record) {
            (Action::NoOp, Some(record)) => {
                log::debug!("{} '{}' is up to date", job.kind, job.name);
                if record.policy != job.policy || record.dependencies != job.dependencies {
                    self.store
                        .put(ProvisioningRecord {
                            policy: job.policy,
                            dependencies: job.dependencies.clone(),
                            ..record.clone()
                        })
                        .map_err(state_failure)?;
                }
                Ok(Converged {
                    outcome: ResourceOutcome::NoOp,
                    provider_id: record.provider_id,
                    outputs: record.outputs,
                })
            }
            (Action::Create | Action::NoOp, _) => {
                let created = self.create(job, &hash)?;
                Ok(Converged {
                    outcome: ResourceOutcome::Created,
                    provider_id: created.provider_id,
                    outputs: created.outputs,
                })
            }
            (Action::Update { provider_id }, _) => {
                log::info!("Updating {} '{}' in place", job.kind, job.name);
                let request = UpdateRequest {
                    name: job.name.clone(),
                    kind: job.kind,
                    provider_id: provider_id.clone(),
                    properties: job.properties.clone(),
                };
                let outputs = self
                    .call(&job.name, "update", || None, move |driver, ctx| {
                        driver.update(&request, ctx)
                    })
                    .map_err(provider_failure)?;
                self.persist(job, &hash, &provider_id, &outputs)?;
                Ok(Converged {
                    outcome: ResourceOutcome::Updated,
                    provider_id,
                    outputs,
                })
            }
            (Action::Replace { provider_id }, record) => {
                log::info!("Replacing {} '{}' ({provider_id})", job.kind, job.name);
                let request = DestroyRequest {
                    name: job.name.clone(),
                    kind: record.map_or(job.kind, |r| r.kind),
                    provider_id: provider_id.clone(),
                };
                self.call(&job.name, "destroy", || None, move |driver, ctx| {
                    driver.destroy(&request, ctx)
                })
                .map_err(|e| {
                    let (kind, error) = provider_failure(e);
                    (kind, format!("failed to destroy previous instance: {error}"))
                })?;
                self.forget(job, &provider_id)?;

                let created = self.create(job, &hash)?;
                Ok(Converged {
                    outcome: ResourceOutcome::Replaced,
                    provider_id: created.provider_id,
                    outputs: created.outputs,
                })
            }
            (Action::RetainViolation { provider_id }, _) => Err((
                FailureKind::RetainPolicyViolation,
                format!(
                    "{} '{}' ({provider_id}) must be replaced but its lifecycle policy is retain",
                    job.kind, job.name
                ),
            )),
        }
    }

    fn create(&self, job: &ApplyJob, hash: &str) -> Result<Created, Failure> {
        log::info!("Creating {} '{}'", job.kind, job.name);
        let request = CreateRequest {
            name: job.name.clone(),
            kind: job.kind,
            properties: job.properties.clone(),
        };

        // a record written since the first attempt means the resource exists
        let resume = || {
            self.store
                .get(&job.name)
                .ok()
                .flatten()
                .map(|record| Created {
                    provider_id: record.provider_id,
                    outputs: record.outputs,
                })
        };

        let created = self
            .call(&job.name, "create", resume, move |driver, ctx| {
                driver.create(&request, ctx)
            })
            .map_err(provider_failure)?;
        self.persist(job, hash, &created.provider_id, &created.outputs)?;
        Ok(created)
    }

    fn persist(
        &self,
        job: &ApplyJob,
        hash: &str,
        provider_id: &str,
        outputs: &Outputs,
    ) -> Result<(), Failure> {
        self.store
            .put(ProvisioningRecord {
                name: job.name.clone(),
                kind: job.kind,
                provider_id: provider_id.to_string(),
                properties_hash: hash.to_string(),
                outputs: outputs.clone(),
                policy: job.policy,
                dependencies: job.dependencies.clone(),
            })
            .map_err(|e| {
                state_failure(format!(
                    "{} '{}' exists as {provider_id} but its record could not be saved: {e}",
                    job.kind, job.name
                ))
            })
    }

    /// Drop the record of a destroyed instance, trying the store twice
    fn forget(&self, job: &ApplyJob, provider_id: &str) -> Result<(), Failure> {
        let removed = self.store.remove(&job.name).or_else(|e| {
            log::warn!("Removing the record of '{}' failed: {e}. Retrying", job.name);
            self.store.remove(&job.name)
        });
        removed.map_err(|e| {
            state_failure(format!(
                "previous instance {provider_id} of {} '{}' was destroyed but its record \
                 could not be removed: {e}",
                job.kind, job.name
            ))
        })
    }

    /// Call the driver with timeout and retry
    ///
    /// `resume` is consulted before every retry and short-circuits the
    /// call when it finds the result already in place. A call that timed
    /// out is never overlapped: the next attempt first waits for it, and a
    /// late success is returned instead of calling the driver again.
    fn call<T, F>(
        &self,
        name: &str,
        action: &str,
        mut resume: impl FnMut() -> Option<T>,
        call: F,
    ) -> Result<T, ProviderError>
    where
        T: Send + 'static,
        F: Fn(&dyn ProvisioningDriver, &CallContext) -> Result<T, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        let call = Arc::new(call);
        let timeout = self.options.call_timeout;
        let mut pending: Option<PendingCall<T>> = None;

        let result = with_retry(
            &self.options.retry,
            &self.options.cancel,
            |attempt, error, delay| {
                log::warn!(
                    "{action} '{name}' failed on attempt {attempt}/{}: {error}. Retrying in {:.1}s",
                    self.options.retry.max_attempts,
                    delay.as_secs_f64()
                );
            },
            |attempt| {
                if let Some(running) = pending.take() {
                    match running.wait(timeout) {
                        Waited::Finished(Ok(late)) => {
                            log::info!("{action} '{name}' finished after its timeout");
                            return Ok(late);
                        }
                        Waited::Finished(Err(e)) => {
                            log::debug!("Timed out {action} of '{name}' ended with: {e}");
                        }
                        Waited::Running(running) => {
                            pending = Some(running);
                            return Err(ProviderError::Timeout { after: timeout });
                        }
                    }
                }
                if attempt > 0
                    && let Some(found) = resume()
                {
                    log::info!("'{name}' was recorded meanwhile, not repeating {action}");
                    return Ok(found);
                }
                let ctx = CallContext {
                    timeout,
                    run: self.options.cancel.clone(),
                    abort: CancelToken::new(),
                    attempt,
                };
                let abort = ctx.abort.clone();
                let driver = Arc::clone(&self.driver);
                let call = Arc::clone(&call);
                let waited =
                    call_with_timeout(timeout, &abort, move || (*call)(driver.as_ref(), &ctx));
                match waited {
                    Waited::Finished(result) => result,
                    Waited::Running(running) => {
                        pending = Some(running);
                        Err(ProviderError::Timeout { after: timeout })
                    }
                }
            },
        );

        match (result, pending) {
            (Err(error), Some(running)) => match running.wait(timeout) {
                Waited::Finished(Ok(late)) => {
                    log::info!("{action} '{name}' finished after its last timeout");
                    Ok(late)
                }
                Waited::Finished(Err(_)) => Err(error),
                Waited::Running(_) => {
                    log::warn!("{action} '{name}' is still running and will not be recorded");
                    Err(error)
                }
            },
            (result, _) => result,
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    fn teardown_one(&self, job: TeardownEntry) -> Completion {
        let record = match self.store.get(&job.name) {
            Ok(Some(record)) => record,
            Ok(None) => {
                log::debug!("{} '{}' has no record, nothing to destroy", job.kind, job.name);
                return Completion::new(&job.name, ResourceOutcome::NoOp, None);
            }
            Err(e) => {
                return Completion::new(
                    &job.name,
                    ResourceOutcome::DestroyFailed {
                        error: e.to_string(),
                    },
                    None,
                );
            }
        };

        if job.policy == LifecyclePolicy::Retain {
            log::info!("Retaining {} '{}' ({})", job.kind, job.name, record.provider_id);
            return Completion::new(
                &job.name,
                ResourceOutcome::Retained,
                Some(record.provider_id),
            );
        }

        log::info!("Destroying {} '{}' ({})", record.kind, job.name, record.provider_id);
        let request = DestroyRequest {
            name: job.name.clone(),
            kind: record.kind,
            provider_id: record.provider_id.clone(),
        };
        let destroyed = self.call(&job.name, "destroy", || None, move |driver, ctx| {
            driver.destroy(&request, ctx)
        });

        let outcome = match destroyed {
            Ok(()) => match self.store.remove(&job.name) {
                Ok(()) => ResourceOutcome::Destroyed,
                Err(e) => ResourceOutcome::DestroyFailed {
                    error: format!(
                        "{} was destroyed but its record could not be removed: {e}",
                        record.provider_id
                    ),
                },
            },
            Err(e) => {
                log::warn!("Destroying '{}' failed: {e}", job.name);
                ResourceOutcome::DestroyFailed {
                    error: e.to_string(),
                }
            }
        };
        let provider_id = (!matches!(outcome, ResourceOutcome::Destroyed))
            .then_some(record.provider_id);
        Completion::new(&job.name, outcome, provider_id)
    }
}

/// A resource to tear down, from the graph or from a leftover record
#[derive(Clone)]
struct TeardownEntry {
    name: String,
    kind: ResourceKind,
    policy: LifecyclePolicy,
    dependencies: Vec<String>,
}

impl TeardownEntry {
    fn from_record(record: ProvisioningRecord) -> Self {
        Self {
            name: record.name,
            kind: record.kind,
            policy: record.policy,
            dependencies: record.dependencies,
        }
    }
}

/// Destroy entries so that nothing is destroyed before its dependents
fn teardown<P: ProgressCallback>(
    pool: &ThreadPool,
    env: &Env<'_>,
    entries: Vec<TeardownEntry>,
    progress: &mut P,
) -> Vec<ResourceReport> {
    let names: HashSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    let mut dependents: HashMap<&str, Vec<String>> = HashMap::new();
    for entry in &entries {
        for dep in &entry.dependencies {
            if names.contains(dep.as_str()) {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(entry.name.clone());
            }
        }
    }

    let nodes: Vec<DagNode> = entries
        .iter()
        .rev()
        .map(|entry| DagNode {
            name: entry.name.clone(),
            kind: entry.kind,
            waits_for: dependents
                .get(entry.name.as_str())
                .cloned()
                .unwrap_or_default(),
            releases: entry
                .dependencies
                .iter()
                .filter(|d| names.contains(d.as_str()))
                .cloned()
                .collect(),
        })
        .collect();
    let by_name: HashMap<&str, &TeardownEntry> =
        entries.iter().map(|e| (e.name.as_str(), e)).collect();
    let cancel = &env.options.cancel;

    run_dag(
        pool,
        &nodes,
        progress,
        |node, finished| {
            if cancel.is_cancelled() {
                return Prepared::Done(Completion::new(
                    &node.name,
                    ResourceOutcome::Skipped {
                        reason: SkipReason::Cancelled,
                    },
                    None,
                ));
            }
            let blocking = node.waits_for.iter().find(|dependent| {
                finished.get(*dependent).is_some_and(|outcome| {
                    matches!(
                        outcome,
                        ResourceOutcome::DestroyFailed { .. }
                            | ResourceOutcome::Skipped { .. }
                            | ResourceOutcome::Failed { .. }
                    )
                })
            });
            if let Some(dependent) = blocking {
                return Prepared::Done(Completion::new(
                    &node.name,
                    ResourceOutcome::DestroyFailed {
                        error: format!("dependent '{dependent}' was not destroyed"),
                    },
                    None,
                ));
            }
            match by_name.get(node.name.as_str()) {
                Some(entry) => Prepared::Dispatch((*entry).clone()),
                None => Prepared::Done(Completion::new(&node.name, ResourceOutcome::NoOp, None)),
            }
        },
        |job| env.teardown_one(job),
        |_| ResourceOutcome::DestroyFailed {
            error: "cyclic dependencies between recorded resources".to_string(),
        },
    )
}
