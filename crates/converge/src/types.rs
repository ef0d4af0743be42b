//! Core types for provisioning runs

use crate::context::CancelToken;
use crate::resource::ResourceKind;
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Outputs reported by a provider, by output name
pub type Outputs = BTreeMap<String, Value>;

/// Properties with every reference substituted
pub type ResolvedProperties = BTreeMap<String, Value>;

/// Why a resource was never dispatched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A predecessor did not succeed
    DependencyFailed { dependency: String },
    /// The run was cancelled before dispatch
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DependencyFailed { dependency } => write!(f, "dependency '{dependency}' failed"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Category of a resource failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Provider,
    Timeout,
    RetainPolicyViolation,
    MissingOutput,
    State,
}

/// Terminal state of a resource after a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceOutcome {
    Created,
    Updated,
    /// Destroyed and created again because the kind cannot update in place
    Replaced,
    /// Nothing to do
    NoOp,
    Failed { kind: FailureKind, error: String },
    Skipped { reason: SkipReason },
    Destroyed,
    /// Left alive because of a retain policy
    Retained,
    DestroyFailed { error: String },
}

impl ResourceOutcome {
    pub(crate) fn failed(kind: FailureKind, error: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            error: error.into(),
        }
    }

    /// Whether the resource reached its desired state
    pub fn is_success(&self) -> bool {
        !matches!(
            self,
            Self::Failed { .. } | Self::Skipped { .. } | Self::DestroyFailed { .. }
        )
    }

    /// Whether the provider changed something
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Updated | Self::Replaced | Self::Destroyed
        )
    }

    /// Short label for summaries
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Replaced => "replaced",
            Self::NoOp => "unchanged",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
            Self::Destroyed => "destroyed",
            Self::Retained => "retained",
            Self::DestroyFailed { .. } => "destroy failed",
        }
    }

    /// The originating error, if any
    pub fn error(&self) -> Option<String> {
        match self {
            Self::Failed { error, .. } | Self::DestroyFailed { error } => Some(error.clone()),
            Self::Skipped { reason } => Some(reason.to_string()),
            _ => None,
        }
    }
}

/// Final state of one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub name: String,
    pub kind: ResourceKind,
    pub outcome: ResourceOutcome,
    /// Provider identifier after the run, when one exists
    pub provider_id: Option<String>,
}

/// Which direction a run converged in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Apply,
    Destroy,
}

/// Result of an apply or destroy run: one entry per resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub stack: String,
    pub mode: RunMode,
    /// In the order resources reached a terminal state
    pub resources: Vec<ResourceReport>,
}

impl ApplyReport {
    pub fn new(stack: impl Into<String>, mode: RunMode) -> Self {
        Self {
            stack: stack.into(),
            mode,
            resources: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ResourceReport> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn outcome(&self, name: &str) -> Option<&ResourceOutcome> {
        self.get(name).map(|r| &r.outcome)
    }

    /// Position at which a resource finished
    pub fn position(&self, name: &str) -> Option<usize> {
        self.resources.iter().position(|r| r.name == name)
    }

    pub fn summary(&self) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for report in &self.resources {
            summary.add_outcome(&report.outcome);
        }
        summary
    }

    /// True when every resource reached a success state
    pub fn is_success(&self) -> bool {
        self.resources.iter().all(|r| r.outcome.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ResourceReport> {
        self.resources.iter().filter(|r| !r.outcome.is_success())
    }
}

/// Counters over an [`ApplyReport`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub no_change: usize,
    pub failed: usize,
    pub skipped: usize,
    pub destroyed: usize,
    pub retained: usize,
}

impl ApplySummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.destroyed
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    pub fn total(&self) -> usize {
        self.total_changes() + self.no_change + self.failed + self.skipped + self.retained
    }

    pub fn add_outcome(&mut self, outcome: &ResourceOutcome) {
        match outcome {
            ResourceOutcome::Created => self.created += 1,
            ResourceOutcome::Updated => self.updated += 1,
            ResourceOutcome::Replaced => self.replaced += 1,
            ResourceOutcome::NoOp => self.no_change += 1,
            ResourceOutcome::Failed { .. } | ResourceOutcome::DestroyFailed { .. } => {
                self.failed += 1;
            }
            ResourceOutcome::Skipped { .. } => self.skipped += 1,
            ResourceOutcome::Destroyed => self.destroyed += 1,
            ResourceOutcome::Retained => self.retained += 1,
        }
    }
}

/// Options for a run
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Number of parallel workers
    pub jobs: usize,
    /// Upper bound for a single provider call
    pub call_timeout: Duration,
    pub retry: RetryConfig,
    /// Destroy recorded resources that left the desired state
    pub prune_orphans: bool,
    pub cancel: CancelToken,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            call_timeout: Duration::from_secs(300),
            retry: RetryConfig::default(),
            prune_orphans: true,
            cancel: CancelToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcomes: &[(&str, ResourceOutcome)]) -> ApplyReport {
        let mut report = ApplyReport::new("test", RunMode::Apply);
        for (name, outcome) in outcomes {
            report.resources.push(ResourceReport {
                name: (*name).to_string(),
                kind: ResourceKind::Secret,
                outcome: outcome.clone(),
                provider_id: None,
            });
        }
        report
    }

    #[test]
    fn test_summary_counts() {
        let report = report(&[
            ("a", ResourceOutcome::Created),
            ("b", ResourceOutcome::NoOp),
            ("c", ResourceOutcome::Replaced),
            ("d", ResourceOutcome::failed(FailureKind::Provider, "boom")),
            (
                "e",
                ResourceOutcome::Skipped {
                    reason: SkipReason::DependencyFailed {
                        dependency: "d".into(),
                    },
                },
            ),
        ]);
        let summary = report.summary();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.total_changes(), 2);
        assert_eq!(summary.total(), 5);
        assert!(!summary.is_success());
        assert!(!report.is_success());
        assert_eq!(
            report.failures().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            vec!["d", "e"]
        );
        assert_eq!(
            report.outcome("e").and_then(ResourceOutcome::error).as_deref(),
            Some("dependency 'd' failed")
        );
    }

    #[test]
    fn test_retained_counts_as_success() {
        let report = report(&[
            ("a", ResourceOutcome::Destroyed),
            ("b", ResourceOutcome::Retained),
        ]);
        assert!(report.is_success());
        assert_eq!(report.summary().retained, 1);
    }
}
