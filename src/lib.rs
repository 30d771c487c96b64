//! Test-support helpers for reconciling node taints and labels in bulk.
//!
//! Nodes are split into workers and control-plane nodes by a fixed set of
//! taint keys. The [`Reconciler`] applies taint and label deltas across the
//! whole set, skipping nodes that are already reconciled and collecting
//! per-node failures instead of stopping at the first one.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts, Registry};
use std::fmt;
use thiserror::Error;

pub mod classify;
pub mod config;
pub mod labels;
pub mod reconciler;
pub mod store;
pub mod taints;

pub use classify::{is_worker, DEFAULT_MASTER_TAINT_KEYS};
pub use config::Config;
pub use reconciler::{BatchReport, Reconciler};
pub use store::{KubeNodeStore, MemoryNodeStore, NodeStore, StoreError};
pub use taints::{parse_taint, TaintConflict, TaintEffect};

lazy_static! {
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();
    pub(crate) static ref NODE_UPDATES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("node_updates_total", "Total number of node updates issued"),
        &["operation"]
    )
    .unwrap();
    pub(crate) static ref NODE_UPDATES_SKIPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "node_updates_skipped_total",
            "Total number of nodes left untouched because they were already reconciled"
        ),
        &["operation"]
    )
    .unwrap();
    pub(crate) static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("errors_total", "Total number of errors"),
        &["kind", "reason"]
    )
    .unwrap();
}

/// Initialize Prometheus metrics
pub fn init_metrics() {
    PROMETHEUS_REGISTRY
        .register(Box::new(NODE_UPDATES_TOTAL.clone()))
        .ok();
    PROMETHEUS_REGISTRY
        .register(Box::new(NODE_UPDATES_SKIPPED_TOTAL.clone()))
        .ok();
    PROMETHEUS_REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .ok();
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    TaintConflict(#[from] TaintConflict),
    #[error("node '{0}' not found")]
    NotFound(String),
    #[error("failed to {action} node '{node}': {source}")]
    Node {
        action: &'static str,
        node: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to list nodes: {0}")]
    List(#[source] StoreError),
    #[error(transparent)]
    Batch(#[from] MultiError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// True when a single-node lookup found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::Node {
                    source: StoreError::NotFound(_),
                    ..
                }
        )
    }

    /// True for the conflicting-taint precondition violation.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::TaintConflict(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One node that could not be reconciled during a batch.
#[derive(Debug)]
pub struct NodeFailure {
    pub node: String,
    pub action: &'static str,
    pub source: StoreError,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to {} node '{}': {}", self.action, self.node, self.source)
    }
}

/// Per-node failures gathered over one batch operation.
///
/// Failures are kept sorted by node name so the rendered message does not
/// depend on the order in which concurrent updates finished.
#[derive(Debug, Default)]
pub struct MultiError {
    failures: Vec<NodeFailure>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, failure: NodeFailure) {
        let at = self
            .failures
            .partition_point(|f| f.node.as_str() <= failure.node.as_str());
        self.failures.insert(at, failure);
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeFailure> {
        self.failures.iter()
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.node.as_str()).collect()
    }

    /// `Ok(())` when nothing failed, otherwise the whole collection as an error.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Batch(self))
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} node(s) failed", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}
