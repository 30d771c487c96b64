//! Node API the reconciler talks to.
//!
//! [`KubeNodeStore`] goes to a real cluster; [`MemoryNodeStore`] keeps nodes
//! in process for tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use std::time::Duration;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

mod cluster;
mod memory;

pub use cluster::KubeNodeStore;
pub use memory::MemoryNodeStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("node '{0}' not found")]
    NotFound(String),
    #[error("node '{0}' was modified concurrently")]
    Conflict(String),
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("call cancelled")]
    Cancelled,
    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Short label for the errors_total metric.
    pub fn reason(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::Conflict(_) => "conflict",
            StoreError::Timeout(_) => "timeout",
            StoreError::Cancelled => "cancelled",
            StoreError::Kube(_) => "api_error",
            StoreError::Other(_) => "other",
        }
    }
}

/// Get/List/Update over cluster nodes.
///
/// `update` replaces the whole object; the node passed in must come from a
/// previous `get` or `list` so its resource version is current.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Node, StoreError>;

    async fn list(&self) -> Result<Vec<Node>, StoreError>;

    async fn update(&self, node: &Node) -> Result<Node, StoreError>;
}
