use super::{NodeStore, StoreError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
    time::Duration,
};

#[derive(Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    update_failures: HashMap<String, String>,
    list_failure: Option<String>,
}

/// Nodes held in process, with failure injection for tests.
///
/// Every update bumps the node's resource version; an update carrying an
/// older version is rejected with [`StoreError::Conflict`] like the API
/// server would.
#[derive(Default)]
pub struct MemoryNodeStore {
    state: Mutex<State>,
    update_calls: AtomicUsize,
    update_delay: Option<Duration>,
}

impl MemoryNodeStore {
    pub fn new<I: IntoIterator<Item = Node>>(nodes: I) -> Self {
        let store = Self::default();
        for node in nodes {
            store.insert(node);
        }
        store
    }

    /// Delay every update, e.g. to trip call timeouts.
    pub fn with_update_delay(mut self, delay: Duration) -> Self {
        self.update_delay = Some(delay);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Poisoned only when a caller panicked while holding the lock.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add or overwrite a node, keeping its resource version monotonic.
    pub fn insert(&self, mut node: Node) {
        let name = node.name_any();
        let mut state = self.state();
        let next = state
            .nodes
            .get(&name)
            .map(|n| version_of(n) + 1)
            .unwrap_or(1);
        node.metadata.resource_version = Some(next.to_string());
        state.nodes.insert(name, node);
    }

    /// Make every update of `node_name` fail with `message`.
    pub fn fail_updates(&self, node_name: &str, message: &str) {
        self.state()
            .update_failures
            .insert(node_name.to_string(), message.to_string());
    }

    /// Make `list` fail with `message`.
    pub fn fail_list(&self, message: &str) {
        self.state().list_failure = Some(message.to_string());
    }

    /// Remove all injected failures.
    pub fn heal(&self) {
        let mut state = self.state();
        state.update_failures.clear();
        state.list_failure = None;
    }

    pub fn node(&self, name: &str) -> Option<Node> {
        self.state().nodes.get(name).cloned()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.state().nodes.values().cloned().collect()
    }

    /// Number of update calls received, failed ones included.
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn reset_update_calls(&self) {
        self.update_calls.store(0, Ordering::SeqCst);
    }
}

fn version_of(node: &Node) -> u64 {
    node.metadata
        .resource_version
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn get(&self, name: &str) -> Result<Node, StoreError> {
        self.node(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn list(&self) -> Result<Vec<Node>, StoreError> {
        let state = self.state();
        if let Some(message) = &state.list_failure {
            return Err(StoreError::Other(message.clone()));
        }
        Ok(state.nodes.values().cloned().collect())
    }

    async fn update(&self, node: &Node) -> Result<Node, StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.update_delay {
            tokio::time::sleep(delay).await;
        }

        let name = node.name_any();
        let mut state = self.state();
        if let Some(message) = state.update_failures.get(&name) {
            return Err(StoreError::Other(message.clone()));
        }
        let stored = state
            .nodes
            .get(&name)
            .ok_or_else(|| StoreError::NotFound(name.clone()))?;
        let current = version_of(stored);
        if node.metadata.resource_version.is_some() && version_of(node) != current {
            return Err(StoreError::Conflict(name));
        }

        let mut updated = node.clone();
        updated.metadata.resource_version = Some((current + 1).to_string());
        state.nodes.insert(name, updated.clone());
        Ok(updated)
    }
}
