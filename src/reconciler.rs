//! Best-effort bulk taint and label reconciliation.
//!
//! Every batch operation follows the same protocol: fetch the working set,
//! compute each node's new taints or labels, update only the nodes that
//! change, and keep going past failed updates. Failed nodes are reported
//! together in one [`MultiError`] once the whole set has been processed.
//!
//! Taint conflicts are checked for the whole working set before the first
//! update is sent, so a conflicting request leaves every node untouched.

use crate::{
    classify::is_worker,
    init_metrics, labels,
    store::{NodeStore, StoreError},
    taints::{self, TaintConflict},
    Config, Error, MultiError, NodeFailure, Result, ERRORS_TOTAL, NODE_UPDATES_SKIPPED_TOTAL,
    NODE_UPDATES_TOTAL,
};
use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::{Node, Taint};
use kube::ResourceExt;
use serde::Serialize;
use std::{collections::BTreeMap, future::Future};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of a batch that finished without failures.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Nodes an update was sent for
    pub updated: Vec<String>,
    /// Nodes that already matched the request
    pub skipped: Vec<String>,
}

/// Applies taint and label deltas to the nodes of a [`NodeStore`].
pub struct Reconciler<S> {
    store: S,
    config: Config,
    cancel: CancellationToken,
}

fn node_taints(node: &Node) -> &[Taint] {
    node.spec
        .as_ref()
        .and_then(|spec| spec.taints.as_deref())
        .unwrap_or_default()
}

fn with_taints(node: &Node, taints: Vec<Taint>) -> Node {
    let mut node = node.clone();
    let spec = node.spec.get_or_insert_with(Default::default);
    spec.taints = if taints.is_empty() { None } else { Some(taints) };
    node
}

fn with_labels(node: &Node, labels: BTreeMap<String, String>) -> Node {
    let mut node = node.clone();
    node.metadata.labels = Some(labels);
    node
}

impl<S: NodeStore> Reconciler<S> {
    pub fn new(store: S, config: Config) -> Self {
        init_metrics();
        Self {
            store,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort outstanding remote calls once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one remote call under the configured timeout and the cancellation token.
    async fn call<T>(&self, fut: impl Future<Output = Result<T, StoreError>>) -> Result<T, StoreError> {
        let timeout = self.config.call_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StoreError::Cancelled),
            res = tokio::time::timeout(timeout, fut) => match res {
                Ok(res) => res,
                Err(_) => Err(StoreError::Timeout(timeout)),
            },
        }
    }

    /// Fetch a single node.
    pub async fn get(&self, name: &str) -> Result<Node> {
        self.call(self.store.get(name)).await.map_err(|e| match e {
            StoreError::NotFound(name) => Error::NotFound(name),
            source => Error::Node {
                action: "get",
                node: name.to_string(),
                source,
            },
        })
    }

    /// All nodes.
    pub async fn list(&self) -> Result<Vec<Node>> {
        self.call(self.store.list()).await.map_err(|e| {
            ERRORS_TOTAL.with_label_values(&["list", e.reason()]).inc();
            Error::List(e)
        })
    }

    /// Nodes without any master taint.
    pub async fn list_workers(&self) -> Result<Vec<Node>> {
        let master_keys = &self.config.master_taint_keys;
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|node| is_worker(node, master_keys))
            .collect())
    }

    /// Merge `labels` into one node. No update is sent if it already has them.
    pub async fn label(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<Node> {
        let node = self.get(name).await?;
        let merged = labels::merge(node.labels(), labels);
        if &merged == node.labels() {
            debug!("Node '{}' already carries the requested labels", name);
            NODE_UPDATES_SKIPPED_TOTAL.with_label_values(&["label"]).inc();
            return Ok(node);
        }

        let updated = self
            .call(self.store.update(&with_labels(&node, merged)))
            .await
            .map_err(|source| {
                ERRORS_TOTAL.with_label_values(&["update", source.reason()]).inc();
                Error::Node {
                    action: "label",
                    node: name.to_string(),
                    source,
                }
            })?;
        NODE_UPDATES_TOTAL.with_label_values(&["label"]).inc();
        info!("Labeled node '{}'", name);
        Ok(updated)
    }

    /// Add `taints` to every worker node.
    pub async fn taint_workers(&self, taints: &[Taint]) -> Result<BatchReport> {
        let nodes = self.list_workers().await?;
        self.apply("taint", nodes, |node| {
            let current = node_taints(node);
            let merged = taints::union(current, taints)?;
            Ok((merged.len() != current.len()).then(|| with_taints(node, merged)))
        })
        .await
    }

    /// Remove `taints` from every node carrying them.
    pub async fn untaint_all(&self, taints: &[Taint]) -> Result<BatchReport> {
        let nodes = self.list().await?;
        self.apply("untaint", nodes, |node| {
            let current = node_taints(node);
            let remaining = taints::difference(current, taints)?;
            Ok((remaining.len() != current.len()).then(|| with_taints(node, remaining)))
        })
        .await
    }

    /// Merge `labels` into every worker node.
    pub async fn label_workers(&self, labels: &BTreeMap<String, String>) -> Result<BatchReport> {
        let nodes = self.list_workers().await?;
        self.apply("label", nodes, |node| {
            let merged = labels::merge(node.labels(), labels);
            Ok((&merged != node.labels()).then(|| with_labels(node, merged)))
        })
        .await
    }

    /// Remove the label `keys` from every node.
    pub async fn unlabel_all<K: AsRef<str>>(&self, keys: &[K]) -> Result<BatchReport> {
        let nodes = self.list().await?;
        self.apply("unlabel", nodes, |node| {
            let remaining = labels::remove_keys(node.labels(), keys);
            Ok((remaining.len() != node.labels().len()).then(|| with_labels(node, remaining)))
        })
        .await
    }

    /// Plan every node with `plan`, then send the changed ones to the store.
    ///
    /// `plan` returns `None` for nodes that need no update.
    async fn apply<F>(&self, operation: &'static str, nodes: Vec<Node>, plan: F) -> Result<BatchReport>
    where
        F: Fn(&Node) -> Result<Option<Node>, TaintConflict>,
    {
        info!("{}: reconciling {} nodes", operation, nodes.len());

        let mut report = BatchReport::default();
        let mut updates = Vec::new();
        for node in &nodes {
            let name = node.name_any();
            match plan(node) {
                Ok(Some(updated)) => updates.push((name, updated)),
                Ok(None) => {
                    debug!("{}: node '{}' already reconciled", operation, name);
                    NODE_UPDATES_SKIPPED_TOTAL
                        .with_label_values(&[operation])
                        .inc();
                    report.skipped.push(name);
                }
                Err(conflict) => {
                    let conflict = conflict.on_node(&name);
                    error!("{}: {}", operation, conflict);
                    ERRORS_TOTAL
                        .with_label_values(&["taint", "conflict"])
                        .inc();
                    return Err(conflict.into());
                }
            }
        }

        let results: Vec<(String, Result<Node, StoreError>)> = stream::iter(updates)
            .map(|(name, node)| async move {
                let res = self.call(self.store.update(&node)).await;
                (name, res)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut failures = MultiError::new();
        for (name, res) in results {
            match res {
                Ok(_) => {
                    NODE_UPDATES_TOTAL.with_label_values(&[operation]).inc();
                    report.updated.push(name);
                }
                Err(source) => {
                    warn!("{}: failed to update node '{}': {}", operation, name, source);
                    ERRORS_TOTAL
                        .with_label_values(&["update", source.reason()])
                        .inc();
                    failures.push(NodeFailure {
                        node: name,
                        action: "update",
                        source,
                    });
                }
            }
        }

        report.updated.sort();
        report.skipped.sort();
        info!(
            "{}: {} updated, {} already reconciled, {} failed",
            operation,
            report.updated.len(),
            report.skipped.len(),
            failures.len()
        );
        failures.into_result()?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{store::MockNodeStore, TaintEffect};
    use k8s_openapi::{api::core::v1::NodeSpec, apimachinery::pkg::apis::meta::v1::ObjectMeta};

    const CONTROL_PLANE: &str = "node-role.kubernetes.io/control-plane";

    fn node(name: &str, taints: Vec<Taint>, labels: &[(&str, &str)]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                taints: Some(taints),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn listing(mock: &mut MockNodeStore, nodes: Vec<Node>) {
        mock.expect_list()
            .times(1)
            .returning(move || Ok(nodes.clone()));
    }

    fn gpu() -> Taint {
        TaintEffect::NoSchedule.taint("gpu", Some("true"))
    }

    #[tokio::test]
    async fn taint_workers_updates_only_untainted_workers() {
        let mut mock = MockNodeStore::new();
        listing(
            &mut mock,
            vec![
                node("n1", vec![], &[]),
                node("n2", vec![TaintEffect::NoSchedule.taint(CONTROL_PLANE, None)], &[]),
                node("n3", vec![gpu()], &[]),
            ],
        );
        mock.expect_update()
            .withf(|node| node.name_any() == "n1" && node_taints(node) == [gpu()])
            .times(1)
            .returning(|node| Ok(node.clone()));

        let reconciler = Reconciler::new(mock, Config::default());
        let report = reconciler.taint_workers(&[gpu()]).await.unwrap();
        assert_eq!(report.updated, vec!["n1"]);
        assert_eq!(report.skipped, vec!["n3"]);
    }

    #[tokio::test]
    async fn conflict_stops_before_any_update() {
        let mut mock = MockNodeStore::new();
        listing(
            &mut mock,
            vec![
                node("n1", vec![], &[]),
                node("n2", vec![TaintEffect::NoSchedule.taint("gpu", Some("false"))], &[]),
            ],
        );
        mock.expect_update().times(0);

        let reconciler = Reconciler::new(mock, Config::default());
        let err = reconciler.taint_workers(&[gpu()]).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("'n2'"));
    }

    #[tokio::test]
    async fn update_failures_are_aggregated() {
        let mut mock = MockNodeStore::new();
        listing(
            &mut mock,
            vec![
                node("n1", vec![gpu()], &[]),
                node("n2", vec![gpu()], &[]),
                node("n3", vec![gpu()], &[]),
            ],
        );
        mock.expect_update().times(3).returning(|node| {
            if node.name_any() == "n2" {
                Err(StoreError::Other("etcd leader lost".to_string()))
            } else {
                Ok(node.clone())
            }
        });

        let reconciler = Reconciler::new(mock, Config::default());
        let err = reconciler.untaint_all(&[gpu()]).await.unwrap_err();
        match &err {
            Error::Batch(failures) => assert_eq!(failures.node_names(), vec!["n2"]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("etcd leader lost"));
    }

    #[tokio::test]
    async fn list_failure_fails_the_batch() {
        let mut mock = MockNodeStore::new();
        mock.expect_list()
            .times(1)
            .returning(|| Err(StoreError::Other("connection refused".to_string())));
        mock.expect_update().times(0);

        let reconciler = Reconciler::new(mock, Config::default());
        let err = reconciler.unlabel_all(&["a"]).await.unwrap_err();
        assert!(matches!(err, Error::List(_)));
    }

    #[tokio::test]
    async fn unlabel_skips_nodes_without_the_key() {
        let mut mock = MockNodeStore::new();
        listing(
            &mut mock,
            vec![node("n1", vec![], &[("a", "1"), ("b", "2")]), node("n2", vec![], &[("b", "2")])],
        );
        mock.expect_update()
            .withf(|node| {
                node.name_any() == "n1" && node.labels().keys().collect::<Vec<_>>() == ["b"]
            })
            .times(1)
            .returning(|node| Ok(node.clone()));

        let reconciler = Reconciler::new(mock, Config::default());
        let report = reconciler.unlabel_all(&["a"]).await.unwrap();
        assert_eq!(report.updated, vec!["n1"]);
        assert_eq!(report.skipped, vec!["n2"]);
    }

    #[tokio::test]
    async fn label_without_change_sends_nothing() {
        let mut mock = MockNodeStore::new();
        mock.expect_get()
            .returning(|_| Ok(node("n1", vec![], &[("zone", "a")])));
        mock.expect_update().times(0);

        let reconciler = Reconciler::new(mock, Config::default());
        let wanted = BTreeMap::from([("zone".to_string(), "a".to_string())]);
        reconciler.label("n1", &wanted).await.unwrap();
    }

    #[tokio::test]
    async fn get_missing_node_is_not_found() {
        let mut mock = MockNodeStore::new();
        mock.expect_get()
            .returning(|name| Err(StoreError::NotFound(name.to_string())));

        let reconciler = Reconciler::new(mock, Config::default());
        let err = reconciler.get("ghost").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "node 'ghost' not found");
    }

    #[tokio::test]
    async fn cancelled_token_fails_calls() {
        let mut mock = MockNodeStore::new();
        mock.expect_list().returning(|| Ok(Vec::new()));

        let token = CancellationToken::new();
        token.cancel();
        let reconciler = Reconciler::new(mock, Config::default()).with_cancellation(token);
        let err = reconciler.list().await.unwrap_err();
        assert!(matches!(err, Error::List(StoreError::Cancelled)));
    }
}
