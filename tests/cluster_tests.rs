#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{Node, NodeSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::api::{Api, DeleteParams, PostParams};
    use kube::Client;
    use node_taint_helper::{Config, KubeNodeStore, Reconciler, TaintEffect};
    use rand::{distr::Alphanumeric, rng, Rng};
    use std::collections::BTreeMap;

    /// Generate a random node name
    fn random_node_name(length: usize) -> String {
        assert!(length >= 1, "node name length must be ≥ 1");
        rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .map(|c| c.to_ascii_lowercase())
            .collect()
    }

    /// Label key owned by one test node, so no other node on the cluster carries it
    fn label_key(node_name: &str) -> String {
        format!("helper.example.com/{node_name}")
    }

    /// Create a node by name
    async fn create_node(client: &Client, node_name: &str) -> Result<(), anyhow::Error> {
        let nodes: Api<Node> = Api::all(client.clone());

        let node = Node {
            metadata: ObjectMeta {
                name: Some(node_name.to_string()),
                labels: Some(BTreeMap::from([(label_key(node_name), "1".to_string())])),
                ..Default::default()
            },
            spec: Some(NodeSpec::default()),
            ..Default::default()
        };

        if nodes.get(node_name).await.is_ok() {
            return Ok(());
        }

        nodes.create(&PostParams::default(), &node).await?;
        Ok(())
    }

    /// Delete a node by name
    async fn delete_node(client: &Client, node_name: &str) -> Result<(), anyhow::Error> {
        let nodes: Api<Node> = Api::all(client.clone());
        nodes.delete(node_name, &DeleteParams::default()).await?;
        Ok(())
    }

    /// Taint, untaint and unlabel a fresh node on a live cluster.
    ///
    /// Taint and label keys are unique to the run. `taint_workers` still reaches
    /// every worker node, and `untaint_all` takes the taint off again, so run
    /// this against a disposable cluster.
    #[tokio::test]
    #[ignore = "requires a Kubernetes cluster"]
    async fn test_reconcile_against_cluster() {
        let client = Client::try_default().await.unwrap();
        let node_name = format!("test-helper-{}", random_node_name(10));
        create_node(&client, &node_name).await.unwrap();

        let reconciler = Reconciler::new(KubeNodeStore::new(client.clone()), Config::default());
        let key = label_key(&node_name);
        let taint = TaintEffect::NoSchedule.taint(&key, Some("value"));

        let report = reconciler.taint_workers(&[taint.clone()]).await.unwrap();
        assert!(report.updated.contains(&node_name));
        let report = reconciler.taint_workers(&[taint.clone()]).await.unwrap();
        assert!(report.skipped.contains(&node_name));

        reconciler.untaint_all(&[taint]).await.unwrap();
        let report = reconciler.unlabel_all(&[key.as_str()]).await.unwrap();
        assert_eq!(report.updated, vec![node_name.clone()]);

        let node = reconciler.get(&node_name).await.unwrap();
        assert!(node
            .spec
            .and_then(|s| s.taints)
            .unwrap_or_default()
            .iter()
            .all(|t| t.key != key));
        assert!(node
            .metadata
            .labels
            .unwrap_or_default()
            .get(&key)
            .is_none());

        delete_node(&client, &node_name).await.ok();
        let err = reconciler.get(&node_name).await;
        assert!(err.is_err());
    }
}
