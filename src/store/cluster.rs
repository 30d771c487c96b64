use super::{NodeStore, StoreError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::{Api, ListParams, PostParams, ResourceExt},
    error::ErrorResponse,
    Client,
};
use tracing::debug;

/// Nodes of the cluster behind a kube client
#[derive(Clone)]
pub struct KubeNodeStore {
    node_api: Api<Node>,
}

impl KubeNodeStore {
    pub fn new(client: Client) -> Self {
        Self {
            node_api: Api::all(client),
        }
    }
}

fn store_error(node_name: &str, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(ErrorResponse { code: 404, .. }) => {
            StoreError::NotFound(node_name.to_string())
        }
        kube::Error::Api(ErrorResponse { code: 409, .. }) => {
            StoreError::Conflict(node_name.to_string())
        }
        e => StoreError::Kube(e),
    }
}

#[async_trait]
impl NodeStore for KubeNodeStore {
    async fn get(&self, name: &str) -> Result<Node, StoreError> {
        self.node_api
            .get(name)
            .await
            .map_err(|e| store_error(name, e))
    }

    async fn list(&self) -> Result<Vec<Node>, StoreError> {
        let nodes = self
            .node_api
            .list(&ListParams::default())
            .await
            .map_err(StoreError::Kube)?;
        debug!("Listed {} nodes", nodes.items.len());
        Ok(nodes.items)
    }

    async fn update(&self, node: &Node) -> Result<Node, StoreError> {
        let node_name = node
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| StoreError::Other("node has no name".to_string()))?;
        let updated = self
            .node_api
            .replace(node_name, &PostParams::default(), node)
            .await
            .map_err(|e| store_error(node_name, e))?;
        debug!(
            "Replaced node '{}' at resourceVersion {:?}",
            updated.name_any(),
            updated.resource_version()
        );
        Ok(updated)
    }
}
