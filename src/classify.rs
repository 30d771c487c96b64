//! Worker / control-plane classification by taint key.

use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeSet;

/// Taint keys that mark a control-plane node unless configured otherwise.
pub const DEFAULT_MASTER_TAINT_KEYS: &[&str] = &[
    "node-role.kubernetes.io/master",
    "node-role.kubernetes.io/control-plane",
];

/// A node is a worker when none of its taint keys is a master taint key.
///
/// Always computed from the node as given; classification changes as soon as
/// a master taint is added or removed.
pub fn is_worker(node: &Node, master_taint_keys: &BTreeSet<String>) -> bool {
    !node
        .spec
        .as_ref()
        .and_then(|spec| spec.taints.as_ref())
        .is_some_and(|taints| taints.iter().any(|t| master_taint_keys.contains(&t.key)))
}
