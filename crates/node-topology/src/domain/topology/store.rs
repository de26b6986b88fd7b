//! Seams to the surrounding cluster machinery.
//!
//! Reads go against an eventually consistent local mirror of the cluster,
//! writes go through a label patch transport. Plain vectors of objects act
//! as immutable snapshots, which is what one-shot commands and tests use.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use api_types::VirtualMachineInstance;
use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use serde::Serialize;

use super::error::TopologyError;

/// Listable view on the cluster nodes.
#[async_trait]
pub trait NodeStore: Send + Sync {
    fn list_nodes(&self) -> Vec<Arc<Node>>;

    fn get_node(&self, name: &str) -> Option<Arc<Node>>;

    /// Resolves once the store reflects the cluster state at least once.
    async fn wait_until_synced(&self) -> Result<(), Report<TopologyError>>;
}

/// Listable view on the virtual machine instances of all namespaces.
#[async_trait]
pub trait VmiStore: Send + Sync {
    fn list_vmis(&self) -> Vec<Arc<VirtualMachineInstance>>;

    /// Resolves once the store reflects the cluster state at least once.
    async fn wait_until_synced(&self) -> Result<(), Report<TopologyError>>;
}

/// Applies a label delta to a named node.
///
/// Conflicts with other writers are the transport's business.
#[async_trait]
pub trait NodePatcher: Send + Sync {
    async fn patch_labels(
        &self,
        node_name: &str,
        delta: &LabelDelta,
    ) -> Result<(), Report<TopologyError>>;
}

/// Labels to set and labels to drop on a single node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelDelta {
    pub add: BTreeMap<String, String>,
    pub remove: BTreeSet<String>,
}

impl LabelDelta {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    pub fn apply_to(&self, labels: &mut BTreeMap<String, String>) {
        for key in &self.remove {
            labels.remove(key);
        }
        for (key, value) in &self.add {
            labels.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl NodeStore for Vec<Arc<Node>> {
    fn list_nodes(&self) -> Vec<Arc<Node>> {
        self.clone()
    }

    fn get_node(&self, name: &str) -> Option<Arc<Node>> {
        self.iter().find(|node| node.name_any() == name).cloned()
    }

    async fn wait_until_synced(&self) -> Result<(), Report<TopologyError>> {
        Ok(())
    }
}

#[async_trait]
impl VmiStore for Vec<Arc<VirtualMachineInstance>> {
    fn list_vmis(&self) -> Vec<Arc<VirtualMachineInstance>> {
        self.clone()
    }

    async fn wait_until_synced(&self) -> Result<(), Report<TopologyError>> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn apply_delta_removes_then_adds() {
        let mut labels = BTreeMap::from([
            ("a".to_string(), "true".to_string()),
            ("b".to_string(), "true".to_string()),
        ]);
        let delta = LabelDelta {
            add: BTreeMap::from([("c".to_string(), "true".to_string())]),
            remove: BTreeSet::from(["a".to_string(), "missing".to_string()]),
        };

        delta.apply_to(&mut labels);

        assert_eq!(
            labels.keys().cloned().collect::<Vec<_>>(),
            vec!["b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn empty_delta() {
        assert!(LabelDelta::default().is_empty());
    }
}
