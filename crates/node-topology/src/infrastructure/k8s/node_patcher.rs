use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::Api;
use kube::Client;
use serde_json::json;
use serde_json::Map;
use serde_json::Value;
use tracing::debug;

use crate::domain::topology::LabelDelta;
use crate::domain::topology::NodePatcher;
use crate::domain::topology::TopologyError;

/// Field manager recorded on label patches.
pub const FIELD_MANAGER: &str = "node-topology";

/// Applies label deltas with JSON merge patches.
///
/// Removed labels are sent as `null`, so labels owned by other writers are
/// left untouched.
pub struct KubeNodePatcher {
    api: Api<Node>,
}

impl KubeNodePatcher {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

/// Merge patch body for `delta`.
pub fn label_patch(delta: &LabelDelta) -> Value {
    let mut labels = Map::new();
    for key in &delta.remove {
        labels.insert(key.clone(), Value::Null);
    }
    for (key, value) in &delta.add {
        labels.insert(key.clone(), Value::String(value.clone()));
    }
    json!({ "metadata": { "labels": labels } })
}

#[async_trait]
impl NodePatcher for KubeNodePatcher {
    async fn patch_labels(
        &self,
        node_name: &str,
        delta: &LabelDelta,
    ) -> Result<(), Report<TopologyError>> {
        let patch = label_patch(delta);
        debug!(node = %node_name, %patch, "Sending node label patch");

        self.api
            .patch(
                node_name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| {
                Report::new(TopologyError::PatchFailed {
                    node_name: node_name.to_string(),
                })
                .attach_printable(format!("Kubernetes API error: {e}"))
            })?;
        Ok(())
    }
}
