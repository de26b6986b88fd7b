//! One-shot reads used by the query commands.

use std::sync::Arc;

use api_types::VirtualMachineInstance;
use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use kube::api::ListParams;
use kube::Api;
use kube::Client;

use crate::infrastructure::k8s::KubernetesError;

/// # Errors
///
/// - [`KubernetesError::ListFailed`] if the API server rejects the list
pub async fn list_nodes(client: &Client) -> Result<Vec<Arc<Node>>, Report<KubernetesError>> {
    let api: Api<Node> = Api::all(client.clone());
    let nodes = api.list(&ListParams::default()).await.map_err(|e| {
        Report::new(KubernetesError::ListFailed {
            message: format!("Failed to list nodes: {e}"),
        })
    })?;
    Ok(nodes.items.into_iter().map(Arc::new).collect())
}

/// Instances of all namespaces.
///
/// # Errors
///
/// - [`KubernetesError::ListFailed`] if the API server rejects the list
pub async fn list_vmis(
    client: &Client,
) -> Result<Vec<Arc<VirtualMachineInstance>>, Report<KubernetesError>> {
    let api: Api<VirtualMachineInstance> = Api::all(client.clone());
    let vmis = api.list(&ListParams::default()).await.map_err(|e| {
        Report::new(KubernetesError::ListFailed {
            message: format!("Failed to list virtual machine instances: {e}"),
        })
    })?;
    Ok(vmis.items.into_iter().map(Arc::new).collect())
}

/// # Errors
///
/// - [`KubernetesError::VmiNotFound`] if the instance does not exist
pub async fn get_vmi(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<VirtualMachineInstance, Report<KubernetesError>> {
    let api: Api<VirtualMachineInstance> = Api::namespaced(client.clone(), namespace);
    api.get(name).await.map_err(|e| {
        Report::new(KubernetesError::VmiNotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
        .attach_printable(format!("Kubernetes API error: {e}"))
    })
}
