use std::sync::Arc;

use api_types::VirtualMachineInstance;
use k8s_openapi::api::core::v1::Node;

use crate::domain::topology::NodeTopologyUpdater;
use crate::infrastructure::k8s::ReflectorDriver;

/// Application dependencies
pub struct ApplicationServices {
    pub node_reflector: ReflectorDriver<Node>,
    pub vmi_reflector: ReflectorDriver<VirtualMachineInstance>,
    pub updater: Arc<NodeTopologyUpdater>,
}
