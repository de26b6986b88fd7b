use core::error::Error;

/// Errors produced while computing topology hints, CPU models or node
/// label changes.
#[derive(Debug, derive_more::Display)]
pub enum TopologyError {
    #[display("Invalid value {value:?} for label {label} on node {node_name}")]
    InvalidLabelValue {
        node_name: String,
        label: String,
        value: String,
    },
    #[display("Node {node_name} not found")]
    NotFound { node_name: String },
    #[display("Node {node_name} does not carry a cpu vendor label")]
    NoVendorLabel { node_name: String },
    #[display("No schedulable node exposes a tsc frequency")]
    NoCompatibleNode,
    #[display("No cpu model of node {node_name} is supported by enough nodes")]
    NoCompatibleModel { node_name: String },
    #[display("Failed to patch labels of node {node_name}")]
    PatchFailed { node_name: String },
    #[display("Node cache failed to sync")]
    CacheSync,
}

impl Error for TopologyError {}
