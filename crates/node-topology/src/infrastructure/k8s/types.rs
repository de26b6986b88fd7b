use core::error::Error;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to watch resources: {message}")]
    WatchFailed { message: String },
    #[display("Failed to list resources: {message}")]
    ListFailed { message: String },
    #[display("Virtual machine instance not found: {name} in namespace {namespace}")]
    VmiNotFound { namespace: String, name: String },
}

impl Error for KubernetesError {}
