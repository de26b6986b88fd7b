pub mod app;
pub mod cmd;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export main modules
pub use domain::topology;
pub use infrastructure::k8s;
pub use infrastructure::kube_client;
pub use infrastructure::logging;
pub use infrastructure::metrics;
