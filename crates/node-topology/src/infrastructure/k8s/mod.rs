//! Kubernetes integration module.
//!
//! The main components are:
//! - [`ReflectorCache`]: watch-backed local mirror of nodes or instances,
//!   driven by a [`ReflectorDriver`]
//! - [`KubeNodePatcher`]: merge-patches node labels
//! - [`snapshot`]: one-shot listing for the query commands

pub mod cache;
pub mod node_patcher;
pub mod snapshot;
pub mod types;

pub use cache::reflector_cache;
pub use cache::ReflectorCache;
pub use cache::ReflectorDriver;
pub use node_patcher::KubeNodePatcher;
pub use types::KubernetesError;
