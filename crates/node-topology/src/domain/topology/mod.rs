//! Migration-compatibility scheduling for virtual machines.
//!
//! Nodes advertise their native invariant TSC frequency and the CPU models
//! they support through labels. This module derives from a snapshot of
//! nodes and running instances:
//! - [`Hinter`]: the TSC frequency hint recorded on an instance at admission
//! - [`NodeTopologyUpdater`]: the reconciliation loop keeping per-node
//!   schedulable frequency labels in line with what instances rely on
//! - [`CpuModelMatcher`]: the newest CPU model enough of the cluster supports

pub mod cpu_model;
pub mod error;
pub mod filter;
pub mod hinter;
pub mod store;
pub mod tsc;
pub mod updater;

pub use cpu_model::CpuModelMatcher;
pub use error::TopologyError;
pub use hinter::Hinter;
pub use hinter::TopologyHinter;
pub use store::LabelDelta;
pub use store::NodePatcher;
pub use store::NodeStore;
pub use store::VmiStore;
pub use updater::NodeTopologyUpdater;
pub use updater::UpdateStats;

#[cfg(test)]
pub(crate) mod testing;
