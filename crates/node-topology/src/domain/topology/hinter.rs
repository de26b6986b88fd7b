use std::collections::BTreeSet;
use std::sync::Arc;

use api_types::TopologyHints;
use api_types::VirtualMachineInstance;
use error_stack::Report;
use error_stack::ResultExt;

use super::error::TopologyError;
use super::filter::filter_nodes;
use super::filter::has_inv_tsc_frequency;
use super::filter::is_schedulable;
use super::store::NodeStore;
use super::store::VmiStore;
use super::tsc::lowest_tsc_frequency;
use super::tsc::tsc_frequency_requirement;
use super::tsc::TscFrequencyRequirementKind;
use crate::config::ClusterConfig;

/// Guest architectures whose clocks never depend on a TSC frequency hint.
pub const ARCHITECTURES_WITHOUT_TSC: [&str; 3] = ["arm64", "s390x", "ppc64le"];

/// Computes TSC frequency hints from the cluster state.
pub trait Hinter: Send + Sync {
    /// Hint to record on the instance, `None` if it does not need one.
    ///
    /// # Errors
    ///
    /// - [`TopologyError::NoCompatibleNode`] if the instance needs a hint but
    ///   no node exposes a usable frequency
    fn topology_hints_for_vmi(
        &self,
        vmi: &VirtualMachineInstance,
    ) -> Result<Option<TopologyHints>, Report<TopologyError>>;

    fn is_tsc_frequency_required(&self, vmi: &VirtualMachineInstance) -> bool;

    /// Frequencies recorded on instances, sorted and deduplicated.
    fn tsc_frequencies_in_use(&self) -> Vec<i64>;

    /// # Errors
    ///
    /// - [`TopologyError::NoCompatibleNode`] if neither a configured minimum
    ///   nor a schedulable node with a valid frequency exists
    fn lowest_tsc_frequency_on_cluster(&self) -> Result<i64, Report<TopologyError>>;
}

pub struct TopologyHinter {
    node_store: Arc<dyn NodeStore>,
    vmi_store: Arc<dyn VmiStore>,
    cluster_config: ClusterConfig,
}

impl TopologyHinter {
    pub fn new(
        node_store: Arc<dyn NodeStore>,
        vmi_store: Arc<dyn VmiStore>,
        cluster_config: ClusterConfig,
    ) -> Self {
        Self {
            node_store,
            vmi_store,
            cluster_config,
        }
    }
}

impl Hinter for TopologyHinter {
    fn topology_hints_for_vmi(
        &self,
        vmi: &VirtualMachineInstance,
    ) -> Result<Option<TopologyHints>, Report<TopologyError>> {
        if !self.is_tsc_frequency_required(vmi) {
            return Ok(None);
        }

        let frequency = self
            .lowest_tsc_frequency_on_cluster()
            .attach_printable("failed to determine the lowest tsc frequency on the cluster")?;

        Ok(Some(TopologyHints {
            tsc_frequency: Some(frequency),
        }))
    }

    fn is_tsc_frequency_required(&self, vmi: &VirtualMachineInstance) -> bool {
        let excluded = vmi
            .spec
            .architecture
            .as_deref()
            .is_some_and(|arch| ARCHITECTURES_WITHOUT_TSC.contains(&arch));

        !excluded && tsc_frequency_requirement(vmi).kind != TscFrequencyRequirementKind::NotRequired
    }

    fn tsc_frequencies_in_use(&self) -> Vec<i64> {
        self.vmi_store
            .list_vmis()
            .iter()
            .filter_map(|vmi| vmi.tsc_frequency_hint())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn lowest_tsc_frequency_on_cluster(&self) -> Result<i64, Report<TopologyError>> {
        if let Some(minimum) = self.cluster_config.minimum_cluster_tsc_frequency() {
            return Ok(minimum);
        }

        let nodes = filter_nodes(
            self.node_store.list_nodes(),
            &[Box::new(is_schedulable), Box::new(has_inv_tsc_frequency)],
        );
        match lowest_tsc_frequency(&nodes) {
            0 => Err(Report::new(TopologyError::NoCompatibleNode)),
            frequency => Ok(frequency),
        }
    }
}
