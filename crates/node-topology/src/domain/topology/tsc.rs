//! TSC frequency label codec and the schedulable label diff policy.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use api_types::labels::LABEL_TRUE;
use api_types::labels::TSC_FREQUENCY_LABEL;
use api_types::labels::TSC_FREQUENCY_SCHEDULING_LABEL;
use api_types::labels::TSC_SCALABLE_LABEL;
use api_types::TopologyHints;
use api_types::VirtualMachineInstance;
use api_types::INVTSC_FEATURE;
use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use super::error::TopologyError;
use super::store::LabelDelta;

/// How strongly an instance depends on a fixed TSC frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TscFrequencyRequirementKind {
    /// The guest cannot boot without a defined frequency.
    RequiredForBoot,
    /// The guest boots, but is only migratable with a defined frequency.
    RequiredForMigration,
    NotRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TscFrequencyRequirement {
    pub kind: TscFrequencyRequirementKind,
    pub reason: &'static str,
}

/// Classifies the TSC frequency needs of an instance.
pub fn tsc_frequency_requirement(vmi: &VirtualMachineInstance) -> TscFrequencyRequirement {
    if vmi_has_invtsc_feature(vmi) {
        return TscFrequencyRequirement {
            kind: TscFrequencyRequirementKind::RequiredForBoot,
            reason: "VMI with invtsc CPU feature must have tsc frequency defined in order to boot",
        };
    }
    if vmi.has_hyperv_reenlightenment() {
        return TscFrequencyRequirement {
            kind: TscFrequencyRequirementKind::RequiredForMigration,
            reason: "HyperV Reenlightenment VMIs cannot migrate when TSC Frequency is not exposed on the cluster: guest timers might be inconsistent",
        };
    }
    TscFrequencyRequirement {
        kind: TscFrequencyRequirementKind::NotRequired,
        reason: "",
    }
}

pub fn vmi_has_invtsc_feature(vmi: &VirtualMachineInstance) -> bool {
    vmi.cpu_features()
        .iter()
        .any(|feature| feature.name == INVTSC_FEATURE && feature.is_mandatory())
}

pub fn are_tsc_frequency_topology_hints_defined(vmi: &VirtualMachineInstance) -> bool {
    vmi.tsc_frequency_hint().is_some()
}

/// Node selector that pins a hinted instance to nodes able to present its
/// frequency.
pub fn node_selector_for_topology_hints(hints: &TopologyHints) -> BTreeMap<String, String> {
    hints
        .tsc_frequency
        .map(|frequency| (to_tsc_schedulable_label(frequency), LABEL_TRUE.to_string()))
        .into_iter()
        .collect()
}

/// Reads the native TSC frequency and scalability of a node.
///
/// A node without a frequency label yields `(0, false)`: the frequency is
/// unknown, which is not an error.
///
/// # Errors
///
/// - [`TopologyError::InvalidLabelValue`] if the frequency label is not a
///   positive integer
pub fn tsc_frequency_from_node(node: &Node) -> Result<(i64, bool), Report<TopologyError>> {
    let labels = node.labels();
    let scalable = labels
        .get(TSC_SCALABLE_LABEL)
        .is_some_and(|value| value == LABEL_TRUE);

    let Some(value) = labels.get(TSC_FREQUENCY_LABEL) else {
        return Ok((0, false));
    };

    let invalid = || TopologyError::InvalidLabelValue {
        node_name: node.name_any(),
        label: TSC_FREQUENCY_LABEL.to_string(),
        value: value.clone(),
    };
    let frequency = value
        .parse::<i64>()
        .map_err(|e| Report::new(invalid()).attach_printable(format!("not an integer: {e}")))?;
    if frequency <= 0 {
        return Err(Report::new(invalid())
            .attach_printable(format!("expected a frequency bigger than 0, got {frequency}")));
    }

    Ok((frequency, scalable))
}

/// Frequencies the node is currently marked schedulable for.
///
/// Foreign labels sharing the marker prefix are skipped.
pub fn tsc_frequencies_on_node(node: &Node) -> Vec<i64> {
    let prefix = format!("{TSC_FREQUENCY_SCHEDULING_LABEL}-");
    let mut frequencies: Vec<i64> = node
        .labels()
        .keys()
        .filter_map(|key| {
            let suffix = key.strip_prefix(&prefix)?;
            match suffix.parse::<i64>() {
                Ok(frequency) => Some(frequency),
                Err(e) => {
                    debug!(
                        node = %node.name_any(),
                        label = %key,
                        "Skipping malformed tsc scheduling label: {e}"
                    );
                    None
                }
            }
        })
        .collect();
    frequencies.sort_unstable();
    frequencies
}

/// Lowest native frequency among the given nodes, `0` if none has one.
pub fn lowest_tsc_frequency(nodes: &[Arc<Node>]) -> i64 {
    nodes
        .iter()
        .filter_map(|node| match tsc_frequency_from_node(node) {
            Ok((frequency, _)) if frequency > 0 => Some(frequency),
            Ok(_) => None,
            Err(e) => {
                warn!("Ignoring node for lowest tsc frequency: {e:?}");
                None
            }
        })
        .min()
        .unwrap_or(0)
}

pub fn to_tsc_schedulable_label(frequency: i64) -> String {
    format!("{TSC_FREQUENCY_SCHEDULING_LABEL}-{frequency}")
}

pub fn to_tsc_schedulable_labels(frequencies: &[i64]) -> Vec<String> {
    frequencies
        .iter()
        .copied()
        .map(to_tsc_schedulable_label)
        .collect()
}

/// Computes which schedulable frequencies to add to and remove from a node.
///
/// A scalable node offers every required frequency up to its own native
/// one; a non-scalable node offers exactly its native frequency. The node's
/// native frequency is always offered. Both returned lists are sorted.
pub fn calculate_tsc_label_diff(
    required_frequencies: &[i64],
    frequencies_on_node: &[i64],
    node_frequency: i64,
    scalable: bool,
) -> (Vec<i64>, Vec<i64>) {
    let mut desired = BTreeSet::from([node_frequency]);
    if scalable {
        desired.extend(
            required_frequencies
                .iter()
                .copied()
                .filter(|frequency| *frequency > 0 && *frequency <= node_frequency),
        );
    }

    let current: BTreeSet<i64> = frequencies_on_node.iter().copied().collect();

    let to_add = desired.difference(&current).copied().collect();
    let to_remove = current.difference(&desired).copied().collect();
    (to_add, to_remove)
}

/// Label delta that converges a node to the required frequency set.
///
/// A node without a native frequency is left alone.
///
/// # Errors
///
/// - [`TopologyError::InvalidLabelValue`] if the node's frequency label is
///   unparsable
pub fn calculate_node_label_changes(
    node: &Node,
    required_frequencies: &[i64],
) -> Result<LabelDelta, Report<TopologyError>> {
    let (node_frequency, scalable) = tsc_frequency_from_node(node)?;
    if node_frequency == 0 {
        return Ok(LabelDelta::default());
    }

    let (to_add, to_remove) = calculate_tsc_label_diff(
        required_frequencies,
        &tsc_frequencies_on_node(node),
        node_frequency,
        scalable,
    );

    Ok(LabelDelta {
        add: to_tsc_schedulable_labels(&to_add)
            .into_iter()
            .map(|label| (label, LABEL_TRUE.to_string()))
            .collect(),
        remove: to_tsc_schedulable_labels(&to_remove).into_iter().collect(),
    })
}
