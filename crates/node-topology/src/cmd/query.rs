//! One-shot queries against a snapshot of the cluster.
//!
//! Results are printed as JSON on stdout, logs go to stderr.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use api_types::TopologyHints;
use api_types::VirtualMachineInstance;
use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use kube::Client;
use kube::ResourceExt;
use serde::Serialize;

use crate::config::ClusterArgs;
use crate::config::ClusterConfig;
use crate::config::CpuModelArgs;
use crate::config::DiffArgs;
use crate::config::HintArgs;
use crate::domain::topology::tsc::are_tsc_frequency_topology_hints_defined;
use crate::domain::topology::tsc::calculate_node_label_changes;
use crate::domain::topology::tsc::node_selector_for_topology_hints;
use crate::domain::topology::tsc::tsc_frequency_requirement;
use crate::domain::topology::tsc::TscFrequencyRequirementKind;
use crate::domain::topology::updater::required_frequencies;
use crate::domain::topology::CpuModelMatcher;
use crate::domain::topology::Hinter;
use crate::domain::topology::LabelDelta;
use crate::domain::topology::TopologyError;
use crate::domain::topology::TopologyHinter;
use crate::infrastructure::k8s::snapshot;
use crate::infrastructure::kube_client::init_kube_client;
use crate::infrastructure::logging;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HintReport {
    pub requirement: TscFrequencyRequirementKind,
    pub reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topology_hints: Option<TopologyHints>,
    pub node_selector: BTreeMap<String, String>,
    /// Set when a migration-only requirement could not be satisfied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Hint of an instance, reusing one that is already recorded.
///
/// # Errors
///
/// - [`TopologyError::NoCompatibleNode`] if the instance cannot boot without
///   a hint and none can be computed
pub fn hint_report(
    hinter: &dyn Hinter,
    vmi: &VirtualMachineInstance,
) -> Result<HintReport, Report<TopologyError>> {
    let requirement = tsc_frequency_requirement(vmi);

    let mut warning = None;
    let topology_hints = if are_tsc_frequency_topology_hints_defined(vmi) {
        vmi.status.as_ref().and_then(|status| status.topology_hints)
    } else {
        match hinter.topology_hints_for_vmi(vmi) {
            Ok(hints) => hints,
            Err(e) if requirement.kind == TscFrequencyRequirementKind::RequiredForMigration => {
                tracing::warn!(
                    vmi = %vmi.name_any(),
                    "Instance will not be migratable: {e:?}"
                );
                warning = Some(e.current_context().to_string());
                None
            }
            Err(e) => return Err(e),
        }
    };

    Ok(HintReport {
        requirement: requirement.kind,
        reason: requirement.reason,
        node_selector: topology_hints
            .as_ref()
            .map(node_selector_for_topology_hints)
            .unwrap_or_default(),
        topology_hints,
        warning,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodeDiff {
    Delta(LabelDelta),
    Error { error: String },
}

/// Label changes a reconciliation cycle would apply, keyed by node name.
///
/// Nodes already in line are omitted. Nodes with an unreadable frequency
/// label are listed with the error, reconciliation leaves them untouched.
///
/// # Errors
///
/// - [`TopologyError::NoCompatibleNode`] if the cluster has no baseline
pub fn diff_report(
    hinter: &dyn Hinter,
    nodes: Vec<Arc<Node>>,
) -> Result<BTreeMap<String, NodeDiff>, Report<TopologyError>> {
    let required = required_frequencies(hinter)?;

    let mut report = BTreeMap::new();
    for node in nodes {
        let diff = match calculate_node_label_changes(&node, &required) {
            Ok(delta) if delta.is_empty() => continue,
            Ok(delta) => NodeDiff::Delta(delta),
            Err(e) => NodeDiff::Error {
                error: e.current_context().to_string(),
            },
        };
        report.insert(node.name_any(), diff);
    }
    Ok(report)
}

struct Snapshot {
    nodes: Arc<Vec<Arc<Node>>>,
    vmis: Arc<Vec<Arc<VirtualMachineInstance>>>,
    client: Client,
}

impl Snapshot {
    async fn fetch(cluster: &ClusterArgs) -> Result<Self> {
        let client = init_kube_client(cluster.kubeconfig.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize kube client: {e:?}"))?;
        let nodes = snapshot::list_nodes(&client)
            .await
            .map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let vmis = snapshot::list_vmis(&client)
            .await
            .map_err(|e| anyhow::anyhow!("{e:?}"))?;
        tracing::debug!(nodes = nodes.len(), vmis = vmis.len(), "Fetched cluster snapshot");

        Ok(Self {
            nodes: Arc::new(nodes),
            vmis: Arc::new(vmis),
            client,
        })
    }

    fn hinter(&self, cluster_config: ClusterConfig) -> TopologyHinter {
        TopologyHinter::new(self.nodes.clone(), self.vmis.clone(), cluster_config)
    }

    async fn vmi(&self, namespace: &str, name: &str) -> Result<VirtualMachineInstance> {
        snapshot::get_vmi(&self.client, namespace, name)
            .await
            .map_err(|e| anyhow::anyhow!("{e:?}"))
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to encode result")?;
    println!("{json}");
    Ok(())
}

pub async fn run_hint(args: HintArgs) -> Result<()> {
    let _guard = logging::init(None)?;

    let cluster_config = args.cluster.resolve_cluster_config().await?;
    let snapshot = Snapshot::fetch(&args.cluster).await?;
    let vmi = snapshot.vmi(&args.namespace, &args.name).await?;
    let report = hint_report(&snapshot.hinter(cluster_config), &vmi)
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    print_json(&report)
}

pub async fn run_cpu_model(args: CpuModelArgs) -> Result<()> {
    let _guard = logging::init(None)?;

    let snapshot = Snapshot::fetch(&args.cluster).await?;
    let vmi = match (&args.vmi.namespace, &args.vmi.name) {
        (Some(namespace), Some(name)) => Some(snapshot.vmi(namespace, name).await?),
        _ => None,
    };

    let matcher = CpuModelMatcher::new(snapshot.nodes.clone());
    let model = matcher
        .best_match_model_for_initial_node(&args.node, vmi.as_ref())
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    print_json(&serde_json::json!({ "node": args.node, "model": model }))
}

pub async fn run_diff(args: DiffArgs) -> Result<()> {
    let _guard = logging::init(None)?;

    let cluster_config = args.cluster.resolve_cluster_config().await?;
    let snapshot = Snapshot::fetch(&args.cluster).await?;
    let report = diff_report(
        &snapshot.hinter(cluster_config),
        snapshot.nodes.as_ref().clone(),
    )
    .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    print_json(&report)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use api_types::CpuFeature;
    use api_types::FeatureHyperv;
    use api_types::FeatureState;
    use api_types::Features;
    use api_types::VirtualMachineInstanceSpec;
    use api_types::VirtualMachineInstanceStatus;
    use api_types::INVTSC_FEATURE;
    use clap::Parser;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::domain::topology::testing::node;
    use crate::domain::topology::testing::tsc_node;

    fn hinter(nodes: Vec<Node>) -> TopologyHinter {
        hinter_with_config(nodes, ClusterConfig::default())
    }

    fn hinter_with_config(nodes: Vec<Node>, cluster_config: ClusterConfig) -> TopologyHinter {
        let nodes: Vec<Arc<Node>> = nodes.into_iter().map(Arc::new).collect();
        let vmis: Vec<Arc<VirtualMachineInstance>> = vec![];
        TopologyHinter::new(Arc::new(nodes), Arc::new(vmis), cluster_config)
    }

    fn invtsc_vmi() -> VirtualMachineInstance {
        let mut vmi = VirtualMachineInstance::new("vmi", VirtualMachineInstanceSpec::default());
        vmi.spec.domain.cpu = Some(api_types::Cpu {
            model: None,
            features: vec![CpuFeature::new(INVTSC_FEATURE, "require")],
        });
        vmi
    }

    fn reenlightenment_vmi() -> VirtualMachineInstance {
        let mut vmi = VirtualMachineInstance::new("vmi", VirtualMachineInstanceSpec::default());
        vmi.spec.domain.features = Some(Features {
            hyperv: Some(FeatureHyperv {
                reenlightenment: Some(FeatureState {
                    enabled: Some(true),
                }),
            }),
        });
        vmi
    }

    #[test]
    fn hint_for_boot_requirement() {
        let report = hint_report(&hinter(vec![tsc_node("a", 2000, true)]), &invtsc_vmi()).unwrap();

        assert_eq!(report.requirement, TscFrequencyRequirementKind::RequiredForBoot);
        assert_eq!(
            report.topology_hints,
            Some(TopologyHints {
                tsc_frequency: Some(2000)
            })
        );
        assert_eq!(
            report.node_selector,
            BTreeMap::from([(
                "scheduling.node.kubevirt.io/tsc-frequency-2000".to_string(),
                "true".to_string()
            )])
        );
    }

    #[test]
    fn recorded_hint_is_reused() {
        let mut vmi = invtsc_vmi();
        vmi.status = Some(VirtualMachineInstanceStatus {
            node_name: None,
            topology_hints: Some(TopologyHints {
                tsc_frequency: Some(1500),
            }),
        });

        let report = hint_report(&hinter(vec![tsc_node("a", 2000, true)]), &vmi).unwrap();
        assert_eq!(report.topology_hints.and_then(|h| h.tsc_frequency), Some(1500));
    }

    #[test]
    fn boot_requirement_without_nodes_fails() {
        let err = hint_report(&hinter(vec![]), &invtsc_vmi()).expect_err("no baseline");
        assert!(matches!(err.current_context(), TopologyError::NoCompatibleNode));
    }

    #[test]
    fn migration_requirement_degrades() {
        let report = hint_report(&hinter(vec![]), &reenlightenment_vmi()).unwrap();

        assert_eq!(
            report.requirement,
            TscFrequencyRequirementKind::RequiredForMigration
        );
        assert_eq!(report.topology_hints, None);
        assert!(report.node_selector.is_empty());
        assert!(report.warning.is_some());
    }

    #[test]
    fn diff_lists_only_changing_nodes() {
        let stale = node(
            "stale",
            &[
                ("kubevirt.io/schedulable", "true"),
                ("cpu-timer.node.kubevirt.io/tsc-frequency", "3000"),
                ("cpu-timer.node.kubevirt.io/tsc-scalable", "true"),
                ("scheduling.node.kubevirt.io/tsc-frequency-1000", "true"),
            ],
        );
        let settled = node(
            "settled",
            &[
                ("kubevirt.io/schedulable", "true"),
                ("cpu-timer.node.kubevirt.io/tsc-frequency", "2000"),
                ("scheduling.node.kubevirt.io/tsc-frequency-2000", "true"),
            ],
        );
        let nodes = vec![stale, settled];
        let hinter = hinter(nodes.clone());

        let report = diff_report(&hinter, nodes.into_iter().map(Arc::new).collect()).unwrap();

        assert_eq!(report.keys().cloned().collect::<Vec<_>>(), vec!["stale".to_string()]);
        let NodeDiff::Delta(delta) = &report["stale"] else {
            panic!("expected a delta");
        };
        assert_eq!(
            delta.add.keys().cloned().collect::<Vec<_>>(),
            vec![
                "scheduling.node.kubevirt.io/tsc-frequency-2000".to_string(),
                "scheduling.node.kubevirt.io/tsc-frequency-3000".to_string(),
            ]
        );
        assert_eq!(
            delta.remove.iter().cloned().collect::<Vec<_>>(),
            vec!["scheduling.node.kubevirt.io/tsc-frequency-1000".to_string()]
        );
    }

    #[test]
    fn diff_reports_unreadable_nodes() {
        let broken = node(
            "broken",
            &[
                ("kubevirt.io/schedulable", "true"),
                ("cpu-timer.node.kubevirt.io/tsc-frequency", "garbage"),
            ],
        );
        let nodes = vec![broken, tsc_node("good", 2000, false)];
        let hinter = hinter(nodes.clone());

        let report = diff_report(&hinter, nodes.into_iter().map(Arc::new).collect()).unwrap();

        assert_eq!(
            report.keys().cloned().collect::<Vec<_>>(),
            vec!["broken".to_string(), "good".to_string()]
        );
        assert!(matches!(&report["broken"], NodeDiff::Error { .. }));
        assert!(matches!(&report["good"], NodeDiff::Delta(_)));
    }

    #[test(tokio::test)]
    async fn diff_uses_floor_from_cluster_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "minimumClusterTSCFrequency: 1000").unwrap();
        let path = file.path().to_string_lossy().into_owned();
        let args = DiffArgs::try_parse_from(["diff", "--cluster-config", path.as_str()]).unwrap();
        let cluster_config = args.cluster.resolve_cluster_config().await.unwrap();

        let nodes = vec![tsc_node("fast", 3000, true), tsc_node("slow", 2000, false)];
        let hinter = hinter_with_config(nodes.clone(), cluster_config);
        let report = diff_report(&hinter, nodes.into_iter().map(Arc::new).collect()).unwrap();

        let NodeDiff::Delta(delta) = &report["fast"] else {
            panic!("expected a delta");
        };
        assert_eq!(
            delta.add.keys().cloned().collect::<Vec<_>>(),
            vec![
                "scheduling.node.kubevirt.io/tsc-frequency-1000".to_string(),
                "scheduling.node.kubevirt.io/tsc-frequency-3000".to_string(),
            ]
        );
    }
}
