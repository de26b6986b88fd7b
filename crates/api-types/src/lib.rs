//! Shared API type definitions
//!
//! This crate contains the cluster objects consumed by the node topology
//! controller: the virtual machine instance custom resource, its recorded
//! topology hints, and the node label keys used for TSC frequency and CPU
//! model scheduling.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Affinity;
use kube::CustomResource;
use serde::Deserialize;
use serde::Serialize;

pub mod labels;

/// CPU feature name a guest requests when it depends on an invariant TSC.
pub const INVTSC_FEATURE: &str = "invtsc";

/// Feature policies that make a requested CPU feature mandatory.
pub const MANDATORY_FEATURE_POLICIES: [&str; 2] = ["require", "force"];

/// Virtual machine instance as observed by the controller.
///
/// Only the fields relevant for migration-compatibility scheduling are
/// modelled; unknown fields are ignored on deserialization.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstance",
    plural = "virtualmachineinstances",
    shortname = "vmi",
    namespaced,
    status = "VirtualMachineInstanceStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    #[serde(default)]
    pub domain: DomainSpec,
    /// Guest architecture, e.g. `amd64` or `arm64`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Cpu>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Features>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<CpuFeature>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuFeature {
    pub name: String,
    /// One of `force`, `require`, `optional`, `disable`, `forbid`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

impl CpuFeature {
    pub fn new(name: impl Into<String>, policy: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: Some(policy.into()),
        }
    }

    /// Whether the guest cannot start without this feature.
    pub fn is_mandatory(&self) -> bool {
        self.policy
            .as_deref()
            .is_some_and(|policy| MANDATORY_FEATURE_POLICIES.contains(&policy))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperv: Option<FeatureHyperv>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureHyperv {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reenlightenment: Option<FeatureState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceStatus {
    /// Node the instance is currently running on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology_hints: Option<TopologyHints>,
}

/// Placement constraints recorded on an instance when it is admitted.
///
/// Once recorded the hints never change for the lifetime of the instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsc_frequency: Option<i64>,
}

impl VirtualMachineInstance {
    /// Name of the node the instance is assigned to, if any.
    pub fn node_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|status| status.node_name.as_deref())
            .filter(|name| !name.is_empty())
    }

    /// Recorded TSC frequency hint, if any.
    pub fn tsc_frequency_hint(&self) -> Option<i64> {
        self.status
            .as_ref()
            .and_then(|status| status.topology_hints)
            .and_then(|hints| hints.tsc_frequency)
    }

    pub fn cpu_features(&self) -> &[CpuFeature] {
        self.spec
            .domain
            .cpu
            .as_ref()
            .map(|cpu| cpu.features.as_slice())
            .unwrap_or_default()
    }

    pub fn has_hyperv_reenlightenment(&self) -> bool {
        self.spec
            .domain
            .features
            .as_ref()
            .and_then(|features| features.hyperv.as_ref())
            .and_then(|hyperv| hyperv.reenlightenment.as_ref())
            .and_then(|state| state.enabled)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn deserialize_vmi_with_hints_and_features() {
        let json = r#"{
            "apiVersion": "kubevirt.io/v1",
            "kind": "VirtualMachineInstance",
            "metadata": {"name": "testvmi", "namespace": "default"},
            "spec": {
                "architecture": "amd64",
                "domain": {
                    "cpu": {"features": [{"name": "invtsc", "policy": "require"}]},
                    "devices": {}
                },
                "nodeSelector": {"zone": "a"}
            },
            "status": {
                "nodeName": "mynode",
                "topologyHints": {"tscFrequency": 123}
            }
        }"#;

        let vmi: VirtualMachineInstance =
            serde_json::from_str(json).expect("should deserialize vmi");

        assert_eq!(vmi.node_name(), Some("mynode"));
        assert_eq!(vmi.tsc_frequency_hint(), Some(123));
        assert_eq!(vmi.cpu_features().len(), 1);
        assert!(vmi.cpu_features()[0].is_mandatory());
        assert_eq!(vmi.spec.architecture.as_deref(), Some("amd64"));
    }

    #[test]
    fn empty_node_name_is_unassigned() {
        let mut vmi = VirtualMachineInstance::new("testvmi", VirtualMachineInstanceSpec::default());
        vmi.status = Some(VirtualMachineInstanceStatus {
            node_name: Some(String::new()),
            topology_hints: None,
        });

        assert_eq!(vmi.node_name(), None);
        assert_eq!(vmi.tsc_frequency_hint(), None);
    }

    #[test]
    fn optional_feature_policy_is_not_mandatory() {
        assert!(!CpuFeature::new(INVTSC_FEATURE, "optional").is_mandatory());
        assert!(CpuFeature::new(INVTSC_FEATURE, "force").is_mandatory());
        assert!(!CpuFeature {
            name: INVTSC_FEATURE.to_string(),
            policy: None
        }
        .is_mandatory());
    }

    #[test]
    fn reenlightenment_defaults_to_disabled() {
        let mut vmi = VirtualMachineInstance::new("testvmi", VirtualMachineInstanceSpec::default());
        assert!(!vmi.has_hyperv_reenlightenment());

        vmi.spec.domain.features = Some(Features {
            hyperv: Some(FeatureHyperv {
                reenlightenment: Some(FeatureState {
                    enabled: Some(true),
                }),
            }),
        });
        assert!(vmi.has_hyperv_reenlightenment());
    }
}
