//! Selection of the newest CPU model a migrating instance can rely on.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;

use api_types::labels::CPU_MODEL_LABEL;
use api_types::labels::CPU_MODEL_VENDOR_LABEL;
use api_types::labels::LABEL_TRUE;
use api_types::VirtualMachineInstance;
use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::debug;

use super::error::TopologyError;
use super::filter::filter_nodes;
use super::filter::matches_node_selector;
use super::filter::matches_required_node_affinity;
use super::filter::NodePredicate;
use super::store::NodeStore;

/// Models launched before this year are never selected.
pub const MINIMUM_MODEL_YEAR: u16 = 2007;

const MIN_SUPPORT_THRESHOLD: usize = 2;
const MAX_SUPPORT_THRESHOLD: usize = 5;

/// Launch year of the x86 CPU models a node can advertise.
static CPU_MODEL_LAUNCH_YEARS: LazyLock<HashMap<&'static str, u16>> = LazyLock::new(|| {
    HashMap::from([
        // Intel
        ("Conroe", 2006),
        ("Penryn", 2007),
        ("Nehalem", 2008),
        ("Nehalem-IBRS", 2008),
        ("Westmere", 2010),
        ("Westmere-IBRS", 2010),
        ("SandyBridge", 2011),
        ("SandyBridge-IBRS", 2011),
        ("IvyBridge", 2012),
        ("IvyBridge-IBRS", 2012),
        ("Haswell", 2013),
        ("Haswell-IBRS", 2013),
        ("Haswell-noTSX", 2013),
        ("Haswell-noTSX-IBRS", 2013),
        ("Broadwell", 2014),
        ("Broadwell-IBRS", 2014),
        ("Broadwell-noTSX", 2014),
        ("Broadwell-noTSX-IBRS", 2014),
        ("Skylake-Client", 2015),
        ("Skylake-Client-IBRS", 2015),
        ("Skylake-Client-noTSX-IBRS", 2015),
        ("Skylake-Server", 2017),
        ("Skylake-Server-IBRS", 2017),
        ("Skylake-Server-noTSX-IBRS", 2017),
        ("Denverton", 2017),
        ("KnightsMill", 2017),
        ("Cascadelake-Server", 2019),
        ("Cascadelake-Server-noTSX", 2019),
        ("Snowridge", 2020),
        ("Cooperlake", 2020),
        ("Icelake-Server", 2021),
        ("Icelake-Server-noTSX", 2021),
        ("SapphireRapids", 2023),
        ("GraniteRapids", 2024),
        ("SierraForest", 2024),
        // AMD
        ("Opteron_G1", 2004),
        ("Opteron_G2", 2006),
        ("Opteron_G3", 2007),
        ("Opteron_G4", 2011),
        ("Opteron_G5", 2012),
        ("EPYC", 2017),
        ("EPYC-IBPB", 2018),
        ("EPYC-Rome", 2019),
        ("EPYC-Milan", 2021),
        ("EPYC-Genoa", 2022),
        ("EPYC-Turin", 2024),
    ])
});

pub fn cpu_model_launch_year(model: &str) -> Option<u16> {
    CPU_MODEL_LAUNCH_YEARS.get(model).copied()
}

/// Number of peer nodes that must support a model before it is selected.
///
/// This is the middle value of `2`, `candidates / 3` and `5`: small clusters
/// need two supporting nodes, large ones never more than five.
pub fn support_threshold(candidates: usize) -> usize {
    let mut bounds = [MIN_SUPPORT_THRESHOLD, candidates / 3, MAX_SUPPORT_THRESHOLD];
    bounds.sort_unstable();
    bounds[1]
}

/// CPU models advertised on the node.
pub fn cpu_models_on_node(node: &Node) -> impl Iterator<Item = &str> {
    node.labels().iter().filter_map(|(key, value)| {
        key.strip_prefix(CPU_MODEL_LABEL)
            .filter(|model| !model.is_empty() && value == LABEL_TRUE)
    })
}

fn vendor_label(node: &Node) -> Option<&str> {
    node.labels()
        .keys()
        .find(|key| key.contains(CPU_MODEL_VENDOR_LABEL))
        .map(String::as_str)
}

/// Newest model of `models` supported by at least `threshold` nodes and
/// not older than [`MINIMUM_MODEL_YEAR`].
///
/// Equal years prefer the better supported model, then the smaller name.
pub fn newest_supported_model<'a>(
    models: impl IntoIterator<Item = &'a str>,
    support: &HashMap<String, usize>,
    threshold: usize,
) -> Option<&'a str> {
    models
        .into_iter()
        .filter_map(|model| {
            let year = cpu_model_launch_year(model)?;
            let count = support.get(model).copied().unwrap_or(0);
            (year >= MINIMUM_MODEL_YEAR && count >= threshold).then_some((model, year, count))
        })
        .max_by(|(a_model, a_year, a_count), (b_model, b_year, b_count)| {
            a_year
                .cmp(b_year)
                .then(a_count.cmp(b_count))
                .then(b_model.cmp(a_model))
        })
        .map(|(model, _, _)| model)
}

/// Picks CPU models for instances migrating away from an initial node.
pub struct CpuModelMatcher {
    node_store: Arc<dyn NodeStore>,
}

impl CpuModelMatcher {
    pub fn new(node_store: Arc<dyn NodeStore>) -> Self {
        Self { node_store }
    }

    /// Newest CPU model of the initial node that enough same-vendor nodes,
    /// satisfying the instance's placement constraints, also support.
    ///
    /// # Errors
    ///
    /// - [`TopologyError::NotFound`] if the initial node is not in the cache
    /// - [`TopologyError::NoVendorLabel`] if the initial node has no vendor
    /// - [`TopologyError::NoCompatibleModel`] if no model qualifies
    pub fn best_match_model_for_initial_node(
        &self,
        initial_node_name: &str,
        vmi: Option<&VirtualMachineInstance>,
    ) -> Result<String, Report<TopologyError>> {
        let initial_node =
            self.node_store
                .get_node(initial_node_name)
                .ok_or_else(|| {
                    Report::new(TopologyError::NotFound {
                        node_name: initial_node_name.to_string(),
                    })
                })?;

        let vendor = vendor_label(&initial_node).ok_or_else(|| {
            Report::new(TopologyError::NoVendorLabel {
                node_name: initial_node_name.to_string(),
            })
        })?;

        let node_selector = vmi.and_then(|vmi| vmi.spec.node_selector.as_ref());
        let affinity = vmi.and_then(|vmi| vmi.spec.affinity.as_ref());
        let predicates: [NodePredicate<'_>; 3] = [
            Box::new(move |node: &Node| node.labels().contains_key(vendor)),
            matches_node_selector(node_selector),
            matches_required_node_affinity(affinity),
        ];
        let candidates = filter_nodes(self.node_store.list_nodes(), &predicates);

        let mut support: HashMap<String, usize> = HashMap::new();
        for node in &candidates {
            for model in cpu_models_on_node(node) {
                *support.entry(model.to_string()).or_default() += 1;
            }
        }

        let threshold = support_threshold(candidates.len());
        debug!(
            node = %initial_node_name,
            candidates = candidates.len(),
            threshold,
            "Selecting cpu model"
        );

        newest_supported_model(cpu_models_on_node(&initial_node), &support, threshold)
            .map(str::to_string)
            .ok_or_else(|| {
                Report::new(TopologyError::NoCompatibleModel {
                    node_name: initial_node.name_any(),
                })
                .attach_printable(format!(
                    "{} candidate nodes, support threshold {threshold}",
                    candidates.len()
                ))
            })
    }
}
