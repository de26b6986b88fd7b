//! Composable node predicates.
//!
//! A predicate is a plain function over a node snapshot. [`filter_nodes`]
//! keeps the nodes passing every predicate, [`not`] and [`or`] combine them.

use std::collections::BTreeMap;
use std::sync::Arc;

use api_types::labels::LABEL_TRUE;
use api_types::labels::NODE_SCHEDULABLE;
use api_types::VirtualMachineInstance;
use k8s_openapi::api::core::v1::Affinity;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::NodeSelectorRequirement;
use k8s_openapi::api::core::v1::NodeSelectorTerm;
use kube::ResourceExt;
use tracing::warn;

use super::tsc::tsc_frequency_from_node;

pub type NodePredicate<'a> = Box<dyn Fn(&Node) -> bool + Send + Sync + 'a>;

/// Keeps the nodes for which all predicates pass.
pub fn filter_nodes(
    nodes: impl IntoIterator<Item = Arc<Node>>,
    predicates: &[NodePredicate<'_>],
) -> Vec<Arc<Node>> {
    nodes
        .into_iter()
        .filter(|node| predicates.iter().all(|predicate| predicate(node.as_ref())))
        .collect()
}

pub fn not<'a>(predicate: impl Fn(&Node) -> bool + Send + Sync + 'a) -> NodePredicate<'a> {
    Box::new(move |node| !predicate(node))
}

/// Passes if any of the predicates passes.
pub fn or(predicates: Vec<NodePredicate<'_>>) -> NodePredicate<'_> {
    Box::new(move |node| predicates.iter().any(|predicate| predicate(node)))
}

pub fn is_schedulable(node: &Node) -> bool {
    node.labels()
        .get(NODE_SCHEDULABLE)
        .is_some_and(|value| value == LABEL_TRUE)
}

/// Whether the node exposes a valid, non-zero native TSC frequency.
pub fn has_inv_tsc_frequency(node: &Node) -> bool {
    match tsc_frequency_from_node(node) {
        Ok((frequency, _)) => frequency > 0,
        Err(e) => {
            warn!("Failed to read tsc frequency of node: {e:?}");
            false
        }
    }
}

/// Nodes able to present `frequency` to a guest.
///
/// A non-scalable node only ever matches its own exact frequency. Nodes
/// without a native frequency never match.
pub fn tsc_frequency_greater_equal(frequency: i64) -> NodePredicate<'static> {
    Box::new(move |node| match tsc_frequency_from_node(node) {
        Ok((node_frequency, scalable)) => {
            node_frequency > 0
                && ((scalable && node_frequency >= frequency)
                    || (!scalable && node_frequency == frequency))
        }
        Err(e) => {
            warn!("Failed to read tsc frequency of node: {e:?}");
            false
        }
    })
}

/// The node the instance is currently assigned to.
pub fn node_of_vmi(vmi: &VirtualMachineInstance) -> NodePredicate<'_> {
    Box::new(move |node| {
        vmi.node_name()
            .is_some_and(|node_name| node.metadata.name.as_deref() == Some(node_name))
    })
}

/// Nodes carrying every label of the selector with the same value.
pub fn matches_node_selector(selector: Option<&BTreeMap<String, String>>) -> NodePredicate<'_> {
    Box::new(move |node| {
        let labels = node.labels();
        selector.into_iter().flatten().all(|(key, value)| labels.get(key) == Some(value))
    })
}

/// Nodes satisfying the required node affinity, if there is one.
///
/// Terms are OR-ed, the requirements inside a term are AND-ed.
pub fn matches_required_node_affinity(affinity: Option<&Affinity>) -> NodePredicate<'_> {
    let required = affinity
        .and_then(|affinity| affinity.node_affinity.as_ref())
        .and_then(|node_affinity| {
            node_affinity
                .required_during_scheduling_ignored_during_execution
                .as_ref()
        });

    match required {
        None => Box::new(|_| true),
        Some(selector) => or(selector
            .node_selector_terms
            .iter()
            .map(matches_node_selector_term)
            .collect()),
    }
}

fn matches_node_selector_term(term: &NodeSelectorTerm) -> NodePredicate<'_> {
    let expressions = term.match_expressions.as_deref().unwrap_or_default();
    let fields = term.match_fields.as_deref().unwrap_or_default();

    Box::new(move |node| {
        if expressions.is_empty() && fields.is_empty() {
            return false;
        }
        expressions
            .iter()
            .all(|requirement| label_requirement_matches(requirement, node.labels()))
            && fields
                .iter()
                .all(|requirement| field_requirement_matches(requirement, node))
    })
}

fn label_requirement_matches(
    requirement: &NodeSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> bool {
    let values = requirement.values.as_deref().unwrap_or_default();
    let value = labels.get(&requirement.key);

    match requirement.operator.as_str() {
        "In" => value.is_some_and(|value| values.contains(value)),
        "NotIn" => !value.is_some_and(|value| values.contains(value)),
        "Exists" => value.is_some(),
        "DoesNotExist" => value.is_none(),
        "Gt" | "Lt" => {
            let [bound] = values else {
                return false;
            };
            let (Some(Ok(actual)), Ok(bound)) =
                (value.map(|v| v.parse::<i64>()), bound.parse::<i64>())
            else {
                return false;
            };
            if requirement.operator == "Gt" {
                actual > bound
            } else {
                actual < bound
            }
        }
        other => {
            warn!(operator = %other, "Unknown node selector operator");
            false
        }
    }
}

fn field_requirement_matches(requirement: &NodeSelectorRequirement, node: &Node) -> bool {
    if requirement.key != "metadata.name" {
        return false;
    }
    let values = requirement.values.as_deref().unwrap_or_default();
    let name = node.name_any();

    match requirement.operator.as_str() {
        "In" => values.contains(&name),
        "NotIn" => !values.contains(&name),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use api_types::labels::TSC_FREQUENCY_LABEL;
    use api_types::VirtualMachineInstanceSpec;
    use api_types::VirtualMachineInstanceStatus;
    use k8s_openapi::api::core::v1::NodeAffinity;
    use k8s_openapi::api::core::v1::NodeSelector;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::domain::topology::testing::node;
    use crate::domain::topology::testing::tsc_node;

    fn names(nodes: &[Arc<Node>]) -> Vec<String> {
        nodes.iter().map(|node| node.name_any()).collect()
    }

    fn requirement(key: &str, operator: &str, values: &[&str]) -> NodeSelectorRequirement {
        NodeSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: Some(values.iter().map(|v| v.to_string()).collect()),
        }
    }

    fn affinity(terms: Vec<NodeSelectorTerm>) -> Affinity {
        Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: terms,
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn schedulable() {
        assert!(is_schedulable(&node("a", &[(NODE_SCHEDULABLE, "true")])));
        assert!(!is_schedulable(&node("a", &[(NODE_SCHEDULABLE, "false")])));
        assert!(!is_schedulable(&node("a", &[])));
    }

    #[test]
    fn inv_tsc_frequency() {
        assert!(has_inv_tsc_frequency(&tsc_node("a", 123, false)));
        assert!(!has_inv_tsc_frequency(&node("a", &[])));
        assert!(!has_inv_tsc_frequency(&node("a", &[(TSC_FREQUENCY_LABEL, "x")])));
    }

    #[test]
    fn greater_equal_respects_scalability() {
        let scalable = tsc_node("a", 1000, true);
        let fixed = tsc_node("b", 1000, false);

        assert!(tsc_frequency_greater_equal(900)(&scalable));
        assert!(tsc_frequency_greater_equal(1000)(&scalable));
        assert!(!tsc_frequency_greater_equal(1001)(&scalable));

        assert!(!tsc_frequency_greater_equal(900)(&fixed));
        assert!(tsc_frequency_greater_equal(1000)(&fixed));
        assert!(!tsc_frequency_greater_equal(1000)(&node("c", &[(TSC_FREQUENCY_LABEL, "-1")])));
    }

    #[test]
    fn greater_equal_requires_a_native_frequency() {
        assert!(!tsc_frequency_greater_equal(0)(&node("a", &[])));
        assert!(!tsc_frequency_greater_equal(0)(&node("b", &[(TSC_FREQUENCY_LABEL, "0")])));
        assert!(!tsc_frequency_greater_equal(0)(&tsc_node("c", 1000, false)));
        assert!(tsc_frequency_greater_equal(0)(&tsc_node("d", 1000, true)));
    }

    #[test]
    fn node_of_vmi_matches_assigned_node() {
        let mut vmi = VirtualMachineInstance::new("vmi", VirtualMachineInstanceSpec::default());
        assert!(!node_of_vmi(&vmi)(&node("mynode", &[])));

        vmi.status = Some(VirtualMachineInstanceStatus {
            node_name: Some("mynode".to_string()),
            topology_hints: None,
        });
        assert!(node_of_vmi(&vmi)(&node("mynode", &[])));
        assert!(!node_of_vmi(&vmi)(&node("other", &[])));
    }

    #[test]
    fn filter_applies_all_predicates() {
        let nodes = vec![
            Arc::new(tsc_node("a", 100, true)),
            Arc::new(tsc_node("b", 200, true)),
            Arc::new(node("c", &[(NODE_SCHEDULABLE, "true")])),
            Arc::new(node("d", &[])),
        ];

        let filtered = filter_nodes(
            nodes.clone(),
            &[Box::new(is_schedulable), Box::new(has_inv_tsc_frequency)],
        );
        assert_eq!(names(&filtered), vec!["a", "b"]);

        let filtered = filter_nodes(nodes.clone(), &[not(is_schedulable)]);
        assert_eq!(names(&filtered), vec!["d"]);

        let filtered = filter_nodes(
            nodes.clone(),
            &[or(vec![
                tsc_frequency_greater_equal(150),
                not(has_inv_tsc_frequency),
            ])],
        );
        assert_eq!(names(&filtered), vec!["b", "c", "d"]);

        assert_eq!(filter_nodes(nodes, &[]).len(), 4);
    }

    #[test]
    fn node_selector() {
        let selector = BTreeMap::from([("zone".to_string(), "a".to_string())]);
        assert!(matches_node_selector(Some(&selector))(&node("n", &[("zone", "a")])));
        assert!(!matches_node_selector(Some(&selector))(&node("n", &[("zone", "b")])));
        assert!(!matches_node_selector(Some(&selector))(&node("n", &[])));
        assert!(matches_node_selector(None)(&node("n", &[])));
    }

    #[test]
    fn affinity_terms_are_ored() {
        let affinity = affinity(vec![
            NodeSelectorTerm {
                match_expressions: Some(vec![requirement("zone", "In", &["a", "b"])]),
                match_fields: None,
            },
            NodeSelectorTerm {
                match_expressions: None,
                match_fields: Some(vec![requirement("metadata.name", "In", &["special"])]),
            },
        ]);
        let predicate = matches_required_node_affinity(Some(&affinity));

        assert!(predicate(&node("n1", &[("zone", "b")])));
        assert!(predicate(&node("special", &[])));
        assert!(!predicate(&node("n2", &[("zone", "c")])));
    }

    #[test]
    fn affinity_operators() {
        let labeled = node("n", &[("gen", "5"), ("zone", "a")]);
        let cases = [
            (requirement("zone", "NotIn", &["b"]), true),
            (requirement("zone", "NotIn", &["a"]), false),
            (requirement("zone", "Exists", &[]), true),
            (requirement("rack", "DoesNotExist", &[]), true),
            (requirement("gen", "Gt", &["4"]), true),
            (requirement("gen", "Lt", &["4"]), false),
            (requirement("zone", "Gt", &["4"]), false),
            (requirement("gen", "Gt", &["4", "5"]), false),
            (requirement("zone", "Bogus", &[]), false),
        ];

        for (req, expected) in cases {
            let affinity = affinity(vec![NodeSelectorTerm {
                match_expressions: Some(vec![req.clone()]),
                match_fields: None,
            }]);
            assert_eq!(
                matches_required_node_affinity(Some(&affinity))(&labeled),
                expected,
                "{req:?}"
            );
        }
    }

    #[test]
    fn missing_or_empty_affinity() {
        assert!(matches_required_node_affinity(None)(&node("n", &[])));
        assert!(matches_required_node_affinity(Some(&Affinity::default()))(&node("n", &[])));

        let empty_term = affinity(vec![NodeSelectorTerm::default()]);
        assert!(!matches_required_node_affinity(Some(&empty_term))(&node("n", &[])));
    }
}
