//! Node fixtures shared by the topology unit tests.

use std::collections::BTreeMap;

use api_types::labels::NODE_SCHEDULABLE;
use api_types::labels::TSC_FREQUENCY_LABEL;
use api_types::labels::TSC_SCALABLE_LABEL;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub(crate) fn node(name: &str, labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        },
        spec: None,
        status: None,
    }
}

/// Schedulable node exposing the given native TSC frequency.
pub(crate) fn tsc_node(name: &str, frequency: i64, scalable: bool) -> Node {
    let frequency = frequency.to_string();
    node(
        name,
        &[
            (NODE_SCHEDULABLE, "true"),
            (TSC_FREQUENCY_LABEL, frequency.as_str()),
            (TSC_SCALABLE_LABEL, if scalable { "true" } else { "false" }),
        ],
    )
}
