//! Periodic reconciliation of the schedulable TSC frequency labels.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use rand::Rng;
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::error::TopologyError;
use super::filter::filter_nodes;
use super::filter::has_inv_tsc_frequency;
use super::hinter::Hinter;
use super::store::NodePatcher;
use super::store::NodeStore;
use super::store::VmiStore;
use super::tsc::calculate_node_label_changes;
use crate::infrastructure::metrics::emit_update_stats;

/// Upper bound of the random extra wait, as a multiple of the interval.
pub const JITTER_FACTOR: f64 = 1.2;

/// Outcome of one reconciliation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl UpdateStats {
    pub fn nodes(&self) -> usize {
        self.updated + self.skipped + self.errors
    }
}

/// Frequencies every eligible node has to be able to serve.
///
/// # Errors
///
/// - [`TopologyError::NoCompatibleNode`] if the cluster has no baseline
pub fn required_frequencies(hinter: &dyn Hinter) -> Result<Vec<i64>, Report<TopologyError>> {
    let lowest = hinter.lowest_tsc_frequency_on_cluster()?;
    let mut required: BTreeSet<i64> = hinter.tsc_frequencies_in_use().into_iter().collect();
    required.insert(lowest);
    Ok(required.into_iter().collect())
}

pub struct NodeTopologyUpdater {
    node_store: Arc<dyn NodeStore>,
    vmi_store: Arc<dyn VmiStore>,
    hinter: Arc<dyn Hinter>,
    patcher: Arc<dyn NodePatcher>,
    enable_metrics: bool,
}

impl NodeTopologyUpdater {
    pub fn new(
        node_store: Arc<dyn NodeStore>,
        vmi_store: Arc<dyn VmiStore>,
        hinter: Arc<dyn Hinter>,
        patcher: Arc<dyn NodePatcher>,
    ) -> Self {
        Self {
            node_store,
            vmi_store,
            hinter,
            patcher,
            enable_metrics: false,
        }
    }

    pub fn with_metrics(mut self, enable_metrics: bool) -> Self {
        self.enable_metrics = enable_metrics;
        self
    }

    /// Extends `base` by a random share of up to `factor` times itself.
    fn duration_with_jitter(base_duration: Duration, factor: f64) -> Duration {
        if factor <= 0.0 {
            return base_duration;
        }
        let mut rng = rand::rng();
        let jitter = rng.random_range(0.0..factor) * base_duration.as_secs_f64();
        base_duration + Duration::from_secs_f64(jitter)
    }

    pub fn required_frequencies(&self) -> Result<Vec<i64>, Report<TopologyError>> {
        required_frequencies(self.hinter.as_ref())
    }

    /// Nodes whose labels the updater manages.
    pub fn candidate_nodes(&self) -> Vec<Arc<Node>> {
        filter_nodes(self.node_store.list_nodes(), &[Box::new(has_inv_tsc_frequency)])
    }

    /// Brings the labels of `nodes` in line with the required frequencies.
    pub async fn sync(&self, nodes: &[Arc<Node>]) -> UpdateStats {
        let mut stats = UpdateStats::default();

        let required = match self.required_frequencies() {
            Ok(required) => required,
            Err(e) => {
                warn!(
                    nodes = nodes.len(),
                    "Skipping node topology update, cluster tsc baseline unknown: {e:?}"
                );
                stats.skipped = nodes.len();
                return stats;
            }
        };

        for node in nodes {
            let node_name = node.name_any();
            let delta = match calculate_node_label_changes(node, &required) {
                Ok(delta) => delta,
                Err(e) => {
                    error!(node = %node_name, "Failed to calculate tsc label changes: {e:?}");
                    stats.errors += 1;
                    continue;
                }
            };

            if delta.is_empty() {
                stats.skipped += 1;
                continue;
            }

            debug!(node = %node_name, ?delta, "Patching tsc frequency labels");
            match self.patcher.patch_labels(&node_name, &delta).await {
                Ok(()) => stats.updated += 1,
                Err(e) => {
                    error!(node = %node_name, "Failed to patch tsc frequency labels: {e:?}");
                    stats.errors += 1;
                }
            }
        }

        stats
    }

    /// One full cycle against the current cache content.
    pub async fn run_once(&self) -> UpdateStats {
        let nodes = self.candidate_nodes();
        let stats = self.sync(&nodes).await;

        if stats.updated > 0 || stats.errors > 0 {
            info!(
                updated = stats.updated,
                skipped = stats.skipped,
                errors = stats.errors,
                "Updated node topology"
            );
        }
        if self.enable_metrics {
            emit_update_stats(&stats);
        }
        stats
    }

    /// Frequencies in use come from the instance mirror, so it has to be
    /// complete before any label is removed.
    async fn wait_until_synced(&self) -> Result<(), Report<TopologyError>> {
        self.node_store.wait_until_synced().await?;
        self.vmi_store.wait_until_synced().await?;
        debug!("Node and instance caches synced");
        Ok(())
    }

    #[tracing::instrument(skip(self, cancellation_token))]
    pub async fn run(
        &self,
        interval: Duration,
        cancellation_token: CancellationToken,
    ) -> Result<(), Report<TopologyError>> {
        info!("Starting node topology updater");

        select! {
            _ = cancellation_token.cancelled() => {
                info!("Node topology updater shutdown requested before cache sync");
                return Ok(());
            }
            result = self.wait_until_synced() => result?,
        }

        loop {
            self.run_once().await;

            select! {
                _ = cancellation_token.cancelled() => {
                    info!("Node topology updater shutdown requested");
                    break;
                }
                _ = sleep(Self::duration_with_jitter(interval, JITTER_FACTOR)) => {}
            }
        }

        Ok(())
    }
}
