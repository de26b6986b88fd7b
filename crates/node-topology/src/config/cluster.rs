use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;

/// Cluster wide scheduling configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterConfig {
    #[serde(
        rename = "minimumClusterTSCFrequency",
        deserialize_with = "deserialize_optional_i64_from_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub minimum_cluster_tsc_frequency: Option<i64>,
}

impl ClusterConfig {
    /// Configured frequency floor, non-positive values count as unset.
    pub fn minimum_cluster_tsc_frequency(&self) -> Option<i64> {
        self.minimum_cluster_tsc_frequency
            .filter(|frequency| *frequency > 0)
    }

    /// Overrides the floor when `minimum` is given.
    pub fn with_minimum_cluster_tsc_frequency(mut self, minimum: Option<i64>) -> Self {
        if minimum.is_some() {
            self.minimum_cluster_tsc_frequency = minimum;
        }
        self
    }
}

/// Accepts integers as well as their string representation.
fn deserialize_optional_i64_from_string<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(i64),
    }

    match Option::<StringOrInt>::deserialize(deserializer)? {
        Some(StringOrInt::String(s)) => s.trim().parse::<i64>().map(Some).map_err(|e| {
            serde::de::Error::custom(format!("Failed to parse integer from string '{s}': {e}"))
        }),
        Some(StringOrInt::Int(i)) => Ok(Some(i)),
        None => Ok(None),
    }
}

/// Cluster access and scheduling configuration shared by all commands.
#[derive(Args, Clone, Debug)]
pub struct ClusterArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "MINIMUM_CLUSTER_TSC_FREQUENCY",
        help = "Lowest TSC frequency in Hz to assume for the cluster, overrides node labels and the cluster config file"
    )]
    pub minimum_cluster_tsc_frequency: Option<i64>,

    #[arg(
        long,
        env = "NODE_TOPOLOGY_CLUSTER_CONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to the cluster configuration YAML, e.g. /etc/node-topology/cluster.yaml"
    )]
    pub cluster_config: Option<PathBuf>,
}

impl ClusterArgs {
    /// Cluster configuration from the optional file, overlaid with the CLI floor.
    pub async fn resolve_cluster_config(&self) -> anyhow::Result<ClusterConfig> {
        let config = match &self.cluster_config {
            Some(path) => load_cluster_config(path).await?,
            None => ClusterConfig::default(),
        };
        Ok(config.with_minimum_cluster_tsc_frequency(self.minimum_cluster_tsc_frequency))
    }
}

/// Load the cluster configuration from a YAML file
pub async fn load_cluster_config(path: &Path) -> anyhow::Result<ClusterConfig> {
    tracing::info!("Loading cluster configuration from {:?}", path);

    let yaml_content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read cluster config {}", path.display()))?;

    let config: ClusterConfig = serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("failed to parse cluster config {}", path.display()))?;

    Ok(config)
}
