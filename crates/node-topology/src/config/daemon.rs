use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::cluster::ClusterArgs;

#[derive(Parser, Clone, Debug)]
pub struct DaemonArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    #[arg(
        long,
        env = "NODE_TOPOLOGY_UPDATE_INTERVAL",
        default_value = "30",
        help = "Seconds between two node label reconciliations, a random jitter is added"
    )]
    pub node_topology_update_interval: u64,

    #[arg(
        long,
        help = "Enable metrics collection",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub enable_metrics: bool,

    #[arg(
        long,
        env = "NODE_TOPOLOGY_METRICS_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/logs/metrics.log",
        help = "Path for printing reconciliation metrics, e.g. /logs/metrics.log"
    )]
    pub metrics_file: PathBuf,
}

impl DaemonArgs {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.node_topology_update_interval.max(1))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    fn parse(args: &[&str]) -> DaemonArgs {
        DaemonArgs::try_parse_from(std::iter::once("daemon").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn zero_interval_is_clamped() {
        let args = parse(&["--node-topology-update-interval", "0"]);
        assert_eq!(args.update_interval(), Duration::from_secs(1));
    }

    #[test(tokio::test)]
    async fn cli_minimum_wins_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "minimumClusterTSCFrequency: 1000").unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let args = parse(&["--cluster-config", &path]);
        let config = args.cluster.resolve_cluster_config().await.unwrap();
        assert_eq!(config.minimum_cluster_tsc_frequency(), Some(1000));

        let args = parse(&["--cluster-config", &path, "--minimum-cluster-tsc-frequency", "2000"]);
        let config = args.cluster.resolve_cluster_config().await.unwrap();
        assert_eq!(config.minimum_cluster_tsc_frequency(), Some(2000));
    }

    #[test(tokio::test)]
    async fn missing_config_file_is_an_error() {
        let args = parse(&["--cluster-config", "/nonexistent/cluster.yaml"]);
        assert!(args.cluster.resolve_cluster_config().await.is_err());
    }
}
