use std::sync::Arc;

use anyhow::Result;
use api_types::VirtualMachineInstance;
use k8s_openapi::api::core::v1::Node;
use kube::Api;

use crate::app::Application;
use crate::app::ApplicationServices;
use crate::config::DaemonArgs;
use crate::domain::topology::NodeTopologyUpdater;
use crate::domain::topology::TopologyHinter;
use crate::infrastructure::k8s::reflector_cache;
use crate::infrastructure::k8s::KubeNodePatcher;
use crate::infrastructure::kube_client::init_kube_client;

/// Application builder
pub struct ApplicationBuilder {
    daemon_args: DaemonArgs,
}

impl ApplicationBuilder {
    pub fn new(daemon_args: DaemonArgs) -> Self {
        Self { daemon_args }
    }

    /// Build complete application
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        let cluster_config = self.daemon_args.cluster.resolve_cluster_config().await?;
        if let Some(minimum) = cluster_config.minimum_cluster_tsc_frequency() {
            tracing::info!("Using configured minimum cluster tsc frequency {minimum}");
        }

        let client = init_kube_client(self.daemon_args.cluster.kubeconfig.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize kube client: {e:?}"))?;

        let (node_cache, node_reflector) = reflector_cache(Api::<Node>::all(client.clone()));
        let (vmi_cache, vmi_reflector) =
            reflector_cache(Api::<VirtualMachineInstance>::all(client.clone()));

        let hinter = Arc::new(TopologyHinter::new(
            Arc::new(node_cache.clone()),
            Arc::new(vmi_cache.clone()),
            cluster_config,
        ));

        let updater = Arc::new(
            NodeTopologyUpdater::new(
                Arc::new(node_cache),
                Arc::new(vmi_cache),
                hinter,
                Arc::new(KubeNodePatcher::new(client)),
            )
            .with_metrics(self.daemon_args.enable_metrics),
        );

        let services = ApplicationServices {
            node_reflector,
            vmi_reflector,
            updater,
        };

        Ok(Application::new(services, self.daemon_args))
    }
}
