use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use api_types::VirtualMachineInstance;
use async_trait::async_trait;
use error_stack::Report;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::reflector;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::reflector::Store;
use kube::runtime::watcher;
use kube::runtime::WatchStreamExt;
use kube::Api;
use kube::Resource;
use serde::de::DeserializeOwned;
use tokio::select;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::domain::topology::NodeStore;
use crate::domain::topology::TopologyError;
use crate::domain::topology::VmiStore;
use crate::infrastructure::k8s::KubernetesError;

/// Eventually consistent mirror of all objects of one kind.
#[derive(Clone)]
pub struct ReflectorCache<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    store: Store<K>,
    synced: watch::Receiver<bool>,
}

/// Feeds a [`ReflectorCache`] from a watch on the API server.
pub struct ReflectorDriver<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    api: Api<K>,
    writer: reflector::store::Writer<K>,
    synced: watch::Sender<bool>,
}

/// Cache for every object `api` can see and the driver that fills it.
pub fn reflector_cache<K>(api: Api<K>) -> (ReflectorCache<K>, ReflectorDriver<K>)
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    let (store, writer) = reflector::store();
    let (synced_tx, synced_rx) = watch::channel(false);
    (
        ReflectorCache {
            store,
            synced: synced_rx,
        },
        ReflectorDriver {
            api,
            writer,
            synced: synced_tx,
        },
    )
}

impl<K> ReflectorCache<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    pub fn state(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    pub fn get(&self, name: &str) -> Option<Arc<K>> {
        self.store.get(&ObjectRef::new(name))
    }

    /// Resolves after the first complete listing arrived.
    ///
    /// # Errors
    ///
    /// - [`TopologyError::CacheSync`] if the driver stopped before syncing
    pub async fn wait_until_ready(&self) -> Result<(), Report<TopologyError>> {
        let mut synced = self.synced.clone();
        synced
            .wait_for(|synced| *synced)
            .await
            .map(|_| ())
            .map_err(|e| {
                Report::new(TopologyError::CacheSync)
                    .attach_printable(format!("reflector driver stopped: {e}"))
            })
    }
}

impl<K> ReflectorDriver<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    /// Watches until cancelled. Watch errors are retried with backoff.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::WatchFailed`] if the watch stream terminates
    #[tracing::instrument(skip_all, fields(kind = %K::kind(&K::DynamicType::default())))]
    pub async fn run(
        self,
        cancellation_token: CancellationToken,
    ) -> Result<(), Report<KubernetesError>> {
        info!("Starting reflector");

        let synced = self.synced;
        let mut stream = reflector(self.writer, watcher(self.api, watcher::Config::default()))
            .default_backoff()
            .boxed();

        loop {
            select! {
                _ = cancellation_token.cancelled() => {
                    info!("Reflector shutdown requested");
                    break;
                }
                event = stream.next() => match event {
                    Some(Ok(_)) => {
                        if !*synced.borrow() {
                            debug!("Reflector completed initial listing");
                            synced.send_replace(true);
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Watch stream error, retrying: {e}");
                    }
                    None => {
                        return Err(Report::new(KubernetesError::WatchFailed {
                            message: "watch stream ended unexpectedly".to_string(),
                        }));
                    }
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl NodeStore for ReflectorCache<Node> {
    fn list_nodes(&self) -> Vec<Arc<Node>> {
        self.state()
    }

    fn get_node(&self, name: &str) -> Option<Arc<Node>> {
        self.get(name)
    }

    async fn wait_until_synced(&self) -> Result<(), Report<TopologyError>> {
        self.wait_until_ready().await
    }
}

#[async_trait]
impl VmiStore for ReflectorCache<VirtualMachineInstance> {
    fn list_vmis(&self) -> Vec<Arc<VirtualMachineInstance>> {
        self.state()
    }

    async fn wait_until_synced(&self) -> Result<(), Report<TopologyError>> {
        self.wait_until_ready().await
    }
}
