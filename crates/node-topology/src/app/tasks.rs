use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::services::ApplicationServices;
use crate::config::DaemonArgs;
use crate::infrastructure::k8s::ReflectorDriver;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start all background tasks
    pub fn spawn_all_tasks(
        &mut self,
        services: ApplicationServices,
        daemon_args: &DaemonArgs,
    ) -> Result<()> {
        let ApplicationServices {
            node_reflector,
            vmi_reflector,
            updater,
        } = services;

        let node_reflector_task = self.spawn_reflector_task("node", node_reflector);
        self.tasks.push(node_reflector_task);

        let vmi_reflector_task = self.spawn_reflector_task("virtual machine instance", vmi_reflector);
        self.tasks.push(vmi_reflector_task);

        let updater_task = {
            let interval = daemon_args.update_interval();
            let token = self.cancellation_token.clone();
            tokio::spawn(async move {
                tracing::info!("Starting node topology updater task");
                if let Err(e) = updater.run(interval, token).await {
                    tracing::error!("Node topology updater failed: {e:?}");
                } else {
                    tracing::info!("Node topology updater task completed");
                }
            })
        };
        self.tasks.push(updater_task);

        Ok(())
    }

    fn spawn_reflector_task<K>(&self, kind: &'static str, driver: ReflectorDriver<K>) -> JoinHandle<()>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
        K::DynamicType: Default + Eq + std::hash::Hash + Clone + Send + Sync,
    {
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tracing::info!("Starting {kind} reflector task");
            if let Err(e) = driver.run(token).await {
                tracing::error!("The {kind} reflector failed: {e:?}");
            } else {
                tracing::info!("The {kind} reflector task completed");
            }
        })
    }

    /// wait for tasks to complete or receive shutdown signal
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl+C: {e}");
                    }
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                })
            }
        };

        tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                self.cancellation_token.cancel();

                self.wait_for_tasks_with_timeout(SHUTDOWN_TIMEOUT).await;
            }
            // Wait for any task to complete unexpectedly
            result = futures::future::select_all(&mut self.tasks) => {
                let (result, _index, _remaining) = result;
                self.cancellation_token.cancel();
                if let Err(e) = result {
                    tracing::error!("Task completed with error: {e}");
                    return Err(e.into());
                }
                return Err(anyhow::anyhow!("Task completed unexpectedly"));
            }
        }

        Ok(())
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }
}
