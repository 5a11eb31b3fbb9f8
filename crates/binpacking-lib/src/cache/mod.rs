//! Kubernetes-backed snapshot sources
//!
//! Nodes and pods are mirrored into in-memory reflector stores by one
//! watcher task per kind. Scrapes read the stores and never call the API
//! server directly. Each watcher is torn down and recreated every resync
//! period, which forces a fresh list of the kind.

mod convert;

pub use convert::{node_snapshot, workload_snapshot};

use convert::{strip_node, strip_pod};

use crate::collector::{CacheError, CacheKind, NodeSource, SyncInfo, WorkloadSource};
use crate::models::{NodeSnapshot, WorkloadSnapshot};
use crate::observability::StructuredLogger;
use anyhow::{Context, Result};
use chrono::Utc;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::reflector::{self, store::Writer, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Config, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Build a client from an explicit kubeconfig, or the default
/// in-cluster / `~/.kube/config` resolution when none is given
pub async fn connect(kubeconfig: Option<PathBuf>) -> Result<Client> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(&path)
                .with_context(|| format!("Failed to read kubeconfig file: {}", path.display()))?;
            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .with_context(|| {
                    format!("Failed to create config from kubeconfig: {}", path.display())
                })?;
            Client::try_from(config)
                .context("Failed to create Kubernetes client from custom kubeconfig")
        }
        None => Client::try_default()
            .await
            .context("Failed to create Kubernetes client"),
    }
}

/// Node snapshots read from the reflector store
#[derive(Clone)]
pub struct NodeCache {
    store: Store<Node>,
    sync_info: Arc<SyncInfo>,
}

impl NodeSource for NodeCache {
    fn list(&self) -> Result<Vec<NodeSnapshot>, CacheError> {
        if !self.sync_info.node_synced() {
            return Err(CacheError::NotSynced(CacheKind::Node));
        }
        Ok(self.store.state().iter().map(|n| node_snapshot(n)).collect())
    }
}

/// Pod snapshots read from the reflector store
#[derive(Clone)]
pub struct PodCache {
    store: Store<Pod>,
    sync_info: Arc<SyncInfo>,
}

impl WorkloadSource for PodCache {
    fn list(&self) -> Result<Vec<WorkloadSnapshot>, CacheError> {
        if !self.sync_info.pod_synced() {
            return Err(CacheError::NotSynced(CacheKind::Pod));
        }
        Ok(self
            .store
            .state()
            .iter()
            .map(|p| workload_snapshot(p))
            .collect())
    }
}

/// Running node and pod watchers with their stores
pub struct KubeCaches {
    nodes: NodeCache,
    pods: PodCache,
    sync_info: Arc<SyncInfo>,
    tasks: Vec<JoinHandle<()>>,
}

impl KubeCaches {
    /// Spawn the node and pod watchers.
    ///
    /// Both tasks stop when `shutdown` fires or its sender is dropped.
    pub fn start(
        client: Client,
        resync_period: Duration,
        logger: StructuredLogger,
        shutdown: &broadcast::Sender<()>,
    ) -> Self {
        let sync_info = Arc::new(SyncInfo::new(resync_period));

        let (node_store, node_writer) = reflector::store::<Node>();
        let (pod_store, pod_writer) = reflector::store::<Pod>();

        let tasks = vec![
            tokio::spawn(run_reflector(
                Api::<Node>::all(client.clone()),
                node_writer,
                strip_node,
                CacheKind::Node,
                sync_info.clone(),
                logger.clone(),
                shutdown.subscribe(),
            )),
            tokio::spawn(run_reflector(
                Api::<Pod>::all(client),
                pod_writer,
                strip_pod,
                CacheKind::Pod,
                sync_info.clone(),
                logger,
                shutdown.subscribe(),
            )),
        ];

        info!(
            resync_period_secs = resync_period.as_secs(),
            "Started node and pod watchers"
        );

        Self {
            nodes: NodeCache {
                store: node_store,
                sync_info: sync_info.clone(),
            },
            pods: PodCache {
                store: pod_store,
                sync_info: sync_info.clone(),
            },
            sync_info,
            tasks,
        }
    }

    pub fn nodes(&self) -> NodeCache {
        self.nodes.clone()
    }

    pub fn pods(&self) -> PodCache {
        self.pods.clone()
    }

    pub fn sync_info(&self) -> Arc<SyncInfo> {
        self.sync_info.clone()
    }

    /// Wait for both watcher tasks to finish after shutdown
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Cache watcher task failed");
            }
        }
    }
}

/// Mirror one kind into `writer` until shutdown, relisting every resync period.
///
/// `strip` trims each object before it is stored.
async fn run_reflector<K>(
    api: Api<K>,
    mut writer: Writer<K>,
    strip: fn(&mut K),
    cache: CacheKind,
    sync_info: Arc<SyncInfo>,
    logger: StructuredLogger,
    mut shutdown: broadcast::Receiver<()>,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    let resync_period = sync_info.resync_period();
    let resync_enabled = !resync_period.is_zero();

    loop {
        let stream = watcher(api.clone(), watcher::Config::default()).default_backoff();
        tokio::pin!(stream);
        let resync = tokio::time::sleep(resync_period);
        tokio::pin!(resync);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(cache = %cache, "Cache watcher shutting down");
                    return;
                }
                _ = &mut resync, if resync_enabled => {
                    debug!(cache = %cache, "Resync period elapsed, relisting");
                    break;
                }
                event = stream.next() => match event {
                    Some(Ok(event)) => {
                        let event = event.modify(strip);
                        writer.apply_watcher_event(&event);
                        if let watcher::Event::Restarted(objects) = &event {
                            sync_info.mark_synced(cache, Utc::now());
                            logger.log_cache_synced(cache.as_str(), objects.len());
                        }
                    }
                    Some(Err(e)) => {
                        warn!(cache = %cache, error = %e, "Watch stream error");
                    }
                    None => {
                        warn!(cache = %cache, "Watch stream ended unexpectedly, restarting");
                        break;
                    }
                }
            }
        }
    }
}
