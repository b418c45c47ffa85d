//! Cluster-scoped shared state
//!
//! The only mutable surface shared between tasks of one cluster: the master
//! and worker node maps and the one-shot bootstrap signal. Tasks reach it
//! through the [`ClusterRegistry`] by cluster id.

use skiff_core::domain::kube::{CaBundle, Kube};
use skiff_core::domain::machine::Machine;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::repository::kube_repository;
use crate::store::{Store, StoreError};

#[derive(Debug, Error, PartialEq)]
pub enum BarrierError {
    #[error("bootstrap master not ready after {0:?}")]
    BootstrapTimeout(Duration),

    #[error("no node became available after {0:?}")]
    NodeTimeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error, PartialEq)]
pub enum NodeMapError {
    #[error("node map is full ({0} entries)")]
    Full(usize),
}

/// Machines of one role, keyed by machine id
///
/// Bounded by the planned node count. Entries are only ever added; adding
/// an id that is already present keeps the original record.
#[derive(Debug)]
pub struct NodeMap {
    nodes: Mutex<BTreeMap<String, Machine>>,
    capacity: Mutex<usize>,
    count: watch::Sender<usize>,
}

impl NodeMap {
    pub fn new(capacity: usize) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            nodes: Mutex::new(BTreeMap::new()),
            capacity: Mutex::new(capacity),
            count,
        }
    }

    /// Adds `machine`; returns false when its id was already present
    pub fn add(&self, machine: Machine) -> Result<bool, NodeMapError> {
        let capacity = *self.capacity.lock().unwrap_or_else(|e| e.into_inner());
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());

        if nodes.contains_key(&machine.id) {
            return Ok(false);
        }
        if nodes.len() >= capacity {
            return Err(NodeMapError::Full(capacity));
        }

        nodes.insert(machine.id.clone(), machine);
        self.count.send_replace(nodes.len());
        Ok(true)
    }

    pub fn get(&self, id: &str) -> Option<Machine> {
        self.nodes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Consistent copy of every entry
    pub fn range(&self) -> BTreeMap<String, Machine> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        *self.capacity.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Raises the bound for nodes added to a running cluster
    pub fn reserve(&self, additional: usize) {
        *self.capacity.lock().unwrap_or_else(|e| e.into_inner()) += additional;
    }

    /// Waits until at least one machine is present
    pub async fn wait_for_first(
        &self,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Machine, BarrierError> {
        let mut rx = self.count.subscribe();

        tokio::select! {
            _ = cancel.cancelled() => return Err(BarrierError::Cancelled),
            res = tokio::time::timeout(deadline, rx.wait_for(|n| *n > 0)) => {
                if res.is_err() {
                    return Err(BarrierError::NodeTimeout(deadline));
                }
            }
        }

        self.range()
            .into_values()
            .next()
            .ok_or(BarrierError::NodeTimeout(deadline))
    }
}

/// Join material published once by the bootstrap master
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapMaterial {
    pub ca: CaBundle,
    pub token: String,
    /// Private address of the bootstrap master
    pub bootstrap_address: String,
}

/// Single-shot "first master ready" broadcast
#[derive(Debug)]
pub struct BootstrapSignal {
    tx: watch::Sender<Option<Arc<BootstrapMaterial>>>,
}

impl BootstrapSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Publishes the material; later calls are ignored and return false
    pub fn publish(&self, material: BootstrapMaterial) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(Arc::new(material));
            true
        })
    }

    pub fn get(&self) -> Option<Arc<BootstrapMaterial>> {
        self.tx.borrow().clone()
    }

    pub fn is_published(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Blocks until the material is published, the deadline passes or the
    /// task is cancelled
    pub async fn wait(
        &self,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Arc<BootstrapMaterial>, BarrierError> {
        let mut rx = self.tx.subscribe();

        let published = tokio::select! {
            _ = cancel.cancelled() => return Err(BarrierError::Cancelled),
            res = tokio::time::timeout(deadline, rx.wait_for(Option::is_some)) => {
                match res {
                    Ok(Ok(material)) => material.clone(),
                    _ => return Err(BarrierError::BootstrapTimeout(deadline)),
                }
            }
        };

        published.ok_or(BarrierError::BootstrapTimeout(deadline))
    }
}

impl Default for BootstrapSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state of one cluster
#[derive(Debug)]
pub struct ClusterState {
    pub cluster_id: Uuid,
    pub masters: NodeMap,
    pub workers: NodeMap,
    pub bootstrap: BootstrapSignal,
    /// Serializes read-modify-write cycles on the cluster's Kube record
    pub kube_lock: tokio::sync::Mutex<()>,
}

impl ClusterState {
    pub fn new(cluster_id: Uuid, masters: usize, workers: usize) -> Self {
        Self {
            cluster_id,
            masters: NodeMap::new(masters),
            workers: NodeMap::new(workers),
            bootstrap: BootstrapSignal::new(),
            kube_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Rebuilds the state of a cluster from its persisted record
    ///
    /// Used after a process restart. The bootstrap signal is raised again if
    /// the record already carries join material.
    pub fn from_kube(kube: &Kube) -> Self {
        let masters = kube.profile.master_count().max(kube.masters.len());
        let workers = kube.profile.worker_count().max(kube.workers.len());
        let state = Self::new(kube.id, masters, workers);

        for machine in kube.masters.values() {
            let _ = state.masters.add(machine.clone());
        }
        for machine in kube.workers.values() {
            let _ = state.workers.add(machine.clone());
        }

        if let (Some(ca), Some(address)) = (&kube.ca, &kube.bootstrap_address) {
            state.bootstrap.publish(BootstrapMaterial {
                ca: ca.clone(),
                token: kube.bootstrap_token.clone(),
                bootstrap_address: address.clone(),
            });
        }

        debug!(
            "Rebuilt state of cluster {}: {} masters, {} workers, bootstrap published: {}",
            kube.id,
            state.masters.len(),
            state.workers.len(),
            state.bootstrap.is_published()
        );
        state
    }

    /// Bootstrap master, once it has been created
    pub fn bootstrap_master(&self) -> Option<Machine> {
        self.masters.range().into_values().find(|m| m.is_bootstrap)
    }

    /// Read-modify-write of the cluster's Kube record
    ///
    /// Returns the updated record, or `None` if the cluster has no record
    /// (anymore).
    pub async fn update_kube<F>(&self, store: &dyn Store, f: F) -> Result<Option<Kube>, StoreError>
    where
        F: FnOnce(&mut Kube) + Send,
    {
        let _guard = self.kube_lock.lock().await;

        let Some(mut kube) = kube_repository::find_by_id(store, self.cluster_id).await? else {
            debug!("Cluster {} has no record to update", self.cluster_id);
            return Ok(None);
        };
        f(&mut kube);
        kube_repository::save(store, &kube).await?;
        Ok(Some(kube))
    }
}

/// Cluster id → shared state
#[derive(Debug, Clone, Default)]
pub struct ClusterRegistry {
    clusters: Arc<Mutex<HashMap<Uuid, Arc<ClusterState>>>>,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<ClusterState>> {
        self.clusters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Registers `state` unless the cluster is already known; returns the
    /// registered entry either way
    pub fn insert(&self, state: ClusterState) -> Arc<ClusterState> {
        let mut clusters = self.clusters.lock().unwrap_or_else(|e| e.into_inner());
        clusters
            .entry(state.cluster_id)
            .or_insert_with(|| {
                info!("Registered state of cluster {}", state.cluster_id);
                Arc::new(state)
            })
            .clone()
    }

    pub fn remove(&self, id: Uuid) {
        self.clusters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }
}
