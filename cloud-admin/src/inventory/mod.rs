//! Host inventory cache.
//!
//! The inventory is discovered lazily on first access and then kept for the
//! life of the [`InventoryHandle`]. A single task owns the cache state and
//! serves every request, so concurrent first readers queue behind one
//! discovery call instead of issuing their own. [`InventoryHandle::refresh`]
//! is the only way to replace a populated inventory.

pub mod hash;

use std::collections::BTreeMap;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot, watch};
use shared::types::{HostRecord, ServiceType};
use crate::discovery::{Discovery, MachineMappings};
use crate::error::{AdminError, Result};
use crate::ssh::{ConnectParams, SshTarget};

/// Host selection shared by the CLI and the HTTP API.
///
/// A partition or instance without a service type means node controllers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostQuery {
    pub service: Option<String>,
    pub partition: Option<String>,
    pub instance: Option<String>,
}

/// Immutable snapshot of discovered hosts, ordered by address.
#[derive(Debug, Clone)]
pub struct Inventory {
    hosts: BTreeMap<String, HostRecord>,
    connect: ConnectParams,
    populated_at: DateTime<Utc>,
}

impl Inventory {
    pub fn from_mappings(mappings: MachineMappings, connect: ConnectParams) -> Self {
        let hosts = mappings
            .into_iter()
            .map(|(address, services)| {
                let host = HostRecord::new(address.clone(), services);
                (address, host)
            })
            .collect();

        Self {
            hosts,
            connect,
            populated_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn populated_at(&self) -> DateTime<Utc> {
        self.populated_at
    }

    pub fn hosts(&self) -> impl Iterator<Item = &HostRecord> {
        self.hosts.values()
    }

    pub fn get(&self, address: &str) -> Option<&HostRecord> {
        self.hosts.get(address)
    }

    /// Insert or overwrite a host
    fn insert(&mut self, host: HostRecord) {
        self.hosts.insert(host.address.clone(), host);
    }

    /// SSH target for on-demand queries against `host`, using the
    /// connection parameters shared by the whole deployment.
    pub fn target(&self, host: &HostRecord) -> SshTarget {
        self.connect.target(host.address.clone())
    }

    pub fn fingerprint(&self) -> String {
        hash::compute_hash(self.hosts())
    }

    /// Hosts running at least one top-level service of `service_type`
    pub fn by_service_type(&self, service_type: ServiceType) -> Vec<&HostRecord> {
        self.hosts().filter(|h| h.has_service(service_type)).collect()
    }

    fn by_service_type_in(&self, service_type: ServiceType, partition: Option<&str>) -> Vec<&HostRecord> {
        match partition {
            Some(p) => self
                .hosts()
                .filter(|h| h.serves_partition(service_type, p))
                .collect(),
            None => self.by_service_type(service_type),
        }
    }

    /// Node controllers, optionally narrowed by instance or partition.
    ///
    /// An instance id that matches returns only the first host running it.
    /// One that matches nowhere falls back to the partition filter, or to an
    /// empty result when no partition is given.
    pub fn node_controllers(&self, partition: Option<&str>, instance_id: Option<&str>) -> Vec<&HostRecord> {
        match (instance_id, partition) {
            (Some(id), _) => match self.node_controller_for_instance(id) {
                Some(host) => vec![host],
                None => partition
                    .map(|p| self.node_controllers_in(p))
                    .unwrap_or_default(),
            },
            (None, Some(p)) => self.node_controllers_in(p),
            (None, None) => self.by_service_type(ServiceType::NodeController),
        }
    }

    pub fn node_controller_for_instance(&self, instance_id: &str) -> Option<&HostRecord> {
        self.hosts().find(|h| h.hosts_instance(instance_id))
    }

    pub fn node_controllers_in(&self, partition: &str) -> Vec<&HostRecord> {
        self.by_service_type_in(ServiceType::NodeController, Some(partition))
    }

    pub fn cluster_controllers(&self, partition: Option<&str>) -> Vec<&HostRecord> {
        self.by_service_type_in(ServiceType::ClusterController, partition)
    }

    pub fn storage_controllers(&self, partition: Option<&str>) -> Vec<&HostRecord> {
        self.by_service_type_in(ServiceType::StorageController, partition)
    }

    /// Fails only when the query names an unknown service type
    pub fn select(&self, query: &HostQuery) -> Result<Vec<&HostRecord>> {
        let partition = query.partition.as_deref();
        let instance_id = query.instance.as_deref();

        let Some(name) = query.service.as_deref() else {
            return Ok(match (partition, instance_id) {
                (None, None) => self.hosts().collect(),
                _ => self.node_controllers(partition, instance_id),
            });
        };

        let service_type: ServiceType = name.parse().map_err(AdminError::Configuration)?;
        Ok(match service_type {
            ServiceType::NodeController => self.node_controllers(partition, instance_id),
            ServiceType::ClusterController => self.cluster_controllers(partition),
            ServiceType::StorageController => self.storage_controllers(partition),
            ServiceType::CloudController
            | ServiceType::UserApi
            | ServiceType::ObjectStorageBackend => self.by_service_type(service_type),
        })
    }

    pub fn user_api_host(&self) -> Option<&HostRecord> {
        self.hosts().find(|h| h.has_service(ServiceType::UserApi))
    }

    pub fn object_storage_host(&self) -> Option<&HostRecord> {
        self.hosts().find(|h| h.has_service(ServiceType::ObjectStorageBackend))
    }
}

enum CacheState {
    Empty,
    Populated(Arc<Inventory>),
}

/// Commands sent to the inventory task
enum InventoryCommand {
    Snapshot(oneshot::Sender<Result<Arc<Inventory>>>),
    Refresh(oneshot::Sender<Result<Arc<Inventory>>>),
    Controller(oneshot::Sender<Result<(HostRecord, Arc<Inventory>)>>),
    Shutdown,
}

struct InventoryCache {
    state: CacheState,
    discovery: Arc<dyn Discovery>,
    connect: ConnectParams,
    controller: String,
    hash_tx: watch::Sender<Option<String>>,
}

impl InventoryCache {
    async fn get_or_populate(&mut self) -> Result<Arc<Inventory>> {
        if let CacheState::Populated(inventory) = &self.state {
            return Ok(inventory.clone());
        }
        self.populate().await
    }

    /// Run discovery and install the result. On failure the current state
    /// is left alone and the collaborator's error is returned as is.
    async fn populate(&mut self) -> Result<Arc<Inventory>> {
        let mappings = self.discovery.machine_mappings().await?;
        let inventory = Arc::new(Inventory::from_mappings(mappings, self.connect.clone()));

        if inventory.is_empty() {
            tracing::warn!("Discovery returned no hosts, will retry on next access");
            self.state = CacheState::Empty;
            let _ = self.hash_tx.send(None);
        } else {
            self.install(inventory.clone());
        }
        Ok(inventory)
    }

    fn install(&mut self, inventory: Arc<Inventory>) {
        let fingerprint = inventory.fingerprint();
        tracing::info!(
            "Inventory holds {} hosts as of {} ({})",
            inventory.len(),
            inventory.populated_at().to_rfc3339(),
            fingerprint
        );
        let _ = self.hash_tx.send(Some(fingerprint));
        self.state = CacheState::Populated(inventory);
    }

    /// Controller record together with the inventory that holds it
    async fn controller_host(&mut self) -> Result<(HostRecord, Arc<Inventory>)> {
        let inventory = self.get_or_populate().await?;
        if let Some(host) = inventory.get(&self.controller) {
            return Ok((host.clone(), inventory));
        }

        let host = HostRecord::new(self.controller.clone(), Vec::new());
        if inventory.is_empty() {
            return Ok((host, inventory));
        }

        tracing::debug!("Controller {} not reported by discovery, adding it", self.controller);
        let mut updated = (*inventory).clone();
        updated.insert(host.clone());
        let updated = Arc::new(updated);
        self.install(updated.clone());
        Ok((host, updated))
    }
}

/// Handle to the inventory task
#[derive(Clone)]
pub struct InventoryHandle {
    tx: mpsc::Sender<InventoryCommand>,
}

impl InventoryHandle {
    /// Spawn the inventory task. The cache starts empty; nothing is
    /// discovered until the first request.
    pub fn spawn(
        discovery: Arc<dyn Discovery>,
        connect: ConnectParams,
        controller: impl Into<String>,
        hash_tx: watch::Sender<Option<String>>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<InventoryCommand>(64);
        let mut cache = InventoryCache {
            state: CacheState::Empty,
            discovery,
            connect,
            controller: controller.into(),
            hash_tx,
        };

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    InventoryCommand::Snapshot(reply) => {
                        let result = cache.get_or_populate().await;
                        let _ = reply.send(result);
                    }
                    InventoryCommand::Refresh(reply) => {
                        let result = cache.populate().await;
                        if let Err(e) = &result {
                            tracing::warn!("Inventory refresh failed: {}", e);
                        }
                        let _ = reply.send(result);
                    }
                    InventoryCommand::Controller(reply) => {
                        let result = cache.controller_host().await;
                        let _ = reply.send(result);
                    }
                    InventoryCommand::Shutdown => {
                        tracing::info!("Inventory task shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> InventoryCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| AdminError::InventoryClosed)?;
        rx.await.map_err(|_| AdminError::InventoryClosed)?
    }

    /// Current inventory, running discovery first if the cache is empty
    pub async fn inventory(&self) -> Result<Arc<Inventory>> {
        self.request(InventoryCommand::Snapshot).await
    }

    /// Rediscover unconditionally and replace the cached inventory
    pub async fn refresh(&self) -> Result<Arc<Inventory>> {
        self.request(InventoryCommand::Refresh).await
    }

    /// Record for the configured cloud controller, inserted if discovery
    /// did not report it
    pub async fn controller_host(&self) -> Result<HostRecord> {
        let (host, _) = self.request(InventoryCommand::Controller).await?;
        Ok(host)
    }

    /// Controller record and the inventory it was resolved against, from a
    /// single request
    pub async fn inventory_with_controller(&self) -> Result<(Arc<Inventory>, HostRecord)> {
        let (host, inventory) = self.request(InventoryCommand::Controller).await?;
        Ok((inventory, host))
    }

    pub async fn user_api_host(&self) -> Result<Option<HostRecord>> {
        let inventory = self.inventory().await?;
        Ok(inventory.user_api_host().cloned())
    }

    pub async fn object_storage_host(&self) -> Result<Option<HostRecord>> {
        let inventory = self.inventory().await?;
        Ok(inventory.object_storage_host().cloned())
    }

    /// Stop the inventory task
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(InventoryCommand::Shutdown)
            .await
            .map_err(|_| AdminError::InventoryClosed)
    }
}
