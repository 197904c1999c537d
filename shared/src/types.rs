use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use crate::protocol;

/// Role a service plays in the cloud deployment.
/// Closed set: filters over it are exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    CloudController,
    ClusterController,
    StorageController,
    NodeController,
    UserApi,
    ObjectStorageBackend,
}

impl ServiceType {
    pub const ALL: [ServiceType; 6] = [
        ServiceType::CloudController,
        ServiceType::UserApi,
        ServiceType::ObjectStorageBackend,
        ServiceType::ClusterController,
        ServiceType::StorageController,
        ServiceType::NodeController,
    ];

    /// Parse the type name used by the control plane's admin tools.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            protocol::WIRE_CLOUD_CONTROLLER => Some(ServiceType::CloudController),
            protocol::WIRE_CLUSTER_CONTROLLER => Some(ServiceType::ClusterController),
            protocol::WIRE_STORAGE_CONTROLLER => Some(ServiceType::StorageController),
            protocol::WIRE_NODE_CONTROLLER => Some(ServiceType::NodeController),
            protocol::WIRE_USER_API => Some(ServiceType::UserApi),
            protocol::WIRE_OBJECT_STORAGE_BACKEND => Some(ServiceType::ObjectStorageBackend),
            _ => None,
        }
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            ServiceType::CloudController => protocol::WIRE_CLOUD_CONTROLLER,
            ServiceType::ClusterController => protocol::WIRE_CLUSTER_CONTROLLER,
            ServiceType::StorageController => protocol::WIRE_STORAGE_CONTROLLER,
            ServiceType::NodeController => protocol::WIRE_NODE_CONTROLLER,
            ServiceType::UserApi => protocol::WIRE_USER_API,
            ServiceType::ObjectStorageBackend => protocol::WIRE_OBJECT_STORAGE_BACKEND,
        }
    }

    /// Short code shown in the one-line host summary
    pub fn code(&self) -> &'static str {
        match self {
            ServiceType::CloudController => "CLC",
            ServiceType::ClusterController => "CC",
            ServiceType::StorageController => "SC",
            ServiceType::NodeController => "NC",
            ServiceType::UserApi => "UFS",
            ServiceType::ObjectStorageBackend => "WS",
        }
    }

    fn kebab_name(&self) -> &'static str {
        match self {
            ServiceType::CloudController => "cloud-controller",
            ServiceType::ClusterController => "cluster-controller",
            ServiceType::StorageController => "storage-controller",
            ServiceType::NodeController => "node-controller",
            ServiceType::UserApi => "user-api",
            ServiceType::ObjectStorageBackend => "object-storage-backend",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kebab_name())
    }
}

/// Accepts the kebab-case name, the wire name, or the summary code.
impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        if let Some(t) = ServiceType::from_wire(&lowered) {
            return Ok(t);
        }
        ServiceType::ALL
            .iter()
            .copied()
            .find(|t| t.kebab_name() == lowered || t.code().eq_ignore_ascii_case(&lowered))
            .ok_or_else(|| format!("Unknown service type: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
    Unknown,
}

impl InstanceState {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pending" => InstanceState::Pending,
            "running" => InstanceState::Running,
            "shutting-down" => InstanceState::ShuttingDown,
            "terminated" => InstanceState::Terminated,
            "stopping" => InstanceState::Stopping,
            "stopped" => InstanceState::Stopped,
            _ => InstanceState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user workload running on a node controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Instance id, e.g. "i-12345678"
    pub id: String,
    pub state: InstanceState,
    pub instance_type: String,
    pub root_device_type: String,
}

/// Sub-service aggregated under a user-api front end (compute, euare, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildService {
    pub kind: String,
    pub name: String,
    pub state: String,
}

/// A registered service as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub service_type: ServiceType,

    pub name: String,

    /// Partition (availability zone) the service belongs to, if any
    pub partition: Option<String>,

    /// State string as reported, e.g. "ENABLED"
    pub state: String,

    pub uri: Option<String>,

    #[serde(default)]
    pub child_services: Vec<ChildService>,

    /// Only populated for node controllers
    #[serde(default)]
    pub instances: Vec<InstanceRecord>,
}

impl ServiceRecord {
    pub fn new(service_type: ServiceType, name: impl Into<String>) -> Self {
        Self {
            service_type,
            name: name.into(),
            partition: None,
            state: String::new(),
            uri: None,
            child_services: Vec::new(),
            instances: Vec::new(),
        }
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    pub fn with_instance(mut self, instance: InstanceRecord) -> Self {
        self.instances.push(instance);
        self
    }

    pub fn in_partition(&self, partition: &str) -> bool {
        self.partition.as_deref() == Some(partition)
    }
}

/// A machine participating in the deployment, keyed by network address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub address: String,

    /// Services in discovery order
    pub services: Vec<ServiceRecord>,

    /// When discovery produced this record
    pub discovered_at: DateTime<Utc>,
}

impl HostRecord {
    pub fn new(address: impl Into<String>, services: Vec<ServiceRecord>) -> Self {
        Self {
            address: address.into(),
            services,
            discovered_at: Utc::now(),
        }
    }

    /// Top-level services of the given type. Child services never match.
    pub fn services_of(&self, service_type: ServiceType) -> impl Iterator<Item = &ServiceRecord> {
        self.services.iter().filter(move |s| s.service_type == service_type)
    }

    pub fn has_service(&self, service_type: ServiceType) -> bool {
        self.services_of(service_type).next().is_some()
    }

    /// True if a service of `service_type` on this host is in `partition`
    pub fn serves_partition(&self, service_type: ServiceType, partition: &str) -> bool {
        self.services_of(service_type).any(|s| s.in_partition(partition))
    }

    /// Instances across all node-controller services on this host
    pub fn instances(&self) -> impl Iterator<Item = &InstanceRecord> {
        self.services_of(ServiceType::NodeController)
            .flat_map(|s| s.instances.iter())
    }

    pub fn hosts_instance(&self, instance_id: &str) -> bool {
        self.instances().any(|i| i.id == instance_id)
    }

    /// First partition any service on this host belongs to
    pub fn zone(&self) -> Option<&str> {
        self.services.iter().find_map(|s| s.partition.as_deref())
    }

    /// Summary codes in canonical order, deduplicated
    pub fn service_codes(&self) -> Vec<&'static str> {
        ServiceType::ALL
            .iter()
            .filter(|t| self.has_service(**t))
            .map(|t| t.code())
            .collect()
    }
}
