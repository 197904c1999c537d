/// Service type names as printed by the control plane's admin tools
pub const WIRE_CLOUD_CONTROLLER: &str = "eucalyptus";
pub const WIRE_CLUSTER_CONTROLLER: &str = "cluster";
pub const WIRE_STORAGE_CONTROLLER: &str = "storage";
pub const WIRE_NODE_CONTROLLER: &str = "node";
pub const WIRE_USER_API: &str = "user-api";
pub const WIRE_OBJECT_STORAGE_BACKEND: &str = "walrusbackend";

/// Record tags in admin command output
pub const RECORD_SERVICE: &str = "SERVICE";
pub const RECORD_NODE: &str = "NODE";
pub const RECORD_INSTANCE: &str = "INSTANCE";

/// Placeholder printed for an absent field
pub const NONE_FIELD: &str = "-";

/// API path prefix
pub const API_PREFIX: &str = "/v1";
