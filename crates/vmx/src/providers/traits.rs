//! Provider traits and common types for the dashboard and compute platforms.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The request never produced a response (connect failure, timeout, reset).
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP client or body handling failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Resource is in a state that conflicts with the request.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The platform throttled the request.
    #[error("Rate limited: {message}")]
    RateLimited {
        retry_after_secs: Option<u64>,
        message: String,
    },

    /// Authentication error.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// XML response could not be decoded.
    #[error("XML decode error: {0}")]
    Xml(String),
}

impl ProviderError {
    /// Whether retrying the same request could reasonably succeed.
    ///
    /// Only read-only calls are ever retried; callers decide that, this only
    /// classifies the failure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Server-provided backoff hint, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

// ============================================================================
// Dashboard (network management) types
// ============================================================================

/// An organization visible to the dashboard credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// Immutable organization identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Dashboard URL for the organization.
    #[serde(default)]
    pub url: Option<String>,
}

/// A device in an organization's inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryDevice {
    /// Device serial.
    pub serial: String,
    /// Hardware or virtual model (e.g. "VMX-S").
    pub model: String,
    /// Network the device is claimed into, `None` when unassigned.
    #[serde(default)]
    pub network_id: Option<String>,
    /// Device name.
    #[serde(default)]
    pub name: Option<String>,
    /// MAC address.
    #[serde(default)]
    pub mac: Option<String>,
    /// Product type (e.g. "appliance").
    #[serde(default)]
    pub product_type: Option<String>,
}

impl InventoryDevice {
    /// Whether the device is not claimed into any network.
    #[must_use]
    pub fn is_unassigned(&self) -> bool {
        self.network_id.as_deref().is_none_or(str::is_empty)
    }
}

/// Request to create a network under an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNetworkRequest {
    /// Network name.
    pub name: String,
    /// Product capability set (e.g. `["appliance"]`).
    pub product_types: Vec<String>,
    /// IANA timezone name.
    pub time_zone: String,
}

/// A dashboard network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Network identifier.
    pub id: String,
    /// Owning organization.
    #[serde(default)]
    pub organization_id: Option<String>,
    /// Network name.
    pub name: String,
    /// Product capability set.
    #[serde(default)]
    pub product_types: Vec<String>,
    /// Timezone.
    #[serde(default)]
    pub time_zone: Option<String>,
    /// Dashboard management URL.
    #[serde(default)]
    pub url: Option<String>,
}

/// A device claimed into a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDevice {
    /// Device serial.
    pub serial: String,
    /// Device model.
    #[serde(default)]
    pub model: Option<String>,
    /// Device name.
    #[serde(default)]
    pub name: Option<String>,
}

/// One-time bootstrap token bound to a single vMX device.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmxAuthToken {
    /// Opaque token value, handed to the instance as user data.
    pub token: String,
    /// Expiry reported by the platform.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for VmxAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmxAuthToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ============================================================================
// Compute (instance) types
// ============================================================================

/// Instance lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    /// Instance is pending launch.
    Pending,
    /// Instance is running.
    Running,
    /// Instance is shutting down.
    ShuttingDown,
    /// Instance is terminated.
    Terminated,
    /// Instance is stopping.
    Stopping,
    /// Instance is stopped.
    Stopped,
    /// Unknown state.
    #[serde(other)]
    Unknown,
}

impl InstanceState {
    /// Map the platform's state name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting-down"),
            Self::Terminated => write!(f, "terminated"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Key/value tag attached to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceTag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl InstanceTag {
    /// Create a tag.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A compute instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Unique instance identifier.
    pub id: String,
    /// Instance type/size.
    pub instance_type: String,
    /// Machine image used.
    pub image_id: String,
    /// Current state.
    pub state: InstanceState,
    /// Tags.
    pub tags: Vec<InstanceTag>,
}

impl Instance {
    /// Value of the tag with the given key.
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

/// Request to launch exactly one instance.
#[derive(Clone, Serialize, Deserialize)]
pub struct LaunchInstanceRequest {
    /// Machine image identifier.
    pub image_id: String,
    /// Instance type/size.
    pub instance_type: String,
    /// Bootstrap data, passed to the instance verbatim (the client encodes it).
    pub user_data: String,
    /// Tags applied at launch.
    pub tags: Vec<InstanceTag>,
    /// Subnet to launch into.
    pub subnet_id: Option<String>,
    /// Security groups.
    pub security_group_ids: Vec<String>,
    /// Key pair name.
    pub key_name: Option<String>,
    /// Idempotency token; a repeated launch with the same token starts no
    /// second instance.
    #[serde(default)]
    pub client_token: Option<String>,
}

impl std::fmt::Debug for LaunchInstanceRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchInstanceRequest")
            .field("image_id", &self.image_id)
            .field("instance_type", &self.instance_type)
            .field("user_data", &"<redacted>")
            .field("tags", &self.tags)
            .field("subnet_id", &self.subnet_id)
            .field("security_group_ids", &self.security_group_ids)
            .field("key_name", &self.key_name)
            .field("client_token", &self.client_token)
            .finish()
    }
}

// ============================================================================
// Provider traits
// ============================================================================

/// Network-management platform (device inventory, networks, claims, tokens).
#[async_trait]
pub trait DashboardProvider: Send + Sync {
    /// List every organization visible to the credentials.
    async fn list_organizations(&self) -> Result<Vec<Organization>, ProviderError>;

    /// List the complete inventory of an organization, across all pages.
    async fn list_inventory_devices(
        &self,
        organization_id: &str,
    ) -> Result<Vec<InventoryDevice>, ProviderError>;

    /// Look up a single inventory device.
    async fn get_inventory_device(
        &self,
        organization_id: &str,
        serial: &str,
    ) -> Result<InventoryDevice, ProviderError>;

    /// Create a network under an organization.
    async fn create_network(
        &self,
        organization_id: &str,
        req: CreateNetworkRequest,
    ) -> Result<Network, ProviderError>;

    /// Claim devices into a network.
    async fn claim_devices(
        &self,
        network_id: &str,
        serials: &[String],
    ) -> Result<(), ProviderError>;

    /// Issue a vMX bootstrap token for a claimed device.
    async fn create_vmx_token(&self, serial: &str) -> Result<VmxAuthToken, ProviderError>;

    /// List the networks of an organization.
    async fn list_networks(&self, organization_id: &str) -> Result<Vec<Network>, ProviderError>;

    /// List devices claimed into a network.
    async fn list_network_devices(
        &self,
        network_id: &str,
    ) -> Result<Vec<NetworkDevice>, ProviderError>;

    /// Remove a device from a network, returning it to inventory.
    async fn remove_device(&self, network_id: &str, serial: &str) -> Result<(), ProviderError>;

    /// Delete a network.
    async fn delete_network(&self, network_id: &str) -> Result<(), ProviderError>;
}

/// Compute platform (instance launch and configuration).
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Launch exactly one instance.
    async fn run_instance(&self, req: LaunchInstanceRequest) -> Result<Instance, ProviderError>;

    /// Disable the source/destination address check on an instance.
    async fn disable_source_dest_check(&self, instance_id: &str) -> Result<(), ProviderError>;

    /// Find non-terminated instances carrying the given tag.
    async fn find_instances_by_tag(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<Instance>, ProviderError>;

    /// Terminate an instance.
    async fn terminate_instance(&self, instance_id: &str) -> Result<(), ProviderError>;
}
