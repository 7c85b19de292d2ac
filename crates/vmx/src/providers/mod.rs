//! Provider abstractions for the dashboard and compute platforms.

pub mod aws;
pub mod meraki;
mod traits;

pub use traits::{
    ComputeProvider, CreateNetworkRequest, DashboardProvider, Instance, InstanceState,
    InstanceTag, InventoryDevice, LaunchInstanceRequest, Network, NetworkDevice, Organization,
    ProviderError, VmxAuthToken,
};

// Re-export provider clients
pub use aws::Ec2;
pub use meraki::Meraki;
