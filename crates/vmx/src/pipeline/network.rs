//! Network creation, device claim and claim verification.
//!
//! Every mutating call here runs exactly once. A failure after the network
//! exists is partial by definition, so classification is left to the caller
//! which knows the run state.

use tracing::{info, warn};

use super::error::CleanupOutcome;
use crate::providers::{CreateNetworkRequest, DashboardProvider, Network, ProviderError};
use crate::state::{with_retry_async, RetryConfig};

/// Product capability set of a vMX network.
pub const APPLIANCE_PRODUCT_TYPE: &str = "appliance";

/// Create an appliance network.
///
/// # Errors
/// Returns the provider error unchanged.
pub async fn create_network(
    dashboard: &dyn DashboardProvider,
    organization_id: &str,
    name: &str,
    time_zone: &str,
) -> Result<Network, ProviderError> {
    let request = CreateNetworkRequest {
        name: name.to_string(),
        product_types: vec![APPLIANCE_PRODUCT_TYPE.to_string()],
        time_zone: time_zone.to_string(),
    };
    dashboard.create_network(organization_id, request).await
}

/// Claim a single device into a network.
///
/// # Errors
/// Returns the provider error unchanged.
pub async fn claim_device(
    dashboard: &dyn DashboardProvider,
    network_id: &str,
    serial: &str,
) -> Result<(), ProviderError> {
    dashboard
        .claim_devices(network_id, &[serial.to_string()])
        .await?;
    info!(network_id, serial, "Device claimed");
    Ok(())
}

/// Re-read the device and require it to sit in `network_id`.
///
/// Two concurrent runs can select the same serial; the platform accepts
/// only one claim, and the loser finds out here.
///
/// # Errors
/// `Conflict` when the device belongs elsewhere, or the lookup error.
pub async fn verify_claim(
    dashboard: &dyn DashboardProvider,
    retry: &RetryConfig,
    organization_id: &str,
    network_id: &str,
    serial: &str,
) -> Result<(), ProviderError> {
    let device = with_retry_async(retry, "get inventory device", move || {
        dashboard.get_inventory_device(organization_id, serial)
    })
    .await?;

    match device.network_id.as_deref() {
        Some(actual) if actual == network_id => Ok(()),
        actual => {
            let actual = actual.filter(|id| !id.is_empty()).unwrap_or("no network");
            warn!(serial, expected = network_id, actual, "Claim verification failed");
            Err(ProviderError::Conflict(format!(
                "device {serial} is assigned to {actual}, expected {network_id}"
            )))
        }
    }
}

/// Delete a network created by this run. Never fails; the outcome is reported.
pub async fn delete_created_network(
    dashboard: &dyn DashboardProvider,
    network_id: &str,
) -> CleanupOutcome {
    match dashboard.delete_network(network_id).await {
        Ok(()) => {
            info!(network_id, "Removed network created by failed run");
            CleanupOutcome::NetworkDeleted
        }
        Err(e) => {
            warn!(network_id, error = %e, "Failed to remove network created by failed run");
            CleanupOutcome::Failed(e.to_string())
        }
    }
}
