//! Device allocation from the organization inventory.

use tracing::{debug, info};

use super::error::{PipelineError, PipelineStage};
use crate::providers::{DashboardProvider, InventoryDevice};
use crate::state::{with_retry_async, RetryConfig};

/// Pick the device a run will claim.
///
/// Candidates are unassigned devices whose model starts with `model_prefix`;
/// the lowest serial in lexical order wins so repeated runs over the same
/// inventory always agree.
#[must_use]
pub fn select_device<'a>(
    devices: &'a [InventoryDevice],
    model_prefix: &str,
) -> Option<&'a InventoryDevice> {
    devices
        .iter()
        .filter(|d| d.model.starts_with(model_prefix))
        .filter(|d| d.is_unassigned())
        .min_by(|a, b| a.serial.cmp(&b.serial))
}

/// List the full inventory and select one unassigned appliance.
///
/// # Errors
/// `ResourceExhausted` when no candidate exists, `Provisioning` when the
/// listing fails.
pub async fn allocate_device(
    dashboard: &dyn DashboardProvider,
    retry: &RetryConfig,
    organization_id: &str,
    model_prefix: &str,
) -> Result<InventoryDevice, PipelineError> {
    let inventory = with_retry_async(retry, "list inventory", move || {
        dashboard.list_inventory_devices(organization_id)
    })
    .await
    .map_err(|source| PipelineError::Provisioning {
        stage: PipelineStage::DeviceAllocator,
        action: "list inventory",
        source,
    })?;

    let family = inventory
        .iter()
        .filter(|d| d.model.starts_with(model_prefix))
        .count();
    debug!(
        organization_id,
        total = inventory.len(),
        family,
        "Scanned inventory"
    );

    let device = select_device(&inventory, model_prefix).ok_or_else(|| {
        PipelineError::ResourceExhausted {
            organization_id: organization_id.to_string(),
            model_prefix: model_prefix.to_string(),
        }
    })?;

    info!(serial = %device.serial, model = %device.model, "Selected device");
    Ok(device.clone())
}
