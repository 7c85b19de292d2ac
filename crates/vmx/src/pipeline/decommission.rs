//! Scale-down: tear down what a provisioning run built.
//!
//! Order is the reverse of provisioning: instances tagged with the network
//! id are terminated, devices are released, then the network is deleted.
//! Every step tolerates work a previous attempt already finished.

use serde::Serialize;
use tracing::{info, warn};

use super::error::{PipelineError, PipelineStage};
use super::instance::NETWORK_TAG;
use super::{organization, Pipeline};
use crate::providers::{InstanceState, ProviderError};
use crate::state::with_retry_async;

/// What a decommission run removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecommissionReport {
    pub organization_id: String,
    pub network_id: String,
    pub network_name: String,
    pub terminated_instances: Vec<String>,
    pub removed_devices: Vec<String>,
    pub network_deleted: bool,
}

impl DecommissionReport {
    /// Whether any mutating call succeeded.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.terminated_instances.is_empty()
            || !self.removed_devices.is_empty()
            || self.network_deleted
    }
}

impl Pipeline {
    /// Remove the network named `network_name` and everything attached to it.
    ///
    /// # Errors
    /// `NotFound` for an unknown organization or network, `Provisioning`
    /// when a lookup fails before anything was removed, and
    /// `PartialDecommission` once teardown has started.
    pub async fn decommission(
        &self,
        organization_name: &str,
        network_name: &str,
    ) -> Result<DecommissionReport, PipelineError> {
        if organization_name.trim().is_empty() || network_name.trim().is_empty() {
            return Err(PipelineError::Config(
                "organization and network names must not be empty".to_string(),
            ));
        }

        let dashboard = self.dashboard.as_ref();
        let compute = self.compute.as_ref();
        let retry = &self.config.retry;

        let org = organization::resolve_organization(dashboard, retry, organization_name).await?;

        let networks = with_retry_async(retry, "list networks", || {
            dashboard.list_networks(&org.id)
        })
        .await
        .map_err(|source| PipelineError::Provisioning {
            stage: PipelineStage::Decommission,
            action: "list networks",
            source,
        })?;
        let network = networks
            .into_iter()
            .find(|n| n.name == network_name)
            .ok_or_else(|| PipelineError::NotFound {
                stage: PipelineStage::Decommission,
                resource: "network",
                name: network_name.to_string(),
            })?;

        info!(
            organization_id = %org.id,
            network_id = %network.id,
            "Decommissioning network"
        );

        let mut report = DecommissionReport {
            organization_id: org.id.clone(),
            network_id: network.id.clone(),
            network_name: network.name.clone(),
            ..DecommissionReport::default()
        };

        let instances = with_retry_async(retry, "find instances", || {
            compute.find_instances_by_tag(NETWORK_TAG, &network.id)
        })
        .await
        .map_err(|source| fail(&report, "find instances", source))?;

        for instance in instances
            .iter()
            .filter(|i| !matches!(i.state, InstanceState::Terminated | InstanceState::ShuttingDown))
        {
            compute
                .terminate_instance(&instance.id)
                .await
                .map_err(|source| fail(&report, "terminate instance", source))?;
            report.terminated_instances.push(instance.id.clone());
        }

        let devices = with_retry_async(retry, "list network devices", || {
            dashboard.list_network_devices(&network.id)
        })
        .await
        .map_err(|source| fail(&report, "list network devices", source))?;

        for device in &devices {
            dashboard
                .remove_device(&network.id, &device.serial)
                .await
                .map_err(|source| fail(&report, "remove device", source))?;
            report.removed_devices.push(device.serial.clone());
        }

        dashboard
            .delete_network(&network.id)
            .await
            .map_err(|source| fail(&report, "delete network", source))?;
        report.network_deleted = true;

        info!(
            network_id = %report.network_id,
            instances = report.terminated_instances.len(),
            devices = report.removed_devices.len(),
            "Decommission complete"
        );
        Ok(report)
    }
}

fn fail(report: &DecommissionReport, action: &'static str, source: ProviderError) -> PipelineError {
    if !report.has_changes() {
        return PipelineError::Provisioning {
            stage: PipelineStage::Decommission,
            action,
            source,
        };
    }

    warn!(
        network_id = %report.network_id,
        action,
        error = %source,
        "Decommission stopped part way"
    );
    PipelineError::PartialDecommission {
        network: report.network_name.clone(),
        action,
        report: Box::new(report.clone()),
        source,
    }
}
