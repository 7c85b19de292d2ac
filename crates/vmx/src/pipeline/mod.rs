//! The provisioning pipeline.
//!
//! Five stages run strictly in order, each consuming the previous stage's
//! output:
//!
//! 1. [`organization`] resolves the organization name to an id
//! 2. [`allocator`] selects an unassigned vMX device
//! 3. [`network`] creates the network and claims the device into it
//! 4. [`token`] issues the device's bootstrap token
//! 5. [`instance`] launches the instance and disables its source/dest check
//!
//! Progress is recorded in a [`RunState`] so every exit path can report what
//! exists remotely. Only read-only calls are retried.

pub mod allocator;
pub mod decommission;
mod error;
pub mod instance;
pub mod network;
pub mod organization;
pub mod token;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use decommission::DecommissionReport;
pub use error::{CleanupOutcome, PipelineError, PipelineStage};

use crate::config::VmxConfig;
use crate::providers::{ComputeProvider, DashboardProvider, ProviderError};
use crate::state::{RetryConfig, RunState, RunStatus, Stage};

/// Runtime settings for a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Timezone used when a request does not name one.
    pub default_timezone: String,
    /// Inventory model prefix of allocatable devices.
    pub model_prefix: String,
    /// Instance type to launch.
    pub instance_type: String,
    /// Machine image to launch.
    pub image_id: String,
    /// Subnet to launch into.
    pub subnet_id: Option<String>,
    /// Security groups to attach.
    pub security_group_ids: Vec<String>,
    /// SSH key pair name.
    pub key_name: Option<String>,
    /// Re-read the device after claiming it.
    pub verify_claim: bool,
    /// Delete the created network when the claim step fails.
    pub cleanup_on_failure: bool,
    /// Where run state is persisted, if anywhere.
    pub state_dir: Option<PathBuf>,
    /// Retry policy for read-only calls.
    pub retry: RetryConfig,
}

impl PipelineConfig {
    /// Derive pipeline settings from loaded configuration.
    #[must_use]
    pub fn from_config(config: &VmxConfig) -> Self {
        Self {
            default_timezone: config.pipeline.default_timezone.clone(),
            model_prefix: config.pipeline.device_model_prefix.clone(),
            instance_type: config.compute.instance_type.clone(),
            image_id: config.compute.image_id.clone(),
            subnet_id: config.compute.subnet_id.clone(),
            security_group_ids: config.compute.security_group_ids.clone(),
            key_name: config.compute.key_name.clone(),
            verify_claim: config.pipeline.verify_claim,
            cleanup_on_failure: config.pipeline.cleanup_on_failure,
            state_dir: config.pipeline.state_dir.clone(),
            retry: config.retry.to_retry_config(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&VmxConfig::default())
    }
}

/// What to provision.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Organization display name, matched exactly.
    pub organization_name: String,
    /// Name of the network to create.
    pub network_name: String,
    /// IANA timezone for the network; the configured default when `None`.
    pub time_zone: Option<String>,
}

impl ProvisionRequest {
    /// Create a request using the default timezone.
    pub fn new(organization_name: impl Into<String>, network_name: impl Into<String>) -> Self {
        Self {
            organization_name: organization_name.into(),
            network_name: network_name.into(),
            time_zone: None,
        }
    }

    /// Set the network timezone.
    #[must_use]
    pub fn with_time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = Some(time_zone.into());
        self
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// Every stage completed.
    Complete,
    /// The instance runs but its source/destination check is still enabled,
    /// so it will not forward traffic.
    Degraded,
}

/// Result of a run that launched an instance.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub run_id: Uuid,
    pub outcome: ProvisionOutcome,
    pub organization_id: String,
    pub network_id: String,
    pub network_url: Option<String>,
    pub device_serial: String,
    pub device_model: String,
    pub instance_id: String,
    /// Idempotency token the instance was launched with.
    pub client_token: String,
    pub source_dest_check_disabled: bool,
    /// Why the source/destination check could not be disabled.
    pub source_dest_check_error: Option<String>,
    /// Final run state.
    pub state: RunState,
}

impl ProvisionReport {
    fn from_state(state: RunState, degraded: Option<&ProviderError>) -> Self {
        Self {
            run_id: state.run_id,
            outcome: if degraded.is_some() {
                ProvisionOutcome::Degraded
            } else {
                ProvisionOutcome::Complete
            },
            organization_id: state.organization_id.clone().unwrap_or_default(),
            network_id: state.network_id.clone().unwrap_or_default(),
            network_url: state.network_url.clone(),
            device_serial: state.device_serial.clone().unwrap_or_default(),
            device_model: state.device_model.clone().unwrap_or_default(),
            instance_id: state.instance_id.clone().unwrap_or_default(),
            client_token: state.launch_client_token.clone().unwrap_or_default(),
            source_dest_check_disabled: degraded.is_none(),
            source_dest_check_error: degraded.map(ToString::to_string),
            state,
        }
    }

    /// Whether the instance was left unable to forward traffic.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.outcome == ProvisionOutcome::Degraded
    }
}

/// Provisioning pipeline bound to one dashboard and one compute platform.
pub struct Pipeline {
    dashboard: Arc<dyn DashboardProvider>,
    compute: Arc<dyn ComputeProvider>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline.
    pub fn new(
        dashboard: Arc<dyn DashboardProvider>,
        compute: Arc<dyn ComputeProvider>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            dashboard,
            compute,
            config,
        }
    }

    /// Pipeline settings.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Provision one vMX appliance end to end.
    ///
    /// Returns a report when an instance was launched, including the degraded
    /// case where its source/destination check could not be disabled.
    ///
    /// # Errors
    /// `Config` for an unusable request, `NotFound` or `ResourceExhausted`
    /// before anything is created, `Provisioning` when network creation is
    /// rejected, and `PartialProvisioning` for any later failure.
    pub async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionReport, PipelineError> {
        let organization_name = request.organization_name.as_str();
        let network_name = request.network_name.as_str();
        if organization_name.trim().is_empty() {
            return Err(PipelineError::Config(
                "organization name must not be empty".to_string(),
            ));
        }
        if network_name.trim().is_empty() {
            return Err(PipelineError::Config(
                "network name must not be empty".to_string(),
            ));
        }
        if self.config.image_id.trim().is_empty() {
            return Err(PipelineError::Config(
                "no machine image configured".to_string(),
            ));
        }
        let time_zone = request
            .time_zone
            .as_deref()
            .map(str::trim)
            .filter(|tz| !tz.is_empty())
            .unwrap_or(&self.config.default_timezone)
            .to_string();

        let mut state = RunState::new(organization_name, network_name);
        info!(
            run_id = %state.run_id,
            organization = organization_name,
            network = network_name,
            time_zone = %time_zone,
            "Starting provisioning run"
        );

        let result = self.run(&mut state, &time_zone).await;

        let status = match &result {
            Ok(None) => RunStatus::Complete,
            Ok(Some(_)) => RunStatus::Degraded,
            Err(_) => RunStatus::Failed,
        };
        state.finish(status);
        self.checkpoint(&state);

        match result {
            Ok(degraded) => {
                let report = ProvisionReport::from_state(state, degraded.as_ref());
                if let Some(e) = &degraded {
                    warn!(
                        run_id = %report.run_id,
                        instance_id = %report.instance_id,
                        error = %e,
                        "Provisioning degraded: instance will not forward traffic"
                    );
                } else {
                    info!(
                        run_id = %report.run_id,
                        network_id = %report.network_id,
                        serial = %report.device_serial,
                        instance_id = %report.instance_id,
                        "Provisioning complete"
                    );
                }
                Ok(report)
            }
            Err(e) => {
                error!(
                    run_id = %state.run_id,
                    stage = %state.stage,
                    error = %e,
                    remote_state = %state.describe_remote_state(),
                    "Provisioning failed"
                );
                Err(e)
            }
        }
    }

    /// Execute the stages, returning the forwarding error when degraded.
    async fn run(
        &self,
        state: &mut RunState,
        time_zone: &str,
    ) -> Result<Option<ProviderError>, PipelineError> {
        let dashboard = self.dashboard.as_ref();
        let retry = &self.config.retry;

        let org = organization::resolve_organization(dashboard, retry, &state.organization_name)
            .await?;
        state.organization_id = Some(org.id.clone());
        state.advance(Stage::OrganizationResolved);
        self.checkpoint(state);

        let device =
            allocator::allocate_device(dashboard, retry, &org.id, &self.config.model_prefix)
                .await?;
        state.device_serial = Some(device.serial.clone());
        state.device_model = Some(device.model.clone());
        state.advance(Stage::DeviceAllocated);
        self.checkpoint(state);

        let net = network::create_network(dashboard, &org.id, &state.network_name, time_zone)
            .await
            .map_err(|source| PipelineError::Provisioning {
                stage: PipelineStage::NetworkProvisioner,
                action: "create network",
                source,
            })?;
        state.network_id = Some(net.id.clone());
        state.network_url.clone_from(&net.url);
        state.advance(Stage::NetworkCreated);
        self.checkpoint(state);

        if let Err(source) = network::claim_device(dashboard, &net.id, &device.serial).await {
            let cleanup = self.compensate(state, &net.id).await;
            return Err(Self::partial(
                state,
                PipelineStage::NetworkProvisioner,
                "claim device",
                cleanup,
                source,
            ));
        }
        state.advance(Stage::DeviceClaimed);
        self.checkpoint(state);

        if self.config.verify_claim {
            if let Err(source) =
                network::verify_claim(dashboard, retry, &org.id, &net.id, &device.serial).await
            {
                // Only a device found elsewhere leaves the network empty.
                let cleanup = if matches!(source, ProviderError::Conflict(_)) {
                    state.claim_conflict = true;
                    self.compensate(state, &net.id).await
                } else {
                    CleanupOutcome::NotAttempted
                };
                return Err(Self::partial(
                    state,
                    PipelineStage::NetworkProvisioner,
                    "verify device claim",
                    cleanup,
                    source,
                ));
            }
        }

        let auth = token::issue_token(dashboard, &device.serial)
            .await
            .map_err(|source| {
                Self::partial(
                    state,
                    PipelineStage::TokenIssuer,
                    "issue token",
                    CleanupOutcome::NotAttempted,
                    source,
                )
            })?;
        state.advance(Stage::TokenIssued);
        self.checkpoint(state);

        let client_token = state.run_id.to_string();
        state.launch_client_token = Some(client_token.clone());
        self.checkpoint(state);

        let launch = instance::launch_request(
            &self.config,
            &device.model,
            &state.network_name,
            &net.id,
            &auth,
            &client_token,
        );
        let launched = match instance::launch_instance(self.compute.as_ref(), launch).await {
            Ok(launched) => launched,
            Err(source) => {
                state.launch_outcome_unknown = instance::launch_outcome_unknown(&source);
                return Err(Self::partial(
                    state,
                    PipelineStage::InstanceLauncher,
                    "launch instance",
                    CleanupOutcome::NotAttempted,
                    source,
                ));
            }
        };
        state.instance_id = Some(launched.id.clone());
        state.advance(Stage::InstanceLaunched);
        self.checkpoint(state);

        match instance::enable_forwarding(self.compute.as_ref(), &launched.id).await {
            Ok(()) => {
                state.advance(Stage::SourceDestCheckDisabled);
                Ok(None)
            }
            Err(e) => Ok(Some(e)),
        }
    }

    /// Delete the run's network when compensation is enabled.
    async fn compensate(&self, state: &mut RunState, network_id: &str) -> CleanupOutcome {
        if !self.config.cleanup_on_failure {
            return CleanupOutcome::NotAttempted;
        }
        let outcome = network::delete_created_network(self.dashboard.as_ref(), network_id).await;
        state.network_deleted = outcome == CleanupOutcome::NetworkDeleted;
        outcome
    }

    /// Build a partial-failure error around a snapshot of the run.
    fn partial(
        state: &RunState,
        stage: PipelineStage,
        action: &'static str,
        cleanup: CleanupOutcome,
        source: ProviderError,
    ) -> PipelineError {
        let mut snapshot = state.clone();
        snapshot.finish(RunStatus::Failed);
        PipelineError::PartialProvisioning {
            stage,
            action,
            state: Box::new(snapshot),
            cleanup,
            source,
        }
    }

    /// Persist the run state when a state directory is configured.
    fn checkpoint(&self, state: &RunState) {
        let Some(dir) = &self.config.state_dir else {
            return;
        };
        match state.save(dir) {
            Ok(path) => debug!(path = %path.display(), stage = %state.stage, "Saved run state"),
            Err(e) => warn!(error = %e, "Failed to persist run state"),
        }
    }
}
