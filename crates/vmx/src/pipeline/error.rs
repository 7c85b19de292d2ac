//! Pipeline failure taxonomy.

use serde::Serialize;
use thiserror::Error;

use super::decommission::DecommissionReport;
use crate::providers::ProviderError;
use crate::state::RunState;

/// The stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    OrganizationResolver,
    DeviceAllocator,
    NetworkProvisioner,
    TokenIssuer,
    InstanceLauncher,
    Decommission,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OrganizationResolver => write!(f, "organization resolver"),
            Self::DeviceAllocator => write!(f, "device allocator"),
            Self::NetworkProvisioner => write!(f, "network provisioner"),
            Self::TokenIssuer => write!(f, "token issuer"),
            Self::InstanceLauncher => write!(f, "instance launcher"),
            Self::Decommission => write!(f, "decommission"),
        }
    }
}

/// What happened to the network created by a run that later failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "error")]
pub enum CleanupOutcome {
    /// Cleanup is disabled, or the device may be in the network.
    NotAttempted,
    /// The network was deleted.
    NetworkDeleted,
    /// Deletion was attempted and failed.
    Failed(String),
}

/// Errors that end a provisioning or decommission run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Request or configuration is unusable; nothing was called.
    #[error("Invalid input: {0}")]
    Config(String),

    /// A named resource does not exist.
    #[error("{resource} '{name}' not found")]
    NotFound {
        stage: PipelineStage,
        resource: &'static str,
        name: String,
    },

    /// No unassigned device is available.
    #[error(
        "No unassigned {model_prefix} device in organization {organization_id}; \
         add a license or free an existing device"
    )]
    ResourceExhausted {
        organization_id: String,
        model_prefix: String,
    },

    /// A remote call failed before anything was created.
    #[error("{stage} failed to {action}: {source}")]
    Provisioning {
        stage: PipelineStage,
        action: &'static str,
        #[source]
        source: ProviderError,
    },

    /// A remote call failed after earlier stages changed remote state.
    #[error("{stage} failed to {action} after remote changes were made: {source}")]
    PartialProvisioning {
        stage: PipelineStage,
        action: &'static str,
        state: Box<RunState>,
        cleanup: CleanupOutcome,
        #[source]
        source: ProviderError,
    },

    /// Teardown stopped part way.
    #[error("Decommission of '{network}' stopped while trying to {action}: {source}")]
    PartialDecommission {
        network: String,
        action: &'static str,
        report: Box<DecommissionReport>,
        #[source]
        source: ProviderError,
    },
}

impl PipelineError {
    /// Stage the failure is attributed to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Config(_) => None,
            Self::ResourceExhausted { .. } => Some(PipelineStage::DeviceAllocator),
            Self::NotFound { stage, .. }
            | Self::Provisioning { stage, .. }
            | Self::PartialProvisioning { stage, .. } => Some(*stage),
            Self::PartialDecommission { .. } => Some(PipelineStage::Decommission),
        }
    }

    /// Run state captured at the moment of a partial failure.
    #[must_use]
    pub fn run_state(&self) -> Option<&RunState> {
        match self {
            Self::PartialProvisioning { state, .. } => Some(state),
            _ => None,
        }
    }

    /// Whether remote resources may have been left behind.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            Self::PartialProvisioning { .. } | Self::PartialDecommission { .. }
        )
    }
}
