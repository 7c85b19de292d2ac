//! Provisioning run state.
//!
//! A run records the furthest stage it completed (its high-water mark) along
//! with every remote identifier it created, so that any exit path can tell an
//! operator exactly what exists on both platforms.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::providers::ProviderError;

/// Completed stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Nothing done yet.
    NotStarted,
    /// Organization name resolved to an id.
    OrganizationResolved,
    /// An unassigned appliance device was selected.
    DeviceAllocated,
    /// The network exists on the dashboard.
    NetworkCreated,
    /// The device is claimed into the network.
    DeviceClaimed,
    /// A bootstrap token was issued for the device.
    TokenIssued,
    /// The instance was launched.
    InstanceLaunched,
    /// Source/destination check disabled; nothing left to do.
    SourceDestCheckDisabled,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::OrganizationResolved => write!(f, "organization_resolved"),
            Self::DeviceAllocated => write!(f, "device_allocated"),
            Self::NetworkCreated => write!(f, "network_created"),
            Self::DeviceClaimed => write!(f, "device_claimed"),
            Self::TokenIssued => write!(f, "token_issued"),
            Self::InstanceLaunched => write!(f, "instance_launched"),
            Self::SourceDestCheckDisabled => write!(f, "source_dest_check_disabled"),
        }
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Stages are still executing.
    InProgress,
    /// Every stage completed.
    Complete,
    /// Instance is running but will not forward traffic.
    Degraded,
    /// A stage failed.
    Failed,
}

/// State of a single provisioning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Organization name as supplied.
    pub organization_name: String,
    /// Network name as supplied.
    pub network_name: String,
    /// Furthest completed stage.
    pub stage: Stage,
    /// Overall status.
    pub status: RunStatus,
    /// Resolved organization id.
    pub organization_id: Option<String>,
    /// Allocated device serial.
    pub device_serial: Option<String>,
    /// Allocated device model.
    pub device_model: Option<String>,
    /// Created network id.
    pub network_id: Option<String>,
    /// Dashboard URL of the created network.
    pub network_url: Option<String>,
    /// The claim call succeeded but the device was then found in another network.
    #[serde(default)]
    pub claim_conflict: bool,
    /// Idempotency token sent with the launch request.
    #[serde(default)]
    pub launch_client_token: Option<String>,
    /// The launch failed in a way that may still have started an instance.
    #[serde(default)]
    pub launch_outcome_unknown: bool,
    /// Launched instance id.
    pub instance_id: Option<String>,
    /// Whether the created network was deleted again by compensation.
    #[serde(default)]
    pub network_deleted: bool,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Timestamp of last update.
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    /// Create a new run state.
    #[must_use]
    pub fn new(organization_name: impl Into<String>, network_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            organization_name: organization_name.into(),
            network_name: network_name.into(),
            stage: Stage::NotStarted,
            status: RunStatus::InProgress,
            organization_id: None,
            device_serial: None,
            device_model: None,
            network_id: None,
            network_url: None,
            claim_conflict: false,
            launch_client_token: None,
            launch_outcome_unknown: false,
            instance_id: None,
            network_deleted: false,
            started_at: now,
            updated_at: now,
        }
    }

    /// Record a completed stage. The high-water mark never moves backwards.
    pub fn advance(&mut self, stage: Stage) {
        if stage > self.stage {
            self.stage = stage;
        }
        self.updated_at = Utc::now();
    }

    /// Set the overall status.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Whether anything exists remotely that this run created or changed.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        self.stage >= Stage::NetworkCreated && !self.network_deleted
    }

    /// Whether the device was claimed into the network.
    #[must_use]
    pub fn device_claimed(&self) -> bool {
        self.stage >= Stage::DeviceClaimed && !self.claim_conflict
    }

    /// Whether a bootstrap token was issued.
    #[must_use]
    pub fn token_issued(&self) -> bool {
        self.stage >= Stage::TokenIssued
    }

    /// Human-readable account of what exists remotely.
    #[must_use]
    pub fn describe_remote_state(&self) -> String {
        let mut lines = Vec::new();
        let unset = "-";

        lines.push(format!(
            "organization: {} ({})",
            self.organization_name,
            self.organization_id.as_deref().unwrap_or(unset)
        ));
        match (&self.network_id, self.network_deleted) {
            (Some(id), true) => lines.push(format!("network: {id} (deleted during cleanup)")),
            (Some(id), false) => lines.push(format!(
                "network: {id} '{}' {}",
                self.network_name,
                self.network_url.as_deref().unwrap_or("")
            )),
            (None, _) => lines.push("network: not created".to_string()),
        }
        if let Some(serial) = &self.device_serial {
            let claim = if self.claim_conflict {
                "claimed by another network"
            } else if self.device_claimed() {
                "claimed"
            } else if self.stage >= Stage::NetworkCreated {
                "claim not completed"
            } else {
                "not claimed"
            };
            lines.push(format!("device: {serial} ({claim})"));
        }
        lines.push(format!(
            "token: {}",
            if self.token_issued() { "issued" } else { "not issued" }
        ));
        match (&self.instance_id, &self.launch_client_token) {
            (Some(id), _) => lines.push(format!("instance: {id}")),
            (None, Some(token)) if self.launch_outcome_unknown => lines.push(format!(
                "instance: launch outcome unknown (client token {token}); \
                 look for instances tagged Network={}",
                self.network_id.as_deref().unwrap_or(unset)
            )),
            (None, _) => lines.push("instance: not launched".to_string()),
        }
        if self.instance_id.is_some() {
            lines.push(format!(
                "source/dest check: {}",
                if self.stage >= Stage::SourceDestCheckDisabled {
                    "disabled"
                } else {
                    "NOT disabled"
                }
            ));
        }

        lines.join("\n")
    }

    /// Get the state file path for a run.
    #[must_use]
    pub fn state_file(state_dir: &Path, run_id: Uuid) -> PathBuf {
        state_dir.join(format!("vmx-run-{run_id}.json"))
    }

    /// Load state from file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read state file")?;
        let state: Self = serde_json::from_str(&content).context("Failed to parse state file")?;

        info!(run_id = %state.run_id, stage = %state.stage, "Loaded run state");
        Ok(state)
    }

    /// Save state to `state_dir`, returning the file written.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, state_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(state_dir).context("Failed to create state directory")?;

        let path = Self::state_file(state_dir, self.run_id);
        let content = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        std::fs::write(&path, content).context("Failed to write state file")?;

        Ok(path)
    }
}

/// Retry configuration for read-only remote calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Execute an idempotent async call, retrying transient failures.
///
/// Must only wrap read-only calls: a retried create could duplicate a
/// resource on the remote platform.
///
/// # Errors
/// Returns the last error once attempts are exhausted, or the first
/// non-transient error.
pub async fn with_retry_async<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                let wait = e.retry_after().map_or(delay, |d| d.min(config.max_delay));
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = config.max_attempts,
                    error = %e,
                    "Transient failure, retrying in {wait:?}"
                );

                tokio::time::sleep(wait).await;
                delay = std::cmp::min(
                    config.max_delay,
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier),
                );
            }
            Err(e) => return Err(e),
        }
    }
}
