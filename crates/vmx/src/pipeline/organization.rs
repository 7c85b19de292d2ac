//! Organization resolution: display name to identifier.

use tracing::{debug, info, warn};

use super::error::{PipelineError, PipelineStage};
use crate::providers::{DashboardProvider, Organization};
use crate::state::{with_retry_async, RetryConfig};

/// Resolve an organization by exact, case-sensitive name.
///
/// When several organizations share the name the first one listed wins.
///
/// # Errors
/// `NotFound` when nothing matches, `Provisioning` when the listing fails.
pub async fn resolve_organization(
    dashboard: &dyn DashboardProvider,
    retry: &RetryConfig,
    name: &str,
) -> Result<Organization, PipelineError> {
    let organizations = with_retry_async(retry, "list organizations", move || {
        dashboard.list_organizations()
    })
    .await
    .map_err(|source| PipelineError::Provisioning {
        stage: PipelineStage::OrganizationResolver,
        action: "list organizations",
        source,
    })?;

    debug!(count = organizations.len(), "Listed organizations");

    let mut matches = organizations.into_iter().filter(|o| o.name == name);
    let Some(organization) = matches.next() else {
        return Err(PipelineError::NotFound {
            stage: PipelineStage::OrganizationResolver,
            resource: "organization",
            name: name.to_string(),
        });
    };

    let extra = matches.count();
    if extra > 0 {
        warn!(
            name,
            chosen = %organization.id,
            ignored = extra,
            "Several organizations share this name, using the first"
        );
    }

    info!(name, organization_id = %organization.id, "Resolved organization");
    Ok(organization)
}
