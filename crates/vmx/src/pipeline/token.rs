//! Bootstrap token issuance.

use chrono::Utc;
use tracing::{info, warn};

use crate::providers::{DashboardProvider, ProviderError, VmxAuthToken};

/// Request a one-time bootstrap token for a claimed device.
///
/// The token value is never logged.
///
/// # Errors
/// Returns the provider error unchanged; an empty token is an API error.
pub async fn issue_token(
    dashboard: &dyn DashboardProvider,
    serial: &str,
) -> Result<VmxAuthToken, ProviderError> {
    let token = dashboard.create_vmx_token(serial).await?;

    if token.token.trim().is_empty() {
        return Err(ProviderError::Api {
            status: 200,
            message: format!("empty authentication token returned for {serial}"),
        });
    }

    match token.expires_at {
        Some(expires_at) if expires_at <= Utc::now() => {
            warn!(serial, %expires_at, "Token is already expired");
        }
        Some(expires_at) => info!(serial, %expires_at, "Token issued"),
        None => info!(serial, "Token issued"),
    }

    Ok(token)
}
