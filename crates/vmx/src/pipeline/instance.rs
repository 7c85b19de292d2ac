//! Instance launch and forwarding setup.

use tracing::info;

use super::PipelineConfig;
use crate::providers::{
    ComputeProvider, Instance, InstanceTag, LaunchInstanceRequest, ProviderError, VmxAuthToken,
};

/// Tag holding the human-readable instance name.
pub const NAME_TAG: &str = "Name";

/// Tag holding the dashboard network id; decommission looks instances up by it.
pub const NETWORK_TAG: &str = "Network";

/// Human-readable instance name.
#[must_use]
pub fn instance_name(model: &str, network_name: &str) -> String {
    format!("Cisco Meraki {model} - {network_name}")
}

/// Build the launch request for one vMX instance.
#[must_use]
pub fn launch_request(
    config: &PipelineConfig,
    model: &str,
    network_name: &str,
    network_id: &str,
    token: &VmxAuthToken,
    client_token: &str,
) -> LaunchInstanceRequest {
    LaunchInstanceRequest {
        image_id: config.image_id.clone(),
        instance_type: config.instance_type.clone(),
        user_data: token.token.clone(),
        tags: vec![
            InstanceTag::new(NAME_TAG, instance_name(model, network_name)),
            InstanceTag::new(NETWORK_TAG, network_id),
        ],
        subnet_id: config.subnet_id.clone(),
        security_group_ids: config.security_group_ids.clone(),
        key_name: config.key_name.clone(),
        client_token: Some(client_token.to_string()),
    }
}

/// Whether a failed launch may still have started an instance.
///
/// The request can reach the platform before the connection drops, and a
/// success body that fails to decode still means the instance exists.
#[must_use]
pub fn launch_outcome_unknown(error: &ProviderError) -> bool {
    matches!(
        error,
        ProviderError::Transport(_) | ProviderError::Http(_) | ProviderError::Xml(_)
    )
}

/// Launch the instance. Not retried.
///
/// # Errors
/// Returns the provider error unchanged.
pub async fn launch_instance(
    compute: &dyn ComputeProvider,
    request: LaunchInstanceRequest,
) -> Result<Instance, ProviderError> {
    let instance = compute.run_instance(request).await?;
    info!(
        instance_id = %instance.id,
        state = %instance.state,
        "Instance launched"
    );
    Ok(instance)
}

/// Let the instance forward traffic that is not addressed to it.
///
/// # Errors
/// Returns the provider error unchanged.
pub async fn enable_forwarding(
    compute: &dyn ComputeProvider,
    instance_id: &str,
) -> Result<(), ProviderError> {
    compute.disable_source_dest_check(instance_id).await?;
    info!(instance_id, "Source/destination check disabled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_request_carries_token_and_tags() {
        let config = PipelineConfig {
            image_id: "ami-0abc".to_string(),
            security_group_ids: vec!["sg-1".to_string()],
            ..PipelineConfig::default()
        };
        let token = VmxAuthToken {
            token: "tok_abc".to_string(),
            expires_at: None,
        };

        let req = launch_request(&config, "VMX-S", "Branch-12", "N_42", &token, "run-1");

        assert_eq!(req.user_data, "tok_abc");
        assert_eq!(req.image_id, "ami-0abc");
        assert_eq!(req.instance_type, "c5.large");
        assert_eq!(req.security_group_ids, vec!["sg-1".to_string()]);
        assert_eq!(
            req.tags,
            vec![
                InstanceTag::new("Name", "Cisco Meraki VMX-S - Branch-12"),
                InstanceTag::new("Network", "N_42"),
            ]
        );
        assert_eq!(req.client_token.as_deref(), Some("run-1"));
    }

    #[test]
    fn test_launch_outcome_unknown_classification() {
        assert!(launch_outcome_unknown(&ProviderError::Transport("timed out".into())));
        assert!(launch_outcome_unknown(&ProviderError::Xml("missing field".into())));
        assert!(!launch_outcome_unknown(&ProviderError::Auth("denied".into())));
        assert!(!launch_outcome_unknown(&ProviderError::Api {
            status: 400,
            message: "InvalidAMIID.NotFound".into(),
        }));
    }
}
