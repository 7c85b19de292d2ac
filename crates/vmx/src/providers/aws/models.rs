//! EC2 Query API request parameters and XML response models.

use base64::Engine;
use serde::Deserialize;

use crate::providers::traits::{LaunchInstanceRequest, ProviderError};

/// EC2 API version spoken by this client.
pub const API_VERSION: &str = "2016-11-15";

/// Instance states considered "alive" when searching by tag.
const LIVE_STATES: [&str; 4] = ["pending", "running", "stopping", "stopped"];

/// Form parameters of one Query API call.
pub type Params = Vec<(String, String)>;

fn action(name: &str) -> Params {
    vec![
        ("Action".to_string(), name.to_string()),
        ("Version".to_string(), API_VERSION.to_string()),
    ]
}

fn push(params: &mut Params, key: impl Into<String>, value: impl Into<String>) {
    params.push((key.into(), value.into()));
}

// ============================================================================
// Request parameters
// ============================================================================

/// `RunInstances` for exactly one instance, tags applied at launch.
pub fn run_instances_params(req: &LaunchInstanceRequest) -> Params {
    let mut params = action("RunInstances");
    push(&mut params, "ImageId", &req.image_id);
    push(&mut params, "InstanceType", &req.instance_type);
    push(&mut params, "MinCount", "1");
    push(&mut params, "MaxCount", "1");
    push(
        &mut params,
        "UserData",
        base64::engine::general_purpose::STANDARD.encode(&req.user_data),
    );

    if let Some(subnet_id) = &req.subnet_id {
        push(&mut params, "SubnetId", subnet_id);
    }
    if let Some(key_name) = &req.key_name {
        push(&mut params, "KeyName", key_name);
    }
    for (i, group) in req.security_group_ids.iter().enumerate() {
        push(&mut params, format!("SecurityGroupId.{}", i + 1), group);
    }
    if let Some(token) = &req.client_token {
        push(&mut params, "ClientToken", token);
    }

    if !req.tags.is_empty() {
        push(&mut params, "TagSpecification.1.ResourceType", "instance");
        for (i, tag) in req.tags.iter().enumerate() {
            let n = i + 1;
            push(&mut params, format!("TagSpecification.1.Tag.{n}.Key"), &tag.key);
            push(&mut params, format!("TagSpecification.1.Tag.{n}.Value"), &tag.value);
        }
    }

    params
}

/// `ModifyInstanceAttribute` turning off the source/destination check.
pub fn disable_source_dest_check_params(instance_id: &str) -> Params {
    let mut params = action("ModifyInstanceAttribute");
    push(&mut params, "InstanceId", instance_id);
    push(&mut params, "SourceDestCheck.Value", "false");
    params
}

/// `DescribeInstances` filtered to live instances carrying a tag.
pub fn describe_by_tag_params(key: &str, value: &str, next_token: Option<&str>) -> Params {
    let mut params = action("DescribeInstances");
    push(&mut params, "Filter.1.Name", format!("tag:{key}"));
    push(&mut params, "Filter.1.Value.1", value);
    push(&mut params, "Filter.2.Name", "instance-state-name");
    for (i, state) in LIVE_STATES.iter().enumerate() {
        push(&mut params, format!("Filter.2.Value.{}", i + 1), *state);
    }
    if let Some(token) = next_token {
        push(&mut params, "NextToken", token);
    }
    params
}

/// `TerminateInstances` for a single instance.
pub fn terminate_params(instance_id: &str) -> Params {
    let mut params = action("TerminateInstances");
    push(&mut params, "InstanceId.1", instance_id);
    params
}

// ============================================================================
// XML responses
// ============================================================================

/// Decode an EC2 XML document.
///
/// # Errors
/// Returns [`ProviderError::Xml`] if the body does not match `T`.
pub fn from_xml<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    quick_xml::de::from_str(body).map_err(|e| ProviderError::Xml(e.to_string()))
}

/// EC2 wraps every list in `<xxxSet><item>..</item></xxxSet>`.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemSet<T> {
    /// Items.
    #[serde(rename = "item", default = "Vec::new")]
    pub items: Vec<T>,
}

impl<T> Default for ItemSet<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

/// Instance state as reported by EC2.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceStateXml {
    /// State name.
    pub name: String,
}

/// Instance tag.
#[derive(Debug, Clone, Deserialize)]
pub struct TagXml {
    /// Tag key.
    pub key: String,
    /// Tag value.
    #[serde(default)]
    pub value: String,
}

/// EC2 instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ec2Instance {
    /// Instance ID.
    pub instance_id: String,
    /// AMI ID.
    #[serde(default)]
    pub image_id: String,
    /// Current state.
    pub instance_state: InstanceStateXml,
    /// Instance type.
    #[serde(default)]
    pub instance_type: String,
    /// Tags.
    #[serde(default)]
    pub tag_set: ItemSet<TagXml>,
}

/// `RunInstances` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInstancesResponse {
    /// Request ID.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Reservation ID.
    #[serde(default)]
    pub reservation_id: Option<String>,
    /// Launched instances.
    #[serde(default)]
    pub instances_set: ItemSet<Ec2Instance>,
}

/// Reservation grouping in `DescribeInstances`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// Instances.
    #[serde(default)]
    pub instances_set: ItemSet<Ec2Instance>,
}

/// `DescribeInstances` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeInstancesResponse {
    /// Reservations.
    #[serde(default)]
    pub reservation_set: ItemSet<Reservation>,
    /// Continuation token.
    #[serde(default)]
    pub next_token: Option<String>,
}

/// `ModifyInstanceAttribute` response.
#[derive(Debug, Deserialize)]
pub struct ModifyInstanceAttributeResponse {
    /// Whether the call succeeded.
    #[serde(rename = "return")]
    pub result: bool,
}

/// Instance state transition in `TerminateInstances`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStateChange {
    /// Instance ID.
    pub instance_id: String,
    /// State after the call.
    pub current_state: InstanceStateXml,
}

/// `TerminateInstances` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateInstancesResponse {
    /// State changes.
    #[serde(default)]
    pub instances_set: ItemSet<InstanceStateChange>,
}

/// Single error entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ec2Error {
    /// Error code (e.g. `InvalidAMIID.NotFound`).
    pub code: String,
    /// Error message.
    #[serde(default)]
    pub message: String,
}

/// Error list wrapper.
#[derive(Debug, Default, Deserialize)]
pub struct Ec2Errors {
    /// Errors.
    #[serde(rename = "Error", default)]
    pub errors: Vec<Ec2Error>,
}

/// Error document (`<Response><Errors>..</Errors><RequestID>..</RequestID></Response>`).
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    /// Errors.
    #[serde(rename = "Errors", default)]
    pub errors: Ec2Errors,
    /// Request ID.
    #[serde(rename = "RequestID", default)]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    /// First error in the document, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Ec2Error> {
        self.errors.errors.first()
    }
}
