//! EC2 Query API client implementation.
//!
//! Requests are form-encoded POSTs signed with SigV4; responses are XML.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use super::models::{
    describe_by_tag_params, disable_source_dest_check_params, from_xml, run_instances_params,
    terminate_params, DescribeInstancesResponse, Ec2Instance, ErrorResponse,
    ModifyInstanceAttributeResponse, Params, RunInstancesResponse, TerminateInstancesResponse,
};
use super::sigv4::{sign_form_post, Credentials, FORM_CONTENT_TYPE};
use crate::config::ComputeConfig;
use crate::providers::traits::{
    ComputeProvider, Instance, InstanceState, InstanceTag, LaunchInstanceRequest, ProviderError,
};

/// Service name used in the signing scope.
const SERVICE: &str = "ec2";

/// Upper bound on `DescribeInstances` pages followed.
const MAX_DESCRIBE_PAGES: usize = 50;

/// EC2 compute provider.
#[derive(Clone)]
pub struct Ec2 {
    /// HTTP client.
    client: Client,
    /// Signing credentials.
    credentials: Credentials,
    /// AWS region.
    region: String,
    /// Endpoint requests are posted to.
    endpoint: Url,
}

impl Ec2 {
    /// Create a new EC2 provider for the regional endpoint with default settings.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(credentials: Credentials, region: impl Into<String>) -> Result<Self, ProviderError> {
        let config = ComputeConfig {
            region: region.into(),
            ..ComputeConfig::default()
        };
        Self::from_config(credentials, &config)
    }

    /// Create a new EC2 provider from compute settings.
    ///
    /// # Errors
    /// Returns error if credentials are missing, the endpoint is not a URL, or
    /// the HTTP client cannot be created.
    pub fn from_config(
        credentials: Credentials,
        config: &ComputeConfig,
    ) -> Result<Self, ProviderError> {
        if credentials.access_key_id.is_empty() || credentials.secret_access_key.is_empty() {
            return Err(ProviderError::Auth(
                "AWS access key ID and secret access key are required".to_string(),
            ));
        }

        let endpoint_url = config.endpoint_url();
        let endpoint = Url::parse(&endpoint_url).map_err(|e| {
            ProviderError::Config(format!("Invalid EC2 endpoint '{endpoint_url}': {e}"))
        })?;

        let client = Client::builder()
            .user_agent(concat!("vmx/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            credentials,
            region: config.region.clone(),
            endpoint,
        })
    }

    /// `Host` header value, including a non-default port.
    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Sign and execute a Query API call.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        params: Params,
    ) -> Result<T, ProviderError> {
        let action = params
            .first()
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&params)
            .finish();

        let signed = sign_form_post(
            &self.credentials,
            &self.region,
            SERVICE,
            &self.host(),
            self.endpoint.path(),
            &body,
            chrono::Utc::now(),
        );

        debug!(endpoint = %self.endpoint, action = %action, "EC2 request");

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(header::CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header(header::AUTHORIZATION, signed.authorization)
            .header("X-Amz-Date", signed.amz_date);
        if let Some(token) = signed.security_token {
            request = request.header("X-Amz-Security-Token", token);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        self.handle_response(&action, response).await
    }

    /// Handle API response, decoding XML or mapping the error document.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        action: &str,
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return from_xml(&text).map_err(|e| {
                warn!(action, error = %e, body = %text, "Failed to parse response");
                e
            });
        }

        let (code, message) = match from_xml::<ErrorResponse>(&text) {
            Ok(doc) => {
                debug!(
                    action,
                    status = status.as_u16(),
                    request_id = doc.request_id.as_deref().unwrap_or_default(),
                    "EC2 error response"
                );
                doc.first()
                    .map(|e| (e.code.clone(), e.message.clone()))
                    .unwrap_or_else(|| (String::new(), text.clone()))
            }
            Err(_) => (String::new(), text.clone()),
        };
        let message = if code.is_empty() {
            message
        } else {
            format!("{code}: {message}")
        };

        Err(match (status, code.as_str()) {
            (_, "AuthFailure" | "UnauthorizedOperation" | "InvalidClientTokenId"
                | "SignatureDoesNotMatch")
            | (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => ProviderError::Auth(message),
            (_, "RequestLimitExceeded" | "Throttling") | (StatusCode::TOO_MANY_REQUESTS, _) => {
                ProviderError::RateLimited {
                    retry_after_secs: None,
                    message,
                }
            }
            (_, c) if c.ends_with(".NotFound") => ProviderError::NotFound(message),
            _ => ProviderError::Api {
                status: status.as_u16(),
                message,
            },
        })
    }

    /// Convert EC2 instance to our type.
    fn to_instance(ec2: &Ec2Instance) -> Instance {
        Instance {
            id: ec2.instance_id.clone(),
            instance_type: ec2.instance_type.clone(),
            image_id: ec2.image_id.clone(),
            state: InstanceState::from_name(&ec2.instance_state.name),
            tags: ec2
                .tag_set
                .items
                .iter()
                .map(|t| InstanceTag::new(&t.key, &t.value))
                .collect(),
        }
    }
}

#[async_trait]
impl ComputeProvider for Ec2 {
    async fn run_instance(&self, req: LaunchInstanceRequest) -> Result<Instance, ProviderError> {
        info!(
            image_id = %req.image_id,
            instance_type = %req.instance_type,
            region = %self.region,
            "Launching EC2 instance"
        );

        let response: RunInstancesResponse = self.call(run_instances_params(&req)).await?;

        let ec2 = response
            .instances_set
            .items
            .first()
            .ok_or_else(|| ProviderError::Api {
                status: 500,
                message: "No instance returned from RunInstances".to_string(),
            })?;

        info!(
            instance_id = %ec2.instance_id,
            reservation_id = response.reservation_id.as_deref().unwrap_or_default(),
            request_id = response.request_id.as_deref().unwrap_or_default(),
            "EC2 instance launched"
        );

        Ok(Self::to_instance(ec2))
    }

    async fn disable_source_dest_check(&self, instance_id: &str) -> Result<(), ProviderError> {
        info!(instance_id, "Disabling source/destination check");

        let response: ModifyInstanceAttributeResponse = self
            .call(disable_source_dest_check_params(instance_id))
            .await?;

        if response.result {
            Ok(())
        } else {
            Err(ProviderError::Api {
                status: 200,
                message: "ModifyInstanceAttribute returned false".to_string(),
            })
        }
    }

    async fn find_instances_by_tag(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<Instance>, ProviderError> {
        let mut instances = Vec::new();
        let mut next_token: Option<String> = None;

        for page in 1..=MAX_DESCRIBE_PAGES {
            let response: DescribeInstancesResponse = self
                .call(describe_by_tag_params(key, value, next_token.as_deref()))
                .await?;

            instances.extend(
                response
                    .reservation_set
                    .items
                    .iter()
                    .flat_map(|r| r.instances_set.items.iter())
                    .map(Self::to_instance),
            );

            match response.next_token.filter(|t| !t.is_empty()) {
                Some(token) => next_token = Some(token),
                None => {
                    debug!(tag = key, value, page, count = instances.len(), "Found tagged instances");
                    return Ok(instances);
                }
            }
        }

        warn!(tag = key, value, max_pages = MAX_DESCRIBE_PAGES, "Pagination limit reached");
        Err(ProviderError::Config(format!(
            "DescribeInstances for tag {key}={value} exceeded {MAX_DESCRIBE_PAGES} pages"
        )))
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
        info!(instance_id, "Terminating instance");

        let response: TerminateInstancesResponse =
            self.call(terminate_params(instance_id)).await?;

        for change in &response.instances_set.items {
            info!(
                instance_id = %change.instance_id,
                state = %change.current_state.name,
                "Instance termination initiated"
            );
        }
        Ok(())
    }
}
