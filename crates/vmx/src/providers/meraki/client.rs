//! Meraki Dashboard API client implementation.
//!
//! API Documentation: <https://developer.cisco.com/meraki/api-v1/>

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, info, warn};

use super::models::{next_link, ClaimDevicesRequest, ErrorResponse, RemoveDeviceRequest};
use crate::config::DashboardConfig;
use crate::providers::traits::{
    CreateNetworkRequest, DashboardProvider, InventoryDevice, Network, NetworkDevice,
    Organization, ProviderError, VmxAuthToken,
};

/// Meraki Dashboard provider.
#[derive(Clone)]
pub struct Meraki {
    /// HTTP client.
    client: Client,
    /// Dashboard API key.
    api_key: String,
    /// API base URL, without trailing slash.
    base_url: String,
    /// Page size for paginated listings.
    per_page: u32,
    /// Upper bound on pages followed.
    max_pages: u32,
}

impl Meraki {
    /// Create a new Meraki provider with default settings.
    ///
    /// # Errors
    /// Returns error if the API key is empty or the HTTP client cannot be created.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::from_config(api_key, &DashboardConfig::default())
    }

    /// Create a new Meraki provider from dashboard settings.
    ///
    /// # Errors
    /// Returns error if the API key is empty or the HTTP client cannot be created.
    pub fn from_config(
        api_key: impl Into<String>,
        config: &DashboardConfig,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::Auth(
                "Meraki Dashboard API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .user_agent(concat!("vmx/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            per_page: config.per_page,
            max_pages: config.max_pages,
        })
    }

    /// Create a provider from the `MERAKI_DASHBOARD_API_KEY` environment variable.
    ///
    /// # Errors
    /// Returns an error if the environment variable is not set.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("MERAKI_DASHBOARD_API_KEY").map_err(|_| {
            ProviderError::Auth("MERAKI_DASHBOARD_API_KEY environment variable not set".to_string())
        })?;
        Self::new(api_key)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Attach credentials and send.
    async fn send(&self, request: RequestBuilder) -> Result<Response, ProviderError> {
        request
            .bearer_auth(&self.api_key)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }

    /// Make an authenticated GET request.
    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let url = self.url(path);
        debug!(url = %url, "GET request");

        let response = self.send(self.client.get(&url)).await?;
        Self::handle_response(response).await
    }

    /// Make an authenticated POST request with a JSON body.
    async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ProviderError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let url = self.url(path);
        debug!(url = %url, "POST request");

        let response = self.send(self.client.post(&url).json(body)).await?;
        Self::handle_response(response).await
    }

    /// Make an authenticated POST request whose response body is ignored.
    async fn post_empty<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), ProviderError> {
        let url = self.url(path);
        debug!(url = %url, "POST request (empty response)");

        let response = self.send(self.client.post(&url).json(body)).await?;
        Self::check_status(response).await
    }

    /// Make an authenticated DELETE request. A missing resource counts as deleted.
    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        let url = self.url(path);
        debug!(url = %url, "DELETE request");

        let response = self.send(self.client.delete(&url)).await?;
        match Self::check_status(response).await {
            Err(ProviderError::NotFound(_)) | Ok(()) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Follow `Link: rel=next` headers until the listing is exhausted.
    async fn get_all_pages<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, ProviderError> {
        let mut url = format!("{}?perPage={}", self.url(path), self.per_page);
        let mut items = Vec::new();

        for page in 1..=self.max_pages {
            debug!(url = %url, page, "GET request (paginated)");
            let response = self.send(self.client.get(&url)).await?;
            let next = response
                .headers()
                .get_all(header::LINK)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .find_map(next_link);

            let mut batch: Vec<T> = Self::handle_response(response).await?;
            debug!(page, count = batch.len(), "Fetched page");
            items.append(&mut batch);

            match next {
                Some(next_url) => url = next_url,
                None => return Ok(items),
            }
        }

        warn!(path, max_pages = self.max_pages, "Pagination limit reached");
        Err(ProviderError::Config(format!(
            "listing {path} exceeded {} pages; raise dashboard.max_pages",
            self.max_pages
        )))
    }

    /// Map a non-success response to an error.
    async fn error_for(response: Response) -> ProviderError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response.text().await.unwrap_or_default();
        let message = ErrorResponse::message_from(&text);

        match status {
            StatusCode::NOT_FOUND => ProviderError::NotFound(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(message),
            StatusCode::CONFLICT => ProviderError::Conflict(message),
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
                retry_after_secs: retry_after,
                message,
            },
            _ => ProviderError::Api {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// Handle API response, parsing JSON or error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: Response,
    ) -> Result<T, ProviderError> {
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            warn!(error = %e, body = %text, "Failed to parse response");
            ProviderError::Serialization(e)
        })
    }

    /// Accept any success status, discarding the body.
    async fn check_status(response: Response) -> Result<(), ProviderError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_for(response).await)
        }
    }
}

#[async_trait]
impl DashboardProvider for Meraki {
    async fn list_organizations(&self) -> Result<Vec<Organization>, ProviderError> {
        self.get_all_pages("/organizations").await
    }

    async fn list_inventory_devices(
        &self,
        organization_id: &str,
    ) -> Result<Vec<InventoryDevice>, ProviderError> {
        let devices: Vec<InventoryDevice> = self
            .get_all_pages(&format!("/organizations/{organization_id}/inventory/devices"))
            .await?;
        debug!(organization_id, count = devices.len(), "Listed inventory");
        Ok(devices)
    }

    async fn get_inventory_device(
        &self,
        organization_id: &str,
        serial: &str,
    ) -> Result<InventoryDevice, ProviderError> {
        self.get(&format!(
            "/organizations/{organization_id}/inventory/devices/{serial}"
        ))
        .await
    }

    async fn create_network(
        &self,
        organization_id: &str,
        req: CreateNetworkRequest,
    ) -> Result<Network, ProviderError> {
        info!(
            organization_id,
            name = %req.name,
            time_zone = %req.time_zone,
            "Creating network"
        );

        let network: Network = self
            .post(&format!("/organizations/{organization_id}/networks"), &req)
            .await?;

        info!(network_id = %network.id, "Network created");
        Ok(network)
    }

    async fn claim_devices(
        &self,
        network_id: &str,
        serials: &[String],
    ) -> Result<(), ProviderError> {
        info!(network_id, serials = ?serials, "Claiming devices");
        self.post_empty(
            &format!("/networks/{network_id}/devices/claim"),
            &ClaimDevicesRequest { serials },
        )
        .await
    }

    async fn create_vmx_token(&self, serial: &str) -> Result<VmxAuthToken, ProviderError> {
        info!(serial, "Requesting vMX authentication token");
        self.post(
            &format!("/devices/{serial}/appliance/vmx/authenticationToken"),
            &serde_json::json!({}),
        )
        .await
    }

    async fn list_networks(&self, organization_id: &str) -> Result<Vec<Network>, ProviderError> {
        self.get_all_pages(&format!("/organizations/{organization_id}/networks"))
            .await
    }

    async fn list_network_devices(
        &self,
        network_id: &str,
    ) -> Result<Vec<NetworkDevice>, ProviderError> {
        self.get(&format!("/networks/{network_id}/devices")).await
    }

    async fn remove_device(&self, network_id: &str, serial: &str) -> Result<(), ProviderError> {
        info!(network_id, serial, "Removing device from network");
        self.post_empty(
            &format!("/networks/{network_id}/devices/remove"),
            &RemoveDeviceRequest { serial },
        )
        .await
    }

    async fn delete_network(&self, network_id: &str) -> Result<(), ProviderError> {
        info!(network_id, "Deleting network");
        self.delete(&format!("/networks/{network_id}")).await?;
        info!(network_id, "Network deleted");
        Ok(())
    }
}
