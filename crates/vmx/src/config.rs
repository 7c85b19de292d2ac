//! Provisioning configuration.
//!
//! Deployment-specific values (instance type, machine image, default
//! timezone, appliance model family) are read from an optional TOML file,
//! overridden from the environment, and validated before any remote call.
//!
//! ```toml
//! [dashboard]
//! base_url = "https://api.meraki.com/api/v1"
//!
//! [compute]
//! region = "eu-west-3"
//! image_id = "ami-0123456789abcdef0"
//! instance_type = "c5.large"
//!
//! [pipeline]
//! default_timezone = "Europe/Paris"
//! cleanup_on_failure = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::RetryConfig;

/// Default Dashboard API base URL.
pub const DEFAULT_DASHBOARD_URL: &str = "https://api.meraki.com/api/v1";

/// Default compute region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default instance type for a vMX.
pub const DEFAULT_INSTANCE_TYPE: &str = "c5.large";

/// Default network timezone.
pub const DEFAULT_TIMEZONE: &str = "Europe/Paris";

/// Model prefix identifying virtual appliances in inventory.
pub const DEFAULT_MODEL_PREFIX: &str = "VMX";

/// Default timeout for a single remote call.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value failed validation.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VmxConfig {
    /// Network-management platform settings.
    pub dashboard: DashboardConfig,
    /// Compute platform settings.
    pub compute: ComputeConfig,
    /// Pipeline policy.
    pub pipeline: PipelineSettings,
    /// Retry policy for read-only calls.
    pub retry: RetrySettings,
}

/// Dashboard API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// API base URL.
    pub base_url: String,
    /// Timeout for a single request.
    pub request_timeout_secs: u64,
    /// Page size for paginated listings.
    pub per_page: u32,
    /// Upper bound on pages followed for a single listing.
    pub max_pages: u32,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DASHBOARD_URL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            per_page: 1000,
            max_pages: 100,
        }
    }
}

/// Compute platform settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Region to launch in.
    pub region: String,
    /// Endpoint override (defaults to the regional EC2 endpoint).
    pub endpoint: Option<String>,
    /// Instance type.
    pub instance_type: String,
    /// Machine image identifier. Required.
    pub image_id: String,
    /// Subnet to launch into.
    pub subnet_id: Option<String>,
    /// Security groups attached at launch.
    pub security_group_ids: Vec<String>,
    /// Key pair name.
    pub key_name: Option<String>,
    /// Timeout for a single request.
    pub request_timeout_secs: u64,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            image_id: String::new(),
            subnet_id: None,
            security_group_ids: Vec::new(),
            key_name: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ComputeConfig {
    /// Endpoint to send EC2 requests to.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://ec2.{}.amazonaws.com", self.region))
    }
}

/// Pipeline policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Timezone for new networks when the caller does not supply one.
    pub default_timezone: String,
    /// Inventory model prefix that identifies a virtual appliance.
    pub device_model_prefix: String,
    /// Re-read the device after claiming and require it to sit in our network.
    pub verify_claim: bool,
    /// Delete the created network when the claim step fails.
    pub cleanup_on_failure: bool,
    /// Directory for persisted run state, if any.
    pub state_dir: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            default_timezone: DEFAULT_TIMEZONE.to_string(),
            device_model_prefix: DEFAULT_MODEL_PREFIX.to_string(),
            verify_claim: true,
            cleanup_on_failure: false,
            state_dir: None,
        }
    }
}

/// Retry policy for read-only calls, in config-file units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum attempts including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound on a single delay.
    pub max_delay_ms: u64,
    /// Multiplier applied after each retry.
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    /// Convert to the runtime retry policy.
    #[must_use]
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

impl VmxConfig {
    /// Parse configuration from TOML text.
    ///
    /// # Errors
    /// Returns an error if the text is not valid for this schema.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from an optional file; defaults when `None`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply overrides from process environment variables.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Recognised: `MERAKI_BASE_URL`, `AWS_REGION`, `VMX_EC2_ENDPOINT`,
    /// `VMX_IMAGE_ID`, `VMX_INSTANCE_TYPE`, `VMX_SUBNET_ID`, `VMX_TIMEZONE`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MERAKI_BASE_URL") {
            self.dashboard.base_url = v;
        }
        if let Some(v) = get("AWS_REGION") {
            self.compute.region = v;
        }
        if let Some(v) = get("VMX_EC2_ENDPOINT") {
            self.compute.endpoint = Some(v);
        }
        if let Some(v) = get("VMX_IMAGE_ID") {
            self.compute.image_id = v;
        }
        if let Some(v) = get("VMX_INSTANCE_TYPE") {
            self.compute.instance_type = v;
        }
        if let Some(v) = get("VMX_SUBNET_ID") {
            self.compute.subnet_id = Some(v);
        }
        if let Some(v) = get("VMX_TIMEZONE") {
            self.pipeline.default_timezone = v;
        }
    }

    /// Validate every section.
    ///
    /// # Errors
    /// Returns the first invalid value found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("dashboard.base_url", &self.dashboard.base_url)?;
        if self.dashboard.request_timeout_secs == 0 {
            return invalid("dashboard.request_timeout_secs must be greater than zero");
        }
        if !(3..=1000).contains(&self.dashboard.per_page) {
            return invalid("dashboard.per_page must be between 3 and 1000");
        }
        if self.dashboard.max_pages == 0 {
            return invalid("dashboard.max_pages must be at least 1");
        }

        if self.compute.region.trim().is_empty() {
            return invalid("compute.region must not be empty");
        }
        if let Some(endpoint) = &self.compute.endpoint {
            validate_url("compute.endpoint", endpoint)?;
        }
        if self.compute.image_id.trim().is_empty() {
            return invalid("compute.image_id is required (set it in the config file or VMX_IMAGE_ID)");
        }
        if !self.compute.image_id.starts_with("ami-") {
            return invalid(format!(
                "compute.image_id '{}' is not a machine image id (expected 'ami-...')",
                self.compute.image_id
            ));
        }
        if self.compute.instance_type.trim().is_empty() || !self.compute.instance_type.contains('.') {
            return invalid(format!(
                "compute.instance_type '{}' is not an instance type (expected e.g. 'c5.large')",
                self.compute.instance_type
            ));
        }
        if self.compute.request_timeout_secs == 0 {
            return invalid("compute.request_timeout_secs must be greater than zero");
        }

        let tz = &self.pipeline.default_timezone;
        if tz.is_empty() || tz.chars().any(char::is_whitespace) {
            return invalid(format!("pipeline.default_timezone '{tz}' is not a timezone name"));
        }
        if self.pipeline.device_model_prefix.trim().is_empty() {
            return invalid("pipeline.device_model_prefix must not be empty");
        }

        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.retry.backoff_multiplier < 1.0 {
            return invalid("retry.backoff_multiplier must be at least 1.0");
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.initial_delay_ms must not exceed retry.max_delay_ms");
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid(message.into()))
}

fn validate_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::Invalid(format!("{field} '{value}' is not a URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return invalid(format!("{field} must use http or https"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn valid() -> VmxConfig {
        let mut config = VmxConfig::default();
        config.compute.image_id = "ami-0123456789abcdef0".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = VmxConfig::default();
        assert_eq!(config.compute.instance_type, "c5.large");
        assert_eq!(config.pipeline.default_timezone, "Europe/Paris");
        assert_eq!(config.pipeline.device_model_prefix, "VMX");
        assert!(config.pipeline.verify_claim);
        assert!(!config.pipeline.cleanup_on_failure);
        assert_eq!(config.dashboard.base_url, DEFAULT_DASHBOARD_URL);
    }

    #[test]
    fn test_image_id_is_required() {
        let err = VmxConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("image_id"));
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = VmxConfig::from_toml_str(
            r#"
            [compute]
            region = "eu-west-3"
            image_id = "ami-0abc"
            security_group_ids = ["sg-1", "sg-2"]

            [pipeline]
            cleanup_on_failure = true
            "#,
        )
        .unwrap();

        assert_eq!(config.compute.region, "eu-west-3");
        assert_eq!(config.compute.instance_type, DEFAULT_INSTANCE_TYPE);
        assert_eq!(config.compute.security_group_ids.len(), 2);
        assert!(config.pipeline.cleanup_on_failure);
        assert_eq!(config.compute.endpoint_url(), "https://ec2.eu-west-3.amazonaws.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_wrong_field_type_is_rejected() {
        let err = VmxConfig::from_toml_str("[dashboard]\nper_page = \"many\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("VMX_IMAGE_ID", "ami-override"),
            ("VMX_INSTANCE_TYPE", "c5.xlarge"),
            ("VMX_TIMEZONE", "America/New_York"),
            ("AWS_REGION", "   "),
        ]
        .into_iter()
        .collect();

        let mut config = VmxConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.compute.image_id, "ami-override");
        assert_eq!(config.compute.instance_type, "c5.xlarge");
        assert_eq!(config.pipeline.default_timezone, "America/New_York");
        // Blank values are ignored.
        assert_eq!(config.compute.region, DEFAULT_REGION);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = valid();
        config.compute.image_id = "image-1".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.dashboard.per_page = 5000;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.dashboard.base_url = "ftp://example.test".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.pipeline.default_timezone = "Europe Paris".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = VmxConfig::load(Some(Path::new("/nonexistent/vmx.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_retry_settings_conversion() {
        let retry = RetrySettings::default().to_retry_config();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.initial_delay, Duration::from_millis(500));
    }
}
