//! Configuration system (layered: code > env > config file).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FlowError;

/// Password sent to providers that require one when the flow is passwordless.
pub const DEFAULT_SENTINEL_PASSWORD: &str = "TempPassword123!";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_STORAGE_KEY_PREFIX: &str = "CognitoIdentityServiceProvider";
pub const DEFAULT_CUSTOM_KEY_PREFIX: &str = "Passwordless";

const DEFAULT_REFRESH_MARGIN_SECS: u64 = 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Settings shared by the orchestrator, the credential store and the gateway.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use passflow::config::FlowConfig;
///
/// let config = FlowConfig::new("my-client-id")
///     .with_region("eu-west-1")
///     .with_refresh_margin(Duration::from_secs(120));
/// assert_eq!(config.client_id, "my-client-id");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub client_id: String,
    pub region: String,
    /// Overrides the regional endpoint; used for local testing.
    pub endpoint: Option<String>,
    pub storage_key_prefix: String,
    pub custom_key_prefix: String,
    pub sentinel_password: String,
    #[serde(with = "duration_secs")]
    pub refresh_margin: Duration,
    #[serde(with = "duration_secs")]
    pub http_timeout: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            storage_key_prefix: DEFAULT_STORAGE_KEY_PREFIX.to_string(),
            custom_key_prefix: DEFAULT_CUSTOM_KEY_PREFIX.to_string(),
            sentinel_password: DEFAULT_SENTINEL_PASSWORD.to_string(),
            refresh_margin: Duration::from_secs(DEFAULT_REFRESH_MARGIN_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl FlowConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Load from environment variables (`PASSFLOW_CLIENT_ID`, `PASSFLOW_REGION`, ...).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load a TOML file, then let environment variables override it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            FlowError::Configuration(format!("cannot read {}: {err}", path.display()))
        })?;
        let mut config: FlowConfig = toml::from_str(&raw)?;
        let _ = dotenvy::dotenv();
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(client_id) = std::env::var("PASSFLOW_CLIENT_ID") {
            self.client_id = client_id;
        }
        if let Ok(region) = std::env::var("PASSFLOW_REGION") {
            self.region = region;
        }
        if let Ok(endpoint) = std::env::var("PASSFLOW_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
        if let Some(secs) = std::env::var("PASSFLOW_REFRESH_MARGIN_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.refresh_margin = Duration::from_secs(secs);
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_sentinel_password(mut self, password: impl Into<String>) -> Self {
        self.sentinel_password = password.into();
        self
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Endpoint the gateway posts to.
    pub fn resolved_endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://cognito-idp.{}.amazonaws.com/", self.region),
        }
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        if self.client_id.trim().is_empty() {
            return Err(FlowError::Configuration("client_id is not set".to_string()));
        }
        Ok(())
    }

    /// Default directory for file-backed credential storage (~/.passflow).
    pub fn default_storage_dir() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".passflow"))
            .unwrap_or_else(|| PathBuf::from(".passflow"))
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
