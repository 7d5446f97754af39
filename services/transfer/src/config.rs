use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised when a loaded configuration is unusable
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingField(String),

    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Main configuration for the transfer service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Remote dataset service configuration
    pub dataset: DatasetConfig,
    /// Destination Data Lake configuration
    pub storage: StorageConfig,
    /// Local image persistence configuration
    #[serde(default)]
    pub persist: PersistConfig,
    /// Pipeline behaviour
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format (json or pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Prometheus exporter port; no exporter when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Dataset service connection and paging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    /// Dataset to transfer
    pub dataset_id: String,
    /// API key secret
    pub api_key: String,
    /// API key ID, used as the auth entity
    pub api_key_id: String,
    /// gRPC endpoint of the data API
    #[serde(default = "default_dataset_endpoint")]
    pub endpoint: String,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Identifiers requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    /// Upper bound on pages before the listing is abandoned
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Identifiers per bulk fetch call
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: usize,
}

/// Azure Data Lake Storage Gen2 configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Storage account name
    pub storage_account: String,
    /// Container (file system) name
    pub container_name: String,
    /// Shared access signature, with or without the leading '?'
    pub sas_token: String,
    /// Custom endpoint URL (for Azurite, sovereign clouds, etc.)
    pub endpoint_url: Option<String>,
    /// REST API version sent as x-ms-version
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Optional local dump of fetched images
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersistConfig {
    /// Write each fetched payload to `output_dir`
    #[serde(default)]
    pub save_persisted_images: bool,
    /// Directory receiving `{index}.jpg` files
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

/// Pipeline driver behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Stop the transfer loop at the first failed record
    #[serde(default)]
    pub halt_on_error: bool,
    /// Total time spent retrying transient connect failures (0 = no retry)
    #[serde(default = "default_connect_max_elapsed_secs")]
    pub connect_max_elapsed_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "dataset-transfer".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_dataset_endpoint() -> String {
    "https://app.viam.com:443".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_page_size() -> u64 {
    50
}

fn default_max_pages() -> usize {
    10_000
}

fn default_fetch_batch_size() -> usize {
    100
}

fn default_api_version() -> String {
    "2021-06-08".to_string()
}

fn default_connect_max_elapsed_secs() -> u64 {
    60
}

impl Config {
    /// Load configuration from config files and environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/transfer").required(false))
            .add_source(config::File::with_name("/etc/dataset-transfer/transfer").required(false))
            // Override with environment variables
            // TRANSFER__DATASET__API_KEY -> dataset.api_key
            .add_source(
                config::Environment::with_prefix("TRANSFER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate required fields and bounds
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let required = [
            ("dataset.dataset_id", &self.dataset.dataset_id),
            ("dataset.api_key", &self.dataset.api_key),
            ("dataset.api_key_id", &self.dataset.api_key_id),
            ("storage.storage_account", &self.storage.storage_account),
            ("storage.container_name", &self.storage.container_name),
            ("storage.sas_token", &self.storage.sas_token),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigValidationError::MissingField(field.to_string()));
            }
        }

        if !self.dataset.endpoint.starts_with("https://")
            && !self.dataset.endpoint.starts_with("http://")
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "dataset.endpoint".to_string(),
                message: "Endpoint must start with http:// or https://".to_string(),
            });
        }

        if self.dataset.page_size == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "dataset.page_size".to_string(),
                message: "Page size must be greater than 0".to_string(),
            });
        }

        if self.dataset.max_pages == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "dataset.max_pages".to_string(),
                message: "Page limit must be greater than 0".to_string(),
            });
        }

        if self.dataset.fetch_batch_size == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "dataset.fetch_batch_size".to_string(),
                message: "Batch size must be greater than 0".to_string(),
            });
        }

        if self.persist.save_persisted_images && self.persist.output_dir.is_none() {
            return Err(ConfigValidationError::MissingField(
                "persist.output_dir".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the connect retry budget as Duration
    pub fn connect_max_elapsed(&self) -> Duration {
        Duration::from_secs(self.pipeline.connect_max_elapsed_secs)
    }
}

impl DatasetConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl StorageConfig {
    /// Base URL of the DFS endpoint, without trailing slash
    pub fn endpoint(&self) -> String {
        match self.endpoint_url {
            Some(ref url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.dfs.core.windows.net", self.storage_account),
        }
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            halt_on_error: false,
            connect_max_elapsed_secs: default_connect_max_elapsed_secs(),
        }
    }
}
