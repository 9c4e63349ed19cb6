//! Configuration loading for the sketchforge API service.
//!
//! Settings come from optional config files and the process environment
//! (after `.env` has been loaded by `main`). Environment variables are flat,
//! e.g. `S3_BUCKET_NAME` -> `s3_bucket_name`. Required credentials are
//! validated together so a misconfigured deployment reports every missing
//! variable at once.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingRequired(Vec<String>),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}

/// Main configuration for the API service
#[derive(Debug, Clone)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// HTTP API configuration
    pub api: ApiConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// fal.ai inference configuration
    pub inference: InferenceConfig,
}

/// Service-level configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Metrics port
    pub metrics_port: u16,
}

/// HTTP listener configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for multipart request bodies
    pub max_upload_bytes: usize,
}

/// S3 storage configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
    /// Key of the pre-uploaded demo model
    pub demo_model_key: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    pub force_path_style: bool,
}

/// Inference service configuration
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub api_key: String,
    /// Base URL of the fal queue API
    pub queue_url: String,
    /// Base URL of the fal REST API (storage uploads)
    pub rest_url: String,
    /// Model endpoint to submit jobs to
    pub model_endpoint: String,
    /// Upper bound on submit + poll + result fetch
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Timeout for downloading the generated mesh
    pub mesh_download_timeout_secs: u64,
}

/// Flat view of the environment as deserialized by the `config` crate.
///
/// Every field is optional here; [`Config::from_settings`] decides what is
/// required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSettings {
    pub fal_key: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region_name: Option<String>,
    pub s3_bucket_name: Option<String>,
    pub model_s3_key: Option<String>,

    pub service_name: Option<String>,
    pub log_level: Option<String>,
    pub metrics_port: Option<u16>,
    pub api_host: Option<String>,
    pub api_port: Option<u16>,
    pub max_upload_bytes: Option<usize>,
    pub s3_endpoint_url: Option<String>,
    pub s3_force_path_style: Option<bool>,
    pub fal_queue_url: Option<String>,
    pub fal_rest_url: Option<String>,
    pub fal_model_endpoint: Option<String>,
    pub inference_timeout_secs: Option<u64>,
    pub inference_poll_interval_ms: Option<u64>,
    pub mesh_download_timeout_secs: Option<u64>,
}

// Default value functions
fn default_service_name() -> String {
    "sketchforge-api".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8000
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024 // 20MB
}

fn default_demo_model_key() -> String {
    "model.glb".to_string()
}

fn default_queue_url() -> String {
    "https://queue.fal.run".to_string()
}

fn default_rest_url() -> String {
    "https://rest.alpha.fal.ai".to_string()
}

fn default_model_endpoint() -> String {
    "fal-ai/triposr".to_string()
}

fn default_inference_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_mesh_download_timeout_secs() -> u64 {
    120
}

/// Treat unset and blank values the same way.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from config files and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/sketchforge").required(false))
            .add_source(config::File::with_name("/etc/sketchforge/sketchforge").required(false))
            // FAL_KEY -> fal_key, S3_BUCKET_NAME -> s3_bucket_name
            .add_source(config::Environment::default().try_parsing(false))
            .build()?;

        let raw: RawSettings = settings.try_deserialize()?;
        Self::from_settings(raw)
    }

    /// Validate raw settings and fill in defaults.
    pub fn from_settings(raw: RawSettings) -> Result<Self, ConfigError> {
        let fal_key = non_empty(raw.fal_key);
        let access_key_id = non_empty(raw.aws_access_key_id);
        let secret_access_key = non_empty(raw.aws_secret_access_key);
        let region = non_empty(raw.aws_region_name);
        let bucket = non_empty(raw.s3_bucket_name);

        let missing: Vec<String> = [
            ("FAL_KEY", fal_key.is_none()),
            ("AWS_ACCESS_KEY_ID", access_key_id.is_none()),
            ("AWS_SECRET_ACCESS_KEY", secret_access_key.is_none()),
            ("AWS_REGION_NAME", region.is_none()),
            ("S3_BUCKET_NAME", bucket.is_none()),
        ]
        .into_iter()
        .filter(|(_, absent)| *absent)
        .map(|(name, _)| name.to_string())
        .collect();

        // Each of these is Some when `missing` is empty.
        let (
            Some(fal_key),
            Some(access_key_id),
            Some(secret_access_key),
            Some(region),
            Some(bucket),
        ) = (fal_key, access_key_id, secret_access_key, region, bucket)
        else {
            return Err(ConfigError::MissingRequired(missing));
        };

        let config = Self {
            service: ServiceConfig {
                name: non_empty(raw.service_name).unwrap_or_else(default_service_name),
                log_level: non_empty(raw.log_level).unwrap_or_else(default_log_level),
                metrics_port: raw.metrics_port.unwrap_or_else(default_metrics_port),
            },
            api: ApiConfig {
                host: non_empty(raw.api_host).unwrap_or_else(default_api_host),
                port: raw.api_port.unwrap_or_else(default_api_port),
                max_upload_bytes: raw.max_upload_bytes.unwrap_or_else(default_max_upload_bytes),
            },
            s3: S3Config {
                access_key_id,
                secret_access_key,
                region,
                bucket,
                demo_model_key: non_empty(raw.model_s3_key).unwrap_or_else(default_demo_model_key),
                endpoint_url: non_empty(raw.s3_endpoint_url),
                force_path_style: raw.s3_force_path_style.unwrap_or(false),
            },
            inference: InferenceConfig {
                api_key: fal_key,
                queue_url: non_empty(raw.fal_queue_url).unwrap_or_else(default_queue_url),
                rest_url: non_empty(raw.fal_rest_url).unwrap_or_else(default_rest_url),
                model_endpoint: non_empty(raw.fal_model_endpoint)
                    .unwrap_or_else(default_model_endpoint),
                timeout_secs: raw
                    .inference_timeout_secs
                    .unwrap_or_else(default_inference_timeout_secs),
                poll_interval_ms: raw
                    .inference_poll_interval_ms
                    .unwrap_or_else(default_poll_interval_ms),
                mesh_download_timeout_secs: raw
                    .mesh_download_timeout_secs
                    .unwrap_or_else(default_mesh_download_timeout_secs),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.inference.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INFERENCE_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.inference.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INFERENCE_POLL_INTERVAL_MS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.api.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_UPLOAD_BYTES".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl InferenceConfig {
    /// Get the bounded inference wait as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get the status poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get the mesh download timeout as Duration
    pub fn mesh_download_timeout(&self) -> Duration {
        Duration::from_secs(self.mesh_download_timeout_secs)
    }
}
