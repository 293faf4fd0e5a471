// Configuration module for segment-recorder
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    let mut config = load_config(path)?;

    // Allow environment variables to override config values
    if let Ok(storage_path) = std::env::var("RECORDER_STORAGE_PATH") {
        config.recording.storage_path = storage_path;
    }

    if let Ok(endpoint) = std::env::var("UPLOAD_ENDPOINT") {
        if let Some(http_config) = config.storage.backend_config.as_http_mut() {
            http_config.url = endpoint.clone();
        }
        if let Some(s3_config) = config.storage.backend_config.as_s3_mut() {
            s3_config.endpoint = endpoint;
        }
    }

    if let Some(s3_config) = config.storage.backend_config.as_s3_mut() {
        if let Ok(access_key) = std::env::var("AWS_ACCESS_KEY_ID") {
            s3_config.access_key = access_key;
        }
        if let Ok(secret_key) = std::env::var("AWS_SECRET_ACCESS_KEY") {
            s3_config.secret_key = secret_key;
        }
    }

    if let Ok(api_token) = std::env::var("UPLOAD_API_TOKEN") {
        if let Some(http_config) = config.storage.backend_config.as_http_mut() {
            http_config.api_token = Some(api_token);
        }
    }

    Ok(config)
}
