// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        Self::parse(&content)
    }

    /// Parse configuration text, substituting environment variables first
    pub fn parse(content: &str) -> Result<RecorderConfig> {
        let content = Self::substitute_env_vars(content);

        let config: RecorderConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${CAMERA_URL:-rtsp://127.0.0.1/live} -> rtsp://127.0.0.1/live (if CAMERA_URL not set)
    fn substitute_env_vars(content: &str) -> String {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}").unwrap();

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    // Keep original if no default and var not found
                    None => format!("${{{}}}", var_name),
                },
            }
        })
        .to_string()
    }

    /// Validate configuration
    fn validate(config: &RecorderConfig) -> Result<()> {
        if config.cameras.is_empty() {
            bail!("at least one camera must be configured");
        }

        let camera_name_re = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap();
        let mut names = HashSet::new();
        for (index, camera) in config.cameras.iter().enumerate() {
            if camera.name.trim().is_empty() {
                bail!("cameras[{}].name cannot be empty", index);
            }
            if camera.name.contains('/') || camera.name.contains('\\') {
                bail!("camera name '{}' must not contain path separators", camera.name);
            }
            // Names become a directory under the storage root and an object key segment
            if !camera_name_re.is_match(&camera.name) {
                bail!(
                    "camera name '{}' must start with a letter or digit and contain only letters, digits, '.', '_' or '-'",
                    camera.name
                );
            }
            if camera.source_url.trim().is_empty() {
                bail!("camera '{}' source_url cannot be empty", camera.name);
            }
            if !names.insert(camera.name.as_str()) {
                bail!("duplicate camera name '{}'", camera.name);
            }
        }

        if config.recording.segment_duration_seconds == 0 {
            bail!("recording.segment_duration_seconds must be > 0");
        }

        if config.recording.segment_extension.is_empty() {
            bail!("recording.segment_extension cannot be empty");
        }

        if config.encoder.watch_interval_seconds == 0 {
            bail!("encoder.watch_interval_seconds must be > 0");
        }

        if config.retention.check_interval_seconds == 0 {
            bail!("retention.check_interval_seconds must be > 0");
        }

        if config.upload.workers == 0 {
            bail!("upload.workers must be > 0");
        }

        if config.upload.queue_capacity == 0 {
            bail!("upload.queue_capacity must be > 0");
        }

        // Validate backend
        match config.storage.backend.as_str() {
            "http" => {
                if config.storage.backend_config.as_http().is_none() {
                    bail!("http backend selected but http config missing");
                }
            }
            "filesystem" => {
                if config.storage.backend_config.as_filesystem().is_none() {
                    bail!("filesystem backend selected but filesystem config missing");
                }
            }
            "s3" => match config.storage.backend_config.as_s3() {
                None => bail!("s3 backend selected but s3 config missing"),
                Some(s3) => {
                    if s3.bucket.is_empty() {
                        bail!("storage.s3.bucket cannot be empty");
                    }
                    if s3.access_key.is_empty() || s3.secret_key.is_empty() {
                        bail!("storage.s3.access_key and storage.s3.secret_key are required");
                    }
                }
            },
            unknown => bail!("Unknown backend: '{}'. Supported: s3, http, filesystem", unknown),
        }

        if config.proxy.enabled && config.proxy.address.is_empty() {
            bail!("proxy.address cannot be empty when the proxy is enabled");
        }

        Ok(())
    }
}
