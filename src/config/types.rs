// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Configuration types for segment-recorder

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RecorderConfig {
    #[serde(default)]
    pub recording: RecordingSettings,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub upload: UploadSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub retention: RetentionSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Local recording layout and disk quota
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordingSettings {
    #[serde(default = "default_segment_duration")]
    pub segment_duration_seconds: u64,

    #[serde(default = "default_storage_path")]
    pub storage_path: String,

    #[serde(default = "default_max_disk_usage_gb")]
    pub max_disk_usage_gb: u64,

    /// Container extension of the encoder output, without the dot
    #[serde(default = "default_segment_extension")]
    pub segment_extension: String,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            segment_duration_seconds: default_segment_duration(),
            storage_path: default_storage_path(),
            max_disk_usage_gb: default_max_disk_usage_gb(),
            segment_extension: default_segment_extension(),
        }
    }
}

impl RecordingSettings {
    pub fn storage_root(&self) -> PathBuf {
        PathBuf::from(&self.storage_path)
    }

    pub fn quota_bytes(&self) -> u64 {
        self.max_disk_usage_gb.saturating_mul(1024 * 1024 * 1024)
    }
}

/// One camera / live source
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CameraConfig {
    pub name: String,
    pub source_url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// External encoder invocation and supervision timings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncoderConfig {
    #[serde(default = "default_encoder_program")]
    pub program: String,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_crf")]
    pub crf: u8,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    #[serde(default = "default_restart_delay")]
    pub restart_delay_seconds: u64,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: u64,
    #[serde(default = "default_watch_interval")]
    pub watch_interval_seconds: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: default_encoder_program(),
            video_codec: default_video_codec(),
            preset: default_preset(),
            crf: default_crf(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            restart_delay_seconds: default_restart_delay(),
            stop_timeout_seconds: default_stop_timeout(),
            watch_interval_seconds: default_watch_interval(),
        }
    }
}

impl EncoderConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_seconds)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_seconds)
    }
}

/// Upload queue and worker pool
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_upload_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_seconds: u64,

    /// Upper bound for a single upload call
    #[serde(default = "default_upload_timeout")]
    pub timeout_seconds: u64,

    /// Settling delay before the startup reconciliation scan
    #[serde(default = "default_scan_delay")]
    pub scan_delay_seconds: u64,

    /// Files younger than this are left alone by the startup scan
    #[serde(default = "default_min_file_age")]
    pub min_file_age_seconds: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: default_upload_workers(),
            queue_capacity: default_queue_capacity(),
            max_retries: default_max_retries(),
            retry_base_delay_seconds: default_retry_base_delay(),
            timeout_seconds: default_upload_timeout(),
            scan_delay_seconds: default_scan_delay(),
            min_file_age_seconds: default_min_file_age(),
        }
    }
}

/// Object storage configuration with backend selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Backend type: "s3", "http" or "filesystem"
    pub backend: String,

    /// Backend-specific configuration
    #[serde(flatten)]
    pub backend_config: BackendConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "http".to_string(),
            backend_config: BackendConfig::Http {
                http: HttpStoreConfig::default(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BackendConfig {
    Http {
        #[serde(rename = "http")]
        http: HttpStoreConfig,
    },
    Filesystem {
        #[serde(rename = "filesystem")]
        filesystem: FilesystemStoreConfig,
    },
    S3 {
        #[serde(rename = "s3")]
        s3: S3StoreConfig,
    },
}

impl BackendConfig {
    pub fn as_http(&self) -> Option<&HttpStoreConfig> {
        match self {
            BackendConfig::Http { http } => Some(http),
            _ => None,
        }
    }

    pub fn as_http_mut(&mut self) -> Option<&mut HttpStoreConfig> {
        match self {
            BackendConfig::Http { http } => Some(http),
            _ => None,
        }
    }

    pub fn as_filesystem(&self) -> Option<&FilesystemStoreConfig> {
        match self {
            BackendConfig::Filesystem { filesystem } => Some(filesystem),
            _ => None,
        }
    }

    pub fn as_s3(&self) -> Option<&S3StoreConfig> {
        match self {
            BackendConfig::S3 { s3 } => Some(s3),
            _ => None,
        }
    }

    pub fn as_s3_mut(&mut self) -> Option<&mut S3StoreConfig> {
        match self {
            BackendConfig::S3 { s3 } => Some(s3),
            _ => None,
        }
    }
}

/// S3-compatible object storage (AWS, MinIO, Ceph RGW, ...)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3StoreConfig {
    /// Custom endpoint; empty means the AWS endpoint for `region`
    #[serde(default)]
    pub endpoint: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,

    /// `{endpoint}/{bucket}/{key}` addressing, needed by most self-hosted stores
    #[serde(default = "default_true")]
    pub force_path_style: bool,

    #[serde(default = "default_upload_timeout")]
    pub timeout_seconds: u64,
}

impl Default for S3StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: "recordings".to_string(),
            region: default_region(),
            access_key: String::new(),
            secret_key: String::new(),
            force_path_style: true,
            timeout_seconds: default_upload_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpStoreConfig {
    pub url: String,
    pub bucket: String,
    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_upload_timeout")]
    pub timeout_seconds: u64,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9000".to_string(),
            bucket: "recordings".to_string(),
            api_token: None,
            timeout_seconds: default_upload_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesystemStoreConfig {
    pub base_path: String,
}

impl Default for FilesystemStoreConfig {
    fn default() -> Self {
        Self {
            base_path: "/data/archive".to_string(),
        }
    }
}

/// HTTP proxy used by network-backed stores
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Full proxy URL with credentials embedded, or None when disabled
    pub fn proxy_url(&self) -> Option<String> {
        if !self.enabled || self.address.is_empty() {
            return None;
        }

        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            if !user.is_empty() && !pass.is_empty() {
                for scheme in ["http://", "https://"] {
                    if let Some(rest) = self.address.strip_prefix(scheme) {
                        return Some(format!("{}{}:{}@{}", scheme, user, pass, rest));
                    }
                }
            }
        }

        Some(self.address.clone())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionSettings {
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            check_interval_seconds: default_check_interval(),
        }
    }
}

impl RetentionSettings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_segment_duration() -> u64 { 600 }
fn default_storage_path() -> String { "./recordings".to_string() }
fn default_max_disk_usage_gb() -> u64 { 50 }
fn default_segment_extension() -> String { "mp4".to_string() }
fn default_encoder_program() -> String { "ffmpeg".to_string() }
fn default_video_codec() -> String { "libx265".to_string() }
fn default_preset() -> String { "fast".to_string() }
fn default_crf() -> u8 { 23 }
fn default_audio_codec() -> String { "aac".to_string() }
fn default_audio_bitrate() -> String { "128k".to_string() }
fn default_restart_delay() -> u64 { 5 }
fn default_stop_timeout() -> u64 { 15 }
fn default_watch_interval() -> u64 { 3 }
fn default_upload_workers() -> usize { 3 }
fn default_queue_capacity() -> usize { 1000 }
fn default_max_retries() -> u32 { 5 }
fn default_retry_base_delay() -> u64 { 30 }
fn default_upload_timeout() -> u64 { 1800 }
fn default_scan_delay() -> u64 { 5 }
fn default_min_file_age() -> u64 { 30 }
fn default_check_interval() -> u64 { 300 }
fn default_region() -> String { "us-east-1".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
