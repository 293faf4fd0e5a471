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

// Filesystem backend implementation

use super::backend::{ByteStream, ObjectStore};
use crate::config::FilesystemStoreConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Filesystem backend mirroring uploaded segments into another directory
///
/// Useful for NAS mounts and for running the pipeline without a network store.
pub struct FilesystemStore {
    base_path: PathBuf,
}

/// Sidecar written next to every stored object
#[derive(Debug, Serialize)]
struct ObjectMetadata<'a> {
    key: &'a str,
    size: u64,
    content_type: &'a str,
    stored_at: String,
}

impl FilesystemStore {
    pub fn new(config: FilesystemStoreConfig) -> Result<Self> {
        let base_path = PathBuf::from(&config.base_path);

        info!("Initializing filesystem store at: {}", base_path.display());

        Ok(Self { base_path })
    }

    /// Resolve a key below the base path, rejecting keys that would escape it
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Invalid object key: '{}'", key);
        }
        Ok(self.base_path.join(relative))
    }

    fn metadata_path(object_path: &Path) -> PathBuf {
        let mut name = object_path.as_os_str().to_owned();
        name.push(".meta.json");
        PathBuf::from(name)
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn initialize(&self) -> Result<()> {
        if !self.base_path.exists() {
            info!("Creating base directory: {}", self.base_path.display());
            fs::create_dir_all(&self.base_path)
                .await
                .context("Failed to create base directory")?;
        }
        Ok(())
    }

    async fn put_object(
        &self,
        key: &str,
        mut body: ByteStream,
        size: u64,
        content_type: &str,
    ) -> Result<()> {
        let object_path = self.object_path(key)?;
        if let Some(parent) = object_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create object directory")?;
        }

        debug!("Writing {} bytes to {}", size, object_path.display());

        let mut file = fs::File::create(&object_path)
            .await
            .with_context(|| format!("Failed to create file: {}", object_path.display()))?;

        let written = tokio::io::copy(&mut body, &mut file)
            .await
            .context("Failed to write object data")?;
        file.flush().await.context("Failed to flush object data")?;

        if written != size {
            let _ = fs::remove_file(&object_path).await;
            bail!(
                "Short write for '{}': expected {} bytes, got {}",
                key,
                size,
                written
            );
        }

        let metadata = ObjectMetadata {
            key,
            size,
            content_type,
            stored_at: chrono::Utc::now().to_rfc3339(),
        };
        let metadata_json =
            serde_json::to_string_pretty(&metadata).context("Failed to serialize metadata")?;
        fs::write(Self::metadata_path(&object_path), metadata_json)
            .await
            .context("Failed to write metadata")?;

        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match fs::metadata(&self.base_path).await {
            Ok(metadata) if metadata.is_dir() => {
                let test_file = self.base_path.join(".health_check_test");
                match fs::write(&test_file, b"test").await {
                    Ok(()) => {
                        let _ = fs::remove_file(&test_file).await;
                        Ok(true)
                    }
                    Err(e) => {
                        warn!("Health check failed - cannot write: {}", e);
                        Ok(false)
                    }
                }
            }
            Ok(_) => {
                warn!(
                    "Health check failed - base path is not a directory: {}",
                    self.base_path.display()
                );
                Ok(false)
            }
            Err(e) => {
                warn!(
                    "Health check failed - cannot access base path {}: {}",
                    self.base_path.display(),
                    e
                );
                Ok(false)
            }
        }
    }

    fn backend_type(&self) -> &str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn create_test_store() -> (FilesystemStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = FilesystemStoreConfig {
            base_path: temp_dir.path().join("archive").to_string_lossy().to_string(),
        };
        (FilesystemStore::new(config).unwrap(), temp_dir)
    }

    #[tokio::test]
    async fn test_put_object_keeps_camera_directory() {
        let (store, _temp_dir) = create_test_store();
        store.initialize().await.unwrap();

        let data = b"segment bytes".to_vec();
        store
            .put_object(
                "cam1/cam1-2024-01-01-10-00.mp4",
                Box::new(Cursor::new(data.clone())),
                data.len() as u64,
                "video/mp4",
            )
            .await
            .unwrap();

        let stored = store.base_path.join("cam1/cam1-2024-01-01-10-00.mp4");
        assert_eq!(std::fs::read(&stored).unwrap(), data);

        let meta = std::fs::read_to_string(FilesystemStore::metadata_path(&stored)).unwrap();
        let meta: serde_json::Value = serde_json::from_str(&meta).unwrap();
        assert_eq!(meta["content_type"], "video/mp4");
        assert_eq!(meta["size"], 13);
    }

    #[tokio::test]
    async fn test_put_object_rejects_escaping_key() {
        let (store, _temp_dir) = create_test_store();
        store.initialize().await.unwrap();

        let result = store
            .put_object("../outside.mp4", Box::new(Cursor::new(vec![1u8])), 1, "video/mp4")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_put_object_short_body_fails() {
        let (store, _temp_dir) = create_test_store();
        store.initialize().await.unwrap();

        let result = store
            .put_object("cam1/short.mp4", Box::new(Cursor::new(vec![1u8, 2])), 10, "video/mp4")
            .await;
        assert!(result.is_err());
        assert!(!store.base_path.join("cam1/short.mp4").exists());
    }

    #[tokio::test]
    async fn test_health_check() {
        let (store, _temp_dir) = create_test_store();
        store.initialize().await.unwrap();

        assert!(store.health_check().await.unwrap());
    }
}
