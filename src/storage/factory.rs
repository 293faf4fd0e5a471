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

// Backend factory for creating object stores from configuration

use super::backend::ObjectStore;
use super::filesystem::FilesystemStore;
use super::http::HttpStore;
use super::s3::S3Store;
use crate::config::{ProxyConfig, StorageConfig};
use anyhow::{bail, Result};
use std::sync::Arc;

pub struct BackendFactory;

impl BackendFactory {
    /// Create an object store from configuration
    ///
    /// The proxy configuration is only consulted by network-backed stores.
    pub fn create(config: &StorageConfig, proxy: &ProxyConfig) -> Result<Arc<dyn ObjectStore>> {
        match config.backend.as_str() {
            "s3" => {
                let backend_config = config
                    .backend_config
                    .as_s3()
                    .ok_or_else(|| anyhow::anyhow!("S3 store config missing"))?;

                let store = S3Store::new(backend_config.clone(), Some(proxy))?;
                Ok(Arc::new(store))
            }

            "http" => {
                let backend_config = config
                    .backend_config
                    .as_http()
                    .ok_or_else(|| anyhow::anyhow!("HTTP store config missing"))?;

                let store = HttpStore::new(backend_config.clone(), Some(proxy))?;
                Ok(Arc::new(store))
            }

            "filesystem" => {
                let backend_config = config
                    .backend_config
                    .as_filesystem()
                    .ok_or_else(|| anyhow::anyhow!("Filesystem config missing"))?;

                let store = FilesystemStore::new(backend_config.clone())?;
                Ok(Arc::new(store))
            }

            unknown => bail!(
                "Unknown storage backend: '{}'. Supported: s3, http, filesystem",
                unknown
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, FilesystemStoreConfig, HttpStoreConfig, S3StoreConfig};

    #[test]
    fn test_create_http_store() {
        let storage_config = StorageConfig::default();

        let store = BackendFactory::create(&storage_config, &ProxyConfig::default());
        assert_eq!(store.unwrap().backend_type(), "http");
    }

    #[tokio::test]
    async fn test_create_s3_store() {
        let storage_config = StorageConfig {
            backend: "s3".to_string(),
            backend_config: BackendConfig::S3 {
                s3: S3StoreConfig {
                    endpoint: "http://127.0.0.1:9000".to_string(),
                    access_key: "AKIDEXAMPLE".to_string(),
                    secret_key: "secret".to_string(),
                    ..Default::default()
                },
            },
        };

        let store = BackendFactory::create(&storage_config, &ProxyConfig::default());
        assert_eq!(store.unwrap().backend_type(), "s3");
    }

    #[test]
    fn test_create_filesystem_store() {
        let storage_config = StorageConfig {
            backend: "filesystem".to_string(),
            backend_config: BackendConfig::Filesystem {
                filesystem: FilesystemStoreConfig::default(),
            },
        };

        let store = BackendFactory::create(&storage_config, &ProxyConfig::default());
        assert_eq!(store.unwrap().backend_type(), "filesystem");
    }

    #[test]
    fn test_create_mismatched_backend() {
        let storage_config = StorageConfig {
            backend: "filesystem".to_string(),
            backend_config: BackendConfig::Http {
                http: HttpStoreConfig::default(),
            },
        };

        assert!(BackendFactory::create(&storage_config, &ProxyConfig::default()).is_err());
    }

    #[test]
    fn test_create_unknown_backend() {
        let storage_config = StorageConfig {
            backend: "unknown_backend".to_string(),
            ..Default::default()
        };

        let store = BackendFactory::create(&storage_config, &ProxyConfig::default());
        if let Err(e) = store {
            assert!(e.to_string().contains("Unknown storage backend"));
        } else {
            panic!("expected an error for an unknown backend");
        }
    }
}
