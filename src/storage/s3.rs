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

// S3-compatible object store backend

use super::backend::{ByteStream, ObjectStore};
use crate::config::{ProxyConfig, S3StoreConfig};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream as S3Body;
use aws_sdk_s3::Client;
use aws_smithy_http_client::proxy::ProxyConfig as TransportProxy;
use aws_smithy_http_client::tls;
use aws_smithy_types::body::SdkBody;
use aws_smithy_types::error::display::DisplayErrorContext;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

/// Object store speaking the S3 API (`PutObject` signed with SigV4)
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Build the client; `proxy` is the transport configuration supplied by the caller
    pub fn new(config: S3StoreConfig, proxy: Option<&ProxyConfig>) -> Result<Self> {
        let mut http_builder = aws_smithy_http_client::Builder::new();
        if let Some(proxy_url) = proxy.and_then(ProxyConfig::proxy_url) {
            let transport_proxy =
                TransportProxy::all(proxy_url.as_str()).context("Invalid proxy address")?;
            http_builder = http_builder.proxy_config(transport_proxy);
            info!("S3 uploads will go through proxy {}", super::http::redact_credentials(&proxy_url));
        }
        let http_client = http_builder
            .tls_provider(tls::Provider::Rustls(tls::rustls_provider::CryptoMode::AwsLc))
            .build_https();

        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "segment-recorder",
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style)
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(Duration::from_secs(config.timeout_seconds))
                    .build(),
            )
            .http_client(http_client);

        if !config.endpoint.is_empty() {
            builder = builder.endpoint_url(config.endpoint.trim_end_matches('/'));
        }

        info!(
            "Initializing S3 store: bucket '{}', region '{}', endpoint '{}'",
            config.bucket,
            config.region,
            if config.endpoint.is_empty() { "aws" } else { config.endpoint.as_str() }
        );

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn initialize(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| anyhow!("Bucket '{}' is not accessible: {}", self.bucket, DisplayErrorContext(&e)))?;
        info!("Bucket '{}' is accessible", self.bucket);
        Ok(())
    }

    async fn put_object(
        &self,
        key: &str,
        body: ByteStream,
        size: u64,
        content_type: &str,
    ) -> Result<()> {
        let content_length = i64::try_from(size).context("Object too large")?;
        // reqwest's body adapts the reader stream to http-body 1.x for the SDK
        let body = S3Body::new(SdkBody::from_body_1_x(reqwest::Body::wrap_stream(
            ReaderStream::new(body),
        )));

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(content_length)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| anyhow!("PutObject {} failed: {}", key, DisplayErrorContext(&e)))?;

        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Health check failed: {}", DisplayErrorContext(&e));
                Ok(false)
            }
        }
    }

    fn backend_type(&self) -> &str {
        "s3"
    }
}
