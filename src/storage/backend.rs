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

// Object store trait consumed by the upload queue

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Byte stream handed to a store; segments are streamed, never buffered whole
pub type ByteStream = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Write-only object storage capability
///
/// The upload queue only ever stores a segment under a key. Endpoint,
/// credentials and transport (proxying, timeouts) are the concern of the
/// implementation and are fixed at construction time.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Initialize the backend (create bucket/directory if needed)
    async fn initialize(&self) -> Result<()>;

    /// Store `size` bytes read from `body` under `key`
    ///
    /// # Arguments
    /// * `key` - Object key, the segment path relative to the storage root
    /// * `body` - Segment bytes
    /// * `size` - Exact length of `body`
    /// * `content_type` - MIME type recorded with the object
    async fn put_object(
        &self,
        key: &str,
        body: ByteStream,
        size: u64,
        content_type: &str,
    ) -> Result<()>;

    /// Health check
    async fn health_check(&self) -> Result<bool>;

    /// Get backend type identifier
    fn backend_type(&self) -> &str;
}
