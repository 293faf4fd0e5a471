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

// Disk quota enforcement by evicting uploaded segments oldest-first

use crate::ledger::Ledger;
use crate::segment::{disk_usage, scan_segments, SegmentFile};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Result of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub usage_before: u64,
    pub usage_after: u64,
    pub deleted: Vec<PathBuf>,
    /// Over-quota candidates kept because they were never uploaded
    pub skipped_not_uploaded: usize,
}

/// Periodically deletes uploaded segments until usage fits the quota
///
/// A segment missing from the ledger's uploaded set is never deleted, no
/// matter how far over quota the disk is.
pub struct RetentionSweeper {
    storage_root: PathBuf,
    extension: String,
    quota_bytes: u64,
    interval: Duration,
    ledger: Arc<Ledger>,
}

impl RetentionSweeper {
    pub fn new(
        storage_root: PathBuf,
        extension: impl Into<String>,
        quota_bytes: u64,
        interval: Duration,
        ledger: Arc<Ledger>,
    ) -> Self {
        Self {
            storage_root,
            extension: extension.into(),
            quota_bytes,
            interval,
            ledger,
        }
    }

    /// Sweep immediately, then every interval until cancelled
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                }
            }
            debug!("Retention sweeper stopped");
        })
    }

    /// One quota check, deleting as needed
    pub async fn sweep_once(&self) -> SweepReport {
        let root = self.storage_root.clone();
        let extension = self.extension.clone();
        let scanned = tokio::task::spawn_blocking(move || {
            let usage = disk_usage(&root);
            (usage, scan_segments(&root, &extension))
        })
        .await;

        let (usage, segments) = match scanned {
            Ok(result) => result,
            Err(e) => {
                error!("Disk usage scan aborted: {}", e);
                return SweepReport::default();
            }
        };

        self.evict(usage, segments).await
    }

    async fn evict(&self, usage: u64, mut segments: Vec<SegmentFile>) -> SweepReport {
        let mut report = SweepReport {
            usage_before: usage,
            usage_after: usage,
            ..Default::default()
        };

        if usage <= self.quota_bytes {
            debug!(
                "Disk usage {:.2} GB within quota {:.2} GB",
                usage as f64 / GB,
                self.quota_bytes as f64 / GB
            );
            return report;
        }

        info!(
            "Disk usage {:.2} GB exceeds quota {:.2} GB, evicting uploaded segments",
            usage as f64 / GB,
            self.quota_bytes as f64 / GB
        );

        segments.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

        let mut remaining = usage;
        for segment in segments {
            if remaining <= self.quota_bytes {
                break;
            }

            if !self.ledger.is_uploaded(&segment.path) {
                debug!("Keeping segment not yet uploaded: {}", segment.path.display());
                report.skipped_not_uploaded += 1;
                continue;
            }

            if let Err(e) = tokio::fs::remove_file(&segment.path).await {
                warn!("Failed to delete {}: {}", segment.path.display(), e);
                continue;
            }

            remaining = remaining.saturating_sub(segment.size);
            info!(
                "Deleted {} (freed {:.2} MB)",
                segment.path.display(),
                segment.size as f64 / 1024.0 / 1024.0
            );
            report.deleted.push(segment.path);
        }

        report.usage_after = remaining;
        if remaining > self.quota_bytes {
            warn!(
                "Still {:.2} GB over quota: remaining segments are not uploaded yet",
                (remaining - self.quota_bytes) as f64 / GB
            );
        } else {
            info!("Eviction done, disk usage now {:.2} GB", remaining as f64 / GB);
        }

        report
    }
}
