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

// Upload queue: bounded task queue, fixed worker pool, retry timers

use crate::config::RecorderConfig;
use crate::ledger::Ledger;
use crate::segment::{content_type_for, object_key, scan_segments};
use crate::storage::ObjectStore;
use crossbeam::queue::ArrayQueue;
use dashmap::DashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One upload attempt series for a segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub path: PathBuf,
    /// Failed attempts so far
    pub attempt: u32,
}

impl UploadTask {
    pub fn new(path: PathBuf) -> Self {
        Self { path, attempt: 0 }
    }
}

/// Bounded exponential backoff for failed uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before re-queuing a task that failed with `attempt` prior failures
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// None once the task has used up its retries
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_retries).then(|| self.delay_for(attempt))
    }
}

/// Why a single upload attempt failed
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("cannot read segment {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload timed out after {0:?}")]
    Timeout(Duration),

    #[error("store rejected upload: {0:#}")]
    Store(anyhow::Error),
}

/// What happened to a dequeued task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Uploaded,
    AlreadyUploaded,
    /// Permanently failed earlier, or another worker holds the same path
    Skipped,
    Retrying { attempt: u32, delay: Duration },
    Failed,
}

/// Upload queue settings
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub enabled: bool,
    pub storage_root: PathBuf,
    pub segment_extension: String,
    pub workers: usize,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    pub upload_timeout: Duration,
    pub scan_delay: Duration,
    pub min_file_age: Duration,
}

impl UploadOptions {
    pub fn from_config(config: &RecorderConfig, storage_root: PathBuf) -> Self {
        let upload = &config.upload;
        Self {
            enabled: upload.enabled,
            storage_root,
            segment_extension: config.recording.segment_extension.clone(),
            workers: upload.workers,
            queue_capacity: upload.queue_capacity,
            retry: RetryPolicy {
                max_retries: upload.max_retries,
                base_delay: Duration::from_secs(upload.retry_base_delay_seconds),
            },
            upload_timeout: Duration::from_secs(upload.timeout_seconds),
            scan_delay: Duration::from_secs(upload.scan_delay_seconds),
            min_file_age: Duration::from_secs(upload.min_file_age_seconds),
        }
    }
}

struct Inner {
    queue: ArrayQueue<UploadTask>,
    available: Notify,
    in_flight: DashSet<PathBuf>,
    ledger: Arc<Ledger>,
    store: Arc<dyn ObjectStore>,
    options: UploadOptions,
    shutdown: CancellationToken,
}

/// Process-wide upload queue owning the ledger
///
/// Cloning is cheap and every clone feeds the same queue.
#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<Inner>,
}

impl UploadQueue {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ledger: Ledger,
        options: UploadOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: ArrayQueue::new(options.queue_capacity.max(1)),
                available: Notify::new(),
                in_flight: DashSet::new(),
                ledger: Arc::new(ledger),
                store,
                options,
                shutdown,
            }),
        }
    }

    pub fn ledger(&self) -> Arc<Ledger> {
        self.inner.ledger.clone()
    }

    pub fn options(&self) -> &UploadOptions {
        &self.inner.options
    }

    /// Tasks waiting for a worker
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Queue a completed segment; never blocks, drops the task when full
    pub fn enqueue(&self, path: PathBuf) -> bool {
        self.push_task(UploadTask::new(path))
    }

    fn push_task(&self, task: UploadTask) -> bool {
        if !self.inner.options.enabled {
            debug!("Uploads disabled, ignoring {}", task.path.display());
            return false;
        }

        let path = task.path.clone();
        let attempt = task.attempt;
        if self.inner.queue.push(task).is_err() {
            warn!("Upload queue full, dropping {}", path.display());
            return false;
        }
        self.inner.available.notify_one();

        if attempt == 0 {
            info!("Queued for upload: {}", path.display());
        } else {
            info!(
                "Re-queued for upload (retry {}/{}): {}",
                attempt,
                self.inner.options.retry.max_retries,
                path.display()
            );
        }
        true
    }

    /// Start the workers and the delayed startup scan
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        if !self.inner.options.enabled {
            info!("Uploads disabled, not starting upload workers");
            return Vec::new();
        }

        let mut handles = Vec::with_capacity(self.inner.options.workers + 1);

        let scanner = self.clone();
        handles.push(tokio::spawn(async move {
            tokio::select! {
                _ = scanner.inner.shutdown.cancelled() => {}
                _ = sleep(scanner.inner.options.scan_delay) => {
                    scanner.scan_pending().await;
                }
            }
        }));

        for id in 0..self.inner.options.workers {
            let worker = self.clone();
            handles.push(tokio::spawn(async move { worker.run_worker(id).await }));
        }

        handles
    }

    /// Forward completed-segment messages from watchers into the queue
    pub fn spawn_intake(&self, mut completed: mpsc::UnboundedReceiver<PathBuf>) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = queue.inner.shutdown.cancelled() => break,
                    message = completed.recv() => match message {
                        Some(path) => {
                            queue.enqueue(path);
                        }
                        None => break,
                    },
                }
            }
        })
    }

    /// Queue every settled-looking segment that never reached a terminal state
    ///
    /// Returns the number of segments queued.
    pub async fn scan_pending(&self) -> usize {
        let options = &self.inner.options;
        info!("Scanning {} for segments pending upload", options.storage_root.display());

        let root = options.storage_root.clone();
        let extension = options.segment_extension.clone();
        let segments = match tokio::task::spawn_blocking(move || scan_segments(&root, &extension)).await {
            Ok(segments) => segments,
            Err(e) => {
                error!("Pending upload scan aborted: {}", e);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut queued = 0;
        for segment in segments {
            if self.inner.ledger.is_settled(&segment.path) {
                continue;
            }
            let old_enough = now
                .duration_since(segment.modified)
                .is_ok_and(|age| age > options.min_file_age);
            if old_enough && self.enqueue(segment.path) {
                queued += 1;
            }
        }

        info!("Pending upload scan queued {} segments", queued);
        queued
    }

    async fn run_worker(self, id: usize) {
        info!("Upload worker #{} started", id);

        let shutdown = self.inner.shutdown.clone();
        'outer: loop {
            while let Some(task) = self.inner.queue.pop() {
                tokio::select! {
                    _ = shutdown.cancelled() => break 'outer,
                    _ = self.process(task) => {}
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.inner.available.notified() => {}
            }
        }

        info!("Upload worker #{} stopped", id);
    }

    /// Run one attempt for `task` and schedule what follows
    pub async fn process(&self, task: UploadTask) -> TaskOutcome {
        if !self.inner.in_flight.insert(task.path.clone()) {
            debug!("Upload already in progress for {}", task.path.display());
            return TaskOutcome::Skipped;
        }

        let outcome = self.attempt(&task).await;
        self.inner.in_flight.remove(&task.path);
        outcome
    }

    async fn attempt(&self, task: &UploadTask) -> TaskOutcome {
        let ledger = &self.inner.ledger;
        if ledger.is_uploaded(&task.path) {
            debug!("Already uploaded, skipping {}", task.path.display());
            return TaskOutcome::AlreadyUploaded;
        }
        if ledger.is_failed(&task.path) {
            debug!("Permanently failed, skipping {}", task.path.display());
            return TaskOutcome::Skipped;
        }

        match self.upload_file(&task.path).await {
            Ok(()) => {
                ledger.mark_uploaded(&task.path).await;
                info!("Uploaded {}", task.path.display());
                TaskOutcome::Uploaded
            }
            Err(e) => {
                warn!("Upload failed [{}]: {}", task.path.display(), e);
                match self.inner.options.retry.next_delay(task.attempt) {
                    Some(delay) => {
                        let attempt = task.attempt + 1;
                        self.schedule_retry(
                            UploadTask {
                                path: task.path.clone(),
                                attempt,
                            },
                            delay,
                        );
                        TaskOutcome::Retrying { attempt, delay }
                    }
                    None => {
                        error!(
                            "Giving up on {} after {} retries",
                            task.path.display(),
                            task.attempt
                        );
                        ledger.mark_failed(&task.path).await;
                        TaskOutcome::Failed
                    }
                }
            }
        }
    }

    /// Re-queue after `delay` without holding a worker
    fn schedule_retry(&self, task: UploadTask, delay: Duration) {
        info!("Retrying {} in {:?}", task.path.display(), delay);

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.inner.shutdown.cancelled() => {}
                _ = sleep(delay) => {
                    queue.push_task(task);
                }
            }
        });
    }

    async fn upload_file(&self, path: &Path) -> Result<(), UploadError> {
        let open_error = |source| UploadError::Open {
            path: path.to_path_buf(),
            source,
        };

        let file = tokio::fs::File::open(path).await.map_err(open_error)?;
        let size = file.metadata().await.map_err(open_error)?.len();
        let key = object_key(&self.inner.options.storage_root, path);

        info!("Uploading {} ({:.2} MB)", key, size as f64 / 1024.0 / 1024.0);

        let timeout = self.inner.options.upload_timeout;
        let upload = self
            .inner
            .store
            .put_object(&key, Box::new(file), size, content_type_for(path));

        match tokio::time::timeout(timeout, upload).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(UploadError::Store(e)),
            Err(_) => Err(UploadError::Timeout(timeout)),
        }
    }
}
