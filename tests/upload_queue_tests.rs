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

use anyhow::{bail, Result};
use async_trait::async_trait;
use segment_recorder::storage::{ByteStream, ObjectStore};
use segment_recorder::{Ledger, TaskOutcome, UploadOptions, UploadQueue, UploadTask};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Store keeping objects in memory
#[derive(Default)]
struct MemoryStore {
    calls: AtomicUsize,
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn put_object(
        &self,
        key: &str,
        mut body: ByteStream,
        size: u64,
        content_type: &str,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut data = Vec::new();
        body.read_to_end(&mut data).await?;
        if data.len() as u64 != size {
            bail!("size mismatch");
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (data, content_type.to_string()));
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn backend_type(&self) -> &str {
        "memory"
    }
}

/// Store rejecting every upload
#[derive(Default)]
struct FailingStore {
    calls: AtomicUsize,
}

#[async_trait]
impl ObjectStore for FailingStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn put_object(&self, _: &str, _: ByteStream, _: u64, _: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("backend unavailable")
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }

    fn backend_type(&self) -> &str {
        "failing"
    }
}

/// Store that never answers
struct HangingStore;

#[async_trait]
impl ObjectStore for HangingStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn put_object(&self, _: &str, _: ByteStream, _: u64, _: &str) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn backend_type(&self) -> &str {
        "hanging"
    }
}

fn options(root: &Path) -> UploadOptions {
    UploadOptions {
        enabled: true,
        storage_root: root.to_path_buf(),
        segment_extension: "mp4".to_string(),
        workers: 3,
        queue_capacity: 1000,
        retry: Default::default(),
        upload_timeout: Duration::from_secs(60),
        scan_delay: Duration::from_secs(3600),
        min_file_age: Duration::from_secs(30),
    }
}

fn write_segment(root: &Path, camera: &str, name: &str, age: Duration) -> PathBuf {
    let dir = root.join(camera);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, format!("video:{}", name)).unwrap();
    let file = fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
    path
}

async fn queue_with(
    store: Arc<dyn ObjectStore>,
    options: UploadOptions,
) -> (UploadQueue, CancellationToken) {
    let ledger = Ledger::load(&options.storage_root).await;
    let token = CancellationToken::new();
    (UploadQueue::new(store, ledger, options, token.clone()), token)
}

#[tokio::test]
async fn test_upload_uses_relative_key_and_content_type() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let store = Arc::new(MemoryStore::default());
    let (queue, _token) = queue_with(store.clone(), options(root)).await;

    let path = write_segment(root, "cam1", "cam1-2024-01-01-10-00.mp4", Duration::ZERO);
    let outcome = queue.process(UploadTask::new(path.clone())).await;

    assert_eq!(outcome, TaskOutcome::Uploaded);
    assert!(queue.ledger().is_uploaded(&path));

    let objects = store.objects.lock().unwrap();
    let (data, content_type) = &objects["cam1/cam1-2024-01-01-10-00.mp4"];
    assert_eq!(data.as_slice(), b"video:cam1-2024-01-01-10-00.mp4");
    assert_eq!(content_type, "video/mp4");
}

#[tokio::test]
async fn test_uploaded_path_is_never_uploaded_again() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let store = Arc::new(MemoryStore::default());
    let (queue, _token) = queue_with(store.clone(), options(root)).await;

    let path = write_segment(root, "cam1", "cam1-2024-01-01-10-00.mp4", Duration::ZERO);
    assert_eq!(queue.process(UploadTask::new(path.clone())).await, TaskOutcome::Uploaded);

    for _ in 0..5 {
        assert_eq!(
            queue.process(UploadTask::new(path.clone())).await,
            TaskOutcome::AlreadyUploaded
        );
    }
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_repeated_enqueue_with_workers_uploads_once() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let store = Arc::new(MemoryStore::default());
    let (queue, token) = queue_with(store.clone(), options(root)).await;

    let path = write_segment(root, "cam1", "cam1-2024-01-01-10-00.mp4", Duration::ZERO);
    for _ in 0..10 {
        assert!(queue.enqueue(path.clone()));
    }
    queue.start();

    let ledger = queue.ledger();
    for _ in 0..100 {
        if ledger.is_uploaded(&path) && queue.pending() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(ledger.is_uploaded(&path));
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    token.cancel();
}

#[tokio::test]
async fn test_backoff_schedule_then_permanent_failure() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let store = Arc::new(FailingStore::default());
    let (queue, token) = queue_with(store.clone(), options(root)).await;

    let path = write_segment(root, "cam1", "cam1-2024-01-01-10-00.mp4", Duration::ZERO);

    let expected = [30u64, 60, 120, 240, 480];
    for (attempt, seconds) in expected.iter().enumerate() {
        let task = UploadTask {
            path: path.clone(),
            attempt: attempt as u32,
        };
        assert_eq!(
            queue.process(task).await,
            TaskOutcome::Retrying {
                attempt: attempt as u32 + 1,
                delay: Duration::from_secs(*seconds),
            }
        );
        assert!(!queue.ledger().is_failed(&path));
    }

    let last = UploadTask {
        path: path.clone(),
        attempt: 5,
    };
    assert_eq!(queue.process(last).await, TaskOutcome::Failed);
    assert!(queue.ledger().is_failed(&path));
    assert!(path.exists());

    // Never retried again, not even from a fresh task
    assert_eq!(queue.process(UploadTask::new(path.clone())).await, TaskOutcome::Skipped);
    assert_eq!(store.calls.load(Ordering::SeqCst), 6);
    token.cancel();
}

#[tokio::test]
async fn test_retry_chain_with_workers_ends_failed() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let store = Arc::new(FailingStore::default());
    let mut opts = options(root);
    opts.retry.base_delay = Duration::from_millis(5);
    let (queue, token) = queue_with(store.clone(), opts).await;

    let path = write_segment(root, "cam1", "cam1-2024-01-01-10-00.mp4", Duration::ZERO);
    queue.start();
    queue.enqueue(path.clone());

    let ledger = queue.ledger();
    for _ in 0..200 {
        if ledger.is_failed(&path) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(ledger.is_failed(&path));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.calls.load(Ordering::SeqCst), 6);
    assert!(path.exists());

    let failed = fs::read_to_string(root.join(".failed")).unwrap();
    assert_eq!(failed.lines().collect::<Vec<_>>(), vec![path.to_string_lossy()]);
    token.cancel();
}

#[tokio::test]
async fn test_upload_timeout_counts_as_failure() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let mut opts = options(root);
    opts.upload_timeout = Duration::from_millis(50);
    let (queue, token) = queue_with(Arc::new(HangingStore), opts).await;

    let path = write_segment(root, "cam1", "cam1-2024-01-01-10-00.mp4", Duration::ZERO);
    let outcome = queue.process(UploadTask::new(path)).await;

    assert_eq!(
        outcome,
        TaskOutcome::Retrying {
            attempt: 1,
            delay: Duration::from_secs(30),
        }
    );
    token.cancel();
}

#[tokio::test]
async fn test_missing_file_is_retried() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::default());
    let (queue, token) = queue_with(store.clone(), options(temp_dir.path())).await;

    let outcome = queue
        .process(UploadTask::new(temp_dir.path().join("cam1/gone.mp4")))
        .await;

    assert!(matches!(outcome, TaskOutcome::Retrying { attempt: 1, .. }));
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    token.cancel();
}

#[tokio::test]
async fn test_full_queue_drops_task() {
    let temp_dir = TempDir::new().unwrap();
    let mut opts = options(temp_dir.path());
    opts.queue_capacity = 2;
    let (queue, _token) = queue_with(Arc::new(MemoryStore::default()), opts).await;

    assert!(queue.enqueue(PathBuf::from("/rec/a.mp4")));
    assert!(queue.enqueue(PathBuf::from("/rec/b.mp4")));
    assert!(!queue.enqueue(PathBuf::from("/rec/c.mp4")));
    assert_eq!(queue.pending(), 2);
}

#[tokio::test]
async fn test_disabled_queue_discards_work() {
    let temp_dir = TempDir::new().unwrap();
    let mut opts = options(temp_dir.path());
    opts.enabled = false;
    let (queue, _token) = queue_with(Arc::new(MemoryStore::default()), opts).await;

    assert!(!queue.enqueue(PathBuf::from("/rec/a.mp4")));
    assert_eq!(queue.pending(), 0);
    assert!(queue.start().is_empty());
}

#[tokio::test]
async fn test_scan_queues_only_old_unsettled_segments() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let old = Duration::from_secs(120);

    let uploaded = write_segment(root, "cam1", "cam1-2024-01-01-10-00.mp4", old);
    let failed = write_segment(root, "cam1", "cam1-2024-01-01-10-10.mp4", old);
    let pending = write_segment(root, "cam2", "cam2-2024-01-01-10-00.mp4", old);
    write_segment(root, "cam2", "cam2-2024-01-01-10-10.mp4", Duration::from_secs(5));
    fs::write(root.join("cam2/notes.txt"), "not a segment").unwrap();

    {
        let ledger = Ledger::load(root).await;
        ledger.mark_uploaded(&uploaded).await;
        ledger.mark_failed(&failed).await;
    }

    let store = Arc::new(MemoryStore::default());
    let (queue, _token) = queue_with(store, options(root)).await;

    assert_eq!(queue.scan_pending().await, 1);
    assert_eq!(queue.pending(), 1);
    assert_eq!(queue.process(UploadTask::new(pending.clone())).await, TaskOutcome::Uploaded);
}

#[tokio::test]
async fn test_intake_forwards_completed_segments() {
    let temp_dir = TempDir::new().unwrap();
    let (queue, token) = queue_with(Arc::new(MemoryStore::default()), options(temp_dir.path())).await;

    let (tx, rx) = mpsc::unbounded_channel();
    let intake = queue.spawn_intake(rx);

    tx.send(PathBuf::from("/rec/cam1/a.mp4")).unwrap();
    tx.send(PathBuf::from("/rec/cam1/b.mp4")).unwrap();
    drop(tx);
    intake.await.unwrap();

    assert_eq!(queue.pending(), 2);
    token.cancel();
}
