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

// Durable record of segments that reached a terminal upload outcome

use dashmap::DashSet;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Sidecar listing uploaded segments, rewritten on every change
pub const UPLOADED_FILE: &str = ".uploaded";
/// Sidecar listing permanently failed segments, append-only
pub const FAILED_FILE: &str = ".failed";

/// Upload ledger: two grow-only path sets persisted next to the recordings
///
/// In-memory state is authoritative. A persistence failure is logged and the
/// process keeps going; only a restart can lose the unsaved entries.
pub struct Ledger {
    uploaded: DashSet<PathBuf>,
    failed: DashSet<PathBuf>,
    uploaded_path: PathBuf,
    failed_path: PathBuf,
    write_lock: Mutex<()>,
}

impl Ledger {
    /// Load both sidecar files from `dir`; missing files mean an empty ledger
    pub async fn load(dir: &Path) -> Self {
        let ledger = Self {
            uploaded: DashSet::new(),
            failed: DashSet::new(),
            uploaded_path: dir.join(UPLOADED_FILE),
            failed_path: dir.join(FAILED_FILE),
            write_lock: Mutex::new(()),
        };

        read_paths(&ledger.uploaded_path, &ledger.uploaded).await;
        read_paths(&ledger.failed_path, &ledger.failed).await;

        info!(
            "Ledger loaded: {} uploaded, {} failed",
            ledger.uploaded.len(),
            ledger.failed.len()
        );

        ledger
    }

    pub fn is_uploaded(&self, path: &Path) -> bool {
        self.uploaded.contains(path)
    }

    pub fn is_failed(&self, path: &Path) -> bool {
        self.failed.contains(path)
    }

    /// True once the path reached either terminal state
    pub fn is_settled(&self, path: &Path) -> bool {
        self.is_uploaded(path) || self.is_failed(path)
    }

    pub fn uploaded_count(&self) -> usize {
        self.uploaded.len()
    }

    pub fn failed_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.failed.iter().map(|p| p.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Record a successful upload and rewrite the uploaded sidecar
    pub async fn mark_uploaded(&self, path: &Path) {
        if !self.uploaded.insert(path.to_path_buf()) {
            return;
        }

        let _guard = self.write_lock.lock().await;
        let mut lines: Vec<String> = self
            .uploaded
            .iter()
            .map(|p| p.key().to_string_lossy().to_string())
            .collect();
        lines.sort();

        let mut content = lines.join("\n");
        content.push('\n');

        if let Err(e) = replace_file(&self.uploaded_path, content.as_bytes()).await {
            warn!(
                "Failed to persist upload ledger {}: {}",
                self.uploaded_path.display(),
                e
            );
        }
    }

    /// Record a permanent failure and append it to the failed sidecar
    pub async fn mark_failed(&self, path: &Path) {
        if !self.failed.insert(path.to_path_buf()) {
            return;
        }

        let _guard = self.write_lock.lock().await;
        let line = format!("{}\n", path.to_string_lossy());
        let result = async {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.failed_path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            warn!(
                "Failed to record failed upload in {}: {}",
                self.failed_path.display(),
                e
            );
        }
    }
}

/// Write `content` next to `path` and rename it into place, so a crash
/// leaves either the old or the new file, never a truncated one
async fn replace_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

async fn read_paths(file: &Path, into: &DashSet<PathBuf>) {
    let content = match fs::read_to_string(file).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            warn!("Cannot read ledger file {}: {}", file.display(), e);
            return;
        }
    };

    for line in content.lines().map(str::trim).filter(|line| !line.is_empty()) {
        into.insert(PathBuf::from(line));
    }
}
