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

// Segment completion detection by polling a camera directory

use crate::segment::{list_segments, parse_segment_time, SegmentFile};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Detects finished segments in one camera directory
///
/// The encoder gives no close event, so a segment counts as complete once a
/// newer file has taken over as the most recently modified one. The last
/// segment before a shutdown is therefore never reported here; the upload
/// queue's startup scan picks it up instead.
pub struct SegmentWatcher {
    camera: String,
    dir: PathBuf,
    extension: String,
    interval: Duration,
    completed_tx: mpsc::UnboundedSender<PathBuf>,
    /// Files already reported or present before the first poll
    handled: HashSet<PathBuf>,
    current: Option<PathBuf>,
    primed: bool,
}

impl SegmentWatcher {
    pub fn new(
        camera: impl Into<String>,
        dir: PathBuf,
        extension: impl Into<String>,
        interval: Duration,
        completed_tx: mpsc::UnboundedSender<PathBuf>,
    ) -> Self {
        Self {
            camera: camera.into(),
            dir,
            extension: extension.into(),
            interval,
            completed_tx,
            handled: HashSet::new(),
            current: None,
            primed: false,
        }
    }

    /// Segment currently being written, as far as the watcher can tell
    pub fn current(&self) -> Option<&PathBuf> {
        self.current.as_ref()
    }

    fn segments(&self) -> Vec<SegmentFile> {
        list_segments(&self.dir, &self.extension)
            .into_iter()
            .filter(|segment| parse_segment_time(&self.camera, &segment.path).is_some())
            .collect()
    }

    /// One poll; returns the segments reported complete, oldest first
    pub fn poll(&mut self) -> Vec<PathBuf> {
        let mut segments = self.segments();

        if !self.primed {
            self.primed = true;
            self.handled
                .extend(segments.iter().map(|segment| segment.path.clone()));
            debug!(
                "[{}] {} existing segments treated as handled",
                self.camera,
                self.handled.len()
            );
        }

        // Forget files that are gone (evicted or moved away)
        if !segments.is_empty() {
            let present: HashSet<&PathBuf> = segments.iter().map(|segment| &segment.path).collect();
            self.handled.retain(|path| present.contains(path));
        }

        // Rotation order; file name breaks mtime ties since names sort by start time
        segments.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        let Some(latest) = segments.pop().map(|segment| segment.path) else {
            return Vec::new();
        };

        if self.current.as_ref() == Some(&latest) {
            return Vec::new();
        }

        if !self.handled.contains(&latest) {
            info!(
                "[{}] Recording new segment: {}",
                self.camera,
                latest.file_name().unwrap_or_default().to_string_lossy()
            );
        }
        self.current = Some(latest);

        // Everything older than the newest file has been rotated away from,
        // including segments that came and went between two polls
        let mut completed = Vec::new();
        for segment in segments {
            if !self.handled.insert(segment.path.clone()) {
                continue;
            }

            info!("[{}] Segment complete: {}", self.camera, segment.path.display());
            if self.completed_tx.send(segment.path.clone()).is_err() {
                warn!(
                    "[{}] Upload intake closed, dropping {}",
                    self.camera,
                    segment.path.display()
                );
            }
            completed.push(segment.path);
        }
        completed
    }

    /// Poll until `token` is cancelled
    pub async fn run(mut self, token: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll();
                }
            }
        }

        debug!("[{}] Segment watcher stopped", self.camera);
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }
}
