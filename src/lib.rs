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

// Unattended multi-camera segment recorder
//
// This service:
// - Runs one external encoder per camera, writing clock-aligned segments
// - Detects finished segments by watching each camera directory
// - Uploads finished segments to an object store with bounded retries
// - Keeps a durable ledger of uploaded and permanently failed segments
// - Evicts uploaded segments oldest-first when over the disk quota

pub mod config;
pub mod ledger;
pub mod recorder;
pub mod retention;
pub mod segment;
pub mod storage;
pub mod uploader;
pub mod watcher;

// Re-export main types
pub use config::{load_config, load_config_with_env, RecorderConfig};
pub use ledger::Ledger;
pub use recorder::{
    EncoderJob, EncoderLauncher, EncoderProcess, FfmpegLauncher, RecordingSupervisor,
    SupervisorOptions, SupervisorState,
};
pub use retention::{RetentionSweeper, SweepReport};
pub use segment::SegmentFile;
pub use storage::{BackendFactory, ObjectStore};
pub use uploader::{RetryPolicy, TaskOutcome, UploadError, UploadOptions, UploadQueue, UploadTask};
pub use watcher::SegmentWatcher;
