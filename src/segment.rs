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

// Segment file helpers shared by the watcher, the upload scanner and retention

use chrono::{NaiveDateTime, Timelike};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

/// `strftime` layout of the timestamp the encoder embeds in file names
pub const SEGMENT_TIME_FORMAT: &str = "%Y-%m-%d-%H-%M";

/// One encoder output file as seen on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

fn stat_segment(path: PathBuf) -> Option<SegmentFile> {
    let metadata = fs::metadata(&path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    Some(SegmentFile {
        size: metadata.len(),
        modified: metadata.modified().ok()?,
        path,
    })
}

/// Segment files directly inside `dir` (one camera directory)
pub fn list_segments(dir: &Path, extension: &str) -> Vec<SegmentFile> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| has_extension(path, extension))
        .filter_map(stat_segment)
        .collect()
}

/// Regular files below `root`; unreadable entries are skipped
fn walk_files(root: &Path) -> impl Iterator<Item = walkdir::DirEntry> + '_ {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping unreadable entry under {}: {}", root.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
}

/// Every segment file below `root`, unreadable entries skipped
pub fn scan_segments(root: &Path, extension: &str) -> Vec<SegmentFile> {
    walk_files(root)
        .map(walkdir::DirEntry::into_path)
        .filter(|path| has_extension(path, extension))
        .filter_map(stat_segment)
        .collect()
}

/// Total size in bytes of every regular file below `root`
pub fn disk_usage(root: &Path) -> u64 {
    walk_files(root)
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

/// Object key for a segment: its path relative to the storage root, `/`-separated
pub fn object_key(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
    }
}

/// Output template handed to the encoder: `{dir}/{camera}-%Y-%m-%d-%H-%M.{ext}`
pub fn segment_file_pattern(dir: &Path, camera: &str, extension: &str) -> PathBuf {
    dir.join(format!("{}-{}.{}", camera, SEGMENT_TIME_FORMAT, extension))
}

/// Wall-clock start encoded in a segment file name, if it follows the camera pattern
pub fn parse_segment_time(camera: &str, path: &Path) -> Option<NaiveDateTime> {
    let stem = path.file_stem()?.to_str()?;
    let timestamp = stem.strip_prefix(camera)?.strip_prefix('-')?;
    NaiveDateTime::parse_from_str(&format!("{}-00", timestamp), "%Y-%m-%d-%H-%M-%S").ok()
}

/// Seconds from `now` until the next clock-aligned segment boundary
///
/// Exactly on a boundary this is a full segment duration.
pub fn seconds_to_next_boundary<T: Timelike>(now: &T, segment_duration: u64) -> u64 {
    if segment_duration == 0 {
        return 0;
    }
    let seconds_of_day = u64::from(now.num_seconds_from_midnight());
    match seconds_of_day % segment_duration {
        0 => segment_duration,
        remainder => segment_duration - remainder,
    }
}

/// MIME type recorded with an uploaded segment
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("ts") => "video/mp2t",
        _ => "application/octet-stream",
    }
}
