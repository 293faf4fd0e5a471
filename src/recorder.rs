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

// Per-camera recording supervision around an external encoder process

use crate::config::{CameraConfig, EncoderConfig};
use crate::segment::{seconds_to_next_boundary, segment_file_pattern};
use crate::watcher::SegmentWatcher;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// What an encoder invocation needs to know about its camera
#[derive(Debug, Clone)]
pub struct EncoderJob {
    pub camera: String,
    pub source_url: String,
    pub output_dir: PathBuf,
    pub segment_duration: u64,
    pub extension: String,
}

/// A running encoder
#[async_trait]
pub trait EncoderProcess: Send + Sync {
    /// Ask the encoder to finish its current segment and exit
    fn terminate(&self) -> Result<()>;

    /// Wait for the process to exit
    async fn wait(&self) -> Result<ExitStatus>;

    /// Forcefully stop the process
    async fn kill(&self) -> Result<()>;
}

/// Starts encoder processes
pub trait EncoderLauncher: Send + Sync {
    fn launch(&self, job: &EncoderJob) -> Result<Arc<dyn EncoderProcess>>;
}

/// Encoder arguments: reliable input transport, clock-aligned segmentation,
/// keyframes forced on every boundary, fast-start container layout
pub fn encoder_args(config: &EncoderConfig, job: &EncoderJob) -> Vec<String> {
    let pattern = segment_file_pattern(&job.output_dir, &job.camera, &job.extension);
    let duration = job.segment_duration.to_string();

    let mut args: Vec<String> = vec![
        "-rtsp_transport".into(),
        "tcp".into(),
        "-i".into(),
        job.source_url.clone(),
        "-c:v".into(),
        config.video_codec.clone(),
        "-preset".into(),
        config.preset.clone(),
        "-crf".into(),
        config.crf.to_string(),
    ];
    if config.video_codec == "libx265" {
        // Playback tag expected by Apple players
        args.extend(["-tag:v".into(), "hvc1".into()]);
    }
    args.extend([
        "-c:a".into(),
        config.audio_codec.clone(),
        "-b:a".into(),
        config.audio_bitrate.clone(),
        "-f".into(),
        "segment".into(),
        "-segment_time".into(),
        duration.clone(),
        "-segment_atclocktime".into(),
        "1".into(),
        "-strftime".into(),
        "1".into(),
        "-reset_timestamps".into(),
        "1".into(),
        "-segment_format".into(),
        job.extension.clone(),
        "-movflags".into(),
        "+faststart".into(),
        "-force_key_frames".into(),
        format!("expr:gte(t,n_forced*{})", duration),
        pattern.to_string_lossy().to_string(),
    ]);
    args
}

/// Launches the configured encoder binary (ffmpeg by default)
pub struct FfmpegLauncher {
    config: EncoderConfig,
}

impl FfmpegLauncher {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }
}

impl EncoderLauncher for FfmpegLauncher {
    fn launch(&self, job: &EncoderJob) -> Result<Arc<dyn EncoderProcess>> {
        let args = encoder_args(&self.config, job);
        info!("[{}] Starting encoder: {} {}", job.camera, self.config.program, args.join(" "));

        let mut command = Command::new(&self.config.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        // Own process group: a terminal Ctrl+C must not reach the encoder directly
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.config.program))?;

        if let Some(stderr) = child.stderr.take() {
            let camera = job.camera.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "encoder", "[{}] {}", camera, line);
                }
            });
        }

        Ok(Arc::new(ChildProcess::new(child)))
    }
}

/// Encoder running as a child process
struct ChildProcess {
    pid: Option<u32>,
    child: tokio::sync::Mutex<Child>,
}

impl ChildProcess {
    fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: tokio::sync::Mutex::new(child),
        }
    }
}

#[async_trait]
impl EncoderProcess for ChildProcess {
    #[cfg(unix)]
    fn terminate(&self) -> Result<()> {
        let Some(pid) = self.pid else {
            bail!("encoder process has no pid");
        };
        let pid = i32::try_from(pid).context("pid out of range")?;
        kill(Pid::from_raw(pid), Signal::SIGINT).context("Failed to send SIGINT")
    }

    #[cfg(not(unix))]
    fn terminate(&self) -> Result<()> {
        bail!("graceful encoder termination is only supported on unix")
    }

    async fn wait(&self) -> Result<ExitStatus> {
        let mut child = self.child.lock().await;
        child.wait().await.context("Failed to wait for encoder")
    }

    async fn kill(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        child.kill().await.context("Failed to kill encoder")
    }
}

/// Supervisor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Starting,
    Recording,
    RestartDelay,
    Stopping,
}

/// Supervision timings
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub segment_duration: u64,
    pub extension: String,
    pub restart_delay: Duration,
    pub stop_timeout: Duration,
    pub watch_interval: Duration,
}

impl SupervisorOptions {
    pub fn from_config(config: &crate::config::RecorderConfig) -> Self {
        Self {
            segment_duration: config.recording.segment_duration_seconds,
            extension: config.recording.segment_extension.clone(),
            restart_delay: config.encoder.restart_delay(),
            stop_timeout: config.encoder.stop_timeout(),
            watch_interval: config.encoder.watch_interval(),
        }
    }
}

struct Shared {
    camera: String,
    state: watch::Sender<SupervisorState>,
    process: Mutex<Option<Arc<dyn EncoderProcess>>>,
}

impl Shared {
    fn set_state(&self, state: SupervisorState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("[{}] {:?} -> {:?}", self.camera, previous, state);
        }
    }

    fn current_process(&self) -> Option<Arc<dyn EncoderProcess>> {
        self.process
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().cloned())
    }

    fn set_process(&self, process: Option<Arc<dyn EncoderProcess>>) {
        if let Ok(mut guard) = self.process.lock() {
            *guard = process;
        }
    }
}

/// Keeps one camera recording: launches the encoder, restarts it after a
/// crash, and runs the camera's segment watcher
pub struct RecordingSupervisor {
    camera: CameraConfig,
    storage_root: PathBuf,
    options: SupervisorOptions,
    launcher: Arc<dyn EncoderLauncher>,
    completed_tx: mpsc::UnboundedSender<PathBuf>,
    shared: Arc<Shared>,
    session: CancellationToken,
    stop_tx: watch::Sender<bool>,
    loop_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    watcher_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RecordingSupervisor {
    /// `parent` is the process-wide token; the session token derives from it
    pub fn new(
        camera: CameraConfig,
        storage_root: PathBuf,
        options: SupervisorOptions,
        launcher: Arc<dyn EncoderLauncher>,
        completed_tx: mpsc::UnboundedSender<PathBuf>,
        parent: &CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Stopped);
        let (stop_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                camera: camera.name.clone(),
                state,
                process: Mutex::new(None),
            }),
            camera,
            storage_root,
            options,
            launcher,
            completed_tx,
            session: parent.child_token(),
            stop_tx,
            loop_handle: tokio::sync::Mutex::new(None),
            watcher_handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn camera(&self) -> &str {
        &self.camera.name
    }

    pub fn output_dir(&self) -> PathBuf {
        self.storage_root.join(&self.camera.name)
    }

    pub fn state(&self) -> SupervisorState {
        *self.shared.state.borrow()
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.shared.state.subscribe()
    }

    /// Token cancelled as the last step of `stop`
    pub fn session_token(&self) -> CancellationToken {
        self.session.clone()
    }

    /// Create the camera directory, then start supervision and the watcher
    pub async fn start(&self) -> Result<()> {
        if self.state() != SupervisorState::Stopped {
            bail!("[{}] recording already started", self.camera.name);
        }
        if self.session.is_cancelled() {
            bail!("[{}] recording session already ended", self.camera.name);
        }

        let output_dir = self.output_dir();
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;

        self.shared.set_state(SupervisorState::Starting);

        let watcher = SegmentWatcher::new(
            self.camera.name.clone(),
            output_dir.clone(),
            self.options.extension.clone(),
            self.options.watch_interval,
            self.completed_tx.clone(),
        );
        *self.watcher_handle.lock().await = Some(watcher.spawn(self.session.clone()));

        let job = EncoderJob {
            camera: self.camera.name.clone(),
            source_url: self.camera.source_url.clone(),
            output_dir,
            segment_duration: self.options.segment_duration,
            extension: self.options.extension.clone(),
        };
        let handle = tokio::spawn(supervise(
            job,
            self.launcher.clone(),
            self.shared.clone(),
            self.options.restart_delay,
            self.stop_tx.subscribe(),
            self.session.clone(),
        ));
        *self.loop_handle.lock().await = Some(handle);

        info!("[{}] Recording started", self.camera.name);
        Ok(())
    }

    /// Two-phase stop: graceful signal, bounded wait for the loop, then cancel
    ///
    /// Cancelling first would tear the session down while the encoder is
    /// still muxing its last segment.
    pub async fn stop(&self) {
        info!("[{}] Stopping recording", self.camera.name);
        self.shared.set_state(SupervisorState::Stopping);
        self.stop_tx.send_replace(true);

        match self.shared.current_process() {
            Some(process) => {
                info!("[{}] Sending SIGINT to encoder", self.camera.name);
                if let Err(e) = process.terminate() {
                    warn!("[{}] Graceful stop failed, encoder may have exited: {:#}", self.camera.name, e);
                }
            }
            None => debug!("[{}] No encoder running", self.camera.name),
        }

        if let Some(handle) = self.loop_handle.lock().await.take() {
            match timeout(self.options.stop_timeout, handle).await {
                Ok(_) => info!("[{}] Recording fully stopped", self.camera.name),
                Err(_) => warn!(
                    "[{}] Timed out after {:?} waiting for the encoder to exit",
                    self.camera.name, self.options.stop_timeout
                ),
            }
        }

        self.session.cancel();

        if let Some(handle) = self.watcher_handle.lock().await.take() {
            let _ = handle.await;
        }
        self.shared.set_state(SupervisorState::Stopped);
    }
}

/// Supervision loop: run the encoder, restart it after the cooldown, forever
async fn supervise(
    job: EncoderJob,
    launcher: Arc<dyn EncoderLauncher>,
    shared: Arc<Shared>,
    restart_delay: Duration,
    mut stop_rx: watch::Receiver<bool>,
    session: CancellationToken,
) {
    loop {
        if *stop_rx.borrow() || session.is_cancelled() {
            break;
        }

        let wait_secs = seconds_to_next_boundary(&chrono::Local::now(), job.segment_duration);
        info!(
            "[{}] {}s until the next {}s boundary",
            job.camera, wait_secs, job.segment_duration
        );

        let exit = match launcher.launch(&job) {
            Ok(process) => {
                shared.set_process(Some(process.clone()));
                if *stop_rx.borrow() {
                    // Stop arrived between launch and publication
                    let _ = process.terminate();
                } else {
                    shared.set_state(SupervisorState::Recording);
                }

                let exit = tokio::select! {
                    status = process.wait() => status,
                    _ = session.cancelled() => {
                        warn!("[{}] Session cancelled with encoder still running, killing it", job.camera);
                        if let Err(e) = process.kill().await {
                            error!("[{}] {:#}", job.camera, e);
                        }
                        shared.set_process(None);
                        break;
                    }
                };
                shared.set_process(None);
                exit
            }
            Err(e) => Err(e),
        };

        if *stop_rx.borrow() {
            info!("[{}] Encoder exited after stop request", job.camera);
            break;
        }

        match exit {
            Ok(status) => warn!(
                "[{}] Encoder exited unexpectedly ({}), restarting in {:?}",
                job.camera, status, restart_delay
            ),
            Err(e) => error!(
                "[{}] Encoder error: {:#}, restarting in {:?}",
                job.camera, e, restart_delay
            ),
        }

        shared.set_state(SupervisorState::RestartDelay);
        tokio::select! {
            _ = session.cancelled() => break,
            _ = stop_rx.changed() => break,
            _ = sleep(restart_delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn job() -> EncoderJob {
        EncoderJob {
            camera: "front".to_string(),
            source_url: "rtsp://10.0.0.2/stream".to_string(),
            output_dir: PathBuf::from("/rec/front"),
            segment_duration: 600,
            extension: "mp4".to_string(),
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> &'a str {
        let index = args.iter().position(|a| a == flag).unwrap();
        &args[index + 1]
    }

    #[test]
    fn test_encoder_args_template() {
        let args = encoder_args(&EncoderConfig::default(), &job());

        assert_eq!(value_after(&args, "-rtsp_transport"), "tcp");
        assert_eq!(value_after(&args, "-i"), "rtsp://10.0.0.2/stream");
        assert_eq!(value_after(&args, "-c:v"), "libx265");
        assert_eq!(value_after(&args, "-c:a"), "aac");
        assert_eq!(value_after(&args, "-segment_time"), "600");
        assert_eq!(value_after(&args, "-segment_atclocktime"), "1");
        assert_eq!(value_after(&args, "-movflags"), "+faststart");
        assert_eq!(value_after(&args, "-force_key_frames"), "expr:gte(t,n_forced*600)");
        assert_eq!(args.last().unwrap(), "/rec/front/front-%Y-%m-%d-%H-%M.mp4");
    }

    #[test]
    fn test_hvc1_tag_only_for_x265() {
        let config = EncoderConfig {
            video_codec: "libx264".to_string(),
            ..Default::default()
        };
        let args = encoder_args(&config, &job());
        assert!(!args.iter().any(|a| a == "-tag:v"));
    }

    #[test]
    fn test_output_dir_is_under_root() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let supervisor = RecordingSupervisor::new(
            CameraConfig {
                name: "front".to_string(),
                source_url: "rtsp://x".to_string(),
                enabled: true,
            },
            PathBuf::from("/rec"),
            SupervisorOptions::from_config(&Default::default()),
            Arc::new(FfmpegLauncher::new(EncoderConfig::default())),
            tx,
            &CancellationToken::new(),
        );
        assert_eq!(supervisor.output_dir(), Path::new("/rec/front"));
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_interrupts_child() {
        use std::os::unix::process::ExitStatusExt;

        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let process = ChildProcess::new(child);

        process.terminate().unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGINT as i32));
    }
}
