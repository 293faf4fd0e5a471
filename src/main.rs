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

use anyhow::{bail, Context, Result};
use clap::Parser;
use segment_recorder::config::{load_config_with_env, LoggingConfig};
use segment_recorder::{
    BackendFactory, FfmpegLauncher, Ledger, RecordingSupervisor, RetentionSweeper,
    SupervisorOptions, UploadOptions, UploadQueue,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Segment Recorder - record live cameras to segments and upload them
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    /// Local storage root (overrides config file)
    #[arg(short, long)]
    storage_path: Option<String>,
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.to_lowercase()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration from file
    let mut config = load_config_with_env(&args.config)?;

    // Apply CLI overrides
    if let Some(storage_path) = args.storage_path {
        config.recording.storage_path = storage_path;
    }

    init_tracing(&config.logging)?;

    info!("Starting Segment Recorder");
    info!("Loaded configuration from: {:?}", args.config);
    info!(
        "{} cameras configured, uploads {}, proxy {}",
        config.cameras.len(),
        if config.upload.enabled { "enabled" } else { "disabled" },
        if config.proxy.enabled { "enabled" } else { "disabled" }
    );

    // Ledger entries are absolute paths, so resolve the root once
    let storage_root = config.recording.storage_root();
    std::fs::create_dir_all(&storage_root)
        .with_context(|| format!("Failed to create storage root {}", storage_root.display()))?;
    let storage_root = std::fs::canonicalize(&storage_root)
        .context("Failed to resolve storage root")?;
    info!("Storage root: {}", storage_root.display());

    let shutdown = CancellationToken::new();

    // Create object store
    let store = BackendFactory::create(&config.storage, &config.proxy)?;
    info!("Object store: {}", store.backend_type());
    if config.upload.enabled {
        if let Err(e) = store.initialize().await {
            warn!("Object store initialization failed, uploads will retry: {:#}", e);
        }
        match store.health_check().await {
            Ok(true) => info!("Object store is reachable"),
            Ok(false) => warn!("Object store health check failed, uploads will retry"),
            Err(e) => warn!("Object store health check error: {:#}", e),
        }
    }

    // Upload queue owns the ledger
    let ledger = Ledger::load(&storage_root).await;
    let upload_queue = UploadQueue::new(
        store,
        ledger,
        UploadOptions::from_config(&config, storage_root.clone()),
        shutdown.clone(),
    );
    upload_queue.start();

    let (completed_tx, completed_rx) = mpsc::unbounded_channel();
    upload_queue.spawn_intake(completed_rx);

    RetentionSweeper::new(
        storage_root.clone(),
        config.recording.segment_extension.clone(),
        config.recording.quota_bytes(),
        config.retention.check_interval(),
        upload_queue.ledger(),
    )
    .spawn(shutdown.clone());

    // One supervisor per enabled camera
    let launcher = Arc::new(FfmpegLauncher::new(config.encoder.clone()));
    let options = SupervisorOptions::from_config(&config);
    let mut supervisors = Vec::new();

    for camera in &config.cameras {
        if !camera.enabled {
            info!("Camera {} disabled, skipping", camera.name);
            continue;
        }

        let supervisor = RecordingSupervisor::new(
            camera.clone(),
            storage_root.clone(),
            options.clone(),
            launcher.clone(),
            completed_tx.clone(),
            &shutdown,
        );

        if let Err(e) = supervisor.start().await {
            error!("Failed to start camera {}: {:#}", camera.name, e);
            continue;
        }
        supervisors.push(Arc::new(supervisor));
    }

    if supervisors.is_empty() {
        shutdown.cancel();
        bail!("No camera could be started");
    }

    info!("Recording {} cameras, waiting for Ctrl+C or SIGTERM", supervisors.len());
    signals::shutdown_signal().await;
    info!("Shutdown requested");

    // Stop every encoder gracefully before cancelling anything process-wide
    let stops: Vec<_> = supervisors
        .iter()
        .cloned()
        .map(|supervisor| tokio::spawn(async move { supervisor.stop().await }))
        .collect();
    for stop in stops {
        let _ = stop.await;
    }

    shutdown.cancel();
    info!("Segment Recorder shut down successfully");

    Ok(())
}

mod signals {
    use tracing::warn;

    /// Resolves on Ctrl+C, or SIGTERM on unix
    pub async fn shutdown_signal() {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!("Cannot listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
    }
}
