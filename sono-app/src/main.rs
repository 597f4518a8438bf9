//! Sonoscope - command-line entry point
//!
//! Ingests the audio files given on the command line (placeholders first,
//! metadata and artwork verified in the background) and plays them in order.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sono_common::config::{ArtworkSettings, SonoConfig};
use sono_common::events::{EventBus, SonoEvent};
use sono_common::{PlaylistController, TrackStore};
use sono_ingest::Ingestor;
use sono_player::{PlaybackEngine, PlayerSession};
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for sonoscope
#[derive(Parser, Debug)]
#[command(name = "sonoscope")]
#[command(about = "Audio ingest, artwork discovery and playback")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "SONO_CONFIG")]
    config: Option<PathBuf>,

    /// Folder for the metadata cache database
    #[arg(short, long, env = "SONO_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Only embedded artwork and generated placeholders; no network lookups
    #[arg(long)]
    offline: bool,

    /// Ingest and verify without playing
    #[arg(long)]
    no_playback: bool,

    /// Audio files to ingest
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = SonoConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;
    if args.offline {
        config.artwork = ArtworkSettings::offline();
    }

    // RUST_LOG overrides the configured level
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let root_folder = config.resolve_root_folder(args.root_folder.as_deref());
    tokio::fs::create_dir_all(&root_folder)
        .await
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let events = EventBus::new(256);
    let tracks = Arc::new(TrackStore::new());

    let ingestor = Ingestor::from_config(&config, &root_folder, tracks.clone(), events.clone())
        .await
        .context("Failed to initialize ingestion")?;
    ingestor.worker().start().await;

    let engine = build_engine(&config, tracks.clone(), events.clone());
    let session = PlayerSession::attach(engine.clone(), &tracks)
        .await
        .context("Failed to attach player session")?;

    // Subscribe before ingesting so no end-of-playlist event is missed
    let mut event_rx = events.subscribe();

    let mut loaded = 0usize;
    for path in &args.files {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        match ingestor.load_audio_file(&file_name, bytes, None).await {
            Ok(track) => {
                loaded += 1;
                info!(track_id = %track.id, "Queued {} ({})", file_name, track.metadata.title);
            }
            Err(e) => warn!("Rejected {}: {}", path.display(), e),
        }
    }

    if loaded == 0 {
        anyhow::bail!("No playable files");
    }

    if args.no_playback {
        ingestor.worker().wait_idle().await;
    } else {
        tracks.play_track(0).await.context("Failed to start playlist")?;
        tokio::select! {
            _ = wait_for_playlist_end(&mut event_rx) => info!("Playlist finished"),
            _ = shutdown_signal() => {}
        }
    }

    for track in tracks.tracks().await {
        let artwork = track
            .artwork
            .as_ref()
            .map(|a| format!("{} ({:.2})", a.kind, a.confidence))
            .unwrap_or_else(|| "none".to_string());
        info!(
            "{} - {} [{}] artwork: {}",
            track.metadata.artist, track.metadata.title, track.metadata.album, artwork
        );
    }

    let stats = ingestor.worker().stats();
    info!(
        "Worker stats: {}",
        serde_json::to_string(&stats).unwrap_or_else(|_| format!("{:?}", stats))
    );

    engine.stop().await.ok();
    session.detach();
    ingestor.worker().destroy().await;
    info!("Shutdown complete");
    Ok(())
}

#[cfg(feature = "cpal-output")]
fn build_engine(config: &SonoConfig, tracks: Arc<TrackStore>, events: EventBus) -> PlaybackEngine {
    PlaybackEngine::with_device_output(config.playback.clone(), tracks, events)
}

#[cfg(not(feature = "cpal-output"))]
fn build_engine(config: &SonoConfig, tracks: Arc<TrackStore>, events: EventBus) -> PlaybackEngine {
    info!("Built without cpal-output; playback is silent");
    PlaybackEngine::with_null_output(config.playback.clone(), tracks, events)
}

/// Resolves when the last track of the playlist ends
async fn wait_for_playlist_end(rx: &mut tokio::sync::broadcast::Receiver<SonoEvent>) {
    loop {
        match rx.recv().await {
            Ok(SonoEvent::TrackEnded { has_next: false, .. }) => return,
            Ok(event) => debug!(?event, "Event"),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event listener lagged, skipped {} events", n);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
