//! Tempo Audio Player (tempo-ap) - Main entry point
//!
//! Wires the playback session engine to its collaborators (database,
//! catalog, audio output, equalizer, visualizer) and serves the HTTP
//! control surface until ctrl-c or SIGTERM.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tempo_ap::audio::{GraphRegistry, HeadlessOutput, Mixer, ProcessingContext};
use tempo_ap::catalog::{InMemoryCatalog, Track};
use tempo_ap::config::RuntimeSettings;
use tempo_ap::db::snapshot::{SnapshotStore, SqliteSnapshotStore};
use tempo_ap::equalizer::{self, Equalizer};
use tempo_ap::playback::{PlaybackSession, SessionDeps, SessionHandle};
use tempo_ap::source::{is_audio_file, LocalFileSystem, MemoryCache, SourceResolver};
use tempo_ap::visualizer::VisualizerSampler;
use tempo_ap::{api, db};
use tempo_common::config::{LoggingConfig, TomlConfig};
use tempo_common::events::EventBus;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sample rate of the processing context when no device dictates one
const DEFAULT_SAMPLE_RATE: u32 = 44_100;

const EVENT_BUS_CAPACITY: usize = 256;

/// Command-line arguments for tempo-ap
#[derive(Parser, Debug)]
#[command(name = "tempo-ap")]
#[command(about = "Tempo playback session engine")]
#[command(version)]
struct Args {
    /// Path to config.toml (default: <config dir>/tempo/config.toml)
    #[arg(short, long, env = "TEMPO_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database path (overrides config)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Output device name; needs the `device` feature
    #[arg(long)]
    device: Option<String>,

    /// Audio files to load into the catalog, in queue order
    files: Vec<PathBuf>,
}

enum OutputDriver {
    /// Started once the mixer exists
    Headless(Option<HeadlessOutput>),
    #[cfg(feature = "device")]
    Device(tempo_ap::audio::output::DeviceOutput),
}

impl OutputDriver {
    fn start(&mut self, mixer: Arc<Mixer>) -> tempo_ap::Result<()> {
        match self {
            OutputDriver::Headless(slot) => {
                *slot = Some(HeadlessOutput::start(mixer));
                Ok(())
            }
            #[cfg(feature = "device")]
            OutputDriver::Device(output) => output.start(mixer),
        }
    }

    fn stop(&mut self) {
        match self {
            OutputDriver::Headless(slot) => {
                if let Some(output) = slot.as_mut() {
                    output.stop();
                }
            }
            #[cfg(feature = "device")]
            OutputDriver::Device(output) => output.stop(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // read before the subscriber exists; the loader's own log lines are lost
    let config = TomlConfig::load(args.config.as_deref());
    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging)?;
    let mut config = config.context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database.clone() {
        config.database_path = database;
    }

    info!(
        "Starting Tempo Audio Player v{} ({} built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );
    info!("Database: {}", config.database_path.display());

    let pool = db::connect(&config.database_path)
        .await
        .context("Failed to open database")?;
    let settings = RuntimeSettings::load(&pool)
        .await
        .context("Failed to load runtime settings")?;

    let catalog = Arc::new(build_catalog(&args.files));
    info!("Catalog: {} tracks", catalog.len());

    // Output first: a sound card decides the processing rate
    let (mut output, sample_rate) = open_output(args.device.as_deref());
    let context = Arc::new(ProcessingContext::new(sample_rate));
    let registry = GraphRegistry::init_global(Arc::clone(&context));
    let mixer = Arc::new(Mixer::new(Arc::clone(&context)));
    let bus = EventBus::new(EVENT_BUS_CAPACITY);

    // Equalizer: restore, persist on change, follow the live graphs
    let eq_settings = db::equalizer::load_equalizer(&pool)
        .await
        .context("Failed to load equalizer settings")?
        .unwrap_or_default();
    let eq = Equalizer::new(eq_settings).with_event_bus(bus.clone());
    let persister = equalizer::spawn_persister(
        pool.clone(),
        eq.subscribe(),
        settings.equalizer_save_debounce(),
    );
    let eq = eq.into_shared();

    let deps = SessionDeps {
        catalog,
        resolver: Arc::new(SourceResolver::new(
            Arc::new(LocalFileSystem),
            Arc::new(MemoryCache::new()),
        )),
        registry,
        mixer: Arc::clone(&mixer),
        bus: bus.clone(),
    };
    let mut session = PlaybackSession::new(deps, settings.clone());
    let feed = session.graph_feed();
    let follower = equalizer::spawn_graph_follower(Arc::clone(&eq), feed.clone());

    let store: Arc<dyn SnapshotStore> = Arc::new(SqliteSnapshotStore::new(pool.clone()));
    match store.load().await {
        Ok(Some(snapshot)) => {
            session.restore(&snapshot);
        }
        Ok(None) => info!("No saved session"),
        Err(e) => warn!("Failed to load session snapshot: {}", e),
    }
    let (handle, session_task) =
        SessionHandle::spawn(session, Some(store), settings.snapshot_interval());

    let visualizer = Arc::new(Mutex::new(VisualizerSampler::new(
        feed,
        settings.visualizer_fps,
    )));

    output
        .start(Arc::clone(&mixer))
        .context("Failed to start audio output")?;

    let ctx = api::AppContext {
        session: handle.clone(),
        equalizer: Arc::clone(&eq),
        visualizer: Arc::clone(&visualizer),
        bus,
    };
    let served = api::run(ctx, config.port, shutdown_signal()).await;

    // Server is down: final snapshot, then silence
    if let Err(e) = handle.shutdown().await {
        warn!("Session shutdown: {}", e);
    }
    if let Err(e) = session_task.await {
        error!("Session task failed: {}", e);
    }
    visualizer
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .stop();
    output.stop();
    follower.abort();
    let _ = follower.await;

    // dropping the equalizer lets the persister flush and exit
    drop(eq);
    if let Err(e) = persister.await {
        error!("Equalizer persister failed: {}", e);
    }
    pool.close().await;

    served.context("HTTP server failed")?;
    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{},tower_http=info", logging.level).into());

    let file_layer = match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

fn build_catalog(files: &[PathBuf]) -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    for path in files {
        if !is_audio_file(path) {
            warn!("Skipping {}: not a supported audio file", path.display());
            continue;
        }
        catalog.insert(Track::from_path(path));
    }
    catalog
}

#[cfg(feature = "device")]
fn open_output(device: Option<&str>) -> (OutputDriver, u32) {
    use tempo_ap::audio::output::DeviceOutput;
    match DeviceOutput::open(device) {
        Ok(output) => {
            let rate = output.sample_rate();
            (OutputDriver::Device(output), rate)
        }
        Err(e) => {
            warn!("No audio device ({}), falling back to headless output", e);
            (OutputDriver::Headless(None), DEFAULT_SAMPLE_RATE)
        }
    }
}

#[cfg(not(feature = "device"))]
fn open_output(device: Option<&str>) -> (OutputDriver, u32) {
    if let Some(name) = device {
        warn!(
            "Built without the `device` feature, ignoring --device {}",
            name
        );
    }
    (OutputDriver::Headless(None), DEFAULT_SAMPLE_RATE)
}

/// Resolves on ctrl-c or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
