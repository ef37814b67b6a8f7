use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use sysinfo::System;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod audio;
mod cli;
mod config;
mod middleware;
mod queue;
mod resolver;
mod state;
mod utils;

use crate::audio::engine::StreamEngineFactory;
use crate::config::{load_config, EffectiveConfig};
use crate::queue::QueueCoordinator;
use crate::resolver::SourceFetcher;
use crate::state::AppState;
use crate::utils::{format_ram_mb, tools};

#[tokio::main]
async fn main() -> Result<()> {
    match cli::parse_args() {
        cli::CliAction::PrintVersion => {
            cli::print_version();
            return Ok(());
        }
        cli::CliAction::InitConfig => {
            cli::init_config_file();
            return Ok(());
        }
        cli::CliAction::RunServer => {}
    }
    let mut cfg = load_config();
    let _log_guard = init_tracing(cfg.clean_log_on_start);

    if let Err(e) = check_ffmpeg(&cfg.ffmpeg_path).await {
        error!(?e, path = %cfg.ffmpeg_path, "ffmpeg missing or unusable");
        std::process::exit(1);
    }
    ensure_ytdlp(&mut cfg).await;
    log_startup(&cfg);

    let stream = Arc::new(StreamEngineFactory::new(&cfg.ffmpeg_path));
    let fetcher = Arc::new(SourceFetcher::new(&cfg));
    let queue = QueueCoordinator::start(cfg.coordinator_options(), fetcher, stream.clone());
    queue.files().prepare(queue.lookahead())?;

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let state = AppState::new(cfg, queue.clone(), stream);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Listening");

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    }) {
        warn!(?e, "Ctrl-C handler not installed");
    }

    tokio::select! {
        res = axum::serve(listener, api::router(state)) => {
            if let Err(e) = res { error!(?e, "server error"); }
        }
        _ = shutdown_rx.recv() => info!("Shutdown signal received"),
    }

    queue.shutdown().await;
    Ok(())
}

/// Stdout plus `<NEARER_LOG_DIR>/latest.log`. The returned guard flushes the
/// file writer when dropped.
fn init_tracing(truncate: bool) -> Option<WorkerGuard> {
    let dir = PathBuf::from(std::env::var("NEARER_LOG_DIR").unwrap_or_else(|_| ".logs".into()));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(false).compact());

    if let Err(e) = std::fs::create_dir_all(&dir) {
        eprintln!("File logging disabled (cannot create {}): {}", dir.display(), e);
        registry.init();
        return None;
    }
    if truncate {
        let _ = std::fs::File::create(dir.join("latest.log"));
    }
    let (writer, guard) = tracing_appender::non_blocking(rolling::never(&dir, "latest.log"));
    registry.with(fmt::layer().with_ansi(false).with_target(false).with_writer(writer).compact()).init();
    Some(guard)
}

fn log_startup(cfg: &EffectiveConfig) {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu_all();
    let ram_mb = sys.total_memory() / (1024 * 1024);
    if ram_mb == 0 {
        warn!("Unable to determine RAM size");
    }
    let os = format!(
        "{} {}",
        System::name().unwrap_or_else(|| "Unknown OS".into()),
        System::os_version().unwrap_or_default()
    );
    let cpu = sys.cpus().first().map(|c| c.brand().to_string()).unwrap_or_else(|| "Unknown CPU".into());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        %os,
        %cpu,
        ram = %format_ram_mb(ram_mb),
        lookahead = cfg.lookahead,
        fetch_order = ?cfg.fetch_order,
        cache_dir = %cfg.cache_dir.display(),
        "Nearer server starting"
    );
}

/// Falls back to a managed yt-dlp under the user's home when the configured
/// one cannot be run. Failure is not fatal: local files and direct links
/// still play.
async fn ensure_ytdlp(cfg: &mut EffectiveConfig) {
    match tools::ensure_ytdlp(&cfg.ytdlp_path).await {
        Ok(Some(path)) => {
            cfg.ytdlp_path = path.to_string_lossy().into_owned();
            info!(path = %cfg.ytdlp_path, "Using managed yt-dlp binary");
        }
        Ok(None) => {}
        Err(e) => warn!(?e, path = %cfg.ytdlp_path, "yt-dlp unavailable; page links will fail to fetch"),
    }
}

async fn check_ffmpeg(path: &str) -> Result<()> {
    if let Err(e) = tools::probe(path, "-version", std::time::Duration::from_secs(5)).await {
        bail!("ffmpeg check failed: {e:#}");
    }
    Ok(())
}
