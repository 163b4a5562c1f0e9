//! Pulsecast Node - headless audio playback endpoint.
//!
//! Listens for controller commands over TCP and plays audio files through
//! an external player (cvlc by default). Designed to run unattended on
//! small devices such as a Raspberry Pi.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use directories::UserDirs;
use pulsecast_core::{NodeServer, PlayerManager, PlayerSettings, DEFAULT_PORT};
use tokio::net::TcpListener;
use tokio::signal;

/// Pulsecast Node - headless audio playback endpoint.
#[derive(Parser, Debug)]
#[command(name = "pulsecast-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on for controller commands.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PULSECAST_PORT")]
    port: u16,

    /// Directory playback filenames are resolved against.
    /// Defaults to the user's Documents folder.
    #[arg(short = 'd', long, env = "PULSECAST_AUDIO_DIR")]
    audio_dir: Option<PathBuf>,

    /// External player program invoked for each playback.
    #[arg(long, default_value = "cvlc", env = "PULSECAST_PLAYER")]
    player: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "PULSECAST_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Pulsecast Node v{}", env!("CARGO_PKG_VERSION"));

    let audio_dir = match args.audio_dir {
        Some(dir) => dir,
        None => default_audio_dir().context(
            "Could not determine a default audio directory. \
             Please pass --audio-dir or set PULSECAST_AUDIO_DIR.",
        )?,
    };

    let settings = PlayerSettings {
        program: args.player,
        ..PlayerSettings::default()
    };
    let player = Arc::new(
        PlayerManager::new(&audio_dir, settings).context("Failed to prepare audio directory")?,
    );

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("Failed to bind port {}", args.port))?;

    let server = Arc::new(NodeServer::new(player));
    let mut server_task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run(listener).await })
    };

    tokio::select! {
        result = &mut server_task => {
            result?.context("Server error")?;
        }
        _ = shutdown_signal() => {
            log::info!("Shutdown signal received, cleaning up...");
            server.shutdown();
            server_task.await?.context("Server error during shutdown")?;
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Resolves the default audio directory: the user's Documents folder.
fn default_audio_dir() -> Option<PathBuf> {
    let dirs = UserDirs::new()?;
    Some(
        dirs.document_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dirs.home_dir().join("Documents")),
    )
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
