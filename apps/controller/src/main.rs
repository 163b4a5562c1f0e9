//! Pulsecast Controller - command a fleet of playback nodes.
//!
//! One-shot subcommands fan a command out to every configured node and
//! report per-node outcomes; `run` starts the long-lived controller with
//! periodic health polling and optional autonomous playback scheduling.
//! Node list and playback parameters persist in a JSON state file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use pulsecast_core::{
    AutoPlayScheduler, ControllerState, Countdown, DispatchSummary, Dispatcher, HealthPoller,
    NodeConfig, NodeRegistry, Request, DEFAULT_PORT,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Pulsecast Controller - command a fleet of playback nodes.
#[derive(Parser, Debug)]
#[command(name = "pulsecast-ctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the persisted state file.
    #[arg(short, long, env = "PULSECAST_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Per-node exchange timeout in seconds.
    #[arg(long, default_value_t = 5, env = "PULSECAST_TIMEOUT_SECS")]
    timeout_secs: u64,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "PULSECAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    #[command(subcommand)]
    command: CtlCommand,
}

#[derive(Subcommand, Debug)]
enum CtlCommand {
    /// Send a PLAY command to every node.
    Play {
        /// Filename to play; defaults to the last used one.
        filename: Option<String>,
        /// Volume 0-100; defaults to the last used value.
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        volume: Option<u8>,
        /// Repeat count; defaults to the last used value.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        playcount: Option<u32>,
    },
    /// Send a STOP command to every node.
    Stop,
    /// Ping every node once and print its status.
    Ping,
    /// Manage the configured node list.
    #[command(subcommand)]
    Node(NodeCommand),
    /// Configure the auto-play schedule.
    Schedule {
        /// Interval between triggers in minutes (0 disables auto-play).
        #[arg(long)]
        interval: u32,
        /// Start of the daily window, HH:mm.
        #[arg(long, value_parser = parse_hhmm)]
        start: Option<NaiveTime>,
        /// End of the daily window, HH:mm.
        #[arg(long, value_parser = parse_hhmm)]
        end: Option<NaiveTime>,
    },
    /// Run the controller daemon: health polling plus optional auto-play.
    Run {
        /// Enable autonomous playback on startup.
        #[arg(long)]
        auto_play: bool,
    },
}

#[derive(Subcommand, Debug)]
enum NodeCommand {
    /// Add a node to the fleet.
    Add {
        name: String,
        hostname: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Remove every node with the given name.
    Remove { name: String },
    /// List configured nodes.
    List,
}

fn parse_hhmm(text: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(text, "%H:%M").map_err(|e| format!("expected HH:mm - {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    let state_path = match args.state_file.clone() {
        Some(path) => path,
        None => default_state_path().context(
            "Could not determine a state file location. \
             Please pass --state-file or set PULSECAST_STATE_FILE.",
        )?,
    };
    let mut state = ControllerState::load(&state_path).context("Failed to load state")?;

    let registry = Arc::new(NodeRegistry::new());
    registry.load(state.servers.clone());
    let dispatcher = Arc::new(Dispatcher::with_timeout(
        Arc::clone(&registry),
        Duration::from_secs(args.timeout_secs),
    ));

    match args.command {
        CtlCommand::Play {
            filename,
            volume,
            playcount,
        } => {
            if let Some(filename) = filename {
                state.filename = filename;
            }
            if let Some(volume) = volume {
                state.volume = volume;
            }
            if let Some(playcount) = playcount {
                state.playcount = playcount;
            }
            if state.filename.is_empty() {
                bail!("No filename given and none saved from a previous play");
            }
            if registry.is_empty() {
                bail!("No nodes configured; add one with `pulsecast-ctl node add`");
            }
            state.save(&state_path).context("Failed to save state")?;

            let summary = dispatcher.dispatch(&state.play_settings().to_request()).await;
            print_summary(&summary);
        }
        CtlCommand::Stop => {
            let summary = dispatcher.dispatch(&Request::Stop).await;
            print_summary(&summary);
        }
        CtlCommand::Ping => {
            let summary = dispatcher.dispatch(&Request::Ping).await;
            print_summary(&summary);
        }
        CtlCommand::Node(node_command) => {
            handle_node_command(node_command, &registry, &mut state, &state_path)?;
        }
        CtlCommand::Schedule { interval, start, end } => {
            state.interval = interval;
            if let Some(start) = start {
                state.start_time = start;
            }
            if let Some(end) = end {
                state.end_time = end;
            }
            state.save(&state_path).context("Failed to save state")?;
            println!(
                "Schedule: every {} min within {} - {}",
                state.interval,
                state.start_time.format("%H:%M"),
                state.end_time.format("%H:%M")
            );
        }
        CtlCommand::Run { auto_play } => {
            run_daemon(dispatcher, &state, auto_play).await?;
            // Registry contents may have shifted if a future version adds
            // runtime node management; persist what we have on the way out.
            state.servers = registry.configs();
            state.save(&state_path).context("Failed to save state")?;
        }
    }

    Ok(())
}

fn handle_node_command(
    command: NodeCommand,
    registry: &NodeRegistry,
    state: &mut ControllerState,
    state_path: &std::path::Path,
) -> Result<()> {
    match command {
        NodeCommand::Add { name, hostname, port } => {
            let config = NodeConfig { name, hostname, port };
            registry
                .add(config.clone())
                .context("Invalid node configuration")?;
            state.servers.push(config);
            state.save(state_path).context("Failed to save state")?;
            println!("Added node ({} total)", state.servers.len());
        }
        NodeCommand::Remove { name } => {
            let removed = registry.remove_by_name(&name);
            if removed == 0 {
                bail!("No node named '{name}'");
            }
            state.servers.retain(|n| n.name != name);
            state.save(state_path).context("Failed to save state")?;
            println!("Removed {removed} node(s)");
        }
        NodeCommand::List => {
            if state.servers.is_empty() {
                println!("No nodes configured");
            }
            for node in &state.servers {
                println!("{}  {}", node.name, node.address());
            }
        }
    }
    Ok(())
}

/// Long-lived controller: health poller plus the auto-play scheduler.
async fn run_daemon(
    dispatcher: Arc<Dispatcher>,
    state: &ControllerState,
    auto_play: bool,
) -> Result<()> {
    log::info!("Pulsecast Controller v{}", env!("CARGO_PKG_VERSION"));
    log::info!(
        "{} node(s) configured",
        dispatcher.registry().len()
    );

    let cancel = CancellationToken::new();
    let poller_task = HealthPoller::new(Arc::clone(&dispatcher)).spawn(cancel.clone());

    let scheduler = Arc::new(AutoPlayScheduler::new(
        Arc::clone(&dispatcher),
        state.schedule_config(),
    ));
    if auto_play {
        scheduler
            .enable()
            .context("Cannot enable auto-play")?;
    }
    let mut tasks = scheduler.spawn(cancel.clone());
    tasks.push(poller_task);
    tasks.push(spawn_countdown_log(&scheduler, cancel.clone()));

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Logs countdown transitions at debug level for observability.
fn spawn_countdown_log(
    scheduler: &Arc<AutoPlayScheduler>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut countdown = scheduler.subscribe_countdown();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = countdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    match *countdown.borrow_and_update() {
                        Countdown::Disabled => log::debug!("Auto-play disabled"),
                        Countdown::OutsideWindow => log::debug!("Outside time window"),
                        Countdown::Remaining(secs) => {
                            log::debug!("Next play in {}m {}s", secs / 60, secs % 60);
                        }
                        Countdown::Imminent => log::debug!("Playing soon..."),
                    }
                }
            }
        }
    })
}

fn print_summary(summary: &DispatchSummary) {
    for outcome in &summary.outcomes {
        let (playing, file) = outcome
            .response
            .as_ref()
            .map(|r| (r.is_playing.unwrap_or(false), r.current_file.clone()))
            .unwrap_or((false, None));
        let detail = match file {
            Some(file) if playing => format!("playing {file}"),
            _ if playing => "playing".to_string(),
            _ => "idle".to_string(),
        };
        println!("{:<20} {:<8} {}", outcome.name, outcome.health.to_string(), detail);
    }
    println!(
        "{}/{} node(s) reachable",
        summary.reachable(),
        summary.outcomes.len()
    );
}

/// Resolves the default state file under the user's config directory.
fn default_state_path() -> Option<PathBuf> {
    let dirs = ProjectDirs::from("", "", "pulsecast")?;
    Some(dirs.config_dir().join("state.json"))
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
