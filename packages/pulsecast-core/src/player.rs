//! Player process manager.
//!
//! Wraps the external media player (cvlc by default) behind a start/stop/
//! status contract. The manager is the sole owner of the child-process
//! handle and guarantees at most one active playback sequence per node:
//! a new start fully terminates the previous sequence before spawning
//! anything.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::PlayerError;

/// Tunables for the external player invocation.
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    /// Program to invoke for each repetition.
    pub program: String,
    /// Pause between repetitions of the same file.
    pub repeat_gap: Duration,
    /// How long a terminated player may linger before being force-killed.
    pub kill_grace: Duration,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            program: "cvlc".to_string(),
            repeat_gap: Duration::from_millis(500),
            kill_grace: Duration::from_secs(2),
        }
    }
}

/// Status fields shared between the manager and the running sequence task.
#[derive(Debug, Default)]
struct PlaybackShared {
    playing: AtomicBool,
    current_file: Mutex<Option<String>>,
}

/// Handle to the currently running playback sequence.
struct ActiveSequence {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Node-local manager for the external audio player process.
pub struct PlayerManager {
    audio_dir: PathBuf,
    settings: PlayerSettings,
    shared: Arc<PlaybackShared>,
    /// Serializes start/stop from concurrent connection handlers.
    active: tokio::sync::Mutex<Option<ActiveSequence>>,
}

impl PlayerManager {
    /// Creates a manager rooted at `audio_dir`, creating the directory if
    /// it does not exist yet.
    pub fn new(audio_dir: impl Into<PathBuf>, settings: PlayerSettings) -> Result<Self, PlayerError> {
        let audio_dir = audio_dir.into();
        std::fs::create_dir_all(&audio_dir).map_err(|source| PlayerError::AudioDir {
            path: audio_dir.clone(),
            source,
        })?;

        if program_on_path(&settings.program) {
            log::info!("{} found and ready for audio playback", settings.program);
        } else {
            log::warn!(
                "{} not found on PATH; playback requests will fail to launch",
                settings.program
            );
        }

        Ok(Self {
            audio_dir,
            settings,
            shared: Arc::new(PlaybackShared::default()),
            active: tokio::sync::Mutex::new(None),
        })
    }

    /// Directory playback filenames are resolved against.
    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    /// Starts a playback sequence of `playcount` repetitions.
    ///
    /// Any active sequence is fully stopped first, so two sequences never
    /// overlap. Fails with [`PlayerError::FileNotFound`] if the resolved
    /// path does not exist; launch failures after that point are logged by
    /// the sequence task and end it early.
    pub async fn start(&self, filename: &str, volume: u8, playcount: u32) -> Result<(), PlayerError> {
        let path = self.audio_dir.join(filename);
        if !path.is_file() {
            log::error!("File not found: {}", path.display());
            return Err(PlayerError::FileNotFound(filename.to_string()));
        }

        let mut active = self.active.lock().await;
        stop_sequence(&mut active).await;

        self.shared.playing.store(true, Ordering::SeqCst);
        *self.shared.current_file.lock() = Some(filename.to_string());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_sequence(
            path,
            volume,
            playcount,
            self.settings.clone(),
            Arc::clone(&self.shared),
            cancel.clone(),
        ));
        *active = Some(ActiveSequence { cancel, task });
        Ok(())
    }

    /// Stops the active sequence, if any. Idempotent.
    ///
    /// Returns once the sequence task has exited, which is bounded by the
    /// kill grace period. Active state is always cleared before returning.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        stop_sequence(&mut active).await;
    }

    /// Current `(is_playing, current_file)` without blocking.
    pub fn status(&self) -> (bool, Option<String>) {
        (
            self.shared.playing.load(Ordering::SeqCst),
            self.shared.current_file.lock().clone(),
        )
    }
}

/// Cancels and joins the active sequence under the caller's lock.
async fn stop_sequence(active: &mut Option<ActiveSequence>) {
    let Some(sequence) = active.take() else {
        return;
    };
    if !sequence.task.is_finished() {
        log::info!("Stopping playback");
    }
    sequence.cancel.cancel();
    if sequence.task.await.is_err() {
        log::warn!("Playback sequence task ended abnormally");
    }
}

/// Runs `playcount` sequential player invocations, waiting for natural
/// completion between repetitions. Clears the shared status on exit.
async fn run_sequence(
    path: PathBuf,
    volume: u8,
    playcount: u32,
    settings: PlayerSettings,
    shared: Arc<PlaybackShared>,
    cancel: CancellationToken,
) {
    // 0-100 percent to the player's linear gain, 100% -> unity.
    let gain = f64::from(volume.min(100)) / 100.0;
    log::info!(
        "Playing {} {} time(s) at {}% volume",
        path.display(),
        playcount,
        volume
    );

    for repetition in 0..playcount {
        if cancel.is_cancelled() {
            break;
        }
        log::info!("Playback {}/{}", repetition + 1, playcount);

        if let Err(e) = play_once(&path, gain, &settings, &cancel).await {
            log::error!("Error running {}: {}", settings.program, e);
            break;
        }

        // Short gap before the next repetition.
        if repetition + 1 < playcount {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(settings.repeat_gap) => {}
            }
        }
    }

    log::info!("Playback completed");
    shared.playing.store(false, Ordering::SeqCst);
    *shared.current_file.lock() = None;
}

/// Launches one player invocation and waits for it to exit naturally, or
/// terminates it when the sequence is cancelled.
async fn play_once(
    path: &Path,
    gain: f64,
    settings: &PlayerSettings,
    cancel: &CancellationToken,
) -> std::io::Result<()> {
    let mut child = Command::new(&settings.program)
        .arg("--play-and-exit")
        .arg("--no-video")
        .arg("--quiet")
        .arg("--no-loop")
        .arg("--gain")
        .arg(format!("{gain}"))
        .arg(path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => log::debug!("Player exited with {status}"),
            Err(e) => log::error!("Failed waiting for player: {e}"),
        },
        _ = cancel.cancelled() => {
            terminate(&mut child, settings.kill_grace).await;
        }
    }
    Ok(())
}

/// Signals the child to terminate, force-killing after the grace period.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SIGTERM first so the player can release the audio device.
        unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => return,
            Err(_) => log::warn!("Player ignored SIGTERM for {grace:?}, killing"),
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        log::error!("Error stopping player process: {e}");
    }
}

/// Checks whether `program` resolves through the PATH environment.
fn program_on_path(program: &str) -> bool {
    let candidate = Path::new(program);
    if candidate.is_absolute() {
        return candidate.is_file();
    }
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
}
