//! Autonomous playback scheduler.
//!
//! Re-issues the configured PLAY command at a fixed interval, but only
//! while the wall-clock time-of-day sits inside the configured window.
//! A separate once-per-second tick publishes the time remaining until the
//! next trigger for observation only; it never triggers playback itself.
//!
//! The window is inclusive on both ends and does not wrap past midnight:
//! with `end < start` it is simply never satisfied.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::error::ScheduleError;
use crate::protocol::Request;

/// Cadence of the trigger evaluation while enabled.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Cadence of the observation-only countdown tick.
pub const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// The PLAY parameters the scheduler fans out on each trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaySettings {
    pub filename: String,
    pub volume: u8,
    pub playcount: u32,
}

impl PlaySettings {
    pub fn to_request(&self) -> Request {
        Request::Play {
            filename: self.filename.clone(),
            volume: self.volume,
            playcount: self.playcount,
        }
    }
}

impl Default for PlaySettings {
    fn default() -> Self {
        Self {
            filename: String::new(),
            volume: 75,
            playcount: 1,
        }
    }
}

/// User-configured scheduling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    /// Minutes between triggers; 0 means auto-play cannot be enabled.
    pub interval_minutes: u32,
    /// Start of the daily window, inclusive.
    pub window_start: NaiveTime,
    /// End of the daily window, inclusive.
    pub window_end: NaiveTime,
    /// What to play on each trigger.
    pub play: PlaySettings,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 0,
            window_start: NaiveTime::from_hms_opt(0, 0, 0).expect("valid time"),
            window_end: NaiveTime::from_hms_opt(23, 59, 0).expect("valid time"),
            play: PlaySettings::default(),
        }
    }
}

impl ScheduleConfig {
    /// Whether a time-of-day falls inside the inclusive window.
    pub fn in_window(&self, time_of_day: NaiveTime) -> bool {
        self.window_start <= time_of_day && time_of_day <= self.window_end
    }
}

/// Time remaining until the next scheduled trigger, for display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    /// Auto-play is disabled.
    Disabled,
    /// The current time-of-day is outside the configured window.
    OutsideWindow,
    /// Seconds until the next trigger becomes due.
    Remaining(u64),
    /// The interval has elapsed; the next check will trigger.
    Imminent,
}

/// Pure trigger decision: inside the window and the interval has elapsed.
fn is_due(config: &ScheduleConfig, last_trigger: DateTime<Local>, now: DateTime<Local>) -> bool {
    if !config.in_window(now.time()) {
        return false;
    }
    let elapsed_minutes = (now - last_trigger).num_seconds() as f64 / 60.0;
    elapsed_minutes >= f64::from(config.interval_minutes)
}

/// Pure countdown computation for the observation tick.
fn countdown_at(
    config: &ScheduleConfig,
    last_trigger: DateTime<Local>,
    now: DateTime<Local>,
) -> Countdown {
    if !config.in_window(now.time()) {
        return Countdown::OutsideWindow;
    }
    let interval_seconds = i64::from(config.interval_minutes) * 60;
    let remaining = interval_seconds - (now - last_trigger).num_seconds();
    if remaining <= 0 {
        Countdown::Imminent
    } else {
        Countdown::Remaining(remaining as u64)
    }
}

/// Drives periodic fan-out of the configured PLAY command.
pub struct AutoPlayScheduler {
    dispatcher: Arc<Dispatcher>,
    config: RwLock<ScheduleConfig>,
    enabled: AtomicBool,
    last_trigger: Mutex<Option<DateTime<Local>>>,
    countdown_tx: watch::Sender<Countdown>,
    check_interval: Duration,
}

impl AutoPlayScheduler {
    pub fn new(dispatcher: Arc<Dispatcher>, config: ScheduleConfig) -> Self {
        let (countdown_tx, _) = watch::channel(Countdown::Disabled);
        Self {
            dispatcher,
            config: RwLock::new(config),
            enabled: AtomicBool::new(false),
            last_trigger: Mutex::new(None),
            countdown_tx,
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    /// Overrides the trigger-evaluation cadence (deployments with
    /// sub-minute intervals, tests).
    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    pub fn config(&self) -> ScheduleConfig {
        self.config.read().clone()
    }

    /// Replaces the schedule parameters. Takes effect on the next check.
    pub fn set_config(&self, config: ScheduleConfig) {
        *self.config.write() = config;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enables auto-play. Rejected while the interval is zero; on success
    /// the current time becomes the last-triggered timestamp.
    pub fn enable(&self) -> Result<(), ScheduleError> {
        let interval = self.config.read().interval_minutes;
        if interval == 0 {
            return Err(ScheduleError::IntervalNotSet);
        }
        *self.last_trigger.lock() = Some(Local::now());
        self.enabled.store(true, Ordering::SeqCst);
        log::info!("Auto-play enabled with {interval} minute interval");
        Ok(())
    }

    /// Disables auto-play immediately. In-flight fan-out is unaffected.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.countdown_tx.send_replace(Countdown::Disabled);
        log::info!("Auto-play disabled");
    }

    /// Resets the interval clock after a manual PLAY while enabled.
    pub fn note_manual_play(&self) {
        if self.is_enabled() {
            *self.last_trigger.lock() = Some(Local::now());
        }
    }

    /// Observation-only countdown channel, updated every second while the
    /// scheduler tasks run.
    pub fn subscribe_countdown(&self) -> watch::Receiver<Countdown> {
        self.countdown_tx.subscribe()
    }

    /// Evaluates the trigger condition once and fans out when due.
    async fn check(&self, now: DateTime<Local>) {
        if !self.is_enabled() {
            return;
        }
        let due = {
            let config = self.config.read();
            let last = *self.last_trigger.lock();
            last.is_some_and(|last| is_due(&config, last, now))
        };
        if !due {
            return;
        }

        log::info!("Auto-play triggered");
        *self.last_trigger.lock() = Some(Local::now());
        let request = self.config.read().play.to_request();
        self.dispatcher.dispatch(&request).await;
    }

    /// Recomputes and publishes the countdown. Never triggers playback.
    fn publish_countdown(&self, now: DateTime<Local>) {
        let countdown = if !self.is_enabled() {
            Countdown::Disabled
        } else {
            let config = self.config.read();
            match *self.last_trigger.lock() {
                Some(last) => countdown_at(&config, last, now),
                None => Countdown::Disabled,
            }
        };
        self.countdown_tx.send_replace(countdown);
    }

    /// Spawns the check task and the countdown tick task. Both exit when
    /// `cancel` fires.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let check_task = {
            let scheduler = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(scheduler.check_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => scheduler.check(Local::now()).await,
                    }
                }
                log::debug!("Scheduler check task stopped");
            })
        };

        let tick_task = {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(COUNTDOWN_TICK);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => scheduler.publish_countdown(Local::now()),
                    }
                }
                log::debug!("Scheduler countdown task stopped");
            })
        };

        vec![check_task, tick_task]
    }
}
