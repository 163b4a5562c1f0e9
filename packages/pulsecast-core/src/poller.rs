//! Periodic node health poller.
//!
//! Keeps the registry's observed health fresh by pinging every node at a
//! fixed cadence, independent of manual or scheduled play commands.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::protocol::Request;

/// Default cadence between ping rounds.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Background task issuing `PING` fan-outs on a fixed cadence.
pub struct HealthPoller {
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
}

impl HealthPoller {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self::with_interval(dispatcher, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_interval(dispatcher: Arc<Dispatcher>, interval: Duration) -> Self {
        Self { dispatcher, interval }
    }

    /// Spawns the poll loop; it exits when `cancel` fires. An empty
    /// registry makes a round a no-op.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            log::info!("Health poller started ({:?} cadence)", self.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if self.dispatcher.registry().is_empty() {
                            continue;
                        }
                        self.dispatcher.dispatch(&Request::Ping).await;
                    }
                }
            }
            log::debug!("Health poller stopped");
        })
    }
}
