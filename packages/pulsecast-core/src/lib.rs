//! Pulsecast core - shared library for synchronized fleet audio playback.
//!
//! This crate holds both halves of the Pulsecast control plane: the
//! node-local side (player process manager, one-shot command server) and
//! the controller side (node registry, parallel command fan-out, health
//! polling, autonomous scheduling, persisted state). The two binaries in
//! `apps/` are thin wiring around these modules.
//!
//! # Architecture
//!
//! - [`protocol`]: the JSON-over-TCP request/response vocabulary
//! - [`player`]: external player process lifecycle on a node
//! - [`server`]: node accept loop and per-connection command handling
//! - [`registry`]: controller-owned node list with observed health
//! - [`dispatch`]: parallel bounded-timeout fan-out to all nodes
//! - [`poller`]: periodic PING rounds keeping health fresh
//! - [`scheduler`]: interval/time-window driven automatic playback
//! - [`state`]: persisted controller configuration
//! - [`error`]: centralized error types

pub mod dispatch;
pub mod error;
pub mod player;
pub mod poller;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod state;

// Re-export commonly used types at the crate root
pub use dispatch::{exchange, DispatchSummary, Dispatcher, NodeOutcome, DEFAULT_EXCHANGE_TIMEOUT};
pub use error::{
    ExchangeError, ExchangeResult, PlayerError, ProtocolError, ProtocolResult, RegistryError,
    ScheduleError, StateError,
};
pub use player::{PlayerManager, PlayerSettings};
pub use poller::{HealthPoller, DEFAULT_POLL_INTERVAL};
pub use protocol::{Request, Response, Status, DEFAULT_PORT, MAX_MESSAGE_BYTES};
pub use registry::{NodeConfig, NodeEntry, NodeHealth, NodeRegistry};
pub use scheduler::{
    AutoPlayScheduler, Countdown, PlaySettings, ScheduleConfig, DEFAULT_CHECK_INTERVAL,
};
pub use server::NodeServer;
pub use state::ControllerState;
